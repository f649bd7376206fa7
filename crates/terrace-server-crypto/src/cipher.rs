// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use aes_gcm::{
	aead::{Aead, KeyInit, OsRng},
	Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;
use sha2::Sha256;
use std::fmt;
use terrace_common_secret::SecretString;
use zeroize::Zeroizing;

use crate::error::{CipherError, Result};

/// AES-256 key size in bytes.
pub const KEY_SIZE: usize = 32;

/// AES-GCM nonce size in bytes.
pub const NONCE_SIZE: usize = 12;

/// AES-GCM authentication tag size in bytes.
pub const TAG_SIZE: usize = 16;

/// Lower bound accepted for PBKDF2-HMAC-SHA256 derivation.
pub const MIN_PBKDF2_ITERATIONS: u32 = 100_000;

const SALT_SIZE: usize = 16;

/// Seals and opens credentials for storage in text columns.
///
/// Output layout is `base64(nonce || ciphertext || tag)` with a fresh random
/// nonce per call. Empty input maps to empty output in both directions so
/// optional columns stay empty.
pub struct CredentialCipher {
	key: Zeroizing<[u8; KEY_SIZE]>,
}

impl CredentialCipher {
	/// Build a cipher from raw key bytes.
	pub fn new(key: &[u8]) -> Result<Self> {
		if key.len() != KEY_SIZE {
			return Err(CipherError::KeyLengthInvalid(key.len()));
		}
		let mut bytes = Zeroizing::new([0u8; KEY_SIZE]);
		bytes.copy_from_slice(key);
		Ok(Self { key: bytes })
	}

	/// Build a cipher from a configured key string: 64 hex chars or base64.
	pub fn from_encoded(encoded: &str) -> Result<Self> {
		let encoded = encoded.trim();
		let decoded = if encoded.len() == KEY_SIZE * 2 && encoded.chars().all(|c| c.is_ascii_hexdigit()) {
			hex::decode(encoded).map_err(|_| CipherError::KeyLengthInvalid(encoded.len()))?
		} else {
			BASE64
				.decode(encoded)
				.map_err(|_| CipherError::KeyLengthInvalid(encoded.len()))?
		};
		let decoded = Zeroizing::new(decoded);
		Self::new(&decoded)
	}

	/// Derive the key from an operator passphrase with PBKDF2-HMAC-SHA256.
	///
	/// The salt is per install and must be stable across restarts, otherwise
	/// previously sealed values cannot be opened.
	pub fn derive(passphrase: &str, salt: &[u8], iterations: u32) -> Result<Self> {
		if passphrase.is_empty() {
			return Err(CipherError::KeyDerivation("passphrase is empty".to_string()));
		}
		if salt.len() < 8 {
			return Err(CipherError::KeyDerivation(
				"salt must be at least 8 bytes".to_string(),
			));
		}
		if iterations < MIN_PBKDF2_ITERATIONS {
			return Err(CipherError::KeyDerivation(format!(
				"iterations {iterations} below minimum {MIN_PBKDF2_ITERATIONS}"
			)));
		}

		let mut key = Zeroizing::new([0u8; KEY_SIZE]);
		pbkdf2::pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt, iterations, key.as_mut());
		Ok(Self { key })
	}

	/// Encrypt `plaintext` and return base64 text.
	pub fn seal(&self, plaintext: &[u8]) -> Result<String> {
		if plaintext.is_empty() {
			return Ok(String::new());
		}

		let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(self.key.as_slice()));
		let mut nonce_bytes = [0u8; NONCE_SIZE];
		OsRng.fill_bytes(&mut nonce_bytes);

		let ciphertext = cipher
			.encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
			.map_err(|_| CipherError::EncryptionFailed)?;

		let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
		out.extend_from_slice(&nonce_bytes);
		out.extend_from_slice(&ciphertext);
		Ok(BASE64.encode(out))
	}

	pub fn seal_str(&self, plaintext: &str) -> Result<String> {
		self.seal(plaintext.as_bytes())
	}

	/// Decrypt base64 text produced by [`CredentialCipher::seal`].
	pub fn open(&self, sealed: &str) -> Result<Zeroizing<Vec<u8>>> {
		if sealed.is_empty() {
			return Ok(Zeroizing::new(Vec::new()));
		}

		let raw = BASE64
			.decode(sealed.trim())
			.map_err(|_| CipherError::CiphertextCorrupted)?;
		if raw.len() < NONCE_SIZE + TAG_SIZE {
			return Err(CipherError::CiphertextCorrupted);
		}

		let (nonce, ciphertext) = raw.split_at(NONCE_SIZE);
		let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(self.key.as_slice()));
		let plaintext = cipher
			.decrypt(Nonce::from_slice(nonce), ciphertext)
			.map_err(|_| CipherError::DecryptionFailed)?;

		Ok(Zeroizing::new(plaintext))
	}

	/// Decrypt into a redacting string wrapper.
	pub fn open_secret(&self, sealed: &str) -> Result<SecretString> {
		let bytes = self.open(sealed)?;
		let text = std::str::from_utf8(&bytes).map_err(|_| CipherError::InvalidUtf8)?;
		Ok(SecretString::new(text.to_string()))
	}
}

impl fmt::Debug for CredentialCipher {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("CredentialCipher")
			.field("key", &"[REDACTED]")
			.finish()
	}
}

/// Generate a random per-install salt, base64-encoded.
pub fn generate_salt() -> String {
	let mut salt = [0u8; SALT_SIZE];
	OsRng.fill_bytes(&mut salt);
	BASE64.encode(salt)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn test_cipher() -> CredentialCipher {
		CredentialCipher::new(&[7u8; KEY_SIZE]).unwrap()
	}

	#[test]
	fn test_roundtrip() {
		let cipher = test_cipher();
		let sealed = cipher.seal(b"gho_client_secret").unwrap();
		assert_ne!(sealed, "gho_client_secret");
		assert_eq!(cipher.open(&sealed).unwrap().as_slice(), b"gho_client_secret");
	}

	#[test]
	fn test_empty_passthrough() {
		let cipher = test_cipher();
		assert_eq!(cipher.seal(b"").unwrap(), "");
		assert!(cipher.open("").unwrap().is_empty());
	}

	#[test]
	fn test_fresh_nonce_per_call() {
		let cipher = test_cipher();
		let a = cipher.seal(b"same").unwrap();
		let b = cipher.seal(b"same").unwrap();
		assert_ne!(a, b);
	}

	#[test]
	fn test_key_length_invalid() {
		assert_eq!(
			CredentialCipher::new(&[0u8; 16]).unwrap_err(),
			CipherError::KeyLengthInvalid(16)
		);
	}

	#[test]
	fn test_tampered_ciphertext_fails_with_decryption_error() {
		let cipher = test_cipher();
		let sealed = cipher.seal(b"refresh-token").unwrap();
		let mut raw = BASE64.decode(&sealed).unwrap();
		let last = raw.len() - 1;
		raw[last] ^= 0x01;
		let err = cipher.open(&BASE64.encode(raw)).unwrap_err();
		assert_eq!(err, CipherError::DecryptionFailed);
		assert!(err.is_tampering());
	}

	#[test]
	fn test_wrong_key_fails_with_decryption_error() {
		let sealed = test_cipher().seal(b"token").unwrap();
		let other = CredentialCipher::new(&[9u8; KEY_SIZE]).unwrap();
		assert_eq!(other.open(&sealed).unwrap_err(), CipherError::DecryptionFailed);
	}

	#[test]
	fn test_bad_base64_is_corrupted() {
		let err = test_cipher().open("%%% not base64 %%%").unwrap_err();
		assert_eq!(err, CipherError::CiphertextCorrupted);
		assert!(!err.is_tampering());
	}

	#[test]
	fn test_truncated_is_corrupted() {
		let short = BASE64.encode([1u8; NONCE_SIZE + 4]);
		assert_eq!(
			test_cipher().open(&short).unwrap_err(),
			CipherError::CiphertextCorrupted
		);
	}

	#[test]
	fn test_from_encoded_hex_and_base64() {
		let key = [3u8; KEY_SIZE];
		let from_hex = CredentialCipher::from_encoded(&hex::encode(key)).unwrap();
		let from_b64 = CredentialCipher::from_encoded(&BASE64.encode(key)).unwrap();
		let sealed = from_hex.seal(b"x").unwrap();
		assert_eq!(from_b64.open(&sealed).unwrap().as_slice(), b"x");
	}

	#[test]
	fn test_derive_is_deterministic() {
		let a = CredentialCipher::derive("passphrase", b"install-salt", MIN_PBKDF2_ITERATIONS).unwrap();
		let b = CredentialCipher::derive("passphrase", b"install-salt", MIN_PBKDF2_ITERATIONS).unwrap();
		let sealed = a.seal(b"secret").unwrap();
		assert_eq!(b.open(&sealed).unwrap().as_slice(), b"secret");
	}

	#[test]
	fn test_derive_rejects_low_iterations() {
		let err = CredentialCipher::derive("passphrase", b"install-salt", 1000).unwrap_err();
		assert!(matches!(err, CipherError::KeyDerivation(_)));
	}

	#[test]
	fn test_open_secret_and_debug_redaction() {
		let cipher = test_cipher();
		let sealed = cipher.seal_str("glpat-secret").unwrap();
		let secret = cipher.open_secret(&sealed).unwrap();
		assert_eq!(secret.expose(), "glpat-secret");
		assert!(!format!("{cipher:?}").contains("7"));
	}

	#[test]
	fn test_generate_salt_decodes() {
		let salt = generate_salt();
		assert_eq!(BASE64.decode(salt).unwrap().len(), SALT_SIZE);
	}
}

#[cfg(test)]
mod proptests {
	use super::*;
	use proptest::prelude::*;

	proptest! {
		#[test]
		fn prop_roundtrip(plaintext in proptest::collection::vec(any::<u8>(), 0..2048)) {
			let cipher = CredentialCipher::new(&[42u8; KEY_SIZE]).unwrap();
			let sealed = cipher.seal(&plaintext).unwrap();
			let opened = cipher.open(&sealed).unwrap();
			prop_assert_eq!(opened.as_slice(), plaintext.as_slice());
		}

		#[test]
		fn prop_any_flip_is_rejected(
			plaintext in proptest::collection::vec(any::<u8>(), 1..256),
			idx in any::<usize>(),
			bit in 0u8..8
		) {
			let cipher = CredentialCipher::new(&[42u8; KEY_SIZE]).unwrap();
			let sealed = cipher.seal(&plaintext).unwrap();
			let mut raw = BASE64.decode(&sealed).unwrap();
			let i = idx % raw.len();
			raw[i] ^= 1 << bit;
			let result = cipher.open(&BASE64.encode(raw));
			prop_assert_eq!(result.unwrap_err(), CipherError::DecryptionFailed);
		}
	}
}
