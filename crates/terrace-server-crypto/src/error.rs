// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

/// Errors from sealing or opening credentials.
///
/// Messages never include key material, plaintext or ciphertext.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CipherError {
	#[error("invalid key length: expected 32 bytes, got {0}")]
	KeyLengthInvalid(usize),

	#[error("key derivation rejected: {0}")]
	KeyDerivation(String),

	#[error("ciphertext is corrupted or truncated")]
	CiphertextCorrupted,

	#[error("decryption failed: authentication tag mismatch")]
	DecryptionFailed,

	#[error("encryption failed")]
	EncryptionFailed,

	#[error("decrypted value is not valid UTF-8")]
	InvalidUtf8,
}

impl CipherError {
	/// True when the stored value was altered or sealed under a different key.
	pub fn is_tampering(&self) -> bool {
		matches!(self, CipherError::DecryptionFailed)
	}
}

pub type Result<T> = std::result::Result<T, CipherError>;
