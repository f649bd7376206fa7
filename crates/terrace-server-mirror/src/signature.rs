// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! OpenPGP verification of upstream `SHA256SUMS` documents.

use pgp::{Deserializable, SignedPublicKey, StandaloneSignature};
use tracing::debug;

use crate::error::{MirrorError, Result};

/// Verify a detached signature (binary or ASCII-armored) over `data` against
/// any of the advertised armored public keys, primary key or subkeys.
pub fn verify_detached(armored_keys: &[String], data: &[u8], signature: &[u8]) -> Result<()> {
	if armored_keys.is_empty() {
		return Err(MirrorError::SignatureInvalid("upstream advertised no signing keys".into()));
	}
	let signature = parse_signature(signature)?;

	let mut parsed_any = false;
	for armor in armored_keys {
		let key = match SignedPublicKey::from_string(armor) {
			Ok((key, _headers)) => key,
			Err(e) => {
				debug!(error = %e, "skipping unparseable signing key");
				continue;
			}
		};
		parsed_any = true;

		if signature.verify(&key, data).is_ok() {
			return Ok(());
		}
		if key
			.public_subkeys
			.iter()
			.any(|subkey| signature.verify(subkey, data).is_ok())
		{
			return Ok(());
		}
	}

	if parsed_any {
		Err(MirrorError::SignatureInvalid(
			"signature does not match any advertised key".into(),
		))
	} else {
		Err(MirrorError::SignatureInvalid("no advertised signing key could be parsed".into()))
	}
}

fn parse_signature(raw: &[u8]) -> Result<StandaloneSignature> {
	let armored = raw
		.iter()
		.position(|b| !b.is_ascii_whitespace())
		.is_some_and(|start| raw[start..].starts_with(b"-----BEGIN"));

	let parsed = if armored {
		let text = std::str::from_utf8(raw)
			.map_err(|_| MirrorError::SignatureInvalid("armored signature is not UTF-8".into()))?;
		StandaloneSignature::from_string(text).map(|(sig, _headers)| sig)
	} else {
		StandaloneSignature::from_bytes(raw)
	};
	parsed.map_err(|e| MirrorError::SignatureInvalid(format!("unreadable signature: {e}")))
}

#[cfg(test)]
mod tests {
	use super::*;

	const KEY: &str = include_str!("../tests/fixtures/signing_key.asc");
	const OTHER_KEY: &str = include_str!("../tests/fixtures/other_key.asc");
	const SUMS: &[u8] = include_bytes!("../tests/fixtures/widget_1.0.0_SHA256SUMS");
	const SIG: &[u8] = include_bytes!("../tests/fixtures/widget_1.0.0_SHA256SUMS.sig");

	#[test]
	fn test_valid_signature() {
		verify_detached(&[KEY.to_string()], SUMS, SIG).unwrap();
	}

	#[test]
	fn test_any_advertised_key_may_sign() {
		verify_detached(&[OTHER_KEY.to_string(), KEY.to_string()], SUMS, SIG).unwrap();
	}

	#[test]
	fn test_wrong_key_rejected() {
		let err = verify_detached(&[OTHER_KEY.to_string()], SUMS, SIG).unwrap_err();
		assert!(err.is_verification_failure());
	}

	#[test]
	fn test_tampered_document_rejected() {
		let mut tampered = SUMS.to_vec();
		tampered[0] = if tampered[0] == b'0' { b'1' } else { b'0' };
		assert!(matches!(
			verify_detached(&[KEY.to_string()], &tampered, SIG),
			Err(MirrorError::SignatureInvalid(_))
		));
	}

	#[test]
	fn test_missing_or_garbage_inputs() {
		assert!(verify_detached(&[], SUMS, SIG).is_err());
		assert!(verify_detached(&["not a key".to_string()], SUMS, SIG).is_err());
		assert!(verify_detached(&[KEY.to_string()], SUMS, b"garbage").is_err());
	}
}
