// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Webhook delivery authentication primitives.
//!
//! Two families of SCM webhooks exist: HMAC-signed bodies (GitHub, Azure DevOps,
//! Bitbucket Data Center) and shared-token headers (GitLab). Both checks are
//! constant-time.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Prefix used by GitHub-style signature headers.
pub const SHA256_PREFIX: &str = "sha256=";

/// Compute an HMAC-SHA256 signature for a payload.
///
/// Returns the hex-encoded signature without any prefix.
pub fn compute_hmac_sha256(secret: &[u8], payload: &[u8]) -> String {
	let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC can take key of any size");
	mac.update(payload);
	hex::encode(mac.finalize().into_bytes())
}

/// Verify a raw hex HMAC-SHA256 signature.
pub fn verify_hmac_sha256(secret: &[u8], payload: &[u8], signature: &str) -> bool {
	let Ok(expected) = hex::decode(signature.trim()) else {
		return false;
	};
	let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
		return false;
	};
	mac.update(payload);
	mac.verify_slice(&expected).is_ok()
}

/// Build a `sha256=<hex>` header value.
pub fn sign_prefixed(secret: &[u8], payload: &[u8]) -> String {
	format!("{SHA256_PREFIX}{}", compute_hmac_sha256(secret, payload))
}

/// Verify a signature header that may carry the `sha256=` prefix.
///
/// A header without the prefix is accepted as bare hex.
pub fn verify_prefixed(secret: &[u8], payload: &[u8], header: &str) -> bool {
	let header = header.trim();
	let hex_sig = header.strip_prefix(SHA256_PREFIX).unwrap_or(header);
	verify_hmac_sha256(secret, payload, hex_sig)
}

/// Constant-time comparison for shared-token webhooks.
///
/// An empty expected token never verifies.
pub fn verify_token(expected: &str, presented: &str) -> bool {
	if expected.is_empty() {
		return false;
	}
	expected.as_bytes().ct_eq(presented.as_bytes()).into()
}
