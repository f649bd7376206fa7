// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Redacting wrapper for credentials handled by the ingestion pipeline.
//!
//! OAuth access and refresh tokens, decrypted client secrets and per-link
//! webhook secrets all travel through the server as [`Secret<T>`]. The
//! wrapper prints `[REDACTED]` for both `Debug` and `Display`, serializes as
//! `"[REDACTED]"`, and zeroizes its contents on drop. Reading the value
//! requires an explicit [`Secret::expose`] call.
//!
//! ```
//! use terrace_common_secret::SecretString;
//!
//! let token = SecretString::new("gho_abc123".to_string());
//! assert_eq!(format!("{token}"), "[REDACTED]");
//! assert_eq!(token.expose(), "gho_abc123");
//! ```

use std::fmt;
use zeroize::Zeroize;

/// Placeholder printed wherever a secret would otherwise appear.
pub const REDACTED: &str = "[REDACTED]";

#[derive(Zeroize)]
#[zeroize(drop)]
pub struct Secret<T>
where
	T: Zeroize,
{
	inner: T,
}

pub type SecretString = Secret<String>;

impl<T> Secret<T>
where
	T: Zeroize,
{
	pub fn new(inner: T) -> Self {
		Self { inner }
	}

	/// Borrow the wrapped value. Call sites that need the plaintext opt in here.
	pub fn expose(&self) -> &T {
		&self.inner
	}

	/// Clone the wrapped value out; the original is still zeroized on drop.
	pub fn into_inner(self) -> T
	where
		T: Clone,
	{
		self.inner.clone()
	}
}

impl SecretString {
	pub fn is_empty(&self) -> bool {
		self.inner.is_empty()
	}
}

impl From<String> for SecretString {
	fn from(value: String) -> Self {
		Self::new(value)
	}
}

impl From<&str> for SecretString {
	fn from(value: &str) -> Self {
		Self::new(value.to_string())
	}
}

impl<T> Clone for Secret<T>
where
	T: Zeroize + Clone,
{
	fn clone(&self) -> Self {
		Self::new(self.inner.clone())
	}
}

impl<T> fmt::Debug for Secret<T>
where
	T: Zeroize,
{
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_tuple("Secret").field(&REDACTED).finish()
	}
}

impl<T> fmt::Display for Secret<T>
where
	T: Zeroize,
{
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(REDACTED)
	}
}

impl<T> PartialEq for Secret<T>
where
	T: Zeroize + PartialEq,
{
	fn eq(&self, other: &Self) -> bool {
		self.inner == other.inner
	}
}

impl<T> Eq for Secret<T> where T: Zeroize + Eq {}

#[cfg(feature = "serde")]
mod serde_impl {
	use super::{Secret, REDACTED};
	use serde::{Deserialize, Deserializer, Serialize, Serializer};
	use zeroize::Zeroize;

	impl<T> Serialize for Secret<T>
	where
		T: Serialize + Zeroize,
	{
		fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
		where
			S: Serializer,
		{
			serializer.serialize_str(REDACTED)
		}
	}

	impl<'de, T> Deserialize<'de> for Secret<T>
	where
		T: Deserialize<'de> + Zeroize,
	{
		fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
		where
			D: Deserializer<'de>,
		{
			T::deserialize(deserializer).map(Secret::new)
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_debug_and_display_hide_token() {
		let token = SecretString::from("glpat-0123456789");
		assert_eq!(format!("{token}"), REDACTED);
		let debug = format!("{token:?}");
		assert!(debug.contains(REDACTED));
		assert!(!debug.contains("glpat"));
	}

	#[test]
	fn test_expose_and_into_inner() {
		let token = SecretString::from("refresh-me");
		assert_eq!(token.expose(), "refresh-me");
		assert_eq!(token.clone().into_inner(), "refresh-me");
	}

	#[test]
	fn test_is_empty() {
		assert!(SecretString::from("").is_empty());
		assert!(!SecretString::from("x").is_empty());
	}

	#[test]
	fn test_optional_secret_debug() {
		let absent: Option<SecretString> = None;
		assert_eq!(format!("{absent:?}"), "None");
		let present = Some(SecretString::from("whsec_live"));
		assert!(!format!("{present:?}").contains("whsec_live"));
	}

	#[cfg(feature = "serde")]
	#[test]
	fn test_serialize_redacts_and_deserialize_reads() {
		let json = serde_json::to_string(&SecretString::from("client-secret")).unwrap();
		assert_eq!(json, format!("\"{REDACTED}\""));

		let parsed: SecretString = serde_json::from_str("\"client-secret\"").unwrap();
		assert_eq!(parsed.expose(), "client-secret");
	}
}
