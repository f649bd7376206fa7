// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Authenticated encryption for credentials at rest.
//!
//! SCM client secrets and OAuth tokens are sealed with AES-256-GCM before they
//! reach a text column. The key is supplied once at startup and shared
//! read-only through an `Arc<CredentialCipher>`.

pub mod cipher;
pub mod error;

pub use cipher::{
	generate_salt, CredentialCipher, KEY_SIZE, MIN_PBKDF2_ITERATIONS, NONCE_SIZE, TAG_SIZE,
};
pub use error::{CipherError, Result};
