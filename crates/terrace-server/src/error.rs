// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use thiserror::Error;

/// Failures while assembling server state at startup.
#[derive(Debug, Error)]
pub enum ServerError {
	#[error("configuration error: {0}")]
	Config(#[from] terrace_server_config::ConfigError),

	#[error("credential cipher error: {0}")]
	Cipher(#[from] terrace_server_crypto::CipherError),

	#[error("database error: {0}")]
	Database(#[from] terrace_server_db::DbError),

	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),
}
