// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

mod crypto;
mod database;
mod http;
mod jobs;
mod logging;
mod mirror;
mod publish;
mod scm;
mod storage;

pub use crypto::{CryptoConfig, CryptoConfigLayer, KeySource, DEFAULT_PBKDF2_ITERATIONS};
pub use database::{DatabaseConfig, DatabaseConfigLayer};
pub use http::{HttpConfig, HttpConfigLayer};
pub use jobs::{JobsConfig, JobsConfigLayer};
pub use logging::{LogFormat, LoggingConfig, LoggingConfigLayer};
pub use mirror::{MirrorSyncConfig, MirrorSyncConfigLayer};
pub use publish::{PublishConfig, PublishConfigLayer};
pub use scm::{ScmConfig, ScmConfigLayer};
pub use storage::{StorageBackendKind, StorageConfig, StorageConfigLayer};
