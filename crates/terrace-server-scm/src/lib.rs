// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Source-control connectors for terrace.
//!
//! Each supported provider implements [`ScmConnector`]. Connectors are built
//! from stored provider configuration through a [`ConnectorRegistry`].

pub mod azure_devops;
pub mod bitbucket_dc;
pub mod connector;
pub mod error;
pub mod github;
pub mod gitlab;
mod http;
pub mod registry;
pub mod testing;
pub mod types;

pub use azure_devops::AzureDevOpsConnector;
pub use bitbucket_dc::BitbucketDcConnector;
pub use connector::{signature_header, ScmConnector};
pub use error::{Result, ScmError};
pub use github::GitHubConnector;
pub use gitlab::GitLabConnector;
pub use registry::{factory, ConnectorDefaults, ConnectorFactory, ConnectorRegistry};
pub use types::{
	AccessToken, ArchiveFormat, ArchiveStream, Branch, Commit, ConnectorSettings, IncomingHook, Page, Pagination,
	Repository, Tag, WebhookConfig, WebhookInfo,
};
