// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

use reqwest::{Client, ClientBuilder};
use std::time::Duration;

/// Connect timeout applied to every client; request timeouts are per caller.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Creates a client builder with the terrace User-Agent and connect timeout.
///
/// # Example
/// ```ignore
/// let client = terrace_common_http::builder()
///     .timeout(Duration::from_secs(30))
///     .build()?;
/// ```
pub fn builder() -> ClientBuilder {
	Client::builder()
		.user_agent(user_agent())
		.connect_timeout(CONNECT_TIMEOUT)
}

/// Creates a client whose every request is bounded by `timeout`.
pub fn new_client_with_timeout(timeout: Duration) -> reqwest::Result<Client> {
	builder().timeout(timeout).build()
}

/// Format: `terrace/{version}`
pub fn user_agent() -> String {
	format!("terrace/{}", env!("CARGO_PKG_VERSION"))
}
