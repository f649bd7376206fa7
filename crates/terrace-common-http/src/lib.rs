// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Shared HTTP utilities for terrace.
//!
//! Every outbound call (SCM APIs, OAuth endpoints, upstream registries) goes
//! through a client built here so the User-Agent and timeouts are consistent.

mod client;
mod response;

pub use client::{builder, new_client_with_timeout, user_agent};
pub use response::{error_message, MAX_ERROR_BODY_LEN};
