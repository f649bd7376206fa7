// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::error::{JobError, Result};
use crate::types::TriggerSource;

pub use tokio_util::sync::CancellationToken;

pub struct JobContext {
	pub run_id: String,
	pub triggered_by: TriggerSource,
	pub cancellation_token: CancellationToken,
}

impl JobContext {
	/// Early return for jobs that check for cancellation between work items.
	pub fn check_cancelled(&self) -> Result<()> {
		if self.cancellation_token.is_cancelled() {
			Err(JobError::Cancelled)
		} else {
			Ok(())
		}
	}
}
