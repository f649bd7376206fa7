// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use chrono::{DateTime, Duration, Utc};
use terrace_server_db::{ApprovalStatus, MirrorApprovalRequest, MirrorConfig, MirrorPolicy, PolicyType};
use tracing::warn;

use crate::filter::glob;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
	Allowed,
	RequiresApproval,
	/// Carries the name of the denying policy.
	Denied(String),
}

/// First active policy by descending priority whose patterns all match wins.
/// A deny terminates; with no match the mirror's own `requires_approval`
/// decides.
pub fn evaluate(policies: &[MirrorPolicy], mirror: &MirrorConfig, namespace: &str, provider: &str) -> PolicyDecision {
	let mut ordered: Vec<&MirrorPolicy> = policies.iter().filter(|p| p.is_active).collect();
	ordered.sort_by(|a, b| b.priority.cmp(&a.priority));

	for policy in ordered {
		if !pattern_matches(policy, policy.upstream_pattern.as_deref(), &mirror.upstream_url)
			|| !pattern_matches(policy, policy.namespace_pattern.as_deref(), namespace)
			|| !pattern_matches(policy, policy.provider_pattern.as_deref(), provider)
		{
			continue;
		}
		return match policy.policy_type {
			PolicyType::Deny => PolicyDecision::Denied(policy.name.clone()),
			PolicyType::Allow if policy.requires_approval => PolicyDecision::RequiresApproval,
			PolicyType::Allow => PolicyDecision::Allowed,
		};
	}

	if mirror.requires_approval {
		PolicyDecision::RequiresApproval
	} else {
		PolicyDecision::Allowed
	}
}

fn pattern_matches(policy: &MirrorPolicy, pattern: Option<&str>, value: &str) -> bool {
	let Some(pattern) = pattern.map(str::trim).filter(|p| !p.is_empty()) else {
		return true;
	};
	match glob(pattern) {
		Ok(glob) => glob.compile_matcher().is_match(value),
		Err(e) => {
			warn!(policy_id = %policy.id, pattern, error = %e, "ignoring policy with invalid pattern");
			false
		}
	}
}

/// Whether an approval request lets a sync proceed at `now`.
pub fn approval_satisfies(request: &MirrorApprovalRequest, now: DateTime<Utc>, ttl: Duration) -> bool {
	if request.status != ApprovalStatus::Approved {
		return false;
	}
	if request.expires_at.is_some_and(|expires| expires <= now) {
		return false;
	}
	let approved_at = request.reviewed_at.unwrap_or(request.created_at);
	approved_at + ttl > now
}

#[cfg(test)]
mod tests {
	use super::*;
	use terrace_server_db::testing::make_mirror_config;
	use uuid::Uuid;

	fn policy(name: &str, kind: PolicyType, ns: &str, provider: &str, priority: i64, approval: bool) -> MirrorPolicy {
		MirrorPolicy {
			id: Uuid::new_v4(),
			organization_id: None,
			name: name.to_string(),
			policy_type: kind,
			upstream_pattern: None,
			namespace_pattern: Some(ns.to_string()),
			provider_pattern: Some(provider.to_string()),
			priority,
			is_active: true,
			requires_approval: approval,
			created_at: Utc::now(),
		}
	}

	fn approval(status: ApprovalStatus, reviewed_days_ago: i64) -> MirrorApprovalRequest {
		let now = Utc::now();
		MirrorApprovalRequest {
			id: Uuid::new_v4(),
			mirror_config_id: Uuid::new_v4(),
			organization_id: None,
			namespace: "acme".into(),
			provider_name: Some("widget".into()),
			requested_by: None,
			reason: None,
			status,
			reviewed_by: None,
			reviewed_at: Some(now - Duration::days(reviewed_days_ago)),
			expires_at: None,
			created_at: now - Duration::days(reviewed_days_ago + 1),
		}
	}

	#[test]
	fn test_priority_precedence() {
		let mirror = make_mirror_config("public");
		let policies = vec![
			policy("everything", PolicyType::Allow, "*", "*", 0, true),
			policy("hashicorp", PolicyType::Allow, "hashicorp", "*", 100, false),
		];

		assert_eq!(evaluate(&policies, &mirror, "hashicorp", "aws"), PolicyDecision::Allowed);
		assert_eq!(
			evaluate(&policies, &mirror, "acme", "widget"),
			PolicyDecision::RequiresApproval
		);
	}

	#[test]
	fn test_deny_terminates() {
		let mirror = make_mirror_config("public");
		let policies = vec![
			policy("block-acme", PolicyType::Deny, "acme", "*", 50, false),
			policy("everything", PolicyType::Allow, "*", "*", 0, false),
		];
		assert_eq!(
			evaluate(&policies, &mirror, "acme", "widget"),
			PolicyDecision::Denied("block-acme".into())
		);
		assert_eq!(evaluate(&policies, &mirror, "hashicorp", "aws"), PolicyDecision::Allowed);
	}

	#[test]
	fn test_inactive_and_unmatched_fall_back_to_mirror() {
		let mut mirror = make_mirror_config("public");
		let mut inactive = policy("block", PolicyType::Deny, "*", "*", 10, false);
		inactive.is_active = false;
		let mut elsewhere = policy("other-upstream", PolicyType::Deny, "*", "*", 5, false);
		elsewhere.upstream_pattern = Some("https://other.example*".into());
		let policies = vec![inactive, elsewhere];

		assert_eq!(evaluate(&policies, &mirror, "acme", "widget"), PolicyDecision::Allowed);
		mirror.requires_approval = true;
		assert_eq!(
			evaluate(&policies, &mirror, "acme", "widget"),
			PolicyDecision::RequiresApproval
		);
	}

	#[test]
	fn test_approval_satisfies() {
		let now = Utc::now();
		let ttl = Duration::days(30);

		assert!(approval_satisfies(&approval(ApprovalStatus::Approved, 1), now, ttl));
		assert!(!approval_satisfies(&approval(ApprovalStatus::Pending, 1), now, ttl));
		assert!(!approval_satisfies(&approval(ApprovalStatus::Rejected, 1), now, ttl));
		assert!(!approval_satisfies(&approval(ApprovalStatus::Approved, 31), now, ttl));

		let mut expired = approval(ApprovalStatus::Approved, 1);
		expired.expires_at = Some(now - Duration::minutes(1));
		assert!(!approval_satisfies(&expired, now, ttl));
	}
}
