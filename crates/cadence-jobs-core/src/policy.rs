// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Trigger policies: when a registered process runs next.
//!
//! A policy combines an optional periodic interval with an optional retry
//! policy. Either may be absent; a policy with neither describes a one-shot
//! run. Validation happens once, at registration, so the scheduler loop never
//! sees a misconfigured entry.

use crate::error::{JobError, Result};
use std::time::Duration;

/// Delay sequence applied between retry attempts.
#[derive(Debug, Clone, PartialEq)]
pub enum Backoff {
	/// The same delay before every retry.
	Fixed(Duration),
	/// `base * factor^(attempt - 1)`, capped at `max`.
	Exponential {
		base: Duration,
		factor: f64,
		max: Duration,
	},
}

impl Backoff {
	/// Delay before retry number `attempt` (1-based).
	pub fn delay_for(&self, attempt: u32) -> Duration {
		match self {
			Self::Fixed(delay) => *delay,
			Self::Exponential { base, factor, max } => {
				let exp = attempt.saturating_sub(1).min(30);
				let scaled = base.as_secs_f64() * factor.powi(exp as i32);
				let delay = Duration::from_secs_f64(scaled.max(0.0));
				delay.min(*max)
			}
		}
	}
}

/// Bounded retry-after-failure policy.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
	/// Maximum number of retries after the initial attempt. Must be > 0.
	pub max_attempts: u32,
	pub backoff: Backoff,
}

impl RetryPolicy {
	pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
		Self {
			max_attempts,
			backoff: Backoff::Fixed(delay),
		}
	}

	pub fn exponential(max_attempts: u32, base: Duration, factor: f64, max: Duration) -> Self {
		Self {
			max_attempts,
			backoff: Backoff::Exponential { base, factor, max },
		}
	}

	/// Upper bound of the delays this policy can produce.
	fn max_delay(&self) -> Duration {
		match &self.backoff {
			Backoff::Fixed(delay) => *delay,
			Backoff::Exponential { max, .. } => *max,
		}
	}
}

/// When a registered process is triggered.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TriggerPolicy {
	/// Fixed-interval recurring trigger, drift-corrected from scheduled time.
	pub periodic: Option<Duration>,
	/// Re-trigger after a failed attempt, bounded by `max_attempts`.
	pub retry: Option<RetryPolicy>,
}

impl TriggerPolicy {
	/// A single run with no rescheduling.
	pub fn one_shot() -> Self {
		Self::default()
	}

	pub fn periodic(interval: Duration) -> Self {
		Self {
			periodic: Some(interval),
			retry: None,
		}
	}

	pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
		self.retry = Some(retry);
		self
	}

	/// Rejects misconfiguration synchronously, before the entry exists.
	pub fn validate(&self) -> Result<()> {
		if let Some(interval) = self.periodic {
			if interval.is_zero() {
				return Err(JobError::InvalidPolicy(
					"periodic interval must be greater than zero".into(),
				));
			}
		}
		if let Some(retry) = &self.retry {
			if retry.max_attempts == 0 {
				return Err(JobError::InvalidPolicy(
					"retry policy must allow at least one attempt".into(),
				));
			}
			// A retry delay as long as the period would never fire before the
			// next periodic boundary.
			if let Some(interval) = self.periodic {
				if retry.max_delay() >= interval {
					return Err(JobError::InvalidPolicy(format!(
						"retry delay ({:?}) must be shorter than the periodic interval ({:?})",
						retry.max_delay(),
						interval
					)));
				}
			}
		}
		Ok(())
	}
}
