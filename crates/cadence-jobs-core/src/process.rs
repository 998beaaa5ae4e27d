// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The contract a schedulable unit of work must satisfy.

use crate::log::LogSink;
use crate::status::ProcessOutcome;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// How often a parked (paused) process re-checks its control flags.
const PAUSE_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// A unit of schedulable work.
///
/// `run` performs one attempt and reports its outcome; internal failures must
/// be captured and returned as [`ProcessOutcome::Failed`] rather than
/// propagated. `reset` clears accumulated state so the same instance can be
/// reused for the next attempt.
#[async_trait]
pub trait Process: Send + Sync {
	/// Stable identity, compared case-insensitively.
	fn id(&self) -> &str;

	/// Display name.
	fn name(&self) -> &str;

	/// Perform one attempt. Long-running bodies should call
	/// [`ControlSignal::checkpoint`] periodically to honor pause and cancel
	/// requests.
	async fn run(&self, ctx: &ProcessContext) -> ProcessOutcome;

	/// Clear accumulated state before the next attempt. The default is a
	/// no-op for stateless processes.
	fn reset(&self) {}
}

/// Registry key for a process identity: the id, lowercased.
pub fn process_key(id: &str) -> String {
	id.trim().to_lowercase()
}

/// What caused an attempt to be triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
	/// A periodic boundary or the initial schedule start.
	Schedule,
	/// A retry after a failed attempt.
	Retry,
	/// An explicit run-now request.
	RunNow,
}

impl fmt::Display for TriggerSource {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Schedule => f.write_str("schedule"),
			Self::Retry => f.write_str("retry"),
			Self::RunNow => f.write_str("run_now"),
		}
	}
}

/// Returned by [`ControlSignal::checkpoint`] once cancellation was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interrupted;

impl fmt::Display for Interrupted {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("the execution process was cancelled")
	}
}

impl std::error::Error for Interrupted {}

/// Advisory pause/cancel flags shared between the runner and the worker.
///
/// Requests are signals, not preemption: the process observes them
/// cooperatively through [`checkpoint`](Self::checkpoint). A process that
/// never polls is handled by the runner's bounded force-terminate fallback.
#[derive(Clone, Default)]
pub struct ControlSignal {
	pause_requested: Arc<AtomicBool>,
	cancelled: Arc<AtomicBool>,
	paused: Arc<AtomicBool>,
}

impl ControlSignal {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn request_pause(&self) {
		self.pause_requested.store(true, Ordering::SeqCst);
	}

	pub fn request_resume(&self) {
		self.pause_requested.store(false, Ordering::SeqCst);
	}

	pub fn request_cancel(&self) {
		self.cancelled.store(true, Ordering::SeqCst);
	}

	pub fn is_pause_requested(&self) -> bool {
		self.pause_requested.load(Ordering::SeqCst)
	}

	pub fn is_cancelled(&self) -> bool {
		self.cancelled.load(Ordering::SeqCst)
	}

	/// True while the worker is parked inside [`checkpoint`](Self::checkpoint)
	/// honoring a pause request.
	pub fn is_paused(&self) -> bool {
		self.paused.load(Ordering::SeqCst)
	}

	/// Cooperative observation point.
	///
	/// Returns `Err(Interrupted)` once cancellation was requested. While a
	/// pause is requested the call parks until resumed or cancelled.
	pub async fn checkpoint(&self) -> std::result::Result<(), Interrupted> {
		if self.is_cancelled() {
			return Err(Interrupted);
		}
		if self.is_pause_requested() {
			self.paused.store(true, Ordering::SeqCst);
			while self.is_pause_requested() && !self.is_cancelled() {
				tokio::time::sleep(PAUSE_POLL_INTERVAL).await;
			}
			self.paused.store(false, Ordering::SeqCst);
			if self.is_cancelled() {
				return Err(Interrupted);
			}
		}
		Ok(())
	}
}

/// Per-attempt context handed to [`Process::run`].
pub struct ProcessContext {
	/// Unique id of this run attempt.
	pub run_id: Uuid,
	/// 1-based attempt number within the current retry sequence.
	pub attempt: u32,
	pub trigger: TriggerSource,
	pub signal: ControlSignal,
	pub log: Arc<dyn LogSink>,
}
