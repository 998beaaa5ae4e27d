// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Execution of a single run attempt on a dedicated worker task.
//!
//! A [`ProcessRunner`] belongs to one schedule entry and runs at most one
//! attempt at a time. The worker never touches schedule state: it reports
//! completion through an mpsc handoff that the scheduler loop consumes.
//! Cancellation is two-tier: a cooperative signal first, then a bounded
//! grace period after which the worker task is aborted and the attempt is
//! still reported as canceled.

use crate::entry::{EntryId, RunRecord};
use cadence_jobs_core::{
	ControlSignal, ExecState, LogSink, Process, ProcessContext, ProcessOutcome, TriggerSource,
};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

/// Completion handoff from a worker to the scheduler loop.
#[derive(Debug)]
pub(crate) struct RunFinished {
	pub entry_id: EntryId,
	pub run_id: Uuid,
	pub outcome: ProcessOutcome,
	pub record: RunRecord,
}

#[derive(Clone, Copy)]
struct AttemptMeta {
	run_id: Uuid,
	attempt: u32,
	trigger: TriggerSource,
	scheduled_at: DateTime<Utc>,
	started_at: DateTime<Utc>,
}

pub(crate) struct ProcessRunner {
	process: Arc<dyn Process>,
	entry_id: EntryId,
	grace: Duration,
	state_tx: watch::Sender<ExecState>,
	signal: ControlSignal,
	handle: Option<JoinHandle<()>>,
	current: Option<AttemptMeta>,
}

impl ProcessRunner {
	pub fn new(process: Arc<dyn Process>, entry_id: EntryId, grace: Duration) -> Self {
		let (state_tx, _) = watch::channel(ExecState::NotStarted);
		Self {
			process,
			entry_id,
			grace,
			state_tx,
			signal: ControlSignal::new(),
			handle: None,
			current: None,
		}
	}

	/// Current state of the latest attempt, including the advisory `Paused`
	/// view while the worker is parked on a pause request.
	pub fn exec_state(&self) -> ExecState {
		let state = *self.state_tx.borrow();
		if state == ExecState::Executing && self.signal.is_paused() {
			ExecState::Paused
		} else {
			state
		}
	}

	pub fn is_live(&self) -> bool {
		self.state_tx.borrow().is_live()
	}

	pub fn current_run_id(&self) -> Option<Uuid> {
		self.current.map(|meta| meta.run_id)
	}

	/// Watch the raw attempt state. Terminal states always appear here.
	pub fn subscribe(&self) -> watch::Receiver<ExecState> {
		self.state_tx.subscribe()
	}

	/// Starts a new attempt. A call while an attempt is live is a no-op that
	/// returns the current state without spawning a second worker.
	pub fn start(
		&mut self,
		attempt: u32,
		trigger: TriggerSource,
		scheduled_at: DateTime<Utc>,
		sink: Arc<dyn LogSink>,
		finished_tx: mpsc::UnboundedSender<RunFinished>,
	) -> ExecState {
		if self.is_live() {
			debug!(
				entry_id = %self.entry_id,
				state = %self.exec_state(),
				"start ignored, attempt already live"
			);
			return self.exec_state();
		}

		let meta = AttemptMeta {
			run_id: Uuid::new_v4(),
			attempt,
			trigger,
			scheduled_at,
			started_at: Utc::now(),
		};
		self.signal = ControlSignal::new();
		self.current = Some(meta);
		self.state_tx.send_replace(ExecState::Starting);

		let process = Arc::clone(&self.process);
		let entry_id = self.entry_id.clone();
		let state_tx = self.state_tx.clone();
		let signal = self.signal.clone();

		self.handle = Some(tokio::spawn(async move {
			process.reset();
			let ctx = ProcessContext {
				run_id: meta.run_id,
				attempt: meta.attempt,
				trigger: meta.trigger,
				signal: signal.clone(),
				log: sink,
			};
			state_tx.send_replace(ExecState::Executing);

			let mut error = None;
			let reported = match AssertUnwindSafe(process.run(&ctx)).catch_unwind().await {
				Ok(outcome) => outcome,
				Err(_) => {
					warn!(entry_id = %entry_id, run_id = %meta.run_id, "process panicked during run");
					error = Some("process panicked during run".to_string());
					ProcessOutcome::Failed
				}
			};

			let outcome = if signal.is_cancelled() {
				ProcessOutcome::Stopped
			} else if reported.is_done() {
				reported
			} else {
				warn!(
					entry_id = %entry_id,
					run_id = %meta.run_id,
					outcome = %reported,
					"process returned a non-terminal outcome, treating as failed"
				);
				error = Some(format!("non-terminal outcome reported: {reported}"));
				ProcessOutcome::Failed
			};

			let final_state = match outcome {
				ProcessOutcome::Completed => ExecState::Completed,
				ProcessOutcome::Stopped => ExecState::Canceled,
				_ => ExecState::Failed,
			};
			state_tx.send_replace(final_state);

			let completed_at = Utc::now();
			let record = RunRecord {
				run_id: meta.run_id,
				attempt: meta.attempt,
				trigger: meta.trigger,
				scheduled_at: meta.scheduled_at,
				started_at: meta.started_at,
				completed_at,
				duration_ms: (completed_at - meta.started_at).num_milliseconds(),
				outcome,
				error,
			};
			let _ = finished_tx.send(RunFinished {
				entry_id,
				run_id: meta.run_id,
				outcome,
				record,
			});
		}));

		ExecState::Starting
	}

	/// Requests a pause. Advisory: the state moves to `Paused` only once the
	/// process parks at a checkpoint.
	pub fn pause(&self) -> bool {
		if self.exec_state() != ExecState::Executing {
			return false;
		}
		self.signal.request_pause();
		true
	}

	/// Clears a pause request, unparking the worker at its next poll.
	pub fn resume(&self) -> bool {
		if !self.is_live() || !self.signal.is_pause_requested() {
			return false;
		}
		self.signal.request_resume();
		true
	}

	/// Begins cooperative cancellation and arms the grace-period watchdog.
	/// If the worker has not reached a terminal state within the grace
	/// period, the task is aborted and the attempt is reported as canceled.
	pub fn cancel(&mut self, finished_tx: mpsc::UnboundedSender<RunFinished>) -> bool {
		let Some(meta) = self.current else {
			return false;
		};
		if !self.is_live() {
			return false;
		}

		self.signal.request_cancel();
		self.state_tx.send_replace(ExecState::Stopping);

		let Some(handle) = self.handle.as_ref() else {
			return false;
		};
		let abort = handle.abort_handle();
		let entry_id = self.entry_id.clone();
		let state_tx = self.state_tx.clone();
		let mut state_rx = self.state_tx.subscribe();
		let grace = self.grace;

		tokio::spawn(async move {
			let observed =
				tokio::time::timeout(grace, state_rx.wait_for(|state| state.is_terminal())).await;
			if observed.is_ok() {
				return;
			}

			warn!(
				entry_id = %entry_id,
				run_id = %meta.run_id,
				grace_ms = grace.as_millis() as u64,
				"process did not observe cancellation within the grace period, aborting worker"
			);
			abort.abort();
			state_tx.send_replace(ExecState::Canceled);

			let completed_at = Utc::now();
			let record = RunRecord {
				run_id: meta.run_id,
				attempt: meta.attempt,
				trigger: meta.trigger,
				scheduled_at: meta.scheduled_at,
				started_at: meta.started_at,
				completed_at,
				duration_ms: (completed_at - meta.started_at).num_milliseconds(),
				outcome: ProcessOutcome::Stopped,
				error: Some("worker aborted after cancellation grace period".to_string()),
			};
			let _ = finished_tx.send(RunFinished {
				entry_id,
				run_id: meta.run_id,
				outcome: ProcessOutcome::Stopped,
				record,
			});
		});

		true
	}

	/// Marks the attempt identified by `run_id` as fully reported. Returns
	/// false for a stale or unknown run id (for instance a cooperative
	/// completion racing the watchdog's forced report).
	pub fn finish_attempt(&mut self, run_id: Uuid) -> bool {
		if self.current_run_id() != Some(run_id) {
			return false;
		}
		self.current = None;
		self.handle = None;
		true
	}

	/// Hard teardown at scheduler shutdown.
	pub fn abort(&mut self) {
		if let Some(handle) = self.handle.take() {
			handle.abort();
		}
		if self.is_live() {
			self.state_tx.send_replace(ExecState::Canceled);
		}
		self.current = None;
	}
}
