// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The scheduling state machine.
//!
//! All schedule state lives inside a single control-loop task that owns the
//! entry table. The public [`Scheduler`] handle talks to the loop over a
//! command channel with oneshot replies, and workers report back over an
//! unbounded completion channel, so no entry is ever touched from two tasks
//! at once.
//!
//! Trigger precedence after an attempt finishes: a manual stop always wins,
//! then a queued run-now request, then retry, then the periodic boundary.
//! Periodic rescheduling is drift-corrected: the next boundary is computed
//! from the previously scheduled time, not from when the run happened to
//! finish.

use crate::entry::{EntryId, RunRecord, StatusSnapshot};
use crate::events::{EventBroadcaster, ScheduleEvent, ScheduleListener, SubscriptionId};
use crate::runner::{ProcessRunner, RunFinished};
use cadence_jobs_core::{
	ExecState, JobError, LogSink, Process, ProcessOutcome, Result, ScheduleStatus, TracingSink,
	TriggerPolicy, TriggerSource,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

const COMMAND_CHANNEL_CAPACITY: usize = 64;

/// Scheduler-wide settings.
#[derive(Clone)]
pub struct SchedulerConfig {
	/// How long a cancelled attempt gets to observe the signal before its
	/// worker task is aborted.
	pub cancel_grace: Duration,
	/// Sink handed to every process for per-run logging.
	pub log: Arc<dyn LogSink>,
}

impl Default for SchedulerConfig {
	fn default() -> Self {
		Self {
			cancel_grace: Duration::from_secs(5),
			log: Arc::new(TracingSink),
		}
	}
}

enum Command {
	Register {
		process: Arc<dyn Process>,
		policy: TriggerPolicy,
		sink: Option<Arc<dyn LogSink>>,
		reply: oneshot::Sender<Result<EntryId>>,
	},
	Unregister {
		id: EntryId,
		reply: oneshot::Sender<Result<()>>,
	},
	RunNow {
		id: EntryId,
		reply: oneshot::Sender<Result<()>>,
	},
	Pause {
		id: EntryId,
		reply: oneshot::Sender<Result<()>>,
	},
	Resume {
		id: EntryId,
		reply: oneshot::Sender<Result<()>>,
	},
	Cancel {
		id: EntryId,
		reply: oneshot::Sender<Result<()>>,
	},
	Reset {
		id: EntryId,
		reply: oneshot::Sender<Result<()>>,
	},
	Status {
		id: EntryId,
		reply: oneshot::Sender<Result<StatusSnapshot>>,
	},
	List {
		reply: oneshot::Sender<Result<Vec<(EntryId, StatusSnapshot)>>>,
	},
	WatchExec {
		id: EntryId,
		reply: oneshot::Sender<Result<watch::Receiver<ExecState>>>,
	},
	Shutdown {
		reply: oneshot::Sender<Result<()>>,
	},
}

/// Handle to a running scheduler. Cheap to clone; the control loop stops once
/// shutdown is requested or every handle is dropped.
#[derive(Clone)]
pub struct Scheduler {
	cmd_tx: mpsc::Sender<Command>,
	events: Arc<EventBroadcaster>,
}

impl Scheduler {
	/// Spawns the control loop on the current tokio runtime.
	pub fn start(config: SchedulerConfig) -> Self {
		let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
		let (finished_tx, finished_rx) = mpsc::unbounded_channel();
		let events = Arc::new(EventBroadcaster::new());

		let core = SchedulerCore {
			entries: HashMap::new(),
			events: Arc::clone(&events),
			config,
			finished_tx,
		};
		tokio::spawn(run_loop(core, cmd_rx, finished_rx));

		Self { cmd_tx, events }
	}

	/// Registers a process and starts its schedule. A one-shot entry fires
	/// immediately; a periodic entry fires after its first interval. A
	/// `Started` event is emitted for the new entry.
	pub async fn register(
		&self,
		process: Arc<dyn Process>,
		policy: TriggerPolicy,
	) -> Result<EntryId> {
		self.send(|reply| Command::Register { process, policy, sink: None, reply }).await
	}

	/// Like [`register`](Self::register) but with a dedicated log sink for
	/// this process instead of the scheduler-wide one.
	pub async fn register_with_sink(
		&self,
		process: Arc<dyn Process>,
		policy: TriggerPolicy,
		sink: Arc<dyn LogSink>,
	) -> Result<EntryId> {
		self.send(|reply| Command::Register { process, policy, sink: Some(sink), reply }).await
	}

	/// Removes an entry. A live attempt is cancelled first and the entry is
	/// removed once it reports; the reply does not wait for that.
	pub async fn unregister(&self, id: &str) -> Result<()> {
		let id = EntryId::from_process_id(id);
		self.send(|reply| Command::Unregister { id, reply }).await
	}

	/// Triggers an immediate run without disturbing the periodic schedule.
	/// If an attempt is live the request is queued and honored once after it
	/// finishes. On a finished schedule this restarts triggering.
	pub async fn run_now(&self, id: &str) -> Result<()> {
		let id = EntryId::from_process_id(id);
		self.send(|reply| Command::RunNow { id, reply }).await
	}

	/// Requests an advisory pause of the live attempt.
	pub async fn pause(&self, id: &str) -> Result<()> {
		let id = EntryId::from_process_id(id);
		self.send(|reply| Command::Pause { id, reply }).await
	}

	/// Clears a pause request.
	pub async fn resume(&self, id: &str) -> Result<()> {
		let id = EntryId::from_process_id(id);
		self.send(|reply| Command::Resume { id, reply }).await
	}

	/// Stops the schedule. A live attempt is cancelled cooperatively with the
	/// configured grace period; a pending trigger is discarded.
	pub async fn cancel(&self, id: &str) -> Result<()> {
		let id = EntryId::from_process_id(id);
		self.send(|reply| Command::Cancel { id, reply }).await
	}

	/// Returns a finished schedule to its pre-start state, clearing the retry
	/// counter and any pending trigger. Fails while the schedule is still
	/// active.
	pub async fn reset(&self, id: &str) -> Result<()> {
		let id = EntryId::from_process_id(id);
		self.send(|reply| Command::Reset { id, reply }).await
	}

	pub async fn status(&self, id: &str) -> Result<StatusSnapshot> {
		let id = EntryId::from_process_id(id);
		self.send(|reply| Command::Status { id, reply }).await
	}

	pub async fn list(&self) -> Result<Vec<(EntryId, StatusSnapshot)>> {
		self.send(|reply| Command::List { reply }).await
	}

	/// Watches the raw execution state of an entry's attempts.
	pub async fn watch_exec(&self, id: &str) -> Result<watch::Receiver<ExecState>> {
		let id = EntryId::from_process_id(id);
		self.send(|reply| Command::WatchExec { id, reply }).await
	}

	/// Waits until the entry's current attempt reaches a terminal state. On
	/// timeout the current, possibly non-terminal, state is returned.
	pub async fn wait_terminal(&self, id: &str, timeout: Duration) -> Result<ExecState> {
		let mut rx = self.watch_exec(id).await?;
		if let Ok(result) =
			tokio::time::timeout(timeout, rx.wait_for(|state| state.is_terminal())).await
		{
			return result.map(|state| *state).map_err(|_| JobError::SchedulerStopped);
		}
		let state = *rx.borrow();
		Ok(state)
	}

	/// Registers a schedule-event listener. Only a weak reference is kept.
	pub fn subscribe(&self, listener: &Arc<dyn ScheduleListener>) -> SubscriptionId {
		self.events.subscribe(listener)
	}

	pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
		self.events.unsubscribe(id)
	}

	/// Stops the control loop and aborts every live attempt.
	pub async fn shutdown(&self) -> Result<()> {
		self.send(|reply| Command::Shutdown { reply }).await
	}

	async fn send<T>(
		&self,
		build: impl FnOnce(oneshot::Sender<Result<T>>) -> Command,
	) -> Result<T> {
		let (tx, rx) = oneshot::channel();
		self.cmd_tx
			.send(build(tx))
			.await
			.map_err(|_| JobError::SchedulerStopped)?;
		rx.await.map_err(|_| JobError::SchedulerStopped)?
	}
}

struct ScheduleEntry {
	id: EntryId,
	process: Arc<dyn Process>,
	policy: TriggerPolicy,
	log: Arc<dyn LogSink>,
	runner: ProcessRunner,
	status: ScheduleStatus,
	next_run_at: Option<DateTime<Utc>>,
	next_trigger: TriggerSource,
	/// The scheduled time of the last periodic fire; the next boundary is
	/// `anchor + interval` regardless of how long the run took.
	periodic_anchor: Option<DateTime<Utc>>,
	/// Retries scheduled since the last clean completion.
	attempt_count: u32,
	run_count: u64,
	last_run: Option<RunRecord>,
	run_now_queued: bool,
	/// Unregistered while live; removed once the attempt reports.
	draining: bool,
}

impl ScheduleEntry {
	fn snapshot(&self) -> StatusSnapshot {
		StatusSnapshot {
			schedule_status: self.status,
			exec_state: self.runner.exec_state(),
			next_run_at: self.next_run_at,
			attempt_count: self.attempt_count,
			run_count: self.run_count,
			last_run: self.last_run.clone(),
		}
	}
}

/// What the scheduler does with an entry after an attempt reports.
#[derive(Debug, Clone, PartialEq)]
enum NextAction {
	/// Honor a queued run-now request immediately.
	RunNow,
	/// Schedule retry number `attempt` for `at`.
	Retry { at: DateTime<Utc>, attempt: u32 },
	/// Schedule the next periodic boundary.
	Periodic { at: DateTime<Utc> },
	/// The schedule is done; no further automatic triggering.
	Finish(ScheduleStatus),
}

fn to_chrono(duration: Duration) -> chrono::Duration {
	chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}

/// Pure rescheduling decision, separated from entry bookkeeping so the
/// precedence and drift rules are testable without a runtime.
fn decide_next(
	policy: &TriggerPolicy,
	outcome: ProcessOutcome,
	run_now_queued: bool,
	attempt_count: u32,
	periodic_anchor: Option<DateTime<Utc>>,
	now: DateTime<Utc>,
) -> NextAction {
	if outcome == ProcessOutcome::Stopped {
		return NextAction::Finish(ScheduleStatus::Stopped);
	}
	if run_now_queued {
		return NextAction::RunNow;
	}
	if outcome.should_retry() {
		if let Some(retry) = &policy.retry {
			if attempt_count < retry.max_attempts {
				let attempt = attempt_count + 1;
				let delay = retry.backoff.delay_for(attempt);
				return NextAction::Retry {
					at: now + to_chrono(delay),
					attempt,
				};
			}
		}
		// Retries absent or exhausted: a periodic schedule survives the
		// failure and resumes at its next boundary, with the retry counter
		// starting over.
		if policy.periodic.is_none() {
			return NextAction::Finish(ScheduleStatus::Error);
		}
	}
	if let Some(interval) = policy.periodic {
		let interval = to_chrono(interval);
		let anchor = periodic_anchor.unwrap_or(now);
		// Catch up past boundaries missed while a slow or run-now attempt
		// held the entry, instead of firing a burst.
		let mut next = anchor + interval;
		while next <= now {
			next = next + interval;
		}
		return NextAction::Periodic { at: next };
	}
	NextAction::Finish(ScheduleStatus::Completed)
}

fn set_status(entry: &mut ScheduleEntry, status: ScheduleStatus, events: &EventBroadcaster) {
	if entry.status == status {
		return;
	}
	entry.status = status;
	events.notify(&ScheduleEvent {
		entry_id: entry.id.clone(),
		process_name: entry.process.name().to_string(),
		status,
		at: Utc::now(),
	});
}

struct SchedulerCore {
	entries: HashMap<EntryId, ScheduleEntry>,
	events: Arc<EventBroadcaster>,
	config: SchedulerConfig,
	finished_tx: mpsc::UnboundedSender<RunFinished>,
}

impl SchedulerCore {
	fn next_deadline(&self) -> Option<DateTime<Utc>> {
		self.entries
			.values()
			.filter(|entry| !entry.runner.is_live())
			.filter_map(|entry| entry.next_run_at)
			.min()
	}

	fn fire_due(&mut self, now: DateTime<Utc>) {
		let due: Vec<EntryId> = self
			.entries
			.values()
			.filter(|entry| !entry.runner.is_live())
			.filter(|entry| entry.next_run_at.is_some_and(|at| at <= now))
			.map(|entry| entry.id.clone())
			.collect();
		for id in due {
			self.start_attempt(&id, now);
		}
	}

	fn start_attempt(&mut self, id: &EntryId, now: DateTime<Utc>) {
		let Some(entry) = self.entries.get_mut(id) else {
			return;
		};
		let scheduled_at = entry.next_run_at.take().unwrap_or(now);
		let trigger = entry.next_trigger;
		if trigger == TriggerSource::Schedule {
			entry.periodic_anchor = Some(scheduled_at);
		}
		let attempt = entry.attempt_count + 1;
		debug!(
			entry_id = %entry.id,
			process = entry.process.name(),
			%trigger,
			attempt,
			"starting run attempt"
		);
		entry.runner.start(
			attempt,
			trigger,
			scheduled_at,
			Arc::clone(&entry.log),
			self.finished_tx.clone(),
		);
		set_status(entry, ScheduleStatus::Started, &self.events);
	}

	fn on_run_finished(&mut self, finished: RunFinished) {
		let Some(entry) = self.entries.get_mut(&finished.entry_id) else {
			debug!(entry_id = %finished.entry_id, "completion for an unregistered entry, ignoring");
			return;
		};
		if !entry.runner.finish_attempt(finished.run_id) {
			// A cooperative completion racing the watchdog's forced report.
			debug!(entry_id = %entry.id, run_id = %finished.run_id, "stale completion, ignoring");
			return;
		}

		entry.run_count += 1;
		entry.last_run = Some(finished.record);
		info!(
			entry_id = %entry.id,
			process = entry.process.name(),
			outcome = %finished.outcome,
			run_count = entry.run_count,
			"run attempt finished"
		);

		if entry.draining {
			set_status(entry, ScheduleStatus::Stopped, &self.events);
			let id = entry.id.clone();
			self.entries.remove(&id);
			info!(entry_id = %id, "drained entry removed");
			return;
		}

		let now = Utc::now();
		let action = decide_next(
			&entry.policy,
			finished.outcome,
			entry.run_now_queued,
			entry.attempt_count,
			entry.periodic_anchor,
			now,
		);
		match action {
			NextAction::RunNow => {
				entry.run_now_queued = false;
				entry.next_run_at = Some(now);
				entry.next_trigger = TriggerSource::RunNow;
				set_status(entry, ScheduleStatus::RunNow, &self.events);
			}
			NextAction::Retry { at, attempt } => {
				entry.attempt_count = attempt;
				entry.next_run_at = Some(at);
				entry.next_trigger = TriggerSource::Retry;
				warn!(
					entry_id = %entry.id,
					attempt,
					retry_at = %at,
					"attempt failed, retry scheduled"
				);
				set_status(entry, ScheduleStatus::Retried, &self.events);
			}
			NextAction::Periodic { at } => {
				entry.attempt_count = 0;
				entry.next_run_at = Some(at);
				entry.next_trigger = TriggerSource::Schedule;
				set_status(entry, ScheduleStatus::Periodic, &self.events);
			}
			NextAction::Finish(status) => {
				entry.next_run_at = None;
				set_status(entry, status, &self.events);
			}
		}
	}

	fn register(
		&mut self,
		process: Arc<dyn Process>,
		policy: TriggerPolicy,
		sink: Option<Arc<dyn LogSink>>,
	) -> Result<EntryId> {
		policy.validate()?;
		let id = EntryId::from_process_id(process.id());
		if self.entries.contains_key(&id) {
			return Err(JobError::DuplicateProcess(id.to_string()));
		}
		info!(
			entry_id = %id,
			process = process.name(),
			periodic = ?policy.periodic,
			"process registered, schedule started"
		);
		let now = Utc::now();
		// One-shot entries fire immediately; periodic entries fire after the
		// first interval, anchored at registration time.
		let (next_run_at, periodic_anchor) = match policy.periodic {
			Some(interval) => (Some(now + to_chrono(interval)), Some(now)),
			None => (Some(now), None),
		};
		let runner = ProcessRunner::new(Arc::clone(&process), id.clone(), self.config.cancel_grace);
		let mut entry = ScheduleEntry {
			id: id.clone(),
			process,
			policy,
			log: sink.unwrap_or_else(|| Arc::clone(&self.config.log)),
			runner,
			status: ScheduleStatus::None,
			next_run_at,
			next_trigger: TriggerSource::Schedule,
			periodic_anchor,
			attempt_count: 0,
			run_count: 0,
			last_run: None,
			run_now_queued: false,
			draining: false,
		};
		set_status(&mut entry, ScheduleStatus::Started, &self.events);
		self.entries.insert(id.clone(), entry);
		Ok(id)
	}

	fn unregister(&mut self, id: &EntryId) -> Result<()> {
		let Some(entry) = self.entries.get_mut(id) else {
			return Err(JobError::ProcessNotFound(id.to_string()));
		};
		if entry.runner.is_live() {
			entry.draining = true;
			entry.next_run_at = None;
			entry.runner.cancel(self.finished_tx.clone());
			info!(entry_id = %id, "entry draining, removal deferred until the attempt reports");
			return Ok(());
		}
		if !entry.status.is_done() {
			set_status(entry, ScheduleStatus::Stopped, &self.events);
		}
		self.entries.remove(id);
		info!(entry_id = %id, "entry removed");
		Ok(())
	}

	fn run_now(&mut self, id: &EntryId) -> Result<()> {
		let Some(entry) = self.entries.get_mut(id) else {
			return Err(JobError::ProcessNotFound(id.to_string()));
		};
		if entry.runner.is_live() {
			entry.run_now_queued = true;
			debug!(entry_id = %id, "run-now queued behind the live attempt");
			return Ok(());
		}
		entry.next_run_at = Some(Utc::now());
		entry.next_trigger = TriggerSource::RunNow;
		set_status(entry, ScheduleStatus::RunNow, &self.events);
		Ok(())
	}

	fn pause(&mut self, id: &EntryId) -> Result<()> {
		let Some(entry) = self.entries.get_mut(id) else {
			return Err(JobError::ProcessNotFound(id.to_string()));
		};
		if !entry.runner.pause() {
			return Err(JobError::NotRunning(id.to_string()));
		}
		Ok(())
	}

	fn resume(&mut self, id: &EntryId) -> Result<()> {
		let Some(entry) = self.entries.get_mut(id) else {
			return Err(JobError::ProcessNotFound(id.to_string()));
		};
		if !entry.runner.resume() {
			return Err(JobError::NotRunning(id.to_string()));
		}
		Ok(())
	}

	fn cancel(&mut self, id: &EntryId) -> Result<()> {
		let Some(entry) = self.entries.get_mut(id) else {
			return Err(JobError::ProcessNotFound(id.to_string()));
		};
		if entry.runner.is_live() {
			entry.next_run_at = None;
			entry.run_now_queued = false;
			entry.runner.cancel(self.finished_tx.clone());
			return Ok(());
		}
		if !entry.status.is_done() {
			entry.next_run_at = None;
			entry.run_now_queued = false;
			set_status(entry, ScheduleStatus::Stopped, &self.events);
		}
		Ok(())
	}

	fn reset(&mut self, id: &EntryId) -> Result<()> {
		let Some(entry) = self.entries.get_mut(id) else {
			return Err(JobError::ProcessNotFound(id.to_string()));
		};
		if entry.runner.is_live() || !entry.status.is_done() {
			return Err(JobError::ScheduleActive(id.to_string()));
		}
		entry.attempt_count = 0;
		entry.run_now_queued = false;
		entry.periodic_anchor = None;
		entry.next_trigger = TriggerSource::Schedule;
		entry.next_run_at = None;
		info!(entry_id = %id, "schedule reset");
		set_status(entry, ScheduleStatus::None, &self.events);
		Ok(())
	}

	fn status(&self, id: &EntryId) -> Result<StatusSnapshot> {
		self.entries
			.get(id)
			.map(ScheduleEntry::snapshot)
			.ok_or_else(|| JobError::ProcessNotFound(id.to_string()))
	}

	fn list(&self) -> Vec<(EntryId, StatusSnapshot)> {
		self.entries
			.values()
			.map(|entry| (entry.id.clone(), entry.snapshot()))
			.collect()
	}

	fn watch_exec(&self, id: &EntryId) -> Result<watch::Receiver<ExecState>> {
		self.entries
			.get(id)
			.map(|entry| entry.runner.subscribe())
			.ok_or_else(|| JobError::ProcessNotFound(id.to_string()))
	}

	fn abort_all(&mut self) {
		for entry in self.entries.values_mut() {
			entry.runner.abort();
		}
		self.entries.clear();
	}

	fn handle_command(&mut self, command: Command) -> bool {
		match command {
			Command::Register { process, policy, sink, reply } => {
				let _ = reply.send(self.register(process, policy, sink));
			}
			Command::Unregister { id, reply } => {
				let _ = reply.send(self.unregister(&id));
			}
			Command::RunNow { id, reply } => {
				let _ = reply.send(self.run_now(&id));
			}
			Command::Pause { id, reply } => {
				let _ = reply.send(self.pause(&id));
			}
			Command::Resume { id, reply } => {
				let _ = reply.send(self.resume(&id));
			}
			Command::Cancel { id, reply } => {
				let _ = reply.send(self.cancel(&id));
			}
			Command::Reset { id, reply } => {
				let _ = reply.send(self.reset(&id));
			}
			Command::Status { id, reply } => {
				let _ = reply.send(self.status(&id));
			}
			Command::List { reply } => {
				let _ = reply.send(Ok(self.list()));
			}
			Command::WatchExec { id, reply } => {
				let _ = reply.send(self.watch_exec(&id));
			}
			Command::Shutdown { reply } => {
				info!("scheduler shutting down");
				self.abort_all();
				let _ = reply.send(Ok(()));
				return false;
			}
		}
		true
	}
}

async fn sleep_until_deadline(deadline: Option<DateTime<Utc>>) {
	match deadline {
		Some(at) => {
			let delay = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
			tokio::time::sleep(delay).await;
		}
		None => futures::future::pending::<()>().await,
	}
}

async fn run_loop(
	mut core: SchedulerCore,
	mut cmd_rx: mpsc::Receiver<Command>,
	mut finished_rx: mpsc::UnboundedReceiver<RunFinished>,
) {
	loop {
		let deadline = core.next_deadline();
		tokio::select! {
			command = cmd_rx.recv() => match command {
				Some(command) => {
					if !core.handle_command(command) {
						return;
					}
				}
				// Every handle dropped; tear down live attempts and stop.
				None => {
					core.abort_all();
					return;
				}
			},
			Some(finished) = finished_rx.recv() => core.on_run_finished(finished),
			_ = sleep_until_deadline(deadline) => core.fire_due(Utc::now()),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use async_trait::async_trait;
	use cadence_jobs_core::{ProcessContext, RetryPolicy};
	use std::sync::atomic::{AtomicU32, Ordering};
	use std::sync::Mutex;

	fn policy_with_retry(max_attempts: u32, delay_ms: u64) -> TriggerPolicy {
		TriggerPolicy::one_shot()
			.with_retry(RetryPolicy::fixed(max_attempts, Duration::from_millis(delay_ms)))
	}

	mod decisions {
		use super::*;

		fn one_shot() -> TriggerPolicy {
			TriggerPolicy::one_shot()
		}

		#[test]
		fn test_manual_stop_wins_over_everything() {
			let policy = TriggerPolicy::periodic(Duration::from_secs(60))
				.with_retry(RetryPolicy::fixed(5, Duration::from_secs(1)));
			let action =
				decide_next(&policy, ProcessOutcome::Stopped, true, 0, Some(Utc::now()), Utc::now());
			assert_eq!(action, NextAction::Finish(ScheduleStatus::Stopped));
		}

		#[test]
		fn test_queued_run_now_beats_retry() {
			let policy = policy_with_retry(5, 1000);
			let action = decide_next(&policy, ProcessOutcome::Failed, true, 0, None, Utc::now());
			assert_eq!(action, NextAction::RunNow);
		}

		#[test]
		fn test_failure_schedules_retry_with_backoff() {
			let now = Utc::now();
			let policy = policy_with_retry(3, 500);
			match decide_next(&policy, ProcessOutcome::Failed, false, 0, None, now) {
				NextAction::Retry { at, attempt } => {
					assert_eq!(attempt, 1);
					assert_eq!(at, now + chrono::Duration::milliseconds(500));
				}
				other => panic!("expected retry, got {other:?}"),
			}
		}

		#[test]
		fn test_exhausted_retries_finish_in_error() {
			let policy = policy_with_retry(2, 100);
			let action = decide_next(&policy, ProcessOutcome::NotFound, false, 2, None, Utc::now());
			assert_eq!(action, NextAction::Finish(ScheduleStatus::Error));
		}

		#[test]
		fn test_failure_without_retry_policy_is_error() {
			let action =
				decide_next(&one_shot(), ProcessOutcome::Failed, false, 0, None, Utc::now());
			assert_eq!(action, NextAction::Finish(ScheduleStatus::Error));
		}

		#[test]
		fn test_periodic_reschedule_is_anchored_not_completion_relative() {
			let interval = Duration::from_secs(60);
			let policy = TriggerPolicy::periodic(interval);
			let anchor = Utc::now();
			// The run took 10s; the next boundary is anchor + 60s, not now + 60s.
			let now = anchor + chrono::Duration::seconds(10);
			match decide_next(&policy, ProcessOutcome::Completed, false, 0, Some(anchor), now) {
				NextAction::Periodic { at } => {
					assert_eq!(at, anchor + chrono::Duration::seconds(60));
				}
				other => panic!("expected periodic, got {other:?}"),
			}
		}

		#[test]
		fn test_periodic_catches_up_missed_boundaries() {
			let interval = Duration::from_secs(60);
			let policy = TriggerPolicy::periodic(interval);
			let anchor = Utc::now();
			// Three boundaries were missed while the entry was held.
			let now = anchor + chrono::Duration::seconds(185);
			match decide_next(&policy, ProcessOutcome::Completed, false, 0, Some(anchor), now) {
				NextAction::Periodic { at } => {
					assert_eq!(at, anchor + chrono::Duration::seconds(240));
					assert!(at > now);
				}
				other => panic!("expected periodic, got {other:?}"),
			}
		}

		#[test]
		fn test_periodic_survives_failure_without_retry() {
			let policy = TriggerPolicy::periodic(Duration::from_secs(60));
			let anchor = Utc::now();
			let now = anchor + chrono::Duration::seconds(5);
			match decide_next(&policy, ProcessOutcome::Failed, false, 0, Some(anchor), now) {
				NextAction::Periodic { at } => {
					assert_eq!(at, anchor + chrono::Duration::seconds(60));
				}
				other => panic!("expected periodic, got {other:?}"),
			}
		}

		#[test]
		fn test_periodic_survives_retry_exhaustion() {
			let policy = TriggerPolicy::periodic(Duration::from_secs(60))
				.with_retry(RetryPolicy::fixed(2, Duration::from_secs(1)));
			let anchor = Utc::now();
			// Both retries used; the schedule resumes periodically instead of
			// finishing in error.
			let action =
				decide_next(&policy, ProcessOutcome::NotFound, false, 2, Some(anchor), anchor);
			match action {
				NextAction::Periodic { at } => {
					assert_eq!(at, anchor + chrono::Duration::seconds(60));
				}
				other => panic!("expected periodic, got {other:?}"),
			}
		}

		#[test]
		fn test_clean_one_shot_completes() {
			let action =
				decide_next(&one_shot(), ProcessOutcome::Completed, false, 0, None, Utc::now());
			assert_eq!(action, NextAction::Finish(ScheduleStatus::Completed));
		}
	}

	struct CountingProcess {
		id: &'static str,
		runs: AtomicU32,
		/// Outcomes to report in order; the last one repeats.
		outcomes: Vec<ProcessOutcome>,
	}

	impl CountingProcess {
		fn completing(id: &'static str) -> Arc<Self> {
			Arc::new(Self {
				id,
				runs: AtomicU32::new(0),
				outcomes: vec![ProcessOutcome::Completed],
			})
		}

		fn flaky(id: &'static str, failures: usize) -> Arc<Self> {
			let mut outcomes = vec![ProcessOutcome::Failed; failures];
			outcomes.push(ProcessOutcome::Completed);
			Arc::new(Self {
				id,
				runs: AtomicU32::new(0),
				outcomes,
			})
		}

		fn always_failing(id: &'static str) -> Arc<Self> {
			Arc::new(Self {
				id,
				runs: AtomicU32::new(0),
				outcomes: vec![ProcessOutcome::Failed],
			})
		}
	}

	#[async_trait]
	impl Process for CountingProcess {
		fn id(&self) -> &str {
			self.id
		}

		fn name(&self) -> &str {
			"Counting Process"
		}

		async fn run(&self, _ctx: &ProcessContext) -> ProcessOutcome {
			let run = self.runs.fetch_add(1, Ordering::SeqCst) as usize;
			self.outcomes[run.min(self.outcomes.len() - 1)]
		}
	}

	struct StatusRecorder {
		seen: Mutex<Vec<ScheduleStatus>>,
	}

	impl ScheduleListener for StatusRecorder {
		fn on_schedule_status(&self, event: &ScheduleEvent) {
			self.seen.lock().unwrap().push(event.status);
		}
	}

	async fn settled_status(scheduler: &Scheduler, id: &str) -> StatusSnapshot {
		// The terminal exec state can land just before the scheduler consumes
		// the completion report; poll briefly until the schedule settles.
		for _ in 0..200 {
			let snapshot = scheduler.status(id).await.unwrap();
			if snapshot.schedule_status.is_done() {
				return snapshot;
			}
			tokio::time::sleep(Duration::from_millis(5)).await;
		}
		scheduler.status(id).await.unwrap()
	}

	#[tokio::test]
	async fn test_one_shot_runs_once_and_completes() {
		let scheduler = Scheduler::start(SchedulerConfig::default());
		let process = CountingProcess::completing("one-shot");
		scheduler.register(process.clone(), TriggerPolicy::one_shot()).await.unwrap();

		let state = scheduler.wait_terminal("one-shot", Duration::from_secs(2)).await.unwrap();
		assert_eq!(state, ExecState::Completed);

		let snapshot = settled_status(&scheduler, "one-shot").await;
		assert_eq!(snapshot.schedule_status, ScheduleStatus::Completed);
		assert_eq!(snapshot.run_count, 1);
		assert_eq!(snapshot.next_run_at, None);
		assert_eq!(process.runs.load(Ordering::SeqCst), 1);

		scheduler.shutdown().await.unwrap();
	}

	#[tokio::test]
	async fn test_lookup_is_case_insensitive() {
		let scheduler = Scheduler::start(SchedulerConfig::default());
		scheduler
			.register(CountingProcess::completing("Mixed-Case"), TriggerPolicy::one_shot())
			.await
			.unwrap();

		scheduler.wait_terminal("MIXED-case", Duration::from_secs(2)).await.unwrap();
		assert!(scheduler.status("mixed-CASE").await.is_ok());

		scheduler.shutdown().await.unwrap();
	}

	#[tokio::test]
	async fn test_duplicate_registration_is_rejected() {
		let scheduler = Scheduler::start(SchedulerConfig::default());
		scheduler
			.register(CountingProcess::completing("dup"), TriggerPolicy::one_shot())
			.await
			.unwrap();
		let err = scheduler
			.register(CountingProcess::completing("DUP"), TriggerPolicy::one_shot())
			.await
			.unwrap_err();
		assert!(matches!(err, JobError::DuplicateProcess(_)));

		scheduler.shutdown().await.unwrap();
	}

	#[tokio::test]
	async fn test_unknown_process_errors() {
		let scheduler = Scheduler::start(SchedulerConfig::default());
		assert!(matches!(
			scheduler.status("ghost").await.unwrap_err(),
			JobError::ProcessNotFound(_)
		));
		assert!(matches!(
			scheduler.run_now("ghost").await.unwrap_err(),
			JobError::ProcessNotFound(_)
		));
		scheduler.shutdown().await.unwrap();
	}

	#[tokio::test]
	async fn test_invalid_policy_rejected_at_registration() {
		let scheduler = Scheduler::start(SchedulerConfig::default());
		let err = scheduler
			.register(
				CountingProcess::completing("bad-policy"),
				TriggerPolicy::periodic(Duration::ZERO),
			)
			.await
			.unwrap_err();
		assert!(matches!(err, JobError::InvalidPolicy(_)));
		scheduler.shutdown().await.unwrap();
	}

	#[tokio::test]
	async fn test_flaky_process_retries_then_completes() {
		let scheduler = Scheduler::start(SchedulerConfig::default());
		let process = CountingProcess::flaky("flaky", 2);
		scheduler.register(process.clone(), policy_with_retry(5, 10)).await.unwrap();

		let snapshot = settled_status(&scheduler, "flaky").await;
		assert_eq!(snapshot.schedule_status, ScheduleStatus::Completed);
		assert_eq!(snapshot.run_count, 3);
		assert_eq!(process.runs.load(Ordering::SeqCst), 3);

		scheduler.shutdown().await.unwrap();
	}

	#[tokio::test]
	async fn test_exhausted_retries_end_in_error_status() {
		let scheduler = Scheduler::start(SchedulerConfig::default());
		let process = CountingProcess::always_failing("doomed");
		scheduler.register(process.clone(), policy_with_retry(2, 10)).await.unwrap();

		let snapshot = settled_status(&scheduler, "doomed").await;
		assert_eq!(snapshot.schedule_status, ScheduleStatus::Error);
		// Initial attempt plus two retries.
		assert_eq!(snapshot.run_count, 3);
		assert_eq!(snapshot.attempt_count, 2);

		scheduler.shutdown().await.unwrap();
	}

	#[tokio::test]
	async fn test_periodic_schedule_fires_repeatedly() {
		let scheduler = Scheduler::start(SchedulerConfig::default());
		let process = CountingProcess::completing("ticker");
		scheduler
			.register(process.clone(), TriggerPolicy::periodic(Duration::from_millis(25)))
			.await
			.unwrap();

		for _ in 0..200 {
			if process.runs.load(Ordering::SeqCst) >= 3 {
				break;
			}
			tokio::time::sleep(Duration::from_millis(10)).await;
		}
		assert!(process.runs.load(Ordering::SeqCst) >= 3);

		scheduler.cancel("ticker").await.unwrap();
		let snapshot = settled_status(&scheduler, "ticker").await;
		assert_eq!(snapshot.schedule_status, ScheduleStatus::Stopped);
		assert_eq!(snapshot.next_run_at, None);

		scheduler.shutdown().await.unwrap();
	}

	#[tokio::test]
	async fn test_failing_periodic_entry_keeps_its_schedule() {
		let scheduler = Scheduler::start(SchedulerConfig::default());
		// Fails the first run and its only retry, then recovers; the periodic
		// schedule must carry it past the exhausted retries.
		let process = CountingProcess::flaky("resilient", 2);
		let policy = TriggerPolicy::periodic(Duration::from_millis(50))
			.with_retry(RetryPolicy::fixed(1, Duration::from_millis(10)));
		scheduler.register(process.clone(), policy).await.unwrap();

		for _ in 0..400 {
			if process.runs.load(Ordering::SeqCst) >= 3 {
				break;
			}
			tokio::time::sleep(Duration::from_millis(10)).await;
		}
		assert!(process.runs.load(Ordering::SeqCst) >= 3);

		for _ in 0..200 {
			let snapshot = scheduler.status("resilient").await.unwrap();
			if snapshot.schedule_status == ScheduleStatus::Periodic {
				break;
			}
			tokio::time::sleep(Duration::from_millis(5)).await;
		}
		let snapshot = scheduler.status("resilient").await.unwrap();
		assert_eq!(snapshot.schedule_status, ScheduleStatus::Periodic);
		assert_eq!(snapshot.attempt_count, 0);
		assert!(snapshot.next_run_at.is_some());

		scheduler.shutdown().await.unwrap();
	}

	#[tokio::test]
	async fn test_periodic_entry_waits_for_first_interval() {
		let scheduler = Scheduler::start(SchedulerConfig::default());
		let process = CountingProcess::completing("patient");
		scheduler
			.register(process.clone(), TriggerPolicy::periodic(Duration::from_secs(600)))
			.await
			.unwrap();

		tokio::time::sleep(Duration::from_millis(50)).await;
		assert_eq!(process.runs.load(Ordering::SeqCst), 0);

		let snapshot = scheduler.status("patient").await.unwrap();
		assert_eq!(snapshot.schedule_status, ScheduleStatus::Started);
		assert!(snapshot.next_run_at.is_some());

		scheduler.shutdown().await.unwrap();
	}

	#[tokio::test]
	async fn test_run_now_on_idle_periodic_entry() {
		let scheduler = Scheduler::start(SchedulerConfig::default());
		let process = CountingProcess::completing("on-demand");
		// Long interval so no fire happens on its own.
		scheduler
			.register(process.clone(), TriggerPolicy::periodic(Duration::from_secs(600)))
			.await
			.unwrap();

		scheduler.run_now("on-demand").await.unwrap();
		for _ in 0..200 {
			if process.runs.load(Ordering::SeqCst) >= 1 {
				break;
			}
			tokio::time::sleep(Duration::from_millis(5)).await;
		}
		assert_eq!(process.runs.load(Ordering::SeqCst), 1);

		// The periodic schedule is undisturbed: still armed, far in the future.
		for _ in 0..200 {
			if scheduler.status("on-demand").await.unwrap().schedule_status
				== ScheduleStatus::Periodic
			{
				break;
			}
			tokio::time::sleep(Duration::from_millis(5)).await;
		}
		let snapshot = scheduler.status("on-demand").await.unwrap();
		assert_eq!(snapshot.schedule_status, ScheduleStatus::Periodic);
		assert!(snapshot.next_run_at.is_some());

		scheduler.shutdown().await.unwrap();
	}

	#[tokio::test]
	async fn test_run_now_restarts_finished_schedule() {
		let scheduler = Scheduler::start(SchedulerConfig::default());
		let process = CountingProcess::completing("done");
		scheduler.register(process.clone(), TriggerPolicy::one_shot()).await.unwrap();
		settled_status(&scheduler, "done").await;

		scheduler.run_now("done").await.unwrap();
		let snapshot = settled_status(&scheduler, "done").await;
		assert_eq!(snapshot.schedule_status, ScheduleStatus::Completed);
		assert_eq!(snapshot.run_count, 2);

		scheduler.shutdown().await.unwrap();
	}

	#[tokio::test]
	async fn test_reset_returns_finished_schedule_to_pre_start() {
		let scheduler = Scheduler::start(SchedulerConfig::default());
		let process = CountingProcess::always_failing("reset-me");
		scheduler.register(process, policy_with_retry(1, 10)).await.unwrap();
		let snapshot = settled_status(&scheduler, "reset-me").await;
		assert_eq!(snapshot.schedule_status, ScheduleStatus::Error);
		assert_eq!(snapshot.attempt_count, 1);

		scheduler.reset("reset-me").await.unwrap();
		let snapshot = scheduler.status("reset-me").await.unwrap();
		assert_eq!(snapshot.schedule_status, ScheduleStatus::None);
		assert_eq!(snapshot.attempt_count, 0);
		assert_eq!(snapshot.next_run_at, None);

		scheduler.shutdown().await.unwrap();
	}

	#[tokio::test]
	async fn test_reset_rejected_while_schedule_active() {
		let scheduler = Scheduler::start(SchedulerConfig::default());
		scheduler
			.register(
				CountingProcess::completing("active"),
				TriggerPolicy::periodic(Duration::from_secs(600)),
			)
			.await
			.unwrap();

		let err = scheduler.reset("active").await.unwrap_err();
		assert!(matches!(err, JobError::ScheduleActive(_)));

		scheduler.shutdown().await.unwrap();
	}

	#[tokio::test]
	async fn test_pause_without_live_attempt_errors() {
		let scheduler = Scheduler::start(SchedulerConfig::default());
		scheduler
			.register(CountingProcess::completing("idle"), TriggerPolicy::one_shot())
			.await
			.unwrap();
		settled_status(&scheduler, "idle").await;

		assert!(matches!(
			scheduler.pause("idle").await.unwrap_err(),
			JobError::NotRunning(_)
		));
		assert!(matches!(
			scheduler.resume("idle").await.unwrap_err(),
			JobError::NotRunning(_)
		));

		scheduler.shutdown().await.unwrap();
	}

	#[tokio::test]
	async fn test_unregister_removes_entry() {
		let scheduler = Scheduler::start(SchedulerConfig::default());
		scheduler
			.register(CountingProcess::completing("gone"), TriggerPolicy::one_shot())
			.await
			.unwrap();
		settled_status(&scheduler, "gone").await;

		scheduler.unregister("gone").await.unwrap();
		assert!(matches!(
			scheduler.status("gone").await.unwrap_err(),
			JobError::ProcessNotFound(_)
		));
		assert!(scheduler.list().await.unwrap().is_empty());

		scheduler.shutdown().await.unwrap();
	}

	#[tokio::test]
	async fn test_status_events_reach_listeners() {
		let scheduler = Scheduler::start(SchedulerConfig::default());
		let recorder = Arc::new(StatusRecorder { seen: Mutex::new(Vec::new()) });
		let listener: Arc<dyn ScheduleListener> = recorder.clone();
		scheduler.subscribe(&listener);

		let process = CountingProcess::flaky("observed", 1);
		scheduler.register(process, policy_with_retry(3, 10)).await.unwrap();
		settled_status(&scheduler, "observed").await;

		let seen = recorder.seen.lock().unwrap().clone();
		assert_eq!(seen.first(), Some(&ScheduleStatus::Started));
		assert!(seen.contains(&ScheduleStatus::Retried));
		assert_eq!(seen.last(), Some(&ScheduleStatus::Completed));

		scheduler.shutdown().await.unwrap();
	}

	struct SlowProcess;

	#[async_trait]
	impl Process for SlowProcess {
		fn id(&self) -> &str {
			"slow"
		}

		fn name(&self) -> &str {
			"Slow Process"
		}

		async fn run(&self, _ctx: &ProcessContext) -> ProcessOutcome {
			tokio::time::sleep(Duration::from_secs(600)).await;
			ProcessOutcome::Completed
		}
	}

	#[tokio::test]
	async fn test_wait_terminal_timeout_returns_current_state() {
		let scheduler = Scheduler::start(SchedulerConfig::default());
		scheduler.register(Arc::new(SlowProcess), TriggerPolicy::one_shot()).await.unwrap();

		let state = scheduler.wait_terminal("slow", Duration::from_millis(50)).await.unwrap();
		assert!(!state.is_terminal());

		scheduler.shutdown().await.unwrap();
	}

	struct ChattyProcess;

	#[async_trait]
	impl Process for ChattyProcess {
		fn id(&self) -> &str {
			"chatty"
		}

		fn name(&self) -> &str {
			"Chatty Process"
		}

		async fn run(&self, ctx: &ProcessContext) -> ProcessOutcome {
			ctx.log.log(cadence_jobs_core::LogLevel::Info, "working");
			ProcessOutcome::Completed
		}
	}

	#[tokio::test]
	async fn test_register_with_sink_routes_process_logs() {
		let scheduler = Scheduler::start(SchedulerConfig::default());
		let sink = Arc::new(cadence_jobs_core::MemorySink::new(16));
		scheduler
			.register_with_sink(Arc::new(ChattyProcess), TriggerPolicy::one_shot(), sink.clone())
			.await
			.unwrap();

		settled_status(&scheduler, "chatty").await;
		let records = sink.records();
		assert_eq!(records.len(), 1);
		assert_eq!(records[0].message, "working");

		scheduler.shutdown().await.unwrap();
	}

	#[tokio::test]
	async fn test_shutdown_stops_accepting_commands() {
		let scheduler = Scheduler::start(SchedulerConfig::default());
		scheduler.shutdown().await.unwrap();
		assert!(matches!(
			scheduler.list().await.unwrap_err(),
			JobError::SchedulerStopped
		));
	}
}
