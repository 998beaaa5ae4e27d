// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Background-job scheduling and execution-status engine.
//!
//! Processes implementing [`cadence_jobs_core::Process`] are registered with
//! a [`Scheduler`] under a [`TriggerPolicy`]; the scheduler fires attempts,
//! applies retry and periodic rescheduling, and broadcasts schedule-status
//! transitions to subscribed listeners.
//!
//! ```no_run
//! use cadence_jobs::{Scheduler, SchedulerConfig};
//! use cadence_jobs_core::{Process, ProcessContext, ProcessOutcome, TriggerPolicy};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! struct NightlyImport;
//!
//! #[async_trait::async_trait]
//! impl Process for NightlyImport {
//! 	fn id(&self) -> &str { "nightly-import" }
//! 	fn name(&self) -> &str { "Nightly Import" }
//! 	async fn run(&self, _ctx: &ProcessContext) -> ProcessOutcome {
//! 		ProcessOutcome::Completed
//! 	}
//! }
//!
//! # async fn demo() -> cadence_jobs_core::Result<()> {
//! let scheduler = Scheduler::start(SchedulerConfig::default());
//! scheduler
//! 	.register(Arc::new(NightlyImport), TriggerPolicy::periodic(Duration::from_secs(86_400)))
//! 	.await?;
//! # Ok(())
//! # }
//! ```

pub mod entry;
pub mod events;
mod runner;
pub mod scheduler;

pub use entry::{EntryId, RunRecord, StatusSnapshot};
pub use events::{EventBroadcaster, ScheduleEvent, ScheduleListener, SubscriptionId};
pub use scheduler::{Scheduler, SchedulerConfig};

pub use cadence_jobs_core::{
	Backoff, ExecState, JobError, LogLevel, LogRecord, LogSink, MemorySink, Process,
	ProcessContext, ProcessOutcome, Result, RetryPolicy, ScheduleStatus, TracingSink,
	TriggerPolicy, TriggerSource,
};
