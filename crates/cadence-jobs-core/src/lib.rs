// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core types for the Cadence background-job engine.
//!
//! This crate holds the pure domain vocabulary: the three status enums with
//! their derived predicates, the process contract, trigger policies, and the
//! logging sink handed to processes. The scheduling and execution machinery
//! lives in `cadence-jobs`.

pub mod error;
pub mod log;
pub mod policy;
pub mod process;
pub mod status;

pub use error::{JobError, Result};
pub use log::{LogLevel, LogRecord, LogSink, MemorySink, TracingSink};
pub use policy::{Backoff, RetryPolicy, TriggerPolicy};
pub use process::{process_key, ControlSignal, Interrupted, Process, ProcessContext, TriggerSource};
pub use status::{ExecState, ProcessOutcome, ScheduleStatus};
