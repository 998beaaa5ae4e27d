// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Identity and reporting types for schedule entries.

use cadence_jobs_core::{process_key, ExecState, ProcessOutcome, ScheduleStatus, TriggerSource};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

/// Identity of a schedule entry: the owning process id, normalized so that
/// lookups are case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct EntryId(String);

impl EntryId {
	pub fn from_process_id(id: &str) -> Self {
		Self(process_key(id))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for EntryId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// Record of one finished run attempt, kept in memory per entry.
#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
	pub run_id: Uuid,
	/// 1-based attempt number within the retry sequence that produced it.
	pub attempt: u32,
	pub trigger: TriggerSource,
	/// The time the attempt was scheduled for (the drift-correction anchor),
	/// as opposed to when it actually started.
	pub scheduled_at: DateTime<Utc>,
	pub started_at: DateTime<Utc>,
	pub completed_at: DateTime<Utc>,
	pub duration_ms: i64,
	pub outcome: ProcessOutcome,
	pub error: Option<String>,
}

/// Point-in-time view of one entry, returned by status queries.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
	pub schedule_status: ScheduleStatus,
	pub exec_state: ExecState,
	pub next_run_at: Option<DateTime<Utc>>,
	/// Retries scheduled since the last clean completion.
	pub attempt_count: u32,
	/// Finished attempts over the lifetime of the entry.
	pub run_count: u64,
	pub last_run: Option<RunRecord>,
}
