// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Status vocabularies for the scheduling engine.
//!
//! Three related but distinct vocabularies: the schedule-level status of an
//! entry, the worker-side execution state of a single run attempt, and the
//! outcome a process reports when an attempt finishes. Status values are pure
//! constants with derived predicates; transition legality is enforced by the
//! scheduler and the runner, never here.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Schedule-level status of a registered entry.
///
/// Kinds flow `None -> Started -> {Periodic, Retried, RunNow} -> Started`
/// until one of the terminal kinds (`Completed`, `Stopped`, `Error`) is
/// reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleStatus {
	/// No schedule has been started for the entry.
	None,
	/// The schedule started and a trigger time is set.
	Started,
	/// A new periodic trigger time has been set.
	Periodic,
	/// A new retry trigger time has been set.
	Retried,
	/// A run-now trigger has been set.
	RunNow,
	/// All scheduled runs completed cleanly.
	Completed,
	/// The schedule was manually stopped.
	Stopped,
	/// The schedule stopped because execution failed.
	Error,
}

impl ScheduleStatus {
	/// True for kinds that mean "a new trigger time was just computed".
	pub fn is_updated(&self) -> bool {
		matches!(self, Self::Started | Self::Periodic | Self::Retried | Self::RunNow)
	}

	/// True only while an attempt triggered by this schedule is running.
	pub fn is_executing(&self) -> bool {
		matches!(self, Self::Started)
	}

	/// True for every terminal kind. No further automatic triggering occurs
	/// from a done schedule without an explicit reset.
	pub fn is_done(&self) -> bool {
		matches!(self, Self::Completed | Self::Stopped | Self::Error)
	}

	pub fn label(&self) -> &'static str {
		match self {
			Self::None => "Not Scheduled",
			Self::Started => "Schedule Started",
			Self::Periodic => "Set Periodic Schedule",
			Self::Retried => "Set Retry Schedule",
			Self::RunNow => "Set Run-Now Schedule",
			Self::Completed => "Schedule Completed",
			Self::Stopped => "Manually Stopped Execution",
			Self::Error => "Execution Failed",
		}
	}
}

impl fmt::Display for ScheduleStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.label())
	}
}

/// Worker-side lifecycle of a single run attempt.
///
/// `Paused` and `Stopping` are only reachable from `Executing`. The terminal
/// states are per-attempt; a new attempt starts over from `NotStarted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecState {
	NotStarted,
	Starting,
	Executing,
	Stopping,
	Paused,
	Canceled,
	Failed,
	Completed,
}

impl ExecState {
	/// Terminal for the current attempt.
	pub fn is_terminal(&self) -> bool {
		matches!(self, Self::Canceled | Self::Failed | Self::Completed)
	}

	/// True while a worker is (or is about to be) running the process.
	pub fn is_live(&self) -> bool {
		matches!(self, Self::Starting | Self::Executing | Self::Stopping | Self::Paused)
	}

	pub fn label(&self) -> &'static str {
		match self {
			Self::NotStarted => "Not Started",
			Self::Starting => "Starting...",
			Self::Executing => "Executing",
			Self::Stopping => "Shutting Down...",
			Self::Paused => "Paused",
			Self::Canceled => "Canceled",
			Self::Failed => "Failed",
			Self::Completed => "Completed",
		}
	}
}

impl fmt::Display for ExecState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.label())
	}
}

/// Outcome a process reports for one run attempt.
///
/// `NotFound`, `Failed` and `Stopped` share the "terminal with a problem"
/// property that distinguishes them from a clean `Completed`; the scheduler
/// uses it to decide between periodic rescheduling, retry, and stopping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessOutcome {
	NotStarted,
	Pending,
	Executing,
	Completed,
	NotFound,
	Failed,
	Stopped,
}

impl ProcessOutcome {
	/// Terminal with a problem: the attempt ended but not cleanly.
	pub fn is_problem(&self) -> bool {
		matches!(self, Self::NotFound | Self::Failed | Self::Stopped)
	}

	/// Terminal, clean or not.
	pub fn is_done(&self) -> bool {
		matches!(self, Self::Completed) || self.is_problem()
	}

	/// Outcomes the scheduler treats as retryable. A manual stop is final.
	pub fn should_retry(&self) -> bool {
		matches!(self, Self::NotFound | Self::Failed)
	}

	pub fn label(&self) -> &'static str {
		match self {
			Self::NotStarted => "Process Not Started",
			Self::Pending => "Processing Pending",
			Self::Executing => "Process is Executing",
			Self::Completed => "Process Completed",
			Self::NotFound => "Data not Found, Retry",
			Self::Failed => "Processing Error",
			Self::Stopped => "Process Manually Stopped",
		}
	}
}

impl fmt::Display for ProcessOutcome {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.label())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const ALL_SCHEDULE: [ScheduleStatus; 8] = [
		ScheduleStatus::None,
		ScheduleStatus::Started,
		ScheduleStatus::Periodic,
		ScheduleStatus::Retried,
		ScheduleStatus::RunNow,
		ScheduleStatus::Completed,
		ScheduleStatus::Stopped,
		ScheduleStatus::Error,
	];

	#[test]
	fn test_schedule_is_done_exact_set() {
		for status in ALL_SCHEDULE {
			let expected = matches!(
				status,
				ScheduleStatus::Completed | ScheduleStatus::Stopped | ScheduleStatus::Error
			);
			assert_eq!(status.is_done(), expected, "is_done for {status:?}");
		}
	}

	#[test]
	fn test_schedule_is_updated_excludes_none_and_done() {
		assert!(!ScheduleStatus::None.is_updated());
		assert!(ScheduleStatus::Started.is_updated());
		assert!(ScheduleStatus::Periodic.is_updated());
		assert!(ScheduleStatus::Retried.is_updated());
		assert!(ScheduleStatus::RunNow.is_updated());
		assert!(!ScheduleStatus::Completed.is_updated());
		assert!(!ScheduleStatus::Stopped.is_updated());
		assert!(!ScheduleStatus::Error.is_updated());
	}

	#[test]
	fn test_schedule_is_executing_only_started() {
		for status in ALL_SCHEDULE {
			assert_eq!(status.is_executing(), status == ScheduleStatus::Started);
		}
	}

	#[test]
	fn test_exec_state_terminal_and_live_are_disjoint() {
		let all = [
			ExecState::NotStarted,
			ExecState::Starting,
			ExecState::Executing,
			ExecState::Stopping,
			ExecState::Paused,
			ExecState::Canceled,
			ExecState::Failed,
			ExecState::Completed,
		];
		for state in all {
			assert!(!(state.is_terminal() && state.is_live()), "{state:?}");
		}
		assert!(ExecState::Canceled.is_terminal());
		assert!(ExecState::Failed.is_terminal());
		assert!(ExecState::Completed.is_terminal());
		assert!(!ExecState::NotStarted.is_live());
		assert!(ExecState::Stopping.is_live());
		assert!(ExecState::Paused.is_live());
	}

	#[test]
	fn test_outcome_problem_flag() {
		assert!(ProcessOutcome::NotFound.is_problem());
		assert!(ProcessOutcome::Failed.is_problem());
		assert!(ProcessOutcome::Stopped.is_problem());
		assert!(!ProcessOutcome::Completed.is_problem());
		assert!(!ProcessOutcome::Pending.is_problem());
	}

	#[test]
	fn test_outcome_retry_excludes_manual_stop() {
		assert!(ProcessOutcome::NotFound.should_retry());
		assert!(ProcessOutcome::Failed.should_retry());
		assert!(!ProcessOutcome::Stopped.should_retry());
		assert!(!ProcessOutcome::Completed.should_retry());
	}

	#[test]
	fn test_serde_snake_case() {
		assert_eq!(
			serde_json::to_string(&ScheduleStatus::RunNow).unwrap(),
			"\"run_now\""
		);
		assert_eq!(
			serde_json::to_string(&ExecState::NotStarted).unwrap(),
			"\"not_started\""
		);
	}
}
