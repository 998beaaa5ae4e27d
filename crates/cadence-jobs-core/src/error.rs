// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for the job engine.

use thiserror::Error;

/// Result type for job-engine operations.
pub type Result<T> = std::result::Result<T, JobError>;

/// Errors surfaced by registration, control calls, and status queries.
#[derive(Debug, Error)]
pub enum JobError {
	#[error("a process with id '{0}' is already registered")]
	DuplicateProcess(String),

	#[error("no process registered with id '{0}'")]
	ProcessNotFound(String),

	#[error("invalid trigger policy: {0}")]
	InvalidPolicy(String),

	#[error("process '{0}' has no running attempt")]
	NotRunning(String),

	#[error("process '{0}' has an active schedule and cannot be reset")]
	ScheduleActive(String),

	#[error("scheduler is stopped")]
	SchedulerStopped,
}
