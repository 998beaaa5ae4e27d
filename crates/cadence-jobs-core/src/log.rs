// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Logging sink handed to processes.
//!
//! A process logs progress through a [`LogSink`] without depending on the
//! scheduler. The sink is supplied at registration time; when none is given
//! the engine falls back to [`TracingSink`], which forwards to `tracing`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
	Debug,
	Info,
	Warn,
	Error,
}

impl fmt::Display for LogLevel {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Debug => f.write_str("debug"),
			Self::Info => f.write_str("info"),
			Self::Warn => f.write_str("warn"),
			Self::Error => f.write_str("error"),
		}
	}
}

/// Destination for process progress messages.
pub trait LogSink: Send + Sync {
	fn log(&self, level: LogLevel, message: &str);
}

/// Default sink: forwards to `tracing` at the matching level.
#[derive(Debug, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
	fn log(&self, level: LogLevel, message: &str) {
		match level {
			LogLevel::Debug => tracing::debug!(target: "cadence_jobs", "{message}"),
			LogLevel::Info => tracing::info!(target: "cadence_jobs", "{message}"),
			LogLevel::Warn => tracing::warn!(target: "cadence_jobs", "{message}"),
			LogLevel::Error => tracing::error!(target: "cadence_jobs", "{message}"),
		}
	}
}

/// A single buffered log entry.
#[derive(Debug, Clone, Serialize)]
pub struct LogRecord {
	pub at: DateTime<Utc>,
	pub level: LogLevel,
	pub message: String,
}

/// Bounded in-memory sink. Oldest records are dropped once the capacity is
/// reached. Useful for surfacing recent process output in status views and
/// for assertions in tests.
pub struct MemorySink {
	capacity: usize,
	records: Mutex<VecDeque<LogRecord>>,
}

impl MemorySink {
	pub fn new(capacity: usize) -> Self {
		Self {
			capacity: capacity.max(1),
			records: Mutex::new(VecDeque::new()),
		}
	}

	pub fn records(&self) -> Vec<LogRecord> {
		self.records.lock().unwrap_or_else(|e| e.into_inner()).iter().cloned().collect()
	}

	pub fn len(&self) -> usize {
		self.records.lock().unwrap_or_else(|e| e.into_inner()).len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

impl LogSink for MemorySink {
	fn log(&self, level: LogLevel, message: &str) {
		let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
		if records.len() == self.capacity {
			records.pop_front();
		}
		records.push_back(LogRecord {
			at: Utc::now(),
			level,
			message: message.to_string(),
		});
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_memory_sink_records_in_order() {
		let sink = MemorySink::new(10);
		sink.log(LogLevel::Info, "first");
		sink.log(LogLevel::Warn, "second");

		let records = sink.records();
		assert_eq!(records.len(), 2);
		assert_eq!(records[0].message, "first");
		assert_eq!(records[0].level, LogLevel::Info);
		assert_eq!(records[1].message, "second");
		assert_eq!(records[1].level, LogLevel::Warn);
	}

	#[test]
	fn test_memory_sink_drops_oldest_at_capacity() {
		let sink = MemorySink::new(2);
		sink.log(LogLevel::Info, "one");
		sink.log(LogLevel::Info, "two");
		sink.log(LogLevel::Info, "three");

		let records = sink.records();
		assert_eq!(records.len(), 2);
		assert_eq!(records[0].message, "two");
		assert_eq!(records[1].message, "three");
	}

	#[test]
	fn test_level_ordering() {
		assert!(LogLevel::Debug < LogLevel::Info);
		assert!(LogLevel::Info < LogLevel::Warn);
		assert!(LogLevel::Warn < LogLevel::Error);
	}
}
