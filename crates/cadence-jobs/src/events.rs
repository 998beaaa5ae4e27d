// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Synchronous broadcast of schedule-status transitions.
//!
//! Listeners are held through `Weak` references keyed by a generated
//! subscription handle, so a registration never keeps the listener's owner
//! alive. Dispatch happens on the scheduler's thread, in registration order;
//! a listener that panics is contained and logged without interrupting
//! delivery to the rest.

use crate::entry::EntryId;
use cadence_jobs_core::ScheduleStatus;
use chrono::{DateTime, Utc};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tracing::warn;

/// A schedule-status transition for one entry.
#[derive(Debug, Clone)]
pub struct ScheduleEvent {
	pub entry_id: EntryId,
	pub process_name: String,
	pub status: ScheduleStatus,
	pub at: DateTime<Utc>,
}

/// Receives schedule-status transitions.
pub trait ScheduleListener: Send + Sync {
	fn on_schedule_status(&self, event: &ScheduleEvent);
}

/// Handle returned by [`EventBroadcaster::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

pub struct EventBroadcaster {
	next_id: AtomicU64,
	listeners: Mutex<Vec<(SubscriptionId, Weak<dyn ScheduleListener>)>>,
}

impl EventBroadcaster {
	pub fn new() -> Self {
		Self {
			next_id: AtomicU64::new(1),
			listeners: Mutex::new(Vec::new()),
		}
	}

	/// Registers a listener and returns its subscription handle. Only a weak
	/// reference is retained; once the listener is dropped elsewhere the
	/// registration goes stale and is pruned on the next notify.
	pub fn subscribe(&self, listener: &Arc<dyn ScheduleListener>) -> SubscriptionId {
		let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
		self.listeners
			.lock()
			.unwrap_or_else(|e| e.into_inner())
			.push((id, Arc::downgrade(listener)));
		id
	}

	/// Removes a registration. Returns false if the handle was unknown.
	pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
		let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
		let before = listeners.len();
		listeners.retain(|(sub, _)| *sub != id);
		listeners.len() < before
	}

	pub fn listener_count(&self) -> usize {
		self.listeners.lock().unwrap_or_else(|e| e.into_inner()).len()
	}

	/// Delivers the event to every live listener, in registration order, on
	/// the caller's thread. Stale registrations are pruned.
	pub fn notify(&self, event: &ScheduleEvent) {
		let live: Vec<(SubscriptionId, Arc<dyn ScheduleListener>)> = {
			let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
			listeners.retain(|(_, weak)| weak.strong_count() > 0);
			listeners
				.iter()
				.filter_map(|(id, weak)| weak.upgrade().map(|l| (*id, l)))
				.collect()
		};

		for (id, listener) in live {
			let result = catch_unwind(AssertUnwindSafe(|| listener.on_schedule_status(event)));
			if result.is_err() {
				warn!(
					entry_id = %event.entry_id,
					status = %event.status,
					subscription = id.0,
					"schedule listener panicked during notification"
				);
			}
		}
	}
}

impl Default for EventBroadcaster {
	fn default() -> Self {
		Self::new()
	}
}
