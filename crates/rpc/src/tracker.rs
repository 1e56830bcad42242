//! Outbound request correlation.
//!
//! A [`RequestTracker`] owns the table of requests this peer is waiting on.
//! Each entry is settled at most once: by [`RequestTracker::resolve_request`],
//! [`RequestTracker::reject_request`], its timeout, or
//! [`RequestTracker::cancel_all_requests`]. Replacing or cancelling an entry
//! drops its completion without a value; the waiter then observes
//! [`TrackerError::Abandoned`].

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::TrackerConfig;
use crate::message::Response;
use crate::types::{ErrorCode, RequestId, ResponseError};

/// Reason given by [`RequestTracker::cancel_all_requests`] when none is supplied.
pub const DEFAULT_CANCEL_REASON: &str = "Request cancelled";

/// Ways a tracked request can end without a result.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TrackerError {
	/// The peer replied with an error, or the request timed out.
	#[error("{0}")]
	Rejected(ResponseError),
	/// Every pending request was cancelled, e.g. on disconnect.
	#[error("{reason}")]
	Cancelled {
		/// Caller-supplied reason.
		reason: String,
	},
	/// The entry was replaced or cancelled; no settlement will follow.
	#[error("request {0} was abandoned")]
	Abandoned(RequestId),
}

impl TrackerError {
	/// Converts into a wire error suitable for an error phase.
	#[must_use]
	pub fn into_response_error(self) -> ResponseError {
		match self {
			Self::Rejected(err) => err,
			Self::Cancelled { reason } => ResponseError::new(ErrorCode::REQUEST_CANCELLED, reason),
			Self::Abandoned(id) => {
				ResponseError::new(ErrorCode::REQUEST_CANCELLED, format_args!("Request abandoned: {id}"))
			}
		}
	}
}

/// Lifecycle status of a tracker entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
	/// Waiting for a reply.
	Pending,
	/// Resolved with a result.
	Success,
	/// Rejected, timed out, or cancelled in bulk.
	Failure,
}

type Outcome = Result<JsonValue, TrackerError>;

struct PendingEntry {
	tx: oneshot::Sender<Outcome>,
	status: RequestStatus,
	created: Instant,
	generation: u64,
	timer: JoinHandle<()>,
}

impl PendingEntry {
	/// Stops the timer and delivers `outcome` to the waiter.
	fn settle(mut self, id: &RequestId, outcome: Outcome) {
		self.timer.abort();
		self.status = if outcome.is_ok() {
			RequestStatus::Success
		} else {
			RequestStatus::Failure
		};
		debug!(
			id = %id,
			status = ?self.status,
			elapsed_ms = self.created.elapsed().as_millis() as u64,
			"tracker.settle"
		);
		// The waiter may have gone away; nothing to do then.
		let _ = self.tx.send(outcome);
	}
}

#[derive(Default)]
struct TrackerState {
	entries: HashMap<RequestId, PendingEntry>,
	next_generation: u64,
}

/// Future returned by [`RequestTracker::track_request`].
#[derive(Debug)]
pub struct PendingRequest {
	id: RequestId,
	rx: oneshot::Receiver<Outcome>,
}

impl PendingRequest {
	/// The id this future is waiting on.
	#[must_use]
	pub fn id(&self) -> &RequestId {
		&self.id
	}
}

impl Future for PendingRequest {
	type Output = Outcome;

	fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		match Pin::new(&mut self.rx).poll(cx) {
			Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
			Poll::Ready(Err(_closed)) => Poll::Ready(Err(TrackerError::Abandoned(self.id.clone()))),
			Poll::Pending => Poll::Pending,
		}
	}
}

/// Table of in-flight outbound requests keyed by id.
///
/// Cloning yields another handle to the same table, so the code sending
/// requests and the code reading replies can each hold one.
#[derive(Clone)]
pub struct RequestTracker {
	config: TrackerConfig,
	state: Arc<Mutex<TrackerState>>,
}

impl Default for RequestTracker {
	fn default() -> Self {
		Self::with_config(TrackerConfig::default())
	}
}

impl std::fmt::Debug for RequestTracker {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("RequestTracker")
			.field("timeout_ms", &self.config.timeout_ms)
			.field("pending", &self.len())
			.finish()
	}
}

impl RequestTracker {
	/// Creates a tracker with the default 120 second timeout.
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Creates a tracker whose requests expire after `timeout_ms`.
	#[must_use]
	pub fn with_timeout_ms(timeout_ms: i64) -> Self {
		Self::with_config(TrackerConfig { timeout_ms })
	}

	/// Creates a tracker from a config.
	#[must_use]
	pub fn with_config(config: TrackerConfig) -> Self {
		Self {
			config,
			state: Arc::new(Mutex::new(TrackerState::default())),
		}
	}

	/// Configured timeout in milliseconds, as given.
	#[must_use]
	pub fn timeout_ms(&self) -> i64 {
		self.config.timeout_ms
	}

	/// Delay after which a pending request expires.
	#[must_use]
	pub fn timeout(&self) -> Duration {
		self.config.delay()
	}

	/// Number of pending requests.
	#[must_use]
	pub fn len(&self) -> usize {
		self.state.lock().entries.len()
	}

	/// Returns true when nothing is pending.
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.state.lock().entries.is_empty()
	}

	/// Returns true while `id` is waiting for a reply.
	#[must_use]
	pub fn is_pending(&self, id: &RequestId) -> bool {
		self.state.lock().entries.contains_key(id)
	}

	/// Ids currently waiting for a reply, in no particular order.
	#[must_use]
	pub fn pending_ids(&self) -> Vec<RequestId> {
		self.state.lock().entries.keys().cloned().collect()
	}

	/// Starts waiting for a reply to `id`.
	///
	/// An existing entry for the same id is replaced: its timer stops and its
	/// waiter completes with [`TrackerError::Abandoned`].
	///
	/// Must be called from within a tokio runtime; the timeout runs as a task.
	pub fn track_request(&self, id: impl Into<RequestId>) -> PendingRequest {
		let id = id.into();
		let (tx, rx) = oneshot::channel();

		let superseded = {
			let mut state = self.state.lock();
			let generation = state.next_generation;
			state.next_generation += 1;
			let timer = spawn_timeout(Arc::downgrade(&self.state), id.clone(), generation, self.timeout());
			state.entries.insert(
				id.clone(),
				PendingEntry {
					tx,
					status: RequestStatus::Pending,
					created: Instant::now(),
					generation,
					timer,
				},
			)
		};

		if let Some(old) = superseded {
			old.timer.abort();
			warn!(id = %id, "tracker.superseded");
		}
		debug!(id = %id, timeout_ms = self.config.timeout_ms, "tracker.track");

		PendingRequest { id, rx }
	}

	/// Settles `id` with a result. Unknown ids are logged and ignored.
	pub fn resolve_request(&self, id: &RequestId, result: JsonValue) {
		settle(&self.state, id, Ok(result));
	}

	/// Settles `id` with a wire error. Unknown ids are logged and ignored.
	pub fn reject_request(&self, id: &RequestId, error: ResponseError) {
		settle(&self.state, id, Err(TrackerError::Rejected(error)));
	}

	/// Routes an inbound message to the entry it answers.
	///
	/// Null and non-object messages and messages without an id are ignored.
	/// A non-null `error` member rejects; otherwise a `result` member,
	/// `null` included, resolves. `"error": null` counts as no error, so a
	/// message with neither a non-null error nor a result leaves the entry
	/// pending.
	pub fn handle_message(&self, message: &JsonValue) {
		let Some(obj) = message.as_object() else {
			return;
		};
		let Some(raw_id) = obj.get("id").filter(|id| !id.is_null()) else {
			return;
		};
		let Ok(id) = serde_json::from_value::<RequestId>(raw_id.clone()) else {
			warn!(id = %raw_id, "tracker.unusable_id");
			return;
		};

		if let Some(raw) = obj.get("error").filter(|err| !err.is_null()) {
			let error = serde_json::from_value::<ResponseError>(raw.clone()).unwrap_or_else(|_| {
				ResponseError::new(ErrorCode::INTERNAL_ERROR, "malformed error response").with_data(raw.clone())
			});
			self.reject_request(&id, error);
		} else if let Some(result) = obj.get("result") {
			self.resolve_request(&id, result.clone());
		}
	}

	/// Routes an already-decoded response. Same rules as [`Self::handle_message`].
	pub fn handle_response(&self, response: Response) {
		match (response.error, response.result) {
			(Some(error), _) => self.reject_request(&response.id, error),
			(None, Some(result)) => self.resolve_request(&response.id, result),
			(None, None) => {}
		}
	}

	/// Stops tracking `id` without settling it.
	///
	/// Returns true if an entry was removed.
	pub fn cancel_request(&self, id: &RequestId) -> bool {
		let entry = self.state.lock().entries.remove(id);
		match entry {
			Some(entry) => {
				entry.timer.abort();
				debug!(id = %id, "tracker.cancel");
				true
			}
			None => false,
		}
	}

	/// Rejects every pending request with `reason` and empties the table.
	pub fn cancel_all_requests(&self, reason: Option<&str>) {
		let reason = reason.unwrap_or(DEFAULT_CANCEL_REASON);
		let drained: Vec<_> = self.state.lock().entries.drain().collect();
		if !drained.is_empty() {
			debug!(count = drained.len(), reason, "tracker.cancel_all");
		}
		for (id, entry) in drained {
			entry.settle(
				&id,
				Err(TrackerError::Cancelled {
					reason: reason.to_owned(),
				}),
			);
		}
	}
}

fn settle(state: &Mutex<TrackerState>, id: &RequestId, outcome: Outcome) {
	let entry = state.lock().entries.remove(id);
	match entry {
		Some(entry) => entry.settle(id, outcome),
		None => warn!(id = %id, "tracker.unknown_request"),
	}
}

fn spawn_timeout(state: Weak<Mutex<TrackerState>>, id: RequestId, generation: u64, delay: Duration) -> JoinHandle<()> {
	tokio::spawn(async move {
		tokio::time::sleep(delay).await;
		let Some(state) = state.upgrade() else {
			return;
		};
		let entry = {
			let mut guard = state.lock();
			match guard.entries.get(&id) {
				Some(entry) if entry.generation == generation => guard.entries.remove(&id),
				_ => None,
			}
		};
		if let Some(entry) = entry {
			warn!(id = %id, "tracker.timeout");
			let error = ResponseError::timed_out(&id);
			entry.settle(&id, Err(TrackerError::Rejected(error)));
		}
	})
}

#[cfg(test)]
mod tests;
