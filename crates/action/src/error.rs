use serde_json::Value as JsonValue;
use tandem_rpc::{ErrorCode, RequestId, ResponseError, TrackerError};
use thiserror::Error;

use crate::descriptor::{Executor, ValidationError};
use crate::phase::{Phase, Step};

/// Integration errors: an operation was called where it is not legal, or a
/// registry lookup failed.
///
/// These never enter an event's own error state; the event is left as it was.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ActionError {
	/// No descriptor is registered under the method.
	#[error("unknown action method: {0}")]
	UnknownMethod(String),
	/// Two descriptors share a method name.
	#[error("duplicate action method: {0}")]
	DuplicateMethod(String),
	/// The executor has no phases for this action.
	#[error("action {method} cannot run on the {executor}")]
	NotRunnable {
		/// Action method.
		method: String,
		/// Executor that tried to run it.
		executor: Executor,
	},
	/// The phase is not one this executor runs for the action.
	#[error("action {method} has no {phase} phase on the {executor}")]
	PhaseNotRunnable {
		/// Action method.
		method: String,
		/// Requested phase.
		phase: Phase,
		/// Executor that tried to run it.
		executor: Executor,
	},
	/// An event may only be constructed in an entry phase.
	#[error("{phase} is not an entry phase")]
	NotEntryPhase {
		/// Requested phase.
		phase: Phase,
	},
	/// The operation requires a different step.
	#[error("cannot {operation} in step {actual}, expected {expected}")]
	InvalidStep {
		/// Attempted operation.
		operation: &'static str,
		/// Step the operation requires.
		expected: Step,
		/// Current step.
		actual: Step,
	},
	/// The operation requires a different phase.
	#[error("cannot {operation} in phase {actual}, expected {expected}")]
	InvalidPhase {
		/// Attempted operation.
		operation: &'static str,
		/// Phase the operation requires.
		expected: Phase,
		/// Current phase.
		actual: Phase,
	},
	/// The kind has no edge between the two phases.
	#[error("no transition from {from} to {to}")]
	InvalidTransition {
		/// Current phase.
		from: Phase,
		/// Requested phase.
		to: Phase,
	},
	/// Synchronous dispatch was requested for an action that is not a
	/// synchronous local call.
	#[error("action {method} does not support synchronous dispatch")]
	SyncUnsupported {
		/// Action method.
		method: String,
	},
	/// Synchronous dispatch resolved an asynchronous handler.
	#[error("handler for {method} in {phase} is asynchronous")]
	AsyncHandler {
		/// Action method.
		method: String,
		/// Current phase.
		phase: Phase,
	},
	/// An envelope the operation depends on has not been set.
	#[error("cannot {operation}: no {envelope} has been set")]
	MissingEnvelope {
		/// Attempted operation.
		operation: &'static str,
		/// Missing envelope name.
		envelope: &'static str,
	},
	/// A message for another method was applied to this event.
	#[error("message for {actual} applied to action {expected}")]
	MethodMismatch {
		/// Method of this event.
		expected: String,
		/// Method carried by the message.
		actual: String,
	},
	/// A response does not answer this event's request.
	#[error("response {actual} does not answer request {expected}")]
	ResponseMismatch {
		/// Id of the outstanding request.
		expected: RequestId,
		/// Id carried by the response.
		actual: RequestId,
	},
	/// The environment's descriptor disagrees with restored state.
	#[error("descriptor for {method} is incompatible with the restored state")]
	IncompatibleDescriptor {
		/// Action method.
		method: String,
	},
	/// Event state could not be encoded or decoded.
	#[error("event state serialization failed: {0}")]
	Serialization(#[from] serde_json::Error),
}

/// Failure raised by a handler.
///
/// The event records it as an internal error and reroutes to the kind's
/// error phase.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct HandlerError {
	/// Description surfaced in the wire error.
	pub message: String,
	/// Optional structured detail.
	pub data: Option<JsonValue>,
}

impl HandlerError {
	/// Creates a handler error.
	pub fn new(message: impl Into<String>) -> Self {
		Self {
			message: message.into(),
			data: None,
		}
	}

	/// Attaches structured detail.
	#[must_use]
	pub fn with_data(mut self, data: JsonValue) -> Self {
		self.data = Some(data).filter(|d| !d.is_null());
		self
	}

	/// Wire form recorded on the event: always an internal error.
	#[must_use]
	pub fn into_response_error(self) -> ResponseError {
		let message = if self.message.is_empty() {
			"unknown error".to_owned()
		} else {
			self.message
		};
		ResponseError {
			code: ErrorCode::INTERNAL_ERROR,
			message,
			data: self.data.filter(|d| !d.is_null()),
		}
	}
}

impl From<serde_json::Error> for HandlerError {
	fn from(e: serde_json::Error) -> Self {
		Self::new(e.to_string())
	}
}

impl From<ValidationError> for HandlerError {
	fn from(e: ValidationError) -> Self {
		Self::new(e.to_string())
	}
}

impl From<ResponseError> for HandlerError {
	fn from(e: ResponseError) -> Self {
		Self {
			message: e.message,
			data: e.data.filter(|d| !d.is_null()),
		}
	}
}

impl From<TrackerError> for HandlerError {
	fn from(e: TrackerError) -> Self {
		e.into_response_error().into()
	}
}
