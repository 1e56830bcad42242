//! Protocol phases, processing steps, and the tables relating them to kinds.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::descriptor::{ActionKind, Executor, Initiator};

/// Protocol phase within an action's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
	/// Initiator builds and sends a request.
	SendRequest,
	/// Initiator consumes the correlated response.
	ReceiveResponse,
	/// A failure is reported to, or recovered on behalf of, the other peer.
	SendError,
	/// Initiator consumes an error reply.
	ReceiveError,
	/// Receiver consumes a request and produces output.
	ReceiveRequest,
	/// Receiver sends the response carrying that output.
	SendResponse,
	/// Initiator emits a notification.
	Send,
	/// Receiver consumes a notification.
	Receive,
	/// Local call runs.
	Execute,
}

impl Phase {
	/// Wire name of the phase.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::SendRequest => "send_request",
			Self::ReceiveResponse => "receive_response",
			Self::SendError => "send_error",
			Self::ReceiveError => "receive_error",
			Self::ReceiveRequest => "receive_request",
			Self::SendResponse => "send_response",
			Self::Send => "send",
			Self::Receive => "receive",
			Self::Execute => "execute",
		}
	}

	/// Phases an event may be constructed in.
	pub const fn is_entry(self) -> bool {
		matches!(
			self,
			Self::SendRequest | Self::ReceiveRequest | Self::Send | Self::Receive | Self::Execute
		)
	}

	/// Error phases. They have no outgoing edges.
	pub const fn is_error(self) -> bool {
		matches!(self, Self::SendError | Self::ReceiveError)
	}

	/// Phases after which a handled event is complete.
	pub const fn is_terminal(self) -> bool {
		match self {
			Self::ReceiveResponse
			| Self::SendResponse
			| Self::Send
			| Self::Receive
			| Self::Execute
			| Self::SendError
			| Self::ReceiveError => true,
			Self::SendRequest | Self::ReceiveRequest => false,
		}
	}

	/// Phases whose handler result becomes the event's output.
	pub const fn produces_output(self) -> bool {
		matches!(self, Self::ReceiveRequest | Self::Execute)
	}
}

impl fmt::Display for Phase {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Processing stage within the current phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
	/// Just entered the phase.
	Initial,
	/// Validated and ready for dispatch.
	Parsed,
	/// The phase's handler ran to completion.
	Handled,
	/// Hard terminal. No further operation has any effect.
	Failed,
}

impl fmt::Display for Step {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Self::Initial => "initial",
			Self::Parsed => "parsed",
			Self::Handled => "handled",
			Self::Failed => "failed",
		})
	}
}

const INITIATE_REQUEST: [Phase; 4] = [
	Phase::SendRequest,
	Phase::ReceiveResponse,
	Phase::SendError,
	Phase::ReceiveError,
];
const RECEIVE_REQUEST: [Phase; 3] = [Phase::ReceiveRequest, Phase::SendResponse, Phase::SendError];

/// Ordered phases `role` must be prepared to run for an action.
///
/// With [`Initiator::Both`] a role gets the union of both sides, initiating
/// phases first. [`Initiator::Unrecognized`] yields nothing.
#[must_use]
pub fn phases_for(kind: ActionKind, initiator: Initiator, role: Executor) -> Vec<Phase> {
	let initiates = initiator.can_initiate(role);
	let receives = initiator.can_receive(role);
	let mut phases = Vec::new();
	match kind {
		ActionKind::RequestResponse => {
			if initiates {
				phases.extend(INITIATE_REQUEST);
			}
			if receives {
				for phase in RECEIVE_REQUEST {
					if !phases.contains(&phase) {
						phases.push(phase);
					}
				}
			}
		}
		ActionKind::RemoteNotification => {
			if initiates {
				phases.push(Phase::Send);
			}
			if receives {
				phases.push(Phase::Receive);
			}
		}
		ActionKind::LocalCall => {
			if initiates {
				phases.push(Phase::Execute);
			}
		}
	}
	phases
}

/// Phases reachable from `phase` by [`crate::ActionEvent::transition`].
#[must_use]
pub const fn next_phases(kind: ActionKind, phase: Phase) -> &'static [Phase] {
	match (kind, phase) {
		(ActionKind::RequestResponse, Phase::SendRequest) => &[Phase::ReceiveResponse],
		(ActionKind::RequestResponse, Phase::ReceiveRequest) => &[Phase::SendResponse],
		_ => &[],
	}
}

/// Error phase a failure in `phase` reroutes to, if the kind has one.
#[must_use]
pub const fn error_phase(kind: ActionKind, phase: Phase) -> Option<Phase> {
	match (kind, phase) {
		(ActionKind::RequestResponse, Phase::SendRequest | Phase::ReceiveRequest | Phase::SendResponse) => {
			Some(Phase::SendError)
		}
		(ActionKind::RequestResponse, Phase::ReceiveResponse) => Some(Phase::ReceiveError),
		_ => None,
	}
}

#[cfg(test)]
mod tests;
