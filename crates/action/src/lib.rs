//! Action invocation engine shared by the frontend and backend peers.
//!
//! An action is a named operation described by an [`ActionDescriptor`]. Each
//! invocation is driven by an [`ActionEvent`] through a (phase, step) state
//! machine:
//!
//! * [`ActionEvent::parse`] validates untrusted data against the descriptor.
//! * [`ActionEvent::handle`] runs the handler the [`Environment`] resolves for
//!   the current phase, rerouting failures to the kind's error phase.
//! * [`ActionEvent::transition`] advances to the next protocol phase.
//!
//! Peer-specific behavior enters only through [`Environment`];
//! [`PeerEnvironment`] is the map-backed implementation.

#![warn(missing_docs)]

pub mod descriptor;
pub mod environment;
mod error;
pub mod event;
pub mod handler;
pub mod phase;
pub mod registry;

pub use descriptor::{ActionDescriptor, ActionKind, AnyValue, Executor, Initiator, Typed, ValidationError, Validator};
pub use environment::{Environment, PeerEnvironment};
pub use error::{ActionError, HandlerError};
pub use event::{ActionEvent, ActionState, Observer};
pub use handler::{ActionHandler, Handler, HandlerResult, typed, typed_sync};
pub use phase::{Phase, Step, phases_for};
pub use registry::DescriptorRegistry;

// Only the integration tests install a subscriber.
#[cfg(test)]
use tracing_subscriber as _;

/// A convenient type alias for `Result` with `E` = [`ActionError`].
pub type Result<T, E = ActionError> = std::result::Result<T, E>;
