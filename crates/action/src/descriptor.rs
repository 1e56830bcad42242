//! Static action descriptions and the validators they carry.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::phase::{Phase, phases_for};

/// How an action travels between peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
	/// A request answered by a correlated response.
	RequestResponse,
	/// A one-way message to the other peer.
	RemoteNotification,
	/// A call that never leaves the local peer.
	LocalCall,
}

impl ActionKind {
	/// Wire name of the kind.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::RequestResponse => "request_response",
			Self::RemoteNotification => "remote_notification",
			Self::LocalCall => "local_call",
		}
	}
}

impl fmt::Display for ActionKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Role an [`crate::ActionEvent`] runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Executor {
	/// The user-facing peer.
	Frontend,
	/// The privileged peer.
	Backend,
}

impl Executor {
	/// The opposite role.
	#[must_use]
	pub const fn peer(self) -> Self {
		match self {
			Self::Frontend => Self::Backend,
			Self::Backend => Self::Frontend,
		}
	}
}

impl fmt::Display for Executor {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Self::Frontend => "frontend",
			Self::Backend => "backend",
		})
	}
}

/// Which role may start an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Initiator {
	/// Only the frontend starts it.
	Frontend,
	/// Only the backend starts it.
	Backend,
	/// Either role starts it.
	Both,
	/// A value this build does not know. Grants no phases to any role.
	#[serde(other)]
	Unrecognized,
}

impl Initiator {
	/// Returns true if `role` may start the action.
	#[must_use]
	pub const fn can_initiate(self, role: Executor) -> bool {
		matches!(
			(self, role),
			(Self::Both, _) | (Self::Frontend, Executor::Frontend) | (Self::Backend, Executor::Backend)
		)
	}

	/// Returns true if `role` may be on the receiving end of the action.
	#[must_use]
	pub const fn can_receive(self, role: Executor) -> bool {
		matches!(
			(self, role),
			(Self::Both, _) | (Self::Frontend, Executor::Backend) | (Self::Backend, Executor::Frontend)
		)
	}
}

/// Validation failure message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ValidationError(pub String);

impl From<serde_json::Error> for ValidationError {
	fn from(e: serde_json::Error) -> Self {
		Self(e.to_string())
	}
}

/// Checks untrusted data, returning the accepted (possibly normalized) value.
pub trait Validator: Send + Sync {
	/// Validates `value`.
	///
	/// # Errors
	///
	/// Returns a [`ValidationError`] describing why `value` was refused.
	fn validate(&self, value: &JsonValue) -> Result<JsonValue, ValidationError>;
}

impl<F> Validator for F
where
	F: Fn(&JsonValue) -> Result<JsonValue, ValidationError> + Send + Sync,
{
	fn validate(&self, value: &JsonValue) -> Result<JsonValue, ValidationError> {
		self(value)
	}
}

/// Accepts every value unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct AnyValue;

impl Validator for AnyValue {
	fn validate(&self, value: &JsonValue) -> Result<JsonValue, ValidationError> {
		Ok(value.clone())
	}
}

/// Accepts values that deserialize into `T`, normalized through `T`'s
/// serializer (defaults filled, unknown fields dropped unless `T` denies them).
pub struct Typed<T>(PhantomData<fn() -> T>);

impl<T> Typed<T> {
	/// Creates the validator.
	#[must_use]
	pub const fn new() -> Self {
		Self(PhantomData)
	}
}

impl<T> Default for Typed<T> {
	fn default() -> Self {
		Self::new()
	}
}

impl<T> fmt::Debug for Typed<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "Typed<{}>", std::any::type_name::<T>())
	}
}

impl<T> Validator for Typed<T>
where
	T: DeserializeOwned + Serialize,
{
	fn validate(&self, value: &JsonValue) -> Result<JsonValue, ValidationError> {
		let typed = T::deserialize(value)?;
		Ok(serde_json::to_value(typed)?)
	}
}

/// Immutable description of one action.
#[derive(Clone)]
pub struct ActionDescriptor {
	/// Unique method name.
	pub method: String,
	/// How the action travels.
	pub kind: ActionKind,
	/// Which role starts it.
	pub initiator: Initiator,
	/// Validator for input and request/notification params.
	pub input: Arc<dyn Validator>,
	/// Validator for handler output and response results.
	pub output: Arc<dyn Validator>,
	/// Whether a local call's handler may suspend. Always true for remote kinds.
	pub is_async: bool,
}

impl ActionDescriptor {
	fn new(method: impl Into<String>, kind: ActionKind, initiator: Initiator, is_async: bool) -> Self {
		Self {
			method: method.into(),
			kind,
			initiator,
			input: Arc::new(AnyValue),
			output: Arc::new(AnyValue),
			is_async,
		}
	}

	/// Describes a request/response action.
	pub fn request_response(method: impl Into<String>, initiator: Initiator) -> Self {
		Self::new(method, ActionKind::RequestResponse, initiator, true)
	}

	/// Describes a one-way notification.
	pub fn notification(method: impl Into<String>, initiator: Initiator) -> Self {
		Self::new(method, ActionKind::RemoteNotification, initiator, true)
	}

	/// Describes a local call.
	pub fn local_call(method: impl Into<String>, initiator: Initiator, is_async: bool) -> Self {
		Self::new(method, ActionKind::LocalCall, initiator, is_async)
	}

	/// Replaces the input validator.
	#[must_use]
	pub fn with_input(mut self, validator: impl Validator + 'static) -> Self {
		self.input = Arc::new(validator);
		self
	}

	/// Replaces the output validator.
	#[must_use]
	pub fn with_output(mut self, validator: impl Validator + 'static) -> Self {
		self.output = Arc::new(validator);
		self
	}

	/// Phases `role` must be prepared to run for this action.
	#[must_use]
	pub fn phases(&self, role: Executor) -> Vec<Phase> {
		phases_for(self.kind, self.initiator, role)
	}

	/// Returns true if the action may be dispatched synchronously.
	#[must_use]
	pub fn supports_sync(&self) -> bool {
		self.kind == ActionKind::LocalCall && !self.is_async
	}
}

impl fmt::Debug for ActionDescriptor {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ActionDescriptor")
			.field("method", &self.method)
			.field("kind", &self.kind)
			.field("initiator", &self.initiator)
			.field("is_async", &self.is_async)
			.finish_non_exhaustive()
	}
}
