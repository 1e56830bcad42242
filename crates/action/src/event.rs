//! The per-invocation action state machine.
//!
//! State is the pair (phase, step). `step` walks `initial → parsed → handled`
//! inside a phase; `failed` is a hard terminal. A handler failure does not
//! fail the event: it records an internal error and reroutes to the kind's
//! error phase, whose handler gets exactly one chance to recover.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tandem_rpc::{ErrorCode, Notification, Request, RequestId, Response, ResponseError};
use tracing::{debug, trace, warn};

use crate::descriptor::{ActionDescriptor, ActionKind, Executor};
use crate::environment::Environment;
use crate::error::ActionError;
use crate::handler::{Handler, HandlerResult};
use crate::phase::{Phase, Step, error_phase, next_phases};
use crate::Result;

/// Complete mutable state of an [`ActionEvent`].
///
/// This is the serialized form: every field is always present, absent values
/// encode as `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionState {
	/// Kind of the action.
	pub kind: ActionKind,
	/// Current protocol phase.
	pub phase: Phase,
	/// Processing stage within the phase.
	pub step: Step,
	/// Action method.
	pub method: String,
	/// Role running this event.
	pub executor: Executor,
	/// Input, or params of a received request/notification.
	pub input: JsonValue,
	/// Handler output or response result.
	pub output: Option<JsonValue>,
	/// Recorded wire error.
	pub error: Option<ResponseError>,
	/// Outbound or received request envelope.
	pub request: Option<Request>,
	/// Outbound or received response envelope.
	pub response: Option<Response>,
	/// Outbound or received notification envelope.
	pub notification: Option<Notification>,
}

type Listener = Arc<dyn Fn(&ActionState, &ActionState) + Send + Sync>;

#[derive(Default)]
struct Listeners {
	next_id: u64,
	entries: Vec<(u64, Listener)>,
}

/// Registration returned by [`ActionEvent::observe`].
#[derive(Debug)]
pub struct Observer {
	id: u64,
	listeners: Weak<Mutex<Listeners>>,
}

impl Observer {
	/// Stops the listener from receiving further updates.
	///
	/// Returns false if it was already gone.
	pub fn unregister(self) -> bool {
		let Some(listeners) = self.listeners.upgrade() else {
			return false;
		};
		let mut listeners = listeners.lock();
		let before = listeners.entries.len();
		listeners.entries.retain(|(id, _)| *id != self.id);
		listeners.entries.len() != before
	}
}

/// Outcome of validating the current phase's data.
enum Parsed {
	/// Valid input; replaces the stored input.
	Input(JsonValue),
	/// Valid output; replaces the stored output.
	Output(JsonValue),
	/// Nothing to validate.
	Unchanged,
	/// Local data is invalid; the event fails.
	Invalid(ResponseError),
	/// Received data carries or causes an error; continue in `phase`.
	Reroute(Phase, ResponseError),
}

/// One action invocation bound to an [`Environment`].
pub struct ActionEvent {
	state: ActionState,
	descriptor: Arc<ActionDescriptor>,
	env: Arc<dyn Environment>,
	listeners: Arc<Mutex<Listeners>>,
}

impl fmt::Debug for ActionEvent {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ActionEvent")
			.field("state", &self.state)
			.field("descriptor", &self.descriptor)
			.finish_non_exhaustive()
	}
}

impl ActionEvent {
	/// Creates an event in the first phase this executor runs for `method`.
	///
	/// # Errors
	///
	/// - [`ActionError::UnknownMethod`] if the environment has no descriptor.
	/// - [`ActionError::NotRunnable`] if the executor has no phases for it.
	pub fn new(env: Arc<dyn Environment>, method: &str, input: JsonValue) -> Result<Self> {
		let descriptor = resolve(env.as_ref(), method)?;
		let executor = env.executor();
		let phase = descriptor
			.phases(executor)
			.first()
			.copied()
			.ok_or_else(|| ActionError::NotRunnable {
				method: method.to_owned(),
				executor,
			})?;
		Ok(Self::build(env, descriptor, phase, input))
	}

	/// Creates an event in a specific entry phase.
	///
	/// # Errors
	///
	/// - [`ActionError::UnknownMethod`] if the environment has no descriptor.
	/// - [`ActionError::NotEntryPhase`] if `phase` cannot start an event.
	/// - [`ActionError::PhaseNotRunnable`] if the executor never runs `phase`.
	pub fn with_phase(env: Arc<dyn Environment>, method: &str, phase: Phase, input: JsonValue) -> Result<Self> {
		if !phase.is_entry() {
			return Err(ActionError::NotEntryPhase { phase });
		}
		let descriptor = resolve(env.as_ref(), method)?;
		let executor = env.executor();
		if !descriptor.phases(executor).contains(&phase) {
			return Err(ActionError::PhaseNotRunnable {
				method: method.to_owned(),
				phase,
				executor,
			});
		}
		Ok(Self::build(env, descriptor, phase, input))
	}

	/// Creates a `receive_request` event for an inbound request.
	///
	/// # Errors
	///
	/// Same as [`Self::with_phase`].
	pub fn from_request(env: Arc<dyn Environment>, request: Request) -> Result<Self> {
		let mut event = Self::with_phase(env, &request.method, Phase::ReceiveRequest, JsonValue::Null)?;
		event.set_request(request)?;
		Ok(event)
	}

	/// Creates a `receive` event for an inbound notification.
	///
	/// # Errors
	///
	/// Same as [`Self::with_phase`].
	pub fn from_notification(env: Arc<dyn Environment>, notification: Notification) -> Result<Self> {
		let mut event = Self::with_phase(env, &notification.method, Phase::Receive, JsonValue::Null)?;
		event.set_notification(notification)?;
		Ok(event)
	}

	/// Restores an event from [`Self::serialize`] output.
	///
	/// # Errors
	///
	/// - [`ActionError::Serialization`] if `data` is not a serialized event.
	/// - [`ActionError::UnknownMethod`] if `env` does not know the method.
	/// - [`ActionError::IncompatibleDescriptor`] if the kinds disagree.
	pub fn deserialize(data: JsonValue, env: Arc<dyn Environment>) -> Result<Self> {
		let state: ActionState = serde_json::from_value(data)?;
		let descriptor = resolve(env.as_ref(), &state.method)?;
		if descriptor.kind != state.kind {
			return Err(ActionError::IncompatibleDescriptor { method: state.method });
		}
		if state.executor != env.executor() {
			debug!(method = %state.method, from = %state.executor, to = %env.executor(), "action.restore_foreign");
		}
		Ok(Self {
			state,
			descriptor,
			env,
			listeners: Arc::default(),
		})
	}

	fn build(env: Arc<dyn Environment>, descriptor: Arc<ActionDescriptor>, phase: Phase, input: JsonValue) -> Self {
		let state = ActionState {
			kind: descriptor.kind,
			phase,
			step: Step::Initial,
			method: descriptor.method.clone(),
			executor: env.executor(),
			input,
			output: None,
			error: None,
			request: None,
			response: None,
			notification: None,
		};
		Self {
			state,
			descriptor,
			env,
			listeners: Arc::default(),
		}
	}

	/// Captures the full state as JSON.
	///
	/// # Errors
	///
	/// Returns [`ActionError::Serialization`] if a payload cannot be encoded.
	pub fn serialize(&self) -> Result<JsonValue> {
		Ok(serde_json::to_value(&self.state)?)
	}

	/// Snapshot of the current state.
	#[must_use]
	pub fn state(&self) -> &ActionState {
		&self.state
	}

	/// The descriptor this event runs.
	#[must_use]
	pub fn descriptor(&self) -> &Arc<ActionDescriptor> {
		&self.descriptor
	}

	/// The environment this event is bound to.
	#[must_use]
	pub fn environment(&self) -> &Arc<dyn Environment> {
		&self.env
	}

	/// The environment's transport, if it is a `T`.
	#[must_use]
	pub fn transport<T: Any>(&self) -> Option<&T> {
		self.env.transport().downcast_ref::<T>()
	}

	/// Action method.
	#[must_use]
	pub fn method(&self) -> &str {
		&self.state.method
	}

	/// Kind of the action.
	#[must_use]
	pub fn kind(&self) -> ActionKind {
		self.state.kind
	}

	/// Current phase.
	#[must_use]
	pub fn phase(&self) -> Phase {
		self.state.phase
	}

	/// Current step.
	#[must_use]
	pub fn step(&self) -> Step {
		self.state.step
	}

	/// Role running this event.
	#[must_use]
	pub fn executor(&self) -> Executor {
		self.state.executor
	}

	/// Current input.
	#[must_use]
	pub fn input(&self) -> &JsonValue {
		&self.state.input
	}

	/// Handler output or response result.
	#[must_use]
	pub fn output(&self) -> Option<&JsonValue> {
		self.state.output.as_ref()
	}

	/// Recorded wire error.
	#[must_use]
	pub fn error(&self) -> Option<&ResponseError> {
		self.state.error.as_ref()
	}

	/// Request envelope.
	#[must_use]
	pub fn request(&self) -> Option<&Request> {
		self.state.request.as_ref()
	}

	/// Response envelope.
	#[must_use]
	pub fn response(&self) -> Option<&Response> {
		self.state.response.as_ref()
	}

	/// Notification envelope.
	#[must_use]
	pub fn notification(&self) -> Option<&Notification> {
		self.state.notification.as_ref()
	}

	/// Returns true once the event has nothing left to do.
	#[must_use]
	pub fn is_complete(&self) -> bool {
		match self.state.step {
			Step::Failed => true,
			Step::Handled => self.state.phase.is_terminal(),
			Step::Initial | Step::Parsed => false,
		}
	}

	/// Registers `listener`, called with (new, old) after every mutation.
	pub fn observe(&self, listener: impl Fn(&ActionState, &ActionState) + Send + Sync + 'static) -> Observer {
		let mut listeners = self.listeners.lock();
		let id = listeners.next_id;
		listeners.next_id += 1;
		listeners.entries.push((id, Arc::new(listener)));
		Observer {
			id,
			listeners: Arc::downgrade(&self.listeners),
		}
	}

	/// Validates the current phase's data.
	///
	/// Local data that fails validation fails the event with an
	/// invalid-params error. A received response carrying an error, or whose
	/// result fails validation, reroutes to `receive_error` instead.
	///
	/// # Errors
	///
	/// - [`ActionError::InvalidStep`] unless the step is `initial`.
	/// - [`ActionError::MissingEnvelope`] in `receive_response` before
	///   [`Self::set_response`].
	pub fn parse(&mut self) -> Result<()> {
		self.expect_step("parse", Step::Initial)?;
		match self.validate()? {
			Parsed::Input(input) => self.mutate(|s| {
				s.step = Step::Parsed;
				match s.phase {
					Phase::SendRequest => {
						let id = s.request.as_ref().map_or_else(RequestId::fresh, |req| req.id.clone());
						s.request = Some(Request::new(id, s.method.clone(), non_null(input.clone())));
					}
					Phase::Send => s.notification = Some(Notification::new(s.method.clone(), input.clone())),
					_ => {}
				}
				s.input = input;
			}),
			Parsed::Output(output) => self.mutate(|s| {
				s.step = Step::Parsed;
				if s.phase == Phase::SendResponse {
					if let Some(response) = s.response.as_mut() {
						response.result = Some(output.clone());
					}
				}
				s.output = non_null(output);
			}),
			Parsed::Unchanged => self.mutate(|s| s.step = Step::Parsed),
			Parsed::Invalid(error) => {
				warn!(method = %self.state.method, phase = %self.state.phase, error = %error, "action.invalid");
				self.mutate(|s| {
					s.step = Step::Failed;
					s.error = Some(error);
				});
			}
			Parsed::Reroute(phase, error) => {
				debug!(method = %self.state.method, to = %phase, error = %error, "action.reroute");
				self.mutate(|s| {
					s.step = Step::Parsed;
					s.phase = phase;
					s.output = None;
					s.error = Some(error);
				});
			}
		}
		Ok(())
	}

	fn validate(&self) -> Result<Parsed> {
		let s = &self.state;
		Ok(match s.phase {
			Phase::SendRequest | Phase::ReceiveRequest | Phase::Send | Phase::Receive | Phase::Execute => {
				match self.descriptor.input.validate(&s.input) {
					Ok(input) => Parsed::Input(input),
					Err(e) => self.invalid(format_args!("failed to parse input: {e}")),
				}
			}
			Phase::SendResponse => {
				let output = s.output.clone().unwrap_or_default();
				match self.descriptor.output.validate(&output) {
					Ok(output) => Parsed::Output(output),
					Err(e) => self.invalid(format_args!("failed to parse output: {e}")),
				}
			}
			Phase::ReceiveResponse => {
				let response = s.response.as_ref().ok_or(ActionError::MissingEnvelope {
					operation: "parse",
					envelope: "response",
				})?;
				if let Some(error) = &response.error {
					Parsed::Reroute(Phase::ReceiveError, error.clone())
				} else {
					let result = response.result.clone().unwrap_or_default();
					match self.descriptor.output.validate(&result) {
						Ok(output) => Parsed::Output(output),
						Err(e) => Parsed::Reroute(
							Phase::ReceiveError,
							ResponseError::new(ErrorCode::INVALID_PARAMS, format_args!("failed to parse response: {e}")),
						),
					}
				}
			}
			Phase::SendError | Phase::ReceiveError => Parsed::Unchanged,
		})
	}

	fn invalid(&self, message: fmt::Arguments<'_>) -> Parsed {
		Parsed::Invalid(ResponseError::new(ErrorCode::INVALID_PARAMS, message))
	}

	/// Runs the handler for the current phase.
	///
	/// A missing handler counts as success. A failing handler reroutes to the
	/// kind's error phase, leaving the step `parsed` so a second call runs the
	/// error handler; a failure there, or in a kind without an error phase,
	/// fails the event.
	///
	/// # Errors
	///
	/// [`ActionError::InvalidStep`] unless the step is `parsed`. Does nothing
	/// once the event has failed.
	pub async fn handle(&mut self) -> Result<()> {
		if self.state.step == Step::Failed {
			return Ok(());
		}
		self.expect_step("handle", Step::Parsed)?;
		let result = match self.env.lookup_handler(&self.state.method, self.state.phase) {
			Some(handler) => Some(handler.call(self).await),
			None => None,
		};
		self.apply(result);
		Ok(())
	}

	/// Synchronous [`Self::handle`] for local calls declared non-async.
	///
	/// # Errors
	///
	/// - [`ActionError::SyncUnsupported`] for any other action, before any
	///   state is touched.
	/// - [`ActionError::InvalidStep`] unless the step is `parsed`.
	/// - [`ActionError::AsyncHandler`] if the resolved handler can suspend.
	pub fn handle_sync(&mut self) -> Result<()> {
		if !self.descriptor.supports_sync() {
			return Err(ActionError::SyncUnsupported {
				method: self.state.method.clone(),
			});
		}
		if self.state.step == Step::Failed {
			return Ok(());
		}
		self.expect_step("handle", Step::Parsed)?;
		let result = match self.env.lookup_handler(&self.state.method, self.state.phase) {
			Some(Handler::Sync(f)) => Some(f(&*self)),
			Some(Handler::Async(_)) => {
				return Err(ActionError::AsyncHandler {
					method: self.state.method.clone(),
					phase: self.state.phase,
				});
			}
			None => None,
		};
		self.apply(result);
		Ok(())
	}

	fn apply(&mut self, result: Option<HandlerResult>) {
		let phase = self.state.phase;
		match result {
			None => {
				trace!(method = %self.state.method, %phase, "action.no_handler");
				self.mutate(|s| s.step = Step::Handled);
			}
			Some(Ok(value)) => self.mutate(|s| {
				if phase.produces_output() {
					s.output = non_null(value);
				}
				s.step = Step::Handled;
			}),
			Some(Err(err)) => {
				let error = err.into_response_error();
				warn!(method = %self.state.method, %phase, error = %error, "action.handler_failed");
				let reroute = if phase.is_error() {
					None
				} else {
					error_phase(self.state.kind, phase)
				};
				match reroute {
					Some(next) => self.mutate(|s| {
						s.phase = next;
						if matches!(phase, Phase::ReceiveRequest | Phase::SendResponse) {
							s.output = None;
							s.response = s.request.as_ref().map(|req| Response::err(req.id.clone(), error.clone()));
						}
						s.error = Some(error);
					}),
					None => self.mutate(|s| {
						s.step = Step::Failed;
						s.error = Some(error);
					}),
				}
			}
		}
	}

	/// Advances to `next`, resetting the step to `initial`.
	///
	/// `receive_request → send_response` builds the response from the output;
	/// `send_request → receive_response` keeps the request for correlation.
	///
	/// # Errors
	///
	/// - [`ActionError::InvalidStep`] unless the step is `handled`.
	/// - [`ActionError::InvalidTransition`] if the kind has no such edge.
	/// - [`ActionError::MissingEnvelope`] when entering `send_response`
	///   without a request to answer.
	///
	/// Does nothing once the event has failed.
	pub fn transition(&mut self, next: Phase) -> Result<()> {
		if self.state.step == Step::Failed {
			return Ok(());
		}
		self.expect_step("transition", Step::Handled)?;
		let from = self.state.phase;
		if !next_phases(self.state.kind, from).contains(&next) {
			return Err(ActionError::InvalidTransition { from, to: next });
		}
		let response = match next {
			Phase::SendResponse => {
				let request = self.state.request.as_ref().ok_or(ActionError::MissingEnvelope {
					operation: "transition",
					envelope: "request",
				})?;
				let result = self.state.output.clone().unwrap_or_default();
				Some(Response::ok(request.id.clone(), result))
			}
			_ => None,
		};
		debug!(method = %self.state.method, %from, to = %next, "action.transition");
		self.mutate(|s| {
			s.phase = next;
			s.step = Step::Initial;
			if next == Phase::ReceiveResponse {
				s.output = None;
			}
			s.response = response;
		});
		Ok(())
	}

	/// Records an inbound request. Legal only in `receive_request` before
	/// [`Self::parse`].
	///
	/// # Errors
	///
	/// - [`ActionError::InvalidPhase`] in any other phase.
	/// - [`ActionError::InvalidStep`] unless the step is `initial`.
	/// - [`ActionError::MethodMismatch`] for another action's request.
	pub fn set_request(&mut self, mut request: Request) -> Result<()> {
		self.expect_phase("set_request", Phase::ReceiveRequest)?;
		self.expect_step("set_request", Step::Initial)?;
		self.expect_method(&request.method)?;
		request.params = request.params.and_then(non_null);
		self.mutate(|s| {
			s.input = request.params.clone().unwrap_or_default();
			s.request = Some(request);
		});
		Ok(())
	}

	/// Records the response to this event's request. Legal only in
	/// `receive_response` before [`Self::parse`].
	///
	/// The result becomes the output; a wire error is kept for [`Self::parse`]
	/// to reroute on.
	///
	/// # Errors
	///
	/// - [`ActionError::InvalidPhase`] in any other phase.
	/// - [`ActionError::InvalidStep`] unless the step is `initial`.
	/// - [`ActionError::ResponseMismatch`] if it answers another request.
	pub fn set_response(&mut self, mut response: Response) -> Result<()> {
		self.expect_phase("set_response", Phase::ReceiveResponse)?;
		self.expect_step("set_response", Step::Initial)?;
		if let Some(request) = &self.state.request {
			if request.id != response.id {
				return Err(ActionError::ResponseMismatch {
					expected: request.id.clone(),
					actual: response.id,
				});
			}
		}
		if let Some(error) = response.error.as_mut() {
			error.data = error.data.take().and_then(non_null);
		}
		self.mutate(|s| {
			match &response.error {
				Some(error) => {
					s.output = None;
					s.error = Some(error.clone());
				}
				None => {
					s.output = response.result.clone().and_then(non_null);
					s.error = None;
				}
			}
			s.response = Some(response);
		});
		Ok(())
	}

	/// Records an inbound notification. Legal only in `receive` before
	/// [`Self::parse`].
	///
	/// # Errors
	///
	/// - [`ActionError::InvalidPhase`] in any other phase.
	/// - [`ActionError::InvalidStep`] unless the step is `initial`.
	/// - [`ActionError::MethodMismatch`] for another action's notification.
	pub fn set_notification(&mut self, notification: Notification) -> Result<()> {
		self.expect_phase("set_notification", Phase::Receive)?;
		self.expect_step("set_notification", Step::Initial)?;
		self.expect_method(&notification.method)?;
		self.mutate(|s| {
			s.input = notification.params.clone();
			s.notification = Some(notification);
		});
		Ok(())
	}

	/// Parses and handles the current phase, then handles the error phase if
	/// the first pass rerouted there.
	///
	/// Returns [`Self::is_complete`].
	///
	/// # Errors
	///
	/// Any misuse error from [`Self::parse`] or [`Self::handle`].
	pub async fn process(&mut self) -> Result<bool> {
		self.parse()?;
		self.handle().await?;
		if self.state.step == Step::Parsed && self.state.phase.is_error() {
			self.handle().await?;
		}
		Ok(self.is_complete())
	}

	fn expect_step(&self, operation: &'static str, expected: Step) -> Result<()> {
		if self.state.step == expected {
			Ok(())
		} else {
			Err(ActionError::InvalidStep {
				operation,
				expected,
				actual: self.state.step,
			})
		}
	}

	fn expect_phase(&self, operation: &'static str, expected: Phase) -> Result<()> {
		if self.state.phase == expected {
			Ok(())
		} else {
			Err(ActionError::InvalidPhase {
				operation,
				expected,
				actual: self.state.phase,
			})
		}
	}

	fn expect_method(&self, method: &str) -> Result<()> {
		if self.state.method == method {
			Ok(())
		} else {
			Err(ActionError::MethodMismatch {
				expected: self.state.method.clone(),
				actual: method.to_owned(),
			})
		}
	}

	fn mutate(&mut self, f: impl FnOnce(&mut ActionState)) {
		let old = self.state.clone();
		f(&mut self.state);
		trace!(
			method = %self.state.method,
			phase = %self.state.phase,
			step = %self.state.step,
			"action.state"
		);
		let listeners: Vec<Listener> = self.listeners.lock().entries.iter().map(|(_, l)| Arc::clone(l)).collect();
		for listener in listeners {
			listener(&self.state, &old);
		}
	}
}

fn resolve(env: &dyn Environment, method: &str) -> Result<Arc<ActionDescriptor>> {
	env.lookup_descriptor(method)
		.ok_or_else(|| ActionError::UnknownMethod(method.to_owned()))
}

/// `null` is stored as absent so the serialized form restores identically.
fn non_null(value: JsonValue) -> Option<JsonValue> {
	Some(value).filter(|v| !v.is_null())
}
