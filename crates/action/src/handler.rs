//! Business-logic handlers resolved per (method, phase).

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use crate::error::HandlerError;
use crate::event::{ActionEvent, ActionState};

/// Value a handler produces. Only output-producing phases keep it.
pub type HandlerResult = Result<JsonValue, HandlerError>;

/// Asynchronous handler.
#[async_trait]
pub trait ActionHandler: Send + Sync {
	/// Runs the handler against the event in its current phase.
	async fn call(&self, event: &ActionEvent) -> HandlerResult;
}

type SyncFn = dyn Fn(&ActionEvent) -> HandlerResult + Send + Sync;

/// A registered handler.
///
/// Synchronous handlers may serve [`ActionEvent::handle`] as well as
/// [`ActionEvent::handle_sync`]; asynchronous ones only the former.
#[derive(Clone)]
pub enum Handler {
	/// May suspend.
	Async(Arc<dyn ActionHandler>),
	/// Runs to completion without suspending.
	Sync(Arc<SyncFn>),
}

impl Handler {
	/// Wraps an [`ActionHandler`] implementation.
	pub fn from_handler(handler: impl ActionHandler + 'static) -> Self {
		Self::Async(Arc::new(handler))
	}

	/// Wraps an async closure receiving a snapshot of the event state.
	pub fn from_fn<F, Fut>(f: F) -> Self
	where
		F: Fn(ActionState) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = HandlerResult> + Send + 'static,
	{
		Self::Async(Arc::new(FnHandler(f)))
	}

	/// Wraps a synchronous closure.
	pub fn sync(f: impl Fn(&ActionEvent) -> HandlerResult + Send + Sync + 'static) -> Self {
		Self::Sync(Arc::new(f))
	}

	/// Returns true for [`Handler::Sync`].
	#[must_use]
	pub fn is_sync(&self) -> bool {
		matches!(self, Self::Sync(_))
	}

	pub(crate) async fn call(&self, event: &ActionEvent) -> HandlerResult {
		match self {
			Self::Async(handler) => handler.call(event).await,
			Self::Sync(f) => f(event),
		}
	}
}

impl fmt::Debug for Handler {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Self::Async(_) => "Handler::Async",
			Self::Sync(_) => "Handler::Sync",
		})
	}
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> ActionHandler for FnHandler<F>
where
	F: Fn(ActionState) -> Fut + Send + Sync,
	Fut: Future<Output = HandlerResult> + Send,
{
	async fn call(&self, event: &ActionEvent) -> HandlerResult {
		(self.0)(event.state().clone()).await
	}
}

/// Adapts an async function over typed input and output.
///
/// The event's input is decoded into `I`; a decode failure is a handler
/// failure. The returned `O` is encoded back to JSON.
pub fn typed<I, O, F, Fut>(f: F) -> Handler
where
	I: DeserializeOwned + Send + 'static,
	O: Serialize + Send + 'static,
	F: Fn(I) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = Result<O, HandlerError>> + Send + 'static,
{
	Handler::from_fn(move |state: ActionState| {
		let call = I::deserialize(&state.input).map(&f).map_err(HandlerError::from);
		async move {
			let output = call?.await?;
			Ok(serde_json::to_value(output)?)
		}
	})
}

/// Synchronous counterpart of [`typed`].
pub fn typed_sync<I, O, F>(f: F) -> Handler
where
	I: DeserializeOwned,
	O: Serialize,
	F: Fn(I) -> Result<O, HandlerError> + Send + Sync + 'static,
{
	Handler::sync(move |event: &ActionEvent| {
		let input = I::deserialize(event.input())?;
		Ok(serde_json::to_value(f(input)?)?)
	})
}
