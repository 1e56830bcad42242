//! The capability interface through which events reach peer-specific behavior.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::descriptor::{ActionDescriptor, Executor};
use crate::error::ActionError;
use crate::handler::Handler;
use crate::phase::Phase;
use crate::registry::DescriptorRegistry;

/// Implemented once per peer.
pub trait Environment: Send + Sync {
	/// The role this peer plays.
	fn executor(&self) -> Executor;

	/// Resolves the handler for `method` in `phase`.
	fn lookup_handler(&self, method: &str, phase: Phase) -> Option<Handler>;

	/// Resolves the descriptor for `method`.
	fn lookup_descriptor(&self, method: &str) -> Option<Arc<ActionDescriptor>>;

	/// Whatever moves outbound messages to the other peer.
	///
	/// Opaque to the engine; handlers downcast it through
	/// [`crate::ActionEvent::transport`].
	fn transport(&self) -> &(dyn Any + Send + Sync);
}

/// [`Environment`] backed by a descriptor registry and a method → phase →
/// handler map.
pub struct PeerEnvironment<T> {
	executor: Executor,
	registry: Arc<DescriptorRegistry>,
	handlers: HashMap<String, HashMap<Phase, Handler>>,
	transport: T,
}

impl<T> PeerEnvironment<T>
where
	T: Send + Sync + 'static,
{
	/// Creates an environment without handlers.
	pub fn new(executor: Executor, registry: Arc<DescriptorRegistry>, transport: T) -> Self {
		Self {
			executor,
			registry,
			handlers: HashMap::new(),
			transport,
		}
	}

	/// Registers `handler` for `method` in `phase`, replacing any previous one.
	///
	/// # Errors
	///
	/// - [`ActionError::UnknownMethod`] if the registry has no such method.
	/// - [`ActionError::PhaseNotRunnable`] if this executor never runs `phase`
	///   for the method.
	pub fn register(&mut self, method: &str, phase: Phase, handler: Handler) -> Result<&mut Self, ActionError> {
		let descriptor = self
			.registry
			.get(method)
			.ok_or_else(|| ActionError::UnknownMethod(method.to_owned()))?;
		if !descriptor.phases(self.executor).contains(&phase) {
			return Err(ActionError::PhaseNotRunnable {
				method: method.to_owned(),
				phase,
				executor: self.executor,
			});
		}
		debug!(executor = %self.executor, method, %phase, sync = handler.is_sync(), "env.register");
		self.handlers.entry(method.to_owned()).or_default().insert(phase, handler);
		Ok(self)
	}

	/// Builder form of [`Self::register`].
	///
	/// # Errors
	///
	/// Same as [`Self::register`].
	pub fn with_handler(mut self, method: &str, phase: Phase, handler: Handler) -> Result<Self, ActionError> {
		self.register(method, phase, handler)?;
		Ok(self)
	}

	/// Removes the handler for `method` in `phase`.
	pub fn unregister(&mut self, method: &str, phase: Phase) -> Option<Handler> {
		self.handlers.get_mut(method)?.remove(&phase)
	}

	/// The shared descriptor registry.
	#[must_use]
	pub fn registry(&self) -> &Arc<DescriptorRegistry> {
		&self.registry
	}

	/// The outbound transport handle.
	#[must_use]
	pub fn outbound(&self) -> &T {
		&self.transport
	}
}

impl<T> fmt::Debug for PeerEnvironment<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let mut handlers: Vec<(&str, Phase)> = self
			.handlers
			.iter()
			.flat_map(|(method, phases)| phases.keys().map(move |phase| (method.as_str(), *phase)))
			.collect();
		handlers.sort_by(|a, b| a.0.cmp(b.0).then_with(|| a.1.as_str().cmp(b.1.as_str())));
		f.debug_struct("PeerEnvironment")
			.field("executor", &self.executor)
			.field("descriptors", &self.registry.len())
			.field("handlers", &handlers)
			.finish_non_exhaustive()
	}
}

impl<T> Environment for PeerEnvironment<T>
where
	T: Send + Sync + 'static,
{
	fn executor(&self) -> Executor {
		self.executor
	}

	fn lookup_handler(&self, method: &str, phase: Phase) -> Option<Handler> {
		self.handlers.get(method)?.get(&phase).cloned()
	}

	fn lookup_descriptor(&self, method: &str) -> Option<Arc<ActionDescriptor>> {
		self.registry.get(method)
	}

	fn transport(&self) -> &(dyn Any + Send + Sync) {
		&self.transport
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::descriptor::Initiator;

	fn env() -> PeerEnvironment<()> {
		let registry = DescriptorRegistry::new([
			ActionDescriptor::request_response("fs.read", Initiator::Frontend),
			ActionDescriptor::notification("log", Initiator::Backend),
		])
		.unwrap();
		PeerEnvironment::new(Executor::Backend, Arc::new(registry), ())
	}

	#[test]
	fn two_level_lookup() {
		let mut env = env();
		env.register("fs.read", Phase::ReceiveRequest, Handler::sync(|_| Ok(1.into())))
			.unwrap();

		assert!(env.lookup_handler("fs.read", Phase::ReceiveRequest).is_some());
		assert!(env.lookup_handler("fs.read", Phase::SendResponse).is_none());
		assert!(env.lookup_handler("log", Phase::Send).is_none());
		assert!(env.unregister("fs.read", Phase::ReceiveRequest).is_some());
		assert!(env.lookup_handler("fs.read", Phase::ReceiveRequest).is_none());
	}

	#[test]
	fn rejects_foreign_phases() {
		let mut env = env();
		let err = env
			.register("fs.read", Phase::SendRequest, Handler::sync(|_| Ok(().into())))
			.unwrap_err();
		assert!(matches!(err, ActionError::PhaseNotRunnable { phase: Phase::SendRequest, .. }));

		let err = env.register("nope", Phase::Execute, Handler::sync(|_| Ok(().into()))).unwrap_err();
		assert!(matches!(err, ActionError::UnknownMethod(m) if m == "nope"));
	}

	#[test]
	fn debug_lists_registered_handlers() {
		let mut env = env();
		env.register("fs.read", Phase::SendResponse, Handler::sync(|_| Ok(().into())))
			.unwrap()
			.register("fs.read", Phase::ReceiveRequest, Handler::sync(|_| Ok(().into())))
			.unwrap();

		let shown = format!("{env:?}");
		assert!(shown.starts_with("PeerEnvironment { executor: Backend, descriptors: 2"), "{shown}");
		assert!(
			shown.contains(r#"[("fs.read", ReceiveRequest), ("fs.read", SendResponse)]"#),
			"{shown}"
		);
	}

	#[test]
	fn transport_is_downcastable() {
		let env = env();
		assert!(env.transport().downcast_ref::<()>().is_some());
		assert!(env.transport().downcast_ref::<String>().is_none());
	}
}
