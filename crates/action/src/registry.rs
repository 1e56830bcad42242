//! Read-only catalog of action descriptors.

use std::collections::HashMap;
use std::sync::Arc;

use crate::descriptor::{ActionDescriptor, Executor};
use crate::error::ActionError;
use crate::phase::Phase;

/// Process-wide descriptor catalog keyed by method.
///
/// Built once from any iterable of descriptors and shared behind an `Arc`.
#[derive(Debug, Default, Clone)]
pub struct DescriptorRegistry {
	by_method: HashMap<String, Arc<ActionDescriptor>>,
}

impl DescriptorRegistry {
	/// Builds a registry.
	///
	/// # Errors
	///
	/// Returns [`ActionError::DuplicateMethod`] if two descriptors share a method.
	pub fn new(descriptors: impl IntoIterator<Item = ActionDescriptor>) -> Result<Self, ActionError> {
		let mut by_method = HashMap::new();
		for descriptor in descriptors {
			let method = descriptor.method.clone();
			if by_method.insert(method.clone(), Arc::new(descriptor)).is_some() {
				return Err(ActionError::DuplicateMethod(method));
			}
		}
		Ok(Self { by_method })
	}

	/// Looks up a descriptor.
	#[must_use]
	pub fn get(&self, method: &str) -> Option<Arc<ActionDescriptor>> {
		self.by_method.get(method).cloned()
	}

	/// Returns true if `method` is registered.
	#[must_use]
	pub fn contains(&self, method: &str) -> bool {
		self.by_method.contains_key(method)
	}

	/// Number of descriptors.
	#[must_use]
	pub fn len(&self) -> usize {
		self.by_method.len()
	}

	/// Returns true if the registry has no descriptors.
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.by_method.is_empty()
	}

	/// Iterates descriptors in no particular order.
	pub fn iter(&self) -> impl Iterator<Item = &Arc<ActionDescriptor>> {
		self.by_method.values()
	}

	/// Phases `role` runs for `method`, or `None` if it is unknown.
	#[must_use]
	pub fn phases(&self, method: &str, role: Executor) -> Option<Vec<Phase>> {
		self.by_method.get(method).map(|d| d.phases(role))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::descriptor::Initiator;

	#[test]
	fn rejects_duplicates() {
		let err = DescriptorRegistry::new([
			ActionDescriptor::request_response("fs.read", Initiator::Frontend),
			ActionDescriptor::notification("fs.read", Initiator::Backend),
		])
		.unwrap_err();
		assert!(matches!(err, ActionError::DuplicateMethod(m) if m == "fs.read"));
	}

	#[test]
	fn lookup_and_phases() {
		let registry = DescriptorRegistry::new([
			ActionDescriptor::request_response("fs.read", Initiator::Frontend),
			ActionDescriptor::local_call("ui.toggle", Initiator::Frontend, false),
		])
		.unwrap();

		assert_eq!(registry.len(), 2);
		assert!(registry.contains("ui.toggle"));
		assert!(registry.get("missing").is_none());
		assert_eq!(registry.phases("ui.toggle", Executor::Backend), Some(vec![]));
		assert_eq!(
			registry.phases("fs.read", Executor::Backend),
			Some(vec![Phase::ReceiveRequest, Phase::SendResponse, Phase::SendError])
		);
	}
}
