//! Network context: configuration, subscription scope and the shared-node cache.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::error::Result;
use crate::intern::QueryKey;
use crate::producer::Producer;
use crate::query::Query;
use crate::scope::QueryScope;

/// Network configuration.
#[derive(Debug, Clone)]
pub struct NetworkSpec {
	pub(crate) diagnostics: bool,
	pub(crate) observer_label: Arc<str>,
}

impl NetworkSpec {
	/// Verifies join memories after every token.
	///
	/// Also enabled whenever the scope performs additional checks.
	#[must_use]
	pub fn diagnostics(mut self, enabled: bool) -> Self {
		self.diagnostics = enabled;
		self
	}

	/// Sets the label observable nodes log under.
	#[must_use]
	pub fn observer_label(mut self, label: impl Into<Arc<str>>) -> Self {
		self.observer_label = label.into();
		self
	}

	pub fn label(&self) -> &str {
		&self.observer_label
	}
}

impl Default for NetworkSpec {
	fn default() -> Self {
		Self {
			diagnostics: false,
			observer_label: Arc::from("network"),
		}
	}
}

type SharedNode = Box<dyn Any + Send + Sync>;

/// Context queries build their producers in.
///
/// Interned queries with equal keys resolve to one cached node for as long
/// as the network lives or until [`Network::clear`].
pub struct Network {
	spec: NetworkSpec,
	scope: QueryScope,
	nodes: Mutex<FxHashMap<QueryKey, SharedNode>>,
}

impl Network {
	pub fn new(scope: QueryScope) -> Self {
		Self::with_spec(scope, NetworkSpec::default())
	}

	/// Network with no live fact store behind it.
	pub fn detached() -> Self {
		Self::new(QueryScope::Detached)
	}

	pub fn with_spec(scope: QueryScope, spec: NetworkSpec) -> Self {
		tracing::debug!(label = %spec.observer_label, detached = scope.is_detached(), diagnostics = spec.diagnostics, "network.new");
		Self {
			spec,
			scope,
			nodes: Mutex::new(FxHashMap::default()),
		}
	}

	pub fn scope(&self) -> &QueryScope {
		&self.scope
	}

	pub fn spec(&self) -> &NetworkSpec {
		&self.spec
	}

	/// Whether nodes verify their internal invariants.
	pub fn diagnostics(&self) -> bool {
		self.spec.diagnostics || self.scope.performs_additional_checks()
	}

	/// Builds the live producer of `query`.
	pub fn producer<T>(&self, query: &impl Query<T>) -> Result<Arc<dyn Producer<T>>> {
		query.producer(self)
	}

	/// Returns the node cached under `key`, building and caching it first if
	/// there is none.
	///
	/// `build` runs without the cache lock held, so it may resolve other
	/// shared nodes. A key already caching a node of another value type is
	/// left untouched and the freshly built node is returned uncached.
	pub fn shared_producer<T: 'static>(&self, key: &QueryKey, build: impl FnOnce() -> Result<Arc<dyn Producer<T>>>) -> Result<Arc<dyn Producer<T>>> {
		if let Some(existing) = self.nodes.lock().get(key).and_then(|node| node.downcast_ref::<Arc<dyn Producer<T>>>()) {
			tracing::trace!(key = ?key, "network.shared_hit");
			return Ok(Arc::clone(existing));
		}

		let built = build()?;
		let mut nodes = self.nodes.lock();
		match nodes.get(key) {
			None => {
				tracing::debug!(key = ?key, "network.shared_insert");
				nodes.insert(key.clone(), Box::new(Arc::clone(&built)));
				Ok(built)
			}
			Some(node) => match node.downcast_ref::<Arc<dyn Producer<T>>>() {
				Some(existing) => Ok(Arc::clone(existing)),
				None => {
					tracing::warn!(key = ?key, "network.shared_type_mismatch");
					Ok(built)
				}
			},
		}
	}

	/// Number of cached shared nodes.
	pub fn node_count(&self) -> usize {
		self.nodes.lock().len()
	}

	/// Drops every cached shared node.
	pub fn clear(&self) {
		let nodes = std::mem::take(&mut *self.nodes.lock());
		tracing::debug!(nodes = nodes.len(), "network.clear");
		drop(nodes);
	}
}

impl Default for Network {
	fn default() -> Self {
		Self::detached()
	}
}

impl fmt::Debug for Network {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Network")
			.field("spec", &self.spec)
			.field("scope", &self.scope)
			.field("nodes", &self.node_count())
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use strand_primitives::Match;

	use super::*;
	use crate::query::QueryExt;
	use crate::scope::LocalScope;
	use crate::source::SourceNode;

	#[test]
	fn equal_keys_share_one_node() {
		let network = Network::detached();
		let first = SourceNode::<u32>::new().interned("numbers");
		let second = SourceNode::<u32>::new().interned("numbers");

		let a = network.producer(&first).expect("build");
		let b = network.producer(&second).expect("build");
		assert!(Arc::ptr_eq(&a, &b));
		assert_eq!(network.node_count(), 1);
	}

	#[test]
	fn distinct_keys_build_distinct_nodes() {
		let network = Network::detached();
		let source = SourceNode::<u32>::new();
		let a = network.producer(&source.clone().interned(1u8)).expect("build");
		let b = network.producer(&source.interned(2u8)).expect("build");
		assert!(!Arc::ptr_eq(&a, &b));
		assert_eq!(network.node_count(), 2);
	}

	#[test]
	fn mismatched_value_type_is_not_cached() {
		let network = Network::detached();
		let _numbers = network.producer(&SourceNode::<u32>::new().interned("shared")).expect("build");
		let words = SourceNode::<&'static str>::new();
		words.assert(Match::new("w")).expect("no downstream");
		let other = network.producer(&words.interned("shared")).expect("build");
		assert_eq!(network.node_count(), 1);

		let seen = Arc::new(Mutex::new(Vec::new()));
		let sink = Arc::clone(&seen);
		let _subscription = other
			.collect(Box::new(move |token: strand_primitives::Token<&'static str>| -> Result<()> {
				sink.lock().push(*token.value());
				Ok(())
			}))
			.expect("snapshot");
		assert_eq!(*seen.lock(), vec!["w"]);
	}

	#[test]
	fn clear_drops_cached_nodes() {
		let network = Network::detached();
		let _node = network.producer(&SourceNode::<u8>::new().interned("n")).expect("build");
		network.clear();
		assert_eq!(network.node_count(), 0);
	}

	#[test]
	fn diagnostics_follow_spec_or_scope() {
		assert!(!Network::detached().diagnostics());
		assert!(Network::with_spec(QueryScope::Detached, NetworkSpec::default().diagnostics(true)).diagnostics());
		assert!(Network::new(QueryScope::live(LocalScope::with_additional_checks(true))).diagnostics());
		assert_eq!(NetworkSpec::default().observer_label("ui").label(), "ui");
	}
}
