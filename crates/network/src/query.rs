//! Query descriptions and their stateless combinators.

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use strand_primitives::{TerminalId, Token};

use crate::error::Result;
use crate::intern::InternedQuery;
use crate::network::Network;
use crate::observable::ObservableQuery;
use crate::producer::{BoxCollector, Producer, Subscription};

/// Reusable description of an incremental computation.
///
/// Building a producer wires the nodes the query needs; the [`Network`]
/// supplies the subscription scope and the shared-node cache.
pub trait Query<T>: Send + Sync {
	fn producer(&self, network: &Network) -> Result<Arc<dyn Producer<T>>>;
}

impl<T> Query<T> for Arc<dyn Query<T>> {
	fn producer(&self, network: &Network) -> Result<Arc<dyn Producer<T>>> {
		(**self).producer(network)
	}
}

/// Combinators available on every query.
pub trait QueryExt<T: 'static>: Query<T> + Sized + 'static {
	fn boxed(self) -> Arc<dyn Query<T>> {
		Arc::new(self)
	}

	/// Maps every match to zero or more derived matches.
	///
	/// `f` must be deterministic: retractions are mapped through it again.
	fn flat_map<U, I, F>(self, f: F) -> FlatMap<T, U>
	where
		F: Fn(&T) -> I + Send + Sync + 'static,
		I: IntoIterator<Item = U>,
	{
		FlatMap {
			input: self.boxed(),
			f: Arc::new(move |value: &T| f(value).into_iter().collect()),
		}
	}

	/// Keeps only matches whose value satisfies `predicate`.
	fn filter<F>(self, predicate: F) -> FlatMap<T, T>
	where
		T: Clone,
		F: Fn(&T) -> bool + Send + Sync + 'static,
	{
		self.flat_map(move |value: &T| predicate(value).then(|| value.clone()))
	}

	/// Wraps every match so it carries an invalidation signal.
	fn observable(self, terminal: TerminalId) -> ObservableQuery<T> {
		ObservableQuery::new(self.boxed(), terminal)
	}

	/// Logs every token this query emits under `label`.
	fn traced(self, label: impl Into<Arc<str>>) -> Traced<T> {
		Traced {
			input: self.boxed(),
			label: label.into(),
		}
	}

	/// Identifies this query by `key` for node sharing.
	fn interned<K>(self, key: K) -> InternedQuery<T>
	where
		K: Eq + Hash + Debug + Send + Sync + 'static,
	{
		InternedQuery::new(self.boxed(), key)
	}
}

impl<T: 'static, Q: Query<T> + 'static> QueryExt<T> for Q {}

type FlatMapFn<T, U> = Arc<dyn Fn(&T) -> Vec<U> + Send + Sync>;

/// Query produced by [`QueryExt::flat_map`].
pub struct FlatMap<T, U> {
	input: Arc<dyn Query<T>>,
	f: FlatMapFn<T, U>,
}

impl<T, U> Query<U> for FlatMap<T, U>
where
	T: Send + Sync + 'static,
	U: Send + Sync + 'static,
{
	fn producer(&self, network: &Network) -> Result<Arc<dyn Producer<U>>> {
		Ok(Arc::new(FlatMapNode {
			input: self.input.producer(network)?,
			f: Arc::clone(&self.f),
		}))
	}
}

struct FlatMapNode<T, U> {
	input: Arc<dyn Producer<T>>,
	f: FlatMapFn<T, U>,
}

impl<T, U> Producer<U> for FlatMapNode<T, U>
where
	T: Send + Sync + 'static,
	U: Send + Sync + 'static,
{
	fn collect(&self, mut collector: BoxCollector<U>) -> Result<Subscription> {
		let f = Arc::clone(&self.f);
		self.input.collect(Box::new(move |token: Token<T>| -> Result<()> {
			for value in f(token.value()) {
				collector.emit(token.with_match(token.matched.derive(value)))?;
			}
			Ok(())
		}))
	}
}

/// Query produced by [`QueryExt::traced`].
pub struct Traced<T> {
	input: Arc<dyn Query<T>>,
	label: Arc<str>,
}

impl<T> Query<T> for Traced<T>
where
	T: Debug + Send + Sync + 'static,
{
	fn producer(&self, network: &Network) -> Result<Arc<dyn Producer<T>>> {
		Ok(Arc::new(TracedNode {
			input: self.input.producer(network)?,
			label: Arc::clone(&self.label),
		}))
	}
}

struct TracedNode<T> {
	input: Arc<dyn Producer<T>>,
	label: Arc<str>,
}

impl<T> Producer<T> for TracedNode<T>
where
	T: Debug + Send + Sync + 'static,
{
	fn collect(&self, mut collector: BoxCollector<T>) -> Result<Subscription> {
		tracing::debug!(query = %self.label, "query.collect");
		let label = Arc::clone(&self.label);
		self.input.collect(Box::new(move |token: Token<T>| -> Result<()> {
			tracing::trace!(query = %label, added = token.added, value = ?token.value(), "query.token");
			collector.emit(token)
		}))
	}

	fn dispose(&self) {
		self.input.dispose();
	}
}

#[cfg(test)]
mod tests {
	use parking_lot::Mutex;
	use strand_primitives::Match;

	use super::*;
	use crate::source::SourceNode;

	fn values<T: Clone + Send + Sync + 'static>(producer: &dyn Producer<T>) -> (Arc<Mutex<Vec<(bool, T)>>>, Subscription) {
		let seen = Arc::new(Mutex::new(Vec::new()));
		let sink = Arc::clone(&seen);
		let subscription = producer
			.collect(Box::new(move |token: Token<T>| -> Result<()> {
				sink.lock().push((token.added, token.value().clone()));
				Ok(())
			}))
			.expect("delivery succeeds");
		(seen, subscription)
	}

	#[test]
	fn flat_map_expands_and_drops() {
		let network = Network::detached();
		let source = SourceNode::new();
		let query = source.clone().flat_map(|v: &u32| {
			let v = *v;
			(0..v).map(move |i| (v, i))
		});
		let producer = query.producer(&network).expect("build");
		let (seen, _subscription) = values(producer.as_ref());

		source.assert(Match::new(2)).expect("delivery");
		source.assert(Match::new(0)).expect("delivery");
		source.retract(Match::new(2)).expect("delivery");

		assert_eq!(*seen.lock(), vec![(true, (2, 0)), (true, (2, 1)), (false, (2, 0)), (false, (2, 1))]);
	}

	#[test]
	fn filter_keeps_matching_values() {
		let network = Network::detached();
		let source = SourceNode::new();
		source.assert(Match::new(3)).expect("no downstream");
		source.assert(Match::new(4)).expect("no downstream");
		let producer = source.clone().filter(|v: &u32| v % 2 == 0).producer(&network).expect("build");
		let (seen, _subscription) = values(producer.as_ref());
		assert_eq!(*seen.lock(), vec![(true, 4)]);
	}

	#[test]
	fn traced_query_forwards_unchanged() {
		let network = Network::detached();
		let source = SourceNode::new();
		let producer = source.clone().traced("numbers").producer(&network).expect("build");
		let (seen, _subscription) = values(producer.as_ref());
		source.assert(Match::new(9u8)).expect("delivery");
		source.retract(Match::new(9u8)).expect("delivery");
		assert_eq!(*seen.lock(), vec![(true, 9), (false, 9)]);
	}

	#[test]
	fn derived_matches_keep_source_provenance() {
		let network = Network::detached();
		let source = SourceNode::new();
		let raw = Match::new(5u32);
		source.assert(raw.clone()).expect("no downstream");

		let producer = source.clone().flat_map(|v: &u32| Some(*v + 1)).producer(&network).expect("build");
		let derived = Arc::new(Mutex::new(None));
		let slot = Arc::clone(&derived);
		let _subscription = producer
			.collect(Box::new(move |token: Token<u32>| -> Result<()> {
				*slot.lock() = Some(token.matched);
				Ok(())
			}))
			.expect("delivery");

		let derived = derived.lock().clone().expect("snapshot delivered");
		assert_eq!(*derived.value(), 6);
		assert!(Arc::ptr_eq(derived.provenance(), raw.provenance()));
	}
}
