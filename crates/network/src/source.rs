//! Entry point of fact changes into the network.

use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use strand_primitives::{Match, Token};

use crate::error::Result;
use crate::network::Network;
use crate::producer::{BoxCollector, NodeState, Producer, Subscribers, Subscription, attach};
use crate::query::Query;

struct SourceState<T> {
	live: FxHashSet<Match<T>>,
	subscribers: Subscribers<T>,
}

impl<T: Send + Sync + 'static> NodeState<T> for SourceState<T> {
	fn subscribers(&mut self) -> &mut Subscribers<T> {
		&mut self.subscribers
	}
}

/// Producer fed directly with assert/retract tokens.
///
/// Fact-store adapters push their changes here; every other node is derived
/// from sources. Cloning shares the node.
pub struct SourceNode<T> {
	state: Arc<Mutex<SourceState<T>>>,
}

impl<T> Clone for SourceNode<T> {
	fn clone(&self) -> Self {
		Self {
			state: Arc::clone(&self.state),
		}
	}
}

impl<T> Default for SourceNode<T> {
	fn default() -> Self {
		Self {
			state: Arc::new(Mutex::new(SourceState {
				live: FxHashSet::default(),
				subscribers: Subscribers::default(),
			})),
		}
	}
}

impl<T> SourceNode<T>
where
	T: Clone + Eq + Hash + Send + Sync + 'static,
{
	pub fn new() -> Self {
		Self::default()
	}

	pub fn assert(&self, matched: Match<T>) -> Result<()> {
		self.apply([Token::assert(matched)])
	}

	pub fn retract(&self, matched: Match<T>) -> Result<()> {
		self.apply([Token::retract(matched)])
	}

	/// Applies a batch in order and forwards each token downstream.
	///
	/// Stops at the first token a downstream node rejects; later tokens of the
	/// batch are not applied.
	pub fn apply(&self, batch: impl IntoIterator<Item = Token<T>>) -> Result<()> {
		let mut state = self.state.lock();
		for token in batch {
			if token.added {
				state.live.replace(token.matched.clone());
			} else {
				state.live.remove(&token.matched);
			}
			state.subscribers.emit(&token)?;
		}
		Ok(())
	}

	pub fn len(&self) -> usize {
		self.state.lock().live.len()
	}

	pub fn is_empty(&self) -> bool {
		self.state.lock().live.is_empty()
	}

	/// Currently asserted matches.
	pub fn snapshot(&self) -> Vec<Match<T>> {
		self.state.lock().live.iter().cloned().collect()
	}

	pub fn subscriber_count(&self) -> usize {
		self.state.lock().subscribers.len()
	}
}

impl<T> Producer<T> for SourceNode<T>
where
	T: Clone + Eq + Hash + Send + Sync + 'static,
{
	fn collect(&self, mut collector: BoxCollector<T>) -> Result<Subscription> {
		let mut state = self.state.lock();
		for matched in &state.live {
			collector.emit(Token::assert(matched.clone()))?;
		}
		Ok(attach(&self.state, &mut *state, collector))
	}
}

impl<T> Query<T> for SourceNode<T>
where
	T: Clone + Eq + Hash + Send + Sync + 'static,
{
	fn producer(&self, _network: &Network) -> Result<Arc<dyn Producer<T>>> {
		Ok(Arc::new(self.clone()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn recorder<T: Send + 'static>() -> (Arc<Mutex<Vec<Token<T>>>>, BoxCollector<T>) {
		let seen = Arc::new(Mutex::new(Vec::new()));
		let sink = Arc::clone(&seen);
		(
			seen,
			Box::new(move |token: Token<T>| -> Result<()> {
				sink.lock().push(token);
				Ok(())
			}),
		)
	}

	#[test]
	fn late_collector_gets_snapshot_then_deltas() {
		let source = SourceNode::new();
		source.assert(Match::new(1)).expect("no downstream");
		source.assert(Match::new(2)).expect("no downstream");
		source.retract(Match::new(1)).expect("no downstream");

		let (seen, collector) = recorder();
		let _subscription = source.collect(collector).expect("snapshot delivery");
		source.assert(Match::new(3)).expect("delivery");

		let seen = seen.lock();
		assert_eq!(*seen, vec![Token::assert(Match::new(2)), Token::assert(Match::new(3))]);
	}

	#[test]
	fn dropped_subscription_stops_delivery() {
		let source = SourceNode::new();
		let (seen, collector) = recorder();
		let subscription = source.collect(collector).expect("snapshot delivery");
		assert_eq!(source.subscriber_count(), 1);
		drop(subscription);
		assert_eq!(source.subscriber_count(), 0);

		source.assert(Match::new("x")).expect("no downstream");
		assert!(seen.lock().is_empty());
	}
}
