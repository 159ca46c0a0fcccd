//! Incrementally maintained two-input join.
//!
//! Each side keeps a [`JoinMemory`] of its live matches by key. A token on
//! one side updates that side's memory first, then emits one pair token per
//! match the other side holds under the same key. Pairs are composite
//! matches, so they go stale as soon as either parent does.

mod memory;

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;
use strand_primitives::{JoinPair, Match, Token};

use crate::error::{JoinSide, NetworkError, Result};
use crate::network::Network;
use crate::producer::{BoxCollector, NodeState, Producer, Subscribers, Subscription, attach};
use crate::query::{Query, QueryExt};

pub use memory::JoinMemory;

/// Bounds shared by join values and keys.
pub trait JoinValue: Clone + Eq + Hash + Send + Sync + 'static {}

impl<T: Clone + Eq + Hash + Send + Sync + 'static> JoinValue for T {}

/// Joins two queries on keys derived from their values.
///
/// `on_left` and `on_right` may yield any number of keys; a value with no key
/// never reaches the join. Both functions must be deterministic.
pub fn join_on<L, R, K, QL, QR, FL, FR, IL, IR>(left: QL, on_left: FL, right: QR, on_right: FR) -> RawJoin<L, R, K>
where
	L: JoinValue,
	R: JoinValue,
	K: JoinValue + Debug,
	QL: QueryExt<L>,
	QR: QueryExt<R>,
	FL: Fn(&L) -> IL + Send + Sync + 'static,
	FR: Fn(&R) -> IR + Send + Sync + 'static,
	IL: IntoIterator<Item = K>,
	IR: IntoIterator<Item = K>,
{
	let left = left.flat_map(move |value: &L| on_left(value).into_iter().map(|key| (value.clone(), key)).collect::<Vec<_>>());
	let right = right.flat_map(move |value: &R| on_right(value).into_iter().map(|key| (value.clone(), key)).collect::<Vec<_>>());
	raw_join_on(left, right)
}

/// Joins two queries whose values already carry their key.
pub fn raw_join_on<L, R, K>(left: impl QueryExt<(L, K)>, right: impl QueryExt<(R, K)>) -> RawJoin<L, R, K>
where
	L: JoinValue,
	R: JoinValue,
	K: JoinValue + Debug,
{
	RawJoin {
		left: left.boxed(),
		right: right.boxed(),
	}
}

/// Query produced by [`join_on`] and [`raw_join_on`].
pub struct RawJoin<L, R, K> {
	left: Arc<dyn Query<(L, K)>>,
	right: Arc<dyn Query<(R, K)>>,
}

impl<L, R, K> Query<JoinPair<L, R, K>> for RawJoin<L, R, K>
where
	L: JoinValue,
	R: JoinValue,
	K: JoinValue + Debug,
{
	fn producer(&self, network: &Network) -> Result<Arc<dyn Producer<JoinPair<L, R, K>>>> {
		let left = self.left.producer(network)?;
		let right = self.right.producer(network)?;
		Ok(Arc::new(JoinNode::connect(left, right, network.diagnostics())?))
	}
}

struct JoinState<L, R, K> {
	left: JoinMemory<K, L>,
	right: JoinMemory<K, R>,
	subscribers: Subscribers<JoinPair<L, R, K>>,
	diagnostics: bool,
}

impl<L, R, K> NodeState<JoinPair<L, R, K>> for JoinState<L, R, K>
where
	L: JoinValue,
	R: JoinValue,
	K: JoinValue,
{
	fn subscribers(&mut self) -> &mut Subscribers<JoinPair<L, R, K>> {
		&mut self.subscribers
	}
}

fn pair<L: Clone, R: Clone, K: Clone>(left: &Match<L>, right: &Match<R>, key: &K) -> Match<JoinPair<L, R, K>> {
	Match::combine(
		left,
		right,
		JoinPair {
			left: left.value().clone(),
			right: right.value().clone(),
			key: key.clone(),
		},
	)
}

impl<L, R, K> JoinState<L, R, K>
where
	L: JoinValue,
	R: JoinValue,
	K: JoinValue + Debug,
{
	fn on_left(&mut self, token: Token<(L, K)>) -> Result<()> {
		let (value, key) = token.value().clone();
		let matched = token.matched.derive(value);
		if token.added {
			self.left.insert(key.clone(), matched.clone());
		} else if !self.left.remove(&key, &matched) {
			return Err(retract_without_assert(JoinSide::Left, &key));
		}
		tracing::trace!(side = %JoinSide::Left, added = token.added, key = ?key, "join.token");
		for other in self.right.get(&key) {
			let out = Token {
				added: token.added,
				matched: pair(&matched, other, &key),
			};
			self.subscribers.emit(&out)?;
		}
		self.verify()
	}

	fn on_right(&mut self, token: Token<(R, K)>) -> Result<()> {
		let (value, key) = token.value().clone();
		let matched = token.matched.derive(value);
		if token.added {
			self.right.insert(key.clone(), matched.clone());
		} else if !self.right.remove(&key, &matched) {
			return Err(retract_without_assert(JoinSide::Right, &key));
		}
		tracing::trace!(side = %JoinSide::Right, added = token.added, key = ?key, "join.token");
		for other in self.left.get(&key) {
			let out = Token {
				added: token.added,
				matched: pair(other, &matched, &key),
			};
			self.subscribers.emit(&out)?;
		}
		self.verify()
	}

	fn verify(&self) -> Result<()> {
		if !self.diagnostics {
			return Ok(());
		}
		if let Some(key) = self.left.empty_key() {
			return Err(NetworkError::EmptyMemoryEntry {
				side: JoinSide::Left,
				key: format!("{key:?}"),
			});
		}
		if let Some(key) = self.right.empty_key() {
			return Err(NetworkError::EmptyMemoryEntry {
				side: JoinSide::Right,
				key: format!("{key:?}"),
			});
		}
		Ok(())
	}
}

fn retract_without_assert<K: Debug>(side: JoinSide, key: &K) -> NetworkError {
	tracing::error!(side = %side, key = ?key, "join.retract_without_assert");
	NetworkError::RetractWithoutAssert {
		side,
		key: format!("{key:?}"),
	}
}

/// Live join node fed by two upstream producers.
pub(crate) struct JoinNode<L, R, K> {
	state: Arc<Mutex<JoinState<L, R, K>>>,
	inputs: Mutex<Vec<Subscription>>,
	_upstream: (Arc<dyn Producer<(L, K)>>, Arc<dyn Producer<(R, K)>>),
}

impl<L, R, K> JoinNode<L, R, K>
where
	L: JoinValue,
	R: JoinValue,
	K: JoinValue + Debug,
{
	/// Subscribes to both inputs, replaying their current state into the memories.
	pub(crate) fn connect(left: Arc<dyn Producer<(L, K)>>, right: Arc<dyn Producer<(R, K)>>, diagnostics: bool) -> Result<Self> {
		let state = Arc::new(Mutex::new(JoinState {
			left: JoinMemory::new(),
			right: JoinMemory::new(),
			subscribers: Subscribers::default(),
			diagnostics,
		}));

		let weak = Arc::downgrade(&state);
		let left_input = left.collect(Box::new(move |token: Token<(L, K)>| -> Result<()> {
			match weak.upgrade() {
				Some(state) => state.lock().on_left(token),
				None => Ok(()),
			}
		}))?;
		let weak = Arc::downgrade(&state);
		let right_input = right.collect(Box::new(move |token: Token<(R, K)>| -> Result<()> {
			match weak.upgrade() {
				Some(state) => state.lock().on_right(token),
				None => Ok(()),
			}
		}))?;

		Ok(Self {
			state,
			inputs: Mutex::new(vec![left_input, right_input]),
			_upstream: (left, right),
		})
	}

	#[cfg(test)]
	pub(crate) fn contains_key(&self, side: JoinSide, key: &K) -> bool {
		let state = self.state.lock();
		match side {
			JoinSide::Left => state.left.contains_key(key),
			JoinSide::Right => state.right.contains_key(key),
		}
	}

	#[cfg(test)]
	pub(crate) fn match_count(&self, side: JoinSide) -> usize {
		let state = self.state.lock();
		match side {
			JoinSide::Left => state.left.match_count(),
			JoinSide::Right => state.right.match_count(),
		}
	}
}

impl<L, R, K> Producer<JoinPair<L, R, K>> for JoinNode<L, R, K>
where
	L: JoinValue,
	R: JoinValue,
	K: JoinValue + Debug,
{
	fn collect(&self, mut collector: BoxCollector<JoinPair<L, R, K>>) -> Result<Subscription> {
		let mut state = self.state.lock();
		for (key, lefts) in state.left.iter() {
			for right in state.right.get(key) {
				for left in lefts {
					collector.emit(Token::assert(pair(left, right, key)))?;
				}
			}
		}
		Ok(attach(&self.state, &mut *state, collector))
	}

	fn dispose(&self) {
		let inputs = std::mem::take(&mut *self.inputs.lock());
		tracing::debug!(inputs = inputs.len(), "join.dispose");
		drop(inputs);
	}
}

#[cfg(test)]
mod tests;
