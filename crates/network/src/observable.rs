//! Query terminal that attaches an invalidation signal to every match.
//!
//! The node's table, keyed by the raw upstream match, is the only record of
//! which wrappers exist. Retracting a match invalidates its wrapper before the
//! retraction travels downstream; tearing the node down invalidates them all.

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use strand_primitives::{Match, ObservableMatch, TerminalId, Token};

use crate::error::Result;
use crate::network::Network;
use crate::producer::{BoxCollector, NodeState, Producer, Subscribers, Subscription, attach};
use crate::query::Query;

/// Query produced by [`QueryExt::observable`](crate::QueryExt::observable).
pub struct ObservableQuery<T> {
	input: Arc<dyn Query<T>>,
	terminal: TerminalId,
}

impl<T> ObservableQuery<T> {
	pub(crate) fn new(input: Arc<dyn Query<T>>, terminal: TerminalId) -> Self {
		Self { input, terminal }
	}

	pub fn terminal(&self) -> TerminalId {
		self.terminal
	}
}

impl<T> Query<T> for ObservableQuery<T>
where
	T: Clone + Eq + Hash + Debug + Send + Sync + 'static,
{
	fn producer(&self, network: &Network) -> Result<Arc<dyn Producer<T>>> {
		let input = self.input.producer(network)?;
		let node = ObservableNode::connect(input, self.terminal, network.spec().label())?;
		let weak = Arc::downgrade(&node.state);
		let label = node.label.clone();
		network.scope().on_dispose(Box::new(move || {
			if let Some(state) = weak.upgrade() {
				invalidate_all(&state, &label);
			}
		}));
		Ok(Arc::new(node))
	}
}

struct Wrapped<T> {
	matched: Match<T>,
	signal: ObservableMatch,
}

struct ObservableState<T> {
	terminal: TerminalId,
	table: FxHashMap<Match<T>, Wrapped<T>>,
	subscribers: Subscribers<T>,
}

impl<T: Clone + Send + Sync + 'static> NodeState<T> for ObservableState<T> {
	fn subscribers(&mut self) -> &mut Subscribers<T> {
		&mut self.subscribers
	}
}

impl<T> ObservableState<T>
where
	T: Clone + Eq + Hash + Debug + Send + Sync + 'static,
{
	fn on_token(&mut self, token: Token<T>, label: &str) -> Result<()> {
		if token.added {
			let signal = ObservableMatch::new(self.terminal);
			let matched = token.matched.observed(signal.clone());
			tracing::trace!(observer = label, observable = signal.id().get(), value = ?matched.value(), "observable.assert");
			let previous = self.table.insert(
				token.matched,
				Wrapped {
					matched: matched.clone(),
					signal,
				},
			);
			if let Some(previous) = previous {
				tracing::warn!(observer = label, value = ?matched.value(), "observable.reassert");
				previous.signal.invalidate();
				self.subscribers.emit(&Token::retract(previous.matched))?;
			}
			return self.subscribers.emit(&Token::assert(matched));
		}

		match self.table.remove(&token.matched) {
			Some(Wrapped { matched, signal }) => {
				tracing::trace!(observer = label, observable = signal.id().get(), value = ?matched.value(), "observable.retract");
				signal.invalidate();
				self.subscribers.emit(&Token::retract(matched))
			}
			None => {
				tracing::warn!(observer = label, terminal = %self.terminal, value = ?token.value(), "observable.retract_unknown");
				self.subscribers.emit(&token)
			}
		}
	}
}

fn invalidate_all<T>(state: &Mutex<ObservableState<T>>, label: &str) {
	let drained: Vec<Wrapped<T>> = state.lock().table.drain().map(|(_, wrapped)| wrapped).collect();
	if drained.is_empty() {
		return;
	}
	tracing::debug!(observer = label, invalidated = drained.len(), "observable.dispose");
	for wrapped in drained {
		wrapped.signal.invalidate();
	}
}

/// Live observable node.
pub(crate) struct ObservableNode<T> {
	state: Arc<Mutex<ObservableState<T>>>,
	input: Mutex<Option<Subscription>>,
	label: Arc<str>,
	_upstream: Arc<dyn Producer<T>>,
}

impl<T> ObservableNode<T>
where
	T: Clone + Eq + Hash + Debug + Send + Sync + 'static,
{
	pub(crate) fn connect(upstream: Arc<dyn Producer<T>>, terminal: TerminalId, label: &str) -> Result<Self> {
		let state = Arc::new(Mutex::new(ObservableState {
			terminal,
			table: FxHashMap::default(),
			subscribers: Subscribers::default(),
		}));
		let label: Arc<str> = Arc::from(format!("{label}/{terminal}"));

		let weak: Weak<Mutex<ObservableState<T>>> = Arc::downgrade(&state);
		let collector_label = Arc::clone(&label);
		let input = upstream.collect(Box::new(move |token: Token<T>| -> Result<()> {
			match weak.upgrade() {
				Some(state) => state.lock().on_token(token, &collector_label),
				None => Ok(()),
			}
		}))?;

		Ok(Self {
			state,
			input: Mutex::new(Some(input)),
			label,
			_upstream: upstream,
		})
	}

	/// Signal attached to the live wrapper of `raw`, if any.
	#[cfg(test)]
	pub(crate) fn signal_for(&self, raw: &Match<T>) -> Option<ObservableMatch> {
		self.state.lock().table.get(raw).map(|wrapped| wrapped.signal.clone())
	}

	#[cfg(test)]
	pub(crate) fn live_count(&self) -> usize {
		self.state.lock().table.len()
	}
}

impl<T> ObservableNode<T> {
	fn shutdown(&self) {
		drop(self.input.lock().take());
		invalidate_all(&self.state, &self.label);
	}
}

impl<T> Producer<T> for ObservableNode<T>
where
	T: Clone + Eq + Hash + Debug + Send + Sync + 'static,
{
	fn collect(&self, mut collector: BoxCollector<T>) -> Result<Subscription> {
		let mut state = self.state.lock();
		for wrapped in state.table.values() {
			collector.emit(Token::assert(wrapped.matched.clone()))?;
		}
		Ok(attach(&self.state, &mut *state, collector))
	}

	fn dispose(&self) {
		self.shutdown();
	}
}

impl<T> Drop for ObservableNode<T> {
	fn drop(&mut self) {
		self.shutdown();
	}
}
