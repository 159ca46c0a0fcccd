//! Producers and collectors.
//!
//! A producer replays its current state as assertions to every new collector,
//! then streams live deltas to it until the returned [`Subscription`] is
//! dropped. Delivery is synchronous: collectors must not block, and must not
//! re-enter the node that is delivering to them.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use strand_primitives::Token;

use crate::error::Result;

/// Receives the tokens of one producer.
pub trait Collector<T>: Send {
	/// Handles one token. An error aborts delivery of the current event.
	fn emit(&mut self, token: Token<T>) -> Result<()>;
}

impl<T, F> Collector<T> for F
where
	F: FnMut(Token<T>) -> Result<()> + Send,
{
	fn emit(&mut self, token: Token<T>) -> Result<()> {
		self(token)
	}
}

pub type BoxCollector<T> = Box<dyn Collector<T>>;

/// Live, incremental output of one query node.
pub trait Producer<T>: Send + Sync {
	/// Emits the current state as assertions, then attaches `collector` to
	/// every later delta. Both steps happen without any delta in between.
	fn collect(&self, collector: BoxCollector<T>) -> Result<Subscription>;

	/// Tears the node down.
	fn dispose(&self) {}
}

/// Attachment of one collector to a producer.
#[must_use = "dropping the subscription detaches the collector"]
pub struct Subscription {
	detach: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
	pub fn new(detach: impl FnOnce() + Send + 'static) -> Self {
		Self {
			detach: Some(Box::new(detach)),
		}
	}

	/// A subscription with nothing to detach.
	pub fn inert() -> Self {
		Self { detach: None }
	}

	/// Wraps several subscriptions into one that detaches them together.
	pub fn all(parts: Vec<Subscription>) -> Self {
		Self::new(move || drop(parts))
	}

	pub fn is_attached(&self) -> bool {
		self.detach.is_some()
	}

	/// Detaches the collector now.
	pub fn dispose(mut self) {
		self.release();
	}

	fn release(&mut self) {
		if let Some(detach) = self.detach.take() {
			detach();
		}
	}
}

impl Drop for Subscription {
	fn drop(&mut self) {
		self.release();
	}
}

impl fmt::Debug for Subscription {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Subscription").field("attached", &self.is_attached()).finish()
	}
}

/// Collectors attached to one node, in attach order.
pub(crate) struct Subscribers<T> {
	next_id: u64,
	entries: Vec<(u64, BoxCollector<T>)>,
}

impl<T> Default for Subscribers<T> {
	fn default() -> Self {
		Self {
			next_id: 0,
			entries: Vec::new(),
		}
	}
}

impl<T: Clone> Subscribers<T> {
	pub(crate) fn attach(&mut self, collector: BoxCollector<T>) -> u64 {
		let id = self.next_id;
		self.next_id = self.next_id.wrapping_add(1);
		self.entries.push((id, collector));
		id
	}

	pub(crate) fn detach(&mut self, id: u64) {
		self.entries.retain(|(entry, _)| *entry != id);
	}

	pub(crate) fn emit(&mut self, token: &Token<T>) -> Result<()> {
		for (_, collector) in &mut self.entries {
			collector.emit(token.clone())?;
		}
		Ok(())
	}

	pub(crate) fn len(&self) -> usize {
		self.entries.len()
	}
}

/// Node state that owns a subscriber list.
pub(crate) trait NodeState<T>: Send + 'static {
	fn subscribers(&mut self) -> &mut Subscribers<T>;
}

/// Attaches `collector` to the already-locked `state` of `node`.
pub(crate) fn attach<S, T>(node: &Arc<Mutex<S>>, state: &mut S, collector: BoxCollector<T>) -> Subscription
where
	S: NodeState<T>,
	T: Clone + 'static,
{
	let id = state.subscribers().attach(collector);
	let weak = Arc::downgrade(node);
	Subscription::new(move || {
		if let Some(node) = weak.upgrade() {
			node.lock().subscribers().detach(id);
		}
	})
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicUsize, Ordering};

	use strand_primitives::Match;

	use super::*;

	#[test]
	fn subscribers_receive_in_attach_order() {
		let seen = Arc::new(Mutex::new(Vec::new()));
		let mut subscribers = Subscribers::default();
		for tag in ["a", "b"] {
			let seen = Arc::clone(&seen);
			subscribers.attach(Box::new(move |token: Token<u8>| -> Result<()> {
				seen.lock().push((tag, *token.value()));
				Ok(())
			}));
		}
		subscribers.emit(&Token::assert(Match::new(1))).expect("delivery succeeds");
		assert_eq!(*seen.lock(), vec![("a", 1), ("b", 1)]);
	}

	#[test]
	fn subscription_detaches_once() {
		let calls = Arc::new(AtomicUsize::new(0));
		let counter = Arc::clone(&calls);
		let subscription = Subscription::new(move || {
			counter.fetch_add(1, Ordering::SeqCst);
		});
		assert!(subscription.is_attached());
		subscription.dispose();
		assert_eq!(calls.load(Ordering::SeqCst), 1);
	}
}
