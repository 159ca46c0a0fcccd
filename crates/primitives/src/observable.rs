//! One-shot invalidation signal carried by observable matches.
//!
//! An [`ObservableMatch`] is created by an observable query terminal for every
//! asserted match and invalidated exactly once: when that match is retracted,
//! or when the terminal itself is disposed. Async work can await the signal or
//! register synchronous handlers on it.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio_util::sync::CancellationToken;

/// Identifier of the observable query terminal that produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TerminalId(pub u64);

impl fmt::Display for TerminalId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "terminal#{}", self.0)
	}
}

/// Process-unique identity of one observable match instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObservableId(u64);

static NEXT_OBSERVABLE_ID: AtomicU64 = AtomicU64::new(1);

impl ObservableId {
	fn next() -> Self {
		Self(NEXT_OBSERVABLE_ID.fetch_add(1, Ordering::Relaxed))
	}

	pub const fn get(self) -> u64 {
		self.0
	}
}

type Handler = Box<dyn FnOnce(&ObservableMatch) + Send>;

struct HandlerTable {
	invalidated: bool,
	next_slot: u64,
	handlers: FxHashMap<u64, Handler>,
}

struct Inner {
	id: ObservableId,
	observer: TerminalId,
	invalidated: AtomicBool,
	completion: CancellationToken,
	table: Mutex<HandlerTable>,
}

/// Shared handle on one observable match's invalidation state.
///
/// Handles compare and hash by instance identity: two wrappers around equal
/// raw matches are still distinct observables.
#[derive(Clone)]
pub struct ObservableMatch {
	inner: Arc<Inner>,
}

impl ObservableMatch {
	/// Creates a live observable owned by `observer`.
	pub fn new(observer: TerminalId) -> Self {
		Self {
			inner: Arc::new(Inner {
				id: ObservableId::next(),
				observer,
				invalidated: AtomicBool::new(false),
				completion: CancellationToken::new(),
				table: Mutex::new(HandlerTable {
					invalidated: false,
					next_slot: 0,
					handlers: FxHashMap::default(),
				}),
			}),
		}
	}

	pub fn id(&self) -> ObservableId {
		self.inner.id
	}

	/// Returns the terminal that created this observable.
	pub fn observer(&self) -> TerminalId {
		self.inner.observer
	}

	pub fn is_invalidated(&self) -> bool {
		self.inner.invalidated.load(Ordering::Acquire)
	}

	/// Number of handlers still waiting for invalidation.
	pub fn pending_handlers(&self) -> usize {
		self.inner.table.lock().handlers.len()
	}

	/// Transitions `LIVE -> INVALIDATED` and fires every registered handler.
	///
	/// Returns `true` only for the call that performed the transition; later
	/// calls are no-ops.
	pub fn invalidate(&self) -> bool {
		let handlers = {
			let mut table = self.inner.table.lock();
			if table.invalidated {
				return false;
			}
			table.invalidated = true;
			self.inner.invalidated.store(true, Ordering::Release);
			std::mem::take(&mut table.handlers)
		};
		self.inner.completion.cancel();
		tracing::trace!(observable = self.inner.id.0, observer = self.inner.observer.0, handlers = handlers.len(), "observable.invalidate");
		for (_, handler) in handlers {
			handler(self);
		}
		true
	}

	/// Registers a handler that fires exactly once.
	///
	/// The handler runs immediately when the observable is already invalidated,
	/// otherwise on the first [`Self::invalidate`] call. Disposing or dropping
	/// the returned registration before that removes the handler unfired.
	pub fn on_invalidation<F>(&self, handler: F) -> InvalidationRegistration
	where
		F: FnOnce(&ObservableMatch) + Send + 'static,
	{
		let mut table = self.inner.table.lock();
		if table.invalidated {
			drop(table);
			handler(self);
			return InvalidationRegistration::inert();
		}
		let slot = table.next_slot;
		table.next_slot = table.next_slot.wrapping_add(1);
		table.handlers.insert(slot, Box::new(handler));
		InvalidationRegistration {
			target: Arc::downgrade(&self.inner),
			slot: Some(slot),
		}
	}

	/// Resolves once this observable has been invalidated.
	pub async fn invalidated(&self) {
		self.inner.completion.cancelled().await;
	}
}

impl PartialEq for ObservableMatch {
	fn eq(&self, other: &Self) -> bool {
		self.inner.id == other.inner.id
	}
}

impl Eq for ObservableMatch {}

impl Hash for ObservableMatch {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.inner.id.hash(state);
	}
}

impl fmt::Debug for ObservableMatch {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ObservableMatch")
			.field("id", &self.inner.id.0)
			.field("observer", &self.inner.observer)
			.field("invalidated", &self.is_invalidated())
			.finish()
	}
}

/// Disposable registration of one invalidation handler.
#[must_use = "dropping the registration removes the handler"]
pub struct InvalidationRegistration {
	target: Weak<Inner>,
	slot: Option<u64>,
}

impl InvalidationRegistration {
	fn inert() -> Self {
		Self { target: Weak::new(), slot: None }
	}

	/// Returns `true` while the handler is registered and has not fired.
	pub fn is_pending(&self) -> bool {
		match (self.slot, self.target.upgrade()) {
			(Some(slot), Some(inner)) => inner.table.lock().handlers.contains_key(&slot),
			_ => false,
		}
	}

	/// Removes the handler without firing it.
	pub fn dispose(mut self) {
		self.release();
	}

	fn release(&mut self) {
		let Some(slot) = self.slot.take() else {
			return;
		};
		if let Some(inner) = self.target.upgrade() {
			inner.table.lock().handlers.remove(&slot);
		}
	}
}

impl Drop for InvalidationRegistration {
	fn drop(&mut self) {
		self.release();
	}
}

impl fmt::Debug for InvalidationRegistration {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("InvalidationRegistration").field("pending", &self.is_pending()).finish()
	}
}
