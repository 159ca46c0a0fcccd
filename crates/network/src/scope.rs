//! Subscription scopes: where nodes register interest in fact changes.
//!
//! A network is built inside a [`QueryScope`]. The live variant delegates to
//! the fact store's [`SubscriptionScope`]; the detached variant turns every
//! registration into a no-op for one-shot evaluation without a live network.

use std::fmt;
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use strand_primitives::{Match, Token};

use crate::error::Result;
use crate::facts::{Fact, FactPattern, FactPort, IdPattern, RevalidationPort};

/// Teardown callback registered on a scope.
pub type DisposeCallback = Box<dyn FnOnce() + Send>;

/// Subscription primitives supplied by the fact store.
pub trait SubscriptionScope: Send + Sync {
	/// Delivers every change to facts matching `pattern` into `port`.
	fn subscribe(&self, pattern: FactPattern, port: FactPort) -> Result<()>;

	/// Reports facts whose identifiers match `patterns` for a staleness re-check.
	fn subscribe_revalidation(&self, patterns: FxHashSet<IdPattern>, port: RevalidationPort);

	/// Runs `callback` when the scope is torn down.
	fn on_dispose(&self, callback: DisposeCallback);

	/// Opens a nested scope, runs `body` in it and returns its handle.
	fn scope(&self, body: Box<dyn FnOnce(&QueryScope) + '_>) -> ScopeHandle;

	/// Whether nodes should run extra consistency checks.
	fn performs_additional_checks(&self) -> bool {
		false
	}
}

/// Scope a network is built in.
#[derive(Clone, Default)]
pub enum QueryScope {
	/// Registrations go to a fact-store scope.
	Live(Arc<dyn SubscriptionScope>),
	/// Registrations are dropped; nested bodies run immediately.
	#[default]
	Detached,
}

impl QueryScope {
	pub fn live(scope: impl SubscriptionScope + 'static) -> Self {
		Self::Live(Arc::new(scope))
	}

	pub fn is_detached(&self) -> bool {
		matches!(self, Self::Detached)
	}

	pub fn subscribe(&self, pattern: FactPattern, port: FactPort) -> Result<()> {
		match self {
			Self::Live(scope) => scope.subscribe(pattern, port),
			Self::Detached => Ok(()),
		}
	}

	pub fn subscribe_revalidation(&self, patterns: FxHashSet<IdPattern>, port: RevalidationPort) {
		if let Self::Live(scope) = self {
			scope.subscribe_revalidation(patterns, port);
		}
	}

	/// Registers teardown work. A detached scope never tears down, so the
	/// callback is dropped without running.
	pub fn on_dispose(&self, callback: DisposeCallback) {
		if let Self::Live(scope) = self {
			scope.on_dispose(callback);
		}
	}

	/// Runs `body` in a nested scope.
	///
	/// Detached: `body` runs synchronously against the detached scope and the
	/// returned handle is already closed.
	pub fn scope(&self, body: impl FnOnce(&QueryScope)) -> ScopeHandle {
		match self {
			Self::Live(scope) => scope.scope(Box::new(body)),
			Self::Detached => {
				body(&Self::Detached);
				ScopeHandle::closed()
			}
		}
	}

	pub fn performs_additional_checks(&self) -> bool {
		match self {
			Self::Live(scope) => scope.performs_additional_checks(),
			Self::Detached => false,
		}
	}
}

impl fmt::Debug for QueryScope {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Live(_) => f.write_str("QueryScope::Live"),
			Self::Detached => f.write_str("QueryScope::Detached"),
		}
	}
}

struct HandleInner {
	closed: AtomicBool,
	release: Mutex<Option<DisposeCallback>>,
	teardown: Mutex<Vec<DisposeCallback>>,
}

/// Disposable handle of a nested scope.
///
/// Closing runs the registered teardown once; later registrations on a
/// closed handle run immediately.
#[derive(Clone)]
pub struct ScopeHandle {
	inner: Arc<HandleInner>,
}

impl Default for ScopeHandle {
	fn default() -> Self {
		Self::new()
	}
}

impl ScopeHandle {
	pub fn new() -> Self {
		Self::build(None)
	}

	/// A handle that runs `release` on close, before any teardown callback.
	pub fn releasing(release: DisposeCallback) -> Self {
		Self::build(Some(release))
	}

	fn build(release: Option<DisposeCallback>) -> Self {
		Self {
			inner: Arc::new(HandleInner {
				closed: AtomicBool::new(false),
				release: Mutex::new(release),
				teardown: Mutex::new(Vec::new()),
			}),
		}
	}

	/// A handle that is already closed.
	pub fn closed() -> Self {
		let handle = Self::new();
		handle.inner.closed.store(true, Ordering::Release);
		handle
	}

	pub fn is_closed(&self) -> bool {
		self.inner.closed.load(Ordering::Acquire)
	}

	pub fn on_close(&self, callback: DisposeCallback) {
		{
			let mut teardown = self.inner.teardown.lock();
			if !self.is_closed() {
				teardown.push(callback);
				return;
			}
		}
		callback();
	}

	/// Closes the handle. Returns `false` if it was already closed.
	pub fn close(&self) -> bool {
		let teardown = {
			let mut teardown = self.inner.teardown.lock();
			if self.inner.closed.swap(true, Ordering::AcqRel) {
				return false;
			}
			std::mem::take(&mut *teardown)
		};
		tracing::debug!(callbacks = teardown.len(), "scope.close");
		let release = self.inner.release.lock().take();
		if let Some(release) = release {
			release();
		}
		// Reverse registration order: later registrations may depend on earlier ones.
		for callback in teardown.into_iter().rev() {
			callback();
		}
		true
	}
}

impl fmt::Debug for ScopeHandle {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ScopeHandle").field("closed", &self.is_closed()).finish()
	}
}

struct Registration<P> {
	owner: u64,
	port: P,
}

struct Child {
	parent: u64,
	handle: ScopeHandle,
}

#[derive(Default)]
struct LocalState {
	facts: FxHashSet<Fact>,
	ports: FxHashMap<u64, Registration<(FactPattern, FactPort)>>,
	revalidation: Vec<Registration<(FxHashSet<IdPattern>, RevalidationPort)>>,
	children: FxHashMap<u64, Child>,
	next_port: u64,
	next_scope: u64,
}

/// Drops the subscriptions owned by scope `id` and closes its open children.
fn release(store: &Weak<Mutex<LocalState>>, id: u64) {
	let Some(store) = store.upgrade() else {
		return;
	};
	let children: Vec<ScopeHandle> = {
		let mut state = store.lock();
		state.ports.retain(|_, entry| entry.owner != id);
		state.revalidation.retain(|entry| entry.owner != id);
		state.children.remove(&id);
		let owned: Vec<u64> = state.children.iter().filter(|(_, child)| child.parent == id).map(|(child, _)| *child).collect();
		owned.into_iter().filter_map(|child| state.children.remove(&child)).map(|child| child.handle).collect()
	};
	tracing::debug!(scope = id, children = children.len(), "scope.release");
	for child in children {
		child.close();
	}
}

fn releasing_handle(store: &Arc<Mutex<LocalState>>, id: u64) -> ScopeHandle {
	let store = Arc::downgrade(store);
	ScopeHandle::releasing(Box::new(move || release(&store, id)))
}

/// In-memory fact store scope.
///
/// Holds the current fact set; new subscriptions first receive the facts
/// already matching their pattern. Writes and subscription replays are
/// serialized, so a port never sees a change out of order with its replay.
/// Nested scopes share the store; closing a scope's handle drops its own
/// subscriptions and closes its nested scopes. Cloning shares the scope.
#[derive(Clone)]
pub struct LocalScope {
	store: Arc<Mutex<LocalState>>,
	delivery: Arc<Mutex<()>>,
	id: u64,
	handle: ScopeHandle,
	additional_checks: bool,
}

impl Default for LocalScope {
	fn default() -> Self {
		Self::new()
	}
}

impl LocalScope {
	pub fn new() -> Self {
		Self::with_additional_checks(false)
	}

	pub fn with_additional_checks(additional_checks: bool) -> Self {
		let store = Arc::new(Mutex::new(LocalState {
			next_scope: 1,
			..LocalState::default()
		}));
		Self {
			handle: releasing_handle(&store, 0),
			store,
			delivery: Arc::default(),
			id: 0,
			additional_checks,
		}
	}

	pub fn handle(&self) -> &ScopeHandle {
		&self.handle
	}

	/// Fact subscriptions live across the whole store.
	pub fn subscription_count(&self) -> usize {
		self.store.lock().ports.len()
	}

	pub fn fact_count(&self) -> usize {
		self.store.lock().facts.len()
	}

	/// Adds `fact` and delivers its assertion to matching subscriptions.
	///
	/// Adding a fact already present is a no-op.
	pub fn assert_fact(&self, fact: Fact) -> Result<()> {
		let _delivery = self.delivery.lock();
		if !self.store.lock().facts.insert(fact.clone()) {
			return Ok(());
		}
		self.deliver(Token::assert(Match::new(fact)))
	}

	/// Removes `fact` and delivers its retraction. Removing an absent fact is a no-op.
	pub fn retract_fact(&self, fact: Fact) -> Result<()> {
		let _delivery = self.delivery.lock();
		if !self.store.lock().facts.remove(&fact) {
			return Ok(());
		}
		self.deliver(Token::retract(Match::new(fact)))
	}

	/// Notifies revalidation subscribers whose patterns match `fact`.
	pub fn revalidate(&self, fact: &Fact) {
		let ports: Vec<RevalidationPort> = {
			let state = self.store.lock();
			state
				.revalidation
				.iter()
				.filter(|entry| entry.port.0.iter().any(|pattern| pattern.matches(fact)))
				.map(|entry| Arc::clone(&entry.port.1))
				.collect()
		};
		tracing::trace!(entity = %fact.entity, ports = ports.len(), "scope.revalidate");
		for port in ports {
			port(fact);
		}
	}

	/// Tears the scope down: drops its subscriptions, closes nested scopes
	/// and runs dispose callbacks. Same as closing [`LocalScope::handle`].
	pub fn dispose(&self) {
		self.handle.close();
	}

	/// Caller holds the delivery lock.
	fn deliver(&self, token: Token<Fact>) -> Result<()> {
		let ports = self.ports_for(token.value());
		tracing::trace!(added = token.added, entity = %token.value().entity, ports = ports.len(), "scope.deliver");
		for port in ports {
			port(token.clone())?;
		}
		Ok(())
	}

	fn ports_for(&self, fact: &Fact) -> Vec<FactPort> {
		let state = self.store.lock();
		let mut ports: Vec<(u64, FactPort)> = state
			.ports
			.iter()
			.filter(|(_, entry)| entry.port.0.matches(fact))
			.map(|(id, entry)| (*id, Arc::clone(&entry.port.1)))
			.collect();
		ports.sort_unstable_by_key(|(id, _)| *id);
		ports.into_iter().map(|(_, port)| port).collect()
	}
}

impl SubscriptionScope for LocalScope {
	fn subscribe(&self, pattern: FactPattern, port: FactPort) -> Result<()> {
		let _delivery = self.delivery.lock();
		let existing: Vec<Fact> = {
			let mut state = self.store.lock();
			let id = state.next_port;
			state.next_port += 1;
			state.ports.insert(
				id,
				Registration {
					owner: self.id,
					port: (pattern.clone(), Arc::clone(&port)),
				},
			);
			state.facts.iter().filter(|fact| pattern.matches(fact)).cloned().collect()
		};
		tracing::debug!(pattern = ?pattern, replay = existing.len(), "scope.subscribe");
		for fact in existing {
			port(Token::assert(Match::new(fact)))?;
		}
		Ok(())
	}

	fn subscribe_revalidation(&self, patterns: FxHashSet<IdPattern>, port: RevalidationPort) {
		self.store.lock().revalidation.push(Registration {
			owner: self.id,
			port: (patterns, port),
		});
	}

	fn on_dispose(&self, callback: DisposeCallback) {
		self.handle.on_close(callback);
	}

	fn scope(&self, body: Box<dyn FnOnce(&QueryScope) + '_>) -> ScopeHandle {
		let (id, handle) = {
			let mut state = self.store.lock();
			let id = state.next_scope;
			state.next_scope += 1;
			let handle = releasing_handle(&self.store, id);
			state.children.insert(
				id,
				Child {
					parent: self.id,
					handle: handle.clone(),
				},
			);
			(id, handle)
		};
		let child = Self {
			store: Arc::clone(&self.store),
			delivery: Arc::clone(&self.delivery),
			id,
			handle,
			additional_checks: self.additional_checks,
		};
		if self.handle.is_closed() {
			child.dispose();
		}
		tracing::debug!(parent = self.id, scope = id, "scope.open");
		body(&QueryScope::Live(Arc::new(child.clone())));
		child.handle
	}

	fn performs_additional_checks(&self) -> bool {
		self.additional_checks
	}
}
