//! One guarded task per live match of a query.

use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use strand_primitives::{Match, Token};
use strand_worker::{Guard, MatchScope, ScopeCancelled, TaskClass, WithMatchResult, ambient_handle, spawn_on};
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::network::Network;
use crate::producer::{Producer, Subscription};
use crate::query::Query;

struct LaunchState<T> {
	tasks: FxHashMap<Match<T>, JoinHandle<()>>,
}

/// Tasks launched by [`launch_on_each`].
///
/// Dropping the launcher detaches it from the query and aborts every task
/// still running.
#[must_use = "dropping the launcher aborts its tasks"]
pub struct Launcher<T> {
	state: Arc<Mutex<LaunchState<T>>>,
	subscription: Option<Subscription>,
	_producer: Arc<dyn Producer<T>>,
}

impl<T> Launcher<T> {
	/// Number of matches with a task, finished or not.
	pub fn len(&self) -> usize {
		self.state.lock().tasks.len()
	}

	pub fn is_empty(&self) -> bool {
		self.state.lock().tasks.is_empty()
	}
}

impl<T> Drop for Launcher<T> {
	fn drop(&mut self) {
		drop(self.subscription.take());
		let tasks = std::mem::take(&mut self.state.lock().tasks);
		tracing::debug!(tasks = tasks.len(), "launch.shutdown");
		for task in tasks.into_values() {
			task.abort();
		}
	}
}

/// Runs `f` once per match of `query`, each run guarded by that match.
///
/// Every asserted match gets a task spawned on the ambient runtime; its guard
/// is armed before the task is spawned, so an invalidation that happens
/// first still cancels it. The task is cancelled when its match's observable
/// submatches are invalidated and aborted when the match is retracted.
pub fn launch_on_each<T, Q, F, Fut>(network: &Network, query: &Q, scope: &MatchScope, class: TaskClass, f: F) -> Result<Launcher<T>>
where
	T: Clone + Eq + Hash + Debug + Send + Sync + 'static,
	Q: Query<T> + ?Sized,
	F: Fn(Match<T>, MatchScope) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = ()> + Send + 'static,
{
	let handle = ambient_handle()?;
	let producer = query.producer(network)?;
	let state = Arc::new(Mutex::new(LaunchState {
		tasks: FxHashMap::default(),
	}));

	let f = Arc::new(f);
	let weak = Arc::downgrade(&state);
	let scope = scope.clone();
	let subscription = producer.collect(Box::new(move |token: Token<T>| -> Result<()> {
		let Some(state) = weak.upgrade() else {
			return Ok(());
		};
		if !token.added {
			if let Some(task) = state.lock().tasks.remove(&token.matched) {
				tracing::trace!(value = ?token.value(), "launch.retract");
				task.abort();
			}
			return Ok(());
		}

		let guard = Guard::arm(&scope, [&token.matched]);
		let f = Arc::clone(&f);
		let matched = token.matched.clone();
		let task = spawn_on(&handle, class, async move {
			match guard.run(|scope| f(matched, scope)).await {
				Ok(WithMatchResult::Success(())) => tracing::trace!("launch.done"),
				Ok(WithMatchResult::Failure(stale)) => tracing::debug!(observable = stale.id().get(), "launch.stale"),
				Err(ScopeCancelled) => tracing::debug!("launch.cancelled"),
			}
		});
		if let Some(previous) = state.lock().tasks.insert(token.matched, task) {
			previous.abort();
		}
		Ok(())
	}))?;

	Ok(Launcher {
		state,
		subscription: Some(subscription),
		_producer: producer,
	})
}
