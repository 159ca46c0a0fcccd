//! Structured concurrency scoped to the validity of live matches.
//!
//! A [`Guard`] protects a unit of async work with the observable matches it
//! depends on. Arming the guard registers one invalidation handler per match
//! that is not already covered by an enclosing scope; running it races the
//! body against those handlers. The body is dropped the moment any guarded
//! match is invalidated, and the caller receives
//! [`WithMatchResult::Failure`] naming that match.

use std::future::Future;

use rustc_hash::FxHashSet;
use strand_primitives::{InvalidationRegistration, ObservableMatch, ObservableSubmatches};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::scope::MatchScope;
use crate::spawn::{SpawnError, ambient_handle, spawn_on};
use crate::token::{CancelReason, GuardToken};
use crate::TaskClass;

/// Outcome of guarded work whose scope was not cancelled from outside.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WithMatchResult<U> {
	/// The body ran to completion.
	Success(U),
	/// A guarded match went stale while the body was running.
	Failure(ObservableMatch),
}

impl<U> WithMatchResult<U> {
	pub fn is_success(&self) -> bool {
		matches!(self, Self::Success(_))
	}

	pub fn success(self) -> Option<U> {
		match self {
			Self::Success(value) => Some(value),
			Self::Failure(_) => None,
		}
	}

	/// Returns the match whose invalidation cancelled the work.
	pub fn stale_match(&self) -> Option<&ObservableMatch> {
		match self {
			Self::Success(_) => None,
			Self::Failure(stale) => Some(stale),
		}
	}

	pub fn map<V>(self, f: impl FnOnce(U) -> V) -> WithMatchResult<V> {
		match self {
			Self::Success(value) => WithMatchResult::Success(f(value)),
			Self::Failure(stale) => WithMatchResult::Failure(stale),
		}
	}
}

/// Guarded work was cancelled by something other than its own matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("guarded scope was cancelled by its caller")]
pub struct ScopeCancelled;

/// Result of running guarded work.
pub type GuardResult<U> = Result<WithMatchResult<U>, ScopeCancelled>;

struct Armed {
	parent: CancellationToken,
	token: GuardToken,
	guarded: Vec<ObservableMatch>,
	registrations: Vec<InvalidationRegistration>,
}

/// Invalidation guard armed over a set of matches.
pub struct Guard {
	scope: MatchScope,
	armed: Option<Armed>,
}

impl Guard {
	/// Registers invalidation handlers for every observable submatch of
	/// `matches` that `scope` does not already cover.
	///
	/// Registration completes before this returns, so a match invalidated any
	/// time after arming cancels the body, even one that has not been polled yet.
	pub fn arm<I>(scope: &MatchScope, matches: I) -> Self
	where
		I: IntoIterator,
		I::Item: ObservableSubmatches,
	{
		let mut candidates = Vec::new();
		for m in matches {
			m.collect_observables(&mut candidates);
		}
		let mut seen = FxHashSet::default();
		let guarded: Vec<ObservableMatch> = candidates.into_iter().filter(|m| !scope.covers(m) && seen.insert(m.id())).collect();

		if guarded.is_empty() {
			tracing::trace!(covered = scope.covered_len(), "guard.covered");
			return Self {
				scope: scope.clone(),
				armed: None,
			};
		}

		let token = GuardToken::child_of(scope.cancellation());
		let nested = scope.nest(&guarded, token.cancellation().clone());
		let registrations = guarded
			.iter()
			.map(|m| {
				let token = token.clone();
				m.on_invalidation(move |stale| {
					tracing::debug!(observable = stale.id().get(), "guard.invalidated");
					token.invalidate_with(stale);
				})
			})
			.collect();
		tracing::debug!(guarded = guarded.len(), covered = scope.covered_len(), "guard.arm");

		Self {
			scope: nested,
			armed: Some(Armed {
				parent: scope.cancellation().clone(),
				token,
				guarded,
				registrations,
			}),
		}
	}

	/// Scope handed to the body, covering everything this guard protects.
	pub fn scope(&self) -> &MatchScope {
		&self.scope
	}

	/// Matches this guard registered handlers on.
	pub fn guarded(&self) -> &[ObservableMatch] {
		match &self.armed {
			Some(armed) => &armed.guarded,
			None => &[],
		}
	}

	/// Returns `true` once a guarded match has been invalidated.
	pub fn is_stale(&self) -> bool {
		self.armed.as_ref().is_some_and(|armed| matches!(armed.token.reason(), CancelReason::Invalidated(_)))
	}

	/// Runs `body` under the guard.
	///
	/// Handlers are deregistered only after the outcome is decided.
	pub async fn run<U, F, Fut>(self, body: F) -> GuardResult<U>
	where
		F: FnOnce(MatchScope) -> Fut,
		Fut: Future<Output = U>,
	{
		let Self { scope, armed } = self;
		let Some(armed) = armed else {
			let cancel = scope.cancellation().clone();
			return tokio::select! {
				biased;
				() = cancel.cancelled() => Err(ScopeCancelled),
				value = body(scope) => Ok(WithMatchResult::Success(value)),
			};
		};

		let outcome = if armed.token.is_cancelled() {
			None
		} else {
			let body = body(scope);
			tokio::select! {
				biased;
				() = armed.token.cancelled() => None,
				value = body => Some(value),
			}
		};

		let Armed {
			parent,
			token,
			guarded,
			registrations,
		} = armed;
		drop(registrations);

		match outcome {
			Some(value) => Ok(WithMatchResult::Success(value)),
			// Caller cancellation wins over a match invalidated in the same window.
			None if parent.is_cancelled() => {
				tracing::debug!("guard.cancelled");
				Err(ScopeCancelled)
			}
			None => match token.reason() {
				CancelReason::Invalidated(stale) if guarded.contains(&stale) => {
					tracing::debug!(observable = stale.id().get(), "guard.failure");
					Ok(WithMatchResult::Failure(stale))
				}
				_ => {
					tracing::debug!("guard.cancelled");
					Err(ScopeCancelled)
				}
			},
		}
	}
}

/// Runs `body` for as long as every observable submatch of `matches` stays live.
///
/// Matches already covered by `scope` are not guarded again. Invalidation of
/// a newly guarded match yields `Ok(Failure(match))`; cancellation of `scope`
/// yields `Err(ScopeCancelled)`; panics in `body` propagate.
pub async fn with_observable_matches<I, U, F, Fut>(scope: &MatchScope, matches: I, body: F) -> GuardResult<U>
where
	I: IntoIterator,
	I::Item: ObservableSubmatches,
	F: FnOnce(MatchScope) -> Fut,
	Fut: Future<Output = U>,
{
	Guard::arm(scope, matches).run(body).await
}

/// Spawns guarded work onto the ambient runtime.
///
/// The guard is armed before this returns.
pub fn spawn_guarded<I, U, F, Fut>(class: TaskClass, scope: &MatchScope, matches: I, body: F) -> Result<JoinHandle<GuardResult<U>>, SpawnError>
where
	I: IntoIterator,
	I::Item: ObservableSubmatches,
	F: FnOnce(MatchScope) -> Fut + Send + 'static,
	Fut: Future<Output = U> + Send + 'static,
	U: Send + 'static,
{
	let handle = ambient_handle()?;
	let guard = Guard::arm(scope, matches);
	Ok(spawn_on(&handle, class, guard.run(body)))
}
