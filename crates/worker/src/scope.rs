use std::sync::Arc;

use rustc_hash::FxHashSet;
use strand_primitives::ObservableMatch;
use tokio_util::sync::CancellationToken;

/// Context passed down through nested guarded work.
///
/// Carries the observable matches an enclosing guard already protects, so
/// nested guards skip them, and the cancellation token of the innermost
/// enclosing scope.
#[derive(Debug, Clone, Default)]
pub struct MatchScope {
	covered: Arc<FxHashSet<ObservableMatch>>,
	cancel: CancellationToken,
}

impl MatchScope {
	/// Creates a root scope that covers nothing and is never cancelled on its own.
	pub fn new() -> Self {
		Self::default()
	}

	/// Creates a root scope cancelled together with `cancel`.
	pub fn with_cancellation(cancel: CancellationToken) -> Self {
		Self {
			covered: Arc::default(),
			cancel,
		}
	}

	pub fn covers(&self, m: &ObservableMatch) -> bool {
		self.covered.contains(m)
	}

	pub fn covered(&self) -> impl Iterator<Item = &ObservableMatch> {
		self.covered.iter()
	}

	pub fn covered_len(&self) -> usize {
		self.covered.len()
	}

	pub fn cancellation(&self) -> &CancellationToken {
		&self.cancel
	}

	pub fn is_cancelled(&self) -> bool {
		self.cancel.is_cancelled()
	}

	/// Returns a nested scope that also covers `fresh`.
	pub(crate) fn nest(&self, fresh: &[ObservableMatch], cancel: CancellationToken) -> Self {
		let mut covered = (*self.covered).clone();
		covered.extend(fresh.iter().cloned());
		Self {
			covered: Arc::new(covered),
			cancel,
		}
	}
}
