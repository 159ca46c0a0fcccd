use std::sync::{Arc, OnceLock};

use strand_primitives::ObservableMatch;
use tokio_util::sync::CancellationToken;

/// Why a guarded scope stopped before its body completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CancelReason {
	/// One of the scope's own guarded matches was invalidated.
	Invalidated(ObservableMatch),
	/// The enclosing scope or the caller cancelled.
	Scope,
}

/// Cancellation token of one guarded scope, tagged with its cancel reason.
#[derive(Debug, Clone)]
pub(crate) struct GuardToken {
	cancel: CancellationToken,
	stale: Arc<OnceLock<ObservableMatch>>,
}

impl GuardToken {
	/// Creates a token cancelled whenever `parent` is.
	pub fn child_of(parent: &CancellationToken) -> Self {
		Self {
			cancel: parent.child_token(),
			stale: Arc::new(OnceLock::new()),
		}
	}

	/// Records `stale` as the reason, unless one is recorded already, and cancels.
	pub fn invalidate_with(&self, stale: &ObservableMatch) {
		let _ = self.stale.set(stale.clone());
		self.cancel.cancel();
	}

	pub fn reason(&self) -> CancelReason {
		match self.stale.get() {
			Some(stale) => CancelReason::Invalidated(stale.clone()),
			None => CancelReason::Scope,
		}
	}

	pub fn is_cancelled(&self) -> bool {
		self.cancel.is_cancelled()
	}

	pub async fn cancelled(&self) {
		self.cancel.cancelled().await;
	}

	pub fn cancellation(&self) -> &CancellationToken {
		&self.cancel
	}
}
