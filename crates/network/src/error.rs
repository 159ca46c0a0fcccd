//! Error types for network construction and token delivery.

use std::fmt;

use strand_worker::SpawnError;
use thiserror::Error;

/// Side of a two-input join node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinSide {
	Left,
	Right,
}

impl fmt::Display for JoinSide {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Self::Left => "left",
			Self::Right => "right",
		})
	}
}

/// Errors raised while building nodes or delivering tokens.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetworkError {
	/// A join input retracted a match it never asserted.
	///
	/// The offending token is not applied; the join memory is unchanged.
	#[error("{side} join input retracted a match never asserted under key {key}")]
	RetractWithoutAssert {
		/// Join input that delivered the retraction.
		side: JoinSide,
		/// Debug rendering of the join key.
		key: String,
	},

	/// Diagnostics found a join memory key with no matches left.
	#[error("{side} join memory keeps an empty entry for key {key}")]
	EmptyMemoryEntry {
		/// Memory holding the empty entry.
		side: JoinSide,
		/// Debug rendering of the join key.
		key: String,
	},

	/// Guarded work could not be scheduled.
	#[error(transparent)]
	Spawn(#[from] SpawnError),
}

/// Result type for network operations.
pub type Result<T> = std::result::Result<T, NetworkError>;
