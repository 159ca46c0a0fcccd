//! Core types for the incremental query network: tokens, matches, net changes
//! and the invalidation signal of observable matches.

/// Match values, provenance and join pairs.
pub mod matches;
/// One-shot invalidation signal of observable matches.
pub mod observable;
/// Assert/retract tokens.
pub mod token;
/// Net-change coalescing of token batches.
pub mod token_set;
/// Tri-state match validity.
pub mod validity;

pub use matches::{JoinPair, Match, ObservableSubmatches, Provenance};
pub use observable::{InvalidationRegistration, ObservableId, ObservableMatch, TerminalId};
pub use token::Token;
pub use token_set::{MutableTokenSet, TokenSet};
pub use validity::Validity;
