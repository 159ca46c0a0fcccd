//! Task spawning and match-scoped structured concurrency for the query network.
//!
//! Work guarded by [`with_observable_matches`] or [`spawn_guarded`] is
//! cancelled as soon as one of the live matches it depends on is invalidated,
//! and reports that match back to the caller.

mod class;
mod guard;
mod scope;
mod spawn;
mod token;

pub use class::TaskClass;
pub use guard::{Guard, GuardResult, ScopeCancelled, WithMatchResult, spawn_guarded, with_observable_matches};
pub use scope::MatchScope;
pub use spawn::{SpawnError, ambient_handle, spawn, spawn_on};
