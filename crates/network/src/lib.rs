//! Incremental query network.
//!
//! Queries describe computations; building one inside a [`Network`] yields a
//! live [`Producer`] that replays its current matches to each collector and
//! then streams assert/retract deltas. Joins are maintained incrementally,
//! observable terminals attach invalidation signals to their matches, and
//! [`launch_on_each`] binds async work to those signals.

mod error;
mod facts;
mod intern;
mod join;
mod launch;
mod network;
mod observable;
mod producer;
mod query;
mod scope;
mod source;

pub use error::{JoinSide, NetworkError, Result};
pub use facts::{Attribute, EntityId, Fact, FactPattern, FactPort, FactQuery, FactValue, IdPattern, RevalidationPort};
pub use intern::{InternedQuery, QueryKey};
pub use join::{JoinMemory, JoinValue, RawJoin, join_on, raw_join_on};
pub use launch::{Launcher, launch_on_each};
pub use network::{Network, NetworkSpec};
pub use observable::ObservableQuery;
pub use producer::{BoxCollector, Collector, Producer, Subscription};
pub use query::{FlatMap, Query, QueryExt, Traced};
pub use scope::{DisposeCallback, LocalScope, QueryScope, ScopeHandle, SubscriptionScope};
pub use source::SourceNode;
