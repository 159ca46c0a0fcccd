//! Match values flowing through the network.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::observable::ObservableMatch;
use crate::validity::Validity;

/// Where a match came from: decides its validity and its observable constituents.
///
/// Fact-store adapters implement this for matches whose validity can go
/// stale between fact deliveries.
pub trait Provenance: Send + Sync + 'static {
	fn validate(&self) -> Validity;

	/// Visits every observable match this match is built from.
	fn visit_observables(&self, visit: &mut dyn FnMut(&ObservableMatch));
}

/// Provenance of a match asserted directly by a source.
struct Asserted;

impl Provenance for Asserted {
	fn validate(&self) -> Validity {
		Validity::Valid
	}

	fn visit_observables(&self, _visit: &mut dyn FnMut(&ObservableMatch)) {}
}

/// Provenance of a match produced by joining two parents.
struct Composite {
	lhs: Arc<dyn Provenance>,
	rhs: Arc<dyn Provenance>,
}

impl Provenance for Composite {
	fn validate(&self) -> Validity {
		self.lhs.validate().and(self.rhs.validate())
	}

	fn visit_observables(&self, visit: &mut dyn FnMut(&ObservableMatch)) {
		self.lhs.visit_observables(visit);
		self.rhs.visit_observables(visit);
	}
}

/// Provenance of a match re-emitted by an observable terminal.
struct Observed {
	signal: ObservableMatch,
	raw: Arc<dyn Provenance>,
}

impl Provenance for Observed {
	fn validate(&self) -> Validity {
		if self.signal.is_invalidated() { Validity::Invalid } else { self.raw.validate() }
	}

	fn visit_observables(&self, visit: &mut dyn FnMut(&ObservableMatch)) {
		visit(&self.signal);
		self.raw.visit_observables(visit);
	}
}

/// An immutable fact tuple produced by query evaluation.
///
/// Equality and hashing look only at the value. Two matches carrying equal
/// values are the same match to every memory and table in the network, no
/// matter which provenance they carry.
#[derive(Clone)]
pub struct Match<T> {
	value: T,
	provenance: Arc<dyn Provenance>,
}

impl<T> Match<T> {
	/// Creates a match asserted directly by a source; always valid.
	pub fn new(value: T) -> Self {
		Self {
			value,
			provenance: Arc::new(Asserted),
		}
	}

	pub fn with_provenance(value: T, provenance: Arc<dyn Provenance>) -> Self {
		Self { value, provenance }
	}

	/// Joins two parents into one composite match carrying `value`.
	///
	/// The result is invalid as soon as either parent is, and its observable
	/// submatches are those of both parents.
	pub fn combine<L, R>(lhs: &Match<L>, rhs: &Match<R>, value: T) -> Self {
		Self {
			value,
			provenance: Arc::new(Composite {
				lhs: Arc::clone(&lhs.provenance),
				rhs: Arc::clone(&rhs.provenance),
			}),
		}
	}

	/// Maps this match to a new value that keeps the same provenance.
	pub fn derive<U>(&self, value: U) -> Match<U> {
		Match {
			value,
			provenance: Arc::clone(&self.provenance),
		}
	}

	/// Wraps this match so it reports the invalidation state of `signal`.
	pub fn observed(&self, signal: ObservableMatch) -> Self
	where
		T: Clone,
	{
		Self {
			value: self.value.clone(),
			provenance: Arc::new(Observed {
				signal,
				raw: Arc::clone(&self.provenance),
			}),
		}
	}

	pub fn value(&self) -> &T {
		&self.value
	}

	pub fn into_value(self) -> T {
		self.value
	}

	pub fn provenance(&self) -> &Arc<dyn Provenance> {
		&self.provenance
	}

	pub fn validate(&self) -> Validity {
		self.provenance.validate()
	}

	/// Returns the observable constituents of this match, outermost first.
	pub fn observable_submatches(&self) -> Vec<ObservableMatch> {
		let mut out = Vec::new();
		self.provenance.visit_observables(&mut |m| out.push(m.clone()));
		out
	}

	/// Returns `true` when both matches share one provenance instance.
	pub fn same_instance(&self, other: &Self) -> bool {
		Arc::ptr_eq(&self.provenance, &other.provenance)
	}
}

impl<T: PartialEq> PartialEq for Match<T> {
	fn eq(&self, other: &Self) -> bool {
		self.value == other.value
	}
}

impl<T: Eq> Eq for Match<T> {}

impl<T: Hash> Hash for Match<T> {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.value.hash(state);
	}
}

impl<T: fmt::Debug> fmt::Debug for Match<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_tuple("Match").field(&self.value).finish()
	}
}

/// Anything a guarded scope can extract observable matches from.
pub trait ObservableSubmatches {
	fn collect_observables(&self, out: &mut Vec<ObservableMatch>);
}

impl<T> ObservableSubmatches for Match<T> {
	fn collect_observables(&self, out: &mut Vec<ObservableMatch>) {
		self.provenance.visit_observables(&mut |m| out.push(m.clone()));
	}
}

impl ObservableSubmatches for ObservableMatch {
	fn collect_observables(&self, out: &mut Vec<ObservableMatch>) {
		out.push(self.clone());
	}
}

impl<S: ObservableSubmatches + ?Sized> ObservableSubmatches for &S {
	fn collect_observables(&self, out: &mut Vec<ObservableMatch>) {
		(**self).collect_observables(out);
	}
}

/// Value produced by joining a left and a right match under one key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JoinPair<L, R, K> {
	pub left: L,
	pub right: R,
	pub key: K,
}
