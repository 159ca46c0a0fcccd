use crate::matches::Match;

/// Atomic assertion or retraction of one match.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Token<T> {
	/// `true` for an assertion, `false` for a retraction.
	pub added: bool,
	pub matched: Match<T>,
}

impl<T> Token<T> {
	pub fn assert(matched: Match<T>) -> Self {
		Self { added: true, matched }
	}

	pub fn retract(matched: Match<T>) -> Self {
		Self { added: false, matched }
	}

	/// Carries the same change over to a derived match.
	pub fn with_match<U>(&self, matched: Match<U>) -> Token<U> {
		Token { added: self.added, matched }
	}

	pub fn value(&self) -> &T {
		self.matched.value()
	}
}
