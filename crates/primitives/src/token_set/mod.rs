//! Net-change coalescing for one batch of tokens.
//!
//! Within a batch, an assertion and a retraction of the same match cancel out.
//! What survives is iterated retractions first, then assertions, so consumers
//! keyed by match identity never see two matches claim one slot mid-transition.

use std::collections::hash_set;
use std::hash::Hash;
use std::iter::{Chain, Map};

use rustc_hash::FxHashSet;

use crate::matches::Match;
use crate::token::Token;

/// Accumulates the net change of a batch.
///
/// `asserted` and `retracted` are always disjoint.
#[derive(Debug, Clone)]
pub struct MutableTokenSet<T> {
	asserted: FxHashSet<Match<T>>,
	retracted: FxHashSet<Match<T>>,
}

impl<T> Default for MutableTokenSet<T> {
	fn default() -> Self {
		Self {
			asserted: FxHashSet::default(),
			retracted: FxHashSet::default(),
		}
	}
}

impl<T: Eq + Hash> MutableTokenSet<T> {
	pub fn new() -> Self {
		Self::default()
	}

	/// Folds one token into the net change.
	pub fn add(&mut self, token: Token<T>) {
		let Token { added, matched } = token;
		if added {
			if !self.retracted.remove(&matched) {
				self.asserted.insert(matched);
			}
		} else if !self.asserted.remove(&matched) {
			self.retracted.insert(matched);
		}
	}

	pub fn is_empty(&self) -> bool {
		self.asserted.is_empty() && self.retracted.is_empty()
	}

	pub fn len(&self) -> usize {
		self.asserted.len() + self.retracted.len()
	}

	/// Iterates the net change, retractions first.
	pub fn iter(&self) -> impl Iterator<Item = Token<T>> + '_
	where
		T: Clone,
	{
		self.retracted
			.iter()
			.cloned()
			.map(Token::retract)
			.chain(self.asserted.iter().cloned().map(Token::assert))
	}

	/// Snapshots the current net change.
	pub fn as_token_set(&self) -> TokenSet<T>
	where
		T: Clone,
	{
		self.clone().into_token_set()
	}

	/// Consumes the batch into its immutable net change.
	pub fn into_token_set(self) -> TokenSet<T> {
		TokenSet {
			asserted: self.asserted,
			retracted: self.retracted,
		}
	}
}

impl<T: Eq + Hash> Extend<Token<T>> for MutableTokenSet<T> {
	fn extend<I: IntoIterator<Item = Token<T>>>(&mut self, iter: I) {
		for token in iter {
			self.add(token);
		}
	}
}

impl<T: Eq + Hash> FromIterator<Token<T>> for MutableTokenSet<T> {
	fn from_iter<I: IntoIterator<Item = Token<T>>>(iter: I) -> Self {
		let mut set = Self::new();
		set.extend(iter);
		set
	}
}

/// Immutable net change of one batch.
#[derive(Debug, Clone)]
pub struct TokenSet<T> {
	asserted: FxHashSet<Match<T>>,
	retracted: FxHashSet<Match<T>>,
}

impl<T> TokenSet<T> {
	pub fn asserted(&self) -> &FxHashSet<Match<T>> {
		&self.asserted
	}

	pub fn retracted(&self) -> &FxHashSet<Match<T>> {
		&self.retracted
	}

	pub fn is_empty(&self) -> bool {
		self.asserted.is_empty() && self.retracted.is_empty()
	}

	pub fn len(&self) -> usize {
		self.asserted.len() + self.retracted.len()
	}
}

type IntoTokens<T> = Map<hash_set::IntoIter<Match<T>>, fn(Match<T>) -> Token<T>>;

impl<T> IntoIterator for TokenSet<T> {
	type Item = Token<T>;
	type IntoIter = Chain<IntoTokens<T>, IntoTokens<T>>;

	fn into_iter(self) -> Self::IntoIter {
		let retract: fn(Match<T>) -> Token<T> = Token::retract;
		let assert: fn(Match<T>) -> Token<T> = Token::assert;
		self.retracted.into_iter().map(retract).chain(self.asserted.into_iter().map(assert))
	}
}
