use std::hash::Hash;

use rustc_hash::{FxHashMap, FxHashSet};
use strand_primitives::Match;

/// Matches currently asserted on one join input, grouped by key.
///
/// A key is present only while at least one match is stored under it.
pub struct JoinMemory<K, V> {
	entries: FxHashMap<K, FxHashSet<Match<V>>>,
}

impl<K, V> Default for JoinMemory<K, V> {
	fn default() -> Self {
		Self {
			entries: FxHashMap::default(),
		}
	}
}

impl<K, V> JoinMemory<K, V>
where
	K: Eq + Hash,
	V: Eq + Hash,
{
	pub fn new() -> Self {
		Self::default()
	}

	/// Stores `matched` under `key`, replacing an equal match.
	pub fn insert(&mut self, key: K, matched: Match<V>) {
		self.entries.entry(key).or_default().replace(matched);
	}

	/// Removes `matched` from `key`, dropping the key once it is empty.
	///
	/// Returns `false` and leaves the memory untouched if the match was not
	/// stored under `key`.
	pub fn remove(&mut self, key: &K, matched: &Match<V>) -> bool {
		let Some(set) = self.entries.get_mut(key) else {
			return false;
		};
		if !set.remove(matched) {
			return false;
		}
		if set.is_empty() {
			self.entries.remove(key);
		}
		true
	}

	/// Matches stored under `key`.
	pub fn get<'a>(&'a self, key: &K) -> impl Iterator<Item = &'a Match<V>> + 'a {
		self.entries.get(key).into_iter().flatten()
	}

	pub fn contains_key(&self, key: &K) -> bool {
		self.entries.contains_key(key)
	}

	pub fn iter(&self) -> impl Iterator<Item = (&K, &FxHashSet<Match<V>>)> {
		self.entries.iter()
	}

	/// Number of keys.
	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	/// Total number of stored matches across all keys.
	pub fn match_count(&self) -> usize {
		self.entries.values().map(FxHashSet::len).sum()
	}

	/// First key left with an empty match set, if any.
	pub(crate) fn empty_key(&self) -> Option<&K> {
		self.entries.iter().find_map(|(key, set)| set.is_empty().then_some(key))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn key_disappears_with_last_match() {
		let mut memory = JoinMemory::new();
		memory.insert(1, Match::new("a"));
		memory.insert(1, Match::new("b"));
		assert_eq!(memory.match_count(), 2);

		assert!(memory.remove(&1, &Match::new("a")));
		assert!(memory.contains_key(&1));
		assert!(memory.remove(&1, &Match::new("b")));
		assert!(!memory.contains_key(&1));
		assert!(memory.is_empty());
		assert_eq!(memory.empty_key(), None);
	}

	#[test]
	fn missing_match_is_reported_without_change() {
		let mut memory = JoinMemory::new();
		memory.insert(1, Match::new("a"));
		assert!(!memory.remove(&1, &Match::new("z")));
		assert!(!memory.remove(&2, &Match::new("a")));
		assert_eq!(memory.len(), 1);
		assert_eq!(memory.get(&1).count(), 1);
	}

	#[test]
	fn reinsert_of_equal_value_keeps_one_entry() {
		let mut memory = JoinMemory::new();
		memory.insert("k", Match::new(7));
		memory.insert("k", Match::new(7));
		assert_eq!(memory.match_count(), 1);
		assert_eq!(memory.get(&"missing").count(), 0);
	}
}
