/// Outcome of re-checking whether a match still holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Validity {
	/// The match is known to hold.
	Valid,
	/// The match no longer holds.
	Invalid,
	/// The match may be stale and needs a recheck against the fact store.
	Unknown,
}

impl Validity {
	/// Combines the validity of two constituents of one composite match.
	///
	/// Invalid dominates unknown, unknown dominates valid.
	#[must_use]
	pub const fn and(self, other: Self) -> Self {
		match (self, other) {
			(Self::Invalid, _) | (_, Self::Invalid) => Self::Invalid,
			(Self::Unknown, _) | (_, Self::Unknown) => Self::Unknown,
			(Self::Valid, Self::Valid) => Self::Valid,
		}
	}
}
