//! Primitive facts and the patterns queries subscribe with.

use std::fmt;
use std::sync::Arc;

use strand_primitives::Token;

use crate::error::Result;
use crate::network::Network;
use crate::producer::Producer;
use crate::query::Query;
use crate::source::SourceNode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(pub u64);

impl fmt::Display for EntityId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "#{}", self.0)
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Attribute(Arc<str>);

impl Attribute {
	pub fn new(name: impl Into<Arc<str>>) -> Self {
		Self(name.into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for Attribute {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FactValue {
	Entity(EntityId),
	Str(Arc<str>),
	Int(i64),
	Bool(bool),
}

impl From<EntityId> for FactValue {
	fn from(id: EntityId) -> Self {
		Self::Entity(id)
	}
}

impl From<&str> for FactValue {
	fn from(value: &str) -> Self {
		Self::Str(value.into())
	}
}

impl From<i64> for FactValue {
	fn from(value: i64) -> Self {
		Self::Int(value)
	}
}

impl From<bool> for FactValue {
	fn from(value: bool) -> Self {
		Self::Bool(value)
	}
}

/// One `(entity, attribute, value)` triple of the fact store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fact {
	pub entity: EntityId,
	pub attribute: Attribute,
	pub value: FactValue,
}

impl Fact {
	pub fn new(entity: EntityId, attribute: Attribute, value: impl Into<FactValue>) -> Self {
		Self {
			entity,
			attribute,
			value: value.into(),
		}
	}
}

/// Fact-change filter; an unset component matches anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct FactPattern {
	pub entity: Option<EntityId>,
	pub attribute: Option<Attribute>,
	pub value: Option<FactValue>,
}

impl FactPattern {
	/// Pattern matching every fact.
	pub fn any() -> Self {
		Self::default()
	}

	#[must_use]
	pub fn entity(mut self, entity: EntityId) -> Self {
		self.entity = Some(entity);
		self
	}

	#[must_use]
	pub fn attribute(mut self, attribute: Attribute) -> Self {
		self.attribute = Some(attribute);
		self
	}

	#[must_use]
	pub fn value(mut self, value: impl Into<FactValue>) -> Self {
		self.value = Some(value.into());
		self
	}

	pub fn matches(&self, fact: &Fact) -> bool {
		self.entity.is_none_or(|entity| entity == fact.entity)
			&& self.attribute.as_ref().is_none_or(|attribute| *attribute == fact.attribute)
			&& self.value.as_ref().is_none_or(|value| *value == fact.value)
	}
}

/// Identifier pattern used for staleness re-checks.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IdPattern {
	Entity(EntityId),
	Attribute(Attribute),
}

impl IdPattern {
	pub fn matches(&self, fact: &Fact) -> bool {
		match self {
			Self::Entity(entity) => *entity == fact.entity,
			Self::Attribute(attribute) => *attribute == fact.attribute,
		}
	}
}

/// Receives fact changes matching a subscription.
pub type FactPort = Arc<dyn Fn(Token<Fact>) -> Result<()> + Send + Sync>;

/// Receives the fact whose identifiers need a staleness re-check.
pub type RevalidationPort = Arc<dyn Fn(&Fact) + Send + Sync>;

/// Query over the facts matching one pattern.
///
/// Each producer is a fresh source node subscribed through the network's
/// scope; under a detached scope it stays empty.
#[derive(Debug, Clone)]
pub struct FactQuery {
	pattern: FactPattern,
}

impl FactQuery {
	pub fn new(pattern: FactPattern) -> Self {
		Self { pattern }
	}

	pub fn pattern(&self) -> &FactPattern {
		&self.pattern
	}
}

impl Query<Fact> for FactQuery {
	fn producer(&self, network: &Network) -> Result<Arc<dyn Producer<Fact>>> {
		let source = SourceNode::new();
		let port_source = source.clone();
		network.scope().subscribe(self.pattern.clone(), Arc::new(move |token: Token<Fact>| port_source.apply([token])))?;
		Ok(Arc::new(source))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn fact(entity: u64, attribute: &str, value: impl Into<FactValue>) -> Fact {
		Fact::new(EntityId(entity), Attribute::new(attribute), value)
	}

	#[test]
	fn pattern_components_narrow_the_match() {
		let f = fact(1, "name", "ada");
		assert!(FactPattern::any().matches(&f));
		assert!(FactPattern::any().entity(EntityId(1)).matches(&f));
		assert!(!FactPattern::any().entity(EntityId(2)).matches(&f));
		assert!(FactPattern::any().attribute(Attribute::new("name")).value("ada").matches(&f));
		assert!(!FactPattern::any().attribute(Attribute::new("name")).value("bob").matches(&f));
		assert!(!FactPattern::any().value(3i64).matches(&f));
	}

	#[test]
	fn id_patterns_match_entity_or_attribute() {
		let f = fact(4, "parent", EntityId(9));
		assert!(IdPattern::Entity(EntityId(4)).matches(&f));
		assert!(!IdPattern::Entity(EntityId(9)).matches(&f));
		assert!(IdPattern::Attribute(Attribute::new("parent")).matches(&f));
	}
}
