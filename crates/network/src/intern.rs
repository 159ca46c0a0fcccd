//! Query identity by explicit key.
//!
//! Two query graphs built independently share network nodes when their
//! authors intern them under equal keys. Nothing else about the graphs is
//! compared.

use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::error::Result;
use crate::network::Network;
use crate::producer::Producer;
use crate::query::Query;

trait KeyObject: Any + Send + Sync {
	fn as_any(&self) -> &dyn Any;
	fn eq_key(&self, other: &dyn KeyObject) -> bool;
	fn hash_key(&self, state: &mut dyn Hasher);
	fn fmt_key(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result;
}

impl<K> KeyObject for K
where
	K: Eq + Hash + fmt::Debug + Send + Sync + 'static,
{
	fn as_any(&self) -> &dyn Any {
		self
	}

	fn eq_key(&self, other: &dyn KeyObject) -> bool {
		other.as_any().downcast_ref::<K>() == Some(self)
	}

	fn hash_key(&self, mut state: &mut dyn Hasher) {
		TypeId::of::<K>().hash(&mut state);
		self.hash(&mut state);
	}

	fn fmt_key(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		fmt::Debug::fmt(self, f)
	}
}

/// Type-erased identity of an interned query.
///
/// Keys of different types never compare equal.
#[derive(Clone)]
pub struct QueryKey(Arc<dyn KeyObject>);

impl QueryKey {
	pub fn new<K>(key: K) -> Self
	where
		K: Eq + Hash + fmt::Debug + Send + Sync + 'static,
	{
		Self(Arc::new(key))
	}

	/// Returns the key value if it has type `K`.
	pub fn downcast_ref<K: 'static>(&self) -> Option<&K> {
		self.0.as_any().downcast_ref()
	}
}

impl PartialEq for QueryKey {
	fn eq(&self, other: &Self) -> bool {
		self.0.eq_key(other.0.as_ref())
	}
}

impl Eq for QueryKey {}

impl Hash for QueryKey {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.0.hash_key(state);
	}
}

impl fmt::Debug for QueryKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("QueryKey(")?;
		self.0.fmt_key(f)?;
		f.write_str(")")
	}
}

/// Query that compares and hashes by its key alone.
///
/// Building its producer goes through [`Network::shared_producer`], so every
/// interned query with an equal key resolves to the same node.
pub struct InternedQuery<T> {
	query: Arc<dyn Query<T>>,
	key: QueryKey,
}

impl<T> InternedQuery<T> {
	pub fn new<K>(query: Arc<dyn Query<T>>, key: K) -> Self
	where
		K: Eq + Hash + fmt::Debug + Send + Sync + 'static,
	{
		Self {
			query,
			key: QueryKey::new(key),
		}
	}

	pub fn key(&self) -> &QueryKey {
		&self.key
	}
}

impl<T> Clone for InternedQuery<T> {
	fn clone(&self) -> Self {
		Self {
			query: Arc::clone(&self.query),
			key: self.key.clone(),
		}
	}
}

impl<T> PartialEq for InternedQuery<T> {
	fn eq(&self, other: &Self) -> bool {
		self.key == other.key
	}
}

impl<T> Eq for InternedQuery<T> {}

impl<T> Hash for InternedQuery<T> {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.key.hash(state);
	}
}

impl<T> fmt::Debug for InternedQuery<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("InternedQuery").field("key", &self.key).finish_non_exhaustive()
	}
}

impl<T: 'static> Query<T> for InternedQuery<T> {
	fn producer(&self, network: &Network) -> Result<Arc<dyn Producer<T>>> {
		network.shared_producer(&self.key, || self.query.producer(network))
	}
}
