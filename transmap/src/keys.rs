use std::any::TypeId;

use fxhash::FxHashMap;

use crate::reflect::Reflected;

/// An ordered sequence of type identities, used as the key of every
/// configuration table. `(from, to)` keys converters, `(to,)` keys
/// constructors and post-processors.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct TypeKey(Box<[TypeId]>);

pub type TypeKeyMap<V> = FxHashMap<TypeKey, V>;

impl TypeKey {
	#[inline]
	pub fn single(ty: TypeId) -> Self {
		Self(Box::new([ty]))
	}

	#[inline]
	pub fn pair(from: TypeId, to: TypeId) -> Self {
		Self(Box::new([from, to]))
	}

	#[inline]
	pub fn of<T: Reflected>() -> Self {
		Self::single(TypeId::of::<T>())
	}

	#[inline]
	pub fn of_pair<F: Reflected, T: Reflected>() -> Self {
		Self::pair(TypeId::of::<F>(), TypeId::of::<T>())
	}

	#[inline]
	pub fn types(&self) -> &[TypeId] {
		&self.0
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn pair_keys_are_ordered() {
		let forward = TypeKey::of_pair::<i32, String>();
		let backward = TypeKey::of_pair::<String, i32>();
		assert_ne!(forward, backward);
		assert_eq!(forward, TypeKey::of_pair::<i32, String>());
	}

	#[test]
	fn single_and_pair_keys_differ() {
		let single = TypeKey::of::<i32>();
		let pair = TypeKey::of_pair::<i32, i32>();
		assert_ne!(single, pair);
		assert_eq!(single.types().len(), 1);
		assert_eq!(pair.types().len(), 2);
	}
}
