use std::sync::{Arc, OnceLock};

use crate::config::Configuration;
use crate::errors::MappingError;
use crate::keys::{TypeKey, TypeKeyMap};
use crate::manager::Manager;
use crate::operations::{ConverterFn, MapState, RootFlags};
use crate::reflect::{meta_of, BoxedValue, Reflected, TypeMeta, TypeShape};

pub mod collection;

/// One side of a generic converter registration. A provider matches a
/// concrete type pair when both sides' patterns accept the respective metas.
#[derive(Debug, Copy, Clone)]
pub enum TypePattern {
	Any,
	Scalar,
	Object,
	Sequence,
	Array,
	Nullable,
	Concrete(&'static TypeMeta),
}

impl TypePattern {
	#[inline]
	pub fn of<T: Reflected>() -> Self {
		TypePattern::Concrete(meta_of::<T>())
	}

	pub(crate) fn matches(&self, meta: &TypeMeta) -> bool {
		match self {
			TypePattern::Any => true,
			TypePattern::Scalar => meta.shape == TypeShape::Scalar,
			TypePattern::Object => meta.shape == TypeShape::Object,
			TypePattern::Sequence => meta.shape == TypeShape::Sequence,
			TypePattern::Array => meta.shape == TypeShape::Array,
			TypePattern::Nullable => meta.shape == TypeShape::Nullable,
			TypePattern::Concrete(expected) => expected.id == meta.id,
		}
	}

	pub(crate) fn summary(&self) -> &'static str {
		match self {
			TypePattern::Any => "any",
			TypePattern::Scalar => "scalar",
			TypePattern::Object => "object",
			TypePattern::Sequence => "sequence",
			TypePattern::Array => "array",
			TypePattern::Nullable => "nullable",
			TypePattern::Concrete(meta) => meta.name,
		}
	}
}

/// Build environment handed to generic converters while they initialize.
/// Exposes the frozen configuration and the manager, so converters may
/// request sub-executors for their element pairs.
pub struct ProviderEnv<'l> {
	pub configuration: &'l Configuration,
	pub manager: &'l Manager,
	pub flags: RootFlags,
}

/// Produces converter instances for every concrete pair matched by the
/// registered type patterns.
pub trait ConverterProvider: Send + Sync {
	fn name(&self) -> &'static str;
	fn create(&self, from: &'static TypeMeta, to: &'static TypeMeta)
		-> Result<Box<dyn CustomConverter>, MappingError>;
}

/// A converter materialized by a provider. `initialize` runs once at plan
/// build time, before the instance is bound into the plan.
pub trait CustomConverter: Send + Sync {
	fn initialize(
		&mut self,
		_from: &'static TypeMeta,
		_to: &'static TypeMeta,
		_env: &ProviderEnv,
	) -> Result<(), MappingError> {
		Ok(())
	}

	fn convert(&self, value: Option<BoxedValue>, state: MapState)
		-> Result<Option<BoxedValue>, MappingError>;
}

#[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
pub(crate) fn materialize(
	provider: &dyn ConverterProvider,
	from: &'static TypeMeta,
	to: &'static TypeMeta,
	env: &ProviderEnv,
) -> Result<ConverterFn, MappingError> {
	let mut converter = provider.create(from, to)?;
	converter.initialize(from, to, env)?;
	let converter: Arc<dyn CustomConverter> = Arc::from(converter);
	Ok(Arc::new(move |value, state| converter.convert(value, state)))
}

/// A table of free-function scalar conversions `(F, T) -> fn`. Configurations
/// may install their own registry; lookups fall back to the process default.
pub struct StaticConverterRegistry {
	name: &'static str,
	entries: TypeKeyMap<ConverterFn>,
}

impl StaticConverterRegistry {
	pub fn new(name: &'static str) -> Self {
		Self { name, entries: Default::default() }
	}

	#[inline]
	pub fn name(&self) -> &'static str {
		self.name
	}

	pub fn register<From, To>(&mut self, convert: fn(From) -> To)
	where
		From: Reflected,
		To: Reflected,
	{
		let converter: ConverterFn = Arc::new(move |value, _state| {
			match value {
				None => Ok(None),
				Some(value) => match value.downcast::<From>() {
					Ok(value) => Ok(Some(Box::new(convert(*value)) as BoxedValue)),
					Err(_) => Err(MappingError::MismatchedValue { expected: meta_of::<From>().name }),
				},
			}
		});
		self.entries.insert(TypeKey::of_pair::<From, To>(), converter);
	}

	pub(crate) fn lookup(&self, from: &TypeMeta, to: &TypeMeta) -> Option<ConverterFn> {
		self.entries.get(&TypeKey::pair(from.id, to.id)).cloned()
	}
}

/// The process-default registry: widening numeric conversions only. Narrowing
/// a scalar requires an explicit registration.
pub fn default_converters() -> &'static StaticConverterRegistry {
	static DEFAULT: OnceLock<StaticConverterRegistry> = OnceLock::new();
	DEFAULT.get_or_init(|| {
		let mut registry = StaticConverterRegistry::new("default");

		macro_rules! widen {
			($from: ty => $($to: ty),*) => {$(
				registry.register::<$from, $to>(|value| value as $to);
			)*};
		}

		widen!(i8 => i16, i32, i64, isize, f32, f64);
		widen!(i16 => i32, i64, isize, f32, f64);
		widen!(i32 => i64, f64);
		widen!(u8 => u16, u32, u64, usize, i16, i32, i64, f32, f64);
		widen!(u16 => u32, u64, usize, i32, i64, f64);
		widen!(u32 => u64, i64, f64);
		widen!(f32 => f64);
		registry.register::<char, String>(|value| value.to_string());

		registry
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn default_registry_widens_but_never_narrows() {
		let registry = default_converters();
		assert!(registry.lookup(meta_of::<i32>(), meta_of::<i64>()).is_some());
		assert!(registry.lookup(meta_of::<u8>(), meta_of::<f64>()).is_some());
		assert!(registry.lookup(meta_of::<i64>(), meta_of::<i32>()).is_none());
		assert!(registry.lookup(meta_of::<f64>(), meta_of::<f32>()).is_none());
	}

	#[test]
	fn registered_conversion_applies() {
		let mut registry = StaticConverterRegistry::new("test");
		registry.register::<i32, String>(|value| format!("n={value}"));

		let convert = registry.lookup(meta_of::<i32>(), meta_of::<String>()).unwrap();
		let converted = convert(Some(Box::new(5i32)), None).unwrap().unwrap();
		assert_eq!(converted.downcast_ref::<String>(), Some(&"n=5".to_string()));
	}

	#[test]
	fn absent_values_pass_through() {
		let convert = default_converters().lookup(meta_of::<i8>(), meta_of::<i64>()).unwrap();
		assert!(convert(None, None).unwrap().is_none());
	}

	#[test]
	fn patterns_match_by_shape_and_identity() {
		assert!(TypePattern::Sequence.matches(meta_of::<Vec<i32>>()));
		assert!(TypePattern::Array.matches(meta_of::<Box<[String]>>()));
		assert!(!TypePattern::Array.matches(meta_of::<Vec<i32>>()));
		assert!(TypePattern::Nullable.matches(meta_of::<Option<i32>>()));
		assert!(TypePattern::of::<i32>().matches(meta_of::<i32>()));
		assert!(!TypePattern::of::<i32>().matches(meta_of::<i64>()));
		assert!(TypePattern::Any.matches(meta_of::<String>()));
	}
}
