use std::any::TypeId;
use std::fmt::{Debug, Formatter};
use std::sync::{Arc, OnceLock, RwLock};

use fxhash::FxHashMap;
#[cfg(feature = "tracing")]
use tracing::debug;

use crate::config::Configuration;
use crate::errors::MappingError;
use crate::executor::{Mapper, MapperImpl};
use crate::plan::PlanBuilder;
use crate::reflect::{meta_of, Reflected, TypeMeta};

#[derive(Clone, Eq, PartialEq, Hash)]
struct CacheKey {
	from: TypeId,
	to: TypeId,
	configuration: String,
}

// Per-key once-cells keep first-time construction serialized per triple while
// the map locks are never held across a build. Build failures are cached and
// re-raised identically on every later request.
type Slot = Arc<OnceLock<Result<Arc<MapperImpl>, MappingError>>>;

/// Builds and memoizes executors per `(S, D, configuration-name)` triple.
/// Entries are immutable once published and live for the process lifetime.
#[derive(Default)]
pub struct Manager {
	mappers: RwLock<FxHashMap<CacheKey, Slot>>,
}

impl Manager {
	pub fn new() -> Self {
		Self::default()
	}

	/// The process-wide instance. Tests wanting isolation construct their own.
	pub fn default_instance() -> &'static Manager {
		static DEFAULT: OnceLock<Manager> = OnceLock::new();
		DEFAULT.get_or_init(Manager::new)
	}

	pub fn get<S: Reflected, D: Reflected>(&self, configuration: &Configuration) -> Result<Mapper<S, D>, MappingError> {
		self.mapper_for(meta_of::<S>(), meta_of::<D>(), configuration).map(Mapper::new)
	}

	/// Untyped lookup; generic converters use this to obtain sub-executors
	/// for their element pairs while a plan is being built.
	pub fn mapper_for(
		&self,
		from: &'static TypeMeta,
		to: &'static TypeMeta,
		configuration: &Configuration,
	) -> Result<Arc<MapperImpl>, MappingError> {
		let key = CacheKey {
			from: from.id,
			to: to.id,
			configuration: configuration.configuration_name(),
		};

		let slot = self.mappers.read().unwrap().get(&key).cloned();
		let slot = match slot {
			Some(slot) => slot,
			None => {
				#[cfg(feature = "tracing")]
				debug!("building mapper for ({}, {}, {:?})", from.name, to.name, key.configuration);
				self.mappers.write().unwrap().entry(key).or_default().clone()
			}
		};

		slot.get_or_init(|| self.build(from, to, configuration)).clone()
	}

	#[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
	fn build(
		&self,
		from: &'static TypeMeta,
		to: &'static TypeMeta,
		configuration: &Configuration,
	) -> Result<Arc<MapperImpl>, MappingError> {
		// freeze: the name and a snapshot of the configuration are taken
		// here; later mutation of the caller's instance cannot reach the
		// cached executor
		let name = configuration.configuration_name();
		let configuration = configuration.clone();
		let plan = PlanBuilder::new(self, &configuration).build(from, to)?;
		Ok(Arc::new(MapperImpl::new(plan, name)))
	}
}

impl Debug for Manager {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		let mappers = self.mappers.read().unwrap();
		write!(f, "Manager [{}]", mappers.len())
	}
}
