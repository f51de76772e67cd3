use std::sync::Arc;

use derivative::Derivative;

use crate::convert::collection::CollectionToArrayProvider;
use crate::convert::{ConverterProvider, StaticConverterRegistry, TypePattern, default_converters};
use crate::errors::MappingError;
use crate::keys::{TypeKey, TypeKeyMap};
use crate::operations::{ConstructorFn, ConverterFn, FilterFn, MapState, NullSubstitutorFn, PostProcessorFn};
use crate::reflect::{meta_of, BoxedValue, Reflected, TypeMeta};

#[derive(Clone)]
pub(crate) struct ProviderEntry {
	pub from: TypePattern,
	pub to: TypePattern,
	pub provider: Arc<dyn ConverterProvider>,
}

/// User-declared mapping policies for one or more type pairs. Built by
/// chaining registrations, then handed to the manager, which freezes the
/// derived configuration name on first use. Two configurations with equal
/// names are observationally equivalent and share cache entries.
#[derive(Derivative, Clone)]
#[derivative(Debug)]
pub struct Configuration {
	#[derivative(Debug = "ignore")]
	converters: TypeKeyMap<ConverterFn>,
	#[derivative(Debug = "ignore")]
	null_substitutors: TypeKeyMap<NullSubstitutorFn>,
	#[derivative(Debug = "ignore")]
	constructors: TypeKeyMap<ConstructorFn>,
	#[derivative(Debug = "ignore")]
	post_processors: TypeKeyMap<PostProcessorFn>,
	#[derivative(Debug = "ignore")]
	source_filters: TypeKeyMap<FilterFn>,
	#[derivative(Debug = "ignore")]
	destination_filters: TypeKeyMap<FilterFn>,
	ignored_members: TypeKeyMap<Vec<String>>,
	#[derivative(Debug = "ignore")]
	generic_providers: Vec<ProviderEntry>,
	#[derivative(Debug = "ignore")]
	default_providers: Vec<ProviderEntry>,
	#[derivative(Debug = "ignore")]
	static_converters: Option<Arc<StaticConverterRegistry>>,
	strip_prefixes: Vec<String>,
	strip_postfixes: Vec<String>,
	map_methods: bool,
	shallow_copy: bool,
	name_override: Option<String>,
	summaries: NameSummaries,
}

// Registration-order token lists; the configuration name is assembled from
// these, never from map iteration order, so equal call sequences produce
// byte-identical names across processes.
#[derive(Debug, Default, Clone)]
struct NameSummaries {
	converters: Vec<String>,
	null_substitutors: Vec<String>,
	constructors: Vec<String>,
	post_processors: Vec<String>,
	source_filters: Vec<String>,
	destination_filters: Vec<String>,
	ignored: Vec<String>,
	providers: Vec<String>,
	options: Vec<String>,
}

impl Default for Configuration {
	fn default() -> Self {
		let mut configuration = Configuration {
			converters: Default::default(),
			null_substitutors: Default::default(),
			constructors: Default::default(),
			post_processors: Default::default(),
			source_filters: Default::default(),
			destination_filters: Default::default(),
			ignored_members: Default::default(),
			generic_providers: Vec::new(),
			default_providers: Vec::new(),
			static_converters: None,
			strip_prefixes: Vec::new(),
			strip_postfixes: Vec::new(),
			map_methods: false,
			shallow_copy: false,
			name_override: None,
			summaries: Default::default(),
		};
		configuration.default_providers.push(ProviderEntry {
			from: TypePattern::Sequence,
			to: TypePattern::Array,
			provider: Arc::new(CollectionToArrayProvider),
		});
		configuration
	}
}

impl Configuration {
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers a strongly typed converter for the member (or whole-object)
	/// pair `(From, To)`.
	pub fn convert_using<From, To>(mut self, convert: impl Fn(From) -> To + Send + Sync + 'static) -> Self
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
		self.summaries.converters.push(format!("cnv<{}->{}>", meta_of::<From>().name, meta_of::<To>().name));
		self.converters.insert(TypeKey::of_pair::<From, To>(), converter);
		self
	}

	/// Registers a generic converter provider for every pair matched by the
	/// two patterns. Providers are consulted in registration order; the first
	/// match wins.
	pub fn convert_generic(mut self, from: TypePattern, to: TypePattern, provider: Arc<dyn ConverterProvider>) -> Self {
		self.summaries.providers.push(format!("gcv<{}->{}#{}>", from.summary(), to.summary(), provider.name()));
		self.generic_providers.push(ProviderEntry { from, to, provider });
		self
	}

	/// Substitutes absent `From` values with a produced `To` value.
	pub fn null_substitution<From, To>(mut self, substitute: impl Fn(MapState) -> To + Send + Sync + 'static) -> Self
	where
		From: Reflected,
		To: Reflected,
	{
		let substitutor: NullSubstitutorFn = Arc::new(move |state| Box::new(substitute(state)) as BoxedValue);
		self.summaries.null_substitutors.push(format!("nul<{}->{}>", meta_of::<From>().name, meta_of::<To>().name));
		self.null_substitutors.insert(TypeKey::of_pair::<From, To>(), substitutor);
		self
	}

	/// Drops every member pair whose source or destination name matches, for
	/// mappings of `(From, To)`. Accumulative.
	pub fn ignore_members<From, To>(mut self, names: impl IntoIterator<Item = impl Into<String>>) -> Self
	where
		From: Reflected,
		To: Reflected,
	{
		let names: Vec<String> = names.into_iter().map(Into::into).collect();
		self.summaries.ignored.push(format!(
			"ign<{}->{}:{}>",
			meta_of::<From>().name,
			meta_of::<To>().name,
			names.join(","),
		));
		self.ignored_members.entry(TypeKey::of_pair::<From, To>()).or_default().extend(names);
		self
	}

	pub fn construct_by<T: Reflected>(mut self, construct: impl Fn(MapState) -> T + Send + Sync + 'static) -> Self {
		let constructor: ConstructorFn = Arc::new(move |state| Box::new(construct(state)) as BoxedValue);
		self.summaries.constructors.push(format!("ctr<{}>", meta_of::<T>().name));
		self.constructors.insert(TypeKey::of::<T>(), constructor);
		self
	}

	pub fn post_process<T: Reflected>(mut self, process: impl Fn(T, MapState) -> T + Send + Sync + 'static) -> Self {
		let processor: PostProcessorFn = Arc::new(move |value, state| {
			match value.downcast::<T>() {
				Ok(value) => Box::new(process(*value, state)) as BoxedValue,
				Err(value) => value,
			}
		});
		self.summaries.post_processors.push(format!("pst<{}>", meta_of::<T>().name));
		self.post_processors.insert(TypeKey::of::<T>(), processor);
		self
	}

	/// A source filter returning `false` suppresses the whole write.
	pub fn filter_source<T: Reflected>(mut self, filter: impl Fn(&T, MapState) -> bool + Send + Sync + 'static) -> Self {
		let filter: FilterFn = Arc::new(move |value, state| {
			value.downcast_ref::<T>().map_or(true, |value| filter(value, state))
		});
		self.summaries.source_filters.push(format!("fsrc<{}>", meta_of::<T>().name));
		self.source_filters.insert(TypeKey::of::<T>(), filter);
		self
	}

	pub fn filter_destination<T: Reflected>(mut self, filter: impl Fn(&T, MapState) -> bool + Send + Sync + 'static) -> Self {
		let filter: FilterFn = Arc::new(move |value, state| {
			value.downcast_ref::<T>().map_or(true, |value| filter(value, state))
		});
		self.summaries.destination_filters.push(format!("fdst<{}>", meta_of::<T>().name));
		self.destination_filters.insert(TypeKey::of::<T>(), filter);
		self
	}

	/// Member names are compared after stripping the first matching prefix.
	pub fn strip_prefixes(mut self, prefixes: impl IntoIterator<Item = impl Into<String>>) -> Self {
		let prefixes: Vec<String> = prefixes.into_iter().map(Into::into).collect();
		self.summaries.options.push(format!("strip<{}>", prefixes.join(",")));
		self.strip_prefixes.extend(prefixes);
		self
	}

	/// Member names are compared after stripping the first matching postfix.
	pub fn strip_postfixes(mut self, postfixes: impl IntoIterator<Item = impl Into<String>>) -> Self {
		let postfixes: Vec<String> = postfixes.into_iter().map(Into::into).collect();
		self.summaries.options.push(format!("strip-post<{}>", postfixes.join(",")));
		self.strip_postfixes.extend(postfixes);
		self
	}

	/// Surfaces zero-argument methods declared via the derive as read-only
	/// source members.
	pub fn map_methods(mut self, enabled: bool) -> Self {
		if enabled != self.map_methods {
			self.summaries.options.push(match enabled {
				true => "mth".to_string(),
				false => "mth-off".to_string(),
			});
		}
		self.map_methods = enabled;
		self
	}

	/// Allows same-element collections to be copied without deep-converting
	/// their elements.
	pub fn shallow_copy(mut self, enabled: bool) -> Self {
		if enabled != self.shallow_copy {
			self.summaries.options.push(match enabled {
				true => "shw".to_string(),
				false => "shw-off".to_string(),
			});
		}
		self.shallow_copy = enabled;
		self
	}

	/// Overrides the registry consulted before the process default for scalar
	/// conversions inside generic converters.
	pub fn with_static_converters(mut self, registry: Arc<StaticConverterRegistry>) -> Self {
		self.summaries.options.push(format!("reg<{}>", registry.name()));
		self.static_converters = Some(registry);
		self
	}

	/// Overrides the derived configuration name.
	pub fn set_config_name(mut self, name: impl Into<String>) -> Self {
		self.name_override = Some(name.into());
		self
	}

	/// The cache discriminator. Deterministic for a configuration built by
	/// the same sequence of calls in the same order.
	pub fn configuration_name(&self) -> String {
		if let Some(name) = &self.name_override {
			return name.clone();
		}
		let summaries = &self.summaries;
		[
			summaries.converters.join(","),
			summaries.null_substitutors.join(","),
			summaries.constructors.join(","),
			summaries.post_processors.join(","),
			summaries.source_filters.join(","),
			summaries.destination_filters.join(","),
			summaries.ignored.join(","),
			summaries.providers.join(","),
			summaries.options.join(","),
		]
		.join(";")
	}

	pub(crate) fn converter_for(&self, from: &TypeMeta, to: &TypeMeta) -> Option<ConverterFn> {
		self.converters.get(&TypeKey::pair(from.id, to.id)).cloned()
	}

	pub(crate) fn null_substitutor_for(&self, from: &TypeMeta, to: &TypeMeta) -> Option<NullSubstitutorFn> {
		self.null_substitutors.get(&TypeKey::pair(from.id, to.id)).cloned()
	}

	pub(crate) fn constructor_for(&self, to: &TypeMeta) -> Option<ConstructorFn> {
		self.constructors.get(&TypeKey::single(to.id)).cloned()
	}

	pub(crate) fn post_processor_for(&self, to: &TypeMeta) -> Option<PostProcessorFn> {
		self.post_processors.get(&TypeKey::single(to.id)).cloned()
	}

	pub(crate) fn source_filter_for(&self, ty: &TypeMeta) -> Option<FilterFn> {
		self.source_filters.get(&TypeKey::single(ty.id)).cloned()
	}

	pub(crate) fn destination_filter_for(&self, ty: &TypeMeta) -> Option<FilterFn> {
		self.destination_filters.get(&TypeKey::single(ty.id)).cloned()
	}

	pub(crate) fn is_ignored(&self, from: &TypeMeta, to: &TypeMeta, source_name: &str, destination_name: &str) -> bool {
		match self.ignored_members.get(&TypeKey::pair(from.id, to.id)) {
			None => false,
			Some(names) => names.iter().any(|name| name == source_name || name == destination_name),
		}
	}

	// user registrations first, in order, then the built-in defaults
	pub(crate) fn providers(&self) -> impl Iterator<Item = &ProviderEntry> {
		self.generic_providers.iter().chain(&self.default_providers)
	}

	/// Scalar conversion lookup for generic converters: the configuration's
	/// registry first, then the process default.
	pub(crate) fn lookup_static(&self, from: &TypeMeta, to: &TypeMeta) -> Option<ConverterFn> {
		if let Some(registry) = &self.static_converters {
			if let Some(convert) = registry.lookup(from, to) {
				return Some(convert);
			}
		}
		default_converters().lookup(from, to)
	}

	pub(crate) fn stripped<'l>(&self, name: &'l str) -> &'l str {
		let mut name = name;
		for prefix in &self.strip_prefixes {
			if let Some(stripped) = name.strip_prefix(prefix.as_str()) {
				name = stripped;
				break;
			}
		}
		for postfix in &self.strip_postfixes {
			if let Some(stripped) = name.strip_suffix(postfix.as_str()) {
				name = stripped;
				break;
			}
		}
		name
	}

	#[inline]
	pub(crate) fn map_methods_enabled(&self) -> bool {
		self.map_methods
	}

	#[inline]
	pub(crate) fn shallow_copy_enabled(&self) -> bool {
		self.shallow_copy
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn names_are_deterministic_per_call_sequence() {
		let build = || {
			Configuration::new()
				.convert_using::<i32, String>(|value| value.to_string())
				.ignore_members::<i32, String>(["a", "b"])
				.shallow_copy(true)
		};
		assert_eq!(build().configuration_name(), build().configuration_name());
	}

	#[test]
	fn names_depend_on_registration_order() {
		let forward = Configuration::new()
			.construct_by::<i32>(|_| 0)
			.post_process::<i32>(|value, _| value);
		let same = Configuration::new()
			.post_process::<i32>(|value, _| value)
			.construct_by::<i32>(|_| 0);
		// same categories, same tokens: category-wise assembly keeps these equal
		assert_eq!(forward.configuration_name(), same.configuration_name());

		let reordered = Configuration::new()
			.ignore_members::<i32, String>(["b"])
			.ignore_members::<i32, i64>(["a"]);
		let original = Configuration::new()
			.ignore_members::<i32, i64>(["a"])
			.ignore_members::<i32, String>(["b"]);
		assert_ne!(reordered.configuration_name(), original.configuration_name());
	}

	#[test]
	fn name_override_wins() {
		let named = Configuration::new()
			.ignore_members::<i32, String>(["a"])
			.set_config_name("fixed");
		assert_eq!(named.configuration_name(), "fixed");
	}

	#[test]
	fn default_name_is_empty_categories() {
		assert_eq!(Configuration::new().configuration_name(), ";;;;;;;;");
	}

	#[test]
	fn ignores_shadow_both_sides() {
		let configuration = Configuration::new().ignore_members::<i32, String>(["b"]);
		let from = meta_of::<i32>();
		let to = meta_of::<String>();
		assert!(configuration.is_ignored(from, to, "b", "x"));
		assert!(configuration.is_ignored(from, to, "x", "b"));
		assert!(!configuration.is_ignored(from, to, "x", "y"));
		assert!(!configuration.is_ignored(to, from, "b", "b"));
	}

	#[test]
	fn prefix_stripping_applies_first_match() {
		let configuration = Configuration::new().strip_prefixes(["m_", "fld_"]);
		assert_eq!(configuration.stripped("m_name"), "name");
		assert_eq!(configuration.stripped("fld_age"), "age");
		assert_eq!(configuration.stripped("name"), "name");
	}
}
