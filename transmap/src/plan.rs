use std::any::TypeId;
use std::sync::Arc;

use fxhash::FxHashMap;

use crate::config::Configuration;
use crate::convert::{materialize, ProviderEnv};
use crate::errors::MappingError;
use crate::manager::Manager;
use crate::operations::{
	ConstructorFn, ConverterFn, DstWrite, MapState, MappingOperation, OperationsBlock,
	ReadWriteComplex, ReadWriteSimple, RootFlags, RootOperation, SrcRead,
};
use crate::reflect::{BoxedValue, TypeMeta, TypeShape};

/// Walks a type pair member-by-member and derives the tree of mapping
/// operations honoring the configuration. One builder instance serves one
/// top-level build; nested pairs are memoized within it and shared by `Arc`.
pub(crate) struct PlanBuilder<'l> {
	configuration: &'l Configuration,
	manager: &'l Manager,
	memo: FxHashMap<(TypeId, TypeId), Arc<RootOperation>>,
	stack: Vec<(TypeId, TypeId)>,
}

enum Resolution {
	Converter(ConverterFn),
	PlainCopy,
	Unresolved,
}

impl<'l> PlanBuilder<'l> {
	pub fn new(manager: &'l Manager, configuration: &'l Configuration) -> Self {
		PlanBuilder {
			configuration,
			manager,
			memo: Default::default(),
			stack: Vec::new(),
		}
	}

	#[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
	pub fn build(&mut self, from: &'static TypeMeta, to: &'static TypeMeta) -> Result<Arc<RootOperation>, MappingError> {
		self.stack.push((from.id, to.id));
		let root = self.build_root(from, to);
		self.stack.pop();
		root
	}

	fn build_root(&mut self, from: &'static TypeMeta, to: &'static TypeMeta) -> Result<Arc<RootOperation>, MappingError> {
		let mut converter = None;
		let mut operations = Vec::new();

		if to.sink.is_some() {
			operations.push(self.sink_operations(from, to));
		}
		else if from.provider.is_some() {
			self.provider_operations(from, to, &mut operations);
		}
		else if let Some(whole) = self.configuration.converter_for(from, to) {
			converter = Some(whole);
		}
		else if from.shape == TypeShape::Object && to.shape == TypeShape::Object {
			self.member_operations(from, to, &mut operations)?;
		}
		else {
			converter = Some(match self.resolve(from, to)? {
				Resolution::Converter(convert) => convert,
				Resolution::PlainCopy => {
					let f: fn(Option<BoxedValue>, MapState) -> Result<Option<BoxedValue>, MappingError> =
						|value, _| Ok(value);
					Arc::new(f) as ConverterFn
				}
				Resolution::Unresolved => {
					return Err(MappingError::NoConversion { from: from.name, to: to.name });
				}
			});
		}

		let target_constructor = self.configuration.constructor_for(to).or_else(|| match to.default_ctor {
			Some(ctor) => {
				let wrapped: ConstructorFn = Arc::new(move |_: MapState| ctor());
				Some(wrapped)
			}
			None => None,
		});
		if to.shape == TypeShape::Object && target_constructor.is_none() {
			return Err(MappingError::MissingConstructor(to.name));
		}

		let flags = match self.configuration.shallow_copy_enabled() {
			true => RootFlags::SHALLOW_COPY,
			false => RootFlags::empty(),
		};

		Ok(Arc::new(RootOperation {
			from,
			to,
			flags,
			target_constructor,
			null_substitutor: self.configuration.null_substitutor_for(from, to),
			values_post_processor: self.configuration.post_processor_for(to),
			converter,
			source_filter: self.configuration.source_filter_for(from),
			destination_filter: self.configuration.destination_filter_for(to),
			operations: operations.into(),
		}))
	}

	fn member_operations(
		&mut self,
		from: &'static TypeMeta,
		to: &'static TypeMeta,
		operations: &mut Vec<MappingOperation>,
	) -> Result<(), MappingError> {
		let sources = from.public_members(self.configuration.map_methods_enabled());
		let targets = to.public_members(false);

		for target in targets {
			if !target.writable() || target.set.is_none() {
				continue;
			}
			let matched = sources.iter().find(|source| {
				source.readable()
					&& source.get.is_some()
					&& self.configuration.stripped(source.name) == self.configuration.stripped(target.name)
			});
			let Some(source) = matched else { continue };
			if self.configuration.is_ignored(from, to, source.name, target.name) {
				continue;
			}

			let source_meta = source.value_meta();
			let target_meta = target.value_meta();
			let source_under = source_meta.underlying().unwrap_or(source_meta);
			let target_under = target_meta.underlying().unwrap_or(target_meta);

			let converter = match self.resolve(source_meta, target_meta)? {
				Resolution::Converter(convert) => Some(convert),
				Resolution::PlainCopy => None,
				Resolution::Unresolved => {
					if source_under.shape == TypeShape::Object && target_under.shape == TypeShape::Object {
						let nested = self.nested_root(source_under, target_under)?;
						operations.push(MappingOperation::ReadWriteComplex(ReadWriteComplex {
							source: **source,
							destination: *target,
							nested,
						}));
						continue;
					}
					return Err(MappingError::NoConversion {
						from: source_meta.name,
						to: target_meta.name,
					});
				}
			};

			operations.push(MappingOperation::ReadWriteSimple(ReadWriteSimple {
				source: **source,
				destination: *target,
				converter,
				null_substitutor: self
					.configuration
					.null_substitutor_for(source_meta, target_meta)
					.or_else(|| self.configuration.null_substitutor_for(source_under, target_under)),
				target_constructor: self.configuration.constructor_for(target_under),
				source_filter: self.configuration.source_filter_for(source_under),
				destination_filter: self.configuration.destination_filter_for(target_under),
			}));
		}
		Ok(())
	}

	fn nested_root(&mut self, from: &'static TypeMeta, to: &'static TypeMeta) -> Result<Arc<RootOperation>, MappingError> {
		let pair = (from.id, to.id);
		if self.stack.contains(&pair) {
			return Err(MappingError::CyclicMapping { from: from.name, to: to.name });
		}
		if let Some(nested) = self.memo.get(&pair) {
			return Ok(nested.clone());
		}

		self.stack.push(pair);
		let nested = self.build_root(from, to);
		self.stack.pop();

		let nested = nested?;
		self.memo.insert(pair, nested.clone());
		Ok(nested)
	}

	/// Converter resolution order for a pair: user registration (exact, then
	/// underlying), identity for equal underlying types, first matching
	/// generic provider, static registries for scalar pairs.
	fn resolve(&mut self, from: &'static TypeMeta, to: &'static TypeMeta) -> Result<Resolution, MappingError> {
		if let Some(convert) = self.configuration.converter_for(from, to) {
			return Ok(Resolution::Converter(convert));
		}

		let from_under = from.underlying().unwrap_or(from);
		let to_under = to.underlying().unwrap_or(to);
		if from_under.id != from.id || to_under.id != to.id {
			if let Some(convert) = self.configuration.converter_for(from_under, to_under) {
				return Ok(Resolution::Converter(convert));
			}
		}

		if from_under.id == to_under.id {
			return Ok(Resolution::PlainCopy);
		}

		let matched = self
			.configuration
			.providers()
			.find(|entry| entry.from.matches(from_under) && entry.to.matches(to_under))
			.map(|entry| entry.provider.clone());
		if let Some(provider) = matched {
			let env = ProviderEnv {
				configuration: self.configuration,
				manager: self.manager,
				flags: match self.configuration.shallow_copy_enabled() {
					true => RootFlags::SHALLOW_COPY,
					false => RootFlags::empty(),
				},
			};
			return materialize(provider.as_ref(), from_under, to_under, &env).map(Resolution::Converter);
		}

		if from_under.shape == TypeShape::Scalar && to_under.shape == TypeShape::Scalar {
			return match self.configuration.lookup_static(from_under, to_under) {
				Some(convert) => Ok(Resolution::Converter(convert)),
				None => Err(MappingError::NoConversion { from: from.name, to: to.name }),
			};
		}

		Ok(Resolution::Unresolved)
	}

	fn sink_operations(&self, from: &'static TypeMeta, to: &'static TypeMeta) -> MappingOperation {
		let mut reads = Vec::new();
		for source in from.public_members(self.configuration.map_methods_enabled()) {
			if !source.readable() || source.get.is_none() {
				continue;
			}
			if self.configuration.is_ignored(from, to, source.name, source.name) {
				continue;
			}
			reads.push(MappingOperation::SrcRead(SrcRead { source: *source }));
		}
		MappingOperation::OperationsBlock(OperationsBlock { operations: reads.into() })
	}

	fn provider_operations(&self, from: &'static TypeMeta, to: &'static TypeMeta, operations: &mut Vec<MappingOperation>) {
		for target in to.public_members(false) {
			if !target.writable() || target.set.is_none() {
				continue;
			}
			if self.configuration.is_ignored(from, to, target.name, target.name) {
				continue;
			}
			operations.push(MappingOperation::DstWrite(DstWrite { destination: *target }));
		}
	}
}

#[cfg(test)]
mod tests {
	use std::any::Any;
	use std::sync::OnceLock;

	use super::*;
	use crate::reflect::{BoxedValue, MemberAccess, MemberDescriptor, MemberKind, Reflected};

	fn unit_ctor() -> BoxedValue {
		Box::new(())
	}

	fn null_get(_: &dyn Any) -> Option<BoxedValue> {
		None
	}

	fn null_set(_: &mut dyn Any, _: Option<BoxedValue>) {}

	fn member(name: &'static str, declaring: &'static str, value: fn() -> &'static TypeMeta) -> MemberDescriptor {
		MemberDescriptor {
			name,
			declaring_type: declaring,
			kind: MemberKind::Field,
			access: MemberAccess::all(),
			value,
			get: Some(null_get),
			set: Some(null_set),
		}
	}

	fn object_meta<T: 'static>(name: &'static str, members: Vec<MemberDescriptor>) -> TypeMeta {
		TypeMeta {
			name,
			id: TypeId::of::<T>(),
			shape: TypeShape::Object,
			members,
			default_ctor: Some(unit_ctor),
			clone_value: |_| None,
			underlying: None,
			collection: None,
			sink: None,
			provider: None,
		}
	}

	macro_rules! fake_meta {
		($fn_name: ident, $marker: ident, $name: literal, [$(($member: literal, $value: expr)),*]) => {
			struct $marker;
			fn $fn_name() -> &'static TypeMeta {
				static META: OnceLock<TypeMeta> = OnceLock::new();
				META.get_or_init(|| object_meta::<$marker>($name, vec![
					$(member($member, $name, $value)),*
				]))
			}
		};
	}

	fake_meta!(node_meta, Node, "Node", [("next", other_meta)]);
	fake_meta!(other_meta, Other, "Other", [("node", node_meta)]);
	fake_meta!(node_dto_meta, NodeDto, "NodeDto", [("next", other_dto_meta)]);
	fake_meta!(other_dto_meta, OtherDto, "OtherDto", [("node", node_dto_meta)]);

	#[test]
	fn cyclic_destinations_are_rejected() {
		let manager = Manager::new();
		let configuration = Configuration::new();
		let result = PlanBuilder::new(&manager, &configuration).build(node_meta(), node_dto_meta());
		assert_eq!(
			result.err(),
			Some(MappingError::CyclicMapping { from: "Node", to: "NodeDto" }),
		);
	}

	fake_meta!(leaf_meta, Leaf, "Leaf", [("v", i32::type_meta)]);
	fake_meta!(leaf_dto_meta, LeafDto, "LeafDto", [("v", i32::type_meta)]);
	fake_meta!(pair_meta, Pair, "Pair", [("x", leaf_meta), ("y", leaf_meta)]);
	fake_meta!(pair_dto_meta, PairDto, "PairDto", [("x", leaf_dto_meta), ("y", leaf_dto_meta)]);

	#[test]
	fn repeated_pairs_share_one_sub_plan() {
		let manager = Manager::new();
		let configuration = Configuration::new();
		let root = PlanBuilder::new(&manager, &configuration).build(pair_meta(), pair_dto_meta()).unwrap();

		let nested: Vec<_> = root
			.operations
			.iter()
			.filter_map(|operation| match operation {
				MappingOperation::ReadWriteComplex(complex) => Some(&complex.nested),
				_ => None,
			})
			.collect();
		assert_eq!(nested.len(), 2);
		assert!(Arc::ptr_eq(nested[0], nested[1]));
	}

	fake_meta!(flag_meta, Flag, "Flag", [("v", i32::type_meta)]);
	fake_meta!(flag_dto_meta, FlagDto, "FlagDto", [("v", bool::type_meta)]);

	#[test]
	fn incompatible_scalars_fail_at_build_time() {
		let manager = Manager::new();
		let configuration = Configuration::new();
		let result = PlanBuilder::new(&manager, &configuration).build(flag_meta(), flag_dto_meta());
		assert_eq!(
			result.err(),
			Some(MappingError::NoConversion { from: "i32", to: "bool" }),
		);
	}

	#[test]
	fn declaration_order_is_preserved() {
		let manager = Manager::new();
		let configuration = Configuration::new();
		let root = PlanBuilder::new(&manager, &configuration).build(pair_meta(), pair_dto_meta()).unwrap();

		let names: Vec<_> = root
			.operations
			.iter()
			.map(|operation| match operation {
				MappingOperation::ReadWriteComplex(complex) => complex.destination.name,
				MappingOperation::ReadWriteSimple(simple) => simple.destination.name,
				_ => "",
			})
			.collect();
		assert_eq!(names, ["x", "y"]);
	}
}
