use std::sync::Arc;

use transmap::convert::StaticConverterRegistry;
use transmap::operations::MappingOperation;
use transmap::reflect::ValueSource;
use transmap::{Configuration, Manager, MappingError, Reflected};

#[derive(Debug, Clone, Default, PartialEq, Reflected)]
struct Source {
	a: i32,
	b: String,
}

#[derive(Debug, Clone, Default, PartialEq, Reflected)]
struct Dest {
	a: i32,
	b: String,
}

fn source() -> Source {
	Source { a: 1, b: "x".to_string() }
}

#[test]
fn scalar_copy() {
	let manager = Manager::new();
	let mapper = manager.get::<Source, Dest>(&Configuration::new()).unwrap();

	let mapped = mapper.map(&source(), Dest::default(), None).unwrap();
	assert_eq!(mapped, Dest { a: 1, b: "x".to_string() });
}

#[test]
fn ignored_members_keep_destination_values() {
	let manager = Manager::new();
	let configuration = Configuration::new().ignore_members::<Source, Dest>(["b"]);
	let mapper = manager.get::<Source, Dest>(&configuration).unwrap();

	let destination = Dest { a: 0, b: "keep".to_string() };
	let mapped = mapper.map(&source(), destination, None).unwrap();
	assert_eq!(mapped, Dest { a: 1, b: "keep".to_string() });
}

#[test]
fn ignored_members_never_reach_the_plan() {
	let manager = Manager::new();
	let configuration = Configuration::new().ignore_members::<Source, Dest>(["b"]);
	let mapper = manager.get::<Source, Dest>(&configuration).unwrap();

	for operation in mapper.stored_operations() {
		if let MappingOperation::ReadWriteSimple(simple) = operation {
			assert_ne!(simple.source.name, "b");
			assert_ne!(simple.destination.name, "b");
		}
	}
}

#[derive(Debug, Clone, Default, PartialEq, Reflected)]
struct NullSource {
	v: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Reflected)]
struct NullDest {
	v: String,
}

#[test]
fn null_substitution_fills_absent_sources() {
	let manager = Manager::new();
	let configuration =
		Configuration::new().null_substitution::<String, String>(|_| "N/A".to_string());
	let mapper = manager.get::<NullSource, NullDest>(&configuration).unwrap();

	let mapped = mapper.map_value(&NullSource { v: None }).unwrap();
	assert_eq!(mapped.v, "N/A");

	let mapped = mapper.map_value(&NullSource { v: Some("set".to_string()) }).unwrap();
	assert_eq!(mapped.v, "set");
}

#[test]
fn absent_source_without_substitutor_writes_the_default() {
	let manager = Manager::new();
	let mapper = manager.get::<NullSource, NullDest>(&Configuration::new()).unwrap();

	let destination = NullDest { v: "stale".to_string() };
	let mapped = mapper.map(&NullSource { v: None }, destination, None).unwrap();
	assert_eq!(mapped.v, "");
}

#[derive(Debug, Clone, Default, PartialEq, Reflected)]
struct CollSource {
	xs: Vec<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Reflected)]
struct CollDest {
	xs: Box<[i32]>,
}

#[test]
fn same_element_collections_copy_linearly() {
	let manager = Manager::new();
	let mapper = manager.get::<CollSource, CollDest>(&Configuration::new()).unwrap();

	let mapped = mapper.map_value(&CollSource { xs: vec![1, 2, 3] }).unwrap();
	assert_eq!(mapped.xs.as_ref(), &[1, 2, 3]);
	assert_eq!(mapped.xs.len(), 3);
}

#[derive(Debug, Clone, Default, PartialEq, Reflected)]
struct StrDest {
	xs: Box<[String]>,
}

#[test]
fn differing_element_collections_convert_per_element() {
	let mut registry = StaticConverterRegistry::new("labels");
	registry.register::<i32, String>(|value| format!("n={value}"));

	let manager = Manager::new();
	let configuration = Configuration::new().with_static_converters(Arc::new(registry));
	let mapper = manager.get::<CollSource, StrDest>(&configuration).unwrap();

	let mapped = mapper.map_value(&CollSource { xs: vec![1, 2] }).unwrap();
	assert_eq!(mapped.xs.as_ref(), &["n=1".to_string(), "n=2".to_string()]);
}

#[derive(Debug, Clone, Default, PartialEq, Reflected)]
struct OptColl {
	xs: Option<Vec<i32>>,
}

#[derive(Debug, Clone, Default, PartialEq, Reflected)]
struct OptCollDest {
	xs: Option<Box<[i32]>>,
}

#[test]
fn absent_collections_stay_absent() {
	let manager = Manager::new();
	let mapper = manager.get::<OptColl, OptCollDest>(&Configuration::new()).unwrap();

	let mapped = mapper.map_value(&OptColl { xs: None }).unwrap();
	assert_eq!(mapped.xs, None);

	let mapped = mapper.map_value(&OptColl { xs: Some(vec![4, 5]) }).unwrap();
	assert_eq!(mapped.xs.as_deref(), Some([4, 5].as_slice()));
}

#[derive(Debug, Clone, Default, PartialEq, Reflected)]
struct Inner {
	v: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Reflected)]
struct InnerDto {
	v: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Reflected)]
struct Outer {
	name: String,
	inner: Inner,
}

#[derive(Debug, Clone, Default, PartialEq, Reflected)]
struct OuterDto {
	name: String,
	inner: InnerDto,
}

#[test]
fn nested_objects_map_recursively() {
	let manager = Manager::new();
	let mapper = manager.get::<Outer, OuterDto>(&Configuration::new()).unwrap();

	let outer = Outer { name: "o".to_string(), inner: Inner { v: 9 } };
	let mapped = mapper.map_value(&outer).unwrap();
	assert_eq!(mapped, OuterDto { name: "o".to_string(), inner: InnerDto { v: 9 } });
}

#[test]
fn deep_collections_map_their_elements() {
	#[derive(Debug, Clone, Default, PartialEq, Reflected)]
	struct Holder {
		items: Vec<Inner>,
	}

	#[derive(Debug, Clone, Default, PartialEq, Reflected)]
	struct HolderDto {
		items: Box<[InnerDto]>,
	}

	let manager = Manager::new();
	let mapper = manager.get::<Holder, HolderDto>(&Configuration::new()).unwrap();

	let holder = Holder { items: vec![Inner { v: 1 }, Inner { v: 2 }] };
	let mapped = mapper.map_value(&holder).unwrap();
	assert_eq!(mapped.items.as_ref(), &[InnerDto { v: 1 }, InnerDto { v: 2 }]);
}

#[test]
fn equal_configuration_names_share_one_executor() {
	let manager = Manager::new();
	let first = manager
		.get::<Source, Dest>(&Configuration::new().ignore_members::<Source, Dest>(["b"]))
		.unwrap();
	let second = manager
		.get::<Source, Dest>(&Configuration::new().ignore_members::<Source, Dest>(["b"]))
		.unwrap();

	assert!(Arc::ptr_eq(first.untyped(), second.untyped()));

	let renamed = manager
		.get::<Source, Dest>(&Configuration::new().ignore_members::<Source, Dest>(["a"]))
		.unwrap();
	assert!(!Arc::ptr_eq(first.untyped(), renamed.untyped()));
}

#[test]
fn leaf_order_is_stable_across_runs() {
	let manager = Manager::new();
	let mapper = manager.get::<Source, Dest>(&Configuration::new()).unwrap();

	let names = |mapper: &transmap::Mapper<Source, Dest>| -> Vec<&str> {
		mapper
			.stored_operations()
			.iter()
			.filter_map(|operation| match operation {
				MappingOperation::ReadWriteSimple(simple) => Some(simple.destination.name),
				_ => None,
			})
			.collect()
	};

	assert_eq!(names(&mapper), ["a", "b"]);
	assert_eq!(names(&mapper), names(&manager.get::<Source, Dest>(&Configuration::new()).unwrap()));
}

#[test]
fn mapping_is_deterministic() {
	let manager = Manager::new();
	let mapper = manager.get::<Source, Dest>(&Configuration::new()).unwrap();

	let first = mapper.map_value(&source()).unwrap();
	let second = mapper.map_value(&source()).unwrap();
	assert_eq!(first, second);
}

#[test]
fn whole_object_converters_short_circuit_member_mapping() {
	let manager = Manager::new();
	let configuration = Configuration::new().convert_using::<Source, Dest>(|source| Dest {
		a: source.a * 10,
		b: source.b.to_uppercase(),
	});
	let mapper = manager.get::<Source, Dest>(&configuration).unwrap();

	let mapped = mapper.map_value(&source()).unwrap();
	assert_eq!(mapped, Dest { a: 10, b: "X".to_string() });
}

#[test]
fn destination_filters_veto_single_writes() {
	let manager = Manager::new();
	let configuration = Configuration::new().filter_destination::<i32>(|value, _| *value != 0);
	let mapper = manager.get::<Source, Dest>(&configuration).unwrap();

	let destination = Dest { a: 42, b: String::new() };
	let mapped = mapper.map(&Source { a: 0, b: "x".to_string() }, destination, None).unwrap();
	assert_eq!(mapped.a, 42);
	assert_eq!(mapped.b, "x");
}

#[test]
fn source_filters_veto_single_reads() {
	let manager = Manager::new();
	let configuration = Configuration::new().filter_source::<String>(|value, _| !value.is_empty());
	let mapper = manager.get::<Source, Dest>(&configuration).unwrap();

	let destination = Dest { a: 0, b: "keep".to_string() };
	let mapped = mapper.map(&Source { a: 5, b: String::new() }, destination, None).unwrap();
	assert_eq!(mapped.a, 5);
	assert_eq!(mapped.b, "keep");
}

#[derive(Debug, Clone, PartialEq, Reflected)]
#[reflect(no_default)]
struct ManualDest {
	a: i32,
	tag: String,
}

#[test]
fn custom_constructors_build_the_target() {
	let manager = Manager::new();

	let missing = manager.get::<Source, ManualDest>(&Configuration::new());
	assert_eq!(missing.err(), Some(MappingError::MissingConstructor("ManualDest")));

	let configuration = Configuration::new()
		.construct_by::<ManualDest>(|_| ManualDest { a: -1, tag: "made".to_string() });
	let mapper = manager.get::<Source, ManualDest>(&configuration).unwrap();

	let mapped = mapper.map_value(&source()).unwrap();
	assert_eq!(mapped, ManualDest { a: 1, tag: "made".to_string() });
}

#[test]
fn post_processors_replace_the_result() {
	let manager = Manager::new();
	let configuration = Configuration::new().post_process::<Dest>(|mut value, _| {
		value.b.push('!');
		value
	});
	let mapper = manager.get::<Source, Dest>(&configuration).unwrap();

	let mapped = mapper.map_value(&source()).unwrap();
	assert_eq!(mapped.b, "x!");
}

#[test]
fn state_reaches_constructors_and_processors() {
	let manager = Manager::new();
	let configuration = Configuration::new().post_process::<Dest>(|mut value, state| {
		if let Some(offset) = state.and_then(|state| state.downcast_ref::<i32>()) {
			value.a += offset;
		}
		value
	});
	let mapper = manager.get::<Source, Dest>(&configuration).unwrap();

	let state = 100i32;
	let mapped = mapper.map_value_with(&source(), Some(&state)).unwrap();
	assert_eq!(mapped.a, 101);
}

#[derive(Debug, Clone, Default, Reflected)]
#[reflect(methods(full_name: String))]
struct Person {
	first: String,
	last: String,
}

impl Person {
	fn full_name(&self) -> String {
		format!("{} {}", self.first, self.last)
	}
}

#[derive(Debug, Clone, Default, PartialEq, Reflected)]
struct PersonDto {
	full_name: String,
}

#[test]
fn method_members_map_when_enabled() {
	let manager = Manager::new();
	let person = Person { first: "Ada".to_string(), last: "Lovelace".to_string() };

	let disabled = manager.get::<Person, PersonDto>(&Configuration::new()).unwrap();
	assert_eq!(disabled.map_value(&person).unwrap().full_name, "");

	let enabled = manager
		.get::<Person, PersonDto>(&Configuration::new().map_methods(true))
		.unwrap();
	assert_eq!(enabled.map_value(&person).unwrap().full_name, "Ada Lovelace");
}

#[derive(Debug, Clone, Default, PartialEq, Reflected)]
struct Prefixed {
	m_value: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Reflected)]
struct Unprefixed {
	value: i32,
}

#[test]
fn prefix_stripping_matches_members() {
	let manager = Manager::new();
	let configuration = Configuration::new().strip_prefixes(["m_"]);
	let mapper = manager.get::<Prefixed, Unprefixed>(&configuration).unwrap();

	let mapped = mapper.map_value(&Prefixed { m_value: 11 }).unwrap();
	assert_eq!(mapped.value, 11);
}

#[test]
fn widening_scalars_convert_without_registration() {
	#[derive(Debug, Clone, Default, PartialEq, Reflected)]
	struct Narrow {
		v: i32,
	}

	#[derive(Debug, Clone, Default, PartialEq, Reflected)]
	struct Wide {
		v: i64,
	}

	let manager = Manager::new();
	let mapper = manager.get::<Narrow, Wide>(&Configuration::new()).unwrap();
	assert_eq!(mapper.map_value(&Narrow { v: 3 }).unwrap().v, 3i64);

	// narrowing must be registered explicitly
	let narrowing = manager.get::<Wide, Narrow>(&Configuration::new());
	assert_eq!(narrowing.err(), Some(MappingError::NoConversion { from: "i64", to: "i32" }));
}

#[test]
fn rows_map_into_objects_by_member_name() {
	let manager = Manager::new();
	let mapper = manager.get::<ValueSource, Dest>(&Configuration::new()).unwrap();

	let row = ValueSource::new().with("a", 3i32).with("b", "row".to_string());
	let mapped = mapper.map_value(&row).unwrap();
	assert_eq!(mapped, Dest { a: 3, b: "row".to_string() });

	// a missing column falls back to the member default
	let partial = ValueSource::new().with("a", 4i32);
	let mapped = mapper.map_value(&partial).unwrap();
	assert_eq!(mapped, Dest { a: 4, b: String::new() });
}

#[test]
fn concurrent_requests_build_one_executor() {
	let manager = Manager::new();
	let mappers = std::thread::scope(|scope| {
		let handles: Vec<_> = (0..8)
			.map(|_| scope.spawn(|| manager.get::<Source, Dest>(&Configuration::new()).unwrap()))
			.collect();
		handles.into_iter().map(|handle| handle.join().unwrap()).collect::<Vec<_>>()
	});

	for mapper in &mappers[1..] {
		assert!(Arc::ptr_eq(mappers[0].untyped(), mapper.untyped()));
	}
}
