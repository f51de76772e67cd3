use std::any::{Any, TypeId};
use std::fmt::{Debug, Formatter};
use std::sync::{OnceLock, RwLock};

use bitflags::bitflags;
use derivative::Derivative;
use fxhash::FxHashMap;

/// A type-erased member or whole-object value. Boxed values always carry the
/// underlying (non-`Option`) type; absence is expressed by the `Option` at
/// the accessor boundary.
pub type BoxedValue = Box<dyn Any>;

bitflags! {
	#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
	pub struct MemberAccess: u8 {
		const READABLE = 0x1;
		const WRITABLE = 0x2;
	}
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum MemberKind {
	Field,
	Property,
	Method,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum TypeShape {
	Scalar,
	Object,
	Sequence,
	Array,
	Nullable,
	Sink,
}

/// One entry of a type's static member table.
#[derive(Copy, Clone)]
pub struct MemberDescriptor {
	pub name: &'static str,
	pub declaring_type: &'static str,
	pub kind: MemberKind,
	pub access: MemberAccess,
	pub value: fn() -> &'static TypeMeta,
	pub get: Option<fn(&dyn Any) -> Option<BoxedValue>>,
	pub set: Option<fn(&mut dyn Any, Option<BoxedValue>)>,
}

impl MemberDescriptor {
	#[inline]
	pub fn readable(&self) -> bool {
		self.access.contains(MemberAccess::READABLE)
	}

	/// A member is writable if it exposes write capability, or if its type is
	/// a collection (a collection destination may be filled in place).
	#[inline]
	pub fn writable(&self) -> bool {
		self.access.contains(MemberAccess::WRITABLE) || self.value_meta().is_collection()
	}

	#[inline]
	pub fn value_meta(&self) -> &'static TypeMeta {
		(self.value)()
	}
}

impl Debug for MemberDescriptor {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}::{} ({:?}, {:?})", self.declaring_type, self.name, self.kind, self.access)
	}
}

#[derive(Debug, Copy, Clone)]
pub struct CollectionMeta {
	pub element: fn() -> &'static TypeMeta,
	pub len: fn(&dyn Any) -> usize,
	pub to_values: fn(&dyn Any) -> Vec<BoxedValue>,
	pub from_values: fn(Vec<BoxedValue>) -> Option<BoxedValue>,
}

#[derive(Debug, Copy, Clone)]
pub struct SinkMeta {
	pub bind: fn(&mut dyn Any, &str, Option<BoxedValue>),
}

#[derive(Debug, Copy, Clone)]
pub struct ProviderMeta {
	pub fetch: fn(&dyn Any, &str) -> Option<BoxedValue>,
}

/// The static member table of a reflected type. Produced once per type by the
/// `Reflected` derive or one of the blanket impls, then shared for the
/// process lifetime.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct TypeMeta {
	pub name: &'static str,
	pub id: TypeId,
	pub shape: TypeShape,
	pub members: Vec<MemberDescriptor>,
	#[derivative(Debug = "ignore")]
	pub default_ctor: Option<fn() -> BoxedValue>,
	#[derivative(Debug = "ignore")]
	pub clone_value: fn(&dyn Any) -> Option<BoxedValue>,
	#[derivative(Debug = "ignore")]
	pub underlying: Option<fn() -> &'static TypeMeta>,
	#[derivative(Debug = "ignore")]
	pub collection: Option<CollectionMeta>,
	#[derivative(Debug = "ignore")]
	pub sink: Option<SinkMeta>,
	#[derivative(Debug = "ignore")]
	pub provider: Option<ProviderMeta>,
}

impl TypeMeta {
	#[inline]
	pub fn is_nullable(&self) -> bool {
		self.shape == TypeShape::Nullable
	}

	#[inline]
	pub fn is_collection(&self) -> bool {
		self.collection.is_some()
	}

	#[inline]
	pub fn has_default_constructor(&self) -> bool {
		self.default_ctor.is_some()
	}

	#[inline]
	pub fn underlying(&self) -> Option<&'static TypeMeta> {
		self.underlying.map(|underlying| underlying())
	}

	#[inline]
	pub fn default_value(&self) -> Option<BoxedValue> {
		self.default_ctor.map(|ctor| ctor())
	}

	pub fn member(&self, name: &str) -> Option<&MemberDescriptor> {
		self.members.iter().find(|member| member.name == name)
	}

	/// Every public member of the type, de-duplicated by name. When two
	/// members share a name the one that is both readable and writable wins,
	/// else the first encountered. Method members are surfaced only on
	/// request.
	pub fn public_members(&self, include_methods: bool) -> Vec<&MemberDescriptor> {
		let mut members: Vec<&MemberDescriptor> = Vec::with_capacity(self.members.len());
		for member in &self.members {
			if member.kind == MemberKind::Method && !include_methods {
				continue;
			}
			match members.iter().position(|m| m.name == member.name) {
				None => members.push(member),
				Some(idx) => {
					let kept = members[idx];
					if member.readable() && member.writable() && !(kept.readable() && kept.writable()) {
						members[idx] = member;
					}
				}
			}
		}
		members
	}

	/// Member table of a plain scalar: no members, `Default` construction,
	/// by-clone value semantics.
	pub fn scalar<T: Any + Clone + Default>(name: &'static str) -> TypeMeta {
		TypeMeta {
			name,
			id: TypeId::of::<T>(),
			shape: TypeShape::Scalar,
			members: Vec::new(),
			default_ctor: Some(default_boxed::<T>),
			clone_value: clone_boxed::<T>,
			underlying: None,
			collection: None,
			sink: None,
			provider: None,
		}
	}
}

pub(crate) fn fmt_meta_name(meta: &&'static TypeMeta, fmt: &mut Formatter) -> std::fmt::Result {
	write!(fmt, "{}", meta.name)
}

/// A reflected type: any type carrying a static member table.
pub trait Reflected: Any {
	fn type_meta() -> &'static TypeMeta where Self: Sized;
}

#[inline]
pub fn meta_of<T: Reflected>() -> &'static TypeMeta {
	T::type_meta()
}

fn default_boxed<T: Any + Default>() -> BoxedValue {
	Box::new(T::default())
}

fn clone_boxed<T: Any + Clone>(value: &dyn Any) -> Option<BoxedValue> {
	value.downcast_ref::<T>().map(|value| Box::new(value.clone()) as BoxedValue)
}

fn leak_name(name: String) -> &'static str {
	Box::leak(name.into_boxed_str())
}

fn interned_metas() -> &'static RwLock<FxHashMap<TypeId, &'static TypeMeta>> {
	static METAS: OnceLock<RwLock<FxHashMap<TypeId, &'static TypeMeta>>> = OnceLock::new();
	METAS.get_or_init(Default::default)
}

// Blanket impls of generic wrappers cannot hold a `static` table per
// monomorphization, so their tables are interned in a process-wide map.
pub(crate) fn intern_meta<T: Any>(build: impl FnOnce() -> TypeMeta) -> &'static TypeMeta {
	if let Some(meta) = interned_metas().read().unwrap().get(&TypeId::of::<T>()) {
		return meta;
	}
	let built: &'static TypeMeta = Box::leak(Box::new(build()));
	*interned_metas().write().unwrap().entry(TypeId::of::<T>()).or_insert(built)
}

macro_rules! impl_scalar_reflected {
	($($ty: ty => $name: literal),* $(,)?) => {$(
		impl Reflected for $ty {
			fn type_meta() -> &'static TypeMeta {
				static META: OnceLock<TypeMeta> = OnceLock::new();
				META.get_or_init(|| TypeMeta::scalar::<$ty>($name))
			}
		}
	)*};
}

impl_scalar_reflected! {
	bool => "bool", char => "char",
	i8 => "i8", i16 => "i16", i32 => "i32", i64 => "i64", isize => "isize",
	u8 => "u8", u16 => "u16", u32 => "u32", u64 => "u64", usize => "usize",
	f32 => "f32", f64 => "f64",
	String => "String",
}

impl<T: Reflected + Clone> Reflected for Option<T> {
	fn type_meta() -> &'static TypeMeta {
		intern_meta::<Option<T>>(|| TypeMeta {
			name: leak_name(format!("Option<{}>", T::type_meta().name)),
			id: TypeId::of::<Option<T>>(),
			shape: TypeShape::Nullable,
			members: Vec::new(),
			default_ctor: None,
			clone_value: clone_option_boxed::<T>,
			underlying: Some(T::type_meta),
			collection: None,
			sink: None,
			provider: None,
		})
	}
}

fn clone_option_boxed<T: Any + Clone>(value: &dyn Any) -> Option<BoxedValue> {
	let value = value.downcast_ref::<Option<T>>()?;
	value.as_ref().map(|value| Box::new(value.clone()) as BoxedValue)
}

impl<T: Reflected + Clone> Reflected for Vec<T> {
	fn type_meta() -> &'static TypeMeta {
		intern_meta::<Vec<T>>(|| TypeMeta {
			name: leak_name(format!("Vec<{}>", T::type_meta().name)),
			id: TypeId::of::<Vec<T>>(),
			shape: TypeShape::Sequence,
			members: Vec::new(),
			default_ctor: Some(default_boxed::<Vec<T>>),
			clone_value: clone_boxed::<Vec<T>>,
			underlying: None,
			collection: Some(CollectionMeta {
				element: T::type_meta,
				len: sequence_len::<T>,
				to_values: sequence_values::<T>,
				from_values: sequence_from_values::<T>,
			}),
			sink: None,
			provider: None,
		})
	}
}

fn sequence_len<T: Any>(value: &dyn Any) -> usize {
	value.downcast_ref::<Vec<T>>().map_or(0, Vec::len)
}

fn sequence_values<T: Any + Clone>(value: &dyn Any) -> Vec<BoxedValue> {
	match value.downcast_ref::<Vec<T>>() {
		Some(values) => values.iter().map(|value| Box::new(value.clone()) as BoxedValue).collect(),
		None => Vec::new(),
	}
}

fn sequence_from_values<T: Any>(values: Vec<BoxedValue>) -> Option<BoxedValue> {
	let mut collected = Vec::with_capacity(values.len());
	for value in values {
		collected.push(*value.downcast::<T>().ok()?);
	}
	Some(Box::new(collected))
}

impl<T: Reflected + Clone> Reflected for Box<[T]> {
	fn type_meta() -> &'static TypeMeta {
		intern_meta::<Box<[T]>>(|| TypeMeta {
			name: leak_name(format!("Box<[{}]>", T::type_meta().name)),
			id: TypeId::of::<Box<[T]>>(),
			shape: TypeShape::Array,
			members: Vec::new(),
			default_ctor: Some(default_array::<T>),
			clone_value: clone_boxed::<Box<[T]>>,
			underlying: None,
			collection: Some(CollectionMeta {
				element: T::type_meta,
				len: array_len::<T>,
				to_values: array_values::<T>,
				from_values: array_from_values::<T>,
			}),
			sink: None,
			provider: None,
		})
	}
}

fn default_array<T: Any>() -> BoxedValue {
	Box::new(Vec::<T>::new().into_boxed_slice())
}

fn array_len<T: Any>(value: &dyn Any) -> usize {
	value.downcast_ref::<Box<[T]>>().map_or(0, |value| value.len())
}

fn array_values<T: Any + Clone>(value: &dyn Any) -> Vec<BoxedValue> {
	match value.downcast_ref::<Box<[T]>>() {
		Some(values) => values.iter().map(|value| Box::new(value.clone()) as BoxedValue).collect(),
		None => Vec::new(),
	}
}

fn array_from_values<T: Any>(values: Vec<BoxedValue>) -> Option<BoxedValue> {
	let mut collected = Vec::with_capacity(values.len());
	for value in values {
		collected.push(*value.downcast::<T>().ok()?);
	}
	Some(Box::new(collected.into_boxed_slice()))
}

/// A by-name value source, the row-shaped counterpart of a parameter sink.
/// Destinations mapped from a `ValueSource` receive one `DstWrite` per
/// writable member, fetching by member name.
#[derive(Default)]
pub struct ValueSource {
	values: Vec<(String, Box<dyn Fn() -> BoxedValue + Send + Sync>)>,
}

impl ValueSource {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with<T: Any + Clone + Send + Sync>(mut self, name: impl Into<String>, value: T) -> Self {
		self.values.push((name.into(), Box::new(move || Box::new(value.clone()) as BoxedValue)));
		self
	}

	pub fn fetch(&self, name: &str) -> Option<BoxedValue> {
		let (_, value) = self.values.iter().find(|(n, _)| n == name)?;
		Some(value())
	}

	fn fetch_erased(value: &dyn Any, name: &str) -> Option<BoxedValue> {
		value.downcast_ref::<ValueSource>()?.fetch(name)
	}
}

impl Debug for ValueSource {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		let mut dbg = f.debug_list();
		for (name, _) in &self.values {
			dbg.entry(&format_args!("{name}"));
		}
		dbg.finish()
	}
}

impl Reflected for ValueSource {
	fn type_meta() -> &'static TypeMeta {
		static META: OnceLock<TypeMeta> = OnceLock::new();
		META.get_or_init(|| TypeMeta {
			name: "ValueSource",
			id: TypeId::of::<ValueSource>(),
			shape: TypeShape::Object,
			members: Vec::new(),
			default_ctor: Some(default_boxed::<ValueSource>),
			clone_value: |_| None,
			underlying: None,
			collection: None,
			sink: None,
			provider: Some(ProviderMeta { fetch: ValueSource::fetch_erased }),
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn scalar_metas_are_shared() {
		assert!(std::ptr::eq(i32::type_meta(), i32::type_meta()));
		assert_eq!(i32::type_meta().shape, TypeShape::Scalar);
		assert!(i32::type_meta().has_default_constructor());
	}

	#[test]
	fn option_meta_exposes_underlying() {
		let meta = <Option<String>>::type_meta();
		assert!(meta.is_nullable());
		assert!(std::ptr::eq(meta.underlying().unwrap(), String::type_meta()));
	}

	#[test]
	fn interned_metas_are_stable() {
		assert!(std::ptr::eq(<Vec<i32>>::type_meta(), <Vec<i32>>::type_meta()));
		assert!(!std::ptr::eq(
			<Vec<i32>>::type_meta() as *const TypeMeta as *const (),
			<Vec<i64>>::type_meta() as *const TypeMeta as *const (),
		));
	}

	#[test]
	fn sequence_values_round_trip() {
		let meta = <Vec<i32>>::type_meta();
		let collection = meta.collection.unwrap();
		let values = vec![1, 2, 3];
		assert_eq!((collection.len)(&values), 3);

		let elements = (collection.to_values)(&values);
		let rebuilt = (collection.from_values)(elements).unwrap();
		assert_eq!(rebuilt.downcast_ref::<Vec<i32>>(), Some(&vec![1, 2, 3]));
	}

	#[test]
	fn array_from_values_rejects_foreign_elements() {
		let meta = <Box<[i32]>>::type_meta();
		let collection = meta.collection.unwrap();
		let elements: Vec<BoxedValue> = vec![Box::new(1i32), Box::new("two".to_string())];
		assert!((collection.from_values)(elements).is_none());
	}

	#[test]
	fn value_source_fetches_by_name() {
		let source = ValueSource::new().with("id", 7i32).with("name", "a".to_string());
		let id = source.fetch("id").unwrap();
		assert_eq!(id.downcast_ref::<i32>(), Some(&7));
		assert!(source.fetch("missing").is_none());
	}
}
