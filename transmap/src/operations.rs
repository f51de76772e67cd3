use std::any::Any;
use std::sync::Arc;

use bitflags::bitflags;
use derivative::Derivative;

use crate::errors::MappingError;
use crate::reflect::{BoxedValue, MemberDescriptor, TypeMeta};

/// Caller-supplied ambient state, threaded through constructors, filters,
/// substitutors and post-processors.
pub type MapState<'l> = Option<&'l dyn Any>;

pub type ConverterFn =
	Arc<dyn Fn(Option<BoxedValue>, MapState) -> Result<Option<BoxedValue>, MappingError> + Send + Sync>;
pub type NullSubstitutorFn = Arc<dyn Fn(MapState) -> BoxedValue + Send + Sync>;
pub type ConstructorFn = Arc<dyn Fn(MapState) -> BoxedValue + Send + Sync>;
pub type PostProcessorFn = Arc<dyn Fn(BoxedValue, MapState) -> BoxedValue + Send + Sync>;
pub type FilterFn = Arc<dyn Fn(&dyn Any, MapState) -> bool + Send + Sync>;

bitflags! {
	#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
	pub struct RootFlags: u8 {
		/// The root collection/struct may be copied without deep-converting
		/// its elements.
		const SHALLOW_COPY = 0x1;
	}
}

/// The head of every plan: whole-object policies plus the operation list
/// covering each matched member pair. `ReadWriteComplex` operations nest a
/// full sub-root, shared via `Arc` when the same type pair repeats within
/// one build.
#[derive(Derivative, Clone)]
#[derivative(Debug)]
pub struct RootOperation {
	#[derivative(Debug(format_with = "crate::reflect::fmt_meta_name"))]
	pub from: &'static TypeMeta,
	#[derivative(Debug(format_with = "crate::reflect::fmt_meta_name"))]
	pub to: &'static TypeMeta,
	pub flags: RootFlags,
	#[derivative(Debug = "ignore")]
	pub target_constructor: Option<ConstructorFn>,
	#[derivative(Debug = "ignore")]
	pub null_substitutor: Option<NullSubstitutorFn>,
	#[derivative(Debug = "ignore")]
	pub values_post_processor: Option<PostProcessorFn>,
	#[derivative(Debug = "ignore")]
	pub converter: Option<ConverterFn>,
	#[derivative(Debug = "ignore")]
	pub source_filter: Option<FilterFn>,
	#[derivative(Debug = "ignore")]
	pub destination_filter: Option<FilterFn>,
	pub operations: Arc<[MappingOperation]>,
}

#[derive(Debug, Clone)]
pub enum MappingOperation {
	ReadWriteSimple(ReadWriteSimple),
	ReadWriteComplex(ReadWriteComplex),
	OperationsBlock(OperationsBlock),
	SrcRead(SrcRead),
	DstWrite(DstWrite),
}

/// Leaf: copies one member, optionally through a converter.
#[derive(Derivative, Clone)]
#[derivative(Debug)]
pub struct ReadWriteSimple {
	pub source: MemberDescriptor,
	pub destination: MemberDescriptor,
	#[derivative(Debug = "ignore")]
	pub converter: Option<ConverterFn>,
	#[derivative(Debug = "ignore")]
	pub null_substitutor: Option<NullSubstitutorFn>,
	#[derivative(Debug = "ignore")]
	pub target_constructor: Option<ConstructorFn>,
	#[derivative(Debug = "ignore")]
	pub source_filter: Option<FilterFn>,
	#[derivative(Debug = "ignore")]
	pub destination_filter: Option<FilterFn>,
}

/// Recurses into a nested object destination.
#[derive(Debug, Clone)]
pub struct ReadWriteComplex {
	pub source: MemberDescriptor,
	pub destination: MemberDescriptor,
	pub nested: Arc<RootOperation>,
}

/// Grouping only.
#[derive(Debug, Clone)]
pub struct OperationsBlock {
	pub operations: Arc<[MappingOperation]>,
}

/// Reads a source member into a non-object destination (a parameter sink).
#[derive(Debug, Clone)]
pub struct SrcRead {
	pub source: MemberDescriptor,
}

/// Writes a destination member from a non-object source (a value provider).
#[derive(Debug, Clone)]
pub struct DstWrite {
	pub destination: MemberDescriptor,
}
