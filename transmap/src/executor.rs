use std::any::Any;
use std::marker::PhantomData;
use std::sync::Arc;

use derivative::Derivative;

use crate::errors::MappingError;
use crate::operations::{
	DstWrite, MappingOperation, MapState, ReadWriteComplex, ReadWriteSimple, RootOperation, SrcRead,
};
use crate::reflect::{meta_of, BoxedValue, Reflected};

/// The compiled specialization for one `(S, D, configuration)` triple: an
/// interpreter over the immutable operation tree. Safe for concurrent `map`
/// invocations.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct MapperImpl {
	plan: Arc<RootOperation>,
	configuration_name: String,
}

impl MapperImpl {
	pub(crate) fn new(plan: Arc<RootOperation>, configuration_name: String) -> Self {
		MapperImpl { plan, configuration_name }
	}

	#[inline]
	pub fn plan(&self) -> &RootOperation {
		&self.plan
	}

	#[inline]
	pub fn configuration_name(&self) -> &str {
		&self.configuration_name
	}

	/// The flattened list of leaf operations, in declaration order. Blocks
	/// are traversed; nested complex plans are not.
	pub fn stored_operations(&self) -> Vec<&MappingOperation> {
		fn collect<'l>(operations: &'l [MappingOperation], leaves: &mut Vec<&'l MappingOperation>) {
			for operation in operations {
				match operation {
					MappingOperation::OperationsBlock(block) => collect(&block.operations, leaves),
					MappingOperation::ReadWriteComplex(_) => {}
					_ => leaves.push(operation),
				}
			}
		}

		let mut leaves = Vec::new();
		collect(&self.plan.operations, &mut leaves);
		leaves
	}

	pub fn create_target(&self, state: MapState) -> Result<BoxedValue, MappingError> {
		match &self.plan.target_constructor {
			Some(construct) => Ok(construct(state)),
			None => Err(MappingError::MissingConstructor(self.plan.to.name)),
		}
	}

	pub fn map_boxed(
		&self,
		source: &dyn Any,
		destination: Option<BoxedValue>,
		state: MapState,
	) -> Result<BoxedValue, MappingError> {
		let destination = match destination {
			Some(destination) => destination,
			None => self.create_target(state)?,
		};
		execute_root(&self.plan, source, destination, state)
	}

	#[inline]
	pub fn map_value_boxed(&self, source: &dyn Any, state: MapState) -> Result<BoxedValue, MappingError> {
		self.map_boxed(source, None, state)
	}
}

fn execute_root(
	root: &RootOperation,
	source: &dyn Any,
	mut destination: BoxedValue,
	state: MapState,
) -> Result<BoxedValue, MappingError> {
	if let Some(filter) = &root.source_filter {
		if !filter(source, state) {
			return Ok(destination);
		}
	}
	if let Some(filter) = &root.destination_filter {
		if !filter(&*destination, state) {
			return Ok(destination);
		}
	}

	if let Some(convert) = &root.converter {
		let converted = convert((root.from.clone_value)(source), state)?;
		let converted = match (converted, &root.null_substitutor) {
			(Some(converted), _) => Some(converted),
			(None, Some(substitute)) => Some(substitute(state)),
			(None, None) => None,
		};
		if let Some(converted) = converted {
			destination = converted;
		}
	}
	else {
		for operation in root.operations.iter() {
			execute_operation(root, operation, source, &mut destination, state)?;
		}
	}

	if let Some(process) = &root.values_post_processor {
		destination = process(destination, state);
	}
	Ok(destination)
}

fn execute_operation(
	root: &RootOperation,
	operation: &MappingOperation,
	source: &dyn Any,
	destination: &mut BoxedValue,
	state: MapState,
) -> Result<(), MappingError> {
	match operation {
		MappingOperation::ReadWriteSimple(simple) => execute_simple(simple, source, destination, state),
		MappingOperation::ReadWriteComplex(complex) => execute_complex(complex, source, destination, state),
		MappingOperation::OperationsBlock(block) => {
			for operation in block.operations.iter() {
				execute_operation(root, operation, source, destination, state)?;
			}
			Ok(())
		}
		MappingOperation::SrcRead(read) => execute_src_read(root, read, source, destination),
		MappingOperation::DstWrite(write) => execute_dst_write(root, write, source, destination),
	}
}

fn execute_simple(
	operation: &ReadWriteSimple,
	source: &dyn Any,
	destination: &mut BoxedValue,
	state: MapState,
) -> Result<(), MappingError> {
	let Some(get) = operation.source.get else { return Ok(()) };
	let Some(set) = operation.destination.set else { return Ok(()) };

	let mut value = get(source);

	if let (Some(filter), Some(read)) = (&operation.source_filter, &value) {
		if !filter(&**read, state) {
			return Ok(());
		}
	}

	// a substituted value is already destination-typed; the converter only
	// runs over values actually read from the source
	let mut substituted = false;
	if value.is_none() {
		if let Some(substitute) = &operation.null_substitutor {
			value = Some(substitute(state));
			substituted = true;
		}
	}
	if !substituted {
		if let Some(convert) = &operation.converter {
			value = convert(value, state)?;
		}
	}

	if value.is_none() && !operation.destination.value_meta().is_nullable() {
		value = operation.destination.value_meta().default_value();
		if value.is_none() {
			return Ok(());
		}
	}

	if let (Some(filter), Some(write)) = (&operation.destination_filter, &value) {
		if !filter(&**write, state) {
			return Ok(());
		}
	}

	set(&mut **destination, value);
	Ok(())
}

fn execute_complex(
	operation: &ReadWriteComplex,
	source: &dyn Any,
	destination: &mut BoxedValue,
	state: MapState,
) -> Result<(), MappingError> {
	let Some(get) = operation.source.get else { return Ok(()) };
	let Some(set) = operation.destination.set else { return Ok(()) };

	let value = match get(source) {
		None => match &operation.nested.null_substitutor {
			Some(substitute) => Some(substitute(state)),
			None => match operation.destination.value_meta().is_nullable() {
				true => None,
				false => match operation.destination.value_meta().default_value() {
					Some(default) => Some(default),
					None => return Ok(()),
				},
			},
		},
		Some(read) => {
			// map into the current destination value when present, so members
			// without a matching source are preserved
			let current = operation.destination.get.and_then(|get| get(&**destination));
			let intermediate = match current {
				Some(current) => current,
				None => match &operation.nested.target_constructor {
					Some(construct) => construct(state),
					None => return Err(MappingError::MissingConstructor(operation.nested.to.name)),
				},
			};
			Some(execute_root(&operation.nested, &*read, intermediate, state)?)
		}
	};

	set(&mut **destination, value);
	Ok(())
}

fn execute_src_read(
	root: &RootOperation,
	operation: &SrcRead,
	source: &dyn Any,
	destination: &mut BoxedValue,
) -> Result<(), MappingError> {
	let Some(sink) = root.to.sink else { return Ok(()) };
	let Some(get) = operation.source.get else { return Ok(()) };
	(sink.bind)(&mut **destination, operation.source.name, get(source));
	Ok(())
}

fn execute_dst_write(
	root: &RootOperation,
	operation: &DstWrite,
	source: &dyn Any,
	destination: &mut BoxedValue,
) -> Result<(), MappingError> {
	let Some(provider) = root.from.provider else { return Ok(()) };
	let Some(set) = operation.destination.set else { return Ok(()) };

	let mut value = (provider.fetch)(source, operation.destination.name);
	if value.is_none() && !operation.destination.value_meta().is_nullable() {
		value = operation.destination.value_meta().default_value();
		if value.is_none() {
			return Ok(());
		}
	}
	set(&mut **destination, value);
	Ok(())
}

/// Typed facade over a cached executor. Cheap to clone; all clones share the
/// same compiled plan.
pub struct Mapper<S, D> {
	inner: Arc<MapperImpl>,
	_types: PhantomData<fn(&S) -> D>,
}

impl<S, D> Clone for Mapper<S, D> {
	fn clone(&self) -> Self {
		Mapper { inner: self.inner.clone(), _types: PhantomData }
	}
}

impl<S, D> std::fmt::Debug for Mapper<S, D> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "Mapper<{} -> {}>", self.inner.plan().from.name, self.inner.plan().to.name)
	}
}

impl<S: Reflected, D: Reflected> Mapper<S, D> {
	pub(crate) fn new(inner: Arc<MapperImpl>) -> Self {
		Mapper { inner, _types: PhantomData }
	}

	/// The untyped executor, exposing plan metadata.
	#[inline]
	pub fn untyped(&self) -> &Arc<MapperImpl> {
		&self.inner
	}

	#[inline]
	pub fn stored_operations(&self) -> Vec<&MappingOperation> {
		self.inner.stored_operations()
	}

	pub fn create_target(&self) -> Result<D, MappingError> {
		self.create_target_with(None)
	}

	pub fn create_target_with(&self, state: MapState) -> Result<D, MappingError> {
		downcast_owned(self.inner.create_target(state)?)
	}

	/// Populates `destination` from `source` and returns it.
	pub fn map(&self, source: &S, destination: D, state: MapState) -> Result<D, MappingError> {
		let result = self.inner.map_boxed(source, Some(Box::new(destination)), state)?;
		downcast_owned(result)
	}

	/// Creates a fresh destination and maps into it.
	pub fn map_value(&self, source: &S) -> Result<D, MappingError> {
		self.map_value_with(source, None)
	}

	pub fn map_value_with(&self, source: &S, state: MapState) -> Result<D, MappingError> {
		downcast_owned(self.inner.map_value_boxed(source, state)?)
	}
}

fn downcast_owned<D: Reflected>(value: BoxedValue) -> Result<D, MappingError> {
	match value.downcast::<D>() {
		Ok(value) => Ok(*value),
		Err(_) => Err(MappingError::MismatchedValue { expected: meta_of::<D>().name }),
	}
}
