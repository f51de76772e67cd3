use std::sync::Arc;

use crate::convert::{ConverterProvider, CustomConverter, ProviderEnv};
use crate::errors::MappingError;
use crate::operations::{ConverterFn, MapState, RootFlags};
use crate::reflect::{BoxedValue, CollectionMeta, TypeMeta, TypeShape};

/// The built-in generic converter for `Vec<E_from>` -> `Box<[E_to]>`,
/// registered by every default configuration for `(Sequence, Array)`.
pub struct CollectionToArrayProvider;

impl ConverterProvider for CollectionToArrayProvider {
	fn name(&self) -> &'static str {
		"collection-to-array"
	}

	fn create(&self, from: &'static TypeMeta, to: &'static TypeMeta)
		-> Result<Box<dyn CustomConverter>, MappingError>
	{
		let (Some(source), Some(target)) = (from.collection, to.collection) else {
			return Err(MappingError::InvalidProvider {
				provider: self.name(),
				from: from.name,
				to: to.name,
			});
		};
		Ok(Box::new(CollectionToArrayConverter {
			source,
			target,
			element: ElementConversion::Pending,
		}))
	}
}

enum ElementConversion {
	Pending,
	/// Same element type, linear copy preserving element identity.
	Identity,
	Convert(ConverterFn),
}

struct CollectionToArrayConverter {
	source: CollectionMeta,
	target: CollectionMeta,
	element: ElementConversion,
}

impl CollectionToArrayConverter {
	#[inline]
	fn target_element(&self) -> &'static TypeMeta {
		(self.target.element)()
	}
}

impl CustomConverter for CollectionToArrayConverter {
	fn initialize(
		&mut self,
		_from: &'static TypeMeta,
		_to: &'static TypeMeta,
		env: &ProviderEnv,
	) -> Result<(), MappingError> {
		let from_element = (self.source.element)();
		let to_element = (self.target.element)();

		if from_element.id == to_element.id
			&& (from_element.shape == TypeShape::Scalar || env.flags.contains(RootFlags::SHALLOW_COPY))
		{
			self.element = ElementConversion::Identity;
			return Ok(());
		}

		if let Some(convert) = env.configuration.lookup_static(from_element, to_element) {
			self.element = ElementConversion::Convert(convert);
			return Ok(());
		}

		let executor = env.manager.mapper_for(from_element, to_element, env.configuration)?;
		self.element = ElementConversion::Convert(Arc::new(move |value, state| {
			match value {
				None => Ok(None),
				Some(value) => Ok(Some(executor.map_value_boxed(&*value, state)?)),
			}
		}));
		Ok(())
	}

	fn convert(&self, value: Option<BoxedValue>, state: MapState)
		-> Result<Option<BoxedValue>, MappingError>
	{
		// an absent collection produces an absent array
		let Some(value) = value else { return Ok(None) };

		let count = (self.source.len)(&*value);
		let mut converted = Vec::with_capacity(count);
		match &self.element {
			ElementConversion::Pending => {
				return Err(MappingError::InvalidProvider {
					provider: "collection-to-array",
					from: (self.source.element)().name,
					to: self.target_element().name,
				});
			}
			ElementConversion::Identity => {
				converted = (self.source.to_values)(&*value);
			}
			ElementConversion::Convert(convert) => {
				for element in (self.source.to_values)(&*value) {
					match convert(Some(element), state)? {
						Some(element) => converted.push(element),
						None => {
							return Err(MappingError::MismatchedValue {
								expected: self.target_element().name,
							});
						}
					}
				}
			}
		}

		match (self.target.from_values)(converted) {
			Some(result) => Ok(Some(result)),
			None => Err(MappingError::MismatchedValue { expected: self.target_element().name }),
		}
	}
}
