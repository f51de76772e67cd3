use std::fmt::{Display, Formatter};

/// Errors surfaced while building a mapping plan or executing a mapper.
/// Build errors are cached alongside the mapper slot and re-raised
/// identically on every subsequent request for the same triple.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum MappingError {
	NoConversion { from: &'static str, to: &'static str },
	CyclicMapping { from: &'static str, to: &'static str },
	MissingConstructor(&'static str),
	MismatchedValue { expected: &'static str },
	InvalidProvider { provider: &'static str, from: &'static str, to: &'static str },
}

impl Display for MappingError {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		match self {
			MappingError::NoConversion { from, to } => {
				write!(f, "no conversion from `{from}` to `{to}`")
			}
			MappingError::CyclicMapping { from, to } => {
				write!(f, "cyclic mapping between `{from}` and `{to}`")
			}
			MappingError::MissingConstructor(ty) => {
				write!(f, "type `{ty}` has no usable constructor")
			}
			MappingError::MismatchedValue { expected } => {
				write!(f, "value does not contain the expected type `{expected}`")
			}
			MappingError::InvalidProvider { provider, from, to } => {
				write!(f, "provider `{provider}` cannot convert `{from}` to `{to}`")
			}
		}
	}
}

impl std::error::Error for MappingError {}
