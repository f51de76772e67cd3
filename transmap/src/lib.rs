//! An object-to-object mapping engine. Mapping plans are derived once per
//! `(source, destination, configuration-name)` triple from static member
//! tables, compiled into an executor, and cached for the process lifetime.

pub mod config;
pub mod convert;
pub mod errors;
pub mod executor;
pub mod keys;
pub mod manager;
pub mod operations;
pub mod reflect;
pub mod sql;

mod plan;

pub use config::Configuration;
pub use errors::MappingError;
pub use executor::Mapper;
pub use manager::Manager;
pub use operations::MapState;
pub use reflect::Reflected;
pub use transmap_derive::Reflected;
