use std::any::{Any, TypeId};
use std::sync::OnceLock;

use derivative::Derivative;

use crate::config::Configuration;
use crate::errors::MappingError;
use crate::manager::Manager;
use crate::operations::MappingOperation;
use crate::reflect::{meta_of, BoxedValue, Reflected, SinkMeta, TypeMeta, TypeShape};

/// The command half the adapter drives: receives the statement text and the
/// named parameter bindings.
pub trait DbCommand {
	fn set_command_text(&mut self, text: String);
	fn add_parameter(&mut self, name: String, value: Option<BoxedValue>);
}

/// Reports which members of a value changed since it was last persisted.
pub trait ChangeTracker<T> {
	fn changed_members(&self, value: &T) -> Vec<String>;
}

#[derive(Debug, Clone)]
pub struct DbSettings {
	pub parameter_prefix: String,
	pub quote_open: String,
	pub quote_close: String,
}

impl Default for DbSettings {
	fn default() -> Self {
		DbSettings {
			parameter_prefix: "@".to_string(),
			quote_open: "\"".to_string(),
			quote_close: "\"".to_string(),
		}
	}
}

impl DbSettings {
	fn escape(&self, name: &str) -> String {
		format!("{}{}{}", self.quote_open, name, self.quote_close)
	}
}

/// The reflected sink an update mapping writes into: one `(member-name,
/// value)` pair per `SrcRead` leaf, in declaration order.
#[derive(Derivative, Default)]
#[derivative(Debug)]
pub struct ParameterSink {
	#[derivative(Debug = "ignore")]
	values: Vec<(String, Option<BoxedValue>)>,
}

impl ParameterSink {
	pub fn values(&self) -> &[(String, Option<BoxedValue>)] {
		&self.values
	}

	pub fn into_values(self) -> Vec<(String, Option<BoxedValue>)> {
		self.values
	}

	fn bind(sink: &mut dyn Any, name: &str, value: Option<BoxedValue>) {
		if let Some(sink) = sink.downcast_mut::<ParameterSink>() {
			sink.values.push((name.to_string(), value));
		}
	}
}

impl Reflected for ParameterSink {
	fn type_meta() -> &'static TypeMeta {
		static META: OnceLock<TypeMeta> = OnceLock::new();
		META.get_or_init(|| TypeMeta {
			name: "ParameterSink",
			id: TypeId::of::<ParameterSink>(),
			shape: TypeShape::Sink,
			members: Vec::new(),
			default_ctor: Some(|| Box::new(ParameterSink::default()) as BoxedValue),
			clone_value: |_| None,
			underlying: None,
			collection: None,
			sink: Some(SinkMeta { bind: ParameterSink::bind }),
			provider: None,
		})
	}
}

/// Emits `UPDATE <table> SET <col>=<param>[,…] WHERE <id>=<param>[ AND …]`
/// for the members of `value` selected by the change tracker and the
/// include/exclude lists, binds one parameter per column through the
/// executor, and returns whether a statement was produced at all.
///
/// Id-field names are normalized to upper case; id columns always join the
/// effective include set but never the SET list. An empty SET list yields
/// `false` and leaves the command untouched.
pub fn build_update_command<S: Reflected>(
	manager: &Manager,
	command: &mut dyn DbCommand,
	value: &S,
	table: &str,
	id_fields: &[&str],
	include_fields: Option<&[&str]>,
	exclude_fields: Option<&[&str]>,
	change_tracker: Option<&dyn ChangeTracker<S>>,
	settings: &DbSettings,
) -> Result<bool, MappingError> {
	let ids: Vec<String> = id_fields.iter().map(|field| field.to_uppercase()).collect();

	let mut included: Option<Vec<String>> = match change_tracker {
		Some(tracker) => {
			let mut changed: Vec<String> = tracker
				.changed_members(value)
				.iter()
				.map(|name| name.to_uppercase())
				.collect();
			if let Some(include) = include_fields {
				let include: Vec<String> = include.iter().map(|field| field.to_uppercase()).collect();
				changed.retain(|name| include.contains(name));
			}
			Some(changed)
		}
		None => include_fields.map(|include| include.iter().map(|field| field.to_uppercase()).collect()),
	};
	if let Some(included) = &mut included {
		for id in &ids {
			if !included.contains(id) {
				included.push(id.clone());
			}
		}
	}
	let excluded: Vec<String> = exclude_fields
		.unwrap_or(&[])
		.iter()
		.map(|field| field.to_uppercase())
		.collect();

	// members outside the effective set become configuration ignores, so the
	// mapper cache discriminates per field set
	let mut ignore: Vec<String> = Vec::new();
	for member in meta_of::<S>().public_members(false) {
		if !member.readable() {
			continue;
		}
		let upper = member.name.to_uppercase();
		let keep = ids.contains(&upper)
			|| (!excluded.contains(&upper)
				&& included.as_ref().map_or(true, |included| included.contains(&upper)));
		if !keep {
			ignore.push(member.name.to_string());
		}
	}

	let configuration = Configuration::new().ignore_members::<S, ParameterSink>(ignore);
	let mapper = manager.get::<S, ParameterSink>(&configuration)?;

	let mut columns: Vec<String> = Vec::new();
	for operation in mapper.stored_operations() {
		if let MappingOperation::SrcRead(read) = operation {
			let upper = read.source.name.to_uppercase();
			if !ids.contains(&upper) {
				columns.push(upper);
			}
		}
	}
	if columns.is_empty() {
		return Ok(false);
	}

	let set_list = columns
		.iter()
		.map(|column| format!("{}={}{}", settings.escape(column), settings.parameter_prefix, column))
		.collect::<Vec<_>>()
		.join(",");
	let where_list = ids
		.iter()
		.map(|id| format!("{}={}{}", settings.escape(id), settings.parameter_prefix, id))
		.collect::<Vec<_>>()
		.join(" AND ");

	let sink = mapper.map_value(value)?;
	for (name, bound) in sink.into_values() {
		command.add_parameter(format!("{}{}", settings.parameter_prefix, name.to_uppercase()), bound);
	}
	command.set_command_text(format!("UPDATE {table} SET {set_list} WHERE {where_list}"));
	Ok(true)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn sink_records_bindings_in_call_order() {
		let mut sink = ParameterSink::default();
		ParameterSink::bind(&mut sink, "id", Some(Box::new(7i32)));
		ParameterSink::bind(&mut sink, "name", None);

		let values = sink.values();
		assert_eq!(values.len(), 2);
		assert_eq!(values[0].0, "id");
		assert_eq!(values[0].1.as_ref().unwrap().downcast_ref::<i32>(), Some(&7));
		assert_eq!(values[1].0, "name");
		assert!(values[1].1.is_none());
	}

	#[test]
	fn settings_escape_columns() {
		let settings = DbSettings::default();
		assert_eq!(settings.escape("NAME"), "\"NAME\"");

		let brackets = DbSettings {
			parameter_prefix: ":".to_string(),
			quote_open: "[".to_string(),
			quote_close: "]".to_string(),
		};
		assert_eq!(brackets.escape("NAME"), "[NAME]");
	}
}
