//! Constraint compiler (C5).
//!
//! Converts a typed set of query constraints into a parameterized SQL
//! fragment. Where the original duck-typed `field__op` string keys, this
//! rendition parses the suffix once, at construction time, into a typed
//! `(column, Op, Value)` triple via [`ConstraintSet`]'s builder methods: an
//! unrecognized operator simply has no corresponding builder method, so it
//! cannot be constructed at all, let alone reach SQL generation.

use rusqlite::types::{ToSql, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
	Eq,
	Not,
	Lt,
	Lte,
	Gt,
	Like,
}

impl Op {
	fn as_sql(self) -> &'static str {
		match self {
			Op::Eq => "=",
			Op::Not => "!=",
			Op::Lt => "<",
			Op::Lte => "<=",
			Op::Gt => ">",
			Op::Like => "LIKE",
		}
	}
}

#[derive(Debug, Clone)]
struct Field {
	column: String,
	op: Op,
	value: Value,
}

/// A group of constraints, either ANDed together (the default top-level
/// group) or ORed together (an `__any` sub-group).
#[derive(Debug, Clone, Default)]
pub struct ConstraintSet {
	fields: Vec<Field>,
	any_groups: Vec<(String, Vec<Field>)>,
}

impl ConstraintSet {
	pub fn new() -> ConstraintSet {
		ConstraintSet::default()
	}

	fn push(mut self, column: impl Into<String>, op: Op, value: impl Into<Value>) -> ConstraintSet {
		self.fields.push(Field { column: column.into(), op, value: value.into() });
		self
	}

	pub fn eq(self, column: impl Into<String>, value: impl Into<Value>) -> ConstraintSet {
		self.push(column, Op::Eq, value)
	}

	pub fn not(self, column: impl Into<String>, value: impl Into<Value>) -> ConstraintSet {
		self.push(column, Op::Not, value)
	}

	pub fn lt(self, column: impl Into<String>, value: impl Into<Value>) -> ConstraintSet {
		self.push(column, Op::Lt, value)
	}

	pub fn lte(self, column: impl Into<String>, value: impl Into<Value>) -> ConstraintSet {
		self.push(column, Op::Lte, value)
	}

	pub fn gt(self, column: impl Into<String>, value: impl Into<Value>) -> ConstraintSet {
		self.push(column, Op::Gt, value)
	}

	pub fn like(self, column: impl Into<String>, value: impl Into<Value>) -> ConstraintSet {
		self.push(column, Op::Like, value)
	}

	/// An `__any` sub-group: the given `(column, op, value)` triples are
	/// ORed together and the whole group is ANDed into the outer set.
	/// `group_name` namespaces the bound parameters so they cannot collide
	/// with the outer set's parameters.
	pub fn any(
		mut self,
		group_name: impl Into<String>,
		items: Vec<(&str, Op, Value)>,
	) -> ConstraintSet {
		let fields =
			items.into_iter().map(|(col, op, val)| Field { column: col.to_owned(), op, value: val }).collect();
		self.any_groups.push((group_name.into(), fields));
		self
	}

	pub fn is_empty(&self) -> bool {
		self.fields.is_empty() && self.any_groups.is_empty()
	}

	/// Compiles the set to a SQL fragment (empty, or `" AND " + joined
	/// conditions`) plus the named parameters (already `:`-prefixed, ready
	/// to bind as `rusqlite` named parameters) to bind alongside it.
	pub fn to_sql(&self) -> (String, Vec<(String, Value)>) {
		if self.is_empty() {
			return (String::new(), Vec::new());
		}
		let mut parts = Vec::new();
		let mut params = Vec::new();
		for (i, field) in self.fields.iter().enumerate() {
			// indexed so two constraints on the same column (e.g. a
			// `gt`/`lt` range pair) don't collide on the same SQLite
			// named-parameter slot.
			let name = format!(":c_{}_{}", field.column, i);
			parts.push(format!("{} {} {}", field.column, field.op.as_sql(), name));
			params.push((name, field.value.clone()));
		}
		for (group_name, fields) in &self.any_groups {
			let mut sub_parts = Vec::new();
			for (i, field) in fields.iter().enumerate() {
				// indexed so two fields on the same column within one group
				// don't collide on the same SQLite named-parameter slot.
				let name = format!(":{}_{}_{}", group_name, field.column, i);
				sub_parts.push(format!("{} {} {}", field.column, field.op.as_sql(), name));
				params.push((name, field.value.clone()));
			}
			parts.push(format!("({})", sub_parts.join(" OR ")));
		}
		(format!(" AND {}", parts.join(" AND ")), params)
	}
}

/// Binds the `(name, value)` pairs produced by [`ConstraintSet::to_sql`] as
/// `rusqlite` named parameters, in addition to any fixed parameters the
/// caller already has.
pub fn named_params_with<'a>(
	fixed: &'a [(&'a str, &'a dyn ToSql)],
	dynamic: &'a [(String, Value)],
) -> Vec<(&'a str, &'a dyn ToSql)> {
	let mut out: Vec<(&str, &dyn ToSql)> = fixed.to_vec();
	for (name, value) in dynamic {
		out.push((name.as_str(), value as &dyn ToSql));
	}
	out
}
