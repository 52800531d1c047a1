//! Core types for rowgraph.
//!
//! This crate holds the foundational pieces every other layer builds on:
//!
//! - `Value` for dynamically typed column values
//! - `Row` for flat, possibly namespaced, result rows
//! - `EntityMeta` / `Registry` for per-entity field and relation metadata
//! - `Error` for everything that can go wrong

pub mod error;
pub mod meta;
pub mod row;
pub mod value;

pub use error::{
    ConfigError, Error, ExecutorError, RegistryError, RegistryErrorKind, Result, TypeError,
};
pub use meta::{
    EntityMeta, EntityMetaBuilder, FieldDef, FieldFilter, PathStep, Property, Registry,
    RegistryBuilder, RelationDef, RelationKind,
};
pub use row::{ColumnInfo, FromValue, Row};
pub use value::Value;

/// Separator between a relation path and a field name in a selected column
/// (`author:Name`).
pub const NAMESPACE_SEPARATOR: char = ':';

/// Separator between relation aliases in a dotted path (`author.profile`).
pub const PATH_SEPARATOR: char = '.';

/// Table alias of the root entity in every generated query.
pub const ROOT_ALIAS: &str = "t";
