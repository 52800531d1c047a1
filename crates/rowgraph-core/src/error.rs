//! Error types for rowgraph operations.

use crate::meta::RelationKind;
use std::fmt;

/// The primary error type for all rowgraph operations.
///
/// Structural errors (`UnknownProperty`, `UnknownRelation`,
/// `UnsupportedRelationKind`, `DeleteOfUnsavedRecord`,
/// `MissingFilterParameter`, `UnknownEntity`, `Registry`) are programmer
/// errors and abort the calling operation. Validation failures are never
/// reported through this type; `Record::save` returns `false` instead.
#[derive(Debug)]
pub enum Error {
    /// A field or relation name that the entity does not declare.
    UnknownProperty { entity: String, name: String },
    /// A relation alias (or path segment) that the entity does not declare.
    UnknownRelation { entity: String, alias: String },
    /// A relation whose kind has no join or load strategy for the operation.
    UnsupportedRelationKind {
        entity: String,
        alias: String,
        kind: RelationKind,
    },
    /// `delete` was called on a record without a primary key.
    DeleteOfUnsavedRecord { entity: String },
    /// A relation filter template referenced a parameter the caller did not supply.
    MissingFilterParameter { alias: String, parameter: String },
    /// An entity name that is not registered.
    UnknownEntity(String),
    /// Metadata registration errors
    Registry(RegistryError),
    /// Value conversion errors
    Type(TypeError),
    /// Failure reported by the query executor, passed through untouched
    Executor(ExecutorError),
    /// Configuration errors
    Config(ConfigError),
    /// Custom error with message
    Custom(String),
}

#[derive(Debug)]
pub struct RegistryError {
    pub kind: RegistryErrorKind,
    pub entity: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryErrorKind {
    /// Two entities registered under the same name
    DuplicateEntity,
    /// Two relations (or a relation and a field) share a name
    DuplicateProperty,
    /// The primary key is not one of the declared fields
    MissingPrimaryKey,
    /// A relation points at an entity that was never registered
    UnknownTarget,
    /// A relation alias that would collide with the root table alias or
    /// break path and column splitting
    InvalidAlias,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

/// Opaque failure from the data-access layer.
#[derive(Debug)]
pub struct ExecutorError {
    pub message: String,
    /// Rendered statement, when the executor knows it
    pub sql: Option<String>,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ExecutorError {
    /// Create an executor error with just a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            sql: None,
            source: None,
        }
    }

    /// Attach the statement that failed.
    pub fn with_sql(mut self, sql: impl Into<String>) -> Self {
        self.sql = Some(sql.into());
        self
    }

    /// Attach the underlying driver error.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }
}

impl ConfigError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Attach the underlying parse or I/O error.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }
}

impl Error {
    /// Is this a fail-fast metadata/usage error rather than a runtime failure?
    pub fn is_programmer_error(&self) -> bool {
        matches!(
            self,
            Error::UnknownProperty { .. }
                | Error::UnknownRelation { .. }
                | Error::UnsupportedRelationKind { .. }
                | Error::DeleteOfUnsavedRecord { .. }
                | Error::MissingFilterParameter { .. }
                | Error::UnknownEntity(_)
                | Error::Registry(_)
        )
    }

    /// Get the SQL that caused this error, if available
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Executor(e) => e.sql.as_deref(),
            _ => None,
        }
    }

    pub(crate) fn unknown_property(entity: &str, name: &str) -> Self {
        Error::UnknownProperty {
            entity: entity.to_string(),
            name: name.to_string(),
        }
    }

    pub(crate) fn unknown_relation(entity: &str, alias: &str) -> Self {
        Error::UnknownRelation {
            entity: entity.to_string(),
            alias: alias.to_string(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::UnknownProperty { entity, name } => {
                write!(f, "Unknown property '{}' on entity '{}'", name, entity)
            }
            Error::UnknownRelation { entity, alias } => {
                write!(f, "Unknown relation '{}' on entity '{}'", alias, entity)
            }
            Error::UnsupportedRelationKind {
                entity,
                alias,
                kind,
            } => write!(
                f,
                "Relation '{}.{}' of kind {} is not supported here",
                entity, alias, kind
            ),
            Error::DeleteOfUnsavedRecord { entity } => {
                write!(f, "Cannot delete unsaved '{}' record", entity)
            }
            Error::MissingFilterParameter { alias, parameter } => write!(
                f,
                "Filter of relation '{}' needs parameter '{}'",
                alias, parameter
            ),
            Error::UnknownEntity(name) => write!(f, "Entity '{}' is not registered", name),
            Error::Registry(e) => write!(f, "Registry error: {}", e),
            Error::Type(e) => write!(f, "Type error: {}", e),
            Error::Executor(e) => write!(f, "Executor error: {}", e),
            Error::Config(e) => write!(f, "Configuration error: {}", e),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Executor(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Config(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.entity, self.message)
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(col) = &self.column {
            write!(
                f,
                "expected {} for column '{}', found {}",
                self.expected, col, self.actual
            )
        } else {
            write!(f, "expected {}, found {}", self.expected, self.actual)
        }
    }
}

impl fmt::Display for ExecutorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<RegistryError> for Error {
    fn from(err: RegistryError) -> Self {
        Error::Registry(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<ExecutorError> for Error {
    fn from(err: ExecutorError) -> Self {
        Error::Executor(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

/// Result type alias for rowgraph operations.
pub type Result<T> = std::result::Result<T, Error>;
