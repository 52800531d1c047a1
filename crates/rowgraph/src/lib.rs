//! rowgraph: metadata-driven record mapping.
//!
//! Entity types are declared once in a [`Registry`]: fields (with defaults,
//! mass-assignment safety and filters) and relations (HAS ONE, BELONGS TO,
//! HAS MANY). A [`Session`] binds the registry to an [`Executor`] supplied by
//! the caller. From there:
//!
//! - [`Record`]s act as query objects. Their [`Criteria`] grow incrementally,
//!   relation paths such as `author.profile` become aliased joins with
//!   namespaced columns, and the finders hydrate the flat result rows back
//!   into record graphs.
//! - Relations that were not joined load lazily on first access and are
//!   cached on the record.
//! - Field writes are tracked, and `save` writes only what changed.
//!
//! # Example
//!
//! ```ignore
//! use rowgraph::prelude::*;
//!
//! let registry = Registry::builder()
//!     .register(
//!         EntityMeta::builder("Post", "posts")
//!             .fields(["Id", "Title", "AuthorId"])
//!             .relation(RelationDef::belongs_to("author", "User", "AuthorId")),
//!     )
//!     .register(EntityMeta::builder("User", "users").fields(["Id", "Name"]))
//!     .build()?;
//!
//! let session = Session::new(registry, Arc::new(my_executor));
//! let post = session.model("Post")?.with("author")?.find_by_pk(5, None)?;
//! ```

pub mod config;
mod finder;
pub mod hooks;
mod hydrate;
mod persist;
pub mod profile;
pub mod record;
pub mod session;

pub use config::SessionConfig;
pub use hooks::{Lifecycle, NoHooks};
pub use profile::{FileSink, ProfileSink, QueryProfile, TracingSink};
pub use record::{Access, DEFAULT_SCENARIO, Record, Related};
pub use session::{Session, SessionBuilder};

pub use rowgraph_core::{
    ConfigError, EntityMeta, EntityMetaBuilder, Error, ExecutorError, FieldDef, FieldFilter,
    Property, Registry, RegistryBuilder, RegistryError, RegistryErrorKind, RelationDef,
    RelationKind, Result, Row, TypeError, Value,
};
pub use rowgraph_query::{Condition, Criteria, Executor, Join, JoinType, Quoter};

/// Everything needed to declare entities, run queries and implement an
/// executor.
pub mod prelude {
    pub use crate::{
        Access, Condition, Criteria, EntityMeta, Error, Executor, FieldDef, JoinType, Lifecycle,
        Quoter, Record, Registry, RelationDef, RelationKind, Related, Result, Row, Session,
        SessionConfig, Value,
    };
    pub use std::sync::Arc;
}
