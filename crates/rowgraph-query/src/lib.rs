//! Query construction for rowgraph.
//!
//! `rowgraph-query` is the **query shaping layer**. It never talks to a
//! database itself; it produces a structured [`Criteria`] value that the
//! caller-supplied [`Executor`] turns into a statement.
//!
//! # Role In The Architecture
//!
//! - **Criteria**: an accumulating, mergeable description of a pending query.
//! - **Relation resolver**: turns dotted relation paths (`author.profile`) into
//!   aliased joins plus namespaced select columns.
//! - **Executor**: the narrow interface to the external SQL engine.

pub mod criteria;
pub mod executor;
pub mod join;
pub mod resolver;

pub use criteria::{COUNT_COLUMN, Condition, Criteria};
pub use executor::{Executor, Quoter, quote_identifier, quote_literal};
pub use join::{Join, JoinType};
pub use resolver::{render_filter, resolve_relation};
