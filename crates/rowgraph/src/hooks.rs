//! Lifecycle hooks for records.
//!
//! Hooks are registered per entity type on the [`Session`](crate::Session).
//! Every method defaults to a no-op. Returning an error from any hook aborts
//! the operation that fired it and propagates to the caller.
//!
//! # Example
//!
//! ```ignore
//! struct PostHooks;
//!
//! impl Lifecycle for PostHooks {
//!     fn validate(&self, record: &mut Record) -> Result<()> {
//!         if record.value("Title")?.is_blank() {
//!             record.add_error("Title", "Title cannot be blank");
//!         }
//!         Ok(())
//!     }
//! }
//! ```

use crate::record::Record;
use rowgraph_core::Result;

/// Callbacks fired around persistence and hydration.
pub trait Lifecycle: Send + Sync {
    /// Called first by `save`, before validation. May mutate fields.
    #[allow(unused_variables)]
    fn before_save(&self, record: &mut Record) -> Result<()> {
        Ok(())
    }

    /// Validation rules. Report failures with [`Record::add_error`]; any
    /// error recorded makes `save` return `false`.
    ///
    /// Rules can vary on [`Record::scenario`].
    #[allow(unused_variables)]
    fn validate(&self, record: &mut Record) -> Result<()> {
        Ok(())
    }

    /// Called after a successful insert. The generated key is already set.
    #[allow(unused_variables)]
    fn after_create(&self, record: &mut Record) -> Result<()> {
        Ok(())
    }

    #[allow(unused_variables)]
    fn after_update(&self, record: &mut Record) -> Result<()> {
        Ok(())
    }

    /// Called last by every successful `save`, including no-op saves.
    #[allow(unused_variables)]
    fn after_save(&self, record: &mut Record) -> Result<()> {
        Ok(())
    }

    #[allow(unused_variables)]
    fn before_delete(&self, record: &mut Record) -> Result<()> {
        Ok(())
    }

    /// Called only when the delete removed a row.
    #[allow(unused_variables)]
    fn after_delete(&self, record: &mut Record) -> Result<()> {
        Ok(())
    }

    /// Called on every record built from a result row, root and related.
    #[allow(unused_variables)]
    fn after_load(&self, record: &mut Record) -> Result<()> {
        Ok(())
    }
}

/// The hooks of entity types that registered none.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl Lifecycle for NoHooks {}
