//! Persistence: save and delete with lifecycle hooks.
//!
//! `save` writes only the dirty set. New records (blank primary key) are
//! inserted and receive the generated key; existing records are updated by
//! the key they were loaded or last saved with.

use crate::record::Record;
use rowgraph_core::{Error, Result, Value};

impl Record {
    /// Validate and persist the dirty fields.
    ///
    /// Returns `false`, with [`errors`](Record::errors) populated, when
    /// validation fails. Nothing is written in that case.
    pub fn save(&mut self) -> Result<bool> {
        self.save_with(true)
    }

    /// Persist the dirty fields, optionally skipping validation.
    pub fn save_with(&mut self, run_validation: bool) -> Result<bool> {
        self.persist(run_validation, None)
    }

    /// Validate and persist only the listed dirty fields; the rest stay dirty.
    pub fn save_only(&mut self, fields: &[&str]) -> Result<bool> {
        for field in fields {
            self.meta.field(field)?;
        }
        self.persist(true, Some(fields))
    }

    #[tracing::instrument(level = "debug", skip(self, only), fields(entity = %self.meta.name()))]
    fn persist(&mut self, run_validation: bool, only: Option<&[&str]>) -> Result<bool> {
        let hooks = self.session.hooks_for(self.meta.name());
        hooks.before_save(self)?;

        if run_validation {
            self.errors.clear();
            hooks.validate(self)?;
            if !self.errors.is_empty() {
                tracing::debug!(errors = self.errors.len(), "Validation failed");
                return Ok(false);
            }
        }

        let payload: Vec<(String, Value)> = self
            .changed_values()
            .into_iter()
            .filter(|(name, _)| only.is_none_or(|fields| fields.contains(&name.as_str())))
            .collect();

        if payload.is_empty() {
            tracing::debug!("Nothing changed, skipping write");
        } else if self.is_new() {
            self.insert(&payload)?;
            hooks.after_create(self)?;
        } else {
            self.update(&payload)?;
            hooks.after_update(self)?;
        }

        hooks.after_save(self)?;
        Ok(true)
    }

    fn insert(&mut self, payload: &[(String, Value)]) -> Result<()> {
        let pk = self.meta.primary_key().to_string();
        let values: Vec<(String, Value)> = payload
            .iter()
            .filter(|(name, value)| *name != pk || !value.is_blank())
            .cloned()
            .collect();

        let generated = self
            .session
            .insert(self.meta.table_name(), &values, &self.query_context("insert"))?;
        if !generated.is_blank() {
            self.data.insert(pk, generated);
        }
        self.mark_clean(payload);
        tracing::debug!(pk = %self.pk(), "Inserted");
        Ok(())
    }

    fn update(&mut self, payload: &[(String, Value)]) -> Result<()> {
        let key = self.persisted_key.clone().unwrap_or_else(|| self.pk());
        let affected = self.session.update(
            self.meta.table_name(),
            payload,
            self.meta.primary_key(),
            &key,
            &self.query_context("update"),
        )?;
        self.mark_clean(payload);
        tracing::debug!(pk = %key, affected, "Updated");
        Ok(())
    }

    fn mark_clean(&mut self, payload: &[(String, Value)]) {
        for (name, _) in payload {
            self.changed.remove(name);
        }
        let pk = self.pk();
        self.persisted_key = (!pk.is_blank()).then_some(pk);
    }

    /// Delete this record's row, firing both delete hooks.
    pub fn delete(&mut self) -> Result<bool> {
        self.delete_with(true, true)
    }

    /// Delete this record's row.
    ///
    /// Fails with [`Error::DeleteOfUnsavedRecord`] for a new record, before
    /// any hook or executor call. `after_delete` only fires when a row was
    /// actually removed.
    #[tracing::instrument(level = "debug", skip(self), fields(entity = %self.meta.name()))]
    pub fn delete_with(&mut self, run_before: bool, run_after: bool) -> Result<bool> {
        if self.is_new() {
            return Err(Error::DeleteOfUnsavedRecord {
                entity: self.meta.name().to_string(),
            });
        }

        let hooks = self.session.hooks_for(self.meta.name());
        if run_before {
            hooks.before_delete(self)?;
        }

        let key = self.persisted_key.clone().unwrap_or_else(|| self.pk());
        let affected = self.session.delete(
            self.meta.table_name(),
            self.meta.primary_key(),
            &key,
            &self.query_context("delete"),
        )?;
        tracing::debug!(pk = %key, affected, "Deleted");

        if affected == 0 {
            return Ok(false);
        }
        if run_after {
            hooks.after_delete(self)?;
        }
        Ok(true)
    }

    /// Delete every row matching the current criteria. Returns the count.
    #[tracing::instrument(level = "debug", skip(self), fields(entity = %self.meta.name()))]
    pub fn delete_all(&self) -> Result<u64> {
        self.session
            .delete_matching(&self.criteria, &self.query_context("delete_all"))
    }
}
