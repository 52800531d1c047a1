//! The query facade: finders and counting on a record's criteria.

use crate::hydrate::{hydrate_all, hydrate_row};
use crate::record::Record;
use rowgraph_core::{PATH_SEPARATOR, ROOT_ALIAS, Result, Value};
use rowgraph_query::{COUNT_COLUMN, Condition, Criteria, Quoter};
use std::collections::HashMap;

impl Record {
    /// The first record matching the current criteria.
    #[tracing::instrument(level = "debug", skip(self), fields(entity = %self.meta.name()))]
    pub fn find(&self) -> Result<Option<Record>> {
        let row = self
            .session
            .query_one(&self.criteria, &self.query_context("find"))?;
        row.map(|row| hydrate_row(&self.session, &self.meta, &row))
            .transpose()
    }

    /// Every record matching the current criteria, in result order.
    #[tracing::instrument(level = "debug", skip(self), fields(entity = %self.meta.name()))]
    pub fn find_all(&self) -> Result<Vec<Record>> {
        let rows = self
            .session
            .query_all(&self.criteria, &self.query_context("find_all"))?;
        let records = hydrate_all(&self.session, &self.meta, &rows)?;
        tracing::debug!(count = records.len(), "Found records");
        Ok(records)
    }

    /// Every matching record paired with its value of `field`, in result
    /// order.
    ///
    /// Keys compare by [`Value::key_string`]. A later row with the same key
    /// replaces the earlier record in its original position.
    pub fn find_all_keyed(&self, field: &str) -> Result<Vec<(Value, Record)>> {
        self.meta.field(field)?;
        let mut keyed: Vec<(Value, Record)> = Vec::new();
        let mut slots: HashMap<String, usize> = HashMap::new();
        for record in self.find_all()? {
            let key = record.value(field)?;
            match slots.get(&key.key_string()) {
                Some(&slot) => keyed[slot] = (key, record),
                None => {
                    slots.insert(key.key_string(), keyed.len());
                    keyed.push((key, record));
                }
            }
        }
        Ok(keyed)
    }

    /// Install `field = value` (plus any `extra` criteria) and find one.
    ///
    /// The predicate stays on this record's criteria.
    pub fn find_by(
        &mut self,
        field: &str,
        value: impl Into<Value>,
        extra: Option<Criteria>,
    ) -> Result<Option<Record>> {
        self.install_equality(field, value.into(), extra);
        self.find()
    }

    /// Install `field = value` (plus any `extra` criteria) and find all.
    pub fn find_all_by(
        &mut self,
        field: &str,
        value: impl Into<Value>,
        extra: Option<Criteria>,
    ) -> Result<Vec<Record>> {
        self.install_equality(field, value.into(), extra);
        self.find_all()
    }

    /// Find by primary key.
    pub fn find_by_pk(
        &mut self,
        id: impl Into<Value>,
        extra: Option<Criteria>,
    ) -> Result<Option<Record>> {
        let pk = self.meta.primary_key().to_string();
        self.find_by(&pk, id, extra)
    }

    /// Count matching rows. Ordering, paging and the select list are ignored.
    #[tracing::instrument(level = "debug", skip(self), fields(entity = %self.meta.name()))]
    pub fn count(&self) -> Result<u64> {
        let criteria = self.criteria.for_count();
        let Some(row) = self
            .session
            .query_one(&criteria, &self.query_context("count"))?
        else {
            return Ok(0);
        };
        let count: i64 = row.get_named(COUNT_COLUMN)?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    fn install_equality(&mut self, field: &str, value: Value, extra: Option<Criteria>) {
        if let Some(extra) = extra {
            self.criteria.merge(extra);
        }
        let quoter = self.session.executor();
        let column = match field.rsplit_once(PATH_SEPARATOR) {
            Some((path, name)) => format!(
                "{}.{}",
                quoter.quote_identifier(path),
                quoter.quote_identifier(name)
            ),
            None => format!("{}.{}", ROOT_ALIAS, quoter.quote_identifier(field)),
        };
        let placeholder = Criteria::fresh_placeholder();
        self.criteria.merge(Criteria::new().with_condition(
            Condition::new(format!("{} = {}", column, placeholder)),
            [(placeholder, value)],
        ));
    }

    pub(crate) fn query_context(&self, operation: &str) -> String {
        format!("{}::{}", self.meta.name(), operation)
    }
}
