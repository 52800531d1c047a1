//! Mergeable query criteria.
//!
//! A [`Criteria`] is the structured intermediate form of a pending SELECT:
//! select list, source table, joins keyed by relation path, predicate
//! fragments with bound parameters, ordering and paging. Every record owns
//! one and grows it incrementally through [`Criteria::merge`].
//!
//! # Merge rules
//!
//! - `from`, `order_by`, `limit`, `offset` are scalars: a present incoming
//!   value overwrites.
//! - `select` is appended, skipping columns already selected.
//! - `joins` are unioned by key; an existing join is never replaced.
//! - conditions are appended. A named condition whose name already exists is
//!   dropped unless it is marked [`Condition::replacing`], in which case it
//!   takes over the existing slot. An unnamed fragment already present is
//!   not appended twice.
//! - params are unioned and the existing value wins on collision, except for
//!   params brought in by a replacing condition.

use crate::join::Join;
use rowgraph_core::{ROOT_ALIAS, Value};
use std::sync::atomic::{AtomicU64, Ordering};

/// Column name of the count expression produced by [`Criteria::for_count`].
pub const COUNT_COLUMN: &str = "cnt";

static PLACEHOLDER_SEQ: AtomicU64 = AtomicU64::new(1);

/// A WHERE fragment, optionally keyed by a caller-chosen name.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    name: Option<String>,
    fragment: String,
    /// Placeholders introduced together with this fragment
    params: Vec<String>,
    replace: bool,
}

impl Condition {
    /// An anonymous fragment.
    pub fn new(fragment: impl Into<String>) -> Self {
        Self {
            name: None,
            fragment: fragment.into(),
            params: Vec::new(),
            replace: false,
        }
    }

    /// A fragment that can later be removed by `name`.
    pub fn named(name: impl Into<String>, fragment: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::new(fragment)
        }
    }

    /// Replace an existing condition of the same name on merge.
    pub fn replacing(mut self) -> Self {
        self.replace = true;
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn fragment(&self) -> &str {
        &self.fragment
    }

    /// Placeholders owned by this condition.
    pub fn params(&self) -> &[String] {
        &self.params
    }
}

/// An accumulating, mergeable description of a query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Criteria {
    select: Vec<String>,
    from: Option<String>,
    joins: Vec<(String, Join)>,
    conditions: Vec<Condition>,
    params: Vec<(String, Value)>,
    order_by: Option<String>,
    limit: Option<u64>,
    offset: Option<u64>,
}

impl Criteria {
    /// An empty criteria, mostly useful as a merge delta.
    pub fn new() -> Self {
        Self::default()
    }

    /// Canonical criteria for `table`: every root column, root aliased `t`.
    pub fn reset(table: &str) -> Self {
        Self {
            select: vec![format!("{}.*", ROOT_ALIAS)],
            from: Some(format!("{} {}", table, ROOT_ALIAS)),
            ..Self::default()
        }
    }

    /// Generate a placeholder name unique within this process.
    pub fn fresh_placeholder() -> String {
        format!(":p{}", PLACEHOLDER_SEQ.fetch_add(1, Ordering::Relaxed))
    }

    // Delta builders

    pub fn with_select(mut self, column: impl Into<String>) -> Self {
        self.select.push(column.into());
        self
    }

    pub fn with_from(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    pub fn with_join(mut self, key: impl Into<String>, join: Join) -> Self {
        self.joins.push((key.into(), join));
        self
    }

    /// Add a condition together with the params it introduces.
    pub fn with_condition<I, K>(mut self, mut condition: Condition, params: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        for (key, value) in params {
            let key = key.into();
            condition.params.push(key.clone());
            self.params.push((key, value));
        }
        self.conditions.push(condition);
        self
    }

    /// Add a bound parameter not tied to any condition.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    pub fn with_order_by(mut self, order: impl Into<String>) -> Self {
        self.order_by = Some(order.into());
        self
    }

    pub fn with_limit(mut self, limit: u64, offset: u64) -> Self {
        self.limit = Some(limit);
        self.offset = Some(offset);
        self
    }

    // Accessors

    pub fn select(&self) -> &[String] {
        &self.select
    }

    pub fn from(&self) -> Option<&str> {
        self.from.as_deref()
    }

    /// Joins in registration (= dependency) order.
    pub fn joins(&self) -> impl Iterator<Item = (&str, &Join)> {
        self.joins.iter().map(|(k, j)| (k.as_str(), j))
    }

    pub fn join(&self, key: &str) -> Option<&Join> {
        self.joins.iter().find(|(k, _)| k == key).map(|(_, j)| j)
    }

    pub fn has_join(&self, key: &str) -> bool {
        self.join(key).is_some()
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn params(&self) -> &[(String, Value)] {
        &self.params
    }

    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn order(&self) -> Option<&str> {
        self.order_by.as_deref()
    }

    pub fn limit_value(&self) -> Option<u64> {
        self.limit
    }

    pub fn offset_value(&self) -> Option<u64> {
        self.offset
    }

    // Mutators

    /// Deep-merge `delta` into this criteria.
    pub fn merge(&mut self, delta: Criteria) {
        let Criteria {
            select,
            from,
            joins,
            conditions,
            mut params,
            order_by,
            limit,
            offset,
        } = delta;

        if from.is_some() {
            self.from = from;
        }
        if order_by.is_some() {
            self.order_by = order_by;
        }
        if limit.is_some() {
            self.limit = limit;
        }
        if offset.is_some() {
            self.offset = offset;
        }

        for column in select {
            if !self.select.contains(&column) {
                self.select.push(column);
            }
        }

        for (key, join) in joins {
            if !self.has_join(&key) {
                self.joins.push((key, join));
            }
        }

        for condition in conditions {
            self.merge_condition(condition, &mut params);
        }

        for (key, value) in params {
            self.insert_param(key, value, false);
        }

        tracing::trace!(
            select = self.select.len(),
            joins = self.joins.len(),
            conditions = self.conditions.len(),
            "Merged criteria"
        );
    }

    /// Append a WHERE fragment with its bound params.
    ///
    /// A `name` makes the fragment removable through [`remove_condition`].
    ///
    /// [`remove_condition`]: Criteria::remove_condition
    pub fn add_condition<I, K>(&mut self, fragment: &str, params: I, name: Option<&str>) -> &mut Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let condition = match name {
            Some(name) => Condition::named(name, fragment),
            None => Condition::new(fragment),
        };
        self.merge(Criteria::new().with_condition(condition, params));
        self
    }

    /// Remove a named condition and the params it introduced. No-op if absent.
    pub fn remove_condition(&mut self, name: &str) -> &mut Self {
        if let Some(index) = self.condition_index(name) {
            let removed = self.conditions.remove(index);
            self.params.retain(|(k, _)| !removed.params.contains(k));
        }
        self
    }

    pub fn order_by(&mut self, order: impl Into<String>) -> &mut Self {
        self.order_by = Some(order.into());
        self
    }

    pub fn limit(&mut self, limit: u64, offset: u64) -> &mut Self {
        self.limit = Some(limit);
        self.offset = Some(offset);
        self
    }

    /// Derive the criteria for counting matches.
    ///
    /// Predicates and joins are kept; ordering, paging and the select list
    /// are replaced by a single `COUNT(*)` column named [`COUNT_COLUMN`].
    pub fn for_count(&self) -> Criteria {
        Criteria {
            select: vec![format!("COUNT(*) AS {}", COUNT_COLUMN)],
            order_by: None,
            limit: None,
            offset: None,
            ..self.clone()
        }
    }

    /// Render the SELECT statement with placeholders left unbound.
    pub fn to_sql(&self) -> String {
        let mut sql = format!("SELECT {}", self.select.join(", "));
        if let Some(from) = &self.from {
            sql.push_str(" FROM ");
            sql.push_str(from);
        }
        self.push_tail(&mut sql);
        if let Some(order) = &self.order_by {
            sql.push_str(" ORDER BY ");
            sql.push_str(order);
        }
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        if let Some(offset) = self.offset.filter(|o| *o > 0) {
            sql.push_str(&format!(" OFFSET {}", offset));
        }
        sql
    }

    /// Render a multi-table DELETE of the root rows these criteria match.
    pub fn to_delete_sql(&self) -> String {
        let mut sql = format!("DELETE {}", ROOT_ALIAS);
        if let Some(from) = &self.from {
            sql.push_str(" FROM ");
            sql.push_str(from);
        }
        self.push_tail(&mut sql);
        sql
    }

    fn push_tail(&self, sql: &mut String) {
        for (_, join) in &self.joins {
            sql.push(' ');
            sql.push_str(&join.to_sql());
        }
        if !self.conditions.is_empty() {
            let predicates: Vec<String> = self
                .conditions
                .iter()
                .map(|c| format!("({})", c.fragment))
                .collect();
            sql.push_str(" WHERE ");
            sql.push_str(&predicates.join(" AND "));
        }
    }

    fn condition_index(&self, name: &str) -> Option<usize> {
        self.conditions
            .iter()
            .position(|c| c.name.as_deref() == Some(name))
    }

    fn merge_condition(&mut self, mut condition: Condition, pending: &mut Vec<(String, Value)>) {
        let mut own = Vec::new();
        pending.retain(|(key, value)| {
            if condition.params.contains(key) {
                own.push((key.clone(), value.clone()));
                false
            } else {
                true
            }
        });

        let existing = match &condition.name {
            Some(name) => self.condition_index(name),
            None => self
                .conditions
                .iter()
                .position(|c| c.name.is_none() && c.fragment == condition.fragment),
        };

        match existing {
            Some(index) if condition.replace && condition.name.is_some() => {
                let old = std::mem::replace(&mut self.conditions[index], Condition::new(""));
                self.params.retain(|(k, _)| !old.params.contains(k));
                condition.params = own
                    .into_iter()
                    .filter_map(|(k, v)| self.insert_param(k, v, true))
                    .collect();
                self.conditions[index] = condition;
            }
            Some(_) if condition.name.is_some() => {
                tracing::trace!(
                    name = condition.name.as_deref(),
                    "Named condition already present; keeping existing"
                );
            }
            Some(_) => {
                // Same anonymous fragment: only its params can still be new.
                for (key, value) in own {
                    self.insert_param(key, value, false);
                }
            }
            None => {
                condition.params = own
                    .into_iter()
                    .filter_map(|(k, v)| self.insert_param(k, v, false))
                    .collect();
                self.conditions.push(condition);
            }
        }
    }

    /// Insert a param, returning its key if this call introduced or replaced it.
    fn insert_param(&mut self, key: String, value: Value, overwrite: bool) -> Option<String> {
        match self.params.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) if overwrite => {
                slot.1 = value;
                Some(key)
            }
            Some(_) => None,
            None => {
                self.params.push((key.clone(), value));
                Some(key)
            }
        }
    }
}
