//! Live entity instances.
//!
//! A [`Record`] holds sparse field values, the dirty set of fields changed
//! since the last save, a cache of related records, validation errors and a
//! scenario tag. It also carries the [`Criteria`] used when it acts as the
//! query object for its entity type (see the finders).
//!
//! Field writes always go through the declared field's filter and land in
//! both `data` and the dirty set. Relation writes bypass the dirty set:
//! relations persist through their own records.

use crate::session::Session;
use rowgraph_core::{EntityMeta, Error, Property, ROOT_ALIAS, RelationKind, Result, Value};
use rowgraph_query::{Criteria, JoinType, Quoter, render_filter, resolve_relation};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Scenario of a freshly constructed record.
pub const DEFAULT_SCENARIO: &str = "default";

/// Loaded state of a relation slot.
///
/// A relation that was never loaded has no slot at all.
#[derive(Debug, Clone)]
pub enum Related {
    One(Box<Record>),
    Many(Vec<Record>),
    /// Loaded, but nothing matched
    Empty,
}

impl Related {
    pub fn is_empty(&self) -> bool {
        match self {
            Related::One(_) => false,
            Related::Many(records) => records.is_empty(),
            Related::Empty => true,
        }
    }

    pub fn as_one(&self) -> Option<&Record> {
        match self {
            Related::One(record) => Some(&**record),
            _ => None,
        }
    }

    pub fn as_one_mut(&mut self) -> Option<&mut Record> {
        match self {
            Related::One(record) => Some(&mut **record),
            _ => None,
        }
    }

    pub fn as_many(&self) -> Option<&[Record]> {
        match self {
            Related::Many(records) => Some(records),
            _ => None,
        }
    }
}

impl From<Record> for Related {
    fn from(record: Record) -> Self {
        Related::One(Box::new(record))
    }
}

impl From<Option<Record>> for Related {
    fn from(record: Option<Record>) -> Self {
        record.map_or(Related::Empty, Related::from)
    }
}

/// Result of [`Record::get`].
#[derive(Debug)]
pub enum Access<'a> {
    Field(Value),
    Relation(&'a Related),
}

impl<'a> Access<'a> {
    pub fn into_value(self) -> Option<Value> {
        match self {
            Access::Field(value) => Some(value),
            Access::Relation(_) => None,
        }
    }

    pub fn into_related(self) -> Option<&'a Related> {
        match self {
            Access::Field(_) => None,
            Access::Relation(related) => Some(related),
        }
    }
}

/// A live instance of a registered entity type.
#[derive(Debug, Clone)]
pub struct Record {
    pub(crate) session: Session,
    pub(crate) meta: Arc<EntityMeta>,
    pub(crate) data: HashMap<String, Value>,
    pub(crate) changed: HashMap<String, Value>,
    pub(crate) related: HashMap<String, Related>,
    pub(crate) errors: BTreeMap<String, String>,
    pub(crate) scenario: String,
    pub(crate) criteria: Criteria,
    /// Primary key as last loaded or saved; updates and deletes target it
    pub(crate) persisted_key: Option<Value>,
}

impl Record {
    pub(crate) fn new(session: Session, meta: Arc<EntityMeta>) -> Self {
        let criteria = Criteria::reset(&session.executor().quote_identifier(meta.table_name()));
        Self {
            session,
            meta,
            data: HashMap::new(),
            changed: HashMap::new(),
            related: HashMap::new(),
            errors: BTreeMap::new(),
            scenario: DEFAULT_SCENARIO.to_string(),
            criteria,
            persisted_key: None,
        }
    }

    /// An existing record built from stored values; nothing is dirty.
    pub(crate) fn loaded(
        session: Session,
        meta: Arc<EntityMeta>,
        data: HashMap<String, Value>,
    ) -> Self {
        let mut record = Self::new(session, meta);
        record.data = data;
        let pk = record.pk();
        record.persisted_key = (!pk.is_blank()).then_some(pk);
        record
    }

    /// Name of the entity type.
    pub fn entity(&self) -> &str {
        self.meta.name()
    }

    pub fn meta(&self) -> &Arc<EntityMeta> {
        &self.meta
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    // Fields

    /// Read a field: the tracked value, else the declared default.
    pub fn value(&self, field: &str) -> Result<Value> {
        let def = self.meta.field(field)?;
        Ok(self
            .data
            .get(field)
            .cloned()
            .unwrap_or_else(|| def.default.clone()))
    }

    /// Read a field and convert it.
    pub fn value_as<T>(&self, field: &str) -> Result<T>
    where
        T: TryFrom<Value, Error = Error>,
    {
        T::try_from(self.value(field)?)
    }

    /// Read a field or relation by name.
    ///
    /// A relation that has not been loaded yet is lazily loaded and cached.
    pub fn get(&mut self, key: &str) -> Result<Access<'_>> {
        match self.meta.property(key) {
            Some(Property::Field(_)) => self.value(key).map(Access::Field),
            Some(Property::Relation(_)) => self.related(key).map(Access::Relation),
            None => Err(self.unknown_property(key)),
        }
    }

    /// Write a field through its filter and mark it dirty.
    pub fn set(&mut self, field: &str, value: impl Into<Value>) -> Result<&mut Self> {
        self.set_with(field, value, true)
    }

    /// Write a field, optionally skipping its filter, and mark it dirty.
    pub fn set_with(
        &mut self,
        field: &str,
        value: impl Into<Value>,
        run_filter: bool,
    ) -> Result<&mut Self> {
        let def = self.meta.field(field)?;
        let value = if run_filter {
            def.apply_filter(value.into())
        } else {
            value.into()
        };
        self.changed.insert(field.to_string(), value.clone());
        self.data.insert(field.to_string(), value);
        Ok(self)
    }

    /// Mass-assign `safe` fields. Unknown and unsafe keys are skipped.
    ///
    /// Returns the number of fields written.
    pub fn assign<I, K, V>(&mut self, pairs: I) -> usize
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        let mut written = 0;
        for (key, value) in pairs {
            let key = key.as_ref();
            match self.meta.field(key) {
                Ok(def) if def.safe => {
                    let value = def.apply_filter(value.into());
                    self.changed.insert(key.to_string(), value.clone());
                    self.data.insert(key.to_string(), value);
                    written += 1;
                }
                _ => tracing::trace!(entity = self.entity(), key, "Skipped unsafe assignment"),
            }
        }
        written
    }

    /// Clear a field or relation from the data, dirty set and relation cache.
    pub fn unset(&mut self, key: &str) -> Result<&mut Self> {
        if self.meta.property(key).is_none() {
            return Err(self.unknown_property(key));
        }
        self.data.remove(key);
        self.changed.remove(key);
        self.related.remove(key);
        Ok(self)
    }

    /// Primary key value (the declared default while unset).
    pub fn pk(&self) -> Value {
        self.data
            .get(self.meta.primary_key())
            .cloned()
            .or_else(|| self.meta.default_of(self.meta.primary_key()).ok().cloned())
            .unwrap_or_default()
    }

    /// A record is new while its primary key is blank.
    pub fn is_new(&self) -> bool {
        self.pk().is_blank()
    }

    /// Dirty fields in declaration order.
    pub fn changed_fields(&self) -> Vec<&str> {
        self.meta
            .fields()
            .iter()
            .map(|f| f.name.as_str())
            .filter(|name| self.changed.contains_key(*name))
            .collect()
    }

    /// Dirty fields with their pending values, in declaration order.
    pub fn changed_values(&self) -> Vec<(String, Value)> {
        self.meta
            .fields()
            .iter()
            .filter_map(|f| {
                self.changed
                    .get(&f.name)
                    .map(|v| (f.name.clone(), v.clone()))
            })
            .collect()
    }

    pub fn is_dirty(&self) -> bool {
        !self.changed.is_empty()
    }

    /// Every declared field with its current value, in declaration order.
    pub fn attributes(&self) -> Vec<(&str, Value)> {
        self.meta
            .fields()
            .iter()
            .map(|f| {
                let value = self.data.get(&f.name).unwrap_or(&f.default).clone();
                (f.name.as_str(), value)
            })
            .collect()
    }

    /// Fields and loaded relations as a JSON object.
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for (name, value) in self.attributes() {
            map.insert(name.to_string(), json_value(value));
        }
        for relation in self.meta.relations() {
            let json = match self.related.get(&relation.alias) {
                Some(Related::One(record)) => record.to_json(),
                Some(Related::Many(records)) => {
                    serde_json::Value::Array(records.iter().map(Record::to_json).collect())
                }
                Some(Related::Empty) => serde_json::Value::Null,
                None => continue,
            };
            map.insert(relation.alias.clone(), json);
        }
        serde_json::Value::Object(map)
    }

    // Validation state

    pub fn errors(&self) -> &BTreeMap<String, String> {
        &self.errors
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Record a validation failure; a later message for the same field wins.
    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.insert(field.into(), message.into());
    }

    pub fn clear_errors(&mut self) {
        self.errors.clear();
    }

    pub fn scenario(&self) -> &str {
        &self.scenario
    }

    pub fn set_scenario(&mut self, scenario: impl Into<String>) -> &mut Self {
        self.scenario = scenario.into();
        self
    }

    // Relations

    /// Assign a relation slot directly. Does not touch the dirty set.
    pub fn set_related(&mut self, alias: &str, related: impl Into<Related>) -> Result<&mut Self> {
        self.meta.relation(alias)?;
        self.related.insert(alias.to_string(), related.into());
        Ok(self)
    }

    /// The cached relation, without loading it.
    pub fn cached_related(&self, alias: &str) -> Option<&Related> {
        self.related.get(alias)
    }

    pub fn is_loaded(&self, alias: &str) -> bool {
        self.related.contains_key(alias)
    }

    /// The related record(s), lazily loaded on first access.
    pub fn related(&mut self, alias: &str) -> Result<&Related> {
        self.related_with(alias, &[])
    }

    /// Like [`related`](Self::related), binding the relation filter's
    /// parameters if a load is needed.
    pub fn related_with(&mut self, alias: &str, filter_params: &[(String, Value)]) -> Result<&Related> {
        if !self.related.contains_key(alias) {
            let loaded = self.lazy_load(alias, filter_params)?;
            self.related.insert(alias.to_string(), loaded);
        }
        Ok(&self.related[alias])
    }

    #[tracing::instrument(level = "debug", skip(self, filter_params), fields(entity = %self.meta.name()))]
    fn lazy_load(&self, alias: &str, filter_params: &[(String, Value)]) -> Result<Related> {
        let relation = self.meta.relation(alias)?;

        let (column, key) = match relation.kind {
            RelationKind::BelongsTo => {
                let fk = self.value(&relation.foreign_key)?;
                if fk.is_blank() {
                    tracing::trace!("Blank foreign key, nothing to load");
                    return Ok(Related::Empty);
                }
                let target = self.session.entity(&relation.target)?;
                (target.primary_key().to_string(), fk)
            }
            RelationKind::HasOne | RelationKind::HasMany => {
                if self.is_new() {
                    tracing::trace!("Unsaved owner, nothing to load");
                    return Ok(Related::Empty);
                }
                (relation.foreign_key.clone(), self.pk())
            }
            kind @ RelationKind::ManyToMany => {
                return Err(Error::UnsupportedRelationKind {
                    entity: self.meta.name().to_string(),
                    alias: alias.to_string(),
                    kind,
                });
            }
        };

        let mut query = self.session.model(&relation.target)?;
        if let Some(template) = &relation.filter {
            let filter = render_filter(
                template,
                ROOT_ALIAS,
                alias,
                filter_params,
                self.session.executor(),
            )?;
            query.add_condition(&filter, Vec::<(String, Value)>::new(), None);
        }

        self.session.note_lazy_load(self.meta.name(), alias);
        let related = if relation.kind == RelationKind::HasMany {
            Related::Many(query.find_all_by(&column, key, None)?)
        } else {
            Related::from(query.find_by(&column, key, None)?)
        };
        tracing::debug!(found = !related.is_empty(), "Lazy load complete");
        Ok(related)
    }

    // Criteria

    pub fn criteria(&self) -> &Criteria {
        &self.criteria
    }

    pub fn criteria_mut(&mut self) -> &mut Criteria {
        &mut self.criteria
    }

    /// Deep-merge `delta` into this record's criteria.
    pub fn merge_criteria(&mut self, delta: Criteria) -> &mut Self {
        self.criteria.merge(delta);
        self
    }

    /// Back to selecting every row of the table.
    pub fn reset_criteria(&mut self) -> &mut Self {
        self.criteria =
            Criteria::reset(&self.session.executor().quote_identifier(self.meta.table_name()));
        self
    }

    /// Eagerly LEFT JOIN the relation `path` (dotted for nested relations).
    pub fn with(&mut self, path: &str) -> Result<&mut Self> {
        self.with_join(path, JoinType::Left, &[])
    }

    /// Eagerly join `path` with an explicit join type and filter parameters.
    pub fn with_join(
        &mut self,
        path: &str,
        join_type: JoinType,
        filter_params: &[(String, Value)],
    ) -> Result<&mut Self> {
        let delta = resolve_relation(
            self.session.registry(),
            &self.meta,
            path,
            join_type,
            filter_params,
            self.session.executor(),
        )?;
        self.criteria.merge(delta);
        Ok(self)
    }

    /// Append a WHERE fragment; see [`Criteria::add_condition`].
    pub fn add_condition<I, K>(&mut self, fragment: &str, params: I, name: Option<&str>) -> &mut Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        self.criteria.add_condition(fragment, params, name);
        self
    }

    pub fn remove_condition(&mut self, name: &str) -> &mut Self {
        self.criteria.remove_condition(name);
        self
    }

    pub fn order_by(&mut self, order: impl Into<String>) -> &mut Self {
        self.criteria.order_by(order);
        self
    }

    pub fn limit(&mut self, limit: u64, offset: u64) -> &mut Self {
        self.criteria.limit(limit, offset);
        self
    }

    pub(crate) fn unknown_property(&self, name: &str) -> Error {
        Error::UnknownProperty {
            entity: self.meta.name().to_string(),
            name: name.to_string(),
        }
    }
}

/// Plain JSON for a field value: numbers as numbers, text as strings.
///
/// `Value`'s own `Serialize` is externally tagged (`{"BigInt": 9}`) so that
/// values round-trip; `to_json` wants the untagged shape instead.
fn json_value(value: Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => b.into(),
        Value::Int(v) => v.into(),
        Value::BigInt(v) => v.into(),
        Value::Double(v) => serde_json::Number::from_f64(v).map_or(serde_json::Value::Null, Into::into),
        Value::Text(s) => s.into(),
        Value::Bytes(b) => b.into(),
        Value::Json(j) => j,
    }
}
