//! The session: registry, executor, hooks and profiling in one handle.
//!
//! A [`Session`] is cheap to clone; every [`Record`] carries one so it can
//! lazily load relations and persist itself. All executor traffic goes
//! through the session so it can be profiled in one place.

use crate::config::SessionConfig;
use crate::hooks::{Lifecycle, NoHooks};
use crate::profile::{FileSink, ProfileSink, QueryProfile, TracingSink};
use crate::record::Record;
use rowgraph_core::{EntityMeta, Error, Registry, Result, Row, Value};
use rowgraph_query::{Criteria, Executor, Quoter};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

/// Shared handle to everything a record needs at runtime.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    registry: Arc<Registry>,
    executor: Arc<dyn Executor>,
    profiler: Option<Arc<dyn ProfileSink>>,
    config: SessionConfig,
    hooks: HashMap<String, Arc<dyn Lifecycle>>,
    no_hooks: Arc<dyn Lifecycle>,
    lazy_loads: Mutex<LazyLoadTracker>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("entities", &self.inner.registry.len())
            .field("hooks", &self.inner.hooks.len())
            .field("profiling", &self.inner.profiler.is_some())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// A session with default configuration and no hooks.
    pub fn new(registry: Arc<Registry>, executor: Arc<dyn Executor>) -> Self {
        Self::from_parts(
            registry,
            executor,
            SessionConfig::default(),
            None,
            HashMap::new(),
        )
    }

    pub fn builder(registry: Arc<Registry>, executor: Arc<dyn Executor>) -> SessionBuilder {
        SessionBuilder {
            registry,
            executor,
            config: SessionConfig::default(),
            profiler: None,
            hooks: Vec::new(),
        }
    }

    fn from_parts(
        registry: Arc<Registry>,
        executor: Arc<dyn Executor>,
        config: SessionConfig,
        profiler: Option<Arc<dyn ProfileSink>>,
        hooks: HashMap<String, Arc<dyn Lifecycle>>,
    ) -> Self {
        let tracker = LazyLoadTracker::new(config.lazy_load_warn_threshold);
        Self {
            inner: Arc::new(SessionInner {
                registry,
                executor,
                profiler,
                config,
                hooks,
                no_hooks: Arc::new(NoHooks),
                lazy_loads: Mutex::new(tracker),
            }),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.inner.registry
    }

    pub fn executor(&self) -> &dyn Executor {
        self.inner.executor.as_ref()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Look up registered entity metadata.
    pub fn entity(&self, name: &str) -> Result<Arc<EntityMeta>> {
        self.inner.registry.entity(name).cloned()
    }

    /// A new, empty record of `entity` with fresh criteria.
    ///
    /// The record doubles as the query object for its entity type:
    /// configure its criteria, then call one of the finders.
    pub fn model(&self, entity: &str) -> Result<Record> {
        let meta = self.entity(entity)?;
        Ok(Record::new(self.clone(), meta))
    }

    pub(crate) fn hooks_for(&self, entity: &str) -> Arc<dyn Lifecycle> {
        self.inner
            .hooks
            .get(entity)
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.inner.no_hooks))
    }

    /// Number of lazy loads of `relation` on `entity` since the last reset.
    pub fn lazy_load_count(&self, entity: &str, relation: &str) -> usize {
        self.tracker().count_for(entity, relation)
    }

    /// Forget lazy load counts, e.g. at the start of a request.
    pub fn reset_lazy_load_counts(&self) {
        self.tracker().reset();
    }

    pub(crate) fn note_lazy_load(&self, entity: &str, relation: &str) {
        self.tracker().record_load(entity, relation);
    }

    fn tracker(&self) -> std::sync::MutexGuard<'_, LazyLoadTracker> {
        self.inner
            .lazy_loads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    // Executor calls

    pub(crate) fn query_one(&self, criteria: &Criteria, context: &str) -> Result<Option<Row>> {
        self.profiled(context, || criteria.to_sql(), |ex| ex.query_one(criteria))
    }

    pub(crate) fn query_all(&self, criteria: &Criteria, context: &str) -> Result<Vec<Row>> {
        self.profiled(context, || criteria.to_sql(), |ex| ex.query_all(criteria))
    }

    pub(crate) fn insert(
        &self,
        table: &str,
        values: &[(String, Value)],
        context: &str,
    ) -> Result<Value> {
        self.profiled(
            context,
            || {
                let columns: Vec<_> = values.iter().map(|(c, _)| self.quote_ident(c)).collect();
                format!(
                    "INSERT INTO {} ({}) VALUES ({})",
                    self.quote_ident(table),
                    columns.join(", "),
                    vec!["?"; columns.len()].join(", ")
                )
            },
            |ex| ex.insert(table, values),
        )
    }

    pub(crate) fn update(
        &self,
        table: &str,
        values: &[(String, Value)],
        key_column: &str,
        key: &Value,
        context: &str,
    ) -> Result<u64> {
        self.profiled(
            context,
            || {
                let sets: Vec<_> = values
                    .iter()
                    .map(|(c, _)| format!("{} = ?", self.quote_ident(c)))
                    .collect();
                format!(
                    "UPDATE {} SET {} WHERE {} = ?",
                    self.quote_ident(table),
                    sets.join(", "),
                    self.quote_ident(key_column)
                )
            },
            |ex| ex.update(table, values, key_column, key),
        )
    }

    pub(crate) fn delete(
        &self,
        table: &str,
        key_column: &str,
        key: &Value,
        context: &str,
    ) -> Result<u64> {
        self.profiled(
            context,
            || {
                format!(
                    "DELETE FROM {} WHERE {} = ?",
                    self.quote_ident(table),
                    self.quote_ident(key_column)
                )
            },
            |ex| ex.delete(table, key_column, key),
        )
    }

    pub(crate) fn delete_matching(&self, criteria: &Criteria, context: &str) -> Result<u64> {
        self.profiled(
            context,
            || criteria.to_delete_sql(),
            |ex| ex.delete_matching(criteria),
        )
    }

    fn quote_ident(&self, name: &str) -> String {
        self.inner.executor.quote_identifier(name)
    }

    /// Run one executor call, timing and reporting it when profiling is on.
    fn profiled<T>(
        &self,
        context: &str,
        sql: impl FnOnce() -> String,
        call: impl FnOnce(&dyn Executor) -> Result<T>,
    ) -> Result<T> {
        let executor = self.inner.executor.as_ref();
        let Some(profiler) = &self.inner.profiler else {
            tracing::debug!(context, "Executor call");
            return call(executor);
        };

        let sql = sql();
        tracing::debug!(context, sql = %sql, "Executor call");
        let started = Instant::now();
        let result = call(executor);
        let profile = QueryProfile {
            elapsed: started.elapsed(),
            sql,
            context: context.to_string(),
        };
        if let Err(e) = profiler.record(&profile) {
            tracing::warn!(error = %e, context, "Profiling sink failed");
        }
        result
    }
}

/// Builder for [`Session`].
pub struct SessionBuilder {
    registry: Arc<Registry>,
    executor: Arc<dyn Executor>,
    config: SessionConfig,
    profiler: Option<Arc<dyn ProfileSink>>,
    hooks: Vec<(String, Arc<dyn Lifecycle>)>,
}

impl SessionBuilder {
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Report profiles to `sink`. Enables profiling regardless of the config.
    pub fn profiler(mut self, sink: Arc<dyn ProfileSink>) -> Self {
        self.profiler = Some(sink);
        self
    }

    /// Register lifecycle hooks for one entity type.
    pub fn hooks(mut self, entity: impl Into<String>, hooks: impl Lifecycle + 'static) -> Self {
        self.hooks.push((entity.into(), Arc::new(hooks)));
        self
    }

    /// Check hook registrations against the registry and build the session.
    pub fn build(self) -> Result<Session> {
        let mut hooks = HashMap::with_capacity(self.hooks.len());
        for (entity, h) in self.hooks {
            if !self.registry.contains(&entity) {
                return Err(Error::UnknownEntity(entity));
            }
            hooks.insert(entity, h);
        }

        let profiler = match (self.profiler, &self.config) {
            (Some(sink), _) => Some(sink),
            (None, config) if config.profiling => Some(match &config.profile_log {
                Some(path) => Arc::new(FileSink::new(path)) as Arc<dyn ProfileSink>,
                None => Arc::new(TracingSink),
            }),
            (None, _) => None,
        };

        tracing::debug!(
            entities = self.registry.len(),
            hooks = hooks.len(),
            profiling = profiler.is_some(),
            "Session built"
        );
        Ok(Session::from_parts(
            self.registry,
            self.executor,
            self.config,
            profiler,
            hooks,
        ))
    }
}

/// Counts lazy loads per (entity, relation) and warns about N+1 patterns.
#[derive(Debug)]
struct LazyLoadTracker {
    counts: HashMap<(String, String), usize>,
    threshold: usize,
}

impl LazyLoadTracker {
    fn new(threshold: usize) -> Self {
        Self {
            counts: HashMap::new(),
            threshold,
        }
    }

    fn record_load(&mut self, entity: &str, relation: &str) {
        let count = self
            .counts
            .entry((entity.to_string(), relation.to_string()))
            .or_insert(0);
        *count += 1;

        if self.threshold > 0 && *count == self.threshold {
            tracing::warn!(
                target: "rowgraph::n1",
                entity,
                relation,
                loads = *count,
                threshold = self.threshold,
                "Repeated lazy loads of one relation; consider joining it with `with`"
            );
        }
    }

    fn count_for(&self, entity: &str, relation: &str) -> usize {
        self.counts
            .get(&(entity.to_string(), relation.to_string()))
            .copied()
            .unwrap_or(0)
    }

    fn reset(&mut self) {
        self.counts.clear();
    }
}
