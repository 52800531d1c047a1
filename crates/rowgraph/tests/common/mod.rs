//! Shared fixtures for rowgraph integration tests.

#![allow(dead_code)]

use rowgraph::prelude::*;
use rowgraph::{ProfileSink, QueryProfile};
use std::collections::VecDeque;
use std::sync::Mutex;

/// One call received by [`MockExecutor`].
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    QueryOne(Criteria),
    QueryAll(Criteria),
    Insert {
        table: String,
        values: Vec<(String, Value)>,
    },
    Update {
        table: String,
        values: Vec<(String, Value)>,
        key_column: String,
        key: Value,
    },
    Delete {
        table: String,
        key_column: String,
        key: Value,
    },
    DeleteMatching(Criteria),
}

impl Call {
    pub fn is_write(&self) -> bool {
        matches!(self, Call::Insert { .. } | Call::Update { .. })
    }

    pub fn criteria(&self) -> Option<&Criteria> {
        match self {
            Call::QueryOne(c) | Call::QueryAll(c) | Call::DeleteMatching(c) => Some(c),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct MockState {
    calls: Vec<Call>,
    /// Scripted result sets, consumed one per query
    results: VecDeque<Vec<Row>>,
    next_key: Value,
    affected: u64,
}

/// An executor that records every call and answers from a script.
#[derive(Debug)]
pub struct MockExecutor {
    state: Mutex<MockState>,
}

impl MockExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(MockState {
                calls: Vec::new(),
                results: VecDeque::new(),
                next_key: Value::BigInt(1),
                affected: 1,
            }),
        })
    }

    /// Queue the rows answered by the next query.
    pub fn push_rows(&self, rows: Vec<Row>) {
        self.state.lock().unwrap().results.push_back(rows);
    }

    pub fn set_next_key(&self, key: impl Into<Value>) {
        self.state.lock().unwrap().next_key = key.into();
    }

    /// Rows reported by update, delete and delete-matching calls.
    pub fn set_affected(&self, affected: u64) {
        self.state.lock().unwrap().affected = affected;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    pub fn writes(&self) -> usize {
        self.calls().iter().filter(|c| c.is_write()).count()
    }

    fn record(&self, call: Call) -> std::sync::MutexGuard<'_, MockState> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        state
    }
}

impl Quoter for MockExecutor {}

impl Executor for MockExecutor {
    fn query_one(&self, criteria: &Criteria) -> Result<Option<Row>> {
        let mut state = self.record(Call::QueryOne(criteria.clone()));
        Ok(state
            .results
            .pop_front()
            .and_then(|rows| rows.into_iter().next()))
    }

    fn query_all(&self, criteria: &Criteria) -> Result<Vec<Row>> {
        let mut state = self.record(Call::QueryAll(criteria.clone()));
        Ok(state.results.pop_front().unwrap_or_default())
    }

    fn insert(&self, table: &str, values: &[(String, Value)]) -> Result<Value> {
        let state = self.record(Call::Insert {
            table: table.to_string(),
            values: values.to_vec(),
        });
        Ok(state.next_key.clone())
    }

    fn update(
        &self,
        table: &str,
        values: &[(String, Value)],
        key_column: &str,
        key: &Value,
    ) -> Result<u64> {
        let state = self.record(Call::Update {
            table: table.to_string(),
            values: values.to_vec(),
            key_column: key_column.to_string(),
            key: key.clone(),
        });
        Ok(state.affected)
    }

    fn delete(&self, table: &str, key_column: &str, key: &Value) -> Result<u64> {
        let state = self.record(Call::Delete {
            table: table.to_string(),
            key_column: key_column.to_string(),
            key: key.clone(),
        });
        Ok(state.affected)
    }

    fn delete_matching(&self, criteria: &Criteria) -> Result<u64> {
        let state = self.record(Call::DeleteMatching(criteria.clone()));
        Ok(state.affected)
    }
}

/// Hooks that log every callback and reject blank titles.
#[derive(Debug, Default, Clone)]
pub struct RecordingHooks {
    pub events: Arc<Mutex<Vec<String>>>,
}

impl RecordingHooks {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn log(&self, event: &str) {
        self.events.lock().unwrap().push(event.to_string());
    }
}

impl Lifecycle for RecordingHooks {
    fn before_save(&self, _: &mut Record) -> Result<()> {
        self.log("before_save");
        Ok(())
    }

    fn validate(&self, record: &mut Record) -> Result<()> {
        self.log("validate");
        if record.scenario() != "draft" && record.value("Title")?.is_blank() {
            record.add_error("Title", "Title cannot be blank");
        }
        Ok(())
    }

    fn after_create(&self, _: &mut Record) -> Result<()> {
        self.log("after_create");
        Ok(())
    }

    fn after_update(&self, _: &mut Record) -> Result<()> {
        self.log("after_update");
        Ok(())
    }

    fn after_save(&self, _: &mut Record) -> Result<()> {
        self.log("after_save");
        Ok(())
    }

    fn before_delete(&self, _: &mut Record) -> Result<()> {
        self.log("before_delete");
        Ok(())
    }

    fn after_delete(&self, _: &mut Record) -> Result<()> {
        self.log("after_delete");
        Ok(())
    }

    fn after_load(&self, _: &mut Record) -> Result<()> {
        self.log("after_load");
        Ok(())
    }
}

/// Collects profiles in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub profiles: Mutex<Vec<QueryProfile>>,
}

impl ProfileSink for MemorySink {
    fn record(&self, profile: &QueryProfile) -> Result<()> {
        self.profiles.lock().unwrap().push(profile.clone());
        Ok(())
    }
}

/// A sink that always fails.
#[derive(Debug, Default)]
pub struct BrokenSink;

impl ProfileSink for BrokenSink {
    fn record(&self, _: &QueryProfile) -> Result<()> {
        Err(Error::Custom("sink offline".to_string()))
    }
}

fn trim(value: Value) -> Value {
    match value {
        Value::Text(s) => Value::Text(s.trim().to_string()),
        other => other,
    }
}

/// Posts, users, profiles, images, comments and tags.
pub fn blog_registry() -> Arc<Registry> {
    Registry::builder()
        .register(
            EntityMeta::builder("Post", "posts")
                .field(FieldDef::new("Id"))
                .field(FieldDef::new("Title").safe().filter(trim))
                .field(FieldDef::new("AuthorId").safe())
                .field(FieldDef::new("Status").default_value("draft"))
                .relation(RelationDef::belongs_to("author", "User", "AuthorId"))
                .relation(
                    RelationDef::has_one("cover", "Image", "PostId")
                        .filter("{alias}.Kind = 'cover'"),
                )
                .relation(
                    RelationDef::has_one("banner", "Image", "PostId")
                        .filter("{alias}.Kind = {kind}"),
                )
                .relation(RelationDef::has_many("comments", "Comment", "PostId"))
                .relation(RelationDef::many_to_many("tags", "Tag", "PostId")),
        )
        .register(
            EntityMeta::builder("User", "users")
                .fields(["Id", "Name", "Email"])
                .relation(RelationDef::has_one("profile", "Profile", "UserId")),
        )
        .register(EntityMeta::builder("Profile", "profiles").fields(["Id", "UserId", "Bio"]))
        .register(EntityMeta::builder("Image", "images").fields(["Id", "PostId", "Kind"]))
        .register(EntityMeta::builder("Comment", "comments").fields(["Id", "PostId", "Body"]))
        .register(EntityMeta::builder("Tag", "tags").fields(["Id", "Name"]))
        .build()
        .unwrap()
}

/// A session over the blog registry with recording hooks on `Post`.
pub fn blog_session() -> (Session, Arc<MockExecutor>, RecordingHooks) {
    let executor = MockExecutor::new();
    let hooks = RecordingHooks::default();
    let session = Session::builder(blog_registry(), executor.clone())
        .hooks("Post", hooks.clone())
        .build()
        .unwrap();
    (session, executor, hooks)
}

pub fn row(pairs: Vec<(&str, Value)>) -> Row {
    Row::from_pairs(pairs)
}

/// A loaded post row: `Id`, `Title`, `AuthorId`.
pub fn post_row(id: i64, title: &str, author_id: i64) -> Row {
    row(vec![
        ("Id", Value::BigInt(id)),
        ("Title", Value::from(title)),
        ("AuthorId", Value::BigInt(author_id)),
    ])
}
