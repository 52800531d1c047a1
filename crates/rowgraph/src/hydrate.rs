//! Row hydration.
//!
//! Turns one flat result row into a record graph. Columns without a `:`
//! belong to the root; `path:field` columns belong to the bucket of relation
//! path `path`. Every bucket path is resolved against metadata before any
//! record is built, then buckets are attached shallowest first so that the
//! parent slot of a nested path already exists when its child arrives.
//!
//! Each row yields exactly one root. Rows fanned out by a join are not
//! collapsed, so a root with several matching HAS ONE rows comes back once
//! per row.

use crate::record::{Record, Related};
use crate::session::Session;
use rowgraph_core::{EntityMeta, Error, NAMESPACE_SEPARATOR, PATH_SEPARATOR, Result, Row, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// One relation path's columns, resolved against metadata.
struct Bucket<'r> {
    path: &'r str,
    depth: usize,
    /// Target entity of every hop, outermost first
    targets: Vec<Arc<EntityMeta>>,
    columns: Vec<(&'r str, &'r Value)>,
}

/// Hydrate every row of a result set.
pub(crate) fn hydrate_all(
    session: &Session,
    meta: &Arc<EntityMeta>,
    rows: &[Row],
) -> Result<Vec<Record>> {
    rows.iter()
        .map(|row| hydrate_row(session, meta, row))
        .collect()
}

/// Hydrate one row into a root record with its joined relations attached.
pub(crate) fn hydrate_row(session: &Session, meta: &Arc<EntityMeta>, row: &Row) -> Result<Record> {
    let mut root_columns = Vec::new();
    let mut buckets: Vec<Bucket<'_>> = Vec::new();

    for (column, value) in row.iter() {
        match column.split_once(NAMESPACE_SEPARATOR) {
            None => root_columns.push((column, value)),
            Some((path, field)) => match buckets.iter_mut().find(|b| b.path == path) {
                Some(bucket) => bucket.columns.push((field, value)),
                None => buckets.push(Bucket {
                    path,
                    depth: path.split(PATH_SEPARATOR).count(),
                    targets: resolve_targets(session, meta, path)?,
                    columns: vec![(field, value)],
                }),
            },
        }
    }

    // Stable: siblings keep column order.
    buckets.sort_by_key(|b| b.depth);

    let mut root = build(session, meta, &root_columns)?;
    for bucket in &buckets {
        let Some(target) = bucket.targets.last() else {
            continue;
        };
        let related = if bucket.columns.iter().all(|(_, v)| v.is_null()) {
            Related::Empty
        } else {
            Related::from(build(session, target, &bucket.columns)?)
        };
        let segments: Vec<&str> = bucket.path.split(PATH_SEPARATOR).collect();
        attach(session, &mut root, &segments, &bucket.targets, related);
    }

    tracing::trace!(
        entity = meta.name(),
        buckets = buckets.len(),
        "Hydrated row"
    );
    fire_after_load(&mut root)?;
    Ok(root)
}

/// Resolve a bucket path to the target entity of each hop.
///
/// Only single-row relation kinds can be demultiplexed from a flat row.
fn resolve_targets(
    session: &Session,
    meta: &EntityMeta,
    path: &str,
) -> Result<Vec<Arc<EntityMeta>>> {
    let registry = session.registry();
    let steps = registry.walk(meta, path)?;
    steps
        .iter()
        .map(|step| {
            if !step.relation.kind.is_joinable() {
                return Err(Error::UnsupportedRelationKind {
                    entity: step.source.name().to_string(),
                    alias: step.relation.alias.clone(),
                    kind: step.relation.kind,
                });
            }
            session.entity(step.target.name())
        })
        .collect()
}

/// Build an existing record from the declared fields among `columns`.
fn build(session: &Session, meta: &Arc<EntityMeta>, columns: &[(&str, &Value)]) -> Result<Record> {
    let mut data = HashMap::with_capacity(columns.len());
    for (name, value) in columns {
        if meta.field(name).is_ok() {
            data.insert((*name).to_string(), (*value).clone());
        } else {
            tracing::trace!(entity = meta.name(), column = name, "Ignored undeclared column");
        }
    }
    Ok(Record::loaded(session.clone(), Arc::clone(meta), data))
}

/// Place `related` at `segments` below `parent`, creating placeholder
/// records for intermediate hops that were not selected themselves.
///
/// A hop already loaded as empty is kept; anything below it is discarded.
fn attach(
    session: &Session,
    parent: &mut Record,
    segments: &[&str],
    targets: &[Arc<EntityMeta>],
    related: Related,
) {
    let (Some((head, rest)), Some((target, deeper))) = (segments.split_first(), targets.split_first())
    else {
        return;
    };

    if rest.is_empty() {
        parent.related.insert((*head).to_string(), related);
        return;
    }

    match parent.related.get_mut(*head) {
        Some(Related::One(child)) => {
            attach(session, child, rest, deeper, related);
            return;
        }
        // An unmatched parent stays unmatched; its children are dropped.
        Some(_) => {
            tracing::trace!(path = *head, "Dropped bucket below an empty relation");
            return;
        }
        None if related.is_empty() => return,
        None => {}
    }

    let mut placeholder = Record::loaded(session.clone(), Arc::clone(target), HashMap::new());
    attach(session, &mut placeholder, rest, deeper, related);
    parent.related.insert((*head).to_string(), Related::from(placeholder));
}

/// Run `after_load` on every hydrated record, children before parents.
fn fire_after_load(record: &mut Record) -> Result<()> {
    for related in record.related.values_mut() {
        if let Related::One(child) = related {
            fire_after_load(child)?;
        }
    }
    let hooks = record.session.hooks_for(record.meta.name());
    hooks.after_load(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowgraph_core::{FieldDef, Registry, RelationDef};
    use rowgraph_query::{Criteria, Executor, Quoter};

    struct Offline;

    impl Quoter for Offline {}

    impl Executor for Offline {
        fn query_one(&self, _: &Criteria) -> Result<Option<Row>> {
            Ok(None)
        }
        fn query_all(&self, _: &Criteria) -> Result<Vec<Row>> {
            Ok(Vec::new())
        }
        fn insert(&self, _: &str, _: &[(String, Value)]) -> Result<Value> {
            Ok(Value::Null)
        }
        fn update(&self, _: &str, _: &[(String, Value)], _: &str, _: &Value) -> Result<u64> {
            Ok(0)
        }
        fn delete(&self, _: &str, _: &str, _: &Value) -> Result<u64> {
            Ok(0)
        }
        fn delete_matching(&self, _: &Criteria) -> Result<u64> {
            Ok(0)
        }
    }

    fn session() -> Session {
        let registry = Registry::builder()
            .register(
                EntityMeta::builder("Post", "posts")
                    .fields(["Id", "Name", "AuthorId"])
                    .relation(RelationDef::belongs_to("author", "User", "AuthorId"))
                    .relation(RelationDef::has_many("comments", "Comment", "PostId")),
            )
            .register(
                EntityMeta::builder("User", "users")
                    .fields(["Id", "Name"])
                    .field(FieldDef::new("Role").default_value("member"))
                    .relation(RelationDef::has_one("profile", "Profile", "UserId")),
            )
            .register(EntityMeta::builder("Profile", "profiles").fields(["Id", "UserId", "Bio"]))
            .register(EntityMeta::builder("Comment", "comments").fields(["Id", "PostId"]))
            .build()
            .unwrap();
        Session::new(registry, Arc::new(Offline))
    }

    fn hydrate(pairs: Vec<(&str, Value)>) -> Result<Record> {
        let session = session();
        let meta = session.entity("Post").unwrap();
        hydrate_row(&session, &meta, &Row::from_pairs(pairs))
    }

    #[test]
    fn test_root_and_belongs_to_bucket() {
        let post = hydrate(vec![
            ("Id", Value::BigInt(1)),
            ("Name", Value::from("x")),
            ("author:Id", Value::BigInt(2)),
            ("author:Name", Value::from("y")),
        ])
        .unwrap();

        assert_eq!(post.value("Id").unwrap(), Value::BigInt(1));
        assert_eq!(post.value("Name").unwrap(), Value::from("x"));
        assert!(!post.is_dirty());
        assert!(!post.is_new());

        let author = post.cached_related("author").and_then(Related::as_one).unwrap();
        assert_eq!(author.value("Id").unwrap(), Value::BigInt(2));
        assert_eq!(author.value("Name").unwrap(), Value::from("y"));
        assert_eq!(author.value("Role").unwrap(), Value::from("member"));
        assert!(!author.is_dirty());
    }

    #[test]
    fn test_unmatched_join_hydrates_to_empty() {
        let post = hydrate(vec![
            ("Id", Value::BigInt(1)),
            ("author:Id", Value::Null),
            ("author:Name", Value::Null),
        ])
        .unwrap();

        assert!(post.is_loaded("author"));
        assert!(matches!(post.cached_related("author"), Some(Related::Empty)));
    }

    #[test]
    fn test_nested_bucket_gets_a_placeholder_parent() {
        let post = hydrate(vec![
            ("Id", Value::BigInt(1)),
            ("author.profile:Id", Value::BigInt(7)),
            ("author.profile:Bio", Value::from("hi")),
        ])
        .unwrap();

        let author = post.cached_related("author").and_then(Related::as_one).unwrap();
        assert!(author.is_new());
        let profile = author.cached_related("profile").and_then(Related::as_one).unwrap();
        assert_eq!(profile.value("Bio").unwrap(), Value::from("hi"));
    }

    #[test]
    fn test_nested_bucket_attaches_below_hydrated_parent_regardless_of_column_order() {
        let post = hydrate(vec![
            ("author.profile:Id", Value::BigInt(7)),
            ("Id", Value::BigInt(1)),
            ("author:Id", Value::BigInt(2)),
        ])
        .unwrap();

        let author = post.cached_related("author").and_then(Related::as_one).unwrap();
        assert_eq!(author.pk(), Value::BigInt(2));
        assert!(author.cached_related("profile").and_then(Related::as_one).is_some());
    }

    #[test]
    fn test_nested_bucket_below_an_empty_parent_is_dropped() {
        let post = hydrate(vec![
            ("Id", Value::BigInt(1)),
            ("author:Id", Value::Null),
            ("author:Name", Value::Null),
            ("author.profile:Id", Value::BigInt(7)),
            ("author.profile:Bio", Value::from("orphan")),
        ])
        .unwrap();

        assert!(matches!(post.cached_related("author"), Some(Related::Empty)));
    }

    #[test]
    fn test_undeclared_root_columns_are_ignored() {
        let post = hydrate(vec![("Id", Value::BigInt(1)), ("Extra", Value::BigInt(9))]).unwrap();
        assert!(post.value("Extra").is_err());
        assert_eq!(post.attributes().len(), 3);
    }

    #[test]
    fn test_unknown_and_collection_buckets_fail() {
        assert!(matches!(
            hydrate(vec![("Id", Value::BigInt(1)), ("editor:Id", Value::BigInt(2))]),
            Err(Error::UnknownRelation { .. })
        ));
        assert!(matches!(
            hydrate(vec![("Id", Value::BigInt(1)), ("comments:Id", Value::BigInt(2))]),
            Err(Error::UnsupportedRelationKind { .. })
        ));
    }

    #[test]
    fn test_every_row_yields_its_own_root() {
        let session = session();
        let meta = session.entity("Post").unwrap();
        let rows = vec![
            Row::from_pairs(vec![("Id", Value::BigInt(1)), ("author:Id", Value::BigInt(2))]),
            Row::from_pairs(vec![("Id", Value::BigInt(1)), ("author:Id", Value::BigInt(3))]),
        ];
        let posts = hydrate_all(&session, &meta, &rows).unwrap();
        assert_eq!(posts.len(), 2);
        assert_eq!(posts[0].pk(), posts[1].pk());
    }
}
