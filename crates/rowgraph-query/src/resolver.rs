//! Relation path resolution.
//!
//! Turns a dotted relation path such as `author.profile` into one aliased
//! join per hop plus the namespaced select columns the hydrator needs to
//! split each row back into entities.
//!
//! Table aliases are the path prefix of each hop (`author`,
//! `author.profile`), so the same relation name at different depths never
//! collides. Joins are produced outer to inner, so every ON clause only
//! references `t` or an alias joined before it.

use crate::criteria::Criteria;
use crate::executor::Quoter;
use crate::join::{Join, JoinType};
use regex::{Captures, Regex};
use rowgraph_core::{
    EntityMeta, Error, NAMESPACE_SEPARATOR, PathStep, Registry, RelationKind, Result, Value,
};
use std::sync::OnceLock;

/// Token in a filter template standing for the relation's own table alias.
const ALIAS_TOKEN: &str = "alias";

fn filter_token() -> &'static Regex {
    static TOKEN: OnceLock<Regex> = OnceLock::new();
    TOKEN.get_or_init(|| {
        Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("filter token pattern is valid")
    })
}

/// Resolve `path` against `root` into criteria holding the joins and
/// namespaced columns for every hop.
///
/// The result is a merge delta; nothing is fetched.
pub fn resolve_relation<Q: Quoter + ?Sized>(
    registry: &Registry,
    root: &EntityMeta,
    path: &str,
    join_type: JoinType,
    filter_params: &[(String, Value)],
    quoter: &Q,
) -> Result<Criteria> {
    let steps = registry.walk(root, path)?;
    let mut delta = Criteria::new();

    for step in &steps {
        let join = step_join(step, join_type, filter_params, quoter)?;
        tracing::debug!(
            path = %step.alias,
            relation = %step.relation.kind,
            join = %join.to_sql(),
            "Resolved relation join"
        );
        delta = delta.with_join(step.alias.clone(), join);

        let table_alias = quoter.quote_identifier(&step.alias);
        for field in step.target.fields() {
            delta = delta.with_select(format!(
                "{}.{} AS \"{}{}{}\"",
                table_alias,
                quoter.quote_identifier(&field.name),
                step.alias,
                NAMESPACE_SEPARATOR,
                field.name
            ));
        }
    }

    Ok(delta)
}

fn step_join<Q: Quoter + ?Sized>(
    step: &PathStep<'_>,
    join_type: JoinType,
    filter_params: &[(String, Value)],
    quoter: &Q,
) -> Result<Join> {
    let source = quoter.quote_identifier(&step.source_alias);
    let target = quoter.quote_identifier(&step.alias);
    let fk = quoter.quote_identifier(&step.relation.foreign_key);

    let on = match step.relation.kind {
        RelationKind::HasOne => format!(
            "{}.{} = {}.{}",
            target,
            fk,
            source,
            quoter.quote_identifier(step.source.primary_key())
        ),
        RelationKind::BelongsTo => format!(
            "{}.{} = {}.{}",
            source,
            fk,
            target,
            quoter.quote_identifier(step.target.primary_key())
        ),
        kind @ (RelationKind::HasMany | RelationKind::ManyToMany) => {
            return Err(Error::UnsupportedRelationKind {
                entity: step.source.name().to_string(),
                alias: step.relation.alias.clone(),
                kind,
            });
        }
    };

    let mut join = Join::new(
        join_type,
        quoter.quote_identifier(step.target.table_name()),
        target.clone(),
        on,
    );
    if let Some(template) = &step.relation.filter {
        let filter = render_filter(template, &target, &step.alias, filter_params, quoter)?;
        join = join.and_on(&filter);
    }
    Ok(join)
}

/// Substitute the tokens of a relation filter template.
///
/// `{alias}` becomes `table_alias` (already rendered); every other `{name}`
/// becomes the quoted literal of the caller-supplied parameter `name`.
/// `relation_path` only labels the error for a missing parameter.
pub fn render_filter<Q: Quoter + ?Sized>(
    template: &str,
    table_alias: &str,
    relation_path: &str,
    params: &[(String, Value)],
    quoter: &Q,
) -> Result<String> {
    let mut missing = None;
    let rendered = filter_token().replace_all(template, |caps: &Captures<'_>| {
        let name = &caps[1];
        if name == ALIAS_TOKEN {
            return table_alias.to_string();
        }
        match params.iter().find(|(k, _)| k == name) {
            Some((_, value)) => quoter.quote(value),
            None => {
                missing.get_or_insert_with(|| name.to_string());
                String::new()
            }
        }
    });

    match missing {
        Some(parameter) => Err(Error::MissingFilterParameter {
            alias: relation_path.to_string(),
            parameter,
        }),
        None => Ok(rendered.into_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowgraph_core::{FieldDef, RelationDef};
    use std::sync::Arc;

    struct Plain;
    impl Quoter for Plain {}

    fn registry() -> Arc<Registry> {
        Registry::builder()
            .register(
                EntityMeta::builder("Post", "posts")
                    .fields(["Id", "Title", "AuthorId"])
                    .relation(RelationDef::belongs_to("author", "User", "AuthorId"))
                    .relation(RelationDef::has_many("comments", "Comment", "PostId"))
                    .relation(
                        RelationDef::has_one("cover", "Image", "PostId")
                            .filter("{alias}.Kind = {kind}"),
                    ),
            )
            .register(
                EntityMeta::builder("User", "users")
                    .fields(["Id", "Name"])
                    .relation(RelationDef::has_one("profile", "Profile", "UserId")),
            )
            .register(
                EntityMeta::builder("Profile", "profiles")
                    .fields(["Id", "UserId"])
                    .field(FieldDef::new("Bio"))
                    .relation(RelationDef::belongs_to("avatar", "Image", "AvatarId")),
            )
            .register(EntityMeta::builder("Image", "images").fields(["Id", "PostId", "Kind"]))
            .register(EntityMeta::builder("Comment", "comments").fields(["Id", "PostId"]))
            .build()
            .unwrap()
    }

    fn resolve(path: &str, params: &[(String, Value)]) -> Result<Criteria> {
        let registry = registry();
        let post = registry.entity("Post").unwrap().clone();
        resolve_relation(&registry, &post, path, JoinType::Left, params, &Plain)
    }

    #[test]
    fn test_belongs_to_join_and_namespaced_columns() {
        let delta = resolve("author", &[]).unwrap();
        let joins: Vec<_> = delta.joins().collect();

        assert_eq!(joins.len(), 1);
        assert_eq!(joins[0].0, "author");
        assert_eq!(
            joins[0].1.to_sql(),
            "LEFT JOIN users AS author ON t.AuthorId = author.Id"
        );
        assert_eq!(
            delta.select(),
            [r#"author.Id AS "author:Id""#, r#"author.Name AS "author:Name""#]
        );
    }

    #[test]
    fn test_every_hop_of_a_chain_is_joined_in_dependency_order() {
        let delta = resolve("author.profile.avatar", &[]).unwrap();
        let joins: Vec<_> = delta.joins().collect();
        assert_eq!(joins.len(), 3);

        let keys: Vec<_> = joins.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, vec!["author", "author.profile", "author.profile.avatar"]);

        assert_eq!(
            joins[1].1.on,
            "`author.profile`.UserId = author.Id",
            "HAS ONE puts the foreign key on the target"
        );
        assert_eq!(
            joins[2].1.on,
            "`author.profile`.AvatarId = `author.profile.avatar`.Id"
        );

        // Each ON clause only references t or an alias joined earlier.
        let mut known = vec!["t".to_string()];
        for (_, join) in &joins {
            known.push(join.alias.clone());
            for side in join.on.split(" = ") {
                let alias = side.rsplit_once('.').unwrap().0;
                assert!(known.iter().any(|k| k == alias), "{alias} not yet joined");
            }
        }

        assert!(delta
            .select()
            .iter()
            .any(|c| c == r#"`author.profile.avatar`.Kind AS "author.profile.avatar:Kind""#));
    }

    #[test]
    fn test_filter_is_appended_to_on_with_quoted_params() {
        let params = vec![("kind".to_string(), Value::from("cov'er"))];
        let delta = resolve("cover", &params).unwrap();
        assert_eq!(
            delta.join("cover").unwrap().on,
            "cover.PostId = t.Id AND (cover.Kind = 'cov''er')"
        );
        assert!(delta.conditions().is_empty());
    }

    #[test]
    fn test_missing_filter_parameter_is_reported() {
        let err = resolve("cover", &[]).unwrap_err();
        assert!(matches!(
            err,
            Error::MissingFilterParameter { ref alias, ref parameter }
                if alias == "cover" && parameter == "kind"
        ));
    }

    #[test]
    fn test_collection_relations_have_no_join_strategy() {
        let err = resolve("comments", &[]).unwrap_err();
        assert!(matches!(
            err,
            Error::UnsupportedRelationKind { kind: RelationKind::HasMany, .. }
        ));
    }

    #[test]
    fn test_unknown_segment_fails() {
        assert!(matches!(
            resolve("author.nope", &[]),
            Err(Error::UnknownRelation { .. })
        ));
    }

    #[test]
    fn test_merging_a_longer_path_keeps_existing_joins() {
        let mut criteria = Criteria::reset("posts");
        criteria.merge(resolve("author", &[]).unwrap());
        criteria.merge(resolve("author.profile", &[]).unwrap());

        assert_eq!(criteria.joins().count(), 2);
        let author_cols = criteria
            .select()
            .iter()
            .filter(|c| c.ends_with("\"author:Id\""))
            .count();
        assert_eq!(author_cols, 1);
    }
}
