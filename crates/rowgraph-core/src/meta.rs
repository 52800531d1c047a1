//! Entity metadata: fields, relations and the registry that owns them.
//!
//! Metadata is declared once per entity type through builders, validated by
//! [`RegistryBuilder::build`], and then shared immutably as `Arc<Registry>`.
//! Nothing in here is mutated after registration, so any number of records
//! on any number of threads can read it without synchronization.

use crate::error::{Error, RegistryError, RegistryErrorKind, Result};
use crate::value::Value;
use crate::{NAMESPACE_SEPARATOR, PATH_SEPARATOR, ROOT_ALIAS};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Pre-processing applied to a value before it is written into a field.
pub type FieldFilter = fn(Value) -> Value;

/// Declaration of a single column-backed field.
#[derive(Debug, Clone)]
pub struct FieldDef {
    /// Field (and column) name
    pub name: String,
    /// Value returned for the field while it is unset
    pub default: Value,
    /// Whether mass assignment may write this field
    pub safe: bool,
    /// Optional transformation run on every filtered write
    pub filter: Option<FieldFilter>,
}

impl FieldDef {
    /// Declare a field with a NULL default.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default: Value::Null,
            safe: false,
            filter: None,
        }
    }

    /// Set the default value.
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = value.into();
        self
    }

    /// Allow mass assignment of this field.
    pub fn safe(mut self) -> Self {
        self.safe = true;
        self
    }

    /// Install a pre-processing filter.
    pub fn filter(mut self, filter: FieldFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Run the filter, if any, over `value`.
    pub fn apply_filter(&self, value: Value) -> Value {
        match self.filter {
            Some(filter) => filter(value),
            None => value,
        }
    }
}

/// The kind of a relation, i.e. which side of the pair holds the foreign key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    /// The target row carries `foreign_key`, pointing at our primary key.
    HasOne,
    /// We carry `foreign_key`, pointing at the target's primary key.
    BelongsTo,
    /// Like `HasOne`, but loaded as a collection. Lazy loading only.
    HasMany,
    /// Link-table relation. Declarable, but neither joinable nor loadable.
    ManyToMany,
}

impl RelationKind {
    /// The keyword used for this kind in diagnostics.
    pub const fn as_str(&self) -> &'static str {
        match self {
            RelationKind::HasOne => "HAS ONE",
            RelationKind::BelongsTo => "BELONGS TO",
            RelationKind::HasMany => "HAS MANY",
            RelationKind::ManyToMany => "MANY MANY",
        }
    }

    /// Whether the relation resolver has a join strategy for this kind.
    pub const fn is_joinable(&self) -> bool {
        matches!(self, RelationKind::HasOne | RelationKind::BelongsTo)
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declaration of a relation from one entity to another.
#[derive(Debug, Clone)]
pub struct RelationDef {
    /// Caller-chosen name of the relation, unique per entity
    pub alias: String,
    /// Registered name of the related entity
    pub target: String,
    pub kind: RelationKind,
    /// Foreign key column; which table holds it depends on `kind`
    pub foreign_key: String,
    /// Extra join condition template (`{alias}` and `{param}` tokens)
    pub filter: Option<String>,
}

impl RelationDef {
    fn new(
        alias: impl Into<String>,
        target: impl Into<String>,
        kind: RelationKind,
        foreign_key: impl Into<String>,
    ) -> Self {
        Self {
            alias: alias.into(),
            target: target.into(),
            kind,
            foreign_key: foreign_key.into(),
            filter: None,
        }
    }

    /// `target.foreign_key = self.primary_key`, a single related row.
    pub fn has_one(
        alias: impl Into<String>,
        target: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        Self::new(alias, target, RelationKind::HasOne, foreign_key)
    }

    /// `self.foreign_key = target.primary_key`.
    pub fn belongs_to(
        alias: impl Into<String>,
        target: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        Self::new(alias, target, RelationKind::BelongsTo, foreign_key)
    }

    /// `target.foreign_key = self.primary_key`, every related row.
    pub fn has_many(
        alias: impl Into<String>,
        target: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        Self::new(alias, target, RelationKind::HasMany, foreign_key)
    }

    pub fn many_to_many(
        alias: impl Into<String>,
        target: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        Self::new(alias, target, RelationKind::ManyToMany, foreign_key)
    }

    /// Attach a filter template, appended to the join condition.
    pub fn filter(mut self, template: impl Into<String>) -> Self {
        self.filter = Some(template.into());
        self
    }
}

/// What a property name refers to on an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Property {
    /// Index into [`EntityMeta::fields`]
    Field(usize),
    /// Index into [`EntityMeta::relations`]
    Relation(usize),
}

/// Static description of one entity type.
#[derive(Debug, Clone)]
pub struct EntityMeta {
    name: String,
    table_name: String,
    primary_key: String,
    fields: Vec<FieldDef>,
    relations: Vec<RelationDef>,
    properties: HashMap<String, Property>,
}

impl EntityMeta {
    /// Start declaring an entity stored in `table_name`.
    pub fn builder(name: impl Into<String>, table_name: impl Into<String>) -> EntityMetaBuilder {
        EntityMetaBuilder {
            name: name.into(),
            table_name: table_name.into(),
            primary_key: "Id".to_string(),
            fields: Vec::new(),
            relations: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    /// Fields in declaration order.
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn relations(&self) -> &[RelationDef] {
        &self.relations
    }

    /// Resolve a property name through the lookup table built at registration.
    pub fn property(&self, name: &str) -> Option<Property> {
        self.properties.get(name).copied()
    }

    /// Look up a field by name.
    pub fn field(&self, name: &str) -> Result<&FieldDef> {
        match self.property(name) {
            Some(Property::Field(i)) => Ok(&self.fields[i]),
            _ => Err(Error::unknown_property(&self.name, name)),
        }
    }

    /// Look up a relation by alias.
    pub fn relation(&self, alias: &str) -> Result<&RelationDef> {
        match self.property(alias) {
            Some(Property::Relation(i)) => Ok(&self.relations[i]),
            _ => Err(Error::unknown_relation(&self.name, alias)),
        }
    }

    /// The declared default of a field.
    pub fn default_of(&self, field: &str) -> Result<&Value> {
        self.field(field).map(|f| &f.default)
    }
}

/// Builder for [`EntityMeta`].
#[derive(Debug)]
pub struct EntityMetaBuilder {
    name: String,
    table_name: String,
    primary_key: String,
    fields: Vec<FieldDef>,
    relations: Vec<RelationDef>,
}

impl EntityMetaBuilder {
    /// Override the primary key column (default `"Id"`).
    pub fn primary_key(mut self, name: impl Into<String>) -> Self {
        self.primary_key = name.into();
        self
    }

    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    /// Declare several plain fields at once.
    pub fn fields<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields.extend(names.into_iter().map(FieldDef::new));
        self
    }

    pub fn relation(mut self, relation: RelationDef) -> Self {
        self.relations.push(relation);
        self
    }

    /// Validate local invariants and build the property lookup table.
    pub fn build(self) -> Result<EntityMeta> {
        let mut properties = HashMap::with_capacity(self.fields.len() + self.relations.len());

        for (i, field) in self.fields.iter().enumerate() {
            if properties
                .insert(field.name.clone(), Property::Field(i))
                .is_some()
            {
                return Err(registry_error(
                    RegistryErrorKind::DuplicateProperty,
                    &self.name,
                    format!("field '{}' is declared twice", field.name),
                ));
            }
        }

        for (i, relation) in self.relations.iter().enumerate() {
            if !is_valid_alias(&relation.alias) {
                return Err(registry_error(
                    RegistryErrorKind::InvalidAlias,
                    &self.name,
                    format!(
                        "relation alias '{}' must be non-empty, differ from '{}' and contain neither '{}' nor '{}'",
                        relation.alias, ROOT_ALIAS, PATH_SEPARATOR, NAMESPACE_SEPARATOR
                    ),
                ));
            }
            if properties
                .insert(relation.alias.clone(), Property::Relation(i))
                .is_some()
            {
                return Err(registry_error(
                    RegistryErrorKind::DuplicateProperty,
                    &self.name,
                    format!("relation '{}' collides with another property", relation.alias),
                ));
            }
        }

        if !matches!(properties.get(&self.primary_key), Some(Property::Field(_))) {
            return Err(registry_error(
                RegistryErrorKind::MissingPrimaryKey,
                &self.name,
                format!("primary key '{}' is not a declared field", self.primary_key),
            ));
        }

        Ok(EntityMeta {
            name: self.name,
            table_name: self.table_name,
            primary_key: self.primary_key,
            fields: self.fields,
            relations: self.relations,
            properties,
        })
    }
}

/// One resolved hop of a dotted relation path.
#[derive(Debug, Clone)]
pub struct PathStep<'a> {
    /// Table alias of this hop: the path prefix up to and including it
    pub alias: String,
    /// Table alias of the entity the hop starts from
    pub source_alias: String,
    pub source: &'a EntityMeta,
    pub relation: &'a RelationDef,
    pub target: &'a EntityMeta,
}

/// Immutable set of registered entities.
#[derive(Debug, Default)]
pub struct Registry {
    entities: HashMap<String, Arc<EntityMeta>>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Look up an entity by name.
    pub fn entity(&self, name: &str) -> Result<&Arc<EntityMeta>> {
        self.entities
            .get(name)
            .ok_or_else(|| Error::UnknownEntity(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entities.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Resolve a dotted relation path against `root`, outermost hop first.
    ///
    /// Cycles in the relation graph are fine; the walk is bounded by the
    /// number of segments in `path`.
    pub fn walk<'a>(&'a self, root: &'a EntityMeta, path: &str) -> Result<Vec<PathStep<'a>>> {
        let mut steps = Vec::new();
        let mut current = root;
        let mut source_alias = ROOT_ALIAS.to_string();
        let mut prefix = String::new();

        for segment in path.split(PATH_SEPARATOR) {
            if segment.is_empty() {
                return Err(Error::unknown_relation(current.name(), path));
            }
            let relation = current.relation(segment)?;
            let target: &EntityMeta = self.entity(&relation.target)?;

            if !prefix.is_empty() {
                prefix.push(PATH_SEPARATOR);
            }
            prefix.push_str(segment);

            steps.push(PathStep {
                alias: prefix.clone(),
                source_alias: source_alias.clone(),
                source: current,
                relation,
                target,
            });

            source_alias.clone_from(&prefix);
            current = target;
        }

        Ok(steps)
    }
}

/// Collects entity declarations and validates them as a whole.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    pending: Vec<Result<EntityMeta>>,
}

impl RegistryBuilder {
    /// Register an entity declaration.
    pub fn register(mut self, entity: EntityMetaBuilder) -> Self {
        self.pending.push(entity.build());
        self
    }

    /// Validate every declaration and freeze the registry.
    pub fn build(self) -> Result<Arc<Registry>> {
        let mut entities = HashMap::with_capacity(self.pending.len());

        for entity in self.pending {
            let entity = entity?;
            if entities.contains_key(entity.name()) {
                return Err(registry_error(
                    RegistryErrorKind::DuplicateEntity,
                    entity.name(),
                    "entity registered twice".to_string(),
                ));
            }
            entities.insert(entity.name().to_string(), Arc::new(entity));
        }

        for entity in entities.values() {
            for relation in entity.relations() {
                if !entities.contains_key(&relation.target) {
                    return Err(registry_error(
                        RegistryErrorKind::UnknownTarget,
                        entity.name(),
                        format!(
                            "relation '{}' targets unregistered entity '{}'",
                            relation.alias, relation.target
                        ),
                    ));
                }
            }
        }

        tracing::debug!(entities = entities.len(), "Entity registry built");
        Ok(Arc::new(Registry { entities }))
    }
}

/// Relation aliases double as table aliases and as column namespaces.
fn is_valid_alias(alias: &str) -> bool {
    !alias.is_empty()
        && alias != ROOT_ALIAS
        && !alias.contains(PATH_SEPARATOR)
        && !alias.contains(NAMESPACE_SEPARATOR)
}

fn registry_error(kind: RegistryErrorKind, entity: &str, message: String) -> Error {
    Error::Registry(RegistryError {
        kind,
        entity: entity.to_string(),
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trim(value: Value) -> Value {
        match value {
            Value::Text(s) => Value::Text(s.trim().to_string()),
            other => other,
        }
    }

    fn blog() -> Arc<Registry> {
        Registry::builder()
            .register(
                EntityMeta::builder("Post", "posts")
                    .fields(["Id", "AuthorId"])
                    .field(FieldDef::new("Title").safe().filter(trim))
                    .relation(RelationDef::belongs_to("author", "User", "AuthorId")),
            )
            .register(
                EntityMeta::builder("User", "users")
                    .fields(["Id", "Name", "ManagerId"])
                    .relation(RelationDef::has_one("profile", "Profile", "UserId"))
                    .relation(RelationDef::belongs_to("manager", "User", "ManagerId")),
            )
            .register(EntityMeta::builder("Profile", "profiles").fields(["Id", "UserId", "Bio"]))
            .build()
            .unwrap()
    }

    #[test]
    fn test_property_lookup_distinguishes_fields_and_relations() {
        let registry = blog();
        let post = registry.entity("Post").unwrap();

        assert_eq!(post.property("Title"), Some(Property::Field(2)));
        assert_eq!(post.property("author"), Some(Property::Relation(0)));
        assert_eq!(post.property("nope"), None);
        assert!(matches!(
            post.relation("Title"),
            Err(Error::UnknownRelation { .. })
        ));
        assert!(matches!(
            post.field("author"),
            Err(Error::UnknownProperty { .. })
        ));
    }

    #[test]
    fn test_field_filter_is_applied() {
        let registry = blog();
        let title = registry.entity("Post").unwrap().field("Title").unwrap();
        assert_eq!(title.apply_filter(Value::from("  hi ")), Value::from("hi"));
    }

    #[test]
    fn test_walk_tracks_prefix_aliases() {
        let registry = blog();
        let post = registry.entity("Post").unwrap();
        let steps = registry.walk(post, "author.manager.profile").unwrap();

        let aliases: Vec<_> = steps.iter().map(|s| s.alias.as_str()).collect();
        assert_eq!(aliases, vec!["author", "author.manager", "author.manager.profile"]);

        let sources: Vec<_> = steps.iter().map(|s| s.source_alias.as_str()).collect();
        assert_eq!(sources, vec!["t", "author", "author.manager"]);
        assert_eq!(steps[2].target.name(), "Profile");
    }

    #[test]
    fn test_walk_rejects_unknown_and_empty_segments() {
        let registry = blog();
        let post = registry.entity("Post").unwrap();

        assert!(matches!(
            registry.walk(post, "author.nope"),
            Err(Error::UnknownRelation { ref entity, .. }) if entity == "User"
        ));
        assert!(matches!(
            registry.walk(post, "author..profile"),
            Err(Error::UnknownRelation { .. })
        ));
    }

    #[test]
    fn test_relation_aliases_that_break_aliasing_are_rejected() {
        for alias in ["t", "parent.node", "parent:node", ""] {
            let err = EntityMeta::builder("Node", "nodes")
                .fields(["Id", "ParentId"])
                .relation(RelationDef::belongs_to(alias, "Node", "ParentId"))
                .build()
                .unwrap_err();
            assert!(
                matches!(err, Error::Registry(ref e) if e.kind == RegistryErrorKind::InvalidAlias),
                "{alias:?} was accepted"
            );
        }

        assert!(
            EntityMeta::builder("Node", "nodes")
                .fields(["Id", "ParentId"])
                .relation(RelationDef::belongs_to("parent", "Node", "ParentId"))
                .build()
                .is_ok()
        );
    }

    #[test]
    fn test_registry_rejects_unknown_targets() {
        let err = Registry::builder()
            .register(
                EntityMeta::builder("Post", "posts")
                    .fields(["Id"])
                    .relation(RelationDef::belongs_to("author", "Ghost", "AuthorId")),
            )
            .build()
            .unwrap_err();

        assert!(matches!(
            err,
            Error::Registry(ref e) if e.kind == RegistryErrorKind::UnknownTarget
        ));
    }

    #[test]
    fn test_registry_rejects_duplicates_and_missing_primary_key() {
        let duplicate = Registry::builder()
            .register(EntityMeta::builder("A", "a").fields(["Id"]))
            .register(EntityMeta::builder("A", "a2").fields(["Id"]))
            .build()
            .unwrap_err();
        assert!(matches!(
            duplicate,
            Error::Registry(ref e) if e.kind == RegistryErrorKind::DuplicateEntity
        ));

        let shadowing = EntityMeta::builder("A", "a")
            .fields(["Id", "owner"])
            .relation(RelationDef::belongs_to("owner", "A", "OwnerId"))
            .build()
            .unwrap_err();
        assert!(matches!(
            shadowing,
            Error::Registry(ref e) if e.kind == RegistryErrorKind::DuplicateProperty
        ));

        let no_pk = EntityMeta::builder("A", "a")
            .primary_key("Code")
            .fields(["Id"])
            .build()
            .unwrap_err();
        assert!(matches!(
            no_pk,
            Error::Registry(ref e) if e.kind == RegistryErrorKind::MissingPrimaryKey
        ));
    }
}
