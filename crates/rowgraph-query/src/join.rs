//! JOIN clause types.

/// A JOIN clause produced by the relation resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Join {
    /// Type of join
    pub join_type: JoinType,
    /// Table to join
    pub table: String,
    /// Rendered (already quoted) table alias
    pub alias: String,
    /// ON condition
    pub on: String,
}

/// Types of SQL joins a relation can be resolved with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    #[default]
    Left,
    Right,
}

impl JoinType {
    /// Get the SQL keyword for this join type.
    pub const fn as_str(&self) -> &'static str {
        match self {
            JoinType::Inner => "INNER JOIN",
            JoinType::Left => "LEFT JOIN",
            JoinType::Right => "RIGHT JOIN",
        }
    }
}

impl Join {
    pub fn new(
        join_type: JoinType,
        table: impl Into<String>,
        alias: impl Into<String>,
        on: impl Into<String>,
    ) -> Self {
        Self {
            join_type,
            table: table.into(),
            alias: alias.into(),
            on: on.into(),
        }
    }

    /// Create a LEFT JOIN.
    pub fn left(table: impl Into<String>, alias: impl Into<String>, on: impl Into<String>) -> Self {
        Self::new(JoinType::Left, table, alias, on)
    }

    /// AND an extra predicate onto the ON condition.
    ///
    /// Relation filters go here rather than into WHERE so that an unmatched
    /// LEFT JOIN still yields the root row.
    pub fn and_on(mut self, extra: &str) -> Self {
        self.on = format!("{} AND ({})", self.on, extra);
        self
    }

    /// Generate SQL for this JOIN clause.
    pub fn to_sql(&self) -> String {
        format!(
            "{} {} AS {} ON {}",
            self.join_type.as_str(),
            self.table,
            self.alias,
            self.on
        )
    }
}
