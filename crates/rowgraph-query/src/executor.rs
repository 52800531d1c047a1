//! The interface to the external SQL engine.
//!
//! rowgraph shapes queries but never executes them. An [`Executor`] owns
//! statement building, parameter binding, connectivity and any retry policy;
//! this layer passes its failures through untouched.

use crate::criteria::Criteria;
use regex::Regex;
use rowgraph_core::{Result, Row, Value};
use std::fmt::Write;
use std::sync::OnceLock;

/// Quoting rules of the target dialect.
///
/// The defaults produce MySQL-flavoured output; executors for other dialects
/// override them.
pub trait Quoter {
    /// Render `value` as a safe SQL literal.
    fn quote(&self, value: &Value) -> String {
        quote_literal(value)
    }

    /// Render a metadata-derived identifier (table alias, column).
    fn quote_identifier(&self, name: &str) -> String {
        quote_identifier(name)
    }
}

/// Executes criteria against a database.
///
/// Every method is synchronous; the calling thread blocks until the engine
/// answers. Implementations must bind every `Criteria::params` entry as a
/// parameter and never interpolate it.
pub trait Executor: Quoter + Send + Sync {
    /// Execute a SELECT and return the first row, if any.
    fn query_one(&self, criteria: &Criteria) -> Result<Option<Row>>;

    /// Execute a SELECT and return every row.
    fn query_all(&self, criteria: &Criteria) -> Result<Vec<Row>>;

    /// Insert one row and return the generated primary key.
    fn insert(&self, table: &str, values: &[(String, Value)]) -> Result<Value>;

    /// Update the row whose `key_column` equals `key`.
    fn update(
        &self,
        table: &str,
        values: &[(String, Value)],
        key_column: &str,
        key: &Value,
    ) -> Result<u64>;

    /// Delete the row whose `key_column` equals `key`.
    fn delete(&self, table: &str, key_column: &str, key: &Value) -> Result<u64>;

    /// Delete every root row matched by `criteria` (joins and conditions).
    fn delete_matching(&self, criteria: &Criteria) -> Result<u64>;
}

/// Default literal quoting.
///
/// Text has embedded single quotes doubled; bytes become a hex literal.
pub fn quote_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => String::from(if *b { "1" } else { "0" }),
        Value::Int(v) => v.to_string(),
        Value::BigInt(v) => v.to_string(),
        Value::Double(v) => v.to_string(),
        Value::Text(s) => quote_text(s),
        Value::Json(j) => quote_text(&j.to_string()),
        Value::Bytes(bytes) => {
            let mut out = String::with_capacity(bytes.len() * 2 + 3);
            out.push_str("X'");
            for b in bytes {
                let _ = write!(out, "{:02X}", b);
            }
            out.push('\'');
            out
        }
    }
}

fn quote_text(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

fn plain_identifier() -> &'static Regex {
    static PLAIN: OnceLock<Regex> = OnceLock::new();
    PLAIN.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern is valid")
    })
}

/// Default identifier quoting: plain names stay bare, anything else
/// (dotted aliases such as `author.profile`) is backtick-quoted.
pub fn quote_identifier(name: &str) -> String {
    if plain_identifier().is_match(name) {
        name.to_string()
    } else {
        format!("`{}`", name.replace('`', "``"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Defaults;
    impl Quoter for Defaults {}

    #[test]
    fn test_literal_quoting() {
        assert_eq!(quote_literal(&Value::Null), "NULL");
        assert_eq!(quote_literal(&Value::Bool(true)), "1");
        assert_eq!(quote_literal(&Value::BigInt(-7)), "-7");
        assert_eq!(quote_literal(&Value::from("it's")), "'it''s'");
        assert_eq!(quote_literal(&Value::Bytes(vec![0xde, 0x01])), "X'DE01'");
    }

    #[test]
    fn test_identifier_quoting() {
        assert_eq!(quote_identifier("author"), "author");
        assert_eq!(quote_identifier("_x9"), "_x9");
        assert_eq!(quote_identifier("author.profile"), "`author.profile`");
        assert_eq!(quote_identifier("we`ird"), "`we``ird`");
        assert_eq!(quote_identifier("9lives"), "`9lives`");
    }

    #[test]
    fn test_quoter_defaults_delegate() {
        let q = Defaults;
        assert_eq!(q.quote(&Value::from("a")), "'a'");
        assert_eq!(q.quote_identifier("a.b"), "`a.b`");
    }
}
