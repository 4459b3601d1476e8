//! Call fingerprints and resource tags.
//!
//! A fingerprint identifies a tool call by its method and normalized params.
//! Normalization sorts object keys recursively, so `{"a":1,"b":2}` and
//! `{"b":2,"a":1}` produce the same fingerprint.

use std::collections::BTreeSet;
use std::fmt;

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Deterministic key for a `(method, params)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint of `method` called with `params`
    pub fn compute(method: &str, params: &Value) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(method.as_bytes());
        hasher.update([0u8]);
        hasher.update(canonical_json(params).as_bytes());

        let digest = hasher.finalize();
        let hex = digest.iter().map(|b| format!("{b:02x}")).collect::<String>();
        Self(hex)
    }

    /// Hex digest
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form is enough to tell calls apart in logs
        f.write_str(&self.0[..12.min(self.0.len())])
    }
}

/// Serializes `value` with object keys sorted at every level.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

const DATABASE_KEYS: [&str; 3] = ["database", "database_name", "db"];
const TABLE_KEYS: [&str; 2] = ["table", "table_name"];

fn first_str<'a>(params: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|key| params.get(*key).and_then(Value::as_str))
        .filter(|s| !s.is_empty())
}

fn positional_str(items: &[Value], index: usize) -> Option<&str> {
    items
        .get(index)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

/// Database and table a call's params name, if any.
///
/// Positional params (a bare array or `{"args": [...]}`) carry the database
/// first and the table second.
fn referenced_resources(params: &Value) -> (Option<&str>, Option<&str>) {
    let positional = match params {
        Value::Array(items) => Some(items.as_slice()),
        Value::Object(map) => map.get("args").and_then(Value::as_array).map(Vec::as_slice),
        _ => None,
    };
    if let Some(database) = first_str(params, &DATABASE_KEYS) {
        return (Some(database), first_str(params, &TABLE_KEYS));
    }
    match positional {
        Some(items) => (positional_str(items, 0), positional_str(items, 1)),
        None => (None, None),
    }
}

/// Tag for every entry that touches database `database`
pub fn database_tag(database: &str) -> String {
    format!("db:{database}")
}

/// Tag for entries scoped to one table
pub fn table_tag(database: &str, table: &str) -> String {
    format!("table:{database}.{table}")
}

/// Resources a call's params reference.
///
/// A call naming a database is tagged `db:<database>`; one that also names a
/// table is additionally tagged `table:<database>.<table>`. A table without a
/// database is not taggable.
pub fn resource_tags(params: &Value) -> BTreeSet<String> {
    let mut tags = BTreeSet::new();
    if let (Some(database), table) = referenced_resources(params) {
        tags.insert(database_tag(database));
        if let Some(table) = table {
            tags.insert(table_tag(database, table));
        }
    }
    tags
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_key_order_does_not_matter() {
        let a = Fingerprint::compute("get_table_schema", &json!({"database": "fin", "table": "t"}));
        let b = Fingerprint::compute("get_table_schema", &json!({"table": "t", "database": "fin"}));
        assert_eq!(a, b);
    }

    #[test]
    fn test_method_and_values_matter() {
        let params = json!({"database": "fin"});
        assert_ne!(
            Fingerprint::compute("discover_databases", &params),
            Fingerprint::compute("list_tables", &params)
        );
        assert_ne!(
            Fingerprint::compute("list_tables", &json!({"database": "fin"})),
            Fingerprint::compute("list_tables", &json!({"database": "hr"}))
        );
        // Array order is significant
        assert_ne!(
            Fingerprint::compute("m", &json!([1, 2])),
            Fingerprint::compute("m", &json!([2, 1]))
        );
    }

    #[test]
    fn test_canonical_json_sorts_nested_keys() {
        let value = json!({"b": {"y": 1, "x": [{"d": 1, "c": 2}]}, "a": "s\"q"});
        assert_eq!(
            canonical_json(&value),
            r#"{"a":"s\"q","b":{"x":[{"c":2,"d":1}],"y":1}}"#
        );
    }

    #[test]
    fn test_resource_tags() {
        assert_eq!(
            resource_tags(&json!({"database": "fin", "table": "accounts"})),
            BTreeSet::from(["db:fin".to_string(), "table:fin.accounts".to_string()])
        );
        assert_eq!(
            resource_tags(&json!({"database_name": "hr"})),
            BTreeSet::from(["db:hr".to_string()])
        );
        assert!(resource_tags(&json!({"table": "orphan"})).is_empty());
    }

    #[test]
    fn test_positional_params_are_tagged() {
        assert_eq!(
            resource_tags(&json!(["fin", "accounts"])),
            BTreeSet::from(["db:fin".to_string(), "table:fin.accounts".to_string()])
        );
        assert_eq!(
            resource_tags(&json!({"args": ["hr"]})),
            BTreeSet::from(["db:hr".to_string()])
        );
        assert!(resource_tags(&json!([42, "accounts"])).is_empty());
        assert!(resource_tags(&json!([])).is_empty());
        assert!(resource_tags(&json!("fin")).is_empty());
    }

    fn arb_json() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::from),
            any::<i64>().prop_map(Value::from),
            "[a-z]{0,8}".prop_map(Value::from),
        ];
        leaf.prop_recursive(3, 32, 6, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map("[a-z]{1,6}", inner, 0..5)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    fn reversed_keys(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut entries: Vec<_> = map.iter().collect();
                entries.reverse();
                Value::Object(
                    entries
                        .into_iter()
                        .map(|(k, v)| (k.clone(), reversed_keys(v)))
                        .collect(),
                )
            }
            Value::Array(items) => Value::Array(items.iter().map(reversed_keys).collect()),
            other => other.clone(),
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_fingerprint_ignores_key_order(value in arb_json()) {
            prop_assert_eq!(
                Fingerprint::compute("m", &value),
                Fingerprint::compute("m", &reversed_keys(&value))
            );
        }

        #[test]
        fn prop_canonical_json_is_valid_json(value in arb_json()) {
            let parsed: Value = serde_json::from_str(&canonical_json(&value)).unwrap();
            prop_assert_eq!(parsed, value);
        }
    }
}
