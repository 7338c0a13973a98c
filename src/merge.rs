//! The layered store: nested `toml::Table`s merged lowest to highest priority.
//!
//! Each source (defaults, config file, environment, flags) is turned into a
//! sparse table keyed by store key segments, then layered with
//! [`KeyTree::merge`]. Leaf values are replaced as a whole, so a map set by a
//! flag replaces the file's map rather than merging into it. Subtrees the
//! schema does not know about are combined with [`deep_merge`].

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use toml::{Table, Value};

/// Deep-merge `overlay` on top of `base`.
/// If both sides have a Table for the same key, recurse.
/// Otherwise, `overlay`'s value wins.
pub fn deep_merge(mut base: Table, overlay: Table) -> Table {
    for (key, overlay_val) in overlay {
        match (base.remove(&key), overlay_val) {
            (Some(Value::Table(base_tbl)), Value::Table(overlay_tbl)) => {
                base.insert(key, Value::Table(deep_merge(base_tbl, overlay_tbl)));
            }
            (_, overlay_val) => {
                base.insert(key, overlay_val);
            }
        }
    }
    base
}

/// Insert `value` at a dotted key, creating intermediate tables.
pub fn insert(table: &mut Table, dotted_key: &str, value: Value) -> Result<(), String> {
    let segments: Vec<&str> = dotted_key.split('.').collect();
    insert_segments(table, &segments, value)
}

/// Insert `value` under a path of segments. Fails when an intermediate key
/// already holds a non-table value.
pub fn insert_segments<S: AsRef<str>>(
    table: &mut Table,
    segments: &[S],
    value: Value,
) -> Result<(), String> {
    let Some((last, parents)) = segments.split_last() else {
        return Err("empty key".to_string());
    };
    let mut current = table;
    for segment in parents {
        current = current
            .entry(segment.as_ref())
            .or_insert_with(|| Value::Table(Table::new()))
            .as_table_mut()
            .ok_or_else(|| format!("\"{}\" is not a table", segment.as_ref()))?;
    }
    current.insert(last.as_ref().to_string(), value);
    Ok(())
}

/// Value at a dotted key, if every segment resolves.
pub fn lookup<'t>(table: &'t Table, dotted_key: &str) -> Option<&'t Value> {
    let mut segments = dotted_key.split('.');
    let first = segments.next()?;
    segments.try_fold(table.get(first)?, |value, segment| {
        value.as_table()?.get(segment)
    })
}

/// Every bound store key, arranged by segment.
///
/// Segments match case-insensitively, so a file spelling `MaxIdleConns` as
/// `maxidleconns` still lands on the bound key.
#[derive(Debug, Default)]
pub struct KeyTree {
    children: BTreeMap<String, KeyNode>,
}

#[derive(Debug)]
struct KeyNode {
    segment: String,
    key: String,
    leaf: bool,
    children: KeyTree,
}

impl KeyTree {
    /// Register a leaf key. On a clash returns the key already holding the
    /// position: the same key, a leaf prefix of it, a key nested under it, or a
    /// spelling differing only in case.
    pub fn insert(&mut self, key: &str) -> Result<(), String> {
        let segments: Vec<&str> = key.split('.').collect();
        let mut tree = self;
        let mut path = String::new();
        for (i, segment) in segments.iter().enumerate() {
            if i > 0 {
                path.push('.');
            }
            path.push_str(segment);
            let last = i + 1 == segments.len();
            let node = match tree.children.entry(segment.to_lowercase()) {
                Entry::Occupied(entry) => {
                    let node = entry.into_mut();
                    if last || node.leaf || node.segment != *segment {
                        return Err(node.key.clone());
                    }
                    node
                }
                Entry::Vacant(entry) => entry.insert(KeyNode {
                    segment: segment.to_string(),
                    key: path.clone(),
                    leaf: last,
                    children: KeyTree::default(),
                }),
            };
            tree = &mut node.children;
        }
        Ok(())
    }

    /// Rename table keys to the bound spelling. Values under leaf keys (map
    /// contents) and unknown keys are left untouched.
    pub fn canonicalize(&self, table: Table) -> Table {
        let mut out = Table::new();
        for (key, value) in table {
            let Some(node) = self.children.get(&key.to_lowercase()) else {
                merge_entry(&mut out, key, value);
                continue;
            };
            let value = match value {
                Value::Table(sub) if !node.leaf => Value::Table(node.children.canonicalize(sub)),
                other => other,
            };
            merge_entry(&mut out, node.segment.clone(), value);
        }
        out
    }

    /// Layer `overlay` over `base`. Bound leaves are replaced whole; groups
    /// and unknown tables merge recursively.
    pub fn merge(&self, mut base: Table, overlay: Table) -> Table {
        for (key, overlay_val) in overlay {
            let node = self.children.get(&key.to_lowercase());
            let merged = match (base.remove(&key), overlay_val, node) {
                (_, value, Some(node)) if node.leaf => value,
                (Some(Value::Table(b)), Value::Table(o), Some(node)) => {
                    Value::Table(node.children.merge(b, o))
                }
                (Some(Value::Table(b)), Value::Table(o), None) => Value::Table(deep_merge(b, o)),
                (_, value, _) => value,
            };
            base.insert(key, merged);
        }
        base
    }
}

fn merge_entry(out: &mut Table, key: String, value: Value) {
    let merged = match (out.remove(&key), value) {
        (Some(Value::Table(prev)), Value::Table(next)) => Value::Table(deep_merge(prev, next)),
        (_, value) => value,
    };
    out.insert(key, merged);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(toml_str: &str) -> Table {
        toml_str.parse::<Table>().unwrap()
    }

    #[test]
    fn disjoint_keys_merge() {
        let base = table(r#"host = "localhost""#);
        let overlay = table("port = 3000");
        let merged = deep_merge(base, overlay);
        assert_eq!(merged["host"].as_str().unwrap(), "localhost");
        assert_eq!(merged["port"].as_integer().unwrap(), 3000);
    }

    #[test]
    fn same_scalar_key_overlay_wins() {
        let base = table("port = 8080");
        let overlay = table("port = 3000");
        let merged = deep_merge(base, overlay);
        assert_eq!(merged["port"].as_integer().unwrap(), 3000);
    }

    #[test]
    fn nested_tables_recurse() {
        let base = table(
            r#"
            [database]
            url = "postgres://old"
            pool_size = 5
            "#,
        );
        let overlay = table(
            r#"
            [database]
            pool_size = 20
            "#,
        );
        let merged = deep_merge(base, overlay);
        let db = merged["database"].as_table().unwrap();
        assert_eq!(db["url"].as_str().unwrap(), "postgres://old");
        assert_eq!(db["pool_size"].as_integer().unwrap(), 20);
    }

    #[test]
    fn overlay_scalar_replaces_table() {
        let base = table(
            r#"
            [database]
            url = "x"
            "#,
        );
        let overlay = table(r#"database = "flat_string""#);
        let merged = deep_merge(base, overlay);
        assert_eq!(merged["database"].as_str().unwrap(), "flat_string");
    }

    #[test]
    fn empty_overlay_returns_base() {
        let base = table("port = 8080");
        let merged = deep_merge(base.clone(), Table::new());
        assert_eq!(merged, base);
    }

    #[test]
    fn empty_base_returns_overlay() {
        let overlay = table("port = 3000");
        let merged = deep_merge(Table::new(), overlay.clone());
        assert_eq!(merged, overlay);
    }

    #[test]
    fn deeply_nested_three_levels() {
        let base = table(
            r#"
            [a]
            [a.b]
            [a.b.c]
            val = 1
            other = "keep"
            "#,
        );
        let overlay = table(
            r#"
            [a]
            [a.b]
            [a.b.c]
            val = 99
            "#,
        );
        let merged = deep_merge(base, overlay);
        let c = merged["a"]["b"]["c"].as_table().unwrap();
        assert_eq!(c["val"].as_integer().unwrap(), 99);
        assert_eq!(c["other"].as_str().unwrap(), "keep");
    }

    #[test]
    fn multiple_sequential_merges() {
        let a = table(r#"host = "a""#);
        let b = table("port = 1000");
        let c = table(r#"host = "c""#);
        let merged = deep_merge(deep_merge(a, b), c);
        assert_eq!(merged["host"].as_str().unwrap(), "c");
        assert_eq!(merged["port"].as_integer().unwrap(), 1000);
    }

    fn tree(keys: &[&str]) -> KeyTree {
        let mut tree = KeyTree::default();
        for key in keys {
            tree.insert(key).unwrap();
        }
        tree
    }

    #[test]
    fn insert_creates_intermediate_tables() {
        let mut t = Table::new();
        insert(&mut t, "database.pool.size", Value::Integer(5)).unwrap();
        assert_eq!(t["database"]["pool"]["size"].as_integer(), Some(5));
    }

    #[test]
    fn insert_through_scalar_fails() {
        let mut t = table("database = 1");
        assert!(insert(&mut t, "database.url", Value::Integer(5)).is_err());
    }

    #[test]
    fn lookup_dotted() {
        let t = table(
            r#"
            [database]
            host = "h"
            "#,
        );
        assert_eq!(lookup(&t, "database.host").and_then(Value::as_str), Some("h"));
        assert!(lookup(&t, "database.port").is_none());
        assert!(lookup(&t, "database.host.x").is_none());
    }

    #[test]
    fn key_tree_rejects_duplicates() {
        let mut tree = tree(&["port", "database.host"]);
        assert_eq!(tree.insert("port"), Err("port".to_string()));
        assert_eq!(tree.insert("Port"), Err("port".to_string()));
        assert_eq!(tree.insert("port.inner"), Err("port".to_string()));
        assert_eq!(tree.insert("database"), Err("database".to_string()));
        assert!(tree.insert("database.port").is_ok());
    }

    #[test]
    fn canonicalize_matches_case_insensitively() {
        let tree = tree(&["database.maxIdleConns", "extra.labels"]);
        let t = table(
            r#"
            unknown = 1
            [DATABASE]
            maxidleconns = 3
            [extra.labels]
            MixedCase = "kept"
            "#,
        );
        let t = tree.canonicalize(t);
        assert_eq!(t["database"]["maxIdleConns"].as_integer(), Some(3));
        assert_eq!(t["extra"]["labels"]["MixedCase"].as_str(), Some("kept"));
        assert_eq!(t["unknown"].as_integer(), Some(1));
    }

    #[test]
    fn leaves_are_replaced_whole() {
        let tree = tree(&["labels", "database.host", "database.port"]);
        let base = table(
            r#"
            [labels]
            a = "1"
            [database]
            host = "h"
            port = 1
            "#,
        );
        let overlay = table(
            r#"
            [labels]
            b = "2"
            [database]
            port = 2
            "#,
        );
        let merged = tree.merge(base, overlay);
        let labels = merged["labels"].as_table().unwrap();
        assert_eq!(labels.len(), 1);
        assert_eq!(labels["b"].as_str(), Some("2"));
        assert_eq!(merged["database"]["host"].as_str(), Some("h"));
        assert_eq!(merged["database"]["port"].as_integer(), Some(2));
    }
}
