//! Deterministic structural diff between two values.
//!
//! Produces a stable, ordered list of edit operations transforming `old`
//! into `new`, addressed by JSONPath-style strings rooted at `$`.
//!
//! Ordering contract:
//! - mappings: `remove` ops for keys only in `old` (sorted), then `add` ops
//!   for keys only in `new` (sorted), then recursion into common keys (sorted)
//! - sequences: pairwise by index up to the shorter length, then trailing
//!   `remove` or `add` ops in increasing index order
//! - type mismatch replaces the whole node; integer and float compare by
//!   numeric value, not by tag

use serde::Serialize;

use crate::domain::value::Value;

/// A single edit operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum DiffOp {
    Add { path: String, value: Value },
    Remove { path: String, old: Value },
    Replace { path: String, old: Value, new: Value },
}

impl DiffOp {
    pub fn path(&self) -> &str {
        match self {
            DiffOp::Add { path, .. } => path,
            DiffOp::Remove { path, .. } => path,
            DiffOp::Replace { path, .. } => path,
        }
    }

    pub fn op_name(&self) -> &'static str {
        match self {
            DiffOp::Add { .. } => "add",
            DiffOp::Remove { .. } => "remove",
            DiffOp::Replace { .. } => "replace",
        }
    }
}

/// Diff `old` against `new`, returning the ordered edit list.
/// Total and deterministic: repeated invocation yields identical output.
pub fn diff_values(old: &Value, new: &Value) -> Vec<DiffOp> {
    let mut ops = Vec::new();
    diff_at(old, new, "$", &mut ops);
    ops
}

fn diff_at(old: &Value, new: &Value, path: &str, ops: &mut Vec<DiffOp>) {
    match (old, new) {
        (Value::Null, Value::Null) => {}
        (Value::Bool(a), Value::Bool(b)) => {
            if a != b {
                push_replace(ops, path, old, new);
            }
        }
        (Value::Int(a), Value::Int(b)) => {
            if a != b {
                push_replace(ops, path, old, new);
            }
        }
        (Value::Float(a), Value::Float(b)) => {
            if a != b {
                push_replace(ops, path, old, new);
            }
        }
        // Numeric cross-type: equal numerics produce no op.
        (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
            if (*a as f64) != *b {
                push_replace(ops, path, old, new);
            }
        }
        (Value::Str(a), Value::Str(b)) => {
            if a != b {
                push_replace(ops, path, old, new);
            }
        }
        (Value::Bytes(a), Value::Bytes(b)) => {
            if a != b {
                push_replace(ops, path, old, new);
            }
        }
        (Value::Seq(a), Value::Seq(b)) => {
            let shared = a.len().min(b.len());
            for i in 0..shared {
                diff_at(&a[i], &b[i], &index_path(path, i), ops);
            }
            for (i, item) in a.iter().enumerate().skip(shared) {
                ops.push(DiffOp::Remove {
                    path: index_path(path, i),
                    old: item.clone(),
                });
            }
            for (i, item) in b.iter().enumerate().skip(shared) {
                ops.push(DiffOp::Add {
                    path: index_path(path, i),
                    value: item.clone(),
                });
            }
        }
        (Value::Map(a), Value::Map(b)) => {
            // BTreeMap iteration is already key-sorted.
            for (key, value) in a.iter() {
                if !b.contains_key(key) {
                    ops.push(DiffOp::Remove {
                        path: key_path(path, key),
                        old: value.clone(),
                    });
                }
            }
            for (key, value) in b.iter() {
                if !a.contains_key(key) {
                    ops.push(DiffOp::Add {
                        path: key_path(path, key),
                        value: value.clone(),
                    });
                }
            }
            for (key, old_value) in a.iter() {
                if let Some(new_value) = b.get(key) {
                    diff_at(old_value, new_value, &key_path(path, key), ops);
                }
            }
        }
        _ => push_replace(ops, path, old, new),
    }
}

fn push_replace(ops: &mut Vec<DiffOp>, path: &str, old: &Value, new: &Value) {
    ops.push(DiffOp::Replace {
        path: path.to_string(),
        old: old.clone(),
        new: new.clone(),
    });
}

fn index_path(base: &str, idx: usize) -> String {
    format!("{base}[{idx}]")
}

/// Append a mapping key to a path. Plain names use dot form; names containing
/// dots, brackets, or quotes are bracket-quoted.
fn key_path(base: &str, key: &str) -> String {
    if key.contains(['.', '[', ']', '\'']) {
        let escaped = key.replace('\\', "\\\\").replace('\'', "\\'");
        format!("{base}['{escaped}']")
    } else {
        format!("{base}.{key}")
    }
}
