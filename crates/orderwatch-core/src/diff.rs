//! Bounded structural diff over JSON observations.
//!
//! Walks two values depth-first and reports at most [`MAX_CHANGES`]
//! differences in traversal order: object keys in encountered order
//! (old keys first, then keys only present in the new value), arrays by
//! index. Composite values embedded in a record are serialized compactly
//! and cut to [`MAX_VALUE_CHARS`] characters.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

/// Maximum number of records returned by one diff call.
pub const MAX_CHANGES: usize = 10;

/// Maximum characters kept from a serialized composite value.
pub const MAX_VALUE_CHARS: usize = 100;

/// Maximum nesting depth walked before failing fast.
pub const MAX_DEPTH: usize = 64;

/// Base path used for API `data` payloads.
pub const DEFAULT_BASE_PATH: &str = "data";

/// Old-side marker for keys added in the new value.
pub const NOT_PRESENT: &str = "(不存在)";

/// New-side marker for keys removed from the new value.
pub const DELETED: &str = "(已删除)";

// ============================================================================
// Change Record
// ============================================================================

/// One reported difference between two observations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub path: String,
    pub old_value: String,
    pub new_value: String,
}

impl ChangeRecord {
    pub fn new(
        path: impl Into<String>,
        old_value: impl Into<String>,
        new_value: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            old_value: old_value.into(),
            new_value: new_value.into(),
        }
    }
}

impl fmt::Display for ChangeRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} → {}", self.path, self.old_value, self.new_value)
    }
}

/// Errors raised by the differ.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiffError {
    /// The values nest deeper than the walker allows.
    #[error("structure nested deeper than {limit} levels at {path}")]
    DepthExceeded { path: String, limit: usize },
}

// ============================================================================
// Public API
// ============================================================================

/// Diffs two optional values rooted at `base_path`.
///
/// `None` stands for an absent side (rendered as `undefined`), while
/// `Some(Value::Null)` is a JSON null (rendered as `null`).
///
/// # Errors
///
/// Returns `DiffError::DepthExceeded` when either value nests deeper
/// than [`MAX_DEPTH`] levels below `base_path`.
pub fn diff(
    old: Option<&Value>,
    new: Option<&Value>,
    base_path: &str,
) -> Result<Vec<ChangeRecord>, DiffError> {
    let mut differ = Differ::default();
    differ.walk(old, new, base_path, 0)?;
    Ok(differ.changes)
}

/// Checks that `value` nests no deeper than [`MAX_DEPTH`] levels.
///
/// Two values that both pass can always be diffed, so callers check an
/// observation before keeping it as a baseline.
///
/// # Errors
///
/// Returns `DiffError::DepthExceeded` naming the first path past the limit.
pub fn check_depth(value: &Value, base_path: &str) -> Result<(), DiffError> {
    check_depth_at(value, base_path, 0)
}

fn check_depth_at(value: &Value, path: &str, depth: usize) -> Result<(), DiffError> {
    if depth > MAX_DEPTH {
        return Err(DiffError::DepthExceeded {
            path: path.to_string(),
            limit: MAX_DEPTH,
        });
    }
    match value {
        Value::Array(items) => items
            .iter()
            .enumerate()
            .filter(|(_, item)| is_composite(item) || depth == MAX_DEPTH)
            .try_for_each(|(i, item)| check_depth_at(item, &format!("{path}[{i}]"), depth + 1)),
        Value::Object(fields) => fields
            .iter()
            .filter(|(_, field)| is_composite(field) || depth == MAX_DEPTH)
            .try_for_each(|(key, field)| {
                check_depth_at(field, &format!("{path}.{key}"), depth + 1)
            }),
        _ => Ok(()),
    }
}

/// Diffs two present values rooted at `base_path`.
pub fn diff_values(
    old: &Value,
    new: &Value,
    base_path: &str,
) -> Result<Vec<ChangeRecord>, DiffError> {
    diff(Some(old), Some(new), base_path)
}

// ============================================================================
// Walker
// ============================================================================

#[derive(Default)]
struct Differ {
    changes: Vec<ChangeRecord>,
}

impl Differ {
    fn is_full(&self) -> bool {
        self.changes.len() >= MAX_CHANGES
    }

    fn push(&mut self, record: ChangeRecord) {
        if !self.is_full() {
            self.changes.push(record);
        }
    }

    fn walk(
        &mut self,
        old: Option<&Value>,
        new: Option<&Value>,
        path: &str,
        depth: usize,
    ) -> Result<(), DiffError> {
        if depth > MAX_DEPTH {
            return Err(DiffError::DepthExceeded {
                path: path.to_string(),
                limit: MAX_DEPTH,
            });
        }

        let (old_value, new_value) = match (present(old), present(new)) {
            (None, None) => return Ok(()),
            (None, Some(added)) => {
                self.push(ChangeRecord::new(path, absent_literal(old), truncated_json(added)));
                return Ok(());
            }
            (Some(removed), None) => {
                self.push(ChangeRecord::new(path, truncated_json(removed), absent_literal(new)));
                return Ok(());
            }
            (Some(o), Some(n)) => (o, n),
        };

        match (old_value, new_value) {
            (Value::Array(o), Value::Array(n)) => self.walk_arrays(o, n, path, depth),
            (Value::Object(o), Value::Object(n)) => self.walk_objects(o, n, path, depth),
            (o, n) if is_composite(o) && is_composite(n) => {
                // Object against array: one record for the whole subtree.
                self.push(ChangeRecord::new(path, truncated_json(o), truncated_json(n)));
                Ok(())
            }
            (o, n) => {
                if !scalar_eq(o, n) {
                    self.push(ChangeRecord::new(path, display_value(o), display_value(n)));
                }
                Ok(())
            }
        }
    }

    fn walk_arrays(
        &mut self,
        old: &[Value],
        new: &[Value],
        path: &str,
        depth: usize,
    ) -> Result<(), DiffError> {
        if old.len() != new.len() {
            self.push(ChangeRecord::new(
                format!("{path}.length"),
                old.len().to_string(),
                new.len().to_string(),
            ));
        }

        let max_len = old.len().max(new.len());
        for i in 0..max_len {
            if self.is_full() {
                break;
            }
            self.walk(old.get(i), new.get(i), &format!("{path}[{i}]"), depth + 1)?;
        }
        Ok(())
    }

    fn walk_objects(
        &mut self,
        old: &Map<String, Value>,
        new: &Map<String, Value>,
        path: &str,
        depth: usize,
    ) -> Result<(), DiffError> {
        let keys = old
            .keys()
            .chain(new.keys().filter(|key| !old.contains_key(key.as_str())));

        for key in keys {
            if self.is_full() {
                break;
            }
            let child = format!("{path}.{key}");
            match (old.get(key), new.get(key)) {
                (None, Some(added)) => {
                    self.push(ChangeRecord::new(child, NOT_PRESENT, truncated_json(added)));
                }
                (Some(removed), None) => {
                    self.push(ChangeRecord::new(child, truncated_json(removed), DELETED));
                }
                (o, n) => self.walk(o, n, &child, depth + 1)?,
            }
        }
        Ok(())
    }
}

// ============================================================================
// Value Helpers
// ============================================================================

fn present(value: Option<&Value>) -> Option<&Value> {
    value.filter(|v| !v.is_null())
}

fn absent_literal(value: Option<&Value>) -> &'static str {
    match value {
        Some(_) => "null",
        None => "undefined",
    }
}

fn is_composite(value: &Value) -> bool {
    matches!(value, Value::Array(_) | Value::Object(_))
}

/// Strict equality with numbers compared by value (`1 == 1.0`).
fn scalar_eq(old: &Value, new: &Value) -> bool {
    match (old, new) {
        (Value::Number(a), Value::Number(b)) => {
            a == b || matches!((a.as_f64(), b.as_f64()), (Some(x), Some(y)) if x == y)
        }
        _ => old == new,
    }
}

/// String form of a scalar: strings unquoted, composites serialized and cut.
fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        Value::Array(_) | Value::Object(_) => truncated_json(value),
    }
}

fn truncated_json(value: &Value) -> String {
    value.to_string().chars().take(MAX_VALUE_CHARS).collect()
}
