//! Best-effort lookups into decoded JSON bodies.
//!
//! A path is a list of [`JsonKey`]s: string keys index objects, integer keys
//! index arrays. Any mismatch along the way yields `None`, never a panic.

use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JsonKey {
    Key(String),
    Index(i64),
}

impl From<&str> for JsonKey {
    fn from(value: &str) -> Self {
        Self::Key(value.to_string())
    }
}

impl From<String> for JsonKey {
    fn from(value: String) -> Self {
        Self::Key(value)
    }
}

impl From<i32> for JsonKey {
    fn from(value: i32) -> Self {
        Self::Index(i64::from(value))
    }
}

impl From<i64> for JsonKey {
    fn from(value: i64) -> Self {
        Self::Index(value)
    }
}

impl From<usize> for JsonKey {
    fn from(value: usize) -> Self {
        Self::Index(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

/// Builds a `Vec<JsonKey>` from mixed string and integer literals.
///
/// ```rust
/// use foundation_testing::json_path;
/// use foundation_testing::session::JsonKey;
///
/// let path = json_path!["args", "items", 0];
/// assert_eq!(path[2], JsonKey::Index(0));
/// ```
#[macro_export]
macro_rules! json_path {
    ($($key:expr),* $(,)?) => {
        vec![$($crate::session::JsonKey::from($key)),*]
    };
}

/// Walks `path` from `root`, returning the final node.
#[must_use]
pub fn lookup<'a>(root: &'a Value, path: &[JsonKey]) -> Option<&'a Value> {
    path.iter().try_fold(root, |node, key| match (key, node) {
        (JsonKey::Key(name), Value::Object(map)) => map.get(name),
        (JsonKey::Index(index), Value::Array(items)) => usize::try_from(*index)
            .ok()
            .and_then(|index| items.get(index)),
        _ => None,
    })
}

/// Decodes `bytes` and walks `path`; `None` on decode failure or mismatch.
#[must_use]
pub fn lookup_bytes(bytes: &[u8], path: &[JsonKey]) -> Option<Value> {
    let root: Value = serde_json::from_slice(bytes).ok()?;
    lookup(&root, path).cloned()
}
