#![forbid(unsafe_code)]

//! Name paths: ordered keys locating a field inside a store.

use std::fmt;
use std::ops::Deref;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// PathKey
// ---------------------------------------------------------------------------

/// One segment of a [`NamePath`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathKey {
    /// Position inside an array.
    Index(usize),
    /// Key inside an object.
    Key(String),
}

impl PathKey {
    /// The key as an array index, if it is one or spells one.
    ///
    /// Only canonical decimals spell an index: `"01"` and `"+1"` are plain
    /// object keys.
    #[must_use]
    pub fn as_index(&self) -> Option<usize> {
        match self {
            Self::Index(i) => Some(*i),
            Self::Key(k) => {
                let canonical = !k.is_empty()
                    && k.bytes().all(|b| b.is_ascii_digit())
                    && (k == "0" || !k.starts_with('0'));
                if canonical { k.parse().ok() } else { None }
            }
        }
    }

    /// The key as an object key.
    #[must_use]
    pub fn to_key(&self) -> String {
        match self {
            Self::Index(i) => i.to_string(),
            Self::Key(k) => k.clone(),
        }
    }

    /// Whether this segment is numeric, which makes a missing container an array.
    #[must_use]
    pub fn is_index(&self) -> bool {
        matches!(self, Self::Index(_))
    }
}

impl fmt::Display for PathKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(i) => write!(f, "{i}"),
            Self::Key(k) => f.write_str(k),
        }
    }
}

impl From<&str> for PathKey {
    fn from(key: &str) -> Self {
        Self::Key(key.to_string())
    }
}

impl From<String> for PathKey {
    fn from(key: String) -> Self {
        Self::Key(key)
    }
}

impl From<&String> for PathKey {
    fn from(key: &String) -> Self {
        Self::Key(key.clone())
    }
}

impl From<usize> for PathKey {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}

// ---------------------------------------------------------------------------
// NamePath
// ---------------------------------------------------------------------------

/// Ordered keys identifying a field. Displays dotted: `user.tags.0`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NamePath(Vec<PathKey>);

impl NamePath {
    /// The empty path, addressing the whole store.
    #[must_use]
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Append a key.
    #[must_use]
    pub fn child(mut self, key: impl Into<PathKey>) -> Self {
        self.0.push(key.into());
        self
    }

    /// The path without its last key; `None` for the root.
    #[must_use]
    pub fn parent(&self) -> Option<&[PathKey]> {
        self.0.split_last().map(|(_, rest)| rest)
    }

    /// Consume into the raw key list.
    #[must_use]
    pub fn into_keys(self) -> Vec<PathKey> {
        self.0
    }
}

impl Deref for NamePath {
    type Target = [PathKey];

    fn deref(&self) -> &[PathKey] {
        &self.0
    }
}

impl fmt::Display for NamePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, key) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{key}")?;
        }
        Ok(())
    }
}

impl From<Vec<PathKey>> for NamePath {
    fn from(keys: Vec<PathKey>) -> Self {
        Self(keys)
    }
}

impl From<&[PathKey]> for NamePath {
    fn from(keys: &[PathKey]) -> Self {
        Self(keys.to_vec())
    }
}

impl From<PathKey> for NamePath {
    fn from(key: PathKey) -> Self {
        Self(vec![key])
    }
}

impl From<&str> for NamePath {
    fn from(key: &str) -> Self {
        Self(vec![key.into()])
    }
}

impl From<String> for NamePath {
    fn from(key: String) -> Self {
        Self(vec![key.into()])
    }
}

impl From<usize> for NamePath {
    fn from(index: usize) -> Self {
        Self(vec![index.into()])
    }
}

impl<const N: usize> From<[&str; N]> for NamePath {
    fn from(keys: [&str; N]) -> Self {
        Self(keys.into_iter().map(PathKey::from).collect())
    }
}

impl From<Vec<&str>> for NamePath {
    fn from(keys: Vec<&str>) -> Self {
        Self(keys.into_iter().map(PathKey::from).collect())
    }
}

impl<K: Into<PathKey>> FromIterator<K> for NamePath {
    fn from_iter<I: IntoIterator<Item = K>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// Build a [`NamePath`] from mixed string and index keys.
///
/// ```rust
/// use xe_form::name_path;
///
/// let path = name_path!["users", 0usize, "email"];
/// assert_eq!(path.to_string(), "users.0.email");
/// ```
#[macro_export]
macro_rules! name_path {
    () => {
        $crate::NamePath::root()
    };
    ($($key:expr),+ $(,)?) => {
        $crate::NamePath::from(vec![$($crate::PathKey::from($key)),+])
    };
}

// ---------------------------------------------------------------------------
// Matching
// ---------------------------------------------------------------------------

/// Two paths match when they have the same length and equal keys in order.
#[must_use]
pub fn match_name_path(a: &[PathKey], b: &[PathKey]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x == y)
}

/// Whether `list` holds a path matching `path`.
#[must_use]
pub fn contains_name_path(list: &[NamePath], path: &[PathKey]) -> bool {
    list.iter().any(|candidate| match_name_path(candidate, path))
}

/// Compare two names after normalizing single keys to one-element paths.
#[must_use]
pub fn is_equal_name(a: impl Into<NamePath>, b: impl Into<NamePath>) -> bool {
    a.into() == b.into()
}
