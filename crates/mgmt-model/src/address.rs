//! Management addresses
//!
//! Provides [`PathElement`] and [`PathAddress`] for hierarchical addressing of
//! resources in the management tree.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use smallvec::SmallVec;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// Element value matching every child of a type
pub const WILDCARD: &str = "*";

/// Resource type reported for the empty (root) address
pub const ROOT_TYPE: &str = "root";

/// One `type=value` segment of an address
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PathElement {
    key: String,
    value: String,
}

impl PathElement {
    /// Create new element
    #[inline]
    #[must_use]
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Element matching every child of `key`
    #[inline]
    #[must_use]
    pub fn wildcard(key: impl Into<String>) -> Self {
        Self::new(key, WILDCARD)
    }

    /// Resource type
    #[inline]
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Resource name (or `*`)
    #[inline]
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    #[inline]
    #[must_use]
    pub fn is_wildcard(&self) -> bool {
        self.value == WILDCARD
    }

    /// Check whether a concrete child `key=value` is selected by this element
    #[inline]
    #[must_use]
    pub fn matches(&self, key: &str, value: &str) -> bool {
        self.key == key && (self.is_wildcard() || self.value == value)
    }
}

impl Display for PathElement {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

/// Ordered sequence of [`PathElement`]s; empty denotes the root
///
/// # Examples
/// - `/` → root
/// - `/host=primary/server-config=server-one`
/// - `/host=*/server=*` (wildcard read)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct PathAddress(SmallVec<[PathElement; 4]>);

impl PathAddress {
    /// Root address
    #[inline]
    #[must_use]
    pub fn root() -> Self {
        Self(SmallVec::new())
    }

    /// Create address from elements
    #[inline]
    #[must_use]
    pub fn new(elements: Vec<PathElement>) -> Self {
        Self(SmallVec::from_vec(elements))
    }

    /// Create address from `(type, value)` pairs
    #[must_use]
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        Self(pairs.iter().map(|(k, v)| PathElement::new(*k, *v)).collect())
    }

    /// Parse a `type=value` segment sequence (`/a=b/c=d`, leading `/` optional)
    ///
    /// # Errors
    /// `AddressError::MalformedAddress` if a segment lacks `=` or has an empty
    /// type or value.
    pub fn resolve(raw: &str) -> Result<Self, AddressError> {
        let trimmed = raw.trim();
        let body = trimmed.strip_prefix('/').unwrap_or(trimmed);
        if body.is_empty() {
            return Ok(Self::root());
        }

        body.split('/')
            .map(parse_segment)
            .collect::<Result<SmallVec<_>, _>>()
            .map(Self)
    }

    /// Parse the JSON representation of an address
    ///
    /// Accepts `null` (root), a CLI string, or an array whose items are either
    /// `[type, value]` pairs or single-entry `{type: value}` objects.
    ///
    /// # Errors
    /// `AddressError::MalformedAddress` for unusable items, `InvalidJson` for
    /// values of the wrong shape.
    pub fn from_json(value: &Value) -> Result<Self, AddressError> {
        match value {
            Value::Null => Ok(Self::root()),
            Value::String(raw) => Self::resolve(raw),
            Value::Array(items) => items
                .iter()
                .map(element_from_json)
                .collect::<Result<SmallVec<_>, _>>()
                .map(Self),
            other => Err(AddressError::InvalidJson(other.to_string())),
        }
    }

    /// JSON form: array of single-entry objects
    #[must_use]
    pub fn to_json(&self) -> Value {
        Value::Array(
            self.0
                .iter()
                .map(|e| {
                    let mut entry = Map::new();
                    entry.insert(e.key.clone(), Value::String(e.value.clone()));
                    Value::Object(entry)
                })
                .collect(),
        )
    }

    /// Get elements
    #[inline]
    #[must_use]
    pub fn elements(&self) -> &[PathElement] {
        &self.0
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if address is the root
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parent address (if not root)
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.0.is_empty() {
            None
        } else {
            Some(Self(self.0[..self.0.len() - 1].iter().cloned().collect()))
        }
    }

    #[inline]
    #[must_use]
    pub fn first(&self) -> Option<&PathElement> {
        self.0.first()
    }

    #[inline]
    #[must_use]
    pub fn last(&self) -> Option<&PathElement> {
        self.0.last()
    }

    /// Append an element, returning new address
    #[must_use]
    pub fn append(&self, element: PathElement) -> Self {
        let mut new = self.clone();
        new.0.push(element);
        new
    }

    /// Append `key=value`, returning new address
    #[inline]
    #[must_use]
    pub fn child(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.append(PathElement::new(key, value))
    }

    /// Elements from `start` onwards
    #[must_use]
    pub fn suffix(&self, start: usize) -> Self {
        Self(self.0.iter().skip(start).cloned().collect())
    }

    /// Check if this address is a prefix of another
    #[must_use]
    pub fn is_prefix_of(&self, other: &Self) -> bool {
        self.0.len() <= other.0.len() && self.0[..] == other.0[..self.0.len()]
    }

    /// Check if any element is a wildcard
    #[inline]
    #[must_use]
    pub fn has_wildcard(&self) -> bool {
        self.0.iter().any(PathElement::is_wildcard)
    }

    /// Type of the addressed resource (`root` for the empty address)
    #[inline]
    #[must_use]
    pub fn resource_type(&self) -> &str {
        self.0.last().map_or(ROOT_TYPE, PathElement::key)
    }

    /// Value of the first element with the given type
    #[must_use]
    pub fn value_of(&self, key: &str) -> Option<&str> {
        self.0.iter().find(|e| e.key == key).map(PathElement::value)
    }

    /// Iterator over elements from root to leaf
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &PathElement> {
        self.0.iter()
    }
}

impl Display for PathAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("/");
        }
        for element in &self.0 {
            write!(f, "/{element}")?;
        }
        Ok(())
    }
}

impl FromStr for PathAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::resolve(s)
    }
}

impl From<Vec<PathElement>> for PathAddress {
    fn from(elements: Vec<PathElement>) -> Self {
        Self::new(elements)
    }
}

impl<'a> IntoIterator for &'a PathAddress {
    type Item = &'a PathElement;
    type IntoIter = std::slice::Iter<'a, PathElement>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

fn parse_segment(segment: &str) -> Result<PathElement, AddressError> {
    let (key, value) = segment
        .split_once('=')
        .ok_or_else(|| AddressError::malformed(segment, "missing '='"))?;
    element_from_parts(segment, key.trim(), value.trim())
}

fn element_from_parts(raw: &str, key: &str, value: &str) -> Result<PathElement, AddressError> {
    if key.is_empty() {
        return Err(AddressError::malformed(raw, "empty type"));
    }
    if value.is_empty() {
        return Err(AddressError::malformed(raw, "empty value"));
    }
    Ok(PathElement::new(key, value))
}

fn element_from_json(item: &Value) -> Result<PathElement, AddressError> {
    match item {
        Value::Array(pair) if pair.len() == 2 => match (&pair[0], &pair[1]) {
            (Value::String(k), Value::String(v)) => element_from_parts(&item.to_string(), k, v),
            _ => Err(AddressError::malformed(&item.to_string(), "pair items must be strings")),
        },
        Value::Object(entry) if entry.len() == 1 => {
            let (k, v) = entry
                .iter()
                .next()
                .ok_or_else(|| AddressError::InvalidJson(item.to_string()))?;
            match v {
                Value::String(v) => element_from_parts(&item.to_string(), k, v),
                _ => Err(AddressError::malformed(&item.to_string(), "value must be a string")),
            }
        }
        Value::String(segment) => parse_segment(segment),
        other => Err(AddressError::malformed(&other.to_string(), "expected a type/value pair")),
    }
}

/// Errors related to addresses
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    /// Segment cannot be parsed
    #[error("malformed address segment '{segment}': {reason}")]
    MalformedAddress {
        segment: String,
        reason: &'static str,
    },

    /// JSON value is not an address
    #[error("not an address: {0}")]
    InvalidJson(String),
}

impl AddressError {
    fn malformed(segment: &str, reason: &'static str) -> Self {
        Self::MalformedAddress {
            segment: segment.to_string(),
            reason,
        }
    }
}
