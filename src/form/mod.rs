//! Nested form data and its flat wire representation.
//!
//! [`Fields`] holds an ordered, arbitrarily nested mapping. [`Fields::flatten`]
//! turns it into bracket-path pairs (`Size[Width]`) suitable for either
//! urlencoded or multipart encoding; [`unflatten`] is the inverse.
//!
//! Multipart submission also resolves file markers (`@path`) through
//! [`UploadResolver`].

mod encode;
pub mod mime;
mod upload;

pub use encode::urlencode;
pub use upload::{
    FieldContent, FilePart, FileReference, Resolution, ResolveWarning, ResolvedField,
    UploadResolver,
};

use serde_json::Value;
use thiserror::Error;

/// Marks a field value as a file reference.
pub const FILE_SENTINEL: char = '@';

/// Malformed form input. Fails loudly; never produced for well-typed [`Fields`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormError {
    /// Field data must be a mapping at the top level.
    #[error("form data must be a JSON object, got {found}")]
    NotAMapping {
        /// JSON type actually supplied.
        found: &'static str,
    },

    /// A `name=value` pair had no `=`.
    #[error("form field '{0}' is missing '='")]
    MissingEquals(String),

    /// A field path had an empty base name.
    #[error("form field path '{0}' has no name")]
    EmptyName(String),
}

/// One value in a form tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    /// Scalar text.
    Leaf(String),
    /// Null, false-like empty collection, or explicitly absent value.
    Empty,
    /// Ordered child mapping.
    Node(Vec<(String, FieldValue)>),
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Leaf(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Leaf(value)
    }
}

impl From<&Value> for FieldValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => Self::Empty,
            Value::Bool(true) => Self::Leaf("1".to_string()),
            Value::Bool(false) => Self::Leaf(String::new()),
            Value::Number(number) => Self::Leaf(number.to_string()),
            Value::String(text) => Self::Leaf(text.clone()),
            Value::Array(items) if items.is_empty() => Self::Empty,
            Value::Array(items) => Self::Node(
                items
                    .iter()
                    .enumerate()
                    .map(|(index, item)| (index.to_string(), Self::from(item)))
                    .collect(),
            ),
            Value::Object(map) if map.is_empty() => Self::Empty,
            Value::Object(map) => Self::Node(
                map.iter()
                    .map(|(key, item)| (key.clone(), Self::from(item)))
                    .collect(),
            ),
        }
    }
}

/// One flattened entry. `value` is `None` for absent values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatField {
    /// Bracketed path, e.g. `Size[Width]`.
    pub path: String,
    /// Scalar content.
    pub value: Option<String>,
}

impl FlatField {
    /// Creates a flat field with a value.
    pub fn new(path: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            value: Some(value.into()),
        }
    }

    /// Creates a flat field with an absent value.
    pub fn absent(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            value: None,
        }
    }
}

/// Ordered top-level form mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fields {
    entries: Vec<(String, FieldValue)>,
}

impl Fields {
    /// Creates an empty mapping.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces `key`, keeping its original position on replace.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<FieldValue>) {
        let key = key.into();
        let value = value.into();
        if let Some(slot) = self.entries.iter_mut().find(|(existing, _)| *existing == key) {
            slot.1 = value;
        } else {
            self.entries.push((key, value));
        }
    }

    /// Builder-style [`insert`](Self::insert).
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// Builds fields from a JSON object, preserving key order.
    ///
    /// # Errors
    ///
    /// Returns [`FormError::NotAMapping`] when `value` is not an object.
    pub fn from_json(value: &Value) -> Result<Self, FormError> {
        let Value::Object(map) = value else {
            return Err(FormError::NotAMapping {
                found: json_type_name(value),
            });
        };
        Ok(Self {
            entries: map
                .iter()
                .map(|(key, item)| (key.clone(), FieldValue::from(item)))
                .collect(),
        })
    }

    /// Parses `name=value` pairs such as `Size[Width]=50px`.
    ///
    /// # Errors
    ///
    /// Returns [`FormError`] for pairs without `=` or without a base name.
    pub fn from_pairs<I, S>(pairs: I) -> Result<Self, FormError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut flat = Vec::new();
        for pair in pairs {
            let pair = pair.as_ref();
            let (path, value) = pair
                .split_once('=')
                .ok_or_else(|| FormError::MissingEquals(pair.to_string()))?;
            if path_segments(path).first().is_none_or(|base| base.is_empty()) {
                return Err(FormError::EmptyName(path.to_string()));
            }
            flat.push(FlatField::new(path, value));
        }
        Ok(unflatten(&flat))
    }

    /// Returns true when there are no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Top-level entries in order.
    #[must_use]
    pub fn entries(&self) -> &[(String, FieldValue)] {
        &self.entries
    }

    /// Flattens into bracket paths, depth first, in insertion order.
    ///
    /// Leaves become valued entries; empty values and empty nodes become
    /// absent entries.
    #[must_use]
    pub fn flatten(&self) -> Vec<FlatField> {
        let mut out = Vec::new();
        for (key, value) in &self.entries {
            flatten_into(key.clone(), value, &mut out);
        }
        out
    }
}

fn flatten_into(path: String, value: &FieldValue, out: &mut Vec<FlatField>) {
    match value {
        FieldValue::Leaf(text) => out.push(FlatField::new(path, text.clone())),
        FieldValue::Empty => out.push(FlatField::absent(path)),
        FieldValue::Node(children) if children.is_empty() => out.push(FlatField::absent(path)),
        FieldValue::Node(children) => {
            for (key, child) in children {
                flatten_into(format!("{path}[{key}]"), child, out);
            }
        }
    }
}

/// Rebuilds a tree from flattened paths.
///
/// A later entry replaces an earlier leaf at the same path. Paths that are
/// not well-formed bracket paths are kept as literal top-level keys.
#[must_use]
pub fn unflatten(flat: &[FlatField]) -> Fields {
    let mut root: Vec<(String, FieldValue)> = Vec::new();
    for field in flat {
        let segments = path_segments(&field.path);
        let leaf = field
            .value
            .clone()
            .map_or(FieldValue::Empty, FieldValue::Leaf);
        insert_path(&mut root, &segments, leaf);
    }
    Fields { entries: root }
}

fn insert_path(level: &mut Vec<(String, FieldValue)>, segments: &[String], leaf: FieldValue) {
    let Some((head, rest)) = segments.split_first() else {
        return;
    };
    let position = level.iter().position(|(key, _)| key == head);
    if rest.is_empty() {
        match position {
            Some(index) => level[index].1 = leaf,
            None => level.push((head.clone(), leaf)),
        }
        return;
    }
    let index = position.unwrap_or_else(|| {
        level.push((head.clone(), FieldValue::Node(Vec::new())));
        level.len() - 1
    });
    if !matches!(level[index].1, FieldValue::Node(_)) {
        level[index].1 = FieldValue::Node(Vec::new());
    }
    if let FieldValue::Node(children) = &mut level[index].1 {
        insert_path(children, rest, leaf);
    }
}

/// Splits `a[b][c]` into `["a", "b", "c"]`.
fn path_segments(path: &str) -> Vec<String> {
    let Some(open) = path.find('[') else {
        return vec![path.to_string()];
    };
    let (base, mut rest) = path.split_at(open);
    let mut segments = vec![base.to_string()];
    while let Some(inner) = rest.strip_prefix('[') {
        let Some(close) = inner.find(']') else {
            return vec![path.to_string()];
        };
        segments.push(inner[..close].to_string());
        rest = &inner[close + 1..];
    }
    if rest.is_empty() {
        segments
    } else {
        vec![path.to_string()]
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
