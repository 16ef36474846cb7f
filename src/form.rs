//! Decoding of `application/x-www-form-urlencoded` request bodies

use std::collections::{BTreeSet, HashMap};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FormError {
    #[error("missing form field '{0}'")]
    MissingField(String),
    #[error("malformed form body: {0}")]
    Decode(#[from] serde_urlencoded::de::Error),
}

/// Submitted form fields. A key sent more than once keeps its last value.
#[derive(Debug, Clone, Default)]
pub struct Form {
    fields: HashMap<String, String>,
}

impl Form {
    pub fn parse(body: &str) -> Result<Self, FormError> {
        let pairs: Vec<(String, String)> = serde_urlencoded::from_str(body)?;
        Ok(pairs.into_iter().collect())
    }

    /// A field the handler cannot proceed without.
    pub fn field(&self, name: &str) -> Result<&str, FormError> {
        self.fields
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| FormError::MissingField(name.to_string()))
    }

    pub fn field_or<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.fields.get(name).map(String::as_str).unwrap_or(default)
    }

    /// Present and non-empty.
    pub fn filled(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Form {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Whitespace-separated words in submission order, e.g. project names.
pub fn words(value: &str) -> Vec<String> {
    value.split_whitespace().map(str::to_string).collect()
}

/// Whitespace-separated words as a set, e.g. tags.
pub fn word_set(value: &str) -> BTreeSet<String> {
    value.split_whitespace().map(str::to_string).collect()
}
