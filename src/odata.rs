//! OData v2/v4 vocabulary: filters, system query options and entity keys.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::QueryBuildError;
use crate::sanitize::{escape, validate_field};

/// OData protocol version a service speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ODataVersion {
    V2,
    V4,
}

impl fmt::Display for ODataVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ODataVersion::V2 => f.write_str("v2"),
            ODataVersion::V4 => f.write_str("v4"),
        }
    }
}

/// A single filter term. Values are escaped when rendered, never before.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    Equals { field: String, value: String },
    Contains { field: String, value: String },
}

impl Predicate {
    /// `field eq 'value'`
    pub fn equals(field: &str, value: &str) -> Result<Self, QueryBuildError> {
        Ok(Predicate::Equals {
            field: validate_field(field)?.to_string(),
            value: value.to_string(),
        })
    }

    /// Partial match, rendered per OData version.
    pub fn contains(field: &str, value: &str) -> Result<Self, QueryBuildError> {
        Ok(Predicate::Contains {
            field: validate_field(field)?.to_string(),
            value: value.to_string(),
        })
    }

    pub fn render(&self, version: ODataVersion) -> String {
        match self {
            Predicate::Equals { field, value } => format!("{} eq '{}'", field, escape(value)),
            Predicate::Contains { field, value } => match version {
                ODataVersion::V2 => format!("substringof('{}', {})", escape(value), field),
                ODataVersion::V4 => format!("contains({},'{}')", field, escape(value)),
            },
        }
    }
}

/// Conjunction of predicates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    terms: Vec<Predicate>,
}

impl Filter {
    pub fn new(first: Predicate) -> Self {
        Self { terms: vec![first] }
    }

    pub fn and(mut self, predicate: Predicate) -> Self {
        self.terms.push(predicate);
        self
    }

    pub fn render(&self, version: ODataVersion) -> String {
        self.terms
            .iter()
            .map(|p| p.render(version))
            .collect::<Vec<_>>()
            .join(" and ")
    }
}

/// OData query builder for constructing query parameters.
#[derive(Debug, Default, Clone)]
pub struct ODataQuery {
    filter: Option<String>,
    select: Option<Vec<String>>,
    top: Option<u32>,
    params: Vec<(String, String)>,
}

impl ODataQuery {
    /// Create a new empty query.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rendered $filter expression.
    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Add $select fields.
    pub fn select<S: AsRef<str>>(mut self, fields: &[S]) -> Self {
        if !fields.is_empty() {
            self.select = Some(fields.iter().map(|f| f.as_ref().to_string()).collect());
        }
        self
    }

    /// Add $top limit.
    pub fn top(mut self, limit: u32) -> Self {
        self.top = Some(limit);
        self
    }

    /// Add a custom query parameter.
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    /// Whether a parameter with this name was added.
    pub fn has_param(&self, key: &str) -> bool {
        self.params.iter().any(|(k, _)| k == key)
    }

    #[cfg(test)]
    pub fn filter_expression(&self) -> Option<&str> {
        self.filter.as_deref()
    }

    /// Percent-encoded `key=value` pairs in a stable order.
    pub fn encoded_pairs(&self) -> Vec<String> {
        let mut pairs = Vec::new();

        for (key, value) in &self.params {
            pairs.push(format!("{}={}", encode_key(key), urlencoding::encode(value)));
        }

        if let Some(ref filter) = self.filter {
            pairs.push(format!("$filter={}", urlencoding::encode(filter)));
        }

        if let Some(ref select) = self.select {
            pairs.push(format!("$select={}", select.join(",")));
        }

        if let Some(top) = self.top {
            pairs.push(format!("$top={}", top));
        }

        pairs
    }
}

/// Encode a parameter name, keeping the `$` of system query options literal.
fn encode_key(key: &str) -> String {
    urlencoding::encode(key).replace("%24", "$")
}

/// How a direct-by-key lookup addresses the entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyMode {
    Segment,
    Paren,
    #[default]
    Auto,
}

impl FromStr for KeyMode {
    type Err = QueryBuildError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "segment" => Ok(KeyMode::Segment),
            "paren" => Ok(KeyMode::Paren),
            "auto" => Ok(KeyMode::Auto),
            _ => Err(QueryBuildError::InvalidKeyMode(s.to_string())),
        }
    }
}

/// The concrete addressing style of one issued request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStyle {
    Segment,
    Paren,
}

impl KeyStyle {
    pub fn label(&self) -> &'static str {
        match self {
            KeyStyle::Segment => "key_segment",
            KeyStyle::Paren => "key_paren",
        }
    }
}

/// Entity key, single or composite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityKey {
    Single(String),
    Composite(Vec<(String, String)>),
}

impl EntityKey {
    /// `('id')` or `(Name='v',Other='w')`
    pub fn paren_predicate(&self) -> Result<String, QueryBuildError> {
        match self {
            EntityKey::Single(value) => {
                if value.is_empty() {
                    return Err(QueryBuildError::EmptyKey);
                }
                Ok(format!("('{}')", encode_literal(value)))
            }
            EntityKey::Composite(parts) => {
                if parts.is_empty() {
                    return Err(QueryBuildError::EmptyKey);
                }
                let rendered = parts
                    .iter()
                    .map(|(name, value)| {
                        validate_field(name)?;
                        Ok(format!("{}='{}'", name, encode_literal(value)))
                    })
                    .collect::<Result<Vec<_>, QueryBuildError>>()?;
                Ok(format!("({})", rendered.join(",")))
            }
        }
    }

    /// `/id` or `/v/w`
    pub fn segments(&self) -> Result<String, QueryBuildError> {
        let values: Vec<&str> = match self {
            EntityKey::Single(value) => vec![value.as_str()],
            EntityKey::Composite(parts) => parts.iter().map(|(_, v)| v.as_str()).collect(),
        };
        if values.is_empty() || values.iter().any(|v| v.is_empty()) {
            return Err(QueryBuildError::EmptyKey);
        }
        Ok(values
            .iter()
            .map(|v| format!("/{}", urlencoding::encode(v)))
            .collect())
    }
}

fn encode_literal(value: &str) -> String {
    urlencoding::encode(&escape(value)).into_owned()
}
