//! Composition of OData requests against the configured SAP host.
//!
//! Every value that reaches a `$filter` goes through [`Predicate`], which
//! escapes at render time; every caller-supplied path goes through
//! [`validate_relative_path`] so a request can never leave the SAP host.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use reqwest::header::{HeaderName, HeaderValue, AUTHORIZATION};
use serde_json::Value;

use crate::config::{Config, ServiceDescriptor};
use crate::error::QueryBuildError;
use crate::odata::{EntityKey, Filter, KeyMode, KeyStyle, ODataQuery, Predicate};

pub const DEFAULT_MAX_RESULTS: u32 = 10;
pub const MAX_RESULTS_LIMIT: u32 = 100;

/// Relative prefix for `post_to_sap` endpoints.
const ODATA_V2_ROOT: &str = "sap/opu/odata/sap";

/// HTTP methods the bridge forwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_reqwest(&self) -> reqwest::Method {
        match self {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }

    fn requires_body(&self) -> bool {
        matches!(self, HttpMethod::Post | HttpMethod::Put)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        })
    }
}

impl FromStr for HttpMethod {
    type Err = QueryBuildError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "DELETE" => Ok(HttpMethod::Delete),
            _ => Err(QueryBuildError::UnsupportedMethod(s.to_string())),
        }
    }
}

/// Free-text search against one field of a service.
#[derive(Debug, Clone, Default)]
pub struct SearchRequest {
    pub description: String,
    pub search_field: String,
    pub exact_match: bool,
    /// Clamped into 1..=100; `None` means the default of 10.
    pub max_results: Option<i64>,
    /// Added as `Language eq '<language>'` when present.
    pub language: Option<String>,
    pub select: Vec<String>,
}

/// Caller-shaped request against any relative service path.
#[derive(Debug, Clone, Default)]
pub struct GenericRequest {
    pub service_path: String,
    pub method: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub params: BTreeMap<String, String>,
    pub data: Option<Value>,
}

/// A fully composed request, ready for the executor.
#[derive(Debug, Clone, PartialEq)]
pub struct ComposedRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

/// What to issue for a direct-by-key lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyLookupPlan {
    Single {
        style: KeyStyle,
        request: ComposedRequest,
    },
    /// `auto`: paren first, segment once on a 404-class answer.
    ParenThenSegment {
        paren: ComposedRequest,
        segment: ComposedRequest,
    },
}

/// Clamp a requested result count into 1..=100.
pub fn clamp_max_results(requested: Option<i64>) -> u32 {
    match requested {
        None => DEFAULT_MAX_RESULTS,
        Some(n) => n.clamp(1, MAX_RESULTS_LIMIT as i64) as u32,
    }
}

/// Reject anything that is not a plain relative path on the SAP host.
pub fn validate_relative_path(path: &str) -> Result<&str, QueryBuildError> {
    let invalid = |reason| QueryBuildError::InvalidPath {
        path: path.to_string(),
        reason,
    };

    let trimmed = path.trim();
    if trimmed.is_empty() {
        return Err(invalid("path is empty"));
    }
    if has_scheme(trimmed) || trimmed.starts_with("//") || trimmed.contains("://") {
        return Err(QueryBuildError::AbsolutePath(path.to_string()));
    }
    if trimmed.contains('\\') {
        return Err(invalid("backslashes are not allowed"));
    }
    if trimmed.contains('?') || trimmed.contains('#') {
        return Err(invalid("query parameters belong in params"));
    }
    if trimmed.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(invalid("whitespace and control characters are not allowed"));
    }
    if trimmed.split('/').any(|segment| segment == ".." || segment == ".") {
        return Err(invalid("dot segments are not allowed"));
    }
    if trimmed.contains('@') {
        return Err(invalid("'@' is not allowed"));
    }

    Ok(trimmed)
}

/// `scheme:` prefix per RFC 3986.
fn has_scheme(path: &str) -> bool {
    match path.find(':') {
        Some(idx) if idx > 0 => {
            let scheme = &path[..idx];
            let mut chars = scheme.chars();
            chars.next().is_some_and(|c| c.is_ascii_alphabetic())
                && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
                && !scheme.contains('/')
        }
        _ => false,
    }
}

fn json_headers() -> Vec<(String, String)> {
    vec![
        ("Accept".to_string(), "application/json".to_string()),
        ("Content-Type".to_string(), "application/json".to_string()),
    ]
}

/// Set a header, replacing any existing one with the same name.
fn set_header(headers: &mut Vec<(String, String)>, name: &str, value: &str) {
    headers.retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
    headers.push((name.to_string(), value.to_string()));
}

fn validate_header(name: &str, value: &str) -> Result<(), QueryBuildError> {
    let parsed = HeaderName::from_str(name.trim())
        .map_err(|_| QueryBuildError::InvalidHeader(name.to_string()))?;
    if parsed == AUTHORIZATION {
        return Err(QueryBuildError::ForbiddenHeader(name.to_string()));
    }
    HeaderValue::from_str(value).map_err(|_| QueryBuildError::InvalidHeader(name.to_string()))?;
    Ok(())
}

/// OData request builder bound to one configuration.
#[derive(Debug, Clone, Copy)]
pub struct RequestBuilder<'a> {
    config: &'a Config,
}

impl<'a> RequestBuilder<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    /// `scheme://host[:port]/path?sap-client=..&...`
    pub fn compose_url(&self, path: &str, query: &ODataQuery) -> String {
        let mut pairs = Vec::new();
        if !query.has_param("sap-client") {
            pairs.push(format!(
                "sap-client={}",
                urlencoding::encode(&self.config.client)
            ));
        }
        pairs.extend(query.encoded_pairs());

        format!(
            "{}/{}?{}",
            self.config.base_url(),
            path.trim_start_matches('/'),
            pairs.join("&")
        )
    }

    /// Build a `$filter` search against a registered service.
    pub fn search(
        &self,
        service: &ServiceDescriptor,
        request: &SearchRequest,
    ) -> Result<ComposedRequest, QueryBuildError> {
        let description = request.description.trim();
        if description.is_empty() {
            return Err(QueryBuildError::EmptySearch);
        }

        let predicate = if request.exact_match {
            Predicate::equals(&request.search_field, description)?
        } else {
            Predicate::contains(&request.search_field, description)?
        };
        let mut filter = Filter::new(predicate);
        if let Some(ref language) = request.language {
            filter = filter.and(Predicate::equals("Language", language)?);
        }

        let query = ODataQuery::new()
            .filter(filter.render(service.version))
            .select(request.select.as_slice())
            .top(clamp_max_results(request.max_results));

        Ok(ComposedRequest {
            method: HttpMethod::Get,
            url: self.compose_url(&service.path, &query),
            headers: json_headers(),
            body: None,
        })
    }

    /// Build the request(s) for a direct-by-key lookup.
    pub fn key_lookup(
        &self,
        service: &ServiceDescriptor,
        key: &EntityKey,
        mode: KeyMode,
        select: &[&str],
    ) -> Result<KeyLookupPlan, QueryBuildError> {
        let query = ODataQuery::new().select(select);
        let base = service.path.trim_end_matches('/');

        let paren = || -> Result<ComposedRequest, QueryBuildError> {
            let path = format!("{}{}", base, key.paren_predicate()?);
            Ok(self.get(&path, &query))
        };
        let segment = || -> Result<ComposedRequest, QueryBuildError> {
            let path = format!("{}{}", base, key.segments()?);
            Ok(self.get(&path, &query))
        };

        Ok(match mode {
            KeyMode::Paren => KeyLookupPlan::Single {
                style: KeyStyle::Paren,
                request: paren()?,
            },
            KeyMode::Segment => KeyLookupPlan::Single {
                style: KeyStyle::Segment,
                request: segment()?,
            },
            KeyMode::Auto => KeyLookupPlan::ParenThenSegment {
                paren: paren()?,
                segment: segment()?,
            },
        })
    }

    /// Build a caller-shaped request against a relative service path.
    pub fn generic(&self, request: &GenericRequest) -> Result<ComposedRequest, QueryBuildError> {
        let path = validate_relative_path(&request.service_path)?;

        let method = match request.method.as_deref() {
            None => HttpMethod::Get,
            Some(m) if m.trim().is_empty() => HttpMethod::Get,
            Some(m) => m.parse()?,
        };

        let body = match (&request.data, method.requires_body()) {
            (None, true) | (Some(Value::Null), true) => {
                return Err(QueryBuildError::MissingBody(match method {
                    HttpMethod::Put => "PUT",
                    _ => "POST",
                }))
            }
            (None, false) | (Some(Value::Null), false) => None,
            (Some(Value::String(raw)), _) => Some(raw.clone()),
            (Some(other), _) => Some(other.to_string()),
        };

        let mut headers = json_headers();
        for (name, value) in &request.headers {
            validate_header(name, value)?;
            set_header(&mut headers, name.trim(), value);
        }

        let query = request
            .params
            .iter()
            .fold(ODataQuery::new(), |query, (key, value)| query.param(key, value));

        Ok(ComposedRequest {
            method,
            url: self.compose_url(path, &query),
            headers,
            body,
        })
    }

    /// Build a POST to an endpoint under the OData v2 service root.
    pub fn post(
        &self,
        endpoint: &str,
        payload: &str,
        content_type: &str,
        additional_headers: &BTreeMap<String, String>,
    ) -> Result<ComposedRequest, QueryBuildError> {
        let endpoint = validate_relative_path(endpoint)?.trim_start_matches('/');
        let path = if endpoint.starts_with(ODATA_V2_ROOT) {
            endpoint.to_string()
        } else {
            format!("{}/{}", ODATA_V2_ROOT, endpoint)
        };

        validate_header("Content-Type", content_type)?;
        let mut headers = vec![
            ("Content-Type".to_string(), content_type.to_string()),
            ("Accept".to_string(), "application/json".to_string()),
            ("X-Requested-With".to_string(), "XMLHttpRequest".to_string()),
        ];
        for (name, value) in additional_headers {
            validate_header(name, value)?;
            set_header(&mut headers, name.trim(), value);
        }

        Ok(ComposedRequest {
            method: HttpMethod::Post,
            url: self.compose_url(&path, &ODataQuery::new()),
            headers,
            body: (!payload.is_empty()).then(|| payload.to_string()),
        })
    }

    fn get(&self, path: &str, query: &ODataQuery) -> ComposedRequest {
        ComposedRequest {
            method: HttpMethod::Get,
            url: self.compose_url(path, query),
            headers: json_headers(),
            body: None,
        }
    }
}
