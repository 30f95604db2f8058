//! Uniform result envelope and the normalizer that produces it.

use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{NetworkError, QueryBuildError, ResponseFormatError};
use crate::sanitize::{contains_stack_trace, truncate_chars, Redactor};

const MAX_ERROR_CHARS: usize = 300;
const MAX_DETAIL_CHARS: usize = 200;
const MAX_DETAIL_ITEMS: usize = 5;

/// Status and body of an HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

/// Outcome of one bridged request. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEnvelope {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<String>,
}

impl ResultEnvelope {
    /// Caller input was refused before any network call.
    pub fn rejected(error: &QueryBuildError) -> Self {
        Self {
            success: false,
            status_code: None,
            data: None,
            error: Some(error.to_string()),
            details: None,
            url: None,
        }
    }

    #[cfg(test)]
    pub fn success(&self) -> bool {
        self.success
    }

    #[cfg(test)]
    pub fn status_code(&self) -> Option<u16> {
        self.status_code
    }

    #[cfg(test)]
    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    #[cfg(test)]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    #[cfg(test)]
    pub fn details(&self) -> Option<&str> {
        self.details.as_deref()
    }

    #[cfg(test)]
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    /// Reshape the data of a successful envelope into a new envelope.
    pub fn map_data<F>(self, f: F) -> Self
    where
        F: FnOnce(Value) -> Value,
    {
        if !self.success {
            return self;
        }
        Self {
            data: Some(f(self.data.unwrap_or(Value::Null))),
            ..self
        }
    }
}

/// OData v2/v4 error payload. `innererror` is not modelled.
#[derive(Debug, Deserialize)]
struct SapErrorResponse {
    error: SapErrorBody,
}

#[derive(Debug, Deserialize)]
struct SapErrorBody {
    #[serde(default)]
    code: Option<String>,
    message: SapMessage,
    #[serde(default)]
    details: Vec<SapErrorDetail>,
}

/// v2 wraps the text as `{"lang":..,"value":..}`, v4 uses a plain string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SapMessage {
    Plain(String),
    Localized { value: String },
}

impl SapMessage {
    fn text(&self) -> &str {
        match self {
            SapMessage::Plain(text) => text,
            SapMessage::Localized { value } => value,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SapErrorDetail {
    #[serde(default)]
    message: Option<String>,
}

/// Maps every outcome into a [`ResultEnvelope`]. Never fails.
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    redactor: Redactor,
}

impl Normalizer {
    pub fn new(redactor: Redactor) -> Self {
        Self { redactor }
    }

    pub fn normalize(&self, url: &str, outcome: Result<RawResponse, NetworkError>) -> ResultEnvelope {
        let url = Some(strip_userinfo(url));
        match outcome {
            Ok(raw) if (200..300).contains(&raw.status) => match parse_body(&raw.body) {
                Ok(data) => ResultEnvelope {
                    success: true,
                    status_code: Some(raw.status),
                    data: Some(data),
                    error: None,
                    details: None,
                    url,
                },
                Err(e) => ResultEnvelope {
                    success: false,
                    status_code: Some(raw.status),
                    data: None,
                    error: Some(e.to_string()),
                    details: Some(self.redactor.excerpt(&raw.body, MAX_DETAIL_CHARS)),
                    url,
                },
            },
            Ok(raw) => {
                let (error, details) = self.describe_http_error(&raw);
                ResultEnvelope {
                    success: false,
                    status_code: Some(raw.status),
                    data: None,
                    error: Some(error),
                    details,
                    url,
                }
            }
            Err(e) => ResultEnvelope {
                success: false,
                status_code: None,
                data: None,
                error: Some(e.to_string()),
                details: Some(network_details(&e).to_string()),
                url,
            },
        }
    }

    fn describe_http_error(&self, raw: &RawResponse) -> (String, Option<String>) {
        let generic = generic_status_message(raw.status);

        let Ok(payload) = serde_json::from_str::<SapErrorResponse>(&raw.body) else {
            let details = (!raw.body.trim().is_empty()).then(|| {
                format!(
                    "{} bytes of unstructured error content omitted",
                    raw.body.len()
                )
            });
            return (generic, details);
        };

        let message = self.clean_line(payload.error.message.text(), MAX_ERROR_CHARS);
        let error = if message.is_empty() { generic } else { message };

        let mut parts = Vec::new();
        if let Some(code) = payload.error.code.as_deref().filter(|c| !c.is_empty()) {
            parts.push(format!(
                "SAP error code {}",
                self.clean_line(code, MAX_DETAIL_CHARS)
            ));
        }
        parts.extend(
            payload
                .error
                .details
                .iter()
                .filter_map(|d| d.message.as_deref())
                .map(|m| self.clean_line(m, MAX_DETAIL_CHARS))
                .filter(|m| !m.is_empty())
                .take(MAX_DETAIL_ITEMS),
        );

        let details = (!parts.is_empty()).then(|| parts.join("; "));
        (error, details)
    }

    /// First line only, secrets redacted, bounded length. Empty when the
    /// line carries stack-trace text.
    fn clean_line(&self, text: &str, max_chars: usize) -> String {
        let first = text.lines().next().unwrap_or_default().trim();
        if contains_stack_trace(first) {
            return String::new();
        }
        truncate_chars(&self.redactor.redact(first), max_chars)
    }
}

fn parse_body(body: &str) -> Result<Value, ResponseFormatError> {
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(body).map_err(|_| ResponseFormatError)
}

fn generic_status_message(status: u16) -> String {
    match StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
    {
        Some(reason) => format!("HTTP {} {}", status, reason),
        None => format!("HTTP {}", status),
    }
}

fn network_details(error: &NetworkError) -> &'static str {
    match error {
        NetworkError::Timeout => "No response from the SAP host within the request timeout",
        NetworkError::ConnectionFailed => "The connection to the SAP host failed or was reset",
        NetworkError::Unreachable => "The SAP host could not be resolved or reached",
    }
}

/// Drop any `user:password@` part from a URL.
fn strip_userinfo(url: &str) -> String {
    match Url::parse(url) {
        Ok(mut parsed) if !parsed.username().is_empty() || parsed.password().is_some() => {
            let _ = parsed.set_username("");
            let _ = parsed.set_password(None);
            parsed.to_string()
        }
        _ => url.to_string(),
    }
}
