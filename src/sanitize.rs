//! Escaping of user input placed into OData expressions, and redaction of
//! secrets from anything that leaves the bridge.

use crate::error::QueryBuildError;

const REDACTED: &str = "[REDACTED]";

/// Shorter secrets are not substring-redacted; they would match ordinary words.
const MIN_SECRET_LEN: usize = 4;

/// Escape a value for use inside a single-quoted OData string literal.
///
/// Every `'` becomes `''`. Values are only ever placed inside quoted literals,
/// so this is sufficient to keep them from terminating the literal.
pub fn escape(raw: &str) -> String {
    raw.replace('\'', "''")
}

/// Validate a field name that is interpolated bare into a filter.
///
/// Accepts identifier paths such as `CustomerName` or `to_Partner/Name`.
pub fn validate_field(field: &str) -> Result<&str, QueryBuildError> {
    let valid = !field.is_empty()
        && field.split('/').all(|segment| {
            let mut chars = segment.chars();
            match chars.next() {
                Some(c) if c.is_ascii_alphabetic() || c == '_' => {
                    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
                }
                _ => false,
            }
        });

    if valid {
        Ok(field)
    } else {
        Err(QueryBuildError::InvalidField(field.to_string()))
    }
}

/// Removes known secrets and credential-looking fragments from text.
#[derive(Clone, Default)]
pub struct Redactor {
    secrets: Vec<String>,
}

impl Redactor {
    pub fn new<I, S>(secrets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut secrets: Vec<String> = secrets
            .into_iter()
            .map(Into::into)
            .filter(|s| s.chars().count() >= MIN_SECRET_LEN)
            .collect();
        // Longest first so a secret containing another is replaced whole.
        secrets.sort_by_key(|s| std::cmp::Reverse(s.len()));
        Self { secrets }
    }

    /// Redact configured secrets and `Authorization`/`password` fragments.
    pub fn redact(&self, text: &str) -> String {
        let mut out = text.to_string();
        for secret in &self.secrets {
            out = out.replace(secret.as_str(), REDACTED);
        }
        redact_credential_fragments(&out)
    }

    /// A short excerpt safe for an envelope's `details` field: stack-frame
    /// lines dropped, secrets redacted, at most `max_chars` characters.
    pub fn excerpt(&self, text: &str, max_chars: usize) -> String {
        let kept: Vec<&str> = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !looks_like_stack_frame(line))
            .collect();
        let redacted = self.redact(&kept.join(" "));
        truncate_chars(&redacted, max_chars)
    }
}

impl std::fmt::Debug for Redactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Redactor")
            .field("secrets", &self.secrets.len())
            .finish()
    }
}

/// Truncate to at most `max_chars` characters, marking the cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...(truncated)", &text[..idx]),
        None => text.to_string(),
    }
}

fn looks_like_stack_frame(line: &str) -> bool {
    let lower = line.to_ascii_lowercase();
    lower.starts_with("at ")
        || lower.starts_with("traceback")
        || lower.starts_with("file \"")
        || lower.starts_with("caused by")
        || lower.starts_with("...")
        || lower.contains("dump")
        || contains_stack_trace(line)
}

/// Whether a single line carries stack-trace text, such as an exception
/// name or an ` at pkg.Class.method(File.java:1)` frame.
pub fn contains_stack_trace(line: &str) -> bool {
    const MARKERS: [&str; 5] = [".java:", "exception", "stacktrace", "stack trace", "traceback"];

    let lower = line.to_ascii_lowercase();
    if MARKERS.iter().any(|m| lower.contains(m)) {
        return true;
    }
    lower
        .match_indices("at ")
        .filter(|(idx, _)| *idx == 0 || lower[..*idx].ends_with(char::is_whitespace))
        .any(|(idx, marker)| {
            let frame = lower[idx + marker.len()..]
                .split_whitespace()
                .next()
                .unwrap_or_default();
            (frame.contains('.') && frame.contains('(')) || frame.contains("=>")
        })
}

/// Replace the value following credential markers up to the next delimiter.
/// An auth scheme word after `authorization:` is kept, its credential is not.
fn redact_credential_fragments(text: &str) -> String {
    const MARKERS: [&str; 4] = ["authorization:", "authorization=", "password=", "password:"];
    const SCHEMES: [&str; 2] = ["basic ", "bearer "];

    let lower = text.to_ascii_lowercase();
    let mut cuts: Vec<(usize, usize)> = Vec::new();
    for marker in MARKERS {
        let mut from = 0;
        while let Some(pos) = lower[from..].find(marker) {
            let value_start = from + pos + marker.len();
            let mut start = skip_whitespace(text, value_start);
            if marker.starts_with("authorization") {
                if let Some(scheme) = SCHEMES.iter().find(|s| lower[start..].starts_with(*s)) {
                    start = skip_whitespace(text, start + scheme.len());
                }
            }
            let end = text[start..]
                .find(|c: char| c.is_whitespace() || matches!(c, '"' | '\'' | ',' | ';' | '&' | '}'))
                .map(|i| start + i)
                .unwrap_or(text.len());
            if end > start {
                cuts.push((start, end));
            }
            from = value_start;
        }
    }

    if cuts.is_empty() {
        return text.to_string();
    }

    cuts.sort_unstable();
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for (start, end) in cuts {
        if start < cursor {
            cursor = cursor.max(end);
            continue;
        }
        out.push_str(&text[cursor..start]);
        out.push_str(REDACTED);
        cursor = end;
    }
    out.push_str(&text[cursor..]);
    out
}

fn skip_whitespace(text: &str, from: usize) -> usize {
    let rest = &text[from..];
    from + (rest.len() - rest.trim_start().len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_doubles_single_quotes() {
        assert_eq!(escape("O'Brien"), "O''Brien");
        assert_eq!(escape("plain"), "plain");
        assert_eq!(escape(""), "");
    }

    #[test]
    fn test_escape_quote_count_doubles_exactly() {
        for input in ["'", "''", "a'b'c", "') or 1 eq 1 or ('", "x'''y", "ünï'cödé"] {
            let escaped = escape(input);
            let before = input.matches('\'').count();
            let after = escaped.matches('\'').count();
            assert_eq!(after, before * 2, "input: {input}");
            // Collapsing the doubled quotes gives the input back.
            assert_eq!(escaped.replace("''", "'"), input);
        }
    }

    #[test]
    fn test_escape_keeps_quotes_paired() {
        let escaped = escape("') or ('1' eq '1");
        // Within the literal every quote run has even length.
        for run in escaped.split(|c| c != '\'').filter(|r| !r.is_empty()) {
            assert_eq!(run.len() % 2, 0);
        }
    }

    #[test]
    fn test_validate_field_accepts_identifier_paths() {
        assert!(validate_field("CustomerName").is_ok());
        assert!(validate_field("_internal1").is_ok());
        assert!(validate_field("to_Partner/BusinessPartnerName").is_ok());
    }

    #[test]
    fn test_validate_field_rejects_expressions() {
        for bad in ["", "1abc", "Name eq 'x'", "Name)", "a//b", "Name,Other", "Na-me"] {
            assert_eq!(
                validate_field(bad),
                Err(QueryBuildError::InvalidField(bad.to_string())),
                "field: {bad}"
            );
        }
    }

    #[test]
    fn test_redactor_removes_configured_secrets() {
        let redactor = Redactor::new(["s3cr3t!", "dXNlcjpzM2NyM3Qh"]);
        let out = redactor.redact("login with s3cr3t! failed, token dXNlcjpzM2NyM3Qh");
        assert!(!out.contains("s3cr3t!"));
        assert!(!out.contains("dXNlcjpzM2NyM3Qh"));
        assert!(out.contains(REDACTED));
    }

    #[test]
    fn test_redactor_removes_credential_fragments() {
        let redactor = Redactor::default();
        let out = redactor.redact("Authorization: Basic Zm9vOmJhcg== rejected; password=hunter2&x=1");
        assert!(!out.contains("Zm9vOmJhcg=="));
        assert!(!out.contains("hunter2"));
        assert!(out.contains("x=1"));
    }

    #[test]
    fn test_redactor_ignores_empty_secrets() {
        let redactor = Redactor::new([""]);
        assert_eq!(redactor.redact("nothing here"), "nothing here");
    }

    #[test]
    fn test_short_secret_does_not_mangle_words() {
        let redactor = Redactor::new(["pw"]);
        assert_eq!(redactor.redact("upward move"), "upward move");
    }

    #[test]
    fn test_basic_as_plain_word_is_kept() {
        let redactor = Redactor::default();
        assert_eq!(
            redactor.redact("Basic data missing for material 42"),
            "Basic data missing for material 42"
        );
        assert_eq!(
            redactor.redact("Authorization: Basic Zm9vOmJhcg=="),
            "Authorization: Basic [REDACTED]"
        );
    }

    #[test]
    fn test_stack_trace_detection_on_one_line() {
        assert!(contains_stack_trace(
            "java.lang.IllegalStateException: bad at com.sap.gw.Core.exec(Core.java:77)"
        ));
        assert!(contains_stack_trace("failed at com.sap.gw.Core.exec(Core)"));
        assert!(contains_stack_trace("Dump at CL_X=>METHOD line 12"));
        assert!(!contains_stack_trace("Resource not found for segment 'A_Customer'"));
        assert!(!contains_stack_trace("Look at the sales order 4711"));
        assert!(!contains_stack_trace("Property 'Foo' unknown"));
    }

    #[test]
    fn test_excerpt_drops_stack_frames_and_truncates() {
        let redactor = Redactor::default();
        let body = "Bad gateway\n\tat com.sap.Foo.bar(Foo.java:42)\nat com.sap.Baz.run(Baz.java:7)\nretry later";
        let out = redactor.excerpt(body, 200);
        assert_eq!(out, "Bad gateway retry later");

        let long = "x".repeat(300);
        let out = redactor.excerpt(&long, 200);
        assert!(out.starts_with(&"x".repeat(200)));
        assert!(out.ends_with("...(truncated)"));
    }

    #[test]
    fn test_truncate_chars_respects_utf8_boundaries() {
        assert_eq!(truncate_chars("äöü", 2), "äö...(truncated)");
        assert_eq!(truncate_chars("äöü", 3), "äöü");
    }

    #[test]
    fn test_redactor_debug_hides_secrets() {
        let redactor = Redactor::new(["topsecret"]);
        let debug = format!("{:?}", redactor);
        assert!(!debug.contains("topsecret"));
    }
}
