//! Unified error types for the SAP OData MCP Server.

use thiserror::Error;

/// Configuration-related errors. Fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required field(s): {}", .0.join(", "))]
    MissingFields(Vec<String>),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Caller input that cannot be turned into a safe OData request.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueryBuildError {
    #[error("service_path must be a relative path on the configured SAP host: {0}")]
    AbsolutePath(String),

    #[error("Invalid service_path '{path}': {reason}")]
    InvalidPath { path: String, reason: &'static str },

    #[error("Invalid field name '{0}'")]
    InvalidField(String),

    #[error("Unsupported HTTP method '{0}' (expected GET, POST, PUT or DELETE)")]
    UnsupportedMethod(String),

    #[error("{0} request requires a data body")]
    MissingBody(&'static str),

    #[error("Header '{0}' cannot be set by the caller")]
    ForbiddenHeader(String),

    #[error("Invalid header '{0}'")]
    InvalidHeader(String),

    #[error("Search description must not be empty")]
    EmptySearch,

    #[error("Entity key must not be empty")]
    EmptyKey,

    #[error("Unknown SAP service '{0}'")]
    UnknownService(String),

    #[error("Invalid service version '{0}' (expected four digits)")]
    InvalidServiceVersion(String),

    #[error("Provide either 'description' (search) or 'product' (direct key)")]
    MissingSearchInput,

    #[error("Invalid key_mode '{0}' (expected segment, paren or auto)")]
    InvalidKeyMode(String),
}

/// Transport-level failures. Never carries request headers or credentials.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("timeout")]
    Timeout,

    #[error("connection_failed")]
    ConnectionFailed,

    #[error("unreachable")]
    Unreachable,
}

/// SAP answered 2xx with a body that is not JSON.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("invalid response format")]
pub struct ResponseFormatError;

/// Failure to construct the outbound HTTP client.
#[derive(Debug, Error)]
#[error("Failed to create HTTP client: {0}")]
pub struct ClientInitError(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_missing_fields_display() {
        let error = ConfigError::MissingFields(vec!["SAP_HOST".into(), "AUTH_PASSWORD".into()]);
        assert_eq!(
            error.to_string(),
            "Missing required field(s): SAP_HOST, AUTH_PASSWORD"
        );
    }

    #[test]
    fn test_config_error_invalid_display() {
        let error = ConfigError::Invalid("SAP_PORT must be between 1 and 65535".to_string());
        assert_eq!(
            error.to_string(),
            "Invalid configuration: SAP_PORT must be between 1 and 65535"
        );
    }

    #[test]
    fn test_network_error_names_failure_class() {
        assert_eq!(NetworkError::Timeout.to_string(), "timeout");
        assert_eq!(NetworkError::ConnectionFailed.to_string(), "connection_failed");
        assert_eq!(NetworkError::Unreachable.to_string(), "unreachable");
    }

    #[test]
    fn test_query_build_error_absolute_path_display() {
        let error = QueryBuildError::AbsolutePath("http://evil.example/x".into());
        assert!(error.to_string().contains("http://evil.example/x"));
        assert!(error.to_string().contains("relative"));
    }

    #[test]
    fn test_query_build_error_missing_body_display() {
        assert_eq!(
            QueryBuildError::MissingBody("POST").to_string(),
            "POST request requires a data body"
        );
    }

    #[test]
    fn test_invalid_key_mode_display() {
        assert_eq!(
            QueryBuildError::InvalidKeyMode("sideways".into()).to_string(),
            "Invalid key_mode 'sideways' (expected segment, paren or auto)"
        );
    }

    #[test]
    fn test_response_format_error_display() {
        assert_eq!(ResponseFormatError.to_string(), "invalid response format");
    }

    #[test]
    fn test_client_init_error_display() {
        let error = ClientInitError("TLS error".to_string());
        assert_eq!(error.to_string(), "Failed to create HTTP client: TLS error");
    }

    #[test]
    fn test_config_error_debug_format() {
        let error = ConfigError::MissingFields(vec!["SAP_CLIENT".into()]);
        let debug = format!("{:?}", error);
        assert!(debug.contains("MissingFields"));
        assert!(debug.contains("SAP_CLIENT"));
    }
}
