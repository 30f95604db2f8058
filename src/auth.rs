//! Basic authentication for the SAP host.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

use crate::config::Config;
use crate::sanitize::Redactor;

/// Basic credentials derived from configuration.
///
/// The header value is computed once; `Debug` never prints it.
#[derive(Clone)]
pub struct BasicAuth {
    username: String,
    token: String,
}

impl BasicAuth {
    pub fn new(username: &str, password: &str) -> Self {
        let credentials = format!("{}:{}", username, password);
        Self {
            username: username.to_string(),
            token: BASE64.encode(credentials.as_bytes()),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.username, &config.password)
    }

    /// Value for the `Authorization` header.
    pub fn header_value(&self) -> String {
        format!("Basic {}", self.token)
    }

    /// A redactor that knows this token and the configured password.
    pub fn redactor(&self, config: &Config) -> Redactor {
        Redactor::new([config.password.clone(), self.token.clone()])
    }
}

impl std::fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicAuth")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}
