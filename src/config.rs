//! Configuration management for the SAP OData MCP Server.

use std::collections::BTreeMap;
use std::env::VarError;
use std::ffi::OsString;
use std::time::Duration;

use reqwest::Url;
use serde::Serialize;

use crate::builder::validate_relative_path;
use crate::error::{ConfigError, QueryBuildError};
use crate::odata::ODataVersion;

const DEFAULT_TIMEOUT_SECONDS: u64 = 10;
const MAX_TIMEOUT_SECONDS: u64 = 60;

/// Required environment variables, in reporting order.
const REQUIRED_VARS: [&str; 5] = [
    "SAP_HOST",
    "SAP_PORT",
    "SAP_CLIENT",
    "AUTH_USERNAME",
    "AUTH_PASSWORD",
];

const OPTIONAL_VARS: [&str; 3] = ["ENVIRONMENT", "SAP_TIMEOUT_SECONDS", "SAP_DEBUG"];

const SERVICE_OVERRIDE_PREFIX: &str = "SAP_SERVICE_";

/// Deployment environment. Decides the TLS verification policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    /// Anything other than `production` is treated as development.
    fn parse(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()) {
            Some(v) if v == "production" => Environment::Production,
            _ => Environment::Development,
        }
    }

    pub fn verifies_certificates(&self) -> bool {
        matches!(self, Environment::Production)
    }
}

/// Connection configuration, resolved once at startup and never mutated.
#[derive(Clone)]
pub struct Config {
    /// `http` or `https`
    pub scheme: String,
    /// Host name without scheme or port
    pub host: String,
    pub port: u16,
    /// SAP client number, sent as `sap-client`
    pub client: String,
    pub username: String,
    pub password: String,
    pub environment: Environment,
    /// HTTP request timeout in seconds
    pub timeout_seconds: u64,
    /// Enable debug tracing
    pub debug: bool,
    /// `SAP_SERVICE_<NAME>` path overrides, keyed by lowercase service name
    pub service_overrides: BTreeMap<String, String>,
}

impl Config {
    /// Resolve configuration from the process environment.
    ///
    /// Unrelated variables that are not valid UTF-8 are ignored; a variable
    /// the server reads that is not valid UTF-8 is a `ConfigError`.
    pub fn from_env() -> Result<Self, ConfigError> {
        for key in REQUIRED_VARS.into_iter().chain(OPTIONAL_VARS) {
            if let Err(VarError::NotUnicode(_)) = std::env::var(key) {
                return Err(not_unicode(key));
            }
        }
        let overrides = service_overrides(std::env::vars_os())?;
        Self::resolve(|key| std::env::var(key).ok())?.with_service_overrides(overrides)
    }

    /// Resolve configuration from an arbitrary variable lookup.
    pub fn resolve<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Blank counts as missing; the password keeps its exact value.
        let raw = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let get = |key: &str| raw(key).map(|v| v.trim().to_string());

        let missing: Vec<String> = REQUIRED_VARS
            .into_iter()
            .filter(|key| get(*key).is_none())
            .map(|key| key.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(ConfigError::MissingFields(missing));
        }

        let required = |key: &str| get(key).ok_or_else(|| ConfigError::MissingFields(vec![key.to_string()]));

        let (scheme, host) = parse_host(&required("SAP_HOST")?)?;
        let port = parse_port(&required("SAP_PORT")?)?;

        let timeout_seconds = match get("SAP_TIMEOUT_SECONDS") {
            None => DEFAULT_TIMEOUT_SECONDS,
            Some(raw) => match raw.parse::<u64>() {
                Ok(secs) if (1..=MAX_TIMEOUT_SECONDS).contains(&secs) => secs,
                _ => {
                    return Err(ConfigError::Invalid(format!(
                        "SAP_TIMEOUT_SECONDS must be an integer between 1 and {}",
                        MAX_TIMEOUT_SECONDS
                    )))
                }
            },
        };

        let debug = get("SAP_DEBUG")
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Ok(Config {
            scheme,
            host,
            port,
            client: required("SAP_CLIENT")?,
            username: required("AUTH_USERNAME")?,
            password: raw("AUTH_PASSWORD")
                .ok_or_else(|| ConfigError::MissingFields(vec!["AUTH_PASSWORD".to_string()]))?,
            environment: Environment::parse(get("ENVIRONMENT").as_deref()),
            timeout_seconds,
            debug,
            service_overrides: BTreeMap::new(),
        })
    }

    /// Attach service path overrides and validate them.
    pub fn with_service_overrides<I>(mut self, overrides: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (name, path) in overrides {
            validate_relative_path(&path).map_err(|e| {
                ConfigError::Invalid(format!("SAP_SERVICE_{}: {}", name.to_ascii_uppercase(), e))
            })?;
            self.service_overrides.insert(name, path);
        }
        Ok(self)
    }

    /// `scheme://host[:port]`, port omitted only when it is the scheme default.
    pub fn base_url(&self) -> String {
        if Some(self.port) == default_port(&self.scheme) {
            format!("{}://{}", self.scheme, self.host)
        } else {
            format!("{}://{}:{}", self.scheme, self.host, self.port)
        }
    }

    /// Get timeout as Duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("base_url", &self.base_url())
            .field("client", &self.client)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("environment", &self.environment)
            .field("timeout_seconds", &self.timeout_seconds)
            .field("debug", &self.debug)
            .finish()
    }
}

fn not_unicode(key: &str) -> ConfigError {
    ConfigError::Invalid(format!("{} is not valid UTF-8", key))
}

/// `SAP_SERVICE_<NAME>` entries, keyed by lowercase service name.
fn service_overrides<I>(vars: I) -> Result<Vec<(String, String)>, ConfigError>
where
    I: IntoIterator<Item = (OsString, OsString)>,
{
    let mut overrides = Vec::new();
    for (key, value) in vars {
        let Some(key) = key.to_str() else { continue };
        let Some(name) = key.strip_prefix(SERVICE_OVERRIDE_PREFIX) else { continue };
        let value = value.into_string().map_err(|_| not_unicode(key))?;
        overrides.push((name.to_ascii_lowercase(), value));
    }
    Ok(overrides)
}

fn default_port(scheme: &str) -> Option<u16> {
    match scheme {
        "http" => Some(80),
        "https" => Some(443),
        _ => None,
    }
}

fn parse_host(raw: &str) -> Result<(String, String), ConfigError> {
    let with_scheme = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("https://{}", raw)
    };

    let url = Url::parse(&with_scheme)
        .map_err(|e| ConfigError::Invalid(format!("SAP_HOST is not a valid URL: {}", e)))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::Invalid(format!(
            "SAP_HOST scheme must be http or https, got '{}'",
            url.scheme()
        )));
    }
    if !url.username().is_empty() || url.password().is_some() {
        return Err(ConfigError::Invalid(
            "SAP_HOST must not embed credentials; use AUTH_USERNAME/AUTH_PASSWORD".into(),
        ));
    }
    if url.port().is_some() {
        return Err(ConfigError::Invalid(
            "SAP_HOST must not include a port; use SAP_PORT".into(),
        ));
    }
    if url.path() != "/" || url.query().is_some() || url.fragment().is_some() {
        return Err(ConfigError::Invalid(
            "SAP_HOST must be scheme and host only".into(),
        ));
    }
    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| ConfigError::Invalid("SAP_HOST has no host".into()))?;

    Ok((url.scheme().to_string(), host.to_string()))
}

fn parse_port(raw: &str) -> Result<u16, ConfigError> {
    match raw.parse::<u32>() {
        Ok(port) if (1..=65535).contains(&port) => Ok(port as u16),
        _ => Err(ConfigError::Invalid(format!(
            "SAP_PORT must be an integer between 1 and 65535, got '{}'",
            raw
        ))),
    }
}

/// Logical SAP service the bridge can address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceDescriptor {
    pub name: String,
    /// Relative base path on the SAP host
    pub path: String,
    pub version: ODataVersion,
}

impl ServiceDescriptor {
    pub fn new(name: &str, path: &str, version: ODataVersion) -> Self {
        Self {
            name: name.to_string(),
            path: path.to_string(),
            version,
        }
    }
}

pub const BUSINESS_PARTNER: &str = "business_partner";
pub const PRODUCT_DESCRIPTION: &str = "product_description";
pub const SALES_ORDER: &str = "sales_order";

/// Product description service path for a given service version.
pub fn product_description_path(version: &str) -> String {
    format!(
        "sap/opu/odata4/sap/api_product/srvd_a2x/sap/product/{}/ProductDescription",
        version
    )
}

/// Immutable registry of service descriptors, built at startup.
#[derive(Debug, Clone)]
pub struct ServiceRegistry {
    services: BTreeMap<String, ServiceDescriptor>,
}

impl ServiceRegistry {
    pub fn from_config(config: &Config) -> Self {
        let builtins = [
            ServiceDescriptor::new(
                BUSINESS_PARTNER,
                "sap/opu/odata/sap/API_BUSINESS_PARTNER/A_Customer",
                ODataVersion::V2,
            ),
            ServiceDescriptor::new(
                PRODUCT_DESCRIPTION,
                &product_description_path("0002"),
                ODataVersion::V4,
            ),
            ServiceDescriptor::new(
                SALES_ORDER,
                "sap/opu/odata/sap/API_SALES_ORDER_SRV/A_SalesOrder",
                ODataVersion::V2,
            ),
        ];

        let services = builtins
            .into_iter()
            .map(|mut descriptor| {
                if let Some(path) = config.service_overrides.get(&descriptor.name) {
                    descriptor.path = path.clone();
                }
                (descriptor.name.clone(), descriptor)
            })
            .collect();

        Self { services }
    }

    pub fn get(&self, name: &str) -> Result<&ServiceDescriptor, QueryBuildError> {
        self.services
            .get(name)
            .ok_or_else(|| QueryBuildError::UnknownService(name.to_string()))
    }

    pub fn all(&self) -> impl Iterator<Item = &ServiceDescriptor> {
        self.services.values()
    }
}

#[cfg(test)]
pub(crate) fn test_config(host: &str, port: u16) -> Config {
    Config {
        scheme: if host.starts_with("http://") { "http" } else { "https" }.to_string(),
        host: host
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .to_string(),
        port,
        client: "100".to_string(),
        username: "bridge_user".to_string(),
        password: "s3cr3t-P@ss".to_string(),
        environment: Environment::Development,
        timeout_seconds: 10,
        debug: false,
        service_overrides: BTreeMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn complete() -> HashMap<String, String> {
        vars(&[
            ("SAP_HOST", "https://sap.example.com"),
            ("SAP_PORT", "44300"),
            ("SAP_CLIENT", "100"),
            ("AUTH_USERNAME", "user"),
            ("AUTH_PASSWORD", "pw"),
        ])
    }

    fn resolve(env: &HashMap<String, String>) -> Result<Config, ConfigError> {
        Config::resolve(|k| env.get(k).cloned())
    }

    #[test]
    fn test_resolves_complete_environment() {
        let config = resolve(&complete()).unwrap();
        assert_eq!(config.scheme, "https");
        assert_eq!(config.host, "sap.example.com");
        assert_eq!(config.port, 44300);
        assert_eq!(config.client, "100");
        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.timeout(), Duration::from_secs(10));
        assert!(!config.debug);
    }

    #[test]
    fn test_reports_all_missing_fields() {
        let env = vars(&[("SAP_HOST", "https://h"), ("SAP_CLIENT", "  ")]);
        match resolve(&env) {
            Err(ConfigError::MissingFields(fields)) => assert_eq!(
                fields,
                vec!["SAP_PORT", "SAP_CLIENT", "AUTH_USERNAME", "AUTH_PASSWORD"]
            ),
            other => panic!("expected MissingFields, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_out_of_range_port() {
        for bad in ["0", "65536", "-1", "https", "443x"] {
            let mut env = complete();
            env.insert("SAP_PORT".into(), bad.into());
            assert!(
                matches!(resolve(&env), Err(ConfigError::Invalid(_))),
                "port: {bad}"
            );
        }
    }

    #[test]
    fn test_environment_flag_is_permissive() {
        for (value, expected) in [
            ("production", Environment::Production),
            ("PRODUCTION", Environment::Production),
            ("development", Environment::Development),
            ("staging", Environment::Development),
        ] {
            let mut env = complete();
            env.insert("ENVIRONMENT".into(), value.into());
            assert_eq!(resolve(&env).unwrap().environment, expected, "value: {value}");
        }
        assert!(Environment::Production.verifies_certificates());
        assert!(!Environment::Development.verifies_certificates());
    }

    #[test]
    fn test_host_without_scheme_defaults_to_https() {
        let mut env = complete();
        env.insert("SAP_HOST".into(), "sap.example.com/".into());
        let config = resolve(&env).unwrap();
        assert_eq!(config.scheme, "https");
        assert_eq!(config.host, "sap.example.com");
    }

    #[test]
    fn test_host_validation() {
        for bad in [
            "ftp://sap.example.com",
            "https://user:pw@sap.example.com",
            "https://sap.example.com:8443",
            "https://sap.example.com/sap/opu",
            "https://sap.example.com?x=1",
        ] {
            let mut env = complete();
            env.insert("SAP_HOST".into(), bad.into());
            assert!(
                matches!(resolve(&env), Err(ConfigError::Invalid(_))),
                "host: {bad}"
            );
        }
    }

    #[test]
    fn test_timeout_bounds() {
        let mut env = complete();
        env.insert("SAP_TIMEOUT_SECONDS".into(), "5".into());
        assert_eq!(resolve(&env).unwrap().timeout_seconds, 5);

        for bad in ["0", "61", "soon"] {
            env.insert("SAP_TIMEOUT_SECONDS".into(), bad.into());
            assert!(matches!(resolve(&env), Err(ConfigError::Invalid(_))));
        }
    }

    #[test]
    fn test_base_url_omits_only_default_port() {
        assert_eq!(test_config("https://h", 443).base_url(), "https://h");
        assert_eq!(test_config("https://h", 44360).base_url(), "https://h:44360");
        assert_eq!(test_config("http://h", 80).base_url(), "http://h");
        assert_eq!(test_config("http://h", 443).base_url(), "http://h:443");
        assert_eq!(test_config("https://h", 80).base_url(), "https://h:80");
    }

    #[test]
    fn test_debug_output_hides_password() {
        let config = resolve(&complete()).unwrap();
        let debug = format!("{:?}", config);
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains("\"pw\""));
    }

    #[test]
    fn test_registry_builtins_and_overrides() {
        let config = resolve(&complete())
            .unwrap()
            .with_service_overrides([(
                "business_partner".to_string(),
                "sap/opu/odata/sap/API_BUSINESS_PARTNER/A_BusinessPartner".to_string(),
            )])
            .unwrap();
        let registry = ServiceRegistry::from_config(&config);

        let bp = registry.get(BUSINESS_PARTNER).unwrap();
        assert_eq!(bp.path, "sap/opu/odata/sap/API_BUSINESS_PARTNER/A_BusinessPartner");
        assert_eq!(bp.version, ODataVersion::V2);

        let product = registry.get(PRODUCT_DESCRIPTION).unwrap();
        assert_eq!(product.version, ODataVersion::V4);
        assert!(product.path.contains("/product/0002/"));

        assert_eq!(registry.all().count(), 3);
        assert_eq!(
            registry.get("material_stock"),
            Err(QueryBuildError::UnknownService("material_stock".into()))
        );
    }

    #[test]
    fn test_password_is_not_trimmed() {
        let mut env = complete();
        env.insert("AUTH_PASSWORD".into(), "  pw with spaces ".into());
        env.insert("AUTH_USERNAME".into(), " user ".into());
        let config = resolve(&env).unwrap();
        assert_eq!(config.password, "  pw with spaces ");
        assert_eq!(config.username, "user");

        env.insert("AUTH_PASSWORD".into(), "   ".into());
        assert!(matches!(resolve(&env), Err(ConfigError::MissingFields(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_service_overrides_skip_unrelated_non_utf8_vars() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let junk = OsStr::from_bytes(b"\xff\xfe").to_os_string();
        let vars = vec![
            (OsString::from("SOME_JUNK"), junk.clone()),
            (junk.clone(), OsString::from("x")),
            (
                OsString::from("SAP_SERVICE_SALES_ORDER"),
                OsString::from("sap/opu/odata/sap/API_SALES_ORDER_SRV/A_SalesOrderItem"),
            ),
        ];
        assert_eq!(
            service_overrides(vars).unwrap(),
            vec![(
                "sales_order".to_string(),
                "sap/opu/odata/sap/API_SALES_ORDER_SRV/A_SalesOrderItem".to_string()
            )]
        );

        let bad = vec![(OsString::from("SAP_SERVICE_SALES_ORDER"), junk)];
        assert!(matches!(service_overrides(bad), Err(ConfigError::Invalid(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_from_env_does_not_panic_on_non_utf8_environment() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        std::env::set_var("SAP_ODATA_MCP_TEST_JUNK", OsStr::from_bytes(b"\xff\xfe"));
        let outcome = std::panic::catch_unwind(Config::from_env);
        std::env::remove_var("SAP_ODATA_MCP_TEST_JUNK");
        assert!(outcome.is_ok());
    }

    #[test]
    fn test_override_must_be_relative() {
        let result = resolve(&complete())
            .unwrap()
            .with_service_overrides([("sales_order".to_string(), "https://evil/x".to_string())]);
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }
}
