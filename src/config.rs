//! Configuration management for Turnstile.

use serde::{Deserialize, Serialize};
use axum::http::{HeaderName, HeaderValue, Method};
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{Result, TurnstileError};

/// Prefix for environment variable overrides, e.g.
/// `TURNSTILE__RATE_LIMITING__BURST=40`.
const ENV_PREFIX: &str = "TURNSTILE";

/// Main configuration for the Turnstile service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnstileConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,

    /// Cross-origin resource sharing configuration
    #[serde(default)]
    pub cors: CorsConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Sustained requests per second admitted per client
    #[serde(default = "default_rate")]
    pub rate: f64,

    /// Maximum instantaneous allowance per client (bucket capacity)
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Seconds between full visitor registry resets
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Resolve client identity from a forwarding header instead of the peer address
    #[serde(default)]
    pub trust_proxy_header: bool,

    /// Header carrying the forwarded client address
    #[serde(default = "default_proxy_header")]
    pub proxy_header: String,

    /// Peers allowed to set the forwarding header. Empty means any peer.
    #[serde(default)]
    pub trusted_proxies: Vec<IpAddr>,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            rate: default_rate(),
            burst: default_burst(),
            sweep_interval_secs: default_sweep_interval(),
            trust_proxy_header: false,
            proxy_header: default_proxy_header(),
            trusted_proxies: Vec::new(),
        }
    }
}

fn default_rate() -> f64 {
    10.0
}

fn default_burst() -> u32 {
    20
}

fn default_sweep_interval() -> u64 {
    300
}

fn default_proxy_header() -> String {
    "x-forwarded-for".to_string()
}

impl RateLimitingConfig {
    /// Interval between registry sweeps.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Check that the limiter can be built from these values.
    pub fn validate(&self) -> Result<()> {
        if !self.rate.is_finite() || self.rate <= 0.0 {
            return Err(TurnstileError::Config(format!(
                "rate must be a positive number, got {}",
                self.rate
            )));
        }
        if self.burst == 0 {
            return Err(TurnstileError::Config(
                "burst must be at least 1".to_string(),
            ));
        }
        if self.sweep_interval_secs == 0 {
            return Err(TurnstileError::Config(
                "sweep_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.trust_proxy_header && self.proxy_header.trim().is_empty() {
            return Err(TurnstileError::Config(
                "proxy_header must be set when trust_proxy_header is enabled".to_string(),
            ));
        }
        Ok(())
    }
}

/// Cross-origin resource sharing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Origins allowed to make cross-origin requests
    #[serde(default = "default_cors_origins")]
    pub allowed_origins: Vec<String>,

    /// Methods allowed in cross-origin requests
    #[serde(default = "default_cors_methods")]
    pub allowed_methods: Vec<String>,

    /// Request headers allowed in cross-origin requests
    #[serde(default = "default_cors_headers")]
    pub allowed_headers: Vec<String>,

    /// Response headers exposed to the browser
    #[serde(default = "default_cors_exposed_headers")]
    pub exposed_headers: Vec<String>,

    /// Whether credentials may be sent
    #[serde(default = "default_cors_credentials")]
    pub allow_credentials: bool,

    /// How long browsers may cache a preflight response, in seconds
    #[serde(default = "default_cors_max_age")]
    pub max_age_secs: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: default_cors_origins(),
            allowed_methods: default_cors_methods(),
            allowed_headers: default_cors_headers(),
            exposed_headers: default_cors_exposed_headers(),
            allow_credentials: default_cors_credentials(),
            max_age_secs: default_cors_max_age(),
        }
    }
}

fn default_cors_origins() -> Vec<String> {
    vec![
        "http://localhost:5173".to_string(),
        "http://localhost:3000".to_string(),
    ]
}

fn default_cors_methods() -> Vec<String> {
    ["GET", "POST", "PUT", "DELETE", "OPTIONS"]
        .iter()
        .map(|m| m.to_string())
        .collect()
}

fn default_cors_headers() -> Vec<String> {
    ["Origin", "Content-Type", "Accept", "Authorization"]
        .iter()
        .map(|h| h.to_string())
        .collect()
}

fn default_cors_exposed_headers() -> Vec<String> {
    vec!["Content-Length".to_string()]
}

fn default_cors_credentials() -> bool {
    true
}

fn default_cors_max_age() -> u64 {
    12 * 60 * 60
}

impl CorsConfig {
    /// Preflight cache lifetime.
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    /// Allowed origins as header values.
    pub fn origins(&self) -> Result<Vec<HeaderValue>> {
        self.allowed_origins
            .iter()
            .map(|origin| {
                if origin.trim() == "*" {
                    return Err(TurnstileError::Config(
                        "wildcard CORS origin is not supported; list origins explicitly".to_string(),
                    ));
                }
                HeaderValue::from_str(origin.trim()).map_err(|e| {
                    TurnstileError::Config(format!("invalid CORS origin {:?}: {}", origin, e))
                })
            })
            .collect()
    }

    /// Allowed methods.
    pub fn methods(&self) -> Result<Vec<Method>> {
        self.allowed_methods
            .iter()
            .map(|method| {
                Method::from_bytes(method.trim().to_ascii_uppercase().as_bytes()).map_err(|e| {
                    TurnstileError::Config(format!("invalid CORS method {:?}: {}", method, e))
                })
            })
            .collect()
    }

    /// Allowed request headers.
    pub fn headers(&self) -> Result<Vec<HeaderName>> {
        parse_header_names(&self.allowed_headers)
    }

    /// Exposed response headers.
    pub fn exposed(&self) -> Result<Vec<HeaderName>> {
        parse_header_names(&self.exposed_headers)
    }

    /// Check that every entry parses.
    pub fn validate(&self) -> Result<()> {
        self.origins()?;
        self.methods()?;
        self.headers()?;
        self.exposed()?;
        Ok(())
    }
}

fn parse_header_names(names: &[String]) -> Result<Vec<HeaderName>> {
    names
        .iter()
        .map(|name| {
            HeaderName::from_bytes(name.trim().as_bytes()).map_err(|e| {
                TurnstileError::Config(format!("invalid CORS header {:?}: {}", name, e))
            })
        })
        .collect()
}

impl TurnstileConfig {
    /// Parse and validate configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: TurnstileConfig = serde_yaml::from_str(yaml)
            .map_err(|e| TurnstileError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from an optional file layered with
    /// `TURNSTILE__*` environment variables.
    ///
    /// List keys take comma-separated values, e.g.
    /// `TURNSTILE__RATE_LIMITING__TRUSTED_PROXIES=10.0.0.1,10.0.0.2`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(config::File::from(path));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("rate_limiting.trusted_proxies")
                .with_list_parse_key("cors.allowed_origins")
                .with_list_parse_key("cors.allowed_methods")
                .with_list_parse_key("cors.allowed_headers")
                .with_list_parse_key("cors.exposed_headers"),
        );

        let config: TurnstileConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| TurnstileError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Replace the listen address when one was given on the command line.
    pub fn override_listen(&mut self, listen: Option<SocketAddr>) {
        if let Some(addr) = listen {
            self.server.http_addr = addr;
        }
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<()> {
        self.rate_limiting.validate()?;
        self.cors.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_deployment() {
        let config = TurnstileConfig::default();
        assert_eq!(config.server.http_addr.port(), 8080);
        assert_eq!(config.rate_limiting.rate, 10.0);
        assert_eq!(config.rate_limiting.burst, 20);
        assert_eq!(
            config.rate_limiting.sweep_interval(),
            Duration::from_secs(300)
        );
        assert!(!config.rate_limiting.trust_proxy_header);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_yaml() {
        let yaml = r#"
rate_limiting:
  rate: 2.5
  burst: 5
"#;
        let config = TurnstileConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.rate_limiting.rate, 2.5);
        assert_eq!(config.rate_limiting.burst, 5);
        assert_eq!(config.rate_limiting.sweep_interval_secs, 300);
        assert_eq!(config.rate_limiting.proxy_header, "x-forwarded-for");
    }

    #[test]
    fn test_parse_proxy_settings() {
        let yaml = r#"
server:
  http_addr: "127.0.0.1:9000"
rate_limiting:
  trust_proxy_header: true
  proxy_header: x-real-ip
  trusted_proxies:
    - 10.0.0.1
    - "::1"
"#;
        let config = TurnstileConfig::from_yaml(yaml).unwrap();
        assert_eq!(
            config.server.http_addr,
            "127.0.0.1:9000".parse::<SocketAddr>().unwrap()
        );
        assert!(config.rate_limiting.trust_proxy_header);
        assert_eq!(config.rate_limiting.proxy_header, "x-real-ip");
        assert_eq!(config.rate_limiting.trusted_proxies.len(), 2);
    }

    #[test]
    fn test_rejects_non_positive_rate() {
        let result = TurnstileConfig::from_yaml("rate_limiting:\n  rate: 0\n");
        assert!(matches!(result, Err(TurnstileError::Config(_))));

        let result = TurnstileConfig::from_yaml("rate_limiting:\n  rate: -1.0\n");
        assert!(matches!(result, Err(TurnstileError::Config(_))));
    }

    #[test]
    fn test_rejects_zero_burst_and_interval() {
        let result = TurnstileConfig::from_yaml("rate_limiting:\n  burst: 0\n");
        assert!(matches!(result, Err(TurnstileError::Config(_))));

        let result = TurnstileConfig::from_yaml("rate_limiting:\n  sweep_interval_secs: 0\n");
        assert!(matches!(result, Err(TurnstileError::Config(_))));
    }

    #[test]
    fn test_rejects_empty_proxy_header_when_trusted() {
        let yaml = r#"
rate_limiting:
  trust_proxy_header: true
  proxy_header: ""
"#;
        assert!(TurnstileConfig::from_yaml(yaml).is_err());
    }

    /// Serializes tests that read `TURNSTILE__*` variables.
    static ENV_LOCK: parking_lot::Mutex<()> = parking_lot::const_mutex(());

    fn temp_config(name: &str, contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!(
            "turnstile-{}-{}.yaml",
            name,
            std::process::id()
        ));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_load_from_file() {
        let _env = ENV_LOCK.lock();
        let path = temp_config("file", "rate_limiting:\n  burst: 7\n  sweep_interval_secs: 60\n");

        let config = TurnstileConfig::load(Some(&path));
        std::fs::remove_file(&path).unwrap();

        let config = config.unwrap();
        assert_eq!(config.rate_limiting.burst, 7);
        assert_eq!(config.rate_limiting.sweep_interval_secs, 60);
    }

    #[test]
    fn test_env_overrides_file() {
        let _env = ENV_LOCK.lock();
        let path = temp_config(
            "env",
            "rate_limiting:\n  burst: 7\n  trusted_proxies:\n    - 192.168.0.1\n",
        );

        std::env::set_var("TURNSTILE__RATE_LIMITING__BURST", "40");
        std::env::set_var("TURNSTILE__RATE_LIMITING__TRUSTED_PROXIES", "10.0.0.1,10.0.0.2");
        std::env::set_var("TURNSTILE__CORS__ALLOWED_ORIGINS", "https://catalog.example");

        let config = TurnstileConfig::load(Some(&path));

        std::env::remove_var("TURNSTILE__RATE_LIMITING__BURST");
        std::env::remove_var("TURNSTILE__RATE_LIMITING__TRUSTED_PROXIES");
        std::env::remove_var("TURNSTILE__CORS__ALLOWED_ORIGINS");
        std::fs::remove_file(&path).unwrap();

        let config = config.unwrap();
        assert_eq!(config.rate_limiting.burst, 40);
        assert_eq!(
            config.rate_limiting.trusted_proxies,
            vec![
                "10.0.0.1".parse::<IpAddr>().unwrap(),
                "10.0.0.2".parse::<IpAddr>().unwrap()
            ]
        );
        assert_eq!(config.cors.allowed_origins, vec!["https://catalog.example"]);
        // Untouched keys keep their defaults
        assert_eq!(config.rate_limiting.sweep_interval_secs, 300);
    }

    #[test]
    fn test_load_missing_file_is_config_error() {
        let _env = ENV_LOCK.lock();
        let result = TurnstileConfig::load(Some(Path::new("/nonexistent/turnstile.yaml")));
        assert!(matches!(result, Err(TurnstileError::Config(_))));
    }

    #[test]
    fn test_override_listen() {
        let mut config = TurnstileConfig::default();

        config.override_listen(None);
        assert_eq!(config.server.http_addr.port(), 8080);

        let addr: SocketAddr = "127.0.0.1:9100".parse().unwrap();
        config.override_listen(Some(addr));
        assert_eq!(config.server.http_addr, addr);
    }

    #[test]
    fn test_cors_defaults() {
        let cors = CorsConfig::default();
        assert_eq!(cors.origins().unwrap().len(), 2);
        assert_eq!(cors.methods().unwrap().len(), 5);
        assert_eq!(cors.headers().unwrap().len(), 4);
        assert_eq!(cors.exposed().unwrap(), vec![HeaderName::from_static("content-length")]);
        assert!(cors.allow_credentials);
        assert_eq!(cors.max_age(), Duration::from_secs(43200));
    }

    #[test]
    fn test_rejects_invalid_cors_entries() {
        let result = TurnstileConfig::from_yaml("cors:\n  allowed_origins: [\"*\"]\n");
        assert!(matches!(result, Err(TurnstileError::Config(_))));

        let result = TurnstileConfig::from_yaml("cors:\n  allowed_headers: [\"bad header\"]\n");
        assert!(matches!(result, Err(TurnstileError::Config(_))));

        let result = TurnstileConfig::from_yaml("cors:\n  allowed_methods: [\"GE T\"]\n");
        assert!(matches!(result, Err(TurnstileError::Config(_))));
    }
}
