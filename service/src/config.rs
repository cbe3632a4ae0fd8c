use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Deserializer, Serialize};
use serde_aux::prelude::deserialize_vec_from_string_or_vec;

use crate::http::origin::PreviewPattern;

/// Application configuration loaded from multiple sources.
///
/// Configuration is loaded in priority order (lowest to highest):
/// 1. Struct defaults
/// 2. config.yaml file (if exists)
/// 3. Environment variables with MD_ prefix (always wins)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub environment: Environment,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    #[serde(default)]
    pub cors: CorsConfig,
    #[serde(default)]
    pub security_headers: SecurityHeadersConfig,
    #[serde(default)]
    pub request_log: RequestLogConfig,
    #[serde(default)]
    pub static_files: StaticFilesConfig,
}

/// Deployment environment the process runs in.
///
/// Production refuses to start without an explicit CORS allow-list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    #[serde(alias = "dev")]
    Development,
    #[serde(alias = "prod")]
    Production,
}

impl Environment {
    #[must_use]
    pub const fn is_production(self) -> bool {
        matches!(self, Self::Production)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// HTTP server port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// HTTP server bind address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Number of reverse-proxy hops whose `X-Forwarded-For` entries are trusted.
    /// `0` means the socket peer address is the client IP.
    #[serde(default = "default_trust_proxy_hops")]
    pub trust_proxy_hops: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level filter (debug, info, warn, error) or any `EnvFilter` directive.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format for log lines.
    #[serde(default)]
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CorsConfig {
    /// Exact-match origins allowed to make credentialed cross-origin requests.
    /// Accepts either an array or comma-separated string.
    /// Example: `"http://localhost:5173,https://marrakechdunes.vercel.app"`
    #[serde(
        default = "default_allowed_origins",
        deserialize_with = "deserialize_origins"
    )]
    pub allowed_origins: Vec<String>,

    /// Optional wildcard pattern for preview deployments, with exactly one `*`
    /// inside the host, e.g. `https://marrakechdunes-*.vercel.app`.
    #[serde(default)]
    pub preview_domain: Option<String>,

    /// Production origins always trusted by the CSP `connect-src` directive.
    #[serde(
        default = "default_pinned_origins",
        deserialize_with = "deserialize_origins"
    )]
    pub pinned_origins: Vec<String>,
}

/// Deserialize origins from comma-separated string or array, trimming entries
/// and filtering empty values.
fn deserialize_origins<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let origins: Vec<String> = deserialize_vec_from_string_or_vec(deserializer)?;
    Ok(origins
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect())
}

// These functions cannot be const because serde uses function pointers for defaults
#[allow(clippy::missing_const_for_fn)]
fn default_port() -> u16 {
    5000
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

#[allow(clippy::missing_const_for_fn)]
fn default_trust_proxy_hops() -> usize {
    1
}

fn default_log_level() -> String {
    "info".to_string()
}

#[allow(clippy::missing_const_for_fn)]
fn default_allowed_origins() -> Vec<String> {
    // Empty here; the origin policy decides what an empty list means per environment.
    vec![]
}

fn default_pinned_origins() -> Vec<String> {
    vec!["https://marrakechdunes.vercel.app".to_string()]
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: default_allowed_origins(),
            preview_domain: None,
            pinned_origins: default_pinned_origins(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SecurityHeadersConfig {
    /// Enable security headers (default: true).
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Enable HSTS header (default: false, enable in production with HTTPS).
    #[serde(default)]
    pub hsts_enabled: bool,

    /// HSTS max-age in seconds (default: 31536000 = 1 year).
    #[serde(default = "default_hsts_max_age")]
    pub hsts_max_age: u64,

    /// Include subdomains in HSTS (default: true).
    #[serde(default = "default_true")]
    pub hsts_include_subdomains: bool,

    /// X-Frame-Options value: "DENY" or "SAMEORIGIN" (default: "DENY").
    #[serde(default = "default_frame_options")]
    pub frame_options: String,

    /// Base Content-Security-Policy directives. The `connect-src` directive is
    /// appended from the origin policy and must not appear here.
    #[serde(default = "default_csp")]
    pub content_security_policy: String,

    /// Endpoint browsers post CSP violation reports to. `None` disables reporting.
    #[serde(default = "default_csp_report_endpoint")]
    pub csp_report_endpoint: Option<String>,

    /// Referrer-Policy header value (default: "strict-origin-when-cross-origin").
    #[serde(default = "default_referrer_policy")]
    pub referrer_policy: String,
}

#[allow(clippy::missing_const_for_fn)]
fn default_true() -> bool {
    true
}

#[allow(clippy::missing_const_for_fn)]
fn default_hsts_max_age() -> u64 {
    31_536_000 // 1 year
}

fn default_frame_options() -> String {
    "DENY".to_string()
}

fn default_csp() -> String {
    [
        "default-src 'self'",
        "img-src 'self' data: blob: https://images.unsplash.com https://maps.googleapis.com https://maps.gstatic.com",
        "style-src 'self' 'unsafe-inline' https://fonts.googleapis.com",
        "font-src 'self' https://fonts.gstatic.com",
        "script-src 'self' https://maps.googleapis.com https://maps.gstatic.com",
        "frame-src 'self' https://www.google.com",
    ]
    .join("; ")
}

#[allow(clippy::unnecessary_wraps)]
fn default_csp_report_endpoint() -> Option<String> {
    Some("/api/csp-report".to_string())
}

fn default_referrer_policy() -> String {
    "strict-origin-when-cross-origin".to_string()
}

impl Default for SecurityHeadersConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            hsts_enabled: false,
            hsts_max_age: default_hsts_max_age(),
            hsts_include_subdomains: default_true(),
            frame_options: default_frame_options(),
            content_security_policy: default_csp(),
            csp_report_endpoint: default_csp_report_endpoint(),
            referrer_policy: default_referrer_policy(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RequestLogConfig {
    /// Emit one structured log entry per request (default: true).
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Path prefix whose JSON responses are captured into the log entry.
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,

    /// Captured bodies larger than this are logged as a truncated preview.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_api_prefix() -> String {
    "/api".to_string()
}

#[allow(clippy::missing_const_for_fn)]
fn default_max_body_bytes() -> usize {
    16 * 1024
}

impl Default for RequestLogConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            api_prefix: default_api_prefix(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StaticFilesConfig {
    /// Directory served under `/attached_assets`. `None` disables the route.
    #[serde(default = "default_assets_dir")]
    pub assets_dir: Option<String>,

    /// Built client bundle served for every unmatched path, with `index.html`
    /// fallback. Usually only set in production.
    #[serde(default)]
    pub client_dist: Option<String>,
}

#[allow(clippy::unnecessary_wraps)]
fn default_assets_dir() -> Option<String> {
    Some("attached_assets".to_string())
}

impl Default for StaticFilesConfig {
    fn default() -> Self {
        Self {
            assets_dir: default_assets_dir(),
            client_dist: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            environment: Environment::default(),
            server: ServerConfig {
                port: default_port(),
                host: default_host(),
                trust_proxy_hops: default_trust_proxy_hops(),
            },
            logging: LoggingConfig {
                level: default_log_level(),
                format: LogFormat::default(),
            },
            cors: CorsConfig::default(),
            security_headers: SecurityHeadersConfig::default(),
            request_log: RequestLogConfig::default(),
            static_files: StaticFilesConfig::default(),
        }
    }
}

/// Configuration loading and validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Figment(#[from] Box<figment::Error>),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// Sources are merged in priority order:
    /// 1. Struct defaults (lowest)
    /// 2. config.yaml file (if exists)
    /// 3. Environment variables with MD_ prefix (highest)
    ///
    /// # Errors
    /// Returns an error if configuration cannot be loaded or is invalid.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config.yaml")
    }

    /// Load configuration with a custom YAML file path.
    ///
    /// # Errors
    /// Returns an error if configuration cannot be loaded or is invalid.
    pub fn load_from(yaml_path: &str) -> Result<Self, ConfigError> {
        let config: Self = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Yaml::file(yaml_path))
            .merge(Env::prefixed("MD_").split("__"))
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// Whether an empty allow-list is acceptable depends on the environment and
    /// is decided when the origin policy is built, not here.
    ///
    /// # Errors
    /// Returns an error if any configuration value is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Port must be non-zero
        if self.server.port == 0 {
            return Err(ConfigError::Validation("server.port cannot be 0".into()));
        }

        if tracing_subscriber::EnvFilter::try_new(&self.logging.level).is_err() {
            return Err(ConfigError::Validation(format!(
                "logging.level '{}' is not a valid log filter",
                self.logging.level
            )));
        }

        // Credentialed CORS forbids "*"; every origin must be an http(s) URL
        let origin_lists = [
            ("cors.allowed_origins", &self.cors.allowed_origins),
            ("cors.pinned_origins", &self.cors.pinned_origins),
        ];
        for (key, origins) in origin_lists {
            for origin in origins {
                if !origin.starts_with("http://") && !origin.starts_with("https://") {
                    return Err(ConfigError::Validation(format!(
                        "{key} contains invalid origin '{origin}'. Must start with http:// or https://"
                    )));
                }
                if origin.contains('*') {
                    return Err(ConfigError::Validation(format!(
                        "{key} contains wildcard origin '{origin}'. Use cors.preview_domain for preview deployments"
                    )));
                }
            }
        }

        // Blank means unset, matching OriginPolicy::from_config
        if let Some(pattern) = self
            .cors
            .preview_domain
            .as_deref()
            .filter(|pattern| !pattern.trim().is_empty())
        {
            PreviewPattern::compile(pattern)
                .map_err(|e| ConfigError::Validation(format!("cors.preview_domain: {e}")))?;
        }

        // X-Frame-Options must be DENY or SAMEORIGIN
        let frame_opts = self.security_headers.frame_options.to_uppercase();
        if frame_opts != "DENY" && frame_opts != "SAMEORIGIN" {
            return Err(ConfigError::Validation(format!(
                "security_headers.frame_options must be 'DENY' or 'SAMEORIGIN', got: '{}'",
                self.security_headers.frame_options
            )));
        }

        let has_connect_src = self
            .security_headers
            .content_security_policy
            .split(';')
            .any(|directive| directive.trim_start().starts_with("connect-src"));
        if has_connect_src {
            return Err(ConfigError::Validation(
                "security_headers.content_security_policy must not set connect-src; it is derived from cors settings".into(),
            ));
        }

        if self.request_log.max_body_bytes == 0 {
            return Err(ConfigError::Validation(
                "request_log.max_body_bytes cannot be 0".into(),
            ));
        }

        if !self.request_log.api_prefix.starts_with('/') {
            return Err(ConfigError::Validation(format!(
                "request_log.api_prefix must start with '/', got: '{}'",
                self.request_log.api_prefix
            )));
        }

        Ok(())
    }
}
