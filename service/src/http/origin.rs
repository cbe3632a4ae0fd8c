//! Origin policy shared by the CORS layer and the CSP header.
//!
//! An [`OriginPolicy`] is built once at startup from [`CorsConfig`] and is
//! immutable afterwards. The same value answers per-request CORS decisions and
//! supplies the CSP `connect-src` list, so the two can never disagree.
//!
//! # Preview patterns
//!
//! Preview deployments get per-branch hostnames, so they are matched with a
//! wildcard origin such as `https://marrakechdunes-*.vercel.app`. The pattern
//! compiler follows these rules:
//!
//! - exactly one `*`, somewhere in the host (never the port) of an `http://`
//!   or `https://` origin;
//! - no path, query or fragment;
//! - every other character matches literally (dots included);
//! - `*` matches one or more of `[a-z0-9-]`, so it never spans a dot.

use regex::Regex;

use crate::config::{CorsConfig, Environment};

/// Allow-list used outside production when nothing is configured.
pub const DEV_DEFAULT_ORIGIN: &str = "http://localhost:5173";

const WILDCARD_EXPANSION: &str = "[a-z0-9-]+";

/// Errors raised while building an [`OriginPolicy`]. All of them are fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum OriginPolicyError {
    #[error("cors.allowed_origins is required in production (set MD_CORS__ALLOWED_ORIGINS)")]
    MissingAllowList,

    #[error("invalid preview pattern '{pattern}': {reason}")]
    InvalidPreviewPattern {
        pattern: String,
        reason: &'static str,
    },
}

/// Outcome of evaluating a request origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorsDecision {
    /// Echo the origin back with credentials allowed.
    Allow,
    /// Send no CORS headers; the browser blocks the response.
    Reject,
}

impl CorsDecision {
    #[must_use]
    pub const fn is_allowed(self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Compiled wildcard origin pattern for preview deployments.
#[derive(Debug, Clone)]
pub struct PreviewPattern {
    source: String,
    regex: Regex,
}

impl PreviewPattern {
    /// Compile a wildcard origin pattern.
    ///
    /// # Errors
    /// Returns [`OriginPolicyError::InvalidPreviewPattern`] if the pattern breaks
    /// any of the rules in the module docs.
    pub fn compile(pattern: &str) -> Result<Self, OriginPolicyError> {
        let invalid = |reason| OriginPolicyError::InvalidPreviewPattern {
            pattern: pattern.to_string(),
            reason,
        };

        let source = pattern.trim();
        let Some((scheme, host)) = source.split_once("://") else {
            return Err(invalid("must start with http:// or https://"));
        };
        if scheme != "http" && scheme != "https" {
            return Err(invalid("must start with http:// or https://"));
        }
        if host.contains(['/', '?', '#']) {
            return Err(invalid("must not contain a path, query or fragment"));
        }
        if host
            .split_once(':')
            .is_some_and(|(_, port)| port.contains('*'))
        {
            return Err(invalid("'*' must be in the host, not the port"));
        }

        let mut parts = source.split('*');
        let (Some(prefix), Some(suffix), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(invalid("must contain exactly one '*'"));
        };

        let expression = format!(
            "^{}{WILDCARD_EXPANSION}{}$",
            regex::escape(prefix),
            regex::escape(suffix)
        );
        let regex = Regex::new(&expression).map_err(|_| invalid("does not compile"))?;

        Ok(Self {
            source: source.to_string(),
            regex,
        })
    }

    #[must_use]
    pub fn matches(&self, origin: &str) -> bool {
        self.regex.is_match(origin)
    }

    /// The pattern as configured.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

/// Immutable origin policy built once at startup.
#[derive(Debug, Clone)]
pub struct OriginPolicy {
    allowed_origins: Vec<String>,
    preview: Option<PreviewPattern>,
    connect_src: Vec<String>,
}

impl OriginPolicy {
    /// Build a policy from already-validated parts.
    ///
    /// `pinned_origins` are appended to the allow-list for CSP purposes only;
    /// they do not grant CORS access on their own.
    #[must_use]
    pub fn new(
        allowed_origins: Vec<String>,
        preview: Option<PreviewPattern>,
        pinned_origins: &[String],
    ) -> Self {
        let mut connect_src: Vec<String> =
            Vec::with_capacity(allowed_origins.len() + pinned_origins.len());
        for origin in allowed_origins.iter().chain(pinned_origins) {
            if !connect_src.contains(origin) {
                connect_src.push(origin.clone());
            }
        }

        Self {
            allowed_origins,
            preview,
            connect_src,
        }
    }

    /// Build the policy for the given environment.
    ///
    /// An empty allow-list is a startup error in production and falls back to
    /// [`DEV_DEFAULT_ORIGIN`] everywhere else.
    ///
    /// # Errors
    /// Returns [`OriginPolicyError::MissingAllowList`] in production without an
    /// allow-list, or [`OriginPolicyError::InvalidPreviewPattern`].
    pub fn from_config(
        config: &CorsConfig,
        environment: Environment,
    ) -> Result<Self, OriginPolicyError> {
        let allowed_origins: Vec<String> = config
            .allowed_origins
            .iter()
            .map(|origin| origin.trim())
            .filter(|origin| !origin.is_empty())
            .map(str::to_string)
            .collect();

        let allowed_origins = if allowed_origins.is_empty() {
            if environment.is_production() {
                return Err(OriginPolicyError::MissingAllowList);
            }
            tracing::warn!(
                default = DEV_DEFAULT_ORIGIN,
                "cors.allowed_origins not configured, using development default"
            );
            vec![DEV_DEFAULT_ORIGIN.to_string()]
        } else {
            allowed_origins
        };

        let preview = config
            .preview_domain
            .as_deref()
            .filter(|pattern| !pattern.trim().is_empty())
            .map(PreviewPattern::compile)
            .transpose()?;

        Ok(Self::new(allowed_origins, preview, &config.pinned_origins))
    }

    /// Whether `origin` may read responses cross-origin.
    ///
    /// Requests without an `Origin` header (native clients, curl, same-origin
    /// navigation) are always allowed.
    #[must_use]
    pub fn is_allowed_origin(&self, origin: Option<&str>) -> bool {
        let Some(origin) = origin else {
            return true;
        };

        self.allowed_origins.iter().any(|allowed| allowed == origin)
            || self
                .preview
                .as_ref()
                .is_some_and(|pattern| pattern.matches(origin))
    }

    #[must_use]
    pub fn cors_decision(&self, origin: Option<&str>) -> CorsDecision {
        if self.is_allowed_origin(origin) {
            CorsDecision::Allow
        } else {
            CorsDecision::Reject
        }
    }

    /// Origins for the CSP `connect-src` directive, without `'self'`.
    ///
    /// Allow-list entries first, then pinned production origins, deduplicated
    /// in first-seen order.
    #[must_use]
    pub fn csp_connect_src(&self) -> &[String] {
        &self.connect_src
    }

    #[must_use]
    pub fn allowed_origins(&self) -> &[String] {
        &self.allowed_origins
    }

    #[must_use]
    pub const fn preview_pattern(&self) -> Option<&PreviewPattern> {
        self.preview.as_ref()
    }
}
