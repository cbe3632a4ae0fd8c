//! Release metadata reported by `/api/health` and the startup log.
//!
//! Values come from the deploy environment. Render exposes the commit as
//! `RENDER_GIT_COMMIT` and tagged deploys as `RENDER_GIT_COMMIT_TAG`; explicit
//! `APP_VERSION` / `GIT_SHA` / `BUILD_TIME` take precedence.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;

const UNKNOWN: &str = "unknown";

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildInfo {
    pub version: String,
    pub git_sha: String,
    /// RFC 3339 in UTC, or `unknown`.
    pub build_time: String,
}

impl BuildInfo {
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve from an arbitrary variable source. The crate version stands in
    /// when no release version is set.
    pub fn from_lookup<F>(mut lookup: F) -> Self
    where
        F: FnMut(&str) -> Option<String>,
    {
        let mut first = |keys: &[&str]| keys.iter().find_map(|key| lookup(*key));

        Self {
            version: first(&["APP_VERSION", "RENDER_GIT_COMMIT_TAG"])
                .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string()),
            git_sha: first(&["GIT_SHA", "RENDER_GIT_COMMIT"])
                .unwrap_or_else(|| UNKNOWN.to_string()),
            build_time: first(&["BUILD_TIME"])
                .and_then(|raw| utc_timestamp(&raw))
                .unwrap_or_else(|| UNKNOWN.to_string()),
        }
    }
}

/// Timestamps without an offset are read as UTC.
fn utc_timestamp(raw: &str) -> Option<String> {
    let parsed = match DateTime::parse_from_rfc3339(raw) {
        Ok(with_offset) => with_offset.with_timezone(&Utc),
        Err(_) => NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()?
            .and_utc(),
    };
    Some(parsed.to_rfc3339())
}
