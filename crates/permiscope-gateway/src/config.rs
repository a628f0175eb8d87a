// config.rs — Gateway configuration.
//
// GatewayConfig determines where the gateway keeps its state (approval
// store, audit log) and how it waits for humans. The `for_project()`
// constructor generates sensible defaults under a `.permiscope/` directory
// in the project root; `load()` reads the same fields from TOML, and
// `with_env_overrides()` lets deployments inject secrets and timeouts.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

pub const ENV_AUDIT_SECRET: &str = "PERMISCOPE_AUDIT_SECRET";
pub const ENV_STRICT_LOGGING: &str = "PERMISCOPE_STRICT_LOGGING";
pub const ENV_APPROVAL_TTL_SECS: &str = "PERMISCOPE_APPROVAL_TTL_SECS";
pub const ENV_APPROVAL_TIMEOUT_SECS: &str = "PERMISCOPE_APPROVAL_TIMEOUT_SECS";

/// Configuration for the execution gateway.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GatewayConfig {
    /// Base directory for gateway state.
    pub data_dir: PathBuf,

    /// Path to the shared approval store (JSON array).
    pub approvals_file: PathBuf,

    /// Path to the append-only audit log.
    pub audit_log: PathBuf,

    /// Keys the audit chain with HMAC-SHA256 and signs entries when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signing_secret: Option<String>,

    /// Audit write failures fail the run instead of being logged.
    pub strict_logging: bool,

    /// Lifetime of an approval grant.
    pub approval_ttl_secs: u64,

    /// How long a run waits for a human before blocking.
    pub approval_timeout_secs: u64,

    /// How often the approval store is polled while waiting.
    pub poll_interval_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self::for_project(".")
    }
}

impl GatewayConfig {
    /// Create a config with standard `.permiscope/` layout for a project.
    pub fn for_project(project_root: impl AsRef<Path>) -> Self {
        let data_dir = project_root.as_ref().join(".permiscope");
        Self {
            approvals_file: data_dir.join("approvals.json"),
            audit_log: data_dir.join("audit.log"),
            data_dir,
            signing_secret: None,
            strict_logging: false,
            approval_ttl_secs: 60 * 60,
            approval_timeout_secs: 5 * 60,
            poll_interval_ms: 500,
        }
    }

    /// Load config from a TOML file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, GatewayError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| GatewayError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let config = toml::from_str(&content)
            .map_err(|e| GatewayError::Config(format!("invalid {}: {}", path.display(), e)))?;
        Ok(config)
    }

    /// Apply `PERMISCOPE_*` environment variables on top of this config.
    pub fn with_env_overrides(self) -> Result<Self, GatewayError> {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    fn with_overrides_from(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, GatewayError> {
        if let Some(secret) = lookup(ENV_AUDIT_SECRET).filter(|s| !s.is_empty()) {
            self.signing_secret = Some(secret);
        }
        if let Some(raw) = lookup(ENV_STRICT_LOGGING) {
            self.strict_logging = parse_flag(ENV_STRICT_LOGGING, &raw)?;
        }
        if let Some(raw) = lookup(ENV_APPROVAL_TTL_SECS) {
            self.approval_ttl_secs = parse_secs(ENV_APPROVAL_TTL_SECS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_APPROVAL_TIMEOUT_SECS) {
            self.approval_timeout_secs = parse_secs(ENV_APPROVAL_TIMEOUT_SECS, &raw)?;
        }
        Ok(self)
    }

    pub fn approval_ttl(&self) -> chrono::Duration {
        i64::try_from(self.approval_ttl_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }

    pub fn approval_timeout(&self) -> Duration {
        Duration::from_secs(self.approval_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

fn parse_flag(key: &str, raw: &str) -> Result<bool, GatewayError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(GatewayError::Config(format!(
            "{} must be a boolean, got '{}'",
            key, other
        ))),
    }
}

fn parse_secs(key: &str, raw: &str) -> Result<u64, GatewayError> {
    raw.trim().parse().map_err(|_| {
        GatewayError::Config(format!(
            "{} must be a whole number of seconds, got '{}'",
            key, raw
        ))
    })
}
