//! Typed configuration.
//!
//! Process settings come from environment variables and load once at startup,
//! failing fast if required vars are missing. Sensitive values are wrapped in
//! `secrecy::SecretString` to keep them out of logs.
//!
//! Workflow policy (lease length, retry bound, sweep cadence) lives in an
//! optional TOML file. The engine never reads policy on its own: callers pass
//! the values into each operation.

use crate::error::{Error, Result};
use crate::model::MAX_CLAIM_DURATION_SECS;
use secrecy::SecretString;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    pub policy: Policy,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        let policy = match std::env::var("TICKETQ_POLICY") {
            Ok(path) => Policy::load(Path::new(&path))?,
            Err(_) => Policy::default(),
        };
        Ok(Self {
            database_url: SecretString::from(required_var("DATABASE_URL")?),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            policy,
        })
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

/// Workflow defaults, loaded from TOML. Every key is optional.
///
/// ```toml
/// default_worker_id = "agent"
/// claim_duration_secs = 1800
/// max_retries = 3
/// sweep_interval_secs = 60
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Policy {
    pub default_worker_id: String,
    pub claim_duration_secs: u64,
    pub max_retries: u32,
    pub sweep_interval_secs: u64,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            default_worker_id: "agent".to_string(),
            claim_duration_secs: 30 * 60,
            max_retries: 3,
            sweep_interval_secs: 60,
        }
    }
}

impl Policy {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let policy: Policy =
            toml::from_str(content).map_err(|e| Error::Config(format!("bad policy: {e}")))?;
        policy.validate()?;
        Ok(policy)
    }

    /// Load a policy file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read policy file {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    fn validate(&self) -> Result<()> {
        if self.claim_duration_secs == 0 {
            return Err(Error::Config("claim_duration_secs must be positive".into()));
        }
        if self.claim_duration_secs > MAX_CLAIM_DURATION_SECS {
            return Err(Error::Config(format!(
                "claim_duration_secs must not exceed {MAX_CLAIM_DURATION_SECS}"
            )));
        }
        if self.sweep_interval_secs == 0 {
            return Err(Error::Config("sweep_interval_secs must be positive".into()));
        }
        if self.default_worker_id.trim().is_empty() {
            return Err(Error::Config("default_worker_id must not be empty".into()));
        }
        Ok(())
    }

    /// Lease length. An out-of-range value saturates; `claim` then refuses
    /// it as an invalid argument.
    pub fn claim_duration(&self) -> chrono::Duration {
        i64::try_from(self.claim_duration_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}
