//! Environment configuration

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// What to do with a row that fails validation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RowPolicy {
    /// Fail the whole file; its transaction is rolled back
    Abort,
    /// Count the row as skipped and keep streaming
    Skip,
}

impl FromStr for RowPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "abort" => Ok(RowPolicy::Abort),
            "skip" => Ok(RowPolicy::Skip),
            other => Err(format!("unknown row policy '{}' (expected abort|skip)", other)),
        }
    }
}

impl fmt::Display for RowPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowPolicy::Abort => f.write_str("abort"),
            RowPolicy::Skip => f.write_str("skip"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub db_url: String,
    pub data_dir: PathBuf,
    pub state_name: String,
    pub max_connections: u32,
    pub electorate_policy: RowPolicy,
    pub results_policy: RowPolicy,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let policy = |key: &str, default: RowPolicy| -> Result<RowPolicy> {
            match lookup(key) {
                Some(v) => v
                    .parse()
                    .map_err(|e: String| anyhow::anyhow!(e))
                    .with_context(|| format!("{} is invalid", key)),
                None => Ok(default),
            }
        };

        Ok(Self {
            db_url: lookup("DB_URL").context("DB_URL env var missing")?,
            data_dir: PathBuf::from(lookup("DATA_DIR").unwrap_or_else(|| "./data".to_string())),
            state_name: lookup("STATE_NAME").unwrap_or_else(|| "Guerrero".to_string()),
            max_connections: lookup("DB_MAX_CONNECTIONS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
            electorate_policy: policy("ELECTORATE_ROW_POLICY", RowPolicy::Abort)?,
            results_policy: policy("RESULTS_ROW_POLICY", RowPolicy::Skip)?,
        })
    }
}
