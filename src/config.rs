//! Runtime configuration.
//!
//! Settings come from `BILLING_*` environment variables, optionally
//! seeded from a `.env` file in the working directory.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EngineConfig {
    /// `BILLING_BIND_ADDR`
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// `BILLING_DATASET_PATH`: JSON snapshot served by the in-memory store.
    #[serde(default = "default_dataset_path")]
    pub dataset_path: PathBuf,
    /// `BILLING_RECORDS_PATH`: where finalized billing records are kept.
    /// Once this file exists it replaces the dataset's `billing_records`.
    #[serde(default = "default_records_path")]
    pub records_path: PathBuf,
    /// `BILLING_PARALLEL`: compute employees on the rayon pool.
    #[serde(default = "default_parallel")]
    pub parallel: bool,
}

fn default_bind_addr() -> String {
    "127.0.0.1:3000".to_string()
}

fn default_dataset_path() -> PathBuf {
    PathBuf::from("billing_data.json")
}

fn default_records_path() -> PathBuf {
    PathBuf::from("billing_records.json")
}

fn default_parallel() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            dataset_path: default_dataset_path(),
            records_path: default_records_path(),
            parallel: default_parallel(),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self> {
        // A missing .env is normal outside development.
        dotenv::dotenv().ok();
        Self::from_vars(std::env::vars())
    }

    pub fn from_vars<I>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        envy::prefixed("BILLING_")
            .from_iter(vars)
            .context("invalid BILLING_* configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = EngineConfig::from_vars(vars(&[("PATH", "/usr/bin")])).unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn prefixed_variables_override_defaults() {
        let config = EngineConfig::from_vars(vars(&[
            ("BILLING_BIND_ADDR", "0.0.0.0:8080"),
            ("BILLING_DATASET_PATH", "/srv/billing.json"),
            ("BILLING_RECORDS_PATH", "/srv/records.json"),
            ("BILLING_PARALLEL", "false"),
        ]))
        .unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.dataset_path, PathBuf::from("/srv/billing.json"));
        assert_eq!(config.records_path, PathBuf::from("/srv/records.json"));
        assert!(!config.parallel);
    }

    #[test]
    fn malformed_values_are_rejected() {
        let result = EngineConfig::from_vars(vars(&[("BILLING_PARALLEL", "sometimes")]));
        assert!(result.is_err());
    }
}
