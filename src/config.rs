//! Configuration loading.
//!
//! An external collaborator per spec: the format is deliberately simple
//! (TOML + a handful of env overrides) rather than a fully validated
//! config-management layer. Mirrors the env-override idiom of the
//! original `models::Config::from_env`, extended to the multi-source
//! shape the sync engine needs.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// One configured GraphQL source (a subgraph deployment behind the
/// shared HTTPS host).
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub subgraph_id: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// entity name -> storage table name
    pub entities: HashMap<String, String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
struct RawConfig {
    api_key: String,
    db_path: String,
    #[serde(default = "default_sync_interval")]
    sync_interval_seconds: u64,
    #[serde(default)]
    sources: HashMap<String, SourceConfig>,
}

fn default_sync_interval() -> u64 {
    60
}

/// Fully-resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: String,
    pub db_path: String,
    pub sync_interval_seconds: u64,
    pub sources: HashMap<String, SourceConfig>,
}

impl Config {
    /// Loads from a TOML file at `path`, then applies `API_KEY` /
    /// `DB_PATH` / `SYNC_INTERVAL_SECONDS` env overrides if set.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        dotenv::dotenv().ok();

        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let raw: RawConfig =
            toml::from_str(&text).with_context(|| format!("parsing config file {}", path.display()))?;

        let api_key = std::env::var("API_KEY").unwrap_or(raw.api_key);
        let db_path = std::env::var("DB_PATH").unwrap_or(raw.db_path);
        let sync_interval_seconds = std::env::var("SYNC_INTERVAL_SECONDS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(raw.sync_interval_seconds);

        Ok(Self {
            api_key,
            db_path,
            sync_interval_seconds,
            sources: raw.sources,
        })
    }

    /// Only the enabled sources participate in sync rounds.
    pub fn enabled_sources(&self) -> impl Iterator<Item = (&String, &SourceConfig)> {
        self.sources.iter().filter(|(_, s)| s.enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let toml_text = r#"
            api_key = "k"
            db_path = "./data/x.db"

            [sources.polygon]
            subgraph_id = "abc123"
            enabled = true

            [sources.polygon.entities]
            condition = "condition"
            enrichedOrderFilled = "enriched_order_filled"

            [sources.archived]
            subgraph_id = "def456"
            enabled = false

            [sources.archived.entities]
            condition = "condition"
        "#;
        let raw: RawConfig = toml::from_str(toml_text).unwrap();
        assert_eq!(raw.sources.len(), 2);
        assert_eq!(raw.sync_interval_seconds, 60);
        assert!(raw.sources["polygon"].enabled);
        assert!(!raw.sources["archived"].enabled);
    }
}
