//! Daemon configuration: optional JSON file named by `ACCOUNTD_CONFIG`, then
//! environment overrides, then defaults for anything left unset.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::accounts::OutboxSettings;
use crate::storage::StoreSettings;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    #[serde(default = "SessionSettings::default_ttl_secs")]
    pub ttl_secs: u64,
}

impl SessionSettings {
    fn default_ttl_secs() -> u64 { 60 * 60 }
    pub fn ttl(&self) -> Duration { Duration::from_secs(self.ttl_secs) }
}

impl Default for SessionSettings {
    fn default() -> Self { Self { ttl_secs: Self::default_ttl_secs() } }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "AppConfig::default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub store: StoreSettings,
    #[serde(default)]
    pub outbox: OutboxSettings,
    #[serde(default)]
    pub sessions: SessionSettings,
}

impl AppConfig {
    fn default_data_dir() -> PathBuf { PathBuf::from("accountd-data") }

    pub fn from_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).with_context(|| format!("reading config {}", path.display()))?;
        let cfg = serde_json::from_slice(&bytes).with_context(|| format!("parsing config {}", path.display()))?;
        Ok(cfg)
    }

    /// File (if `ACCOUNTD_CONFIG` is set), then process environment.
    pub fn load() -> Result<Self> {
        let mut cfg = match std::env::var("ACCOUNTD_CONFIG") {
            Ok(p) => Self::from_file(Path::new(&p))?,
            Err(_) => Self::default(),
        };
        cfg.apply_env(|k| std::env::var(k).ok());
        Ok(cfg)
    }

    /// Override fields from environment-style lookups. Unparseable values are
    /// logged and ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("ACCOUNTD_DATA_DIR") { self.data_dir = PathBuf::from(v); }
        if let Some(v) = parse_u64(&lookup, "ACCOUNTD_TXN_TIMEOUT_SECS") { self.store.transactions.timeout_ms = v.saturating_mul(1000); }
        if let Some(v) = lookup("ACCOUNTD_PERSIST") { self.store.persistence.enabled = matches!(v.as_str(), "1" | "true" | "yes" | "on"); }
        if let Some(v) = parse_u64(&lookup, "ACCOUNTD_SNAPSHOT_INTERVAL_MS") { self.store.persistence.interval_ms = v; }
        if let Some(v) = parse_u64(&lookup, "ACCOUNTD_OUTBOX_INTERVAL_MS") { self.outbox.interval_ms = v; }
        if let Some(v) = parse_u64(&lookup, "ACCOUNTD_OUTBOX_RETENTION_MS") { self.outbox.retention_ms = v; }
        if let Some(v) = parse_u64(&lookup, "ACCOUNTD_SESSION_TTL_SECS") { self.sessions.ttl_secs = v; }
    }
}

fn parse_u64<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str) -> Option<u64> {
    let raw = lookup(key)?;
    match raw.trim().parse::<u64>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(target: "startup", key, value = %raw, "ignoring non-numeric setting");
            None
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: Self::default_data_dir(),
            store: StoreSettings::default(),
            outbox: OutboxSettings::default(),
            sessions: SessionSettings::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::TxnSettings;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_documented_ceilings() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.store.transactions.timeout(), Duration::from_secs(60));
        assert!(!cfg.store.persistence.enabled);
        assert_eq!(cfg.sessions.ttl(), Duration::from_secs(3600));
    }

    #[test]
    fn env_overrides_and_ignores_garbage() {
        let env: HashMap<&str, &str> = [
            ("ACCOUNTD_DATA_DIR", "/tmp/acct"),
            ("ACCOUNTD_TXN_TIMEOUT_SECS", "5"),
            ("ACCOUNTD_PERSIST", "true"),
            ("ACCOUNTD_OUTBOX_INTERVAL_MS", "soon"),
        ]
        .into_iter()
        .collect();
        let mut cfg = AppConfig::default();
        cfg.apply_env(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.data_dir, PathBuf::from("/tmp/acct"));
        assert_eq!(cfg.store.transactions.timeout_ms, 5_000);
        assert!(cfg.store.persistence.enabled);
        assert_eq!(cfg.outbox.interval_ms, OutboxSettings::default().interval_ms);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let p = tmp.path().join("accountd.json");
        std::fs::write(&p, r#"{"store": {"transactions": {"timeout_ms": 1500}}, "outbox": {"batch_size": 8}}"#).unwrap();
        let cfg = AppConfig::from_file(&p).unwrap();
        assert_eq!(cfg.store.transactions.timeout_ms, 1500);
        assert_eq!(cfg.store.transactions.max_backoff_ms, TxnSettings::default().max_backoff_ms);
        assert_eq!(cfg.outbox.batch_size, 8);
        assert_eq!(cfg.data_dir, PathBuf::from("accountd-data"));
    }
}
