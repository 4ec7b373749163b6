use std::time::Duration;

use backon::ExponentialBuilder;
use serde::{Deserialize, Serialize};

#[derive(Clone, Serialize, Deserialize, Debug, Default)]
pub struct StoreSettings {
    #[serde(default)]
    pub persistence: PersistenceSettings,
    #[serde(default)]
    pub transactions: TxnSettings,
}

#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct PersistenceSettings {
    /// Enable periodic snapshotting of the store to disk
    #[serde(default)]
    pub enabled: bool,
    /// Interval in milliseconds between snapshots
    #[serde(default = "PersistenceSettings::default_interval_ms")]
    pub interval_ms: u64,
}

impl PersistenceSettings {
    fn default_interval_ms() -> u64 { 5_000 }
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        Self { enabled: false, interval_ms: Self::default_interval_ms() }
    }
}

/// Retry and timeout policy for `Store::run_transaction`.
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct TxnSettings {
    /// Ceiling for a whole transaction including retries.
    #[serde(default = "TxnSettings::default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "TxnSettings::default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "TxnSettings::default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Randomize each pause so conflicting writers spread out.
    #[serde(default = "TxnSettings::default_jitter")]
    pub jitter: bool,
}

impl TxnSettings {
    fn default_timeout_ms() -> u64 { 60_000 }
    fn default_initial_backoff_ms() -> u64 { 2 }
    fn default_max_backoff_ms() -> u64 { 200 }
    fn default_jitter() -> bool { true }

    pub fn timeout(&self) -> Duration { Duration::from_millis(self.timeout_ms) }

    /// Exponential pauses between attempts, doubling from `initial_backoff_ms`
    /// up to `max_backoff_ms`. Attempts are bounded by the deadline, not a count.
    pub fn backoff(&self) -> ExponentialBuilder {
        let builder = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(self.initial_backoff_ms))
            .with_max_delay(Duration::from_millis(self.max_backoff_ms))
            .with_factor(2.0)
            .with_max_times(usize::MAX);
        if self.jitter { builder.with_jitter() } else { builder }
    }
}

impl Default for TxnSettings {
    fn default() -> Self {
        Self {
            timeout_ms: Self::default_timeout_ms(),
            initial_backoff_ms: Self::default_initial_backoff_ms(),
            max_backoff_ms: Self::default_max_backoff_ms(),
            jitter: Self::default_jitter(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backon::BackoffBuilder;

    #[test]
    fn backoff_doubles_then_caps() {
        let s = TxnSettings { initial_backoff_ms: 2, max_backoff_ms: 10, jitter: false, ..TxnSettings::default() };
        let pauses: Vec<i64> = s.backoff().build().take(5).map(|d| d.as_micros() as i64).collect();
        for (got, want) in pauses.iter().zip([2_000i64, 4_000, 8_000, 10_000, 10_000]) {
            assert!((got - want).abs() <= 50, "{:?}", pauses);
        }
    }

    #[test]
    fn jittered_backoff_never_drops_below_base() {
        let s = TxnSettings { initial_backoff_ms: 4, max_backoff_ms: 4, jitter: true, ..TxnSettings::default() };
        for d in s.backoff().build().take(50) {
            assert!(d >= Duration::from_micros(3_950), "{:?}", d);
        }
    }
}
