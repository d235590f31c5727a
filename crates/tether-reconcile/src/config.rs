use std::time::Duration;

use tracing::warn;

/// How optimistic entries are retired when real data arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReconcileStrategy {
    /// Match each real entry against pending entries one-to-one.
    #[default]
    Heuristic,
    /// Drop every pending entry of the scope whenever real data changes.
    /// Only sound if every send has finished by the time a refetch lands.
    ClearOnRefresh,
}

impl ReconcileStrategy {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "heuristic" => Some(Self::Heuristic),
            "clear-on-refresh" | "clear" => Some(Self::ClearOnRefresh),
            _ => None,
        }
    }
}

/// Tunables for a reconciliation scope.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileConfig {
    /// Max distance between optimistic and real timestamps for a match (strict).
    pub match_window: Duration,
    /// Entries older than this are garbage-collected even if unconfirmed.
    pub stale_after: Duration,
    /// How often the background prune loop runs.
    pub prune_interval: Duration,
    pub strategy: ReconcileStrategy,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            match_window: Duration::from_secs(30),
            stale_after: Duration::from_secs(60),
            prune_interval: Duration::from_secs(5),
            strategy: ReconcileStrategy::Heuristic,
        }
    }
}

pub const ENV_MATCH_WINDOW_MS: &str = "TETHER_MATCH_WINDOW_MS";
pub const ENV_STALE_AFTER_MS: &str = "TETHER_STALE_AFTER_MS";
pub const ENV_PRUNE_INTERVAL_MS: &str = "TETHER_PRUNE_INTERVAL_MS";
pub const ENV_STRATEGY: &str = "TETHER_STRATEGY";

impl ReconcileConfig {
    /// Read overrides from the process environment. Unset or malformed
    /// variables keep their defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env` with an explicit variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let millis = |key: &str, fallback: Duration| -> Duration {
            match lookup(key) {
                Some(raw) => match raw.trim().parse::<u64>() {
                    Ok(ms) if ms > 0 => Duration::from_millis(ms),
                    _ => {
                        warn!("Ignoring {}={:?}: expected a positive number of milliseconds", key, raw);
                        fallback
                    }
                },
                None => fallback,
            }
        };

        let strategy = match lookup(ENV_STRATEGY) {
            Some(raw) => ReconcileStrategy::parse(&raw).unwrap_or_else(|| {
                warn!("Ignoring {}={:?}: expected heuristic or clear-on-refresh", ENV_STRATEGY, raw);
                defaults.strategy
            }),
            None => defaults.strategy,
        };

        Self {
            match_window: millis(ENV_MATCH_WINDOW_MS, defaults.match_window),
            stale_after: millis(ENV_STALE_AFTER_MS, defaults.stale_after),
            prune_interval: millis(ENV_PRUNE_INTERVAL_MS, defaults.prune_interval),
            strategy,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = ReconcileConfig::from_lookup(|_| None);
        assert_eq!(config, ReconcileConfig::default());
        assert_eq!(config.match_window, Duration::from_secs(30));
        assert_eq!(config.stale_after, Duration::from_secs(60));
    }

    #[test]
    fn overrides_are_applied() {
        let config = ReconcileConfig::from_lookup(lookup_from(&[
            (ENV_MATCH_WINDOW_MS, "10000"),
            (ENV_STALE_AFTER_MS, "120000"),
            (ENV_STRATEGY, "Clear-On-Refresh"),
        ]));
        assert_eq!(config.match_window, Duration::from_secs(10));
        assert_eq!(config.stale_after, Duration::from_secs(120));
        assert_eq!(config.prune_interval, Duration::from_secs(5));
        assert_eq!(config.strategy, ReconcileStrategy::ClearOnRefresh);
    }

    #[test]
    fn malformed_values_fall_back() {
        let config = ReconcileConfig::from_lookup(lookup_from(&[
            (ENV_MATCH_WINDOW_MS, "soon"),
            (ENV_PRUNE_INTERVAL_MS, "0"),
            (ENV_STRATEGY, "magic"),
        ]));
        assert_eq!(config, ReconcileConfig::default());
    }
}
