//! Cache configuration read from the environment.

use log::warn;

pub const ENV_ENABLE_LOCAL_CACHE: &str = "ENABLE_LOCAL_CACHE";
pub const ENV_DATABASE_PATH: &str = "DATABASE_PATH";
pub const ENV_CACHE_FRESHNESS_MINUTES: &str = "CACHE_FRESHNESS_MINUTES";

pub const DEFAULT_DATABASE_PATH: &str = "./data/trading212.db";
pub const DEFAULT_FRESHNESS_MINUTES: i64 = 60;

/// Settings for the local history cache.
///
/// `freshness_minutes` follows the three-way rule of
/// [`is_fresh`](crate::history::is_fresh): `0` always syncs, a negative value
/// only syncs a table that has never been synced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    pub enabled: bool,
    pub database_path: String,
    pub freshness_minutes: i64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            database_path: DEFAULT_DATABASE_PATH.to_string(),
            freshness_minutes: DEFAULT_FRESHNESS_MINUTES,
        }
    }
}

impl CacheConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Missing keys take their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let enabled = lookup(ENV_ENABLE_LOCAL_CACHE)
            .map(|v| parse_flag(&v))
            .unwrap_or(false);
        let database_path = lookup(ENV_DATABASE_PATH)
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_DATABASE_PATH.to_string());
        let freshness_minutes = lookup(ENV_CACHE_FRESHNESS_MINUTES)
            .map(|v| parse_freshness_minutes(&v))
            .unwrap_or(DEFAULT_FRESHNESS_MINUTES);

        Self {
            enabled,
            database_path,
            freshness_minutes,
        }
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes"
    )
}

fn parse_freshness_minutes(value: &str) -> i64 {
    match value.trim().parse::<i64>() {
        Ok(minutes) => minutes,
        Err(_) => {
            warn!(
                "Invalid {} value '{}', using default of {} minutes",
                ENV_CACHE_FRESHNESS_MINUTES, value, DEFAULT_FRESHNESS_MINUTES
            );
            DEFAULT_FRESHNESS_MINUTES
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> CacheConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        CacheConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        assert_eq!(config(&[]), CacheConfig::default());
    }

    #[test]
    fn test_enable_flag() {
        for value in ["true", "TRUE", "1", "yes", " Yes "] {
            assert!(config(&[(ENV_ENABLE_LOCAL_CACHE, value)]).enabled, "{value}");
        }
        for value in ["false", "0", "no", "on", ""] {
            assert!(!config(&[(ENV_ENABLE_LOCAL_CACHE, value)]).enabled, "{value}");
        }
    }

    #[test]
    fn test_freshness_minutes() {
        assert_eq!(
            config(&[(ENV_CACHE_FRESHNESS_MINUTES, "15")]).freshness_minutes,
            15
        );
        assert_eq!(config(&[(ENV_CACHE_FRESHNESS_MINUTES, "0")]).freshness_minutes, 0);
        assert_eq!(
            config(&[(ENV_CACHE_FRESHNESS_MINUTES, "-1")]).freshness_minutes,
            -1
        );
        assert_eq!(
            config(&[(ENV_CACHE_FRESHNESS_MINUTES, "soon")]).freshness_minutes,
            DEFAULT_FRESHNESS_MINUTES
        );
    }

    #[test]
    fn test_database_path() {
        assert_eq!(
            config(&[(ENV_DATABASE_PATH, "/tmp/cache.db")]).database_path,
            "/tmp/cache.db"
        );
    }
}
