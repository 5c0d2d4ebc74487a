//! Worker configuration loaded from environment variables.

use std::time::Duration;

use common::SwitchId;

/// Worker configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST` — bind address (default: `"0.0.0.0"`)
/// - `PORT` — listen port (default: `3000`)
/// - `RUST_LOG` — tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT` — `json` for JSON log lines (default: plain text)
/// - `HUB_SHARDS` — number of hub shards (default: `4`)
/// - `SPEAKER_DELAY_MS` — simulated switch latency (default: `10`)
/// - `SPEAKER_FAILING_SWITCHES` — comma separated dpids the simulated
///   speaker refuses commands for (default: none)
/// - `TICK_INTERVAL_MS` — period of the timeout and cleanup sweep (default: `500`)
/// - `DATABASE_URL` — PostgreSQL history store; in-memory when unset
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub json_logs: bool,
    pub hub_shards: usize,
    pub speaker_delay: Duration,
    pub failing_switches: Vec<SwitchId>,
    pub tick_interval: Duration,
    pub database_url: Option<String>,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("HOST").unwrap_or(defaults.host),
            port: env_parse("PORT").unwrap_or(defaults.port),
            log_level: std::env::var("RUST_LOG").unwrap_or(defaults.log_level),
            json_logs: std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")),
            hub_shards: env_parse("HUB_SHARDS")
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.hub_shards),
            speaker_delay: env_parse("SPEAKER_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.speaker_delay),
            failing_switches: std::env::var("SPEAKER_FAILING_SWITCHES")
                .map(|v| parse_switches(&v))
                .unwrap_or_default(),
            tick_interval: env_parse("TICK_INTERVAL_MS")
                .filter(|ms: &u64| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(defaults.tick_interval),
            database_url: std::env::var("DATABASE_URL").ok().filter(|u| !u.is_empty()),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            json_logs: false,
            hub_shards: 4,
            speaker_delay: Duration::from_millis(10),
            failing_switches: Vec::new(),
            tick_interval: Duration::from_millis(500),
            database_url: None,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

/// Parses `"1, 2,x,3"` into switches 1, 2 and 3; junk entries are skipped.
fn parse_switches(value: &str) -> Vec<SwitchId> {
    value
        .split(',')
        .filter_map(|part| part.trim().parse::<u64>().ok())
        .map(SwitchId::new)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.hub_shards, 4);
        assert_eq!(config.tick_interval, Duration::from_millis(500));
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_addr_formatting() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Config::default()
        };
        assert_eq!(config.addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_failing_switch_list() {
        assert_eq!(
            parse_switches("1, 2,x,3"),
            vec![SwitchId::new(1), SwitchId::new(2), SwitchId::new(3)]
        );
        assert!(parse_switches("").is_empty());
    }
}
