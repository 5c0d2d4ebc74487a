//! Saga configuration loaded from environment variables.

use std::time::Duration;

/// Retry limits, timeouts and feature toggles shared by every saga.
///
/// Reads from environment variables:
/// - `SPEAKER_COMMAND_RETRIES_LIMIT` (default: `3`)
/// - `COMMAND_TIMEOUT_MS` (default: `5000`)
/// - `SAGA_TIMEOUT_MS` (default: `60000`)
/// - `PATH_ALLOCATION_RETRIES_LIMIT` (default: `10`)
/// - `RESOURCE_ALLOCATION_RETRIES_LIMIT` (default: `10`)
/// - `MAX_IN_FLIGHT_SAGAS` (default: `10000`)
/// - `ABANDONED_SAGA_TTL_SECS` (default: `900`)
/// - `FLOW_CREATE_ENABLED`, `FLOW_UPDATE_ENABLED`, `FLOW_REROUTE_ENABLED`,
///   `FLOW_DELETE_ENABLED`, `FLOW_SWAP_ENABLED` (default: `true`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SagaConfig {
    pub speaker_command_retries_limit: u32,
    pub command_timeout: Duration,
    pub saga_timeout: Duration,
    pub path_allocation_retries_limit: u32,
    pub resource_allocation_retries_limit: u32,
    pub max_in_flight_sagas: usize,
    pub abandoned_saga_ttl: Duration,
    pub create_enabled: bool,
    pub update_enabled: bool,
    pub reroute_enabled: bool,
    pub delete_enabled: bool,
    pub swap_enabled: bool,
}

impl SagaConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            speaker_command_retries_limit: env_parse("SPEAKER_COMMAND_RETRIES_LIMIT")
                .unwrap_or(defaults.speaker_command_retries_limit),
            command_timeout: env_parse("COMMAND_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.command_timeout),
            saga_timeout: env_parse("SAGA_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.saga_timeout),
            path_allocation_retries_limit: env_parse("PATH_ALLOCATION_RETRIES_LIMIT")
                .unwrap_or(defaults.path_allocation_retries_limit),
            resource_allocation_retries_limit: env_parse("RESOURCE_ALLOCATION_RETRIES_LIMIT")
                .unwrap_or(defaults.resource_allocation_retries_limit),
            max_in_flight_sagas: env_parse("MAX_IN_FLIGHT_SAGAS")
                .unwrap_or(defaults.max_in_flight_sagas),
            abandoned_saga_ttl: env_parse("ABANDONED_SAGA_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.abandoned_saga_ttl),
            create_enabled: env_parse("FLOW_CREATE_ENABLED").unwrap_or(true),
            update_enabled: env_parse("FLOW_UPDATE_ENABLED").unwrap_or(true),
            reroute_enabled: env_parse("FLOW_REROUTE_ENABLED").unwrap_or(true),
            delete_enabled: env_parse("FLOW_DELETE_ENABLED").unwrap_or(true),
            swap_enabled: env_parse("FLOW_SWAP_ENABLED").unwrap_or(true),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            speaker_command_retries_limit: 3,
            command_timeout: Duration::from_secs(5),
            saga_timeout: Duration::from_secs(60),
            path_allocation_retries_limit: 10,
            resource_allocation_retries_limit: 10,
            max_in_flight_sagas: 10_000,
            abandoned_saga_ttl: Duration::from_secs(15 * 60),
            create_enabled: true,
            update_enabled: true,
            reroute_enabled: true,
            delete_enabled: true,
            swap_enabled: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = SagaConfig::default();
        assert_eq!(config.speaker_command_retries_limit, 3);
        assert_eq!(config.command_timeout, Duration::from_secs(5));
        assert_eq!(config.path_allocation_retries_limit, 10);
        assert_eq!(config.resource_allocation_retries_limit, 10);
        assert_eq!(config.max_in_flight_sagas, 10_000);
        assert!(config.update_enabled && config.swap_enabled);
    }

    #[test]
    fn test_from_env_without_overrides_matches_defaults() {
        // None of the variables are set in the test environment.
        if std::env::var("SPEAKER_COMMAND_RETRIES_LIMIT").is_err() {
            assert_eq!(
                SagaConfig::from_env().speaker_command_retries_limit,
                SagaConfig::default().speaker_command_retries_limit
            );
        }
    }
}
