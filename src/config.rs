//! Configuration types.

use std::time::Duration as StdDuration;

use chrono::Duration;

use crate::error::ConfigError;

/// Invitation flow configuration.
#[derive(Debug, Clone)]
pub struct FlowConfig {
    /// Lifetime of a newly created invitation.
    pub invitation_lifetime: Duration,
    /// Debounce delay for wizard draft auto-save.
    pub autosave_delay: Duration,
    /// Bound on any single authority call (fetch/accept/decline).
    pub request_timeout: StdDuration,
    /// How long a fetched invitation snapshot may be served from cache.
    pub cache_max_age: Duration,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            invitation_lifetime: Duration::days(14),
            autosave_delay: Duration::seconds(1),
            request_timeout: StdDuration::from_secs(10),
            cache_max_age: Duration::seconds(30),
        }
    }
}

impl FlowConfig {
    /// Build config from `INVITE_FLOW_*` environment variables, falling back
    /// to defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(days) = read_u64("INVITE_FLOW_LIFETIME_DAYS")? {
            config.invitation_lifetime = Duration::days(days as i64);
        }
        if let Some(ms) = read_u64("INVITE_FLOW_AUTOSAVE_MS")? {
            config.autosave_delay = Duration::milliseconds(ms as i64);
        }
        if let Some(secs) = read_u64("INVITE_FLOW_REQUEST_TIMEOUT_SECS")? {
            config.request_timeout = StdDuration::from_secs(secs);
        }
        if let Some(secs) = read_u64("INVITE_FLOW_CACHE_MAX_AGE_SECS")? {
            config.cache_max_age = Duration::seconds(secs as i64);
        }

        Ok(config)
    }
}

fn read_u64(key: &str) -> Result<Option<u64>, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<u64>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            }),
        Err(_) => Ok(None),
    }
}
