//! Router configuration

use super::RouterError;
use std::time::Duration;

/// Default lifetime of sent envelopes.
pub const DEFAULT_MSG_TTL: Duration = Duration::from_secs(120);

/// Default lifetime of digest cache entries.
pub const DEFAULT_DIGEST_CACHE_TTL: Duration = Duration::from_secs(30);

/// Default interval between key store cleanups.
pub const DEFAULT_CLEAN_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Default number of symmetric keys tried on incoming envelopes.
pub const DEFAULT_SYM_KEY_CACHE_CAPACITY: usize = 512;

/// Default number of envelopes the outbox holds.
pub const DEFAULT_OUTBOX_CAPACITY: usize = 50;

/// Default maximum encoded envelope size.
pub const DEFAULT_MAX_MSG_SIZE: usize = 1024 * 1024;

/// Router configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterParams {
    /// Lifetime of envelopes this node sends
    pub msg_ttl: Duration,

    /// How long a digest suppresses duplicates
    pub digest_cache_ttl: Duration,

    /// Interval between removals of stale symmetric key bindings
    pub clean_interval: Duration,

    /// Symmetric keys tried on each incoming sealed envelope
    pub sym_key_cache_capacity: usize,

    /// Envelopes queued or in flight at once
    pub outbox_capacity: usize,

    /// Delay before the outbox retries a failed forward
    pub outbox_retry_delay: Duration,

    /// Largest accepted encoded envelope
    pub max_msg_size: usize,

    /// Send unsealed envelopes
    pub allow_raw: bool,

    /// Advertise forwarding on behalf of the network
    pub allow_forward: bool,
}

impl Default for RouterParams {
    fn default() -> Self {
        Self {
            msg_ttl: DEFAULT_MSG_TTL,
            digest_cache_ttl: DEFAULT_DIGEST_CACHE_TTL,
            clean_interval: DEFAULT_CLEAN_INTERVAL,
            sym_key_cache_capacity: DEFAULT_SYM_KEY_CACHE_CAPACITY,
            outbox_capacity: DEFAULT_OUTBOX_CAPACITY,
            outbox_retry_delay: Duration::from_millis(500),
            max_msg_size: DEFAULT_MAX_MSG_SIZE,
            allow_raw: false,
            allow_forward: false,
        }
    }
}

impl RouterParams {
    /// Check the params for values the router cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::InvalidConfig`] naming the first bad value.
    pub fn validate(&self) -> Result<(), RouterError> {
        if self.msg_ttl.is_zero() {
            return Err(RouterError::invalid_config("msg_ttl must be non-zero"));
        }
        if self.digest_cache_ttl.is_zero() {
            return Err(RouterError::invalid_config(
                "digest_cache_ttl must be non-zero",
            ));
        }
        if self.clean_interval.is_zero() {
            return Err(RouterError::invalid_config("clean_interval must be non-zero"));
        }
        if self.sym_key_cache_capacity == 0 {
            return Err(RouterError::invalid_config(
                "sym_key_cache_capacity must be at least 1",
            ));
        }
        if self.outbox_capacity == 0 {
            return Err(RouterError::invalid_config(
                "outbox_capacity must be at least 1",
            ));
        }
        if self.max_msg_size == 0 {
            return Err(RouterError::invalid_config("max_msg_size must be non-zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let params = RouterParams::default();
        assert_eq!(params.msg_ttl, Duration::from_secs(120));
        assert_eq!(params.digest_cache_ttl, Duration::from_secs(30));
        assert_eq!(params.sym_key_cache_capacity, 512);
        assert_eq!(params.outbox_capacity, 50);
        assert_eq!(params.max_msg_size, 1 << 20);
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let cases: [fn(&mut RouterParams); 4] = [
            |p| p.msg_ttl = Duration::ZERO,
            |p| p.sym_key_cache_capacity = 0,
            |p| p.outbox_capacity = 0,
            |p| p.max_msg_size = 0,
        ];
        for mutate in cases {
            let mut params = RouterParams::default();
            mutate(&mut params);
            assert!(matches!(
                params.validate(),
                Err(RouterError::InvalidConfig(_))
            ));
        }
    }
}
