use std::time::Duration;

use rand::Rng;

use crate::config::TransportConfig;

/// Connect timeouts and retry delays of the reconnect loop.
///
/// Local peers either answer almost at once or are not running, so they get
/// a short connect timeout and an immediate first retry. Everything else
/// backs off exponentially from the first retry on.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
    pub jitter: Duration,
    pub local_connect_timeout: Duration,
    pub remote_connect_timeout: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from(&TransportConfig::default())
    }
}

impl From<&TransportConfig> for BackoffPolicy {
    fn from(config: &TransportConfig) -> Self {
        Self {
            base: Duration::from_millis(config.backoff_base_ms),
            max: Duration::from_millis(config.backoff_max_ms),
            jitter: Duration::from_millis(config.jitter_ms),
            local_connect_timeout: Duration::from_millis(config.local_connect_timeout_ms),
            remote_connect_timeout: Duration::from_millis(config.remote_connect_timeout_ms),
        }
    }
}

impl BackoffPolicy {
    pub fn connect_timeout(&self, local: bool) -> Duration {
        if local {
            self.local_connect_timeout
        } else {
            self.remote_connect_timeout
        }
    }

    /// Delay before retry number `retry` (counted from zero), without jitter.
    ///
    /// `base * 2^retry`, capped at `max`; zero for the first retry to a
    /// local peer.
    pub fn base_delay(&self, retry: u32, local: bool) -> Duration {
        if retry == 0 && local {
            return Duration::ZERO;
        }
        self.base
            .saturating_mul(2u32.saturating_pow(retry))
            .min(self.max)
    }

    /// [`base_delay`](Self::base_delay) plus uniform jitter in `[0, jitter)`.
    pub fn delay(&self, retry: u32, local: bool) -> Duration {
        let base = self.base_delay(retry, local);
        if base.is_zero() || self.jitter.is_zero() {
            return base;
        }
        let fraction: f64 = rand::thread_rng().gen();
        base + self.jitter.mul_f64(fraction)
    }
}
