//! Typed configuration structs. No env/file loading lives here — the caller
//! constructs these, same as the teacher's `RestOptions`/`GatewayConfig`.

use std::path::PathBuf;
use std::time::Duration;

use crate::decompress::DecompressMode;

/// Per-state retry parameters (spec §3/§4.6). `max_attempts == -1` means a
/// single attempt with no retry; `0` means unbounded attempts.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub start_delay: Duration,
    pub first_delay: Duration,
    pub max_interval: Duration,
    pub max_attempts: i32,
}

impl RetryConfig {
    pub const fn new(
        start_delay: Duration,
        first_delay: Duration,
        max_interval: Duration,
        max_attempts: i32,
    ) -> Self {
        Self {
            start_delay,
            first_delay,
            max_interval,
            max_attempts,
        }
    }

    /// Delay before attempt `attempt` (0-indexed). Attempt 0 waits
    /// `start_delay`; subsequent attempts back off exponentially from
    /// `first_delay`, capped at `max_interval`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return self.start_delay;
        }
        let factor = 1u64 << (attempt - 1).min(31);
        let scaled = self.first_delay.saturating_mul(factor as u32);
        scaled.min(self.max_interval)
    }

    /// Whether another attempt is permitted after `attempts_made` failures.
    pub fn should_retry(&self, attempts_made: u32) -> bool {
        match self.max_attempts {
            -1 => attempts_made == 0,
            0 => true,
            n => (attempts_made as i32) < n,
        }
    }

    /// Init: unbounded attempts, first_delay 1s, max_interval 60s.
    pub const INIT: Self = Self::new(
        Duration::from_secs(0),
        Duration::from_secs(1),
        Duration::from_secs(60),
        0,
    );

    /// Gateway: first_delay 2s, max_interval 32s, 2 attempts.
    pub const GATEWAY: Self = Self::new(
        Duration::from_secs(0),
        Duration::from_secs(2),
        Duration::from_secs(32),
        2,
    );

    /// WSConnected: single 6s wait for HELLO, then HelloFail.
    pub const WS_CONNECTED: Self = Self::new(
        Duration::from_secs(6),
        Duration::from_secs(6),
        Duration::from_secs(6),
        -1,
    );

    /// WSConnected after a HelloGatewayErr override: start_delay 6s before
    /// Init re-requests the gateway.
    pub const HELLO_GATEWAY_ERR_OVERRIDE: Self = Self::new(
        Duration::from_secs(6),
        Duration::from_secs(1),
        Duration::from_secs(60),
        0,
    );

    /// Retry: first_delay 4s, max_interval 8s, 2 attempts.
    pub const RETRY: Self = Self::new(
        Duration::from_secs(0),
        Duration::from_secs(4),
        Duration::from_secs(8),
        2,
    );
}

#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    pub interval: Duration,
    pub pong_timeout: Duration,
    pub watcher_grace: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(7),
            watcher_grace: Duration::from_secs(1),
        }
    }
}

/// Top-level configuration for a [`crate::session::SessionIdentity`]-backed
/// gateway session.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub api_base_url: String,
    pub token: String,
    pub decompress_mode: DecompressMode,
    pub dict_version: Option<String>,
    pub protocol_version: u8,
    pub session_file: PathBuf,
    pub heartbeat: HeartbeatConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://www.kookapp.cn/api/v3".to_string(),
            token: String::new(),
            decompress_mode: DecompressMode::None,
            dict_version: None,
            protocol_version: 1,
            session_file: PathBuf::from("wavelink-session.json"),
            heartbeat: HeartbeatConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_attempt_retry_config_allows_only_first() {
        let cfg = RetryConfig::WS_CONNECTED;
        assert!(cfg.should_retry(0));
        assert!(!cfg.should_retry(1));
    }

    #[test]
    fn unbounded_retry_config_always_retries() {
        let cfg = RetryConfig::INIT;
        assert!(cfg.should_retry(1_000));
    }

    #[test]
    fn bounded_retry_config_respects_max_attempts() {
        let cfg = RetryConfig::GATEWAY;
        assert!(cfg.should_retry(1));
        assert!(!cfg.should_retry(2));
    }

    #[test]
    fn exponential_backoff_is_capped() {
        let cfg = RetryConfig::GATEWAY;
        assert_eq!(cfg.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(cfg.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(cfg.delay_for_attempt(10), Duration::from_secs(32));
    }
}
