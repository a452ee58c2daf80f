//! Mission configuration

use std::time::Duration;

use missionpay_types::{NetworkId, TokenId};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Timeouts, windows and payment settings shared by every mission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissionConfig {
    /// Fixed timeout for one task call
    pub task_timeout_secs: u64,
    /// How long a payment may take to confirm
    pub confirmation_timeout_secs: u64,
    /// Maximum age of an accepted payment proof
    pub proof_freshness_secs: u64,
    /// Client inaction window after submission before funds auto-release
    pub auto_release_hours: u64,
    /// Challenge period before a dispute can be resolved
    pub challenge_period_secs: u64,
    /// Maximum live payment redemptions per agent
    pub session_capacity: usize,
    pub network: String,
    pub payment_token: String,
}

impl Default for MissionConfig {
    fn default() -> Self {
        Self {
            task_timeout_secs: 120,
            confirmation_timeout_secs: 60,
            proof_freshness_secs: 300,
            auto_release_hours: 48,
            challenge_period_secs: 7_200,
            session_capacity: 10_000,
            network: "base-sepolia".to_string(),
            payment_token: "USDC".to_string(),
        }
    }
}

/// Build a chrono span from a configured count, using `fallback` when the
/// count does not fit
fn span(
    key: &str,
    value: u64,
    fallback: u64,
    unit: fn(i64) -> Option<chrono::Duration>,
) -> chrono::Duration {
    if let Some(span) = i64::try_from(value).ok().and_then(unit) {
        return span;
    }
    warn!(key, value, fallback, "Configured duration out of range, using default");
    i64::try_from(fallback)
        .ok()
        .and_then(unit)
        .unwrap_or_else(chrono::Duration::zero)
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl MissionConfig {
    /// Create config from `MISSIONPAY_*` environment variables
    ///
    /// Missing or unparsable values fall back to the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            task_timeout_secs: env_or("MISSIONPAY_TASK_TIMEOUT_SECS", defaults.task_timeout_secs),
            confirmation_timeout_secs: env_or(
                "MISSIONPAY_CONFIRMATION_TIMEOUT_SECS",
                defaults.confirmation_timeout_secs,
            ),
            proof_freshness_secs: env_or(
                "MISSIONPAY_PROOF_FRESHNESS_SECS",
                defaults.proof_freshness_secs,
            ),
            auto_release_hours: env_or("MISSIONPAY_AUTO_RELEASE_HOURS", defaults.auto_release_hours),
            challenge_period_secs: env_or(
                "MISSIONPAY_CHALLENGE_PERIOD_SECS",
                defaults.challenge_period_secs,
            ),
            session_capacity: env_or("MISSIONPAY_SESSION_CAPACITY", defaults.session_capacity),
            network: env_or("MISSIONPAY_NETWORK", defaults.network),
            payment_token: env_or("MISSIONPAY_PAYMENT_TOKEN", defaults.payment_token),
        }
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }

    pub fn proof_freshness(&self) -> chrono::Duration {
        span(
            "proof_freshness_secs",
            self.proof_freshness_secs,
            Self::default().proof_freshness_secs,
            chrono::Duration::try_seconds,
        )
    }

    pub fn auto_release_window(&self) -> chrono::Duration {
        span(
            "auto_release_hours",
            self.auto_release_hours,
            Self::default().auto_release_hours,
            chrono::Duration::try_hours,
        )
    }

    pub fn challenge_period(&self) -> chrono::Duration {
        span(
            "challenge_period_secs",
            self.challenge_period_secs,
            Self::default().challenge_period_secs,
            chrono::Duration::try_seconds,
        )
    }

    pub fn network_id(&self) -> NetworkId {
        NetworkId::new(self.network.as_str())
    }

    pub fn token_id(&self) -> TokenId {
        TokenId::new(self.payment_token.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MissionConfig::default();
        assert_eq!(config.task_timeout(), Duration::from_secs(120));
        assert_eq!(config.auto_release_window(), chrono::Duration::hours(48));
        assert_eq!(config.proof_freshness(), chrono::Duration::minutes(5));
        assert_eq!(config.token_id(), TokenId::usdc());
    }

    #[test]
    fn test_out_of_range_windows_use_defaults() {
        let config = MissionConfig {
            proof_freshness_secs: u64::MAX,
            auto_release_hours: i64::MAX as u64,
            challenge_period_secs: 1 << 62,
            ..MissionConfig::default()
        };
        assert_eq!(config.proof_freshness(), chrono::Duration::minutes(5));
        assert_eq!(config.auto_release_window(), chrono::Duration::hours(48));
        assert_eq!(config.challenge_period(), chrono::Duration::hours(2));

        let config = MissionConfig {
            auto_release_hours: 24 * 365,
            ..MissionConfig::default()
        };
        assert_eq!(config.auto_release_window(), chrono::Duration::days(365));
    }

    #[test]
    fn test_from_env_falls_back_on_garbage() {
        std::env::set_var("MISSIONPAY_SESSION_CAPACITY", "lots");
        std::env::set_var("MISSIONPAY_CHALLENGE_PERIOD_SECS", "60");
        let config = MissionConfig::from_env();
        std::env::remove_var("MISSIONPAY_SESSION_CAPACITY");
        std::env::remove_var("MISSIONPAY_CHALLENGE_PERIOD_SECS");

        assert_eq!(config.session_capacity, 10_000);
        assert_eq!(config.challenge_period_secs, 60);
    }
}
