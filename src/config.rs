//! Configuration
//!
//! Every component has a `Default` matching the reference policy, and
//! [`AppConfig::from_env`] applies environment overrides on top.

use std::collections::BTreeMap;
use std::time::Duration as StdDuration;

use chrono::Duration;
use thiserror::Error;
use tracing::warn;

use crate::network::auth::AuthConfig;
use crate::network::server::ServerConfig;
use crate::round::schedule::RevealPolicy;
use crate::round::state::DrawCategory;

/// Round engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long a round stays open.
    pub round_duration: Duration,
    /// Wait imposed after a wrong guess.
    pub guess_cooldown: Duration,
    /// Reveal cadence.
    pub reveal_policy: RevealPolicy,
    /// How often the scheduler ticks open rounds.
    pub tick_interval: StdDuration,
    /// Capacity of the round event broadcast channel.
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            round_duration: Duration::days(3),
            guess_cooldown: Duration::minutes(1),
            reveal_policy: RevealPolicy::default(),
            tick_interval: StdDuration::from_secs(5),
            event_capacity: 256,
        }
    }
}

/// Completed-round retention configuration.
#[derive(Debug, Clone)]
pub struct RetentionConfig {
    /// Rounds kept per category. Categories without a cap are never swept.
    pub caps: BTreeMap<DrawCategory, usize>,
    /// Interval between sweeps.
    pub period: StdDuration,
    /// Delay before the first sweep after startup.
    pub initial_delay: StdDuration,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        let caps = BTreeMap::from([
            (DrawCategory::Daily, 15),
            (DrawCategory::Weekly, 5),
            (DrawCategory::Monthly, 3),
            (DrawCategory::Mystery, 10),
        ]);

        Self {
            caps,
            period: StdDuration::from_secs(7 * 24 * 60 * 60),
            initial_delay: StdDuration::from_secs(10),
        }
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A duration that must be positive was zero or negative.
    #[error("{0} must be positive")]
    NonPositive(&'static str),
}

/// Full application configuration.
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    /// Engine settings.
    pub engine: EngineConfig,
    /// Retention settings.
    pub retention: RetentionConfig,
    /// Gateway settings.
    pub server: ServerConfig,
    /// Token validation settings.
    pub auth: AuthConfig,
}

impl AppConfig {
    /// Defaults with environment overrides.
    ///
    /// | Variable | Meaning |
    /// |----------|---------|
    /// | `ROUND_DURATION_SECS` | round length |
    /// | `GUESS_COOLDOWN_SECS` | wrong-guess cooldown |
    /// | `TICK_INTERVAL_SECS` | scheduler period |
    /// | `RETENTION_PERIOD_SECS` | sweep period |
    /// | `RETENTION_INITIAL_DELAY_SECS` | first sweep delay |
    /// | `RETENTION_CAP_DAILY` (etc.) | per-category cap |
    /// | `BIND_ADDR`, `MAX_CONNECTIONS` | gateway |
    /// | `AUTH_*` | see [`AuthConfig::from_env`] |
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(duration) = env_seconds("ROUND_DURATION_SECS") {
            config.engine.round_duration = duration;
        }
        if let Some(duration) = env_seconds("GUESS_COOLDOWN_SECS") {
            config.engine.guess_cooldown = duration;
        }
        if let Some(secs) = env_u64("TICK_INTERVAL_SECS") {
            config.engine.tick_interval = StdDuration::from_secs(secs);
        }
        if let Some(secs) = env_u64("RETENTION_PERIOD_SECS") {
            config.retention.period = StdDuration::from_secs(secs);
        }
        if let Some(secs) = env_u64("RETENTION_INITIAL_DELAY_SECS") {
            config.retention.initial_delay = StdDuration::from_secs(secs);
        }
        for category in DrawCategory::ALL {
            let var = format!("RETENTION_CAP_{}", category.as_str().to_uppercase());
            if let Some(cap) = env_u64(&var) {
                config.retention.caps.insert(category, cap as usize);
            }
        }

        config.server = ServerConfig::from_env();
        config.auth = AuthConfig::from_env();
        config
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.round_duration <= Duration::zero() {
            return Err(ConfigError::NonPositive("round_duration"));
        }
        if self.engine.guess_cooldown < Duration::zero() {
            return Err(ConfigError::NonPositive("guess_cooldown"));
        }
        if self.engine.tick_interval.is_zero() {
            return Err(ConfigError::NonPositive("tick_interval"));
        }
        if self.retention.period.is_zero() {
            return Err(ConfigError::NonPositive("retention.period"));
        }
        Ok(())
    }
}

/// Parse an unsigned integer environment variable, warning on garbage.
pub(crate) fn env_u64(name: &str) -> Option<u64> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring {}={:?}: not an unsigned integer", name, raw);
            None
        }
    }
}

/// Read a seconds variable as a chrono duration.
fn env_seconds(name: &str) -> Option<Duration> {
    seconds_to_duration(name, env_u64(name)?)
}

fn seconds_to_duration(name: &str, secs: u64) -> Option<Duration> {
    let duration = i64::try_from(secs).ok().and_then(Duration::try_seconds);
    if duration.is_none() {
        warn!("Ignoring {}={}: out of range", name, secs);
    }
    duration
}
