//! Runtime configuration
//!
//! Every tunable of the orchestration core lives here. Values come from
//! `FINAGENT_*` environment variables (a `.env` file is honored) and fall
//! back to the defaults below.

use crate::error::OrchestrationError;
use crate::Result;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Minimum classifier confidence before a tool is chosen
    pub confidence_threshold: f32,
    /// Maximum invocation attempts per execution step
    pub retry_budget: u32,
    /// First backoff delay; doubled on every further retry
    pub backoff_base: Duration,
    /// Backoff cap
    pub backoff_max: Duration,
    /// Number of turns kept per session
    pub history_window: usize,
    /// Sessions idle for longer than this are evicted
    pub session_idle_timeout: Duration,
    /// Timeout for tools that do not declare one
    pub default_tool_timeout: Duration,
    /// Upper bound on chained intents in a single query
    pub max_intents_per_query: usize,
    /// Longest accepted query text, in characters
    pub max_query_chars: usize,
    /// Currency symbol used when rendering amounts
    pub currency_symbol: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            retry_budget: 2,
            backoff_base: Duration::from_millis(200),
            backoff_max: Duration::from_secs(5),
            history_window: 20,
            session_idle_timeout: Duration::from_secs(30 * 60),
            default_tool_timeout: Duration::from_secs(10),
            max_intents_per_query: 4,
            max_query_chars: 2000,
            currency_symbol: "₹".to_string(),
        }
    }
}

impl AgentConfig {
    /// Build a configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let defaults = Self::default();

        let config = Self {
            confidence_threshold: env_or(
                "FINAGENT_CONFIDENCE_THRESHOLD",
                defaults.confidence_threshold,
            )?,
            retry_budget: env_or("FINAGENT_RETRY_BUDGET", defaults.retry_budget)?,
            backoff_base: Duration::from_millis(env_or(
                "FINAGENT_BACKOFF_BASE_MS",
                defaults.backoff_base.as_millis() as u64,
            )?),
            backoff_max: Duration::from_millis(env_or(
                "FINAGENT_BACKOFF_MAX_MS",
                defaults.backoff_max.as_millis() as u64,
            )?),
            history_window: env_or("FINAGENT_HISTORY_WINDOW", defaults.history_window)?,
            session_idle_timeout: Duration::from_secs(env_or(
                "FINAGENT_SESSION_IDLE_SECS",
                defaults.session_idle_timeout.as_secs(),
            )?),
            default_tool_timeout: Duration::from_millis(env_or(
                "FINAGENT_TOOL_TIMEOUT_MS",
                defaults.default_tool_timeout.as_millis() as u64,
            )?),
            max_intents_per_query: env_or(
                "FINAGENT_MAX_INTENTS",
                defaults.max_intents_per_query,
            )?,
            max_query_chars: env_or("FINAGENT_MAX_QUERY_CHARS", defaults.max_query_chars)?,
            currency_symbol: env::var("FINAGENT_CURRENCY").unwrap_or(defaults.currency_symbol),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(OrchestrationError::Config(format!(
                "confidence threshold must be within [0, 1], got {}",
                self.confidence_threshold
            )));
        }
        if self.retry_budget == 0 {
            return Err(OrchestrationError::Config(
                "retry budget must allow at least one attempt".to_string(),
            ));
        }
        if self.history_window == 0 {
            return Err(OrchestrationError::Config(
                "history window must keep at least one turn".to_string(),
            ));
        }
        if self.max_intents_per_query == 0 {
            return Err(OrchestrationError::Config(
                "max intents per query must be at least 1".to_string(),
            ));
        }
        if self.default_tool_timeout.is_zero() {
            return Err(OrchestrationError::Config(
                "tool timeout must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Exponential backoff before attempt `next_attempt` (2 = first retry).
    pub fn backoff_for(&self, next_attempt: u32) -> Duration {
        let base_ms = self.backoff_base.as_millis();
        if base_ms == 0 {
            return Duration::ZERO;
        }
        let max_ms = self.backoff_max.as_millis().max(base_ms);
        let shift = next_attempt.saturating_sub(2).min(20);
        let backoff_ms = base_ms.saturating_mul(1u128 << shift).min(max_ms);
        Duration::from_millis(u64::try_from(backoff_ms).unwrap_or(u64::MAX))
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw.trim().parse::<T>().map_err(|e| {
            OrchestrationError::Config(format!("{} has invalid value {:?}: {}", key, raw, e))
        }),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    #[test]
    fn test_defaults_are_valid() {
        let config = AgentConfig::default();
        assert_ok!(config.validate());
        assert_eq!(config.retry_budget, 2);
        assert_eq!(config.history_window, 20);
    }

    #[test]
    fn test_validate_rejects_zero_window() {
        let config = AgentConfig {
            history_window: 0,
            ..AgentConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(OrchestrationError::Config(_))
        ));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = AgentConfig {
            backoff_base: Duration::from_millis(100),
            backoff_max: Duration::from_millis(350),
            ..AgentConfig::default()
        };
        assert_eq!(config.backoff_for(2), Duration::from_millis(100));
        assert_eq!(config.backoff_for(3), Duration::from_millis(200));
        assert_eq!(config.backoff_for(4), Duration::from_millis(350));
    }
}
