//! Environment-backed runtime configuration for `market-smoke`.

use std::{env, error::Error, fmt, time::Duration};

use market_chat::TicketFeedConfig;
use market_core::RetryPolicy;
use market_rest::ResourceClientConfig;

const DEFAULT_POLL_INTERVAL_MS: u64 = 3_000;
const DEFAULT_SEND_REFRESH_DELAY_MS: u64 = 500;
const DEFAULT_PAGE_LIMIT: u32 = 200;
const DEFAULT_MAX_RETRIES: u32 = 2;
const DEFAULT_RETRY_DELAY_MS: u64 = 400;
const DEFAULT_ATTEMPT_TIMEOUT_MS: u64 = 8_000;

/// Runtime configuration used by the smoke binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmokeConfig {
    /// REST endpoint root, for example `https://api.example.test/rest/v1`.
    pub api_url: String,
    /// Project credential sent as both `apikey` and bearer token.
    pub api_key: String,
    /// Optional ticket to open and stream once the runtime is up.
    pub ticket_id: Option<String>,
    /// Optional author to send a probe message as.
    pub author_id: Option<String>,
    pub poll_interval_ms: u64,
    pub send_refresh_delay_ms: u64,
    pub page_limit: u32,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub attempt_timeout_ms: u64,
}

impl SmokeConfig {
    /// Parse configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let api_url = optional_trimmed_env("MARKET_API_URL", &mut lookup)
            .ok_or(ConfigError::MissingValue { key: "MARKET_API_URL" })?;
        let api_key = optional_trimmed_env("MARKET_API_KEY", &mut lookup)
            .ok_or(ConfigError::MissingValue { key: "MARKET_API_KEY" })?;

        let ticket_id = optional_trimmed_env("MARKET_TICKET_ID", &mut lookup);
        let author_id = optional_trimmed_env("MARKET_AUTHOR_ID", &mut lookup);

        let poll_interval_ms = parse_optional_u64(
            "MARKET_POLL_INTERVAL_MS",
            DEFAULT_POLL_INTERVAL_MS,
            &mut lookup,
        )?;
        let send_refresh_delay_ms = parse_optional_u64(
            "MARKET_SEND_REFRESH_DELAY_MS",
            DEFAULT_SEND_REFRESH_DELAY_MS,
            &mut lookup,
        )?;
        let page_limit =
            parse_optional_u32("MARKET_PAGE_LIMIT", DEFAULT_PAGE_LIMIT, &mut lookup)?;
        let max_retries =
            parse_optional_u32("MARKET_MAX_RETRIES", DEFAULT_MAX_RETRIES, &mut lookup)?;
        let retry_delay_ms =
            parse_optional_u64("MARKET_RETRY_DELAY_MS", DEFAULT_RETRY_DELAY_MS, &mut lookup)?;
        let attempt_timeout_ms = parse_optional_u64(
            "MARKET_ATTEMPT_TIMEOUT_MS",
            DEFAULT_ATTEMPT_TIMEOUT_MS,
            &mut lookup,
        )?;

        if poll_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "MARKET_POLL_INTERVAL_MS",
                value: "0".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }
        if page_limit == 0 {
            return Err(ConfigError::InvalidValue {
                key: "MARKET_PAGE_LIMIT",
                value: "0".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }

        Ok(Self {
            api_url,
            api_key,
            ticket_id,
            author_id,
            poll_interval_ms,
            send_refresh_delay_ms,
            page_limit,
            max_retries,
            retry_delay_ms,
            attempt_timeout_ms,
        })
    }

    /// Resource client configuration derived from the parsed environment.
    pub fn client_config(&self) -> ResourceClientConfig {
        ResourceClientConfig::new(&self.api_url, &self.api_key).with_retry(RetryPolicy::new(
            self.max_retries,
            self.retry_delay_ms,
            self.attempt_timeout_ms,
        ))
    }

    /// Feed tuning derived from the parsed environment.
    pub fn feed_config(&self) -> TicketFeedConfig {
        TicketFeedConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            send_refresh_delay: Duration::from_millis(self.send_refresh_delay_ms),
            page_limit: self.page_limit,
        }
    }
}

/// Errors produced while parsing runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required environment variable is absent or empty.
    MissingValue { key: &'static str },
    /// An environment variable could not be parsed.
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingValue { key } => write!(f, "missing required {key}"),
            Self::InvalidValue { key, value, reason } => {
                write!(f, "invalid {key}='{value}': {reason}")
            }
        }
    }
}

impl Error for ConfigError {}

fn optional_trimmed_env<F>(key: &'static str, lookup: &mut F) -> Option<String>
where
    F: FnMut(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn parse_optional_u32<F>(
    key: &'static str,
    default: u32,
    lookup: &mut F,
) -> Result<u32, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = lookup(key) else {
        return Ok(default);
    };
    value
        .parse::<u32>()
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}

fn parse_optional_u64<F>(
    key: &'static str,
    default: u64,
    lookup: &mut F,
) -> Result<u64, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = lookup(key) else {
        return Ok(default);
    };
    value
        .parse::<u64>()
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from_pairs(pairs: &[(&str, &str)]) -> Result<SmokeConfig, ConfigError> {
        let map = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect::<HashMap<_, _>>();
        SmokeConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn parses_required_fields_and_defaults() {
        let cfg = config_from_pairs(&[
            ("MARKET_API_URL", "https://api.example.test/rest/v1"),
            ("MARKET_API_KEY", "anon-key"),
        ])
        .expect("config should parse");

        assert_eq!(cfg.api_url, "https://api.example.test/rest/v1");
        assert_eq!(cfg.api_key, "anon-key");
        assert_eq!(cfg.ticket_id, None);
        assert_eq!(cfg.poll_interval_ms, DEFAULT_POLL_INTERVAL_MS);
        assert_eq!(cfg.page_limit, DEFAULT_PAGE_LIMIT);
        assert_eq!(cfg.max_retries, DEFAULT_MAX_RETRIES);
    }

    #[test]
    fn requires_url_and_key() {
        let err = config_from_pairs(&[("MARKET_API_KEY", "anon-key")])
            .expect_err("missing url should fail");
        assert!(matches!(
            err,
            ConfigError::MissingValue { key: "MARKET_API_URL" }
        ));

        let err = config_from_pairs(&[("MARKET_API_URL", "https://api.example.test")])
            .expect_err("missing key should fail");
        assert!(matches!(
            err,
            ConfigError::MissingValue { key: "MARKET_API_KEY" }
        ));
    }

    #[test]
    fn blank_values_count_as_missing() {
        let err = config_from_pairs(&[
            ("MARKET_API_URL", "   "),
            ("MARKET_API_KEY", "anon-key"),
        ])
        .expect_err("blank url should fail");
        assert!(matches!(
            err,
            ConfigError::MissingValue { key: "MARKET_API_URL" }
        ));
    }

    #[test]
    fn parses_tuning_overrides() {
        let cfg = config_from_pairs(&[
            ("MARKET_API_URL", "https://api.example.test/rest/v1"),
            ("MARKET_API_KEY", "anon-key"),
            ("MARKET_POLL_INTERVAL_MS", "1500"),
            ("MARKET_PAGE_LIMIT", "50"),
            ("MARKET_MAX_RETRIES", "5"),
        ])
        .expect("config should parse");

        assert_eq!(cfg.feed_config().poll_interval, Duration::from_millis(1500));
        assert_eq!(cfg.feed_config().page_limit, 50);
        assert_eq!(cfg.max_retries, 5);
    }

    #[test]
    fn rejects_invalid_numeric_values() {
        let err = config_from_pairs(&[
            ("MARKET_API_URL", "https://api.example.test/rest/v1"),
            ("MARKET_API_KEY", "anon-key"),
            ("MARKET_POLL_INTERVAL_MS", "soon"),
        ])
        .expect_err("invalid interval should fail");

        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "MARKET_POLL_INTERVAL_MS",
                ..
            }
        ));
    }

    #[test]
    fn rejects_zero_poll_interval_and_page_limit() {
        let err = config_from_pairs(&[
            ("MARKET_API_URL", "https://api.example.test/rest/v1"),
            ("MARKET_API_KEY", "anon-key"),
            ("MARKET_POLL_INTERVAL_MS", "0"),
        ])
        .expect_err("zero interval should fail");
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "MARKET_POLL_INTERVAL_MS",
                ..
            }
        ));

        let err = config_from_pairs(&[
            ("MARKET_API_URL", "https://api.example.test/rest/v1"),
            ("MARKET_API_KEY", "anon-key"),
            ("MARKET_PAGE_LIMIT", "0"),
        ])
        .expect_err("zero page limit should fail");
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "MARKET_PAGE_LIMIT",
                ..
            }
        ));
    }
}
