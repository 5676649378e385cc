//! Environment-sourced configuration.

use std::fmt::Display;
use std::str::FromStr;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::scheduler::{DEFAULT_MAX_CONCURRENT, DEFAULT_MAX_QUEUE};

const DEFAULT_MODEL: &str = "claude-sonnet-4-5";
const DEFAULT_HEALTH_PORT: u16 = 5000;

/// Process configuration. Required settings abort startup when missing;
/// everything else has a default or is optional.
#[derive(Clone)]
pub struct Config {
    pub slack_bot_token: SecretString,
    pub slack_app_token: SecretString,
    pub anthropic_api_key: SecretString,
    pub model: String,
    pub max_concurrent_agents: usize,
    pub max_queue_size: usize,
    /// Channel receiving the audit record for each trigger.
    pub log_channel_id: Option<String>,
    pub dry_run: bool,
    pub health_port: u16,
    pub credential_store: Option<CredentialStoreConfig>,
}

/// Remote credential store endpoint (Upstash-style REST).
#[derive(Clone)]
pub struct CredentialStoreConfig {
    pub url: String,
    pub token: SecretString,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            slack_bot_token: require_env("SLACK_BOT_TOKEN")?,
            slack_app_token: require_env("SLACK_APP_TOKEN")?,
            anthropic_api_key: require_env("ANTHROPIC_API_KEY")?,
            model: std::env::var("MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
            max_concurrent_agents: parse_or_default(
                "MAX_CONCURRENT_AGENTS",
                env_opt("MAX_CONCURRENT_AGENTS"),
                DEFAULT_MAX_CONCURRENT,
            )?,
            max_queue_size: parse_or_default(
                "MAX_QUEUE_SIZE",
                env_opt("MAX_QUEUE_SIZE"),
                DEFAULT_MAX_QUEUE,
            )?,
            log_channel_id: env_opt("LOG_CHANNEL_ID"),
            dry_run: parse_flag(env_opt("DRY_RUN")),
            health_port: parse_or_default(
                "HEALTH_PORT",
                env_opt("HEALTH_PORT"),
                DEFAULT_HEALTH_PORT,
            )?,
            credential_store: credential_store_from_env()?,
        })
    }
}

fn require_env(name: &str) -> Result<SecretString, ConfigError> {
    match env_opt(name) {
        Some(value) => Ok(SecretString::from(value)),
        None => Err(ConfigError::MissingEnvVar(name.to_string())),
    }
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn parse_or_default<T>(key: &str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match raw {
        None => Ok(default),
        Some(value) => value.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{value:?}: {e}"),
        }),
    }
}

fn parse_flag(raw: Option<String>) -> bool {
    matches!(
        raw.as_deref().map(str::to_ascii_lowercase).as_deref(),
        Some("1") | Some("true") | Some("yes")
    )
}

fn credential_store_from_env() -> Result<Option<CredentialStoreConfig>, ConfigError> {
    let url = env_opt("UPSTASH_REDIS_REST_URL");
    let token = env_opt("UPSTASH_REDIS_REST_TOKEN");
    match (url, token) {
        (Some(url), Some(token)) => Ok(Some(CredentialStoreConfig {
            url,
            token: SecretString::from(token),
        })),
        (None, None) => Ok(None),
        (Some(_), None) => Err(ConfigError::InvalidValue {
            key: "UPSTASH_REDIS_REST_TOKEN".to_string(),
            message: "required when UPSTASH_REDIS_REST_URL is set".to_string(),
        }),
        (None, Some(_)) => Err(ConfigError::InvalidValue {
            key: "UPSTASH_REDIS_REST_URL".to_string(),
            message: "required when UPSTASH_REDIS_REST_TOKEN is set".to_string(),
        }),
    }
}
