//! Configuration types.

use std::str::FromStr;
use std::time::Duration;

use alloy_primitives::Address;
use secrecy::SecretString;

use crate::error::ConfigError;

/// Discovery tuning.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Maximum index/fetch requests in flight. 1 means strictly sequential.
    pub read_concurrency: usize,
    /// Index reads after which discovery gives up instead of looping forever.
    pub max_jobs_per_owner: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            read_concurrency: 1,
            max_jobs_per_owner: 1024,
        }
    }
}

/// JSON-RPC gateway settings.
#[derive(Debug, Clone)]
pub struct RpcConfig {
    pub url: SecretString,
    /// Account the node signs writes with.
    pub from: Option<Address>,
    pub request_timeout: Duration,
    pub receipt_poll_interval: Duration,
    pub receipt_timeout: Duration,
}

/// Service configuration, built from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub rpc: RpcConfig,
    /// Recurring-transactions contract address.
    pub contract: Address,
    /// Owner connected at startup, if any.
    pub owner: Option<Address>,
    pub http_port: u16,
    pub discovery: DiscoveryConfig,
    /// Re-run discovery after a confirmed cancellation.
    pub refresh_after_cancel: bool,
}

impl AppConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let url = lookup("RECUR_RPC_URL")
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar("RECUR_RPC_URL".into()))?;

        let contract = lookup("RECUR_CONTRACT_ADDRESS")
            .ok_or_else(|| ConfigError::MissingEnvVar("RECUR_CONTRACT_ADDRESS".into()))
            .and_then(|s| parse_value("RECUR_CONTRACT_ADDRESS", &s))?;

        let owner = lookup("RECUR_OWNER")
            .filter(|s| !s.trim().is_empty())
            .map(|s| parse_value::<Address>("RECUR_OWNER", &s))
            .transpose()?;

        let http_port = parse_or(&lookup, "RECUR_HTTP_PORT", 8080u16)?;
        let read_concurrency = parse_or(&lookup, "RECUR_READ_CONCURRENCY", 1usize)?.max(1);
        let max_jobs_per_owner = parse_or(&lookup, "RECUR_MAX_JOBS", 1024u64)?;
        let refresh_after_cancel = parse_or(&lookup, "RECUR_REFRESH_AFTER_CANCEL", false)?;
        let poll_ms = parse_or(&lookup, "RECUR_RECEIPT_POLL_MS", 1000u64)?.max(1);
        let receipt_secs = parse_or(&lookup, "RECUR_RECEIPT_TIMEOUT_SECS", 120u64)?;
        let rpc_secs = parse_or(&lookup, "RECUR_RPC_TIMEOUT_SECS", 30u64)?;

        Ok(Self {
            rpc: RpcConfig {
                url: SecretString::from(url),
                from: owner,
                request_timeout: Duration::from_secs(rpc_secs),
                receipt_poll_interval: Duration::from_millis(poll_ms),
                receipt_timeout: Duration::from_secs(receipt_secs),
            },
            contract,
            owner,
            http_port,
            discovery: DiscoveryConfig {
                read_concurrency,
                max_jobs_per_owner,
            },
            refresh_after_cancel,
        })
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => parse_value(key, &raw),
        _ => Ok(default),
    }
}
