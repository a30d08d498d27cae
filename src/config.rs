use std::env;
use std::str::FromStr;

use crate::engine::{Labels, UnrelatedEventPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSourceKind {
    Alchemy,
    Sample,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub data_source: DataSourceKind,
    pub eth_rpc_url: Option<String>,
    pub database_url: String,
    pub http_bind_addr: String,
    pub cache_ttl_secs: u64,
    pub max_transfer_pages: usize,
    pub receipt_concurrency: usize,
    pub unrelated_events: UnrelatedEventPolicy,
    pub counterparty_labels: Labels,
    pub allowed_origins: Vec<String>,
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("missing ETH_RPC_URL env var (required when DATA_SOURCE=alchemy)")]
    MissingEthRpcUrl,
    #[error("invalid {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let data_source = match env::var("DATA_SOURCE")
            .unwrap_or_else(|_| "alchemy".to_string())
            .trim()
            .to_ascii_lowercase()
            .as_str()
        {
            "alchemy" => DataSourceKind::Alchemy,
            "sample" => DataSourceKind::Sample,
            other => {
                return Err(ConfigError::Invalid {
                    name: "DATA_SOURCE",
                    reason: format!("expected alchemy or sample, got {other:?}"),
                })
            }
        };

        let eth_rpc_url = env::var("ETH_RPC_URL").ok().filter(|s| !s.trim().is_empty());

        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://data/analyzer.db".to_string());
        let http_bind_addr = env::var("HTTP_BIND").unwrap_or_else(|_| "127.0.0.1:4000".to_string());
        let cache_ttl_secs = parse_var("CACHE_TTL_SECS", 300u64)?;
        let max_transfer_pages = parse_var("MAX_TRANSFER_PAGES", 10usize)?;
        let receipt_concurrency = parse_var("RECEIPT_CONCURRENCY", 8usize)?.max(1);
        let unrelated_events = match env::var("UNRELATED_EVENTS") {
            Ok(raw) => raw.parse::<UnrelatedEventPolicy>().map_err(|reason| ConfigError::Invalid {
                name: "UNRELATED_EVENTS",
                reason,
            })?,
            Err(_) => UnrelatedEventPolicy::default(),
        };
        let counterparty_labels = env::var("COUNTERPARTY_LABELS")
            .ok()
            .map(parse_labels)
            .unwrap_or_default();
        let allowed_origins = env::var("ALLOWED_ORIGINS")
            .ok()
            .map(parse_list)
            .filter(|list| !list.is_empty())
            .unwrap_or_else(default_origins);

        Ok(Self {
            data_source,
            eth_rpc_url,
            database_url,
            http_bind_addr,
            cache_ttl_secs,
            max_transfer_pages,
            receipt_concurrency,
            unrelated_events,
            counterparty_labels,
            allowed_origins,
        })
    }

    /// The RPC endpoint, required only when the live source is selected.
    pub fn require_rpc_url(&self) -> Result<&str, ConfigError> {
        self.eth_rpc_url
            .as_deref()
            .ok_or(ConfigError::MissingEthRpcUrl)
    }

    pub fn cache_enabled(&self) -> bool {
        self.cache_ttl_secs > 0
    }
}

fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

fn default_origins() -> Vec<String> {
    vec![
        "http://localhost:5173".to_string(),
        "http://localhost:3000".to_string(),
        "https://onchain-analyzer.netlify.app".to_string(),
    ]
}

fn parse_list(raw: String) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// `addr=label,addr=label`; entries without `=` are ignored.
fn parse_labels(raw: String) -> Labels {
    raw.split(',')
        .filter_map(|pair| pair.split_once('='))
        .map(|(addr, label)| (addr.trim().to_lowercase(), label.trim().to_string()))
        .filter(|(addr, label)| !addr.is_empty() && !label.is_empty())
        .collect()
}
