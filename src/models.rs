use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// A canonical (lower-case) `0x` + 40 hex character wallet address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    pub fn parse(input: &str) -> Result<Self, EngineError> {
        let trimmed = input.trim();
        let valid = trimmed.len() == 42
            && trimmed.starts_with("0x")
            && trimmed[2..].bytes().all(|b| b.is_ascii_hexdigit());
        if !valid {
            return Err(EngineError::InvalidAddress(input.to_string()));
        }
        Ok(Self(trimmed.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Address {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Chain {
    #[serde(rename = "eth")]
    Eth,
}

impl Chain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Chain::Eth => "eth",
        }
    }

    /// Symbol of the asset used to pay gas on this chain.
    pub fn native_symbol(&self) -> &'static str {
        match self {
            Chain::Eth => "ETH",
        }
    }
}

impl FromStr for Chain {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "eth" => Ok(Chain::Eth),
            other => Err(EngineError::UnsupportedChain(other.to_string())),
        }
    }
}

/// Requested lookback window, echoed back in the response metadata.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RangeKey {
    #[serde(rename = "7d")]
    Week,
    #[default]
    #[serde(rename = "30d")]
    Month,
    #[serde(rename = "90d")]
    Quarter,
}

impl RangeKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            RangeKey::Week => "7d",
            RangeKey::Month => "30d",
            RangeKey::Quarter => "90d",
        }
    }

    pub fn days(&self) -> i64 {
        match self {
            RangeKey::Week => 7,
            RangeKey::Month => 30,
            RangeKey::Quarter => 90,
        }
    }

    pub fn seconds(&self) -> i64 {
        self.days() * 86_400
    }
}

impl fmt::Display for RangeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RangeKey {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "7d" => Ok(RangeKey::Week),
            "30d" => Ok(RangeKey::Month),
            "90d" => Ok(RangeKey::Quarter),
            other => Err(EngineError::InvalidRange(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    NativeTransfer,
    TokenTransfer,
    ContractInteraction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Success,
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    #[serde(rename = "in")]
    In,
    #[serde(rename = "out")]
    Out,
    #[serde(rename = "self")]
    SelfTransfer,
}

/// A transfer or contract interaction as delivered by the chain-data provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub hash: String,
    /// Unix seconds.
    pub timestamp: i64,
    pub from: String,
    pub to: String,
    pub asset_symbol: String,
    pub amount: String,
    #[serde(rename = "gasFeeETH")]
    pub gas_fee_eth: String,
    pub status: TxStatus,
}

/// A [`RawEvent`] classified relative to a target address.
///
/// `direction` and `counterparty` are only ever produced by the classifier,
/// so the type exposes them read-only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedEvent {
    #[serde(flatten)]
    event: RawEvent,
    direction: Direction,
    counterparty: String,
}

impl NormalizedEvent {
    pub(crate) fn new(event: RawEvent, direction: Direction, counterparty: String) -> Self {
        Self {
            event,
            direction,
            counterparty,
        }
    }

    pub fn event(&self) -> &RawEvent {
        &self.event
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn counterparty(&self) -> &str {
        &self.counterparty
    }

    pub fn hash(&self) -> &str {
        &self.event.hash
    }

    pub fn timestamp(&self) -> i64 {
        self.event.timestamp
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub tx_count: usize,
    pub active_days: usize,
    #[serde(rename = "totalInETH")]
    pub total_in_eth: String,
    #[serde(rename = "totalOutETH")]
    pub total_out_eth: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSeriesPoint {
    /// `YYYY-MM-DD`, UTC.
    pub date: String,
    pub tx_count: usize,
    pub in_count: usize,
    pub out_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterpartyRow {
    pub address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub tx_count: usize,
    #[serde(rename = "totalInETH")]
    pub total_in_eth: String,
    #[serde(rename = "totalOutETH")]
    pub total_out_eth: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub chain: Chain,
    pub range: RangeKey,
    pub data_source: String,
    pub cached: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeResponse {
    pub summary: Summary,
    pub timeseries: Vec<TimeSeriesPoint>,
    pub top_counterparties: Vec<CounterpartyRow>,
    pub transactions: Vec<NormalizedEvent>,
    pub metadata: Metadata,
}
