use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use chrono::DateTime;
use ethers_core::types::{TransactionReceipt, H256, U256};
use ethers_core::utils::format_units;
use ethers_providers::{Http, Middleware, Provider};
use futures_util::{stream, StreamExt};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::{Config, DataSourceKind};
use crate::models::{Address, EventType, RangeKey, RawEvent, TxStatus};

const TRANSFER_CATEGORIES: &[&str] = &["external", "internal", "erc20", "erc721", "erc1155"];
const SECONDS_PER_BLOCK: i64 = 12;
const PAGE_SIZE: &str = "0x3e8";

/// Where raw events come from.
#[derive(Clone)]
pub enum EventSource {
    Alchemy(EthClient),
    Sample,
    /// A JSON array of raw events on disk, used as-is.
    File(PathBuf),
}

impl EventSource {
    pub fn from_config(config: &Config) -> Result<Self> {
        match config.data_source {
            DataSourceKind::Sample => Ok(Self::Sample),
            DataSourceKind::Alchemy => {
                let url = config.require_rpc_url()?;
                let client =
                    EthClient::new(url, config.max_transfer_pages, config.receipt_concurrency)?;
                Ok(Self::Alchemy(client))
            }
        }
    }

    /// Name echoed as `metadata.dataSource`.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Alchemy(_) => "Alchemy",
            Self::Sample => "Sample",
            Self::File(_) => "File",
        }
    }

    /// Events touching `address` with `timestamp >= now - range`. File
    /// sources are a fixed snapshot and are returned unfiltered.
    pub async fn fetch_events(
        &self,
        address: &Address,
        range: RangeKey,
        now: i64,
    ) -> Result<Vec<RawEvent>> {
        match self {
            Self::Alchemy(client) => client.fetch_events(address, range, now).await,
            Self::Sample => Ok(sample_events(address, now)),
            Self::File(path) => read_event_file(path).await,
        }
    }
}

#[derive(Clone)]
pub struct EthClient {
    provider: Provider<Http>,
    max_pages: usize,
    receipt_concurrency: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TransferQuery<'a> {
    from_block: String,
    to_block: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    from_address: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    to_address: Option<&'a str>,
    category: &'static [&'static str],
    with_metadata: bool,
    exclude_zero_value: bool,
    max_count: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    page_key: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransferPage {
    #[serde(default)]
    transfers: Vec<AssetTransfer>,
    page_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssetTransfer {
    unique_id: String,
    hash: String,
    from: String,
    to: Option<String>,
    asset: Option<String>,
    category: String,
    #[serde(default)]
    raw_contract: RawContract,
    metadata: Option<TransferMetadata>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RawContract {
    value: Option<String>,
    decimal: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransferMetadata {
    block_timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ReceiptInfo {
    gas_fee_eth: String,
    status: TxStatus,
}

enum Side {
    From,
    To,
}

impl EthClient {
    pub fn new(rpc_url: &str, max_pages: usize, receipt_concurrency: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .no_proxy()
            .build()
            .context("failed to build reqwest client")?;
        let url = Url::parse(rpc_url).context("invalid ETH_RPC_URL")?;
        let transport = Http::new_with_client(url, client);
        let provider = Provider::new(transport);
        Ok(Self {
            provider,
            max_pages: max_pages.max(1),
            receipt_concurrency: receipt_concurrency.max(1),
        })
    }

    pub async fn fetch_events(
        &self,
        address: &Address,
        range: RangeKey,
        now: i64,
    ) -> Result<Vec<RawEvent>> {
        let latest = self
            .provider
            .get_block_number()
            .await
            .context("failed to fetch latest block number")?;
        let blocks_back = (range.seconds() + SECONDS_PER_BLOCK - 1) / SECONDS_PER_BLOCK;
        let start_block = latest.as_u64().saturating_sub(blocks_back as u64);

        let mut transfers = self
            .fetch_transfers(address, Side::From, start_block)
            .await?;
        transfers.extend(self.fetch_transfers(address, Side::To, start_block).await?);

        let cutoff = now - range.seconds();
        let mut seen = HashSet::new();
        let mut kept = Vec::new();
        for transfer in transfers {
            if !seen.insert(transfer.unique_id.clone()) {
                continue;
            }
            if transfer.to.is_none() {
                tracing::debug!("skipping contract creation {}", transfer.hash);
                continue;
            }
            let timestamp = transfer_timestamp(&transfer)?;
            if timestamp >= cutoff {
                kept.push((transfer, timestamp));
            }
        }

        let receipts = self
            .fetch_receipts(kept.iter().map(|(t, _)| t.hash.as_str()))
            .await?;

        let events = build_events(&kept, &receipts)?;

        tracing::info!(
            "fetched {} events for {} over {} (from block {})",
            events.len(),
            address,
            range,
            start_block
        );
        Ok(events)
    }

    async fn fetch_transfers(
        &self,
        address: &Address,
        side: Side,
        start_block: u64,
    ) -> Result<Vec<AssetTransfer>> {
        let mut out = Vec::new();
        let mut page_key = None;

        for page in 0..self.max_pages {
            let (from_address, to_address) = match side {
                Side::From => (Some(address.as_str()), None),
                Side::To => (None, Some(address.as_str())),
            };
            let query = TransferQuery {
                from_block: format!("0x{:x}", start_block),
                to_block: "latest",
                from_address,
                to_address,
                category: TRANSFER_CATEGORIES,
                with_metadata: true,
                exclude_zero_value: false,
                max_count: PAGE_SIZE,
                page_key: page_key.take(),
            };
            let result: TransferPage = self
                .provider
                .request("alchemy_getAssetTransfers", [query])
                .await
                .with_context(|| format!("alchemy_getAssetTransfers failed on page {}", page))?;

            out.extend(result.transfers);
            match next_page(result.page_key, page + 1, self.max_pages, address)? {
                Some(key) => page_key = Some(key),
                None => return Ok(out),
            }
        }

        Ok(out)
    }

    async fn fetch_receipts<'a>(
        &self,
        hashes: impl Iterator<Item = &'a str>,
    ) -> Result<HashMap<String, ReceiptInfo>> {
        let unique: HashSet<String> = hashes.map(|h| h.to_ascii_lowercase()).collect();

        let results: Vec<(String, Result<ReceiptInfo>)> = stream::iter(unique)
            .map(|hash| async move {
                let info = self.fetch_receipt(&hash).await;
                (hash, info)
            })
            .buffer_unordered(self.receipt_concurrency)
            .collect()
            .await;

        results
            .into_iter()
            .map(|(hash, info)| info.map(|info| (hash, info)))
            .collect()
    }

    async fn fetch_receipt(&self, hash: &str) -> Result<ReceiptInfo> {
        let tx_hash: H256 = hash
            .parse()
            .with_context(|| format!("invalid transaction hash {}", hash))?;
        let receipt = self
            .provider
            .get_transaction_receipt(tx_hash)
            .await
            .with_context(|| format!("failed to fetch receipt {}", hash))?
            .ok_or_else(|| anyhow!("no receipt for {}", hash))?;
        receipt_info(&receipt)
    }
}

/// Continuation key for the next page, or an error when more history exists
/// than the page cap allows. A truncated history would aggregate as if it
/// were complete.
fn next_page(
    page_key: Option<String>,
    pages_read: usize,
    max_pages: usize,
    address: &Address,
) -> Result<Option<String>> {
    match page_key {
        Some(_) if pages_read >= max_pages => Err(anyhow!(
            "transfer history for {} exceeds {} pages (raise MAX_TRANSFER_PAGES)",
            address,
            max_pages
        )),
        key => Ok(key),
    }
}

async fn read_event_file(path: &Path) -> Result<Vec<RawEvent>> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid event file {}", path.display()))
}

fn receipt_info(receipt: &TransactionReceipt) -> Result<ReceiptInfo> {
    let hash = receipt.transaction_hash;
    let gas_used = receipt
        .gas_used
        .ok_or_else(|| anyhow!("receipt {:?} has no gasUsed", hash))?;
    let price = receipt
        .effective_gas_price
        .ok_or_else(|| anyhow!("receipt {:?} has no effectiveGasPrice", hash))?;
    let fee = gas_used
        .checked_mul(price)
        .ok_or_else(|| anyhow!("gas fee overflow for {:?}", hash))?;
    let status = match receipt.status.map(|s| s.as_u64()) {
        Some(0) => TxStatus::Fail,
        Some(1) => TxStatus::Success,
        Some(other) => return Err(anyhow!("receipt {:?} has status {}", hash, other)),
        None => return Err(anyhow!("receipt {:?} has no status", hash)),
    };
    Ok(ReceiptInfo {
        gas_fee_eth: trim_decimal(&format_units(fee, "ether")?),
        status,
    })
}

/// Converts transfers into events. A transaction pays gas once, so its fee
/// is carried by its first event and the rest carry `0`.
fn build_events(
    kept: &[(AssetTransfer, i64)],
    receipts: &HashMap<String, ReceiptInfo>,
) -> Result<Vec<RawEvent>> {
    let mut events = Vec::with_capacity(kept.len());
    let mut charged = HashSet::new();
    for (transfer, timestamp) in kept {
        let receipt = receipts
            .get(&transfer.hash.to_ascii_lowercase())
            .ok_or_else(|| anyhow!("missing receipt for {}", transfer.hash))?;
        let Some(mut event) = to_raw_event(transfer, *timestamp, receipt)? else {
            continue;
        };
        if !charged.insert(event.hash.clone()) {
            event.gas_fee_eth = "0".to_string();
        }
        events.push(event);
    }
    Ok(events)
}

fn transfer_timestamp(transfer: &AssetTransfer) -> Result<i64> {
    let raw = transfer
        .metadata
        .as_ref()
        .map(|m| m.block_timestamp.as_str())
        .ok_or_else(|| anyhow!("transfer {} has no block timestamp", transfer.hash))?;
    let parsed = DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("bad block timestamp {:?} on {}", raw, transfer.hash))?;
    Ok(parsed.timestamp())
}

fn to_raw_event(
    transfer: &AssetTransfer,
    timestamp: i64,
    receipt: &ReceiptInfo,
) -> Result<Option<RawEvent>> {
    let Some(to) = transfer.to.clone() else {
        return Ok(None);
    };

    let value = match transfer.raw_contract.value.as_deref() {
        Some(hex) => parse_hex_u256(hex)?,
        // ERC-721 transfers carry no value: one token moved.
        None if transfer.category == "erc721" => U256::one(),
        None => U256::zero(),
    };
    let decimals = match transfer.raw_contract.decimal.as_deref() {
        Some(hex) => {
            let decimals = parse_hex_u256(hex)?;
            if decimals > U256::from(77u64) {
                return Err(anyhow!("unsupported decimals {} on {}", hex, transfer.hash));
            }
            decimals.low_u32()
        }
        None if is_native(&transfer.category) => 18,
        None => 0,
    };

    let event_type = match transfer.category.as_str() {
        "external" if value.is_zero() => EventType::ContractInteraction,
        category if is_native(category) => EventType::NativeTransfer,
        _ => EventType::TokenTransfer,
    };

    let asset_symbol = match &transfer.asset {
        Some(asset) if !asset.is_empty() => asset.clone(),
        _ if is_native(&transfer.category) => "ETH".to_string(),
        _ => "UNKNOWN".to_string(),
    };

    Ok(Some(RawEvent {
        event_type,
        hash: transfer.hash.to_ascii_lowercase(),
        timestamp,
        from: transfer.from.to_ascii_lowercase(),
        to: to.to_ascii_lowercase(),
        asset_symbol,
        amount: trim_decimal(&format_units(value, decimals)?),
        gas_fee_eth: receipt.gas_fee_eth.clone(),
        status: receipt.status,
    }))
}

fn is_native(category: &str) -> bool {
    matches!(category, "external" | "internal")
}

fn parse_hex_u256(hex: &str) -> Result<U256> {
    let digits = hex.trim_start_matches("0x");
    if digits.is_empty() {
        return Ok(U256::zero());
    }
    U256::from_str_radix(digits, 16).with_context(|| format!("invalid hex quantity {:?}", hex))
}

/// `0.500000000000000000` -> `0.5`, `1.000` -> `1`.
fn trim_decimal(value: &str) -> String {
    if !value.contains('.') {
        return value.to_string();
    }
    value
        .trim_end_matches('0')
        .trim_end_matches('.')
        .to_string()
}

/// Fixed demo history relative to `now`: one inbound transfer, one
/// zero-value contract call and one outbound transfer.
pub fn sample_events(address: &Address, now: i64) -> Vec<RawEvent> {
    let me = address.as_str().to_string();
    vec![
        RawEvent {
            event_type: EventType::NativeTransfer,
            hash: format!("0x{}", "a".repeat(64)),
            timestamp: now - 3600 * 2,
            from: "0x1111111111111111111111111111111111111111".to_string(),
            to: me.clone(),
            asset_symbol: "ETH".to_string(),
            amount: "0.50".to_string(),
            gas_fee_eth: "0.0012".to_string(),
            status: TxStatus::Success,
        },
        RawEvent {
            event_type: EventType::ContractInteraction,
            hash: format!("0x{}", "b".repeat(64)),
            timestamp: now - 3600 * 10,
            from: me.clone(),
            to: "0x2222222222222222222222222222222222222222".to_string(),
            asset_symbol: "ETH".to_string(),
            amount: "0".to_string(),
            gas_fee_eth: "0.0030".to_string(),
            status: TxStatus::Success,
        },
        RawEvent {
            event_type: EventType::NativeTransfer,
            hash: format!("0x{}", "c".repeat(64)),
            timestamp: now - 3600 * 30,
            from: me,
            to: "0x3333333333333333333333333333333333333333".to_string(),
            asset_symbol: "ETH".to_string(),
            amount: "0.12".to_string(),
            gas_fee_eth: "0.0010".to_string(),
            status: TxStatus::Success,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers_core::types::U64;

    const PAGE: &str = r#"{
        "transfers": [
            {
                "blockNum": "0x1283f3a",
                "uniqueId": "0xabc:external",
                "hash": "0xAB00000000000000000000000000000000000000000000000000000000000001",
                "from": "0x1111111111111111111111111111111111111111",
                "to": "0xAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA",
                "value": 0.5,
                "asset": "ETH",
                "category": "external",
                "rawContract": { "value": "0x6f05b59d3b20000", "address": null, "decimal": "0x12" },
                "metadata": { "blockTimestamp": "2025-12-18T10:00:00.000Z" }
            },
            {
                "blockNum": "0x1283f3b",
                "uniqueId": "0xdef:log:3",
                "hash": "0xab00000000000000000000000000000000000000000000000000000000000002",
                "from": "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
                "to": "0x2222222222222222222222222222222222222222",
                "value": 12.5,
                "asset": "USDC",
                "category": "erc20",
                "rawContract": { "value": "0xbebc20", "address": "0xa0b8", "decimal": "0x6" },
                "metadata": { "blockTimestamp": "2025-12-18T11:00:00.000Z" }
            }
        ],
        "pageKey": "next-page"
    }"#;

    fn receipt() -> ReceiptInfo {
        ReceiptInfo {
            gas_fee_eth: "0.00042".to_string(),
            status: TxStatus::Success,
        }
    }

    #[test]
    fn decodes_alchemy_transfer_page() {
        let page: TransferPage = serde_json::from_str(PAGE).unwrap();
        assert_eq!(page.transfers.len(), 2);
        assert_eq!(page.page_key.as_deref(), Some("next-page"));
        assert_eq!(transfer_timestamp(&page.transfers[0]).unwrap(), 1_766_052_000);
    }

    #[test]
    fn native_transfer_amount_is_exact() {
        let page: TransferPage = serde_json::from_str(PAGE).unwrap();
        let event = to_raw_event(&page.transfers[0], 1, &receipt())
            .unwrap()
            .unwrap();
        assert_eq!(event.event_type, EventType::NativeTransfer);
        assert_eq!(event.amount, "0.5");
        assert_eq!(event.asset_symbol, "ETH");
        assert_eq!(event.to, "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa");
        assert_eq!(event.gas_fee_eth, "0.00042");
    }

    #[test]
    fn token_transfer_uses_contract_decimals() {
        let page: TransferPage = serde_json::from_str(PAGE).unwrap();
        let event = to_raw_event(&page.transfers[1], 1, &receipt())
            .unwrap()
            .unwrap();
        assert_eq!(event.event_type, EventType::TokenTransfer);
        assert_eq!(event.asset_symbol, "USDC");
        assert_eq!(event.amount, "12.5");
    }

    #[test]
    fn zero_value_external_is_contract_interaction() {
        let mut page: TransferPage = serde_json::from_str(PAGE).unwrap();
        let mut transfer = page.transfers.remove(0);
        transfer.raw_contract.value = Some("0x0".to_string());
        let event = to_raw_event(&transfer, 1, &receipt()).unwrap().unwrap();
        assert_eq!(event.event_type, EventType::ContractInteraction);
        assert_eq!(event.amount, "0");
    }

    #[test]
    fn contract_creation_is_skipped() {
        let mut page: TransferPage = serde_json::from_str(PAGE).unwrap();
        let mut transfer = page.transfers.remove(0);
        transfer.to = None;
        assert!(to_raw_event(&transfer, 1, &receipt()).unwrap().is_none());
    }

    #[test]
    fn receipt_fee_and_status() {
        let mut receipt = TransactionReceipt::default();
        receipt.gas_used = Some(U256::from(21_000u64));
        receipt.effective_gas_price = Some(U256::from(20_000_000_000u64));
        receipt.status = Some(U64::from(0u64));
        let info = receipt_info(&receipt).unwrap();
        assert_eq!(info.gas_fee_eth, "0.00042");
        assert_eq!(info.status, TxStatus::Fail);
    }

    #[test]
    fn receipt_with_missing_fields_is_rejected() {
        let mut receipt = TransactionReceipt::default();
        receipt.transaction_hash = H256::repeat_byte(0xab);
        let err = receipt_info(&receipt).unwrap_err().to_string();
        assert!(err.contains("gasUsed"), "{err}");
        assert!(err.contains("abab"), "{err}");

        receipt.gas_used = Some(U256::from(21_000u64));
        let err = receipt_info(&receipt).unwrap_err().to_string();
        assert!(err.contains("effectiveGasPrice"), "{err}");

        receipt.effective_gas_price = Some(U256::from(1u64));
        let err = receipt_info(&receipt).unwrap_err().to_string();
        assert!(err.contains("no status"), "{err}");

        receipt.status = Some(U64::from(1u64));
        assert_eq!(receipt_info(&receipt).unwrap().status, TxStatus::Success);
    }

    #[test]
    fn pagination_stops_at_last_page() {
        let address = Address::parse("0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa").unwrap();
        assert_eq!(
            next_page(Some("k".to_string()), 1, 3, &address).unwrap(),
            Some("k".to_string())
        );
        assert_eq!(next_page(None, 3, 3, &address).unwrap(), None);
    }

    #[test]
    fn hitting_the_page_cap_is_an_error() {
        let address = Address::parse("0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa").unwrap();
        let err = next_page(Some("more".to_string()), 3, 3, &address)
            .unwrap_err()
            .to_string();
        assert!(err.contains("MAX_TRANSFER_PAGES"), "{err}");
    }

    #[test]
    fn gas_fee_is_carried_once_per_transaction() {
        let page: TransferPage = serde_json::from_str(PAGE).unwrap();
        let eth = page.transfers[0].clone();
        let mut token = page.transfers[1].clone();
        token.hash = eth.hash.clone();
        token.from = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa".to_string();

        let receipts = HashMap::from([(eth.hash.to_ascii_lowercase(), receipt())]);
        let events = build_events(&[(eth, 10), (token, 10)], &receipts).unwrap();

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].gas_fee_eth, "0.00042");
        assert_eq!(events[1].gas_fee_eth, "0");
        assert_eq!(events[1].status, TxStatus::Success);
    }

    #[test]
    fn missing_receipt_fails_the_batch() {
        let page: TransferPage = serde_json::from_str(PAGE).unwrap();
        let kept = vec![(page.transfers[0].clone(), 10)];
        assert!(build_events(&kept, &HashMap::new()).is_err());
    }

    #[test]
    fn trims_trailing_zeros() {
        assert_eq!(trim_decimal("0.500000000000000000"), "0.5");
        assert_eq!(trim_decimal("1.000"), "1");
        assert_eq!(trim_decimal("100"), "100");
        assert_eq!(trim_decimal("0.000000000000000000"), "0");
    }

    #[test]
    fn sample_events_all_involve_address() {
        let address = Address::parse("0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa").unwrap();
        let events = sample_events(&address, 1_766_100_000);
        assert_eq!(events.len(), 3);
        assert!(events
            .iter()
            .all(|e| e.from == address.as_str() || e.to == address.as_str()));
    }
}
