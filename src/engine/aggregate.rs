use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, NaiveDate};
use rust_decimal::Decimal;

use crate::amount::{self, AmountError, EthTotal};
use crate::engine::AnalysisContext;
use crate::error::{AmountField, EngineError};
use crate::models::{
    AnalyzeResponse, CounterpartyRow, Direction, Metadata, NormalizedEvent, RangeKey, RawEvent,
    Summary, TimeSeriesPoint,
};

#[derive(Debug, Default)]
struct DayCounts {
    tx_count: usize,
    in_count: usize,
    out_count: usize,
}

#[derive(Debug, Default)]
struct PartyTotals {
    tx_count: usize,
    total_in: EthTotal,
    total_out: EthTotal,
    volume: EthTotal,
}

/// Folds classified events into the response bundle.
///
/// `range` is echoed into the metadata only; events are not filtered by it.
/// The result is a pure function of the inputs, so repeated calls over the
/// same slice produce identical output.
pub fn aggregate(
    events: &[NormalizedEvent],
    range: RangeKey,
    ctx: &AnalysisContext,
) -> Result<AnalyzeResponse, EngineError> {
    let native = ctx.chain.native_symbol();

    let mut total_in = EthTotal::default();
    let mut total_out = EthTotal::default();
    let mut days: BTreeMap<NaiveDate, DayCounts> = BTreeMap::new();
    let mut parties: HashMap<&str, PartyTotals> = HashMap::new();

    for event in events {
        let raw = event.event();
        let date = utc_date(raw)?;
        let native_amount = checked_amount(raw, native)?;
        checked_gas_fee(raw)?;

        let day = days.entry(date).or_default();
        day.tx_count += 1;
        match event.direction() {
            Direction::In => day.in_count += 1,
            Direction::Out => day.out_count += 1,
            Direction::SelfTransfer => {}
        }

        let party = parties.entry(event.counterparty()).or_default();
        party.tx_count += 1;

        let Some(value) = native_amount else {
            continue;
        };
        match event.direction() {
            Direction::In => {
                total_in = add(total_in, value, raw)?;
                party.total_in = add(party.total_in, value, raw)?;
                party.volume = add(party.volume, value, raw)?;
            }
            Direction::Out => {
                total_out = add(total_out, value, raw)?;
                party.total_out = add(party.total_out, value, raw)?;
                party.volume = add(party.volume, value, raw)?;
            }
            Direction::SelfTransfer => {}
        }
    }

    let summary = Summary {
        tx_count: events.len(),
        active_days: days.len(),
        total_in_eth: total_in.render(),
        total_out_eth: total_out.render(),
    };

    let timeseries = days
        .into_iter()
        .map(|(date, counts)| TimeSeriesPoint {
            date: date.format("%Y-%m-%d").to_string(),
            tx_count: counts.tx_count,
            in_count: counts.in_count,
            out_count: counts.out_count,
        })
        .collect();

    let mut ranked: Vec<(&str, PartyTotals)> = parties.into_iter().collect();
    ranked.sort_by(|(addr_a, a), (addr_b, b)| rank_order(addr_a, a, addr_b, b));
    let top_counterparties = ranked
        .into_iter()
        .map(|(address, totals)| CounterpartyRow {
            address: address.to_string(),
            label: ctx.labels.get(address).cloned(),
            tx_count: totals.tx_count,
            total_in_eth: totals.total_in.render(),
            total_out_eth: totals.total_out.render(),
        })
        .collect();

    let mut transactions = events.to_vec();
    transactions.sort_by(|a, b| {
        b.timestamp()
            .cmp(&a.timestamp())
            .then_with(|| a.hash().cmp(b.hash()))
    });

    Ok(AnalyzeResponse {
        summary,
        timeseries,
        top_counterparties,
        transactions,
        metadata: Metadata {
            chain: ctx.chain,
            range,
            data_source: ctx.data_source.clone(),
            cached: false,
        },
    })
}

/// Most events first, then most native volume, then lowest address.
fn rank_order(addr_a: &str, a: &PartyTotals, addr_b: &str, b: &PartyTotals) -> Ordering {
    b.tx_count
        .cmp(&a.tx_count)
        .then_with(|| b.volume.cmp(&a.volume))
        .then_with(|| addr_a.cmp(addr_b))
}

fn utc_date(raw: &RawEvent) -> Result<NaiveDate, EngineError> {
    DateTime::from_timestamp(raw.timestamp, 0)
        .map(|dt| dt.date_naive())
        .ok_or_else(|| EngineError::InvalidTimestamp {
            hash: raw.hash.clone(),
            timestamp: raw.timestamp,
        })
}

/// Parses the amount when it is denominated in the native asset; other
/// assets are only checked for shape since they never enter a total.
fn checked_amount(raw: &RawEvent, native: &str) -> Result<Option<Decimal>, EngineError> {
    if raw.asset_symbol.trim().eq_ignore_ascii_case(native) {
        amount::parse_amount(&raw.amount)
            .map(Some)
            .map_err(|err| amount_error(raw, AmountField::Amount, &raw.amount, err))
    } else if amount::is_decimal_numeral(&raw.amount) {
        Ok(None)
    } else {
        Err(amount_error(
            raw,
            AmountField::Amount,
            &raw.amount,
            AmountError::Malformed,
        ))
    }
}

fn checked_gas_fee(raw: &RawEvent) -> Result<Decimal, EngineError> {
    amount::parse_amount(&raw.gas_fee_eth)
        .map_err(|err| amount_error(raw, AmountField::GasFee, &raw.gas_fee_eth, err))
}

fn amount_error(raw: &RawEvent, field: AmountField, value: &str, err: AmountError) -> EngineError {
    match err {
        AmountError::Malformed => EngineError::MalformedAmount {
            hash: raw.hash.clone(),
            field,
            value: value.to_string(),
        },
        AmountError::OutOfRange => EngineError::AmountOverflow {
            hash: raw.hash.clone(),
        },
    }
}

fn add(total: EthTotal, value: Decimal, raw: &RawEvent) -> Result<EthTotal, EngineError> {
    total
        .checked_add(value)
        .ok_or_else(|| EngineError::AmountOverflow {
            hash: raw.hash.clone(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::classify;
    use crate::models::{Address, Chain, EventType, TxStatus};

    const TARGET: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const P1: &str = "0x1111111111111111111111111111111111111111";
    const P2: &str = "0x2222222222222222222222222222222222222222";
    const P3: &str = "0x3333333333333333333333333333333333333333";

    // 2025-12-18T00:00:00Z
    const DAY: i64 = 1_766_016_000;

    fn ctx() -> AnalysisContext {
        AnalysisContext::new(Chain::Eth, "Alchemy")
    }

    fn raw(hash: &str, ts: i64, from: &str, to: &str, asset: &str, amount: &str) -> RawEvent {
        RawEvent {
            event_type: if asset == "ETH" {
                EventType::NativeTransfer
            } else {
                EventType::TokenTransfer
            },
            hash: hash.to_string(),
            timestamp: ts,
            from: from.to_string(),
            to: to.to_string(),
            asset_symbol: asset.to_string(),
            amount: amount.to_string(),
            gas_fee_eth: "0.001".to_string(),
            status: TxStatus::Success,
        }
    }

    fn classified(raws: &[RawEvent]) -> Vec<NormalizedEvent> {
        let target = Address::parse(TARGET).unwrap();
        raws.iter().map(|r| classify(&target, r).unwrap()).collect()
    }

    #[test]
    fn empty_input_yields_empty_views() {
        let out = aggregate(&[], RangeKey::Month, &ctx()).unwrap();
        assert_eq!(out.summary.tx_count, 0);
        assert_eq!(out.summary.active_days, 0);
        assert_eq!(out.summary.total_in_eth, "0.00");
        assert_eq!(out.summary.total_out_eth, "0.00");
        assert!(out.timeseries.is_empty());
        assert!(out.top_counterparties.is_empty());
        assert!(out.transactions.is_empty());
        assert_eq!(out.metadata.range, RangeKey::Month);
        assert!(!out.metadata.cached);
    }

    #[test]
    fn single_outbound_transfer() {
        let events = classified(&[raw("0x01", DAY + 60, TARGET, P1, "ETH", "0.12")]);
        let out = aggregate(&events, RangeKey::Week, &ctx()).unwrap();

        assert_eq!(out.summary.total_out_eth, "0.12");
        assert_eq!(out.summary.total_in_eth, "0.00");
        assert_eq!(
            out.timeseries,
            vec![TimeSeriesPoint {
                date: "2025-12-18".to_string(),
                tx_count: 1,
                in_count: 0,
                out_count: 1,
            }]
        );
        assert_eq!(
            out.top_counterparties,
            vec![CounterpartyRow {
                address: P1.to_string(),
                label: None,
                tx_count: 1,
                total_in_eth: "0.00".to_string(),
                total_out_eth: "0.12".to_string(),
            }]
        );
    }

    #[test]
    fn totals_only_count_native_asset() {
        let events = classified(&[
            raw("0x01", DAY, P1, TARGET, "ETH", "0.1"),
            raw("0x02", DAY, P1, TARGET, "eth", "0.2"),
            raw("0x03", DAY, P1, TARGET, "USDC", "5000"),
            raw("0x04", DAY, TARGET, TARGET, "ETH", "9"),
        ]);
        let out = aggregate(&events, RangeKey::Month, &ctx()).unwrap();
        assert_eq!(out.summary.tx_count, 4);
        assert_eq!(out.summary.total_in_eth, "0.30");
        assert_eq!(out.summary.total_out_eth, "0.00");
        assert_eq!(out.transactions.len(), 4);
    }

    #[test]
    fn self_events_count_toward_day_but_not_direction() {
        let events = classified(&[
            raw("0x01", DAY, TARGET, TARGET, "ETH", "1"),
            raw("0x02", DAY + 10, P1, TARGET, "ETH", "1"),
        ]);
        let out = aggregate(&events, RangeKey::Month, &ctx()).unwrap();
        assert_eq!(out.timeseries.len(), 1);
        assert_eq!(out.timeseries[0].tx_count, 2);
        assert_eq!(out.timeseries[0].in_count, 1);
        assert_eq!(out.timeseries[0].out_count, 0);

        let me = out
            .top_counterparties
            .iter()
            .find(|row| row.address == TARGET)
            .unwrap();
        assert_eq!(me.total_in_eth, "0.00");
        assert_eq!(me.total_out_eth, "0.00");
    }

    #[test]
    fn timeseries_is_sparse_and_ascending() {
        let events = classified(&[
            raw("0x01", DAY + 5 * 86_400, P1, TARGET, "ETH", "1"),
            raw("0x02", DAY, TARGET, P2, "ETH", "1"),
            raw("0x03", DAY + 86_399, TARGET, P2, "ETH", "1"),
        ]);
        let out = aggregate(&events, RangeKey::Month, &ctx()).unwrap();
        let dates: Vec<&str> = out.timeseries.iter().map(|p| p.date.as_str()).collect();
        assert_eq!(dates, vec!["2025-12-18", "2025-12-23"]);
        assert_eq!(out.summary.active_days, 2);
        assert_eq!(out.timeseries[0].out_count, 2);
    }

    #[test]
    fn counterparties_follow_tie_break_chain() {
        let events = classified(&[
            // P3: two events
            raw("0x01", DAY, P3, TARGET, "ETH", "0.01"),
            raw("0x02", DAY, TARGET, P3, "ETH", "0.01"),
            // P1 and P2: one event each, P2 has more volume
            raw("0x03", DAY, P1, TARGET, "ETH", "1"),
            raw("0x04", DAY, TARGET, P2, "ETH", "2"),
            // P1 ties with an address that sorts later
            raw("0x05", DAY, "0x4444444444444444444444444444444444444444", TARGET, "ETH", "1"),
        ]);
        let out = aggregate(&events, RangeKey::Month, &ctx()).unwrap();
        let order: Vec<&str> = out
            .top_counterparties
            .iter()
            .map(|r| r.address.as_str())
            .collect();
        assert_eq!(
            order,
            vec![P3, P2, P1, "0x4444444444444444444444444444444444444444"]
        );
        assert_eq!(out.top_counterparties[0].total_in_eth, "0.01");
        assert_eq!(out.top_counterparties[0].total_out_eth, "0.01");
    }

    #[test]
    fn transactions_are_most_recent_first() {
        let events = classified(&[
            raw("0x0b", DAY, P1, TARGET, "ETH", "1"),
            raw("0x0c", DAY + 100, P1, TARGET, "ETH", "1"),
            raw("0x0a", DAY, P1, TARGET, "ETH", "1"),
        ]);
        let out = aggregate(&events, RangeKey::Month, &ctx()).unwrap();
        let hashes: Vec<&str> = out.transactions.iter().map(|t| t.hash()).collect();
        assert_eq!(hashes, vec!["0x0c", "0x0a", "0x0b"]);
    }

    #[test]
    fn malformed_native_amount_is_an_error() {
        let events = classified(&[raw("0xbad", DAY, P1, TARGET, "ETH", "1e18")]);
        let err = aggregate(&events, RangeKey::Month, &ctx()).unwrap_err();
        assert_eq!(
            err,
            EngineError::MalformedAmount {
                hash: "0xbad".to_string(),
                field: AmountField::Amount,
                value: "1e18".to_string(),
            }
        );
    }

    #[test]
    fn malformed_token_amount_is_an_error() {
        let events = classified(&[raw("0xbad", DAY, P1, TARGET, "USDC", "")]);
        let err = aggregate(&events, RangeKey::Month, &ctx()).unwrap_err();
        assert_eq!(err.kind(), "malformed_amount");
    }

    #[test]
    fn malformed_gas_fee_is_an_error() {
        let mut bad = raw("0xgas", DAY, P1, TARGET, "ETH", "1");
        bad.gas_fee_eth = "-0.1".to_string();
        let err = aggregate(&classified(&[bad]), RangeKey::Month, &ctx()).unwrap_err();
        match err {
            EngineError::MalformedAmount { hash, field, .. } => {
                assert_eq!(hash, "0xgas");
                assert_eq!(field, AmountField::GasFee);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn out_of_range_timestamp_is_an_error() {
        let events = classified(&[raw("0xlate", i64::MAX, P1, TARGET, "ETH", "1")]);
        let err = aggregate(&events, RangeKey::Month, &ctx()).unwrap_err();
        assert_eq!(
            err,
            EngineError::InvalidTimestamp {
                hash: "0xlate".to_string(),
                timestamp: i64::MAX,
            }
        );
    }

    #[test]
    fn total_that_would_round_is_an_overflow() {
        let events = classified(&[
            raw("0x01", DAY, P1, TARGET, "ETH", "100000"),
            raw("0x02", DAY + 1, P1, TARGET, "ETH", "0.0000000000000000000000001"),
        ]);
        let err = aggregate(&events, RangeKey::Month, &ctx()).unwrap_err();
        assert_eq!(
            err,
            EngineError::AmountOverflow {
                hash: "0x02".to_string()
            }
        );
    }

    #[test]
    fn total_past_the_fixed_point_range_is_an_overflow() {
        let max = Decimal::MAX.to_string();
        let events = classified(&[
            raw("0x01", DAY, TARGET, P1, "ETH", &max),
            raw("0x02", DAY + 1, TARGET, P2, "ETH", "1"),
        ]);
        let err = aggregate(&events, RangeKey::Month, &ctx()).unwrap_err();
        assert_eq!(
            err,
            EngineError::AmountOverflow {
                hash: "0x02".to_string()
            }
        );
    }

    #[test]
    fn amount_with_too_many_fraction_digits_is_an_overflow() {
        let long = format!("0.{}", "1".repeat(29));
        let events = classified(&[raw("0xlong", DAY, P1, TARGET, "ETH", &long)]);
        let err = aggregate(&events, RangeKey::Month, &ctx()).unwrap_err();
        assert_eq!(
            err,
            EngineError::AmountOverflow {
                hash: "0xlong".to_string()
            }
        );
        assert_eq!(err.kind(), "amount_overflow");
    }

    #[test]
    fn labels_are_attached_to_rows() {
        let mut ctx = ctx();
        ctx.labels.insert(P1.to_string(), "Exchange".to_string());
        let events = classified(&[
            raw("0x01", DAY, P1, TARGET, "ETH", "1"),
            raw("0x02", DAY, TARGET, P2, "ETH", "1"),
        ]);
        let out = aggregate(&events, RangeKey::Month, &ctx).unwrap();
        let p1 = out.top_counterparties.iter().find(|r| r.address == P1).unwrap();
        let p2 = out.top_counterparties.iter().find(|r| r.address == P2).unwrap();
        assert_eq!(p1.label.as_deref(), Some("Exchange"));
        assert_eq!(p2.label, None);
    }

    #[test]
    fn aggregation_is_idempotent() {
        let events = classified(&[
            raw("0x01", DAY, P1, TARGET, "ETH", "0.5"),
            raw("0x02", DAY + 3600, TARGET, P2, "ETH", "0.12"),
            raw("0x03", DAY + 90_000, TARGET, P2, "DAI", "7"),
        ]);
        let first = aggregate(&events, RangeKey::Quarter, &ctx()).unwrap();
        let second = aggregate(&events, RangeKey::Quarter, &ctx()).unwrap();
        assert_eq!(first, second);
    }
}
