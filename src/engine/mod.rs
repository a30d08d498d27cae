//! Event normalization and aggregation.
//!
//! Raw provider events are classified one by one against the target address
//! ([`classify`]) and the classified collection is folded into the response
//! bundle ([`aggregate`]). Nothing here performs I/O or keeps state between
//! calls.

mod aggregate;
mod classify;

use std::collections::HashMap;

use crate::error::EngineError;
use crate::models::{Address, AnalyzeResponse, Chain, NormalizedEvent, RangeKey, RawEvent};

pub use aggregate::aggregate;
pub use classify::classify;

/// Display labels keyed by lower-case counterparty address.
pub type Labels = HashMap<String, String>;

/// Everything the engine needs besides the events themselves.
#[derive(Debug, Clone)]
pub struct AnalysisContext {
    pub chain: Chain,
    pub data_source: String,
    pub labels: Labels,
}

impl AnalysisContext {
    pub fn new(chain: Chain, data_source: impl Into<String>) -> Self {
        Self {
            chain,
            data_source: data_source.into(),
            labels: Labels::new(),
        }
    }

    pub fn with_labels(mut self, labels: Labels) -> Self {
        self.labels = labels;
        self
    }
}

/// What to do with an event that involves neither side of the target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnrelatedEventPolicy {
    /// Fail the whole batch.
    #[default]
    Reject,
    /// Skip the event and report its hash.
    Drop,
}

impl std::str::FromStr for UnrelatedEventPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reject" => Ok(Self::Reject),
            "drop" => Ok(Self::Drop),
            other => Err(format!("unknown unrelated-event policy {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Classified {
    pub events: Vec<NormalizedEvent>,
    /// Hashes of unrelated events skipped under [`UnrelatedEventPolicy::Drop`].
    pub dropped: Vec<String>,
}

pub fn classify_all(
    target: &Address,
    raw_events: &[RawEvent],
    policy: UnrelatedEventPolicy,
) -> Result<Classified, EngineError> {
    let mut out = Classified {
        events: Vec::with_capacity(raw_events.len()),
        dropped: Vec::new(),
    };
    for raw in raw_events {
        match classify(target, raw) {
            Ok(event) => out.events.push(event),
            Err(EngineError::UnrelatedEvent { hash }) if policy == UnrelatedEventPolicy::Drop => {
                out.dropped.push(hash);
            }
            Err(err) => return Err(err),
        }
    }
    Ok(out)
}

/// Classifies and aggregates in one pass, rejecting the batch on the first
/// unrelated event.
pub fn analyze(
    target: &Address,
    range: RangeKey,
    raw_events: &[RawEvent],
    ctx: &AnalysisContext,
) -> Result<AnalyzeResponse, EngineError> {
    let classified = classify_all(target, raw_events, UnrelatedEventPolicy::Reject)?;
    aggregate(&classified.events, range, ctx)
}
