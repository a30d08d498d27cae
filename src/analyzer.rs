use crate::engine::{self, AnalysisContext, Labels, UnrelatedEventPolicy};
use crate::error::EngineError;
use crate::eth::EventSource;
use crate::models::{Address, AnalyzeResponse, Chain, RangeKey, RawEvent};
use crate::stats::ANALYZE_STATS;

#[derive(thiserror::Error, Debug)]
pub enum AnalyzeError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("upstream data source failed: {0:#}")]
    Upstream(anyhow::Error),
}

impl AnalyzeError {
    pub fn kind(&self) -> &'static str {
        match self {
            AnalyzeError::Engine(err) => err.kind(),
            AnalyzeError::Upstream(_) => "upstream_error",
        }
    }
}

/// Fetches a wallet's events and runs them through the engine.
pub struct Analyzer {
    source: EventSource,
    chain: Chain,
    policy: UnrelatedEventPolicy,
    labels: Labels,
}

impl Analyzer {
    pub fn new(source: EventSource, policy: UnrelatedEventPolicy, labels: Labels) -> Self {
        Self {
            source,
            chain: Chain::Eth,
            policy,
            labels,
        }
    }

    pub fn chain(&self) -> Chain {
        self.chain
    }

    pub fn source_name(&self) -> &'static str {
        self.source.name()
    }

    pub async fn run(
        &self,
        address: &Address,
        range: RangeKey,
        now: i64,
    ) -> Result<AnalyzeResponse, AnalyzeError> {
        let raw_events = self
            .source
            .fetch_events(address, range, now)
            .await
            .map_err(AnalyzeError::Upstream)?;
        ANALYZE_STATS.inc_upstream_events(raw_events.len() as u64);
        self.analyze_events(address, range, &raw_events)
    }

    /// Runs the engine over events that were obtained elsewhere.
    pub fn analyze_events(
        &self,
        address: &Address,
        range: RangeKey,
        raw_events: &[RawEvent],
    ) -> Result<AnalyzeResponse, AnalyzeError> {
        let classified = engine::classify_all(address, raw_events, self.policy)?;
        if !classified.dropped.is_empty() {
            ANALYZE_STATS.inc_dropped_events(classified.dropped.len() as u64);
            tracing::warn!(
                "dropped {} events unrelated to {}: {}",
                classified.dropped.len(),
                address,
                classified.dropped.join(", ")
            );
        }

        let ctx = AnalysisContext::new(self.chain, self.source.name()).with_labels(self.labels.clone());
        let response = engine::aggregate(&classified.events, range, &ctx)?;
        tracing::debug!(
            "analyzed {} events for {} ({} counterparties)",
            response.summary.tx_count,
            address,
            response.top_counterparties.len()
        );
        Ok(response)
    }
}
