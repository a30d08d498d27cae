/// Rejections raised while validating a request or computing an analysis.
///
/// Every variant maps to a stable [`EngineError::kind`] code so callers can
/// translate it into a status without matching on message text.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("invalid address {0:?}: must be 0x followed by 40 hex characters")]
    InvalidAddress(String),

    #[error("invalid range {0:?}: expected one of 7d, 30d, 90d")]
    InvalidRange(String),

    #[error("unsupported chain {0:?}: only eth is supported")]
    UnsupportedChain(String),

    #[error("event {hash} does not involve the target address")]
    UnrelatedEvent { hash: String },

    #[error("event {hash} has a malformed {field} value {value:?}")]
    MalformedAmount {
        hash: String,
        field: AmountField,
        value: String,
    },

    #[error("event {hash} has an out-of-range timestamp {timestamp}")]
    InvalidTimestamp { hash: String, timestamp: i64 },

    #[error("event {hash} carries an amount outside the supported fixed-point range")]
    AmountOverflow { hash: String },
}

impl EngineError {
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::InvalidAddress(_) => "invalid_address",
            EngineError::InvalidRange(_) => "invalid_range",
            EngineError::UnsupportedChain(_) => "unsupported_chain",
            EngineError::UnrelatedEvent { .. } => "unrelated_event",
            EngineError::MalformedAmount { .. } => "malformed_amount",
            EngineError::InvalidTimestamp { .. } => "invalid_timestamp",
            EngineError::AmountOverflow { .. } => "amount_overflow",
        }
    }

    /// True for rejections caused by the caller's own input rather than by
    /// the event data.
    pub fn is_request_error(&self) -> bool {
        matches!(
            self,
            EngineError::InvalidAddress(_)
                | EngineError::InvalidRange(_)
                | EngineError::UnsupportedChain(_)
        )
    }
}

/// Which monetary field of an event failed to parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmountField {
    Amount,
    GasFee,
}

impl std::fmt::Display for AmountField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AmountField::Amount => f.write_str("amount"),
            AmountField::GasFee => f.write_str("gasFeeETH"),
        }
    }
}
