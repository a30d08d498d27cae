use crate::error::EngineError;
use crate::models::{Address, Direction, NormalizedEvent, RawEvent};

/// Classifies one event relative to `target`.
///
/// Precedence: both sides match -> self, `to` matches -> in, `from` matches
/// -> out. An event touching neither side is rejected rather than guessed.
pub fn classify(target: &Address, raw: &RawEvent) -> Result<NormalizedEvent, EngineError> {
    let from = raw.from.trim().to_ascii_lowercase();
    let to = raw.to.trim().to_ascii_lowercase();
    let target = target.as_str();

    let direction = match (from == target, to == target) {
        (true, true) => Direction::SelfTransfer,
        (_, true) => Direction::In,
        (true, false) => Direction::Out,
        (false, false) => {
            return Err(EngineError::UnrelatedEvent {
                hash: raw.hash.clone(),
            })
        }
    };

    let counterparty = match direction {
        Direction::In => from.clone(),
        Direction::Out => to.clone(),
        Direction::SelfTransfer => target.to_string(),
    };

    let event = RawEvent {
        from,
        to,
        ..raw.clone()
    };
    Ok(NormalizedEvent::new(event, direction, counterparty))
}
