//! Exact arithmetic over decimal-string amounts.
//!
//! Amounts travel as strings end to end. Sums go through `rust_decimal`,
//! never through `f64`.

use rust_decimal::Decimal;

/// Minimum number of fractional digits rendered for a total.
const DISPLAY_SCALE: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmountError {
    /// Not of the form `digits[.digits]`.
    Malformed,
    /// Well formed but outside the fixed-point range.
    OutOfRange,
}

/// `digits` or `digits.digits`, ASCII only. Signs, exponents, whitespace and
/// separators are rejected.
pub fn is_decimal_numeral(input: &str) -> bool {
    let (int_part, frac_part) = match input.split_once('.') {
        Some((int_part, frac_part)) => (int_part, Some(frac_part)),
        None => (input, None),
    };
    let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    all_digits(int_part) && frac_part.map_or(true, all_digits)
}

pub fn parse_amount(input: &str) -> Result<Decimal, AmountError> {
    if !is_decimal_numeral(input) {
        return Err(AmountError::Malformed);
    }
    Decimal::from_str_exact(input).map_err(|_| AmountError::OutOfRange)
}

/// Renders a total with trailing zeros removed, keeping at least two
/// fractional digits (`0` -> `0.00`, `0.5` -> `0.50`, `0.123` -> `0.123`).
pub fn format_amount(value: Decimal) -> String {
    let mut value = value.normalize();
    if value.scale() < DISPLAY_SCALE {
        value.rescale(DISPLAY_SCALE);
    }
    value.to_string()
}

/// Running total of native-asset amounts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct EthTotal(Decimal);

impl EthTotal {
    /// Returns `None` when the sum would leave the representable range or
    /// could only be represented by rounding away fractional digits.
    #[must_use]
    pub fn checked_add(self, amount: Decimal) -> Option<Self> {
        let (total, amount) = (self.0.normalize(), amount.normalize());
        let sum = total.checked_add(amount)?;
        // An exact sum keeps the finer of the two scales.
        if sum.scale() < total.scale().max(amount.scale()) {
            return None;
        }
        Some(Self(sum.normalize()))
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn render(&self) -> String {
        format_amount(self.0)
    }
}
