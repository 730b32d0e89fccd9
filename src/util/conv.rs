//! Conversions between 256-bit integers and arbitrary precision decimals.

use {
    bigdecimal::{num_bigint::ToBigInt, BigDecimal},
    ethereum_types::U256,
    std::str::FromStr,
};

pub fn u256_to_big_decimal(value: &U256) -> BigDecimal {
    // A `U256` always formats as a plain decimal integer.
    BigDecimal::from_str(&value.to_string()).unwrap()
}

/// Converts a decimal into a 256-bit integer, truncating any fractional part.
/// Returns `None` for negative values and values exceeding 2²⁵⁶ − 1.
pub fn big_decimal_to_u256(value: &BigDecimal) -> Option<U256> {
    let integer = value.to_bigint()?;
    if integer.sign() == bigdecimal::num_bigint::Sign::Minus {
        return None;
    }
    U256::from_dec_str(&integer.to_string()).ok()
}

/// Scales an amount by a decimal factor, truncating the result towards zero.
/// Returns `None` if the scaled amount does not fit a `U256`.
pub fn scale_amount(amount: &U256, factor: &BigDecimal) -> Option<U256> {
    big_decimal_to_u256(&(u256_to_big_decimal(amount) * factor))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_max_value() {
        let max = U256::MAX;
        assert_eq!(big_decimal_to_u256(&u256_to_big_decimal(&max)), Some(max));
    }

    #[test]
    fn rejects_negative_values() {
        assert_eq!(big_decimal_to_u256(&BigDecimal::from(-1)), None);
    }

    #[test]
    fn rejects_overflow() {
        let too_big = u256_to_big_decimal(&U256::MAX) + BigDecimal::from(1);
        assert_eq!(big_decimal_to_u256(&too_big), None);
    }

    #[test]
    fn scales_and_truncates() {
        let amount = U256::from(1000u64);
        let factor = BigDecimal::from_str("1.055").unwrap();
        assert_eq!(scale_amount(&amount, &factor), Some(U256::from(1055u64)));

        let factor = BigDecimal::from_str("0.0015").unwrap();
        assert_eq!(scale_amount(&amount, &factor), Some(U256::from(1u64)));
    }
}
