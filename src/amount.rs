//! Arbitrary-precision amount conversion.
//!
//! Every raw on-chain amount (EVM wei-style integers, Bitcoin's already-
//! decimal `vout[i].value`, Tron's scaled integers, XRP drops or issued-
//! currency values) is converted to a [`rust_decimal::Decimal`] here and
//! nowhere else. No step in this module goes through `f64`/`f32`.

use rust_decimal::Decimal;

use crate::error::Error;

/// Convert a raw integer amount (as a decimal-digit string, since on-chain
/// integers routinely exceed `u64`/`i64` range) and a decimal-places count
/// into a human-decimal [`Decimal`].
///
/// This is the EVM/Tron path: `formatUnits(value, decimals)`.
pub fn scale_raw_integer(raw: &str, decimals: u32) -> Result<Decimal, Error> {
    let value = Decimal::from_str_exact(raw)?;
    if decimals == 0 {
        return Ok(value);
    }
    let scale_factor = Decimal::from_str_exact(&format!("1{}", "0".repeat(decimals as usize)))?;
    Ok(value / scale_factor)
}

/// Parse a value that is already in human-decimal form, e.g. Bitcoin's
/// `vout[i].value` or an XRP issued-currency `value` field. Parses the
/// string form directly, never round-tripping through a JSON float.
pub fn parse_decimal_string(value: &str) -> Result<Decimal, Error> {
    Decimal::from_str_exact(value).map_err(Error::from)
}

/// Convert XRP drops (a string of an integer number of drops, 1 XRP =
/// 10^6 drops) into decimal XRP.
pub fn drops_to_xrp(drops: &str) -> Result<Decimal, Error> {
    scale_raw_integer(drops, 6)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn scales_evm_native_value_with_18_decimals() {
        let amount = scale_raw_integer("1000000000000000000", 18).unwrap();
        assert_eq!(amount, dec!(1.0));
    }

    #[test]
    fn scales_erc20_value_with_6_decimals() {
        let amount = scale_raw_integer("5000000", 6).unwrap();
        assert_eq!(amount, dec!(5.0));
    }

    #[test]
    fn scales_tron_trc20_amount() {
        let amount = scale_raw_integer("10000000", 6).unwrap();
        assert_eq!(amount, dec!(10.0));
    }

    #[test]
    fn parses_bitcoin_decimal_value_without_float_roundtrip() {
        let amount = parse_decimal_string("0.30000000").unwrap();
        assert_eq!(amount, dec!(0.3));
    }

    #[test]
    fn converts_xrp_drops_to_xrp() {
        let amount = drops_to_xrp("1000000").unwrap();
        assert_eq!(amount, dec!(1));
    }

    #[test]
    fn zero_decimals_is_identity() {
        let amount = scale_raw_integer("42", 0).unwrap();
        assert_eq!(amount, dec!(42));
    }
}
