//! Conversions between on-chain integer amounts and display values.
//!
//! Ledger and volume arithmetic stays in `BigUint`. Decimal values only appear
//! for prices and for human-readable output.

use num_bigint::BigUint;
use num_traits::{ToPrimitive, Zero};
use rust_decimal::Decimal;

use crate::{Result, StrategyError};

/// The tracked token and WBNB both use 18 decimals
pub const TOKEN_DECIMALS: u32 = 18;

fn ten_pow(decimals: u32) -> BigUint {
    BigUint::from(10u8).pow(decimals)
}

/// Render a smallest-unit amount as a decimal string ("1000.0", "0.25")
pub fn format_units(amount: &BigUint, decimals: u32) -> String {
    let unit = ten_pow(decimals);
    let whole = amount / &unit;
    let fraction = amount % &unit;

    let mut fraction = format!("{:0>width$}", fraction.to_string(), width = decimals as usize);
    while fraction.ends_with('0') {
        fraction.pop();
    }
    if fraction.is_empty() {
        fraction.push('0');
    }

    format!("{}.{}", whole, fraction)
}

/// Parse a whole-unit decimal string ("1000", "12.5") into smallest units
pub fn parse_units(value: &str, decimals: u32) -> Result<BigUint> {
    let value = value.trim();
    let invalid = || StrategyError::InvalidAmount(value.to_string());

    let (whole, fraction) = match value.split_once('.') {
        Some((w, f)) => (w, f),
        None => (value, ""),
    };

    if whole.is_empty() && fraction.is_empty() {
        return Err(invalid());
    }
    if !whole.chars().all(|c| c.is_ascii_digit())
        || !fraction.chars().all(|c| c.is_ascii_digit())
        || fraction.len() > decimals as usize
    {
        return Err(invalid());
    }

    let whole = if whole.is_empty() {
        BigUint::zero()
    } else {
        whole.parse::<BigUint>().map_err(|_| invalid())?
    };
    let padded = format!("{:0<width$}", fraction, width = decimals as usize);
    let fraction = if padded.is_empty() {
        BigUint::zero()
    } else {
        padded.parse::<BigUint>().map_err(|_| invalid())?
    };

    Ok(whole * ten_pow(decimals) + fraction)
}

/// BNB per token from pair reserves, computed as `reserve_bnb * 10^18 / reserve_token`
/// in integer arithmetic. `None` when either reserve is zero.
pub fn price_from_reserves(reserve_bnb: &BigUint, reserve_token: &BigUint) -> Result<Option<Decimal>> {
    if reserve_bnb.is_zero() || reserve_token.is_zero() {
        return Ok(None);
    }

    let scaled = reserve_bnb * ten_pow(TOKEN_DECIMALS) / reserve_token;
    let mantissa = scaled
        .to_i128()
        .ok_or_else(|| StrategyError::DecimalConversion(format!("price {} too large", scaled)))?;

    Decimal::try_from_i128_with_scale(mantissa, TOKEN_DECIMALS)
        .map(|price| Some(price.normalize()))
        .map_err(|e| StrategyError::DecimalConversion(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_format_units() {
        let thousand = BigUint::from(10u8).pow(21);
        assert_eq!(format_units(&thousand, 18), "1000.0");
        assert_eq!(format_units(&BigUint::from(25u8), 2), "0.25");
        assert_eq!(format_units(&BigUint::zero(), 18), "0.0");
    }

    #[test]
    fn test_parse_units() {
        assert_eq!(parse_units("1000", 18).unwrap(), BigUint::from(10u8).pow(21));
        assert_eq!(parse_units("1.5", 2).unwrap(), BigUint::from(150u8));
        assert_eq!(parse_units(".5", 1).unwrap(), BigUint::from(5u8));
        assert!(parse_units("-1", 18).is_err());
        assert!(parse_units("1.234", 2).is_err());
        assert!(parse_units("", 18).is_err());
        assert!(parse_units("abc", 18).is_err());
    }

    #[test]
    fn test_price_rejects_zero_reserves() {
        let one = BigUint::from(1u8);
        assert_eq!(price_from_reserves(&BigUint::zero(), &one).unwrap(), None);
        assert_eq!(price_from_reserves(&one, &BigUint::zero()).unwrap(), None);
    }

    #[test]
    fn test_price_keeps_eighteen_digits() {
        // 1 BNB against 3 tokens
        let price = price_from_reserves(&BigUint::from(1u8), &BigUint::from(3u8))
            .unwrap()
            .unwrap();
        assert_eq!(price, Decimal::from_str("0.333333333333333333").unwrap());

        let bnb = parse_units("50", 18).unwrap();
        let tokens = parse_units("5000000", 18).unwrap();
        let price = price_from_reserves(&bnb, &tokens).unwrap().unwrap();
        assert_eq!(price, Decimal::from_str("0.00001").unwrap());
    }
}
