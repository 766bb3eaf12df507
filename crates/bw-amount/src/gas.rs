use num_bigint::BigUint;
use num_traits::ToPrimitive;

use crate::{AmountError, AmountInput, GWEI_DECIMALS, Result, decimal_to_hex, parse_unsigned_hex};

const WEI_PER_GWEI: u64 = 1_000_000_000;
const WEI_PER_TENTH_GWEI: u64 = 100_000_000;

/// `0x`-prefixed hex of an integer quantity such as a gas limit or nonce.
pub fn quantity_to_hex(value: u64) -> String {
    format!("{value:#x}")
}

pub fn hex_to_quantity(hex: &str) -> Result<u64> {
    parse_unsigned_hex(hex)?
        .to_u64()
        .ok_or_else(|| AmountError::InvalidFormat(format!("'{hex}' does not fit in 64 bits")))
}

/// Gas price typed in gwei, encoded as `0x`-prefixed wei.
pub fn gwei_to_wei_hex<A: AmountInput>(gwei: A) -> Result<String> {
    Ok(format!("0x{}", decimal_to_hex(gwei, GWEI_DECIMALS)?))
}

/// Gas price for a replacement transaction: `floor(gwei * 11) / 10 + 0.1`
/// gwei, never below 1 gwei.
pub fn escalate_gas_price(current_wei_hex: &str) -> Result<String> {
    let current = parse_unsigned_hex(current_wei_hex)?;
    let one_gwei = BigUint::from(WEI_PER_GWEI);

    let tenths = (current * 11u32) / &one_gwei + 1u32;
    let mut bumped = tenths * BigUint::from(WEI_PER_TENTH_GWEI);
    if bumped <= one_gwei {
        bumped = one_gwei;
    }

    Ok(format!("0x{}", bumped.to_str_radix(16)))
}
