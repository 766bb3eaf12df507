//! Token amount conversions between the node's hex wire format and
//! human-facing fixed-point decimals.
//!
//! Every conversion goes through arbitrary-precision integers and digit
//! strings; floating point never touches a monetary value.

mod gas;

pub use gas::{escalate_gas_price, gwei_to_wei_hex, hex_to_quantity, quantity_to_hex};

use num_bigint::BigUint;
use num_traits::Zero;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Implied fractional digits of the smallest on-chain unit.
pub const WEI_DECIMALS: u32 = 18;
pub const GWEI_DECIMALS: u32 = 9;
/// Fractional digits shown by the wallet UI.
pub const DISPLAY_DIGITS: u32 = 8;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AmountError {
    #[error("invalid amount format: {0}")]
    InvalidFormat(String),
}

pub type Result<T> = std::result::Result<T, AmountError>;

fn invalid(message: impl Into<String>) -> AmountError {
    AmountError::InvalidFormat(message.into())
}

/// `0x`-prefixed hex integer in the smallest unit, as produced by the node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HexAmount(String);

impl HexAmount {
    /// Wrap bare hex digits (the output of [`decimal_to_hex`]).
    pub fn from_digits(digits: &str) -> Result<Self> {
        format!("0x{digits}").parse()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl FromStr for HexAmount {
    type Err = AmountError;

    fn from_str(value: &str) -> Result<Self> {
        let parsed = parse_hex(value)?;
        let sign = if parsed.negative { "-" } else { "" };
        Ok(Self(format!("{sign}0x{}", parsed.magnitude.to_str_radix(16))))
    }
}

impl fmt::Display for HexAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fixed-point decimal produced by the codec; only ever built from parsed
/// digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct DecimalAmount(String);

impl DecimalAmount {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn truncate(&self, visible_digits: u32) -> DisplayAmount {
        let (integer, fraction) = self.0.split_once('.').unwrap_or((&self.0, ""));
        truncate_parts(integer, fraction, visible_digits)
    }
}

impl fmt::Display for DecimalAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct DisplayAmount(String);

impl DisplayAmount {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DisplayAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

struct SignedMagnitude {
    negative: bool,
    magnitude: BigUint,
}

impl SignedMagnitude {
    fn sign(&self) -> &'static str {
        if self.negative { "-" } else { "" }
    }
}

/// Accepts `0x`, `-0x` or no prefix (either case of `x`). A sign is only
/// allowed in front of the prefix; surrounding whitespace is rejected.
fn parse_hex(input: &str) -> Result<SignedMagnitude> {
    fn strip_prefix(text: &str) -> Option<&str> {
        text.strip_prefix("0x").or_else(|| text.strip_prefix("0X"))
    }
    let (negative, digits) = match input.strip_prefix('-') {
        Some(rest) => match strip_prefix(rest) {
            Some(digits) => (true, digits),
            None => return Err(invalid(format!("'{input}' has a sign without a 0x prefix"))),
        },
        None => (false, strip_prefix(input).unwrap_or(input)),
    };

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(invalid(format!("'{input}' is not a hex number")));
    }

    let magnitude = BigUint::parse_bytes(digits.as_bytes(), 16)
        .ok_or_else(|| invalid(format!("'{input}' is not a hex number")))?;
    let negative = negative && !magnitude.is_zero();

    Ok(SignedMagnitude { negative, magnitude })
}

pub(crate) fn parse_unsigned_hex(input: &str) -> Result<BigUint> {
    let parsed = parse_hex(input)?;
    if parsed.negative {
        return Err(invalid(format!("'{input}' must not be negative")));
    }
    Ok(parsed.magnitude)
}

/// Decimal string of a hex integer; a `-0x` sign is carried through.
pub fn hex_to_decimal(hex: &str) -> Result<DecimalAmount> {
    let parsed = parse_hex(hex)?;
    Ok(DecimalAmount(format!(
        "{}{}",
        parsed.sign(),
        parsed.magnitude.to_str_radix(10)
    )))
}

/// Decimal string of a hex integer read with `scale` implied fractional digits.
///
/// `0x7f` at scale 18 is `0.000000000000000127`. Zero keeps all `scale`
/// fractional zeros. With a scale of 0 the integer is returned without a
/// decimal point.
pub fn hex_to_fixed_point(hex: &str, scale: u32) -> Result<DecimalAmount> {
    let parsed = parse_hex(hex)?;
    let digits = parsed.magnitude.to_str_radix(10);
    Ok(DecimalAmount(format!(
        "{}{}",
        parsed.sign(),
        place_point(&digits, scale)
    )))
}

fn place_point(digits: &str, scale: u32) -> String {
    let scale = scale as usize;
    if scale == 0 {
        return digits.to_owned();
    }
    let padded = format!("{digits:0>width$}", width = scale + 1);
    let (integer, fraction) = padded.split_at(padded.len() - scale);
    format!("{integer}.{fraction}")
}

/// [`hex_to_fixed_point`] followed by [`truncate_for_display`]; the balance
/// formatting pipeline.
pub fn hex_to_display(hex: &str, scale: u32, visible_digits: u32) -> Result<DisplayAmount> {
    Ok(hex_to_fixed_point(hex, scale)?.truncate(visible_digits))
}

/// A user-entered amount accepted by [`decimal_to_hex`].
pub trait AmountInput {
    fn to_decimal_string(&self) -> Result<String>;
}

impl AmountInput for &str {
    fn to_decimal_string(&self) -> Result<String> {
        Ok((*self).to_owned())
    }
}

impl AmountInput for String {
    fn to_decimal_string(&self) -> Result<String> {
        Ok(self.clone())
    }
}

impl AmountInput for &String {
    fn to_decimal_string(&self) -> Result<String> {
        Ok((*self).clone())
    }
}

impl AmountInput for &DecimalAmount {
    fn to_decimal_string(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

impl AmountInput for u64 {
    fn to_decimal_string(&self) -> Result<String> {
        Ok(self.to_string())
    }
}

impl AmountInput for u128 {
    fn to_decimal_string(&self) -> Result<String> {
        Ok(self.to_string())
    }
}

/// Floats go through their shortest round-trip decimal text (`1.5` becomes
/// `"1.5"`), never through float arithmetic.
impl AmountInput for f64 {
    fn to_decimal_string(&self) -> Result<String> {
        if !self.is_finite() {
            return Err(invalid(format!("{self} is not a finite amount")));
        }
        Ok(self.to_string())
    }
}

/// Hex digits (no `0x` prefix) of `value * 10^scale`.
///
/// The fractional part is right-padded with zeros to exactly `scale` digits
/// and concatenated to the integer part. More than `scale` fractional digits
/// would lose precision and is rejected, as is anything but ASCII digits
/// around a single decimal point.
pub fn decimal_to_hex<A: AmountInput>(value: A, scale: u32) -> Result<String> {
    let text = value.to_decimal_string()?;
    let text = text.trim();
    let (integer, fraction) = text.split_once('.').unwrap_or((text, ""));

    if integer.is_empty() && fraction.is_empty() {
        return Err(invalid(format!("'{text}' has no digits")));
    }
    if !integer.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid(format!("'{text}' has a non-digit integer part")));
    }
    if !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid(format!("'{text}' has a non-digit fractional part")));
    }

    let scale = scale as usize;
    if fraction.len() > scale {
        return Err(invalid(format!(
            "'{text}' has more than {scale} fractional digits"
        )));
    }

    let mut digits = String::with_capacity(integer.len() + scale);
    digits.push_str(integer);
    digits.push_str(fraction);
    digits.extend(std::iter::repeat_n('0', scale - fraction.len()));

    let scaled = BigUint::parse_bytes(digits.as_bytes(), 10)
        .ok_or_else(|| invalid(format!("'{text}' is not a decimal number")))?;
    Ok(scaled.to_str_radix(16))
}

/// Keep at most `visible_digits` fractional digits, dropping the rest.
///
/// Never rounds. Values that already fit are returned unchanged. The input
/// must look like `[-]digits[.digits]`.
pub fn truncate_for_display(value: &str, visible_digits: u32) -> Result<DisplayAmount> {
    let unsigned = value.strip_prefix('-').unwrap_or(value);
    let (integer, fraction) = unsigned.split_once('.').unwrap_or((unsigned, ""));
    let all_digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
    if integer.is_empty() || !all_digits(integer) || !all_digits(fraction) {
        return Err(invalid(format!("'{value}' is not a decimal number")));
    }
    let integer = &value[..value.len() - unsigned.len() + integer.len()];
    Ok(truncate_parts(integer, fraction, visible_digits))
}

// Callers guarantee `fraction` is ASCII digits.
fn truncate_parts(integer: &str, fraction: &str, visible_digits: u32) -> DisplayAmount {
    let visible = visible_digits as usize;
    if fraction.is_empty() {
        return DisplayAmount(integer.to_owned());
    }
    if fraction.len() <= visible {
        return DisplayAmount(format!("{integer}.{fraction}"));
    }
    if visible == 0 {
        return DisplayAmount(integer.to_owned());
    }
    DisplayAmount(format!("{integer}.{}", &fraction[..visible]))
}
