//! Fixed-point price/quantity newtypes and the option symbol.
//!
//! Prices and quantities are kept as scaled integers rather than `f64` so
//! that thousands of tick updates in a live session cannot accumulate
//! floating-point drift in the swing/VWAP/stop-distance arithmetic.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Fixed-point scale: 1 unit of `Px`/`Qty` internal storage = 1/SCALE rupees (or shares).
const SCALE: i64 = 100;

/// Price in rupees, stored as integer paise-of-a-rupee (hundredths).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Px(i64);

impl Px {
    /// Zero price.
    pub const ZERO: Self = Self(0);

    /// Construct a price from a rupee value, rounding to the nearest paisa.
    #[must_use]
    pub fn from_rupees(value: f64) -> Self {
        Self((value * SCALE as f64).round() as i64)
    }

    /// Construct directly from the internal scaled representation.
    #[must_use]
    pub const fn from_scaled(scaled: i64) -> Self {
        Self(scaled)
    }

    /// The internal scaled (paise) representation.
    #[must_use]
    pub const fn scaled(self) -> i64 {
        self.0
    }

    /// Value as rupees, for display/wire/journal purposes only.
    #[must_use]
    pub fn as_rupees(self) -> f64 {
        self.0 as f64 / SCALE as f64
    }

    /// Add a number of ticks (each `tick_size` rupees) to this price.
    #[must_use]
    pub fn plus_ticks(self, ticks: i64, tick_size: Px) -> Self {
        Self(self.0 + ticks * tick_size.0)
    }

    #[must_use]
    pub fn saturating_sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }
}

impl std::ops::Add for Px {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl std::ops::Sub for Px {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self(self.0 - rhs.0)
    }
}

impl fmt::Display for Px {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.as_rupees())
    }
}

/// Quantity in whole underlying shares (not lots).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Qty(i64);

impl Qty {
    pub const ZERO: Self = Self(0);

    #[must_use]
    pub const fn new(shares: i64) -> Self {
        Self(shares)
    }

    #[must_use]
    pub const fn as_i64(self) -> i64 {
        self.0
    }
}

impl fmt::Display for Qty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The underlying index. Only NIFTY weeklies are traded by this build, but
/// the type stays open the way the corpus's index enum does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Underlying {
    Nifty,
    BankNifty,
    FinNifty,
}

impl Underlying {
    #[must_use]
    pub const fn wire_token(self) -> &'static str {
        match self {
            Self::Nifty => "NIFTY",
            Self::BankNifty => "BANKNIFTY",
            Self::FinNifty => "FINNIFTY",
        }
    }

    #[must_use]
    pub const fn lot_size(self) -> i64 {
        match self {
            Self::Nifty => 65,
            Self::BankNifty => 30,
            Self::FinNifty => 65,
        }
    }

    #[must_use]
    pub const fn tick_size(self) -> Px {
        Px::from_scaled(5) // Rs 0.05
    }

    fn from_wire_token(s: &str) -> Option<(Self, usize)> {
        for u in [Self::Nifty, Self::BankNifty, Self::FinNifty] {
            if s.starts_with(u.wire_token()) {
                return Some((u, u.wire_token().len()));
            }
        }
        None
    }
}

/// Call or Put.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum OptionType {
    Ce,
    Pe,
}

impl OptionType {
    #[must_use]
    pub const fn wire_token(self) -> &'static str {
        match self {
            Self::Ce => "CE",
            Self::Pe => "PE",
        }
    }
}

/// An index option instrument: `NIFTY<DDMMMYY><STRIKE><CE|PE>`, bit-exact
/// with the broker's trading-symbol format, e.g. `NIFTY06FEB2624200CE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Symbol {
    pub underlying: Underlying,
    pub expiry: NaiveDate,
    pub strike: u32,
    pub option: OptionType,
}

impl Symbol {
    #[must_use]
    pub fn new(underlying: Underlying, expiry: NaiveDate, strike: u32, option: OptionType) -> Self {
        Self { underlying, expiry, strike, option }
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}{}",
            self.underlying.wire_token(),
            self.expiry.format("%d%b%y").to_string().to_uppercase(),
            self.strike,
            self.option.wire_token(),
        )
    }
}

impl FromStr for Symbol {
    type Err = SymbolParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (underlying, rest) =
            Underlying::from_wire_token(s).ok_or(SymbolParseError::UnknownUnderlying)?;
        let rest = &s[rest..];
        if rest.len() < 9 {
            return Err(SymbolParseError::Malformed);
        }
        let (date_part, rest) = rest.split_at(7);
        let expiry = NaiveDate::parse_from_str(&date_part.to_uppercase(), "%d%b%y")
            .map_err(|_| SymbolParseError::Malformed)?;
        if rest.len() < 3 {
            return Err(SymbolParseError::Malformed);
        }
        let (strike_part, opt_part) = rest.split_at(rest.len() - 2);
        let strike: u32 = strike_part.parse().map_err(|_| SymbolParseError::Malformed)?;
        let option = match opt_part {
            "CE" => OptionType::Ce,
            "PE" => OptionType::Pe,
            _ => return Err(SymbolParseError::Malformed),
        };
        Ok(Self { underlying, expiry, strike, option })
    }
}

/// Error parsing a broker-format trading symbol.
#[derive(Debug, thiserror::Error)]
pub enum SymbolParseError {
    #[error("unrecognized underlying in symbol")]
    UnknownUnderlying,
    #[error("malformed option symbol")]
    Malformed,
}
