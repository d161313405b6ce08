use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::{trace, warn};

use crate::errors::{ExchangeError, Result};
use crate::model::currency::CurrencyCode;

/// Maximum number of significant digits a mantissa can hold.
const MAX_DIGITS: i8 = 18;

/// First value whose absolute magnitude does not fit the mantissa: 10^18.
const MAX_FULL_N_DIGITS: i64 = 1_000_000_000_000_000_000;

/// Number of decimals printed for a double before heuristic rounding.
const F64_SIGNIFICANT_DECIMALS: usize = 17;

fn ndigits(val: i64) -> i8 {
    let mut abs = val.unsigned_abs();
    let mut digits = 1;
    while abs >= 10 {
        abs /= 10;
        digits += 1;
    }
    digits
}

fn ndigits_u64(mut val: u64) -> i8 {
    let mut digits = 1;
    while val >= 10 {
        val /= 10;
        digits += 1;
    }
    digits
}

fn ipow10(exp: u8) -> i64 {
    10i64.pow(u32::from(exp))
}

fn ipow10_u64(exp: u8) -> u64 {
    10u64.pow(u32::from(exp))
}

/// Rounding direction for [`MonetaryAmount::round`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RoundMode {
    Down,
    Up,
    Nearest,
}

/// Fixed-point signed decimal with a currency tag.
///
/// Stored as `(mantissa, nb_decimals, currency)` with `|mantissa| < 10^18`
/// and `0 <= nb_decimals <= 18`. The number of decimals is always minimal:
/// no amount carries trailing decimal zeros, which makes equality and
/// hashing plain field comparisons.
///
/// Arithmetic keeps as much precision as fits and truncates toward zero
/// when it cannot, trace-logging the loss.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MonetaryAmount {
    amount: i64,
    nb_decimals: i8,
    currency: CurrencyCode,
}

/// Parses a raw decimal string (sign, digits, optional dot) into
/// `(mantissa, nb_decimals)`.
///
/// With `heuristic_rounding` set, a decimal part of exactly 17 digits is
/// considered double-printing output: a run of at least 3 consecutive `0`s
/// or `9`s marks IEEE noise, everything from the run on is cut, rounding up
/// for `9` runs. A run starting right after the decimal point is kept as-is.
fn amount_integral_from_str(raw: &str, heuristic_rounding: bool) -> Result<(i64, i8)> {
    let mut s = raw;
    if s.is_empty() {
        return Ok((0, 0));
    }

    // Sign handling: optional '-' or '+' followed by optional spaces.
    let mut is_neg = false;
    match s.as_bytes()[0] {
        b'-' => {
            is_neg = true;
            s = s[1..].trim_start_matches(' ');
        }
        b'+' => {
            s = s[1..].trim_start_matches(' ');
        }
        b'.' | b'0'..=b'9' => {}
        first => {
            return Err(ExchangeError::Parse(format!(
                "unexpected first character '{}' in amount '{raw}'",
                first as char
            )));
        }
    }

    let parse_digits = |digits: &str| -> Result<i64> {
        digits.parse::<i64>().map_err(|_| {
            ExchangeError::Parse(format!("cannot read '{digits}' as integral amount"))
        })
    };

    let mut rounding_up = 0i64;
    let mut nb_decimals = 0i8;
    let amount;
    match s.find('.') {
        None => {
            if s.bytes().any(|b| !b.is_ascii_digit()) {
                return Err(ExchangeError::Parse(format!("invalid amount '{raw}'")));
            }
            amount = parse_digits(s)?;
        }
        Some(dot_pos) => {
            let mut s = s.trim_end_matches('0');
            if s.bytes().any(|b| b != b'.' && !b.is_ascii_digit()) {
                return Err(ExchangeError::Parse(format!("invalid amount '{raw}'")));
            }
            if s[dot_pos + 1..].contains('.') {
                return Err(ExchangeError::Parse(format!("invalid amount '{raw}'")));
            }
            if heuristic_rounding && s.len() - dot_pos - 1 == F64_SIGNIFICANT_DECIMALS {
                let mut best_cut = 0usize;
                for pattern in ["000", "999"] {
                    if let Some(found) = s.rfind(pattern) {
                        if found > dot_pos {
                            let run_byte = pattern.as_bytes()[0];
                            let mut cut = found;
                            while s.as_bytes()[cut - 1] == run_byte {
                                cut -= 1;
                            }
                            if s.as_bytes()[cut - 1] == b'.' {
                                continue;
                            }
                            best_cut = best_cut.max(cut);
                        }
                    }
                }
                if best_cut != 0 {
                    let up = s.as_bytes()[best_cut] == b'9';
                    trace!("heuristic rounding {} for {s}", if up { "up" } else { "down" });
                    s = &s[..best_cut];
                    if up {
                        rounding_up = 1;
                    }
                }
            }
            nb_decimals = (s.len() - dot_pos - 1) as i8;
            let mut truncated = s;
            if s.len() > MAX_DIGITS as usize + 1 {
                let nb_to_remove = (s.len() - MAX_DIGITS as usize - 1) as i8;
                if nb_to_remove > nb_decimals {
                    return Err(ExchangeError::Parse(format!(
                        "amount '{raw}' has an integral part too big"
                    )));
                }
                trace!("amount '{raw}' too big for fixed point, truncating {nb_to_remove} digits");
                truncated = &s[..s.len() - nb_to_remove as usize];
                nb_decimals -= nb_to_remove;
            }
            let dec_str = &truncated[dot_pos + 1..];
            let dec_part = if dec_str.is_empty() { 0 } else { parse_digits(dec_str)? };
            let int_part = if dot_pos == 0 { 0 } else { parse_digits(&truncated[..dot_pos])? };
            amount = int_part
                .checked_mul(ipow10(nb_decimals as u8))
                .and_then(|scaled| scaled.checked_add(dec_part + rounding_up))
                .ok_or_else(|| {
                    ExchangeError::Parse(format!("amount '{raw}' has an integral part too big"))
                })?;
        }
    }
    if amount >= MAX_FULL_N_DIGITS {
        return Err(ExchangeError::Parse(format!(
            "amount '{raw}' has an integral part too big"
        )));
    }
    Ok((if is_neg { -amount } else { amount }, nb_decimals))
}

/// Grows the amount with fewer decimals until both match, or truncates the
/// richer one when growth would exceed the mantissa capacity.
fn safe_convert_same_decimals(
    lhs_amount: &mut i64,
    rhs_amount: &mut i64,
    mut lhs_nb_decimals: i8,
    mut rhs_nb_decimals: i8,
) -> i8 {
    let mut lhs_nb_digits = ndigits(*lhs_amount);
    let mut rhs_nb_digits = ndigits(*rhs_amount);
    while lhs_nb_decimals != rhs_nb_decimals {
        if lhs_nb_decimals < rhs_nb_decimals {
            if lhs_nb_digits < MAX_DIGITS {
                lhs_nb_decimals += 1;
                lhs_nb_digits += 1;
                *lhs_amount *= 10;
            } else {
                trace!("reaching fixed-point limits for {lhs_amount} & {rhs_amount}, truncate");
                rhs_nb_decimals -= 1;
                rhs_nb_digits -= 1;
                *rhs_amount /= 10;
            }
        } else if rhs_nb_digits < MAX_DIGITS {
            rhs_nb_decimals += 1;
            rhs_nb_digits += 1;
            *rhs_amount *= 10;
        } else {
            trace!("reaching fixed-point limits for {lhs_amount} & {rhs_amount}, truncate");
            lhs_nb_decimals -= 1;
            lhs_nb_digits -= 1;
            *lhs_amount /= 10;
        }
    }
    lhs_nb_decimals
}

impl MonetaryAmount {
    /// Builds an amount from a mantissa and a number of decimals,
    /// normalizing trailing decimal zeros away.
    pub fn new(mut amount: i64, currency: CurrencyCode, mut nb_decimals: i8) -> Self {
        debug_assert!(amount.abs() < MAX_FULL_N_DIGITS);
        debug_assert!((0..=MAX_DIGITS).contains(&nb_decimals));
        while nb_decimals > 0 && amount % 10 == 0 {
            amount /= 10;
            nb_decimals -= 1;
        }
        MonetaryAmount {
            amount,
            nb_decimals,
            currency,
        }
    }

    pub fn from_int(amount: i64, currency: impl Into<CurrencyCode>) -> Self {
        MonetaryAmount::new(amount, currency.into(), 0)
    }

    pub fn zero(currency: CurrencyCode) -> Self {
        MonetaryAmount {
            amount: 0,
            nb_decimals: 0,
            currency,
        }
    }

    /// Parses an amount with optional trailing currency, e.g. `"-3.5 BTC"`.
    /// Surrounding whitespace is skipped; an absent currency yields a
    /// neutral amount.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        // All of '+', '-', '.', ' ' and the digits sort before ASCII letters,
        // so the amount part is the longest prefix of bytes <= '9'.
        let split = trimmed
            .bytes()
            .position(|byte| byte > b'9')
            .unwrap_or(trimmed.len());
        let (amount_str, currency_str) = trimmed.split_at(split);
        let (amount, nb_decimals) = amount_integral_from_str(amount_str.trim_end(), false)?;
        let currency = if currency_str.is_empty() {
            CurrencyCode::neutral()
        } else {
            CurrencyCode::new(currency_str)?
        };
        Ok(MonetaryAmount {
            amount,
            nb_decimals,
            currency,
        })
    }

    /// Parses a pure amount string and tags it with the given currency.
    pub fn parse_with(input: &str, currency: CurrencyCode) -> Result<Self> {
        let (amount, nb_decimals) = amount_integral_from_str(input.trim(), false)?;
        Ok(MonetaryAmount {
            amount,
            nb_decimals,
            currency,
        })
    }

    /// Converts a double by printing it at 17 significant decimals and
    /// running the heuristic rounding to strip IEEE noise.
    pub fn from_f64(value: f64, currency: CurrencyCode) -> Result<Self> {
        if !value.is_finite() {
            return Err(ExchangeError::Parse(format!("non-finite amount {value}")));
        }
        let printed = format!("{value:.width$}", width = F64_SIGNIFICANT_DECIMALS);
        let (amount, nb_decimals) = amount_integral_from_str(&printed, true)?;
        Ok(MonetaryAmount::new(amount, currency, nb_decimals))
    }

    pub fn currency(&self) -> CurrencyCode {
        self.currency
    }

    pub fn nb_decimals(&self) -> i8 {
        self.nb_decimals
    }

    pub fn mantissa(&self) -> i64 {
        self.amount
    }

    pub fn is_zero(&self) -> bool {
        self.amount == 0
    }

    pub fn is_positive(&self) -> bool {
        self.amount > 0
    }

    pub fn is_negative(&self) -> bool {
        self.amount < 0
    }

    pub fn integer_part(&self) -> i64 {
        self.amount / ipow10(self.nb_decimals as u8)
    }

    /// Mantissa aligned at the requested number of decimals, or `None` when
    /// growing would overflow.
    pub fn amount_at(&self, nb_decimals: i8) -> Option<i64> {
        debug_assert!(nb_decimals >= 0);
        let mut integral = self.amount;
        let mut cur = self.nb_decimals;
        while nb_decimals < cur {
            integral /= 10;
            cur -= 1;
        }
        while cur < nb_decimals {
            integral = integral.checked_mul(10)?;
            cur += 1;
        }
        Some(integral)
    }

    /// Re-tags the amount with another currency, keeping the value.
    pub fn with_currency(&self, currency: CurrencyCode) -> Self {
        MonetaryAmount {
            amount: self.amount,
            nb_decimals: self.nb_decimals,
            currency,
        }
    }

    /// Strips the currency tag, yielding a pure number usable as the
    /// neutral operand of a multiplication.
    pub fn to_neutral(&self) -> Self {
        self.with_currency(CurrencyCode::neutral())
    }

    pub fn abs(&self) -> Self {
        MonetaryAmount {
            amount: self.amount.abs(),
            nb_decimals: self.nb_decimals,
            currency: self.currency,
        }
    }

    /// Lossy conversion for display or approximate math only.
    pub fn to_f64(&self) -> f64 {
        self.amount as f64 / 10f64.powi(i32::from(self.nb_decimals))
    }

    fn check_same_currency(&self, other: &Self, op: &str) -> Result<()> {
        if self.currency != other.currency {
            return Err(ExchangeError::CurrencyMismatch(format!(
                "{op} needs amounts of the same currency, got {self} and {other}"
            )));
        }
        Ok(())
    }

    pub fn checked_add(self, other: Self) -> Result<Self> {
        self.check_same_currency(&other, "addition")?;
        let mut lhs = self.amount;
        let mut rhs = other.amount;
        let mut nb_decimals =
            safe_convert_same_decimals(&mut lhs, &mut rhs, self.nb_decimals, other.nb_decimals);
        let mut res = lhs + rhs;
        if res.abs() >= MAX_FULL_N_DIGITS {
            if nb_decimals == 0 {
                return Err(ExchangeError::Overflow(format!(
                    "overflow adding {self} and {other}"
                )));
            }
            res /= 10;
            nb_decimals -= 1;
        }
        Ok(MonetaryAmount::new(res, self.currency, nb_decimals))
    }

    pub fn checked_sub(self, other: Self) -> Result<Self> {
        self.check_same_currency(&other, "subtraction")?;
        self.checked_add(MonetaryAmount {
            amount: -other.amount,
            nb_decimals: other.nb_decimals,
            currency: self.currency,
        })
    }

    /// Multiplication by two amounts, at most one of which may carry a
    /// currency; the result takes the non-neutral currency.
    pub fn checked_mul(self, other: Self) -> Result<Self> {
        if !self.currency.is_neutral() && !other.currency.is_neutral() {
            return Err(ExchangeError::NeutralRequired(format!(
                "cannot multiply two non neutral amounts {self} and {other}"
            )));
        }
        let res_currency = if self.currency.is_neutral() {
            other.currency
        } else {
            self.currency
        };
        let mut lhs_amount = self.amount;
        let mut rhs_amount = other.amount;
        let mut lhs_nb_decimals = i32::from(self.nb_decimals);
        let mut rhs_nb_decimals = i32::from(other.nb_decimals);
        let mut lhs_nb_digits = ndigits(lhs_amount);
        let mut rhs_nb_digits = ndigits(rhs_amount);

        while lhs_nb_digits + rhs_nb_digits > MAX_DIGITS {
            // Truncate the amount with the most decimals in priority.
            if rhs_nb_decimals <= 0 && lhs_nb_decimals <= 0 {
                warn!("cannot truncate decimal part, truncating integral part");
                if lhs_nb_digits < rhs_nb_digits {
                    rhs_nb_digits -= 1;
                    rhs_amount /= 10;
                } else {
                    lhs_nb_digits -= 1;
                    lhs_amount /= 10;
                }
            } else if lhs_amount % 10 == 0
                || (rhs_amount % 10 != 0 && rhs_nb_decimals < lhs_nb_decimals)
            {
                lhs_nb_decimals -= 1;
                lhs_nb_digits -= 1;
                lhs_amount /= 10;
            } else {
                rhs_nb_decimals -= 1;
                rhs_nb_digits -= 1;
                rhs_amount /= 10;
            }
        }

        let mut res = lhs_amount * rhs_amount;
        let mut res_nb_decimals = lhs_nb_decimals + rhs_nb_decimals;
        if res_nb_decimals < 0 {
            return Err(ExchangeError::Overflow(format!(
                "overflow multiplying {self} by {other}"
            )));
        }
        while res_nb_decimals > i32::from(MAX_DIGITS) {
            trace!("truncating tiny product of {self} and {other}");
            res /= 10;
            res_nb_decimals -= 1;
        }
        Ok(MonetaryAmount::new(res, res_currency, res_nb_decimals as i8))
    }

    /// Long division carried in a widened unsigned scratch of 19 digits,
    /// producing up to 18 significant digits.
    pub fn checked_div(self, div: Self) -> Result<Self> {
        if div.amount == 0 {
            return Err(ExchangeError::InvalidArgument(format!(
                "division of {self} by zero"
            )));
        }
        let res_currency;
        if !self.currency.is_neutral() && !div.currency.is_neutral() {
            if self.currency != div.currency {
                return Err(ExchangeError::CurrencyMismatch(format!(
                    "cannot divide two non neutral amounts of different currency, got {self} and {div}"
                )));
            }
            // Dividing same currency yields a neutral ratio.
            res_currency = CurrencyCode::neutral();
        } else if self.currency.is_neutral() {
            res_currency = div.currency;
        } else {
            res_currency = self.currency;
        }

        let neg = (self.amount < 0) != (div.amount < 0);

        // The unsigned scratch holds one more digit than the signed mantissa.
        const SCRATCH_DIGITS: i8 = 19;
        let lhs_nb_digits = ndigits(self.amount);
        let digits_to_add = SCRATCH_DIGITS - lhs_nb_digits;
        let mut lhs: u64 = self.amount.unsigned_abs() * ipow10_u64(digits_to_add as u8);
        let rhs: u64 = div.amount.unsigned_abs();
        let mut nb_decimals = i32::from(self.nb_decimals) + i32::from(digits_to_add)
            - i32::from(div.nb_decimals);

        let mut total_int_part: u64 = 0;
        let mut total_nb_digits;
        loop {
            total_int_part += lhs / rhs;
            total_nb_digits = ndigits_u64(total_int_part);
            lhs %= rhs;
            if lhs == 0 {
                break;
            }
            let nb_digits_to_add = SCRATCH_DIGITS - total_nb_digits.max(ndigits_u64(lhs));
            if nb_digits_to_add == 0 {
                break;
            }
            let mult = ipow10_u64(nb_digits_to_add as u8);
            total_int_part *= mult;
            lhs *= mult;
            nb_decimals += i32::from(nb_digits_to_add);
        }

        if nb_decimals < 0 {
            return Err(ExchangeError::Overflow(format!(
                "overflow dividing {self} by {div}"
            )));
        }

        let nb_digits_truncate = total_nb_digits - MAX_DIGITS;
        if nb_digits_truncate > 0 {
            if nb_decimals < i32::from(nb_digits_truncate) {
                return Err(ExchangeError::Overflow(format!(
                    "overflow dividing {self} by {div}"
                )));
            }
            total_int_part /= ipow10_u64(nb_digits_truncate as u8);
            nb_decimals -= i32::from(nb_digits_truncate);
        }

        // More decimals than capacity can only come from a tiny quotient:
        // shrink back into range, losing the least significant digits.
        while nb_decimals > i32::from(MAX_DIGITS) {
            total_int_part /= 10;
            nb_decimals -= 1;
        }

        let signed = total_int_part as i64;
        Ok(MonetaryAmount::new(
            if neg { -signed } else { signed },
            res_currency,
            nb_decimals as i8,
        ))
    }

    /// Rounds to a multiple of `step` (same currency family, positive).
    pub fn round(self, step: Self, mode: RoundMode) -> Result<Self> {
        if step.amount <= 0 {
            return Err(ExchangeError::InvalidArgument(format!(
                "rounding step should be strictly positive, got {step}"
            )));
        }
        let mut lhs = self.amount;
        let mut rhs = step.amount;
        let nb_decimals =
            safe_convert_same_decimals(&mut lhs, &mut rhs, self.nb_decimals, step.nb_decimals);
        let epsilon = lhs % rhs;
        let mut res = lhs - epsilon;
        if epsilon != 0 {
            if lhs < 0 {
                if res >= i64::MIN + rhs
                    && (mode == RoundMode::Down
                        || (mode == RoundMode::Nearest && -2 * epsilon >= rhs))
                {
                    res -= rhs;
                }
            } else if res <= i64::MAX - rhs
                && (mode == RoundMode::Up || (mode == RoundMode::Nearest && 2 * epsilon >= rhs))
            {
                res += rhs;
            }
        }
        Ok(MonetaryAmount::new(res, self.currency, nb_decimals))
    }

    /// Total order between amounts of the same currency; an error otherwise.
    pub fn cmp_strict(&self, other: &Self) -> Result<Ordering> {
        self.check_same_currency(other, "comparison")?;
        Ok(self.value_cmp(other))
    }

    fn value_cmp(&self, other: &Self) -> Ordering {
        // Widening to i128 makes decimal alignment overflow-free.
        let max_decimals = self.nb_decimals.max(other.nb_decimals);
        let lhs = i128::from(self.amount)
            * i128::from(ipow10((max_decimals - self.nb_decimals) as u8));
        let rhs = i128::from(other.amount)
            * i128::from(ipow10((max_decimals - other.nb_decimals) as u8));
        lhs.cmp(&rhs)
    }

    fn amount_str(&self) -> String {
        let neg = self.amount < 0;
        let mut digits = self.amount.unsigned_abs().to_string();
        if self.nb_decimals as usize + 1 > digits.len() {
            let missing = self.nb_decimals as usize + 1 - digits.len();
            digits.insert_str(0, &"0".repeat(missing));
        }
        if self.nb_decimals > 0 {
            digits.insert(digits.len() - self.nb_decimals as usize, '.');
        }
        if neg {
            digits.insert(0, '-');
        }
        digits
    }
}

impl PartialOrd for MonetaryAmount {
    /// `None` when the currencies differ: ordering across units is
    /// meaningless and must not silently default to `false`.
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self.currency != other.currency {
            return None;
        }
        Some(self.value_cmp(other))
    }
}

impl std::ops::Neg for MonetaryAmount {
    type Output = MonetaryAmount;

    fn neg(self) -> MonetaryAmount {
        MonetaryAmount {
            amount: -self.amount,
            nb_decimals: self.nb_decimals,
            currency: self.currency,
        }
    }
}

impl std::ops::Mul<i64> for MonetaryAmount {
    type Output = MonetaryAmount;

    fn mul(self, mult: i64) -> MonetaryAmount {
        let mut amount = self.amount;
        let mut nb_decimals = self.nb_decimals;
        if !(-1..=1).contains(&mult) {
            let nb_digits_mult = ndigits(mult);
            let nb_digits_amount = ndigits(self.amount);
            let mut nb_digits_to_truncate = nb_digits_amount + nb_digits_mult - MAX_DIGITS;
            if nb_digits_to_truncate > 0 {
                trace!(
                    "reaching fixed-point limits for {amount} * {mult}, truncate {nb_digits_to_truncate} digits"
                );
                if nb_decimals < nb_digits_to_truncate {
                    warn!("cannot truncate decimal part, truncating integral part");
                }
                while nb_digits_to_truncate > 0 {
                    if nb_decimals > 0 {
                        nb_decimals -= 1;
                    }
                    amount /= 10;
                    nb_digits_to_truncate -= 1;
                }
            }
        }
        MonetaryAmount::new(amount * mult, self.currency, nb_decimals)
    }
}

impl fmt::Display for MonetaryAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.amount_str())?;
        if !self.currency.is_neutral() {
            write!(f, " {}", self.currency)?;
        }
        Ok(())
    }
}

impl fmt::Debug for MonetaryAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for MonetaryAmount {
    type Err = ExchangeError;

    fn from_str(s: &str) -> Result<Self> {
        MonetaryAmount::parse(s)
    }
}

/// Infallible conversion for literal amounts in tests and static tables.
impl From<&str> for MonetaryAmount {
    fn from(input: &str) -> Self {
        match MonetaryAmount::parse(input) {
            Ok(amount) => amount,
            Err(err) => panic!("invalid amount literal '{input}': {err}"),
        }
    }
}

impl Serialize for MonetaryAmount {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for MonetaryAmount {
    /// Accepts both the string form and a bare JSON number, since venues
    /// disagree on how to serialize amounts.
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawAmount {
            Text(String),
            Number(f64),
        }
        match RawAmount::deserialize(deserializer)? {
            RawAmount::Text(raw) => MonetaryAmount::parse(&raw).map_err(D::Error::custom),
            RawAmount::Number(value) => {
                MonetaryAmount::from_f64(value, CurrencyCode::neutral()).map_err(D::Error::custom)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ma(s: &str) -> MonetaryAmount {
        MonetaryAmount::from(s)
    }

    #[test]
    fn parse_infers_currency() {
        let amount = ma("-3.5 BTC");
        assert_eq!(amount.currency(), CurrencyCode::from("BTC"));
        assert_eq!(amount.mantissa(), -35);
        assert_eq!(amount.nb_decimals(), 1);
        assert_eq!(ma("  804.62EUR  "), ma("804.62 EUR"));
        assert!(ma("35").currency().is_neutral());
    }

    #[test]
    fn parse_accepts_sign_and_leading_dot() {
        assert_eq!(ma("+3 ETH"), ma("3 ETH"));
        assert_eq!(ma(".5 ETH"), ma("0.5 ETH"));
        assert_eq!(ma("- 4 KRW"), ma("-4 KRW"));
    }

    #[test]
    fn parse_normalizes_trailing_zeros() {
        let amount = ma("1.500 XLM");
        assert_eq!(amount.nb_decimals(), 1);
        assert_eq!(amount.mantissa(), 15);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(MonetaryAmount::parse("*45").is_err());
        assert!(MonetaryAmount::parse("13.6.7").is_err());
        assert!(MonetaryAmount::parse("9223372036854775807").is_err());
    }

    #[test]
    fn parse_truncates_excess_decimals() {
        // 20 chars with dot: one decimal digit is dropped.
        let amount = ma("1234567890.123456789");
        assert_eq!(amount.nb_decimals(), 8);
        assert_eq!(amount.mantissa(), 123456789012345678);
    }

    #[test]
    fn parse_fails_on_huge_integral_part() {
        assert!(MonetaryAmount::parse("1234567890123456789012.3").is_err());
    }

    #[test]
    fn format_round_trips() {
        for s in ["0.006317 BTC", "-34.7 EUR", "0.85 BTC", "123", "0.0000017 KRW"] {
            let amount = ma(s);
            assert_eq!(MonetaryAmount::parse(&amount.to_string()).unwrap(), amount);
            assert_eq!(amount.to_string(), s);
        }
    }

    #[test]
    fn from_f64_strips_ieee_noise() {
        let cur = CurrencyCode::from("EUR");
        assert_eq!(
            MonetaryAmount::from_f64(0.1 + 0.2, cur).unwrap(),
            ma("0.3 EUR")
        );
        assert_eq!(
            MonetaryAmount::from_f64(1.9999999999999998, cur).unwrap(),
            ma("2 EUR")
        );
        assert_eq!(MonetaryAmount::from_f64(37.5, cur).unwrap(), ma("37.5 EUR"));
    }

    #[test]
    fn addition_aligns_decimals() {
        assert_eq!(
            ma("0.000017 BTC").checked_add(ma("0.0063 BTC")).unwrap(),
            ma("0.006317 BTC")
        );
        assert_eq!(ma("2 KRW").checked_add(ma("-3 KRW")).unwrap(), ma("-1 KRW"));
    }

    #[test]
    fn addition_requires_same_currency() {
        assert!(matches!(
            ma("1 BTC").checked_add(ma("1 ETH")),
            Err(ExchangeError::CurrencyMismatch(_))
        ));
    }

    #[test]
    fn add_then_sub_is_identity() {
        for (lhs, rhs) in [
            ("0.000017 BTC", "0.0063 BTC"),
            ("12345.678 EUR", "0.322 EUR"),
            ("-5 KRW", "18 KRW"),
        ] {
            let a = ma(lhs);
            let b = ma(rhs);
            assert_eq!(a.checked_add(b).unwrap().checked_sub(b).unwrap(), a);
        }
    }

    #[test]
    fn multiplication_needs_a_neutral_side() {
        let volume = ma("50000 XLM");
        let price = ma("0.000017 BTC");
        assert!(volume.checked_mul(price).is_err());
        assert_eq!(
            volume.to_neutral().checked_mul(price).unwrap(),
            ma("0.85 BTC")
        );
    }

    #[test]
    fn multiplication_by_scalar() {
        assert_eq!(ma("0.25 ETH") * 4, ma("1 ETH"));
        assert_eq!(ma("3 EUR") * -1, ma("-3 EUR"));
        assert_eq!(ma("1.5 EUR") * 0, ma("0 EUR"));
    }

    #[test]
    fn division_yields_neutral_for_same_currency() {
        let ratio = ma("1 BTC").checked_div(ma("4 BTC")).unwrap();
        assert!(ratio.currency().is_neutral());
        assert_eq!(ratio, ma("0.25"));
    }

    #[test]
    fn division_long_tail() {
        assert_eq!(
            ma("1 EUR").checked_div(ma("3")).unwrap().to_string(),
            "0.333333333333333333 EUR"
        );
        assert_eq!(ma("0.85 BTC").checked_div(ma("0.000017")).unwrap(), ma("50000 BTC"));
    }

    #[test]
    fn division_by_zero_is_an_error() {
        assert!(ma("1 BTC").checked_div(ma("0")).is_err());
    }

    #[test]
    fn division_different_currencies_is_an_error() {
        assert!(ma("1 BTC").checked_div(ma("2 ETH")).is_err());
    }

    #[test]
    fn round_modes() {
        let step = ma("0.01");
        assert_eq!(
            ma("1.2345").round(step, RoundMode::Nearest).unwrap(),
            ma("1.23")
        );
        assert_eq!(ma("1.2345").round(step, RoundMode::Up).unwrap(), ma("1.24"));
        assert_eq!(
            ma("1.2345").round(step, RoundMode::Down).unwrap(),
            ma("1.23")
        );
        assert_eq!(
            ma("-1.2345").round(step, RoundMode::Down).unwrap(),
            ma("-1.24")
        );
        assert_eq!(
            ma("2.6 EUR").round(ma("0.5"), RoundMode::Nearest).unwrap(),
            ma("2.5 EUR")
        );
    }

    #[test]
    fn round_is_multiple_of_step() {
        let step = ma("0.25");
        for input in ["1.1", "7.49", "0.125", "-3.33"] {
            let rounded = ma(input).round(step, RoundMode::Nearest).unwrap();
            let ratio = rounded.checked_div(step).unwrap();
            assert_eq!(ratio.nb_decimals(), 0, "{rounded} not a multiple of {step}");
        }
    }

    #[test]
    fn comparison_aligns_decimals() {
        assert!(ma("0.5 BTC") < ma("0.51 BTC"));
        assert!(ma("-1 EUR") < ma("0.0001 EUR"));
        assert_eq!(ma("1.50 EUR"), ma("1.5 EUR"));
    }

    #[test]
    fn comparison_across_currencies_is_undefined() {
        assert_eq!(ma("1 BTC").partial_cmp(&ma("1 ETH")), None);
        assert!(ma("1 BTC").cmp_strict(&ma("1 ETH")).is_err());
    }

    #[test]
    fn lossy_double_conversion() {
        assert!((ma("0.85 BTC").to_f64() - 0.85).abs() < 1e-12);
    }
}
