//! Parser for Go-style duration strings (`90s`, `1h30m`, `1.5h`, `250ms`).
//!
//! Arithmetic is done in integer nanoseconds. Fractional digits beyond
//! nanosecond precision are truncated. The result must fit a signed 64-bit
//! nanosecond count.

use chrono::TimeDelta;

use crate::config::ConfigError;

const NANOS_PER_MICRO: u128 = 1_000;
const NANOS_PER_MILLI: u128 = 1_000_000;
const NANOS_PER_SECOND: u128 = 1_000_000_000;
const NANOS_PER_MINUTE: u128 = 60 * NANOS_PER_SECOND;
const NANOS_PER_HOUR: u128 = 60 * NANOS_PER_MINUTE;

// Keeps `fraction * scale` within u128 for the largest unit.
const MAX_FRACTION_DIGITS: usize = 18;

/// Parses a duration such as `2h45m` or `1.5s`.
///
/// A single `0` is accepted without a unit. A leading `-` negates the value.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidDuration`] when the input does not follow
/// the grammar, uses an unknown unit, or overflows.
pub(crate) fn parse(input: &str) -> Result<TimeDelta, ConfigError> {
    let invalid = |message: &str| ConfigError::InvalidDuration {
        value: input.to_owned(),
        message: message.to_owned(),
    };

    let (negative, mut rest) = match input.strip_prefix('-') {
        Some(stripped) => (true, stripped),
        None => (false, input.strip_prefix('+').unwrap_or(input)),
    };

    if rest == "0" {
        return Ok(TimeDelta::zero());
    }
    if rest.is_empty() {
        return Err(invalid("invalid duration"));
    }

    let mut total: u128 = 0;
    while !rest.is_empty() {
        let (whole_digits, after_whole) = split_digits(rest);
        let (fraction_digits, after_number) = match after_whole.strip_prefix('.') {
            Some(stripped) => split_digits(stripped),
            None => ("", after_whole),
        };
        if whole_digits.is_empty() && fraction_digits.is_empty() {
            return Err(invalid("invalid duration"));
        }

        let unit_len = after_number
            .find(|ch: char| ch == '.' || ch.is_ascii_digit())
            .unwrap_or(after_number.len());
        let (unit, tail) = after_number.split_at(unit_len);
        let scale = unit_scale(unit).ok_or_else(|| {
            if unit.is_empty() {
                invalid("missing unit in duration")
            } else {
                invalid(&format!("unknown unit \"{unit}\" in duration"))
            }
        })?;

        let component = component_nanos(whole_digits, fraction_digits, scale)
            .ok_or_else(|| invalid("duration out of range"))?;
        total = total
            .checked_add(component)
            .ok_or_else(|| invalid("duration out of range"))?;
        rest = tail;
    }

    let nanos = i64::try_from(total).map_err(|_| invalid("duration out of range"))?;
    Ok(TimeDelta::nanoseconds(if negative { -nanos } else { nanos }))
}

fn split_digits(input: &str) -> (&str, &str) {
    let len = input
        .find(|ch: char| !ch.is_ascii_digit())
        .unwrap_or(input.len());
    input.split_at(len)
}

fn unit_scale(unit: &str) -> Option<u128> {
    match unit {
        "ns" => Some(1),
        "us" | "\u{b5}s" | "\u{3bc}s" => Some(NANOS_PER_MICRO),
        "ms" => Some(NANOS_PER_MILLI),
        "s" => Some(NANOS_PER_SECOND),
        "m" => Some(NANOS_PER_MINUTE),
        "h" => Some(NANOS_PER_HOUR),
        _ => None,
    }
}

fn component_nanos(whole_digits: &str, fraction_digits: &str, scale: u128) -> Option<u128> {
    let whole: u128 = if whole_digits.is_empty() {
        0
    } else {
        whole_digits.parse().ok()?
    };
    let mut nanos = whole.checked_mul(scale)?;

    let kept = fraction_digits
        .get(..MAX_FRACTION_DIGITS)
        .unwrap_or(fraction_digits);
    if !kept.is_empty() {
        let fraction: u128 = kept.parse().ok()?;
        let denominator = 10_u128.checked_pow(u32::try_from(kept.len()).ok()?)?;
        nanos = nanos.checked_add(fraction.checked_mul(scale)?.checked_div(denominator)?)?;
    }

    Some(nanos)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("0", TimeDelta::zero())]
    #[case("-0", TimeDelta::zero())]
    #[case("90s", TimeDelta::seconds(90))]
    #[case("1h", TimeDelta::hours(1))]
    #[case("1h30m", TimeDelta::minutes(90))]
    #[case("1.5h", TimeDelta::minutes(90))]
    #[case("250ms", TimeDelta::milliseconds(250))]
    #[case("+2m", TimeDelta::minutes(2))]
    #[case("-5m", TimeDelta::minutes(-5))]
    #[case("-1h30m", TimeDelta::minutes(-90))]
    #[case(".5s", TimeDelta::milliseconds(500))]
    #[case("1us", TimeDelta::microseconds(1))]
    #[case("1\u{b5}s", TimeDelta::microseconds(1))]
    #[case("3ns", TimeDelta::nanoseconds(3))]
    fn parses_valid_durations(#[case] input: &str, #[case] expected: TimeDelta) {
        let parsed = parse(input).unwrap_or_else(|err| panic!("parse {input}: {err}"));
        assert_eq!(parsed, expected);
    }

    #[rstest]
    #[case("")]
    #[case("10")]
    #[case("1d")]
    #[case("h")]
    #[case(".h")]
    #[case("-")]
    #[case("1h-")]
    fn rejects_invalid_durations(#[case] input: &str) {
        let err = parse(input).expect_err("duration should be rejected");
        assert!(
            matches!(err, ConfigError::InvalidDuration { ref value, .. } if value == input),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn rejects_overflowing_durations() {
        for input in ["99999999999999999999h", "2562048h", "-2562048h"] {
            let err = parse(input).expect_err("overflow should be rejected");
            assert!(err.to_string().contains("out of range"), "{input}: {err}");
        }
    }
}
