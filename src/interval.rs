//! Human-readable interval strings ("30 seconds", "2.5 minutes", "an hour").

use crate::error::{MomoError, Result};

const MILLISECOND: f64 = 1.0;
const SECOND: f64 = 1_000.0;
const MINUTE: f64 = 60.0 * SECOND;
const HOUR: f64 = 60.0 * MINUTE;
const DAY: f64 = 24.0 * HOUR;
const WEEK: f64 = 7.0 * DAY;
const MONTH: f64 = 30.0 * DAY;
const YEAR: f64 = 365.0 * DAY;

/// Parse a human-readable interval into a millisecond count.
///
/// The grammar is one number token ("30", "2.5", "one" through "ten",
/// or the articles "a"/"an") followed by one unit word (millisecond,
/// second, minute, hour, day, week, month, year; singular or plural).
/// Anything else, and any result below one millisecond, is rejected
/// as [`MomoError::NonParsableInterval`].
pub fn parse_interval(interval: &str) -> Result<u64> {
    let reject = || MomoError::NonParsableInterval(interval.to_string());

    let mut tokens = interval.split_whitespace();
    let amount_token = tokens.next().ok_or_else(reject)?;
    let unit_token = tokens.next().ok_or_else(reject)?;
    if tokens.next().is_some() {
        return Err(reject());
    }

    let amount = parse_amount(amount_token).ok_or_else(reject)?;
    let unit_ms = parse_unit(unit_token).ok_or_else(reject)?;

    let millis = amount * unit_ms;
    if !millis.is_finite() || millis < 1.0 {
        return Err(reject());
    }
    Ok(millis.round() as u64)
}

fn parse_amount(token: &str) -> Option<f64> {
    let word = match token.to_ascii_lowercase().as_str() {
        "a" | "an" | "one" => Some(1.0),
        "two" => Some(2.0),
        "three" => Some(3.0),
        "four" => Some(4.0),
        "five" => Some(5.0),
        "six" => Some(6.0),
        "seven" => Some(7.0),
        "eight" => Some(8.0),
        "nine" => Some(9.0),
        "ten" => Some(10.0),
        _ => None,
    };
    if let Some(value) = word {
        return Some(value);
    }

    let value: f64 = token.parse().ok()?;
    if value > 0.0 {
        Some(value)
    } else {
        None
    }
}

fn parse_unit(token: &str) -> Option<f64> {
    let unit = token.to_ascii_lowercase();
    let singular = unit.strip_suffix('s').unwrap_or(&unit);
    match singular {
        "millisecond" => Some(MILLISECOND),
        "second" => Some(SECOND),
        "minute" => Some(MINUTE),
        "hour" => Some(HOUR),
        "day" => Some(DAY),
        "week" => Some(WEEK),
        "month" => Some(MONTH),
        "year" => Some(YEAR),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_numeric_amounts() {
        assert_eq!(parse_interval("30 seconds").unwrap(), 30_000);
        assert_eq!(parse_interval("1 minute").unwrap(), 60_000);
        assert_eq!(parse_interval("500 milliseconds").unwrap(), 500);
        assert_eq!(parse_interval("2 weeks").unwrap(), 1_209_600_000);
    }

    #[test]
    fn parses_decimal_amounts() {
        assert_eq!(parse_interval("2.5 minutes").unwrap(), 150_000);
        assert_eq!(parse_interval("0.5 seconds").unwrap(), 500);
    }

    #[test]
    fn parses_number_words_and_articles() {
        assert_eq!(parse_interval("one minute").unwrap(), 60_000);
        assert_eq!(parse_interval("an hour").unwrap(), 3_600_000);
        assert_eq!(parse_interval("a day").unwrap(), 86_400_000);
        assert_eq!(parse_interval("ten seconds").unwrap(), 10_000);
    }

    #[test]
    fn is_case_insensitive_and_trims() {
        assert_eq!(parse_interval("  One Hour  ").unwrap(), 3_600_000);
        assert_eq!(parse_interval("30 SECONDS").unwrap(), 30_000);
    }

    #[test]
    fn parses_long_units() {
        assert_eq!(parse_interval("one month").unwrap(), 2_592_000_000);
        assert_eq!(parse_interval("one year").unwrap(), 31_536_000_000);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_interval("").is_err());
        assert!(parse_interval("minute").is_err());
        assert!(parse_interval("every blue moon").is_err());
        assert!(parse_interval("5 fortnights").is_err());
        assert!(parse_interval("1 minute extra").is_err());
    }

    #[test]
    fn rejects_non_positive_amounts() {
        assert!(parse_interval("0 seconds").is_err());
        assert!(parse_interval("-5 minutes").is_err());
        assert!(parse_interval("0.1 milliseconds").is_err());
    }

    #[test]
    fn rejection_carries_the_input() {
        let err = parse_interval("every blue moon").unwrap_err();
        assert!(matches!(err, MomoError::NonParsableInterval(ref s) if s == "every blue moon"));
    }
}
