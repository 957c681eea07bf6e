// Parsing helpers for the loosely formatted strings the quote provider returns

use chrono::{Duration, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::SearchError;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Sentinel the provider uses in place of a price.
pub const UNAVAILABLE_PRICE: &str = "Unavailable";

static CLOCK_12H: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(\d{1,2}):(\d{2})\s*([AP]M)").expect("valid 12h clock regex"));
static CLOCK_24H: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{1,2}):(\d{2})\b").expect("valid 24h clock regex"));
static DURATION_HOURS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(\d+)\s*hr").expect("valid hour regex"));
static DURATION_MINUTES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(\d+)\s*min").expect("valid minute regex"));

/// Extracts a numeric price from strings like `"$268"` or `"1,200 €"`.
///
/// Every character other than an ASCII digit or `.` is dropped and the
/// remainder is truncated to a whole amount. A European thousands separator
/// (`"1.200 €"`) is therefore read as `1`.
pub fn parse_price(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().map(f64::trunc)
}

/// A usable fare is a positive finite number.
pub fn is_valid_price(price: f64) -> bool {
    price.is_finite() && price > 0.0
}

/// Parses a provider price string, rejecting the "unavailable" sentinel and
/// anything that does not yield a valid fare.
pub fn valid_price(raw: &str) -> Option<f64> {
    if raw.trim() == UNAVAILABLE_PRICE {
        return None;
    }
    parse_price(raw).filter(|price| is_valid_price(*price))
}

/// Concatenates every digit of a descriptive stop string ("1 stop" -> 1).
pub fn digits_in(text: &str) -> Option<u32> {
    let digits: String = text.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

/// Minutes since midnight for provider clock strings such as
/// `"10:35 PM on Sat, Apr 19"` or `"22:35"`.
pub fn parse_clock_minutes(value: Option<&str>) -> Option<u32> {
    let value = value?;

    if let Some(caps) = CLOCK_12H.captures(value) {
        let hour: u32 = caps[1].parse().ok()?;
        let minute: u32 = caps[2].parse().ok()?;
        if !(1..=12).contains(&hour) || minute > 59 {
            return None;
        }
        let pm = caps[3].eq_ignore_ascii_case("PM");
        let hour = match (hour, pm) {
            (12, false) => 0,
            (12, true) => 12,
            (h, false) => h,
            (h, true) => h + 12,
        };
        return Some(hour * 60 + minute);
    }

    let caps = CLOCK_24H.captures(value)?;
    let hour: u32 = caps[1].parse().ok()?;
    let minute: u32 = caps[2].parse().ok()?;
    (hour <= 23 && minute <= 59).then_some(hour * 60 + minute)
}

/// Parses a user supplied `HH:MM` (24h) filter bound.
pub fn parse_hhmm_minutes(value: &str) -> Option<u32> {
    let (hours, minutes) = value.trim().split_once(':')?;
    let h: u32 = hours.parse().ok()?;
    let m: u32 = minutes.parse().ok()?;
    (h <= 23 && m <= 59).then_some(h * 60 + m)
}

/// Parses durations like `"2 hr 15 min"` or `"45 min"`. `None` means the
/// duration is unknown and should rank last.
pub fn parse_duration_minutes(value: Option<&str>) -> Option<u32> {
    let value = value?;
    let mut total = 0u32;
    if let Some(caps) = DURATION_HOURS.captures(value) {
        total += caps[1].parse::<u32>().ok()?.saturating_mul(60);
    }
    if let Some(caps) = DURATION_MINUTES.captures(value) {
        total = total.saturating_add(caps[1].parse::<u32>().ok()?);
    }
    (total > 0).then_some(total)
}

pub fn parse_date(value: &str) -> Result<NaiveDate, SearchError> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT)
        .map_err(|_| SearchError::InvalidDate(value.to_string()))
}

pub fn add_days(date: NaiveDate, days: i64) -> Option<NaiveDate> {
    date.checked_add_signed(Duration::days(days))
}

/// Expands a date into `[date - flex, ..., date, ..., date + flex]`.
pub fn expand_dates_with_flex(date: NaiveDate, flex: u32) -> Vec<NaiveDate> {
    let flex = i64::from(flex);
    (-flex..=flex).filter_map(|d| add_days(date, d)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_price_strips_symbols() {
        assert_eq!(parse_price("$268"), Some(268.0));
        assert_eq!(parse_price("€1,200"), Some(1200.0));
        assert_eq!(parse_price("89.99 €"), Some(89.0));
        assert_eq!(parse_price("Unavailable"), None);
        assert_eq!(parse_price(""), None);
    }

    // Known limitation: a dot used as thousands separator is read as a decimal point.
    #[test]
    fn test_parse_price_european_thousands_separator_is_misread() {
        assert_eq!(parse_price("1.200 €"), Some(1.0));
        assert_eq!(parse_price("1.200.000"), None);
    }

    #[test]
    fn test_valid_price_rejects_sentinel_and_non_positive() {
        assert_eq!(valid_price("Unavailable"), None);
        assert_eq!(valid_price("€0"), None);
        assert_eq!(valid_price("0.50"), None);
        assert_eq!(valid_price("€42"), Some(42.0));
        assert!(!is_valid_price(f64::INFINITY));
        assert!(!is_valid_price(f64::NAN));
        assert!(!is_valid_price(-3.0));
    }

    #[test]
    fn test_clock_parsing() {
        assert_eq!(parse_clock_minutes(Some("10:35 PM on Sat, Apr 19")), Some(22 * 60 + 35));
        assert_eq!(parse_clock_minutes(Some("12:05 am")), Some(5));
        assert_eq!(parse_clock_minutes(Some("12:00 PM")), Some(720));
        assert_eq!(parse_clock_minutes(Some("07:15")), Some(435));
        assert_eq!(parse_clock_minutes(Some("soon")), None);
        assert_eq!(parse_clock_minutes(None), None);
    }

    #[test]
    fn test_hhmm_and_duration() {
        assert_eq!(parse_hhmm_minutes("08:30"), Some(510));
        assert_eq!(parse_hhmm_minutes("24:00"), None);
        assert_eq!(parse_hhmm_minutes("8"), None);

        assert_eq!(parse_duration_minutes(Some("2 hr 15 min")), Some(135));
        assert_eq!(parse_duration_minutes(Some("45 min")), Some(45));
        assert_eq!(parse_duration_minutes(Some("n/a")), None);
        assert_eq!(parse_duration_minutes(None), None);
    }

    #[test]
    fn test_date_flex_expansion() {
        let date = parse_date("2026-04-19").unwrap();
        let dates = expand_dates_with_flex(date, 1);
        assert_eq!(
            dates,
            vec![
                parse_date("2026-04-18").unwrap(),
                date,
                parse_date("2026-04-20").unwrap()
            ]
        );
        assert_eq!(expand_dates_with_flex(date, 0), vec![date]);
        assert!(matches!(parse_date("19/04/2026"), Err(SearchError::InvalidDate(_))));
    }

    #[test]
    fn test_digits_in_stop_text() {
        assert_eq!(digits_in("1 stop"), Some(1));
        assert_eq!(digits_in("Nonstop"), None);
    }
}
