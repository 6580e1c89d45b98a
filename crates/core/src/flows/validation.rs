use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use rust_decimal::{Decimal, RoundingStrategy};

use crate::domain::identity::normalize_phone;

static EMAIL_PATTERN: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}$").ok()
});

static BR_DATE_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^(\d{2})/(\d{2})/(\d{4})$").ok());

/// Minimum digits accepted as a client phone.
pub const MIN_PHONE_DIGITS: usize = 8;

pub fn is_valid_email(raw: &str) -> bool {
    let candidate = raw.trim();
    EMAIL_PATTERN.as_ref().is_some_and(|pattern| pattern.is_match(candidate))
}

/// Parses a strict `DD/MM/YYYY` calendar date.
pub fn parse_br_date(raw: &str) -> Option<NaiveDate> {
    let captures = BR_DATE_PATTERN.as_ref()?.captures(raw.trim())?;
    let day = captures.get(1)?.as_str().parse::<u32>().ok()?;
    let month = captures.get(2)?.as_str().parse::<u32>().ok()?;
    let year = captures.get(3)?.as_str().parse::<i32>().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

pub fn parse_phone(raw: &str) -> Option<String> {
    let digits = normalize_phone(raw);
    (digits.len() >= MIN_PHONE_DIGITS).then(|| raw.trim().to_owned())
}

/// Parses a Brazilian-formatted monetary amount (`1.500,00`, `R$ 1500`, `2,5`).
///
/// Returns `None` for anything that is not a positive amount.
pub fn parse_money(raw: &str) -> Option<Decimal> {
    let kept: String =
        raw.chars().filter(|ch| ch.is_ascii_digit() || *ch == '.' || *ch == ',').collect();
    if !kept.chars().any(|ch| ch.is_ascii_digit()) {
        return None;
    }

    let value = canonical_amount(&kept).parse::<Decimal>().ok()?;
    if value <= Decimal::ZERO {
        return None;
    }
    Some(value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero))
}

fn canonical_amount(kept: &str) -> String {
    match (kept.rfind(','), kept.rfind('.')) {
        (Some(comma), Some(dot)) => split_at_decimal(kept, comma.max(dot)),
        (Some(comma), None) => resolve_single_separator(kept, ',', comma),
        (None, Some(dot)) => resolve_single_separator(kept, '.', dot),
        (None, None) => kept.to_owned(),
    }
}

// A lone separator followed by one or two digits is the decimal mark, anything
// else groups thousands.
fn resolve_single_separator(kept: &str, separator: char, last: usize) -> String {
    let fraction_len = kept.len() - last - 1;
    if kept.matches(separator).count() == 1 && (1..=2).contains(&fraction_len) {
        split_at_decimal(kept, last)
    } else {
        digits_only(kept)
    }
}

fn split_at_decimal(kept: &str, decimal_at: usize) -> String {
    let (whole, fraction) = kept.split_at(decimal_at);
    let whole = digits_only(whole);
    let fraction = digits_only(&fraction[1..]);
    let whole = if whole.is_empty() { "0".to_owned() } else { whole };
    if fraction.is_empty() {
        whole
    } else {
        format!("{whole}.{fraction}")
    }
}

fn digits_only(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_digit).collect()
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    use super::{is_valid_email, parse_br_date, parse_money, parse_phone};

    #[test]
    fn money_accepts_brazilian_and_plain_formats() {
        assert_eq!(parse_money("1.500,00"), Some(Decimal::new(150_000, 2)));
        assert_eq!(parse_money("R$ 1500"), Some(Decimal::new(1500, 0)));
        assert_eq!(parse_money("2,5"), Some(Decimal::new(25, 1)));
        assert_eq!(parse_money("1.500"), Some(Decimal::new(1500, 0)));
        assert_eq!(parse_money("1,500.75"), Some(Decimal::new(150_075, 2)));
        assert_eq!(parse_money("12.5"), Some(Decimal::new(125, 1)));
        assert_eq!(parse_money("1.234.567"), Some(Decimal::new(1_234_567, 0)));
        assert_eq!(parse_money("3.000 reais"), Some(Decimal::new(3000, 0)));
    }

    #[test]
    fn money_rejects_non_positive_or_empty_amounts() {
        assert_eq!(parse_money("abc"), None);
        assert_eq!(parse_money("0"), None);
        assert_eq!(parse_money("0,00"), None);
        assert_eq!(parse_money(""), None);
    }

    #[test]
    fn dates_must_be_strict_and_exist() {
        assert_eq!(parse_br_date("20/07/2025"), NaiveDate::from_ymd_opt(2025, 7, 20));
        assert_eq!(parse_br_date("31/02/2025"), None);
        assert_eq!(parse_br_date("2025-07-20"), None);
        assert_eq!(parse_br_date("1/7/2025"), None);
    }

    #[test]
    fn emails_need_user_domain_and_tld() {
        assert!(is_valid_email("maria@empresa.com.br"));
        assert!(is_valid_email(" ana.souza+obra@mail.co "));
        assert!(!is_valid_email("maria@empresa"));
        assert!(!is_valid_email("não tenho"));
    }

    #[test]
    fn phones_need_enough_digits() {
        assert_eq!(parse_phone("(11) 98888-7777").as_deref(), Some("(11) 98888-7777"));
        assert_eq!(parse_phone("1234"), None);
    }
}
