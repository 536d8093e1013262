use regex::{Captures, Regex};
use std::sync::LazyLock;
use time::{Date, Month};

#[derive(Debug, Clone, Copy)]
enum Order {
    /// 2024-01-15
    YearMonthDay,
    /// 01/15/2024, falling back to day-first when the month is impossible.
    MonthFirst,
    /// 15.01.2024, falling back to month-first.
    DayFirst,
    /// 15 Jan 2024
    DayMonthName,
    /// Jan 15, 2024
    MonthNameDay,
}

const MONTHS: &str = r"jan|feb|mar|mär|apr|may|mai|jun|jul|aug|sep|oct|okt|nov|dec|dez";

static PATTERNS: LazyLock<Vec<(Regex, Order)>> = LazyLock::new(|| {
    vec![
        (
            Regex::new(r"\b(\d{4})[-/.](\d{1,2})[-/.](\d{1,2})\b").unwrap(),
            Order::YearMonthDay,
        ),
        (
            Regex::new(r"\b(\d{1,2})/(\d{1,2})/(\d{2}|\d{4})\b").unwrap(),
            Order::MonthFirst,
        ),
        (
            Regex::new(r"\b(\d{1,2})[.-](\d{1,2})[.-](\d{2}|\d{4})\b").unwrap(),
            Order::DayFirst,
        ),
        (
            Regex::new(&format!(
                r"(?i)\b(\d{{1,2}})\.?\s+({MONTHS})[a-zä]*\.?\s+(\d{{4}})\b"
            ))
            .unwrap(),
            Order::DayMonthName,
        ),
        (
            Regex::new(&format!(
                r"(?i)\b({MONTHS})[a-zä]*\.?\s+(\d{{1,2}}),?\s+(\d{{4}})\b"
            ))
            .unwrap(),
            Order::MonthNameDay,
        ),
    ]
});

/// Earliest plausible calendar date anywhere in the text.
pub(super) fn extract_date(text: &str) -> Option<Date> {
    PATTERNS
        .iter()
        .flat_map(|(re, order)| {
            re.captures_iter(text).filter_map(move |caps| {
                let start = caps.get(0)?.start();
                interpret(&caps, *order).map(|d| (start, d))
            })
        })
        .min_by_key(|(start, _)| *start)
        .map(|(_, date)| date)
}

fn interpret(caps: &Captures<'_>, order: Order) -> Option<Date> {
    let num = |i: usize| caps.get(i)?.as_str().parse::<u32>().ok();

    match order {
        Order::YearMonthDay => build(num(1)?, num(2)?, num(3)?),
        Order::MonthFirst => {
            let (a, b, y) = (num(1)?, num(2)?, expand_year(num(3)?)?);
            build(y, a, b).or_else(|| build(y, b, a))
        }
        Order::DayFirst => {
            let (a, b, y) = (num(1)?, num(2)?, expand_year(num(3)?)?);
            build(y, b, a).or_else(|| build(y, a, b))
        }
        Order::DayMonthName => build(num(3)?, month_from_name(caps.get(2)?.as_str())?, num(1)?),
        Order::MonthNameDay => build(num(3)?, month_from_name(caps.get(1)?.as_str())?, num(2)?),
    }
}

fn expand_year(year: u32) -> Option<u32> {
    match year {
        0..=99 => Some(2000 + year),
        1000..=9999 => Some(year),
        _ => None,
    }
}

fn month_from_name(name: &str) -> Option<u32> {
    let prefix: String = name.to_lowercase().chars().take(3).collect();
    let month = match prefix.as_str() {
        "jan" => 1,
        "feb" => 2,
        "mar" | "mär" => 3,
        "apr" => 4,
        "may" | "mai" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" | "okt" => 10,
        "nov" => 11,
        "dec" | "dez" => 12,
        _ => return None,
    };
    Some(month)
}

/// Only dates a receipt could plausibly carry.
fn build(year: u32, month: u32, day: u32) -> Option<Date> {
    if !(2000..=2099).contains(&year) {
        return None;
    }
    let month = Month::try_from(u8::try_from(month).ok()?).ok()?;
    Date::from_calendar_date(i32::try_from(year).ok()?, month, u8::try_from(day).ok()?).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    #[test]
    fn test_formats() {
        assert_eq!(extract_date("2024-01-15"), Some(date!(2024 - 01 - 15)));
        assert_eq!(extract_date("Date: 01/15/2024"), Some(date!(2024 - 01 - 15)));
        assert_eq!(extract_date("03/04/2024"), Some(date!(2024 - 03 - 04)));
        assert_eq!(extract_date("15.03.24 10:12"), Some(date!(2024 - 03 - 15)));
        assert_eq!(extract_date("15 Mar 2024"), Some(date!(2024 - 03 - 15)));
        assert_eq!(extract_date("3. März 2024"), Some(date!(2024 - 03 - 03)));
        assert_eq!(extract_date("January 7, 2024"), Some(date!(2024 - 01 - 07)));
    }

    #[test]
    fn test_day_first_fallback_for_slashes() {
        assert_eq!(extract_date("25/12/2023"), Some(date!(2023 - 12 - 25)));
    }

    #[test]
    fn test_earliest_date_wins() {
        let text = "Sale 2024-02-01\nReturn by 2024-03-01";
        assert_eq!(extract_date(text), Some(date!(2024 - 02 - 01)));
    }

    #[test]
    fn test_implausible_dates_are_skipped() {
        assert_eq!(extract_date("31/31/2024"), None);
        assert_eq!(extract_date("1899-01-01"), None);
        assert_eq!(extract_date("30.02.2024 then 01.03.2024"), Some(date!(2024 - 03 - 01)));
        assert_eq!(extract_date("no dates here 1.99"), None);
    }
}
