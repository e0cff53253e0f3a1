//! Coercers behind the `coerce` cell operation.
//!
//! Date patterns use the moment-style tokens found in the configuration
//! files (`YYYY`, `YY`, `MM`, `M`, `DD`, `D`); any other character is literal.

use std::str::FromStr;

use chrono::{Duration, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::error::{EvalError, EvalResult};

/// Target of a `coerce` operation, discriminated by `as`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "as", rename_all = "snake_case", deny_unknown_fields)]
pub enum Coercion {
    Date {
        /// `assume` replaces the parsed year with the run's year.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        year: Option<YearMode>,
        /// Comma-separated input patterns.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parse: Option<String>,
        #[serde(default = "default_date_format")]
        format: String,
    },
    Number {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        otherwise: Option<String>,
    },
    Usd {
        #[serde(default)]
        round: RoundMode,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum YearMode {
    Assume,
}

/// Cent rounding for `usd`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundMode {
    Up,
    Down,
    /// Half away from zero.
    #[default]
    Default,
}

fn default_date_format() -> String {
    "M/D/YYYY".to_string()
}

impl Coercion {
    /// Coerce `value`; `year` is the run's year.
    pub fn apply(&self, value: &str, year: i32) -> EvalResult<String> {
        match self {
            Coercion::Date { year: mode, parse, format } => {
                coerce_date(value, parse.as_deref(), *mode, format, year)
            }
            Coercion::Number { otherwise } => coerce_number(value, otherwise.as_deref()),
            Coercion::Usd { round } => coerce_usd(value, *round),
        }
    }
}

// =============================================================================
// Numbers
// =============================================================================

static FLOAT_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*[+-]?(?:\d+\.?\d*|\.\d+)(?:[eE][+-]?\d+)?").expect("valid float regex")
});

/// Parse the leading float of `value`, ignoring trailing text.
fn leading_float(value: &str) -> Option<f64> {
    let m = FLOAT_PREFIX.find(value)?;
    m.as_str().trim().parse::<f64>().ok()
}

pub fn coerce_number(value: &str, otherwise: Option<&str>) -> EvalResult<String> {
    match leading_float(value) {
        Some(n) if n.is_finite() => Ok(n.to_string()),
        _ => otherwise
            .map(str::to_string)
            .ok_or_else(|| EvalError::InvalidNumber { value: value.to_string() }),
    }
}

/// Parse a decimal, tolerating currency symbols and thousands separators.
pub fn parse_decimal(value: &str) -> EvalResult<Decimal> {
    let cleaned: String = value
        .trim()
        .chars()
        .filter(|c| *c != '$' && *c != ',')
        .collect();
    Decimal::from_str(&cleaned)
        .or_else(|_| Decimal::from_scientific(&cleaned))
        .map_err(|_| EvalError::InvalidNumber { value: value.to_string() })
}

pub fn coerce_usd(value: &str, round: RoundMode) -> EvalResult<String> {
    let amount = parse_decimal(value)?;
    let strategy = match round {
        RoundMode::Up => RoundingStrategy::ToPositiveInfinity,
        RoundMode::Down => RoundingStrategy::ToNegativeInfinity,
        RoundMode::Default => RoundingStrategy::MidpointAwayFromZero,
    };
    Ok(format_usd(amount.round_dp_with_strategy(2, strategy)))
}

/// `$` followed by the amount with exactly two decimals.
pub fn format_usd(amount: Decimal) -> String {
    let mut cents = amount.round_dp(2);
    cents.rescale(2);
    format!("${}", cents)
}

// =============================================================================
// Dates
// =============================================================================

/// Days are counted from the spreadsheet epoch.
fn spreadsheet_epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1899, 12, 30).unwrap_or_default()
}

const COMMON_DATES: &[&str] = &[
    "M/D/YYYY",
    "M/D/YY",
    "MM.DD.YYYY",
    "M.D.YYYY",
    "MM/DD/YYYY",
    "YYYY-MM-DD",
    "YY/MM/DD",
];

static COMMON_PATTERNS: Lazy<Vec<DatePattern>> =
    Lazy::new(|| COMMON_DATES.iter().filter_map(|p| DatePattern::compile(p)).collect());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    Year4,
    Year2,
    Month2,
    Month,
    Day2,
    Day,
    Literal(char),
}

const TOKENS: &[(&str, Token)] = &[
    ("YYYY", Token::Year4),
    ("YY", Token::Year2),
    ("MM", Token::Month2),
    ("M", Token::Month),
    ("DD", Token::Day2),
    ("D", Token::Day),
];

fn tokenize(pattern: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut rest = pattern;
    'outer: while let Some(c) = rest.chars().next() {
        for (text, token) in TOKENS {
            if let Some(tail) = rest.strip_prefix(text) {
                tokens.push(*token);
                rest = tail;
                continue 'outer;
            }
        }
        tokens.push(Token::Literal(c));
        rest = &rest[c.len_utf8()..];
    }
    tokens
}

/// A moment-style input pattern compiled to an anchored regex.
#[derive(Debug)]
struct DatePattern {
    matcher: Regex,
}

impl DatePattern {
    fn compile(pattern: &str) -> Option<Self> {
        let mut source = String::from("^");
        for token in tokenize(pattern.trim()) {
            match token {
                Token::Year4 => source.push_str(r"(?P<y4>\d{4})"),
                Token::Year2 => source.push_str(r"(?P<y2>\d{2})"),
                Token::Month2 => source.push_str(r"(?P<m>\d{2})"),
                Token::Month => source.push_str(r"(?P<m>\d{1,2})"),
                Token::Day2 => source.push_str(r"(?P<d>\d{2})"),
                Token::Day => source.push_str(r"(?P<d>\d{1,2})"),
                Token::Literal(c) => source.push_str(&regex::escape(&c.to_string())),
            }
        }
        source.push('$');
        Regex::new(&source).ok().map(|matcher| Self { matcher })
    }

    /// Missing day defaults to the 1st, missing year to `fallback_year`.
    fn parse(&self, input: &str, fallback_year: i32) -> Option<NaiveDate> {
        let caps = self.matcher.captures(input)?;
        let number = |name: &str| caps.name(name).and_then(|m| m.as_str().parse::<u32>().ok());

        let year = match (number("y4"), number("y2")) {
            (Some(y), _) => y as i32,
            (None, Some(y)) if y > 68 => 1900 + y as i32,
            (None, Some(y)) => 2000 + y as i32,
            (None, None) => fallback_year,
        };
        let month = number("m")?;
        let day = number("d").unwrap_or(1);
        NaiveDate::from_ymd_opt(year, month, day)
    }
}

/// Translate a moment-style output pattern to a chrono format string.
pub fn strftime_pattern(pattern: &str) -> String {
    tokenize(pattern)
        .into_iter()
        .map(|token| match token {
            Token::Year4 => "%Y".to_string(),
            Token::Year2 => "%y".to_string(),
            Token::Month2 => "%m".to_string(),
            Token::Month => "%-m".to_string(),
            Token::Day2 => "%d".to_string(),
            Token::Day => "%-d".to_string(),
            Token::Literal('%') => "%%".to_string(),
            Token::Literal(c) => c.to_string(),
        })
        .collect()
}

fn parse_date(value: &str, parse: Option<&str>, year: i32) -> Option<NaiveDate> {
    let value = value.trim();

    if let Some(parse) = parse {
        let input = match value.len() {
            5 | 7 => format!("0{}", value),
            _ => value.to_string(),
        };
        return parse
            .split(',')
            .filter_map(DatePattern::compile)
            .find_map(|p| p.parse(&input, year));
    }

    if let Ok(serial) = value.parse::<f64>() {
        if !serial.is_finite() {
            return None;
        }
        return spreadsheet_epoch().checked_add_signed(Duration::try_days(serial.trunc() as i64)?);
    }

    COMMON_PATTERNS.iter().find_map(|p| p.parse(value, year))
}

pub fn coerce_date(
    value: &str,
    parse: Option<&str>,
    mode: Option<YearMode>,
    format: &str,
    year: i32,
) -> EvalResult<String> {
    let invalid = || EvalError::InvalidDate { value: value.to_string() };

    let mut date = parse_date(value, parse, year).ok_or_else(invalid)?;
    if mode == Some(YearMode::Assume) {
        date = chrono::Datelike::with_year(&date, year).ok_or_else(invalid)?;
    }

    Ok(date.format(&strftime_pattern(format)).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usd_rounding() {
        assert_eq!(coerce_usd("9.995", RoundMode::Default).unwrap(), "$10.00");
        assert_eq!(coerce_usd("12", RoundMode::Default).unwrap(), "$12.00");
        assert_eq!(coerce_usd("1.231", RoundMode::Up).unwrap(), "$1.24");
        assert_eq!(coerce_usd("1.239", RoundMode::Down).unwrap(), "$1.23");
        assert_eq!(coerce_usd("$1,234.5", RoundMode::Default).unwrap(), "$1234.50");
        assert!(coerce_usd("n/a", RoundMode::Default).is_err());
    }

    #[test]
    fn test_usd_idempotent() {
        for input in ["9.995", "0", "-3.333", "1e2", "$5.5", "1,000.004"] {
            for mode in [RoundMode::Up, RoundMode::Down, RoundMode::Default] {
                let once = coerce_usd(input, mode).unwrap();
                let twice = coerce_usd(&once, mode).unwrap();
                assert_eq!(once, twice, "{} with {:?}", input, mode);
            }
        }
    }

    #[test]
    fn test_number() {
        assert_eq!(coerce_number("12", None).unwrap(), "12");
        assert_eq!(coerce_number(" 1.50 ", None).unwrap(), "1.5");
        assert_eq!(coerce_number("42abc", None).unwrap(), "42");
        assert_eq!(coerce_number("abc", Some("0")).unwrap(), "0");
        assert!(matches!(coerce_number("abc", None), Err(EvalError::InvalidNumber { .. })));
    }

    #[test]
    fn test_date_common_formats() {
        let fmt = "M/D/YYYY";
        assert_eq!(coerce_date("3/5/2024", None, None, fmt, 2024).unwrap(), "3/5/2024");
        assert_eq!(coerce_date("3/5/24", None, None, fmt, 2024).unwrap(), "3/5/2024");
        assert_eq!(coerce_date("03.05.2024", None, None, fmt, 2024).unwrap(), "3/5/2024");
        assert_eq!(coerce_date("2024-03-05", None, None, fmt, 2024).unwrap(), "3/5/2024");
        assert_eq!(coerce_date("99/12/31", None, None, fmt, 2024).unwrap(), "12/31/1999");
    }

    #[test]
    fn test_date_serial() {
        assert_eq!(coerce_date("45292", None, None, "M/D/YYYY", 2024).unwrap(), "1/1/2024");
        assert_eq!(coerce_date("45292.75", None, None, "YYYY-MM-DD", 2024).unwrap(), "2024-01-01");
    }

    #[test]
    fn test_date_explicit_parse_pads() {
        let date = coerce_date("30524", Some("MMDDYY"), None, "M/D/YYYY", 2024).unwrap();
        assert_eq!(date, "3/5/2024");
        let date = coerce_date("2024/3", Some("DD-MM-YYYY,YYYY/M"), None, "MM/DD/YYYY", 2024).unwrap();
        assert_eq!(date, "03/01/2024");
    }

    #[test]
    fn test_date_assume_year() {
        let date = coerce_date("3/5/1999", None, Some(YearMode::Assume), "M/D/YYYY", 2024).unwrap();
        assert_eq!(date, "3/5/2024");
        // Feb 29 does not exist in 2023
        assert!(coerce_date("2/29/2024", None, Some(YearMode::Assume), "M/D/YYYY", 2023).is_err());
    }

    #[test]
    fn test_date_invalid() {
        assert!(matches!(
            coerce_date("13/45/2024", None, None, "M/D/YYYY", 2024),
            Err(EvalError::InvalidDate { .. })
        ));
        assert!(coerce_date("soon", None, None, "M/D/YYYY", 2024).is_err());
    }

    #[test]
    fn test_strftime_pattern() {
        assert_eq!(strftime_pattern("M/D/YYYY"), "%-m/%-d/%Y");
        assert_eq!(strftime_pattern("YYYY-MM-DD"), "%Y-%m-%d");
        assert_eq!(strftime_pattern("DD.MM.YY %"), "%d.%m.%y %%");
    }
}
