//! Tabular and structured source parsing

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;

use crate::error::ParseError;
use crate::formats::{find_format, ColumnMap, SourceFormat, FORMATS};
use crate::types::{
    AmountPolicy, AuditRow, ParsedSource, RowError, RowErrorKind, TransactionCandidate,
};

/// Leading lines searched for a header row (banks like to put account
/// metadata above the table)
const HEADER_SCAN_LINES: usize = 10;

/// Symbols removed from an amount before numeric conversion
const AMOUNT_NOISE: &[char] = &['+', '$', '€', '£', '¥', '\u{a0}'];

/// Integer digits accepted in an amount; anything larger is not a household
/// transaction and would overflow running totals
pub const MAX_AMOUNT_DIGITS: usize = 15;

static AMOUNT_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"^\d{{1,{}}}(\.\d+)?$", MAX_AMOUNT_DIGITS)).unwrap());

/// Split one delimited line into trimmed fields.
///
/// Quote-toggle scan: every `"` flips the in-quotes state and is dropped, and
/// the separator only splits outside quotes. Escaped quotes (`""`) are not
/// supported; they simply toggle twice.
pub fn split_fields(line: &str, separator: char) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for c in line.chars() {
        if c == '"' {
            in_quotes = !in_quotes;
        } else if c == separator && !in_quotes {
            fields.push(current.trim().to_string());
            current.clear();
        } else {
            current.push(c);
        }
    }
    fields.push(current.trim().to_string());

    fields
}

/// Parse an amount cell into a signed decimal.
///
/// Strips sign markers, currency symbols, thousands separators and whitespace.
/// A leading or trailing `-`, or surrounding parentheses, make it negative.
/// More than [`MAX_AMOUNT_DIGITS`] integer digits is treated as unreadable.
pub fn parse_amount(raw: &str, decimal_comma: bool) -> Option<Decimal> {
    let mut text = raw.trim();
    let mut negative = false;

    if text.len() >= 2 && text.starts_with('(') && text.ends_with(')') {
        negative = true;
        text = &text[1..text.len() - 1];
    }

    let mut cleaned: String = text
        .chars()
        .filter(|c| !AMOUNT_NOISE.contains(c) && !c.is_whitespace())
        .collect();

    cleaned = if decimal_comma {
        cleaned.replace(['.', '\''], "").replace(',', ".")
    } else {
        cleaned.replace([',', '\''], "")
    };

    if let Some(rest) = cleaned.strip_suffix('-') {
        negative = !negative;
        cleaned = rest.to_string();
    }
    if let Some(rest) = cleaned.strip_prefix('-') {
        negative = !negative;
        cleaned = rest.to_string();
    }

    if !AMOUNT_PATTERN.is_match(&cleaned) {
        return None;
    }

    let value = Decimal::from_str(&cleaned).ok()?;
    Some(if negative { -value } else { value })
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(|v| v.to_string())
}

/// Line-based parser for delimited bank exports
pub struct TabularParser;

impl TabularParser {
    /// Parse `text` with the format registered under `tag`
    pub fn parse_with_tag(text: &str, tag: &str, policy: AmountPolicy) -> Result<ParsedSource, ParseError> {
        let format = find_format(tag).ok_or_else(|| ParseError::UnknownFormat { tag: tag.to_string() })?;
        let lines = Self::lines(text)?;
        let (header_idx, columns) = Self::locate_header(&lines, format).ok_or_else(|| ParseError::Format {
            message: format!(
                "header does not contain the columns required by '{}': {}",
                format.tag,
                format.required_columns().join(", ")
            ),
        })?;

        Ok(Self::parse_rows(&lines, header_idx, columns, format, policy))
    }

    /// Parse `text`, picking the first registered format whose header matches
    pub fn parse_detect(text: &str, policy: AmountPolicy) -> Result<ParsedSource, ParseError> {
        let lines = Self::lines(text)?;
        for format in FORMATS {
            if let Some((header_idx, columns)) = Self::locate_header(&lines, format) {
                log::debug!(target: "homeledger::parser", "detected source format '{}'", format.tag);
                return Ok(Self::parse_rows(&lines, header_idx, columns, format, policy));
            }
        }

        Err(ParseError::Format {
            message: "no known source format matches the header row".to_string(),
        })
    }

    /// Detect the format tag of `text` without parsing rows
    pub fn detect(text: &str) -> Option<&'static str> {
        let lines = Self::lines(text).ok()?;
        FORMATS
            .iter()
            .find(|format| Self::locate_header(&lines, format).is_some())
            .map(|format| format.tag)
    }

    fn lines(text: &str) -> Result<Vec<&str>, ParseError> {
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);
        let lines: Vec<&str> = text.lines().collect();
        if lines.iter().all(|l| l.trim().is_empty()) {
            return Err(ParseError::EmptySource);
        }
        Ok(lines)
    }

    fn locate_header(lines: &[&str], format: &SourceFormat) -> Option<(usize, ColumnMap)> {
        lines
            .iter()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .take(HEADER_SCAN_LINES)
            .find_map(|(idx, line)| {
                format
                    .match_header(&split_fields(line, format.separator))
                    .map(|columns| (idx, columns))
            })
    }

    fn parse_rows(
        lines: &[&str],
        header_idx: usize,
        columns: ColumnMap,
        format: &SourceFormat,
        policy: AmountPolicy,
    ) -> ParsedSource {
        let mut parsed = ParsedSource {
            format: format.tag.to_string(),
            ..ParsedSource::default()
        };

        for (idx, line) in lines.iter().enumerate().skip(header_idx + 1) {
            if line.trim().is_empty() {
                continue;
            }
            let row = idx + 1;
            parsed.audit.push(AuditRow { row, raw: line.to_string() });

            let cells = split_fields(line, format.separator);
            let cell = |i: usize| cells.get(i).map(String::as_str).unwrap_or("");

            let date_cell = cell(columns.date);
            if format.is_pending(date_cell) {
                parsed.pending_skipped += 1;
                continue;
            }

            let date = match format.parse_date(date_cell) {
                Some(date) => date,
                None => {
                    parsed.rejected.push(RowError {
                        row,
                        raw: line.to_string(),
                        kind: RowErrorKind::InvalidDate(date_cell.to_string()),
                    });
                    continue;
                }
            };

            let amount_cell = cell(columns.amount);
            let amount = match parse_amount(amount_cell, format.decimal_comma) {
                Some(amount) => amount,
                None => match policy {
                    AmountPolicy::Lenient => {
                        log::warn!(
                            target: "homeledger::parser",
                            "row {}: amount '{}' is not a number, importing as 0",
                            row,
                            amount_cell
                        );
                        parsed.lenient_amounts += 1;
                        Decimal::ZERO
                    }
                    AmountPolicy::Strict => {
                        parsed.rejected.push(RowError {
                            row,
                            raw: line.to_string(),
                            kind: RowErrorKind::InvalidAmount(amount_cell.to_string()),
                        });
                        continue;
                    }
                },
            };

            parsed.candidates.push(TransactionCandidate {
                row,
                date,
                amount,
                description: cell(columns.description).to_string(),
                category: columns.category.and_then(|i| non_empty(cells.get(i))),
                payer: columns.payer.and_then(|i| non_empty(cells.get(i))),
                currency: columns
                    .currency
                    .and_then(|i| non_empty(cells.get(i)))
                    .map(|c| c.to_uppercase()),
                recurrence_key: None,
            });
        }

        parsed
    }
}

/// One element of a structured (JSON) payload
#[derive(Debug, Deserialize)]
struct StructuredRow {
    date: String,
    amount: serde_json::Value,
    #[serde(default)]
    description: String,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    payer: Option<String>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    recurrence_key: Option<String>,
    #[serde(default)]
    pending: bool,
}

/// Parser for pasted JSON arrays of transactions
pub struct StructuredParser;

impl StructuredParser {
    pub const FORMAT_TAG: &'static str = "structured";

    pub fn parse(json: &str, policy: AmountPolicy) -> Result<ParsedSource, ParseError> {
        if json.trim().is_empty() {
            return Err(ParseError::EmptySource);
        }
        let value: serde_json::Value = serde_json::from_str(json)
            .map_err(|e| ParseError::Format { message: format!("invalid JSON payload: {}", e) })?;
        let elements = value.as_array().ok_or_else(|| ParseError::Format {
            message: "structured payload must be a JSON array".to_string(),
        })?;

        let mut parsed = ParsedSource {
            format: Self::FORMAT_TAG.to_string(),
            ..ParsedSource::default()
        };

        for (idx, element) in elements.iter().enumerate() {
            let row = idx + 1;
            let raw = element.to_string();
            parsed.audit.push(AuditRow { row, raw: raw.clone() });

            let entry: StructuredRow = match serde_json::from_value(element.clone()) {
                Ok(entry) => entry,
                Err(e) => {
                    parsed.rejected.push(RowError { row, raw, kind: RowErrorKind::Malformed(e.to_string()) });
                    continue;
                }
            };

            if entry.pending || entry.date.trim().eq_ignore_ascii_case("pending") {
                parsed.pending_skipped += 1;
                continue;
            }

            let date = match NaiveDate::parse_from_str(entry.date.trim(), "%Y-%m-%d") {
                Ok(date) => date,
                Err(_) => {
                    parsed.rejected.push(RowError { row, raw, kind: RowErrorKind::InvalidDate(entry.date) });
                    continue;
                }
            };

            let amount_text = match &entry.amount {
                serde_json::Value::Number(n) => n.to_string(),
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let amount = match parse_amount(&amount_text, false) {
                Some(amount) => amount,
                None if policy == AmountPolicy::Lenient => {
                    log::warn!(
                        target: "homeledger::parser",
                        "element {}: amount '{}' is not a number, importing as 0",
                        row,
                        amount_text
                    );
                    parsed.lenient_amounts += 1;
                    Decimal::ZERO
                }
                None => {
                    parsed.rejected.push(RowError { row, raw, kind: RowErrorKind::InvalidAmount(amount_text) });
                    continue;
                }
            };

            parsed.candidates.push(TransactionCandidate {
                row,
                date,
                amount,
                description: entry.description.trim().to_string(),
                category: non_empty(entry.category.as_ref()),
                payer: non_empty(entry.payer.as_ref()),
                currency: non_empty(entry.currency.as_ref()).map(|c| c.to_uppercase()),
                recurrence_key: non_empty(entry.recurrence_key.as_ref()),
            });
        }

        Ok(parsed)
    }
}

// ==================== Tests ====================

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_split_fields_keeps_quoted_separator() {
        let fields = split_fields(r#"2024-03-01,"Smith, John",-12.50"#, ',');
        assert_eq!(fields, vec!["2024-03-01", "Smith, John", "-12.50"]);
    }

    #[test]
    fn test_split_fields_escaped_quotes_not_supported() {
        // "" toggles twice and vanishes
        let fields = split_fields(r#""say ""hi""",1"#, ',');
        assert_eq!(fields, vec!["say hi", "1"]);
    }

    #[test]
    fn test_split_fields_trailing_empty() {
        assert_eq!(split_fields("a;b;", ';'), vec!["a", "b", ""]);
    }

    #[test]
    fn test_parse_amount_variants() {
        assert_eq!(parse_amount("-1,234.56", false), Some(dec("-1234.56")));
        assert_eq!(parse_amount("+ $ 45.00", false), Some(dec("45.00")));
        assert_eq!(parse_amount("€12", false), Some(dec("12")));
        assert_eq!(parse_amount("(30.10)", false), Some(dec("-30.10")));
        assert_eq!(parse_amount("19.99-", false), Some(dec("-19.99")));
        assert_eq!(parse_amount("-1.234,56", true), Some(dec("-1234.56")));
        assert_eq!(parse_amount("n/a", false), None);
        assert_eq!(parse_amount("", false), None);
        assert_eq!(parse_amount("1.2.3", false), None);
    }

    #[test]
    fn test_parse_amount_rejects_oversized_values() {
        assert_eq!(parse_amount("999999999999999.99", false), Some(dec("999999999999999.99")));
        assert_eq!(parse_amount("1000000000000000", false), None);
        assert_eq!(parse_amount("79228162514264337593543950335", false), None);
        assert_eq!(parse_amount("-79.228.162.514.264.337.593.543.950.335,00", true), None);
    }

    #[test]
    fn test_parse_generic_csv() {
        let text = "Date,Description,Amount,Category\n\
                    2024-03-01,Grocery Store,-54.20,groceries\n\
                    2024-03-02,Salary,2500.00,\n";
        let parsed = TabularParser::parse_with_tag(text, "generic", AmountPolicy::Lenient).unwrap();
        assert_eq!(parsed.format, "generic");
        assert_eq!(parsed.candidates.len(), 2);
        assert_eq!(parsed.candidates[0].row, 2);
        assert_eq!(parsed.candidates[0].amount, dec("-54.20"));
        assert_eq!(parsed.candidates[0].category.as_deref(), Some("groceries"));
        assert!(parsed.candidates[0].is_expense());
        assert_eq!(parsed.candidates[1].category, None);
        assert_eq!(parsed.audit.len(), 2);
    }

    #[test]
    fn test_missing_columns_is_format_error() {
        let text = "When,What\n2024-03-01,Coffee\n";
        let err = TabularParser::parse_with_tag(text, "generic", AmountPolicy::Lenient).unwrap_err();
        assert!(matches!(err, ParseError::Format { .. }));
    }

    #[test]
    fn test_unknown_tag() {
        let err = TabularParser::parse_with_tag("Date,Description,Amount\n", "acme", AmountPolicy::Lenient).unwrap_err();
        assert_eq!(err, ParseError::UnknownFormat { tag: "acme".to_string() });
    }

    #[test]
    fn test_empty_source() {
        let err = TabularParser::parse_detect("\n  \n", AmountPolicy::Lenient).unwrap_err();
        assert_eq!(err, ParseError::EmptySource);
    }

    #[test]
    fn test_header_after_preamble() {
        let text = "Account: 12345\nExported: today\n\nPosting Date,Details,Amount\n03/15/2024,COFFEE BAR,-4.50\n";
        let parsed = TabularParser::parse_with_tag(text, "checking", AmountPolicy::Lenient).unwrap();
        assert_eq!(parsed.candidates.len(), 1);
        assert_eq!(parsed.candidates[0].date, NaiveDate::from_ymd_opt(2024, 3, 15).unwrap());
        assert_eq!(parsed.candidates[0].row, 5);
    }

    #[test]
    fn test_pending_rows_counted_not_rejected() {
        let text = "Transaction Date,Merchant,Amount\nPending,Bookshop,-20.00\n2024-03-03,Bakery,-3.10\n";
        let parsed = TabularParser::parse_with_tag(text, "card", AmountPolicy::Lenient).unwrap();
        assert_eq!(parsed.pending_skipped, 1);
        assert!(parsed.rejected.is_empty());
        assert_eq!(parsed.candidates.len(), 1);
        assert_eq!(parsed.audit.len(), 2);
    }

    #[test]
    fn test_bad_date_rejected_row_only() {
        let text = "Date,Description,Amount\nyesterday,Cinema,-12.00\n2024-03-04,Pharmacy,-8.00\n";
        let parsed = TabularParser::parse_with_tag(text, "generic", AmountPolicy::Lenient).unwrap();
        assert_eq!(parsed.candidates.len(), 1);
        assert_eq!(parsed.rejected.len(), 1);
        assert_eq!(parsed.rejected[0].row, 2);
        assert_eq!(parsed.rejected[0].kind, RowErrorKind::InvalidDate("yesterday".to_string()));
    }

    #[test]
    fn test_amount_policy() {
        let text = "Date,Description,Amount\n2024-03-01,Mystery,abc\n";
        let lenient = TabularParser::parse_with_tag(text, "generic", AmountPolicy::Lenient).unwrap();
        assert_eq!(lenient.candidates[0].amount, Decimal::ZERO);
        assert_eq!(lenient.lenient_amounts, 1);

        let strict = TabularParser::parse_with_tag(text, "generic", AmountPolicy::Strict).unwrap();
        assert!(strict.candidates.is_empty());
        assert_eq!(strict.rejected[0].kind, RowErrorKind::InvalidAmount("abc".to_string()));
    }

    #[test]
    fn test_detect_format() {
        let text = "Datum;Date;Memo;Amount;Currency\n;05.03.2024;Bäckerei;-3,20;eur\n";
        assert_eq!(TabularParser::detect(text), Some("semicolon"));
        let parsed = TabularParser::parse_detect(text, AmountPolicy::Lenient).unwrap();
        assert_eq!(parsed.format, "semicolon");
        assert_eq!(parsed.candidates[0].amount, dec("-3.20"));
        assert_eq!(parsed.candidates[0].currency.as_deref(), Some("EUR"));

        assert_eq!(TabularParser::detect("foo,bar\n1,2\n"), None);
    }

    #[test]
    fn test_comma_header_with_memo_column_is_generic() {
        let text = "Date,Description,Amount,Memo\n2024-07-01,Bakery,-4.20,x\n2024-07-02,Kiosk,-1.10,y\n";
        assert_eq!(TabularParser::detect(text), Some("generic"));

        let parsed = TabularParser::parse_detect(text, AmountPolicy::Lenient).unwrap();
        assert_eq!(parsed.format, "generic");
        assert_eq!(parsed.candidates.len(), 2);
        assert!(parsed.rejected.is_empty());
        assert_eq!(parsed.candidates[0].description, "Bakery");
    }

    #[test]
    fn test_three_rows_with_identical_pair() {
        let text = "Date,Description,Amount\n\
                    2024-03-01,Rent,-900.00\n\
                    2024-03-02,Coffee,-3.50\n\
                    2024-03-02,Coffee,-3.50\n";
        let parsed = TabularParser::parse_with_tag(text, "generic", AmountPolicy::Lenient).unwrap();
        assert_eq!(parsed.candidates.len(), 3);
        assert_eq!(parsed.candidates[1].description, parsed.candidates[2].description);
        assert_eq!(parsed.date_range(), Some((
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 2).unwrap(),
        )));
    }

    #[test]
    fn test_structured_payload() {
        let json = r#"[
            {"date": "2024-04-01", "amount": -42.5, "description": " Fuel ", "category": "car", "currency": "usd"},
            {"date": "2024-04-02", "amount": "1,000.00", "description": "Bonus", "recurrence_key": "bonus"},
            {"date": "pending", "amount": -1, "description": "Hold"},
            {"date": "04/03/2024", "amount": -5, "description": "Bad date"},
            {"amount": -5}
        ]"#;
        let parsed = StructuredParser::parse(json, AmountPolicy::Lenient).unwrap();
        assert_eq!(parsed.format, "structured");
        assert_eq!(parsed.candidates.len(), 2);
        assert_eq!(parsed.candidates[0].amount, dec("-42.5"));
        assert_eq!(parsed.candidates[0].description, "Fuel");
        assert_eq!(parsed.candidates[0].currency.as_deref(), Some("USD"));
        assert_eq!(parsed.candidates[1].amount, dec("1000.00"));
        assert_eq!(parsed.candidates[1].recurrence_key.as_deref(), Some("bonus"));
        assert_eq!(parsed.pending_skipped, 1);
        assert_eq!(parsed.rejected.len(), 2);
        assert_eq!(parsed.audit.len(), 5);
    }

    #[test]
    fn test_structured_payload_must_be_array() {
        let err = StructuredParser::parse(r#"{"date": "2024-01-01"}"#, AmountPolicy::Lenient).unwrap_err();
        assert!(matches!(err, ParseError::Format { .. }));
        let err = StructuredParser::parse("not json", AmountPolicy::Lenient).unwrap_err();
        assert!(matches!(err, ParseError::Format { .. }));
    }
}
