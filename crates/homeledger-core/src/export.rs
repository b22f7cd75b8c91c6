//! CSV export of stored transactions

use csv::{QuoteStyle, WriterBuilder};

use crate::error::{CoreError, CoreResult};
use crate::models::TransactionRecord;

const EXPORT_HEADER: [&str; 9] = [
    "date",
    "description",
    "amount",
    "currency",
    "category",
    "payer",
    "flagged",
    "flag_reason",
    "fingerprint",
];

/// `<app>_<YYYY-MM>_<CUR>.csv`
pub fn export_filename(app_name: &str, month: &str, currency: &str) -> String {
    format!("{}_{}_{}.csv", app_name, month, currency.to_uppercase())
}

/// Header plus one record per transaction, every field quoted
pub fn export_csv(records: &[TransactionRecord]) -> CoreResult<String> {
    let mut writer = WriterBuilder::new()
        .quote_style(QuoteStyle::Always)
        .from_writer(Vec::new());
    writer.write_record(EXPORT_HEADER)?;

    for record in records {
        let reason = record.flag.reason.as_ref().map(|r| r.to_string()).unwrap_or_default();
        writer.write_record([
            record.date.format("%Y-%m-%d").to_string(),
            record.description.clone(),
            format!("{:.2}", record.amount),
            record.currency.clone(),
            record.category.clone(),
            record.payer.clone().unwrap_or_default(),
            record.flag.flagged.to_string(),
            reason,
            record.fingerprint.clone(),
        ])?;
    }

    let bytes = writer.into_inner().map_err(|e| CoreError::Export {
        message: e.error().to_string(),
    })?;
    String::from_utf8(bytes).map_err(|e| CoreError::Export { message: e.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FlagDecision, FlagReason};
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    #[test]
    fn test_export_filename() {
        assert_eq!(export_filename("homeledger", "2024-03", "eur"), "homeledger_2024-03_EUR.csv");
    }

    fn record() -> TransactionRecord {
        TransactionRecord {
            id: Some("tx-1".to_string()),
            tenant_id: "home".to_string(),
            date: NaiveDate::from_ymd_opt(2024, 3, 9).unwrap(),
            currency: "EUR".to_string(),
            amount: Decimal::new(-45, 1),
            description: "Cafe \"Blue\", Main St".to_string(),
            category: "dining".to_string(),
            payer: Some("alex".to_string()),
            source: "generic".to_string(),
            fingerprint: "fp_42".to_string(),
            recurrence_key: None,
            batch_id: None,
            flag: FlagDecision::flag(FlagReason::LimitCrossed { category: "dining".to_string() }),
            flag_source: None,
        }
    }

    #[test]
    fn test_export_csv_quotes_fields() {
        let csv = export_csv(&[record()]).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            r#""date","description","amount","currency","category","payer","flagged","flag_reason","fingerprint""#
        );
        assert_eq!(
            lines[1],
            r#""2024-03-09","Cafe ""Blue"", Main St","-4.50","EUR","dining","alex","true","crossed the dining limit","fp_42""#
        );
    }

    #[test]
    fn test_export_csv_keeps_line_breaks_inside_fields() {
        let mut multiline = record();
        multiline.description = "Hardware store\nreceipt 2".to_string();
        multiline.payer = None;
        multiline.flag = FlagDecision::none();

        let body = export_csv(&[multiline]).unwrap();
        let mut reader = csv::ReaderBuilder::new().from_reader(body.as_bytes());
        let rows: Vec<csv::StringRecord> = reader.records().collect::<Result<_, _>>().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(&rows[0][1], "Hardware store\nreceipt 2");
        assert_eq!(&rows[0][5], "");
        assert_eq!(&rows[0][6], "false");
    }

    #[test]
    fn test_export_csv_empty_is_header_only() {
        let csv = export_csv(&[]).unwrap();
        assert_eq!(csv.lines().count(), 1);
        assert!(csv.ends_with('\n'));
    }
}
