//! Registry of supported bank export formats
//!
//! Each format names the columns it requires. A header row matches when every
//! required name is found, case-insensitively, as a substring of a distinct
//! header cell. Formats are tried in registry order during detection, so the more
//! specific layouts come before `generic`.

use chrono::NaiveDate;

/// Declaration of one tabular export layout
#[derive(Debug, Clone, PartialEq)]
pub struct SourceFormat {
    pub tag: &'static str,
    pub name: &'static str,
    pub separator: char,
    pub date_column: &'static str,
    pub description_column: &'static str,
    pub amount_column: &'static str,
    pub category_column: Option<&'static str>,
    pub payer_column: Option<&'static str>,
    pub currency_column: Option<&'static str>,
    /// chrono patterns tried in order
    pub date_patterns: &'static [&'static str],
    /// Date cell values that mark a not-yet-booked row
    pub pending_markers: &'static [&'static str],
    /// `1.234,56` style numbers
    pub decimal_comma: bool,
}

/// Column indices resolved from a header row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnMap {
    pub date: usize,
    pub description: usize,
    pub amount: usize,
    pub category: Option<usize>,
    pub payer: Option<usize>,
    pub currency: Option<usize>,
}

pub static FORMATS: &[SourceFormat] = &[
    SourceFormat {
        tag: "checking",
        name: "Checking account export",
        separator: ',',
        date_column: "posting date",
        description_column: "details",
        amount_column: "amount",
        category_column: None,
        payer_column: None,
        currency_column: None,
        date_patterns: &["%m/%d/%Y", "%m/%d/%y"],
        pending_markers: &["pending"],
        decimal_comma: false,
    },
    SourceFormat {
        tag: "card",
        name: "Credit card export",
        separator: ',',
        date_column: "transaction date",
        description_column: "merchant",
        amount_column: "amount",
        category_column: Some("category"),
        payer_column: Some("card member"),
        currency_column: None,
        date_patterns: &["%Y-%m-%d", "%m/%d/%Y"],
        pending_markers: &["pending", "in process"],
        decimal_comma: false,
    },
    SourceFormat {
        tag: "semicolon",
        name: "Semicolon separated export with decimal commas",
        separator: ';',
        date_column: "date",
        description_column: "memo",
        amount_column: "amount",
        category_column: Some("category"),
        payer_column: None,
        currency_column: Some("currency"),
        date_patterns: &["%d.%m.%Y", "%d.%m.%y", "%Y-%m-%d"],
        pending_markers: &["pending", "vorgemerkt"],
        decimal_comma: true,
    },
    SourceFormat {
        tag: "generic",
        name: "Generic CSV",
        separator: ',',
        date_column: "date",
        description_column: "description",
        amount_column: "amount",
        category_column: Some("category"),
        payer_column: Some("payer"),
        currency_column: Some("currency"),
        date_patterns: &["%Y-%m-%d", "%d/%m/%Y"],
        pending_markers: &["pending"],
        decimal_comma: false,
    },
];

/// Look up a registered format by tag (case-insensitive)
pub fn find_format(tag: &str) -> Option<&'static SourceFormat> {
    FORMATS.iter().find(|f| f.tag.eq_ignore_ascii_case(tag.trim()))
}

impl SourceFormat {
    /// Required column names, in date/description/amount order
    pub fn required_columns(&self) -> [&'static str; 3] {
        [self.date_column, self.description_column, self.amount_column]
    }

    /// Resolve column positions if `cells` is a header row for this format.
    ///
    /// Each required column claims its own cell: the first matching cell not
    /// already taken by an earlier required column.
    pub fn match_header(&self, cells: &[String]) -> Option<ColumnMap> {
        let required = self.required_columns();
        if cells.len() < required.len() {
            return None;
        }

        let lowered: Vec<String> = cells.iter().map(|c| c.trim().to_lowercase()).collect();
        let find = |name: &str, claimed: &[usize]| {
            (0..lowered.len()).find(|idx| !claimed.contains(idx) && lowered[*idx].contains(name))
        };

        let mut claimed: Vec<usize> = Vec::with_capacity(required.len());
        for name in required {
            let idx = find(name, &claimed)?;
            claimed.push(idx);
        }
        let optional = |name: &str| find(name, &claimed);

        Some(ColumnMap {
            date: claimed[0],
            description: claimed[1],
            amount: claimed[2],
            category: self.category_column.and_then(optional),
            payer: self.payer_column.and_then(optional),
            currency: self.currency_column.and_then(optional),
        })
    }

    pub fn is_pending(&self, date_cell: &str) -> bool {
        let cell = date_cell.trim();
        self.pending_markers.iter().any(|m| m.eq_ignore_ascii_case(cell))
    }

    /// Strict date parsing against this format's patterns
    pub fn parse_date(&self, date_cell: &str) -> Option<NaiveDate> {
        let cell = date_cell.trim();
        self.date_patterns
            .iter()
            .find_map(|pattern| NaiveDate::parse_from_str(cell, pattern).ok())
    }
}
