//! Category limit engine
//!
//! Pure functions over explicit inputs. Running totals live in a
//! [`LimitAccumulator`] built fresh for every call and handed back with the
//! decisions; nothing is kept between calls.
//!
//! All comparisons happen in the reference currency. Categories without a
//! positive limit, and rows whose currency cannot be converted, are inert:
//! they are never counted and never flagged.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use homeledger_config::{CategoryLimitConfig, CurrencyConfig, FlagMode};

use crate::models::{FlagDecision, FlagReason, TransactionRecord};

const APPROACHING_PERCENT: i64 = 80;
const EXCEEDED_PERCENT: i64 = 100;

// ==================== Inputs ====================

/// Spending cap of one category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryLimit {
    pub category: String,
    pub limit: Decimal,
    pub mode: FlagMode,
}

impl CategoryLimit {
    pub fn new(category: &str, limit: Decimal, mode: FlagMode) -> Self {
        Self {
            category: category.to_string(),
            limit,
            mode,
        }
    }

    /// Has a positive limit; counted in status reports
    pub fn is_active(&self) -> bool {
        self.limit > Decimal::ZERO
    }

    /// Active and with a flag mode; takes part in flagging
    pub fn participates(&self) -> bool {
        self.is_active() && self.mode != FlagMode::Off
    }
}

/// Limits keyed by lowercased category name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CategoryLimits {
    limits: BTreeMap<String, CategoryLimit>,
}

impl CategoryLimits {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &BTreeMap<String, CategoryLimitConfig>) -> Self {
        config
            .iter()
            .fold(Self::new(), |limits, (category, cfg)| limits.with(category, cfg.limit, cfg.mode))
    }

    pub fn with(mut self, category: &str, limit: Decimal, mode: FlagMode) -> Self {
        self.insert(CategoryLimit::new(category.trim(), limit, mode));
        self
    }

    pub fn insert(&mut self, limit: CategoryLimit) {
        self.limits.insert(limit.category.to_lowercase(), limit);
    }

    pub fn get(&self, category: &str) -> Option<&CategoryLimit> {
        self.limits.get(&category.trim().to_lowercase())
    }

    /// Limits with a positive amount, ordered by category
    pub fn active(&self) -> impl Iterator<Item = &CategoryLimit> {
        self.limits.values().filter(|l| l.is_active())
    }

    fn participating(&self, category: &str) -> Option<&CategoryLimit> {
        self.get(category).filter(|l| l.participates())
    }

    pub fn is_empty(&self) -> bool {
        self.limits.is_empty()
    }
}

/// Conversion of the secondary currency into the reference currency
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversion {
    pub reference: String,
    pub secondary: String,
    /// Units of `secondary` per one unit of `reference`
    pub rate: Decimal,
}

impl Conversion {
    pub fn new(reference: &str, secondary: &str, rate: Decimal) -> Self {
        Self {
            reference: reference.to_string(),
            secondary: secondary.to_string(),
            rate,
        }
    }

    /// Only the reference currency is convertible
    pub fn identity(reference: &str) -> Self {
        Self::new(reference, reference, Decimal::ONE)
    }

    pub fn from_config(config: &CurrencyConfig) -> Self {
        Self::new(&config.reference, &config.secondary, config.rate)
    }

    /// `amount` in the reference currency, `None` when not convertible or
    /// when the converted value does not fit a decimal
    pub fn to_reference(&self, amount: Decimal, currency: &str) -> Option<Decimal> {
        let currency = currency.trim();
        if currency.eq_ignore_ascii_case(&self.reference) {
            Some(amount)
        } else if currency.eq_ignore_ascii_case(&self.secondary) && self.rate > Decimal::ZERO {
            amount.checked_div(self.rate)
        } else {
            None
        }
    }

    /// Reference-currency spend of an expense row, `None` for income,
    /// zero amounts and unconvertible rows
    fn expense(&self, record: &TransactionRecord) -> Option<Decimal> {
        if !record.is_expense() {
            return None;
        }
        self.to_reference(record.amount.abs(), &record.currency)
    }
}

fn saturating_sum(amounts: impl Iterator<Item = Decimal>) -> Decimal {
    amounts.fold(Decimal::ZERO, Decimal::saturating_add)
}

// ==================== Status ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitState {
    Normal,
    Approaching,
    Exceeded,
}

impl std::fmt::Display for LimitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LimitState::Normal => write!(f, "normal"),
            LimitState::Approaching => write!(f, "approaching"),
            LimitState::Exceeded => write!(f, "exceeded"),
        }
    }
}

/// Spend-to-date of one limited category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryStatus {
    pub category: String,
    pub limit: Decimal,
    pub spent: Decimal,
    pub percentage: f64,
    pub state: LimitState,
    pub remaining: Decimal,
    pub mode: FlagMode,
}

/// Spend per category with a positive limit, ordered by category.
///
/// The flag mode plays no part here; a category with mode `off` still
/// reports its spending. Totals saturate at `Decimal::MAX`.
pub fn status(
    transactions: &[TransactionRecord],
    limits: &CategoryLimits,
    conversion: &Conversion,
) -> Vec<CategoryStatus> {
    limits
        .active()
        .map(|limit| {
            let spent = saturating_sum(
                transactions
                    .iter()
                    .filter(|tx| tx.in_category(&limit.category))
                    .filter_map(|tx| conversion.expense(tx)),
            );

            let percentage = spent
                .checked_mul(Decimal::from(100))
                .and_then(|scaled| scaled.checked_div(limit.limit))
                .unwrap_or(Decimal::MAX);
            let state = if percentage >= Decimal::from(EXCEEDED_PERCENT) {
                LimitState::Exceeded
            } else if percentage >= Decimal::from(APPROACHING_PERCENT) {
                LimitState::Approaching
            } else {
                LimitState::Normal
            };

            CategoryStatus {
                category: limit.category.clone(),
                limit: limit.limit,
                spent,
                percentage: percentage.to_f64().unwrap_or(0.0),
                state,
                remaining: (limit.limit - spent).max(Decimal::ZERO),
                mode: limit.mode,
            }
        })
        .collect()
}

// ==================== Batch evaluation ====================

/// Running state of one category during a scan
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryAccumulator {
    pub total: Decimal,
    /// Set by the crossing row and never reset within the scan
    pub crossed: bool,
}

/// Per-category running totals of one evaluation call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LimitAccumulator {
    categories: BTreeMap<String, CategoryAccumulator>,
}

impl LimitAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one converted expense and decide its flag
    pub fn record(&mut self, limit: &CategoryLimit, amount: Decimal) -> FlagDecision {
        let acc = self.categories.entry(limit.category.to_lowercase()).or_default();
        acc.total = acc.total.saturating_add(amount);

        if acc.crossed {
            return match limit.mode {
                FlagMode::AllAfter => FlagDecision::flag(FlagReason::OverLimit {
                    category: limit.category.clone(),
                }),
                _ => FlagDecision::none(),
            };
        }

        if acc.total > limit.limit {
            acc.crossed = true;
            FlagDecision::flag(FlagReason::LimitCrossed {
                category: limit.category.clone(),
            })
        } else {
            FlagDecision::none()
        }
    }

    pub fn get(&self, category: &str) -> Option<&CategoryAccumulator> {
        self.categories.get(&category.trim().to_lowercase())
    }

    pub fn total(&self, category: &str) -> Decimal {
        self.get(category).map(|acc| acc.total).unwrap_or_default()
    }

    pub fn crossed(&self, category: &str) -> bool {
        self.get(category).map_or(false, |acc| acc.crossed)
    }
}

/// Decisions of one batch scan, one per input row
#[derive(Debug, Clone, Default)]
pub struct BatchEvaluation {
    pub decisions: Vec<FlagDecision>,
    pub accumulator: LimitAccumulator,
}

impl BatchEvaluation {
    /// `(input index, decision)` for every flagged row
    pub fn flagged(&self) -> impl Iterator<Item = (usize, &FlagDecision)> {
        self.decisions.iter().enumerate().filter(|(_, d)| d.flagged)
    }
}

/// Scan `transactions` in date order and decide which rows to flag.
///
/// Ties on the date keep input order. `decisions[i]` belongs to
/// `transactions[i]`.
pub fn evaluate_batch(
    transactions: &[TransactionRecord],
    limits: &CategoryLimits,
    conversion: &Conversion,
) -> BatchEvaluation {
    let mut order: Vec<usize> = (0..transactions.len()).collect();
    order.sort_by_key(|&idx| transactions[idx].date);

    let mut evaluation = BatchEvaluation {
        decisions: vec![FlagDecision::none(); transactions.len()],
        accumulator: LimitAccumulator::new(),
    };

    for idx in order {
        let tx = &transactions[idx];
        let Some(limit) = limits.participating(&tx.category) else {
            continue;
        };
        let Some(amount) = conversion.expense(tx) else {
            continue;
        };
        evaluation.decisions[idx] = evaluation.accumulator.record(limit, amount);
    }

    evaluation
}

/// Decide the flag of a single added or edited transaction.
///
/// `existing` may contain the edited row itself; it is excluded by id.
pub fn evaluate_incremental(
    new: &TransactionRecord,
    existing: &[TransactionRecord],
    limits: &CategoryLimits,
    conversion: &Conversion,
) -> FlagDecision {
    let Some(limit) = limits.participating(&new.category) else {
        return FlagDecision::none();
    };
    let Some(amount) = conversion.expense(new) else {
        return FlagDecision::none();
    };

    let pre = saturating_sum(
        existing
            .iter()
            .filter(|tx| tx.in_category(&limit.category))
            .filter(|tx| new.id.is_none() || tx.id != new.id)
            .filter_map(|tx| conversion.expense(tx)),
    );
    let post = pre.saturating_add(amount);

    let crossed = FlagReason::LimitCrossed {
        category: limit.category.clone(),
    };
    match limit.mode {
        FlagMode::Crossing if pre <= limit.limit && post > limit.limit => FlagDecision::flag(crossed),
        FlagMode::AllAfter if pre > limit.limit => FlagDecision::flag(FlagReason::OverLimit {
            category: limit.category.clone(),
        }),
        FlagMode::AllAfter if post > limit.limit => FlagDecision::flag(crossed),
        _ => FlagDecision::none(),
    }
}

// ==================== Tests ====================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::str::FromStr;

    fn tx(day: u32, amount: i64, category: &str) -> TransactionRecord {
        TransactionRecord {
            id: None,
            tenant_id: "home".to_string(),
            date: NaiveDate::from_ymd_opt(2024, 5, day).unwrap(),
            currency: "EUR".to_string(),
            amount: Decimal::from(amount),
            description: format!("{} on {}", category, day),
            category: category.to_string(),
            payer: None,
            source: "generic".to_string(),
            fingerprint: format!("fp_{}_{}", day, amount),
            recurrence_key: None,
            batch_id: None,
            flag: FlagDecision::none(),
            flag_source: None,
        }
    }

    fn eur() -> Conversion {
        Conversion::identity("EUR")
    }

    fn five_hundreds() -> Vec<TransactionRecord> {
        (1..=5).map(|day| tx(day, -100, "dining")).collect()
    }

    fn flagged_indices(evaluation: &BatchEvaluation) -> Vec<usize> {
        evaluation.flagged().map(|(idx, _)| idx).collect()
    }

    #[test]
    fn test_status_percentages() {
        let limits = CategoryLimits::new().with("groceries", Decimal::from(800), FlagMode::Off);

        let spent_500 = vec![tx(1, -300, "groceries"), tx(2, -200, "Groceries"), tx(3, 900, "groceries")];
        let result = status(&spent_500, &limits, &eur());
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].spent, Decimal::from(500));
        assert_eq!(result[0].percentage, 62.5);
        assert_eq!(result[0].state, LimitState::Normal);
        assert_eq!(result[0].remaining, Decimal::from(300));

        let spent_820 = vec![tx(1, -820, "groceries")];
        let result = status(&spent_820, &limits, &eur());
        assert_eq!(result[0].state, LimitState::Exceeded);
        assert_eq!(result[0].remaining, Decimal::ZERO);

        let spent_640 = vec![tx(1, -640, "groceries")];
        assert_eq!(status(&spent_640, &limits, &eur())[0].state, LimitState::Approaching);
    }

    #[test]
    fn test_status_skips_inactive_limits() {
        let limits = CategoryLimits::new()
            .with("travel", Decimal::ZERO, FlagMode::Crossing)
            .with("dining", Decimal::from(-5), FlagMode::AllAfter)
            .with("books", Decimal::from(50), FlagMode::Crossing);
        let result = status(&[tx(1, -10, "travel")], &limits, &eur());
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].category, "books");
        assert_eq!(result[0].spent, Decimal::ZERO);
    }

    #[test]
    fn test_crossing_flags_only_the_crossing_row() {
        let limits = CategoryLimits::new().with("dining", Decimal::from(250), FlagMode::Crossing);
        let evaluation = evaluate_batch(&five_hundreds(), &limits, &eur());
        assert_eq!(flagged_indices(&evaluation), vec![2]);
        assert_eq!(
            evaluation.decisions[2].reason,
            Some(FlagReason::LimitCrossed { category: "dining".to_string() })
        );
        assert_eq!(evaluation.accumulator.total("dining"), Decimal::from(500));
        assert!(evaluation.accumulator.crossed("dining"));
    }

    #[test]
    fn test_all_after_flags_crossing_and_later_rows() {
        let limits = CategoryLimits::new().with("dining", Decimal::from(250), FlagMode::AllAfter);
        let evaluation = evaluate_batch(&five_hundreds(), &limits, &eur());
        assert_eq!(flagged_indices(&evaluation), vec![2, 3, 4]);
        assert_eq!(
            evaluation.decisions[4].reason,
            Some(FlagReason::OverLimit { category: "dining".to_string() })
        );
    }

    #[test]
    fn test_batch_scans_in_date_order() {
        let limits = CategoryLimits::new().with("dining", Decimal::from(250), FlagMode::Crossing);
        // input order is reversed; the third row by date is index 2
        let rows: Vec<_> = five_hundreds().into_iter().rev().collect();
        let evaluation = evaluate_batch(&rows, &limits, &eur());
        assert_eq!(flagged_indices(&evaluation), vec![2]);
        assert_eq!(rows[2].date.to_string(), "2024-05-03");
    }

    #[test]
    fn test_exactly_at_limit_is_not_crossed() {
        let limits = CategoryLimits::new().with("dining", Decimal::from(200), FlagMode::Crossing);
        let rows = vec![tx(1, -100, "dining"), tx(2, -100, "dining"), tx(3, -1, "dining")];
        assert_eq!(flagged_indices(&evaluate_batch(&rows, &limits, &eur())), vec![2]);
    }

    #[test]
    fn test_batch_ignores_income_and_inert_categories() {
        let limits = CategoryLimits::new()
            .with("dining", Decimal::from(50), FlagMode::AllAfter)
            .with("travel", Decimal::from(10), FlagMode::Off);
        let rows = vec![
            tx(1, 500, "dining"),
            tx(2, -60, "dining"),
            tx(3, 40, "dining"),
            tx(4, -900, "travel"),
            tx(5, -900, "unlimited"),
        ];
        let evaluation = evaluate_batch(&rows, &limits, &eur());
        assert_eq!(flagged_indices(&evaluation), vec![1]);
        assert_eq!(evaluation.accumulator.total("travel"), Decimal::ZERO);
    }

    #[test]
    fn test_secondary_currency_is_converted() {
        let conversion = Conversion::new("EUR", "USD", Decimal::from_str("2").unwrap());
        let limits = CategoryLimits::new().with("dining", Decimal::from(100), FlagMode::Crossing);

        let mut usd = tx(1, -150, "dining");
        usd.currency = "USD".to_string();
        let mut chf = tx(2, -500, "dining");
        chf.currency = "CHF".to_string();
        let rows = vec![usd, chf, tx(3, -30, "dining")];

        let evaluation = evaluate_batch(&rows, &limits, &conversion);
        // 75 + 30 crosses; the CHF row is inert
        assert_eq!(flagged_indices(&evaluation), vec![2]);
        assert_eq!(evaluation.accumulator.total("dining"), Decimal::from(105));

        let broken = Conversion::new("EUR", "USD", Decimal::ZERO);
        assert_eq!(broken.to_reference(Decimal::from(10), "USD"), None);
        assert_eq!(broken.to_reference(Decimal::from(10), "eur"), Some(Decimal::from(10)));
    }

    #[test]
    fn test_incremental_true_crossing() {
        let limits = CategoryLimits::new().with("dining", Decimal::from(250), FlagMode::Crossing);
        let existing = vec![tx(1, -120, "dining"), tx(2, -80, "dining")];
        let decision = evaluate_incremental(&tx(3, -60, "dining"), &existing, &limits, &eur());
        assert_eq!(decision, FlagDecision::flag(FlagReason::LimitCrossed { category: "dining".to_string() }));

        // already over: not a crossing any more
        let over = vec![tx(1, -300, "dining")];
        assert!(!evaluate_incremental(&tx(3, -60, "dining"), &over, &limits, &eur()).flagged);
    }

    #[test]
    fn test_incremental_all_after() {
        let limits = CategoryLimits::new().with("dining", Decimal::from(250), FlagMode::AllAfter);
        let over = vec![tx(1, -300, "dining")];
        let decision = evaluate_incremental(&tx(3, -5, "dining"), &over, &limits, &eur());
        assert_eq!(decision.reason, Some(FlagReason::OverLimit { category: "dining".to_string() }));

        let under = vec![tx(1, -100, "dining")];
        assert!(!evaluate_incremental(&tx(3, -5, "dining"), &under, &limits, &eur()).flagged);
    }

    #[test]
    fn test_incremental_never_flags_income() {
        let existing = vec![tx(1, -200, "dining")];
        for mode in [FlagMode::Crossing, FlagMode::AllAfter] {
            let limits = CategoryLimits::new().with("dining", Decimal::from(250), mode);
            assert!(!evaluate_incremental(&tx(3, 600, "dining"), &existing, &limits, &eur()).flagged);
        }
    }

    #[test]
    fn test_incremental_edit_excludes_previous_version() {
        let limits = CategoryLimits::new().with("dining", Decimal::from(250), FlagMode::Crossing);
        let mut stored = tx(1, -200, "dining");
        stored.id = Some("tx-1".to_string());
        let mut edited = stored.clone();
        edited.amount = Decimal::from(-240);

        let decision = evaluate_incremental(&edited, &[stored, tx(2, -5, "dining")], &limits, &eur());
        assert!(!decision.flagged);
    }

    #[test]
    fn test_missing_limit_is_inert() {
        let limits = CategoryLimits::new();
        assert!(!evaluate_incremental(&tx(1, -1000, "dining"), &[], &limits, &eur()).flagged);
        assert!(evaluate_batch(&five_hundreds(), &limits, &eur()).flagged().next().is_none());
        assert!(status(&five_hundreds(), &limits, &eur()).is_empty());
    }

    #[test]
    fn test_huge_amounts_saturate_instead_of_overflowing() {
        let limits = CategoryLimits::new().with("dining", Decimal::from(250), FlagMode::AllAfter);
        let mut rows = vec![tx(1, -1, "dining"), tx(2, -1, "dining"), tx(3, -1, "dining")];
        for row in &mut rows {
            row.amount = Decimal::MIN;
        }

        let evaluation = evaluate_batch(&rows, &limits, &eur());
        assert_eq!(flagged_indices(&evaluation), vec![0, 1, 2]);
        assert_eq!(evaluation.accumulator.total("dining"), Decimal::MAX);

        let result = status(&rows, &limits, &eur());
        assert_eq!(result[0].spent, Decimal::MAX);
        assert_eq!(result[0].state, LimitState::Exceeded);

        let decision = evaluate_incremental(&rows[2], &rows[..2], &limits, &eur());
        assert_eq!(decision.reason, Some(FlagReason::OverLimit { category: "dining".to_string() }));

        // dividing by a tiny rate overflows: the row cannot be converted
        let tiny = Conversion::new("EUR", "USD", Decimal::from_str("0.0001").unwrap());
        assert_eq!(tiny.to_reference(Decimal::MAX, "USD"), None);
        assert_eq!(tiny.to_reference(Decimal::from(1), "USD"), Some(Decimal::from(10000)));
    }

    #[test]
    fn test_limits_from_config() {
        let mut config = BTreeMap::new();
        config.insert(
            "Dining".to_string(),
            CategoryLimitConfig { limit: Decimal::from(250), mode: FlagMode::AllAfter },
        );
        let limits = CategoryLimits::from_config(&config);
        let limit = limits.get("dining").unwrap();
        assert_eq!(limit.category, "Dining");
        assert!(limit.participates());
    }
}
