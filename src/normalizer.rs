use std::fmt;
use std::sync::OnceLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::models::{TransactionDraft, TransactionKind};

// ---------------------------------------------------------------------------
// Skip reasons
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    AmbiguousAmount,
    InvalidAmount,
    InvalidDate,
    InvalidTime,
    InvalidType,
    MissingField(&'static str),
    MissingPayer,
    MalformedRow { expected: usize, found: usize },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AmbiguousAmount => write!(f, "ambiguous amount"),
            Self::InvalidAmount => write!(f, "invalid amount"),
            Self::InvalidDate => write!(f, "invalid date"),
            Self::InvalidTime => write!(f, "invalid time"),
            Self::InvalidType => write!(f, "invalid type"),
            Self::MissingField(name) => write!(f, "missing field: {name}"),
            Self::MissingPayer => write!(f, "missing payer"),
            Self::MalformedRow { expected, found } => {
                write!(f, "malformed row: expected {expected} fields, found {found}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedRow {
    pub line: usize,
    pub reason: SkipReason,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Parse a cash column. `(x)` is negative; `,`, `$` and quotes are dropped.
pub fn parse_amount(raw: &str) -> Option<Decimal> {
    let s = raw.replace([',', '"', '$'], "");
    let s = s.trim();
    if let Some(inner) = s.strip_prefix('(').and_then(|v| v.strip_suffix(')')) {
        return inner.trim().parse::<Decimal>().ok().map(|d| -d);
    }
    s.parse().ok()
}

/// Parse a signed amount keeping only digits, `.` and `-`.
pub fn parse_signed_amount(raw: &str) -> Option<Decimal> {
    static NON_NUMERIC: OnceLock<Regex> = OnceLock::new();
    let re = NON_NUMERIC.get_or_init(|| Regex::new(r"[^0-9.\-]").expect("static regex"));
    let cleaned = re.replace_all(raw, "");
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse().ok()
}

/// Day-first `DD/MM/YYYY`; ISO `YYYY-MM-DD` only when there is no slash.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.contains('/') {
        let parts: Vec<&str> = raw.split('/').collect();
        if parts.len() != 3 {
            return None;
        }
        let d: u32 = parts[0].trim().parse().ok()?;
        let m: u32 = parts[1].trim().parse().ok()?;
        let y: i32 = parts[2].trim().parse().ok()?;
        return NaiveDate::from_ymd_opt(y, m, d);
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()
}

/// Leading ASCII digits of `raw`, or `None` when it does not start with one.
fn leading_number(raw: &str) -> Option<u32> {
    let raw = raw.trim_start();
    let end = raw.find(|c: char| !c.is_ascii_digit()).unwrap_or(raw.len());
    raw[..end].parse().ok()
}

/// Apply an `H:MM` time to a date. Only the leading digits of the hour and
/// minute are read, so seconds and trailing text are ignored; an `AM`/`PM`
/// suffix switches to 12-hour reading. A value without a colon leaves the
/// date at midnight.
pub fn apply_time(date: NaiveDate, raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    let Some((hour, rest)) = raw.split_once(':') else {
        return date.and_hms_opt(0, 0, 0);
    };
    let mut h = leading_number(hour)?;
    let m = leading_number(rest)?;

    let upper = raw.to_ascii_uppercase();
    if upper.ends_with("PM") {
        if h < 12 {
            h += 12;
        }
    } else if upper.ends_with("AM") && h == 12 {
        h = 0;
    }
    date.and_hms_opt(h, m, 0)
}

/// Compose a date and optional time column into a UTC instant. Source
/// files carry no timezone, so the wall-clock time is taken as UTC.
pub fn compose_timestamp(date: &str, time: &str) -> Result<DateTime<Utc>, SkipReason> {
    let date = parse_date(date).ok_or(SkipReason::InvalidDate)?;
    let at = apply_time(date, time).ok_or(SkipReason::InvalidTime)?;
    Ok(at.and_utc())
}

fn non_empty(raw: &str) -> Option<String> {
    let s = raw.trim();
    (!s.is_empty()).then(|| s.to_string())
}

// ---------------------------------------------------------------------------
// Row shapes, resolved once per file from its headers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CashbookColumns {
    width: usize,
    date: usize,
    remark: usize,
    entry_by: usize,
    cash_in: usize,
    cash_out: usize,
    time: Option<usize>,
    category: Option<usize>,
    mode: Option<usize>,
}

impl CashbookColumns {
    /// `None` unless every required column is present.
    pub fn resolve(headers: &[String]) -> Option<Self> {
        let find = |name: &str| headers.iter().position(|h| h == name);
        Some(Self {
            width: headers.len(),
            date: find("Date")?,
            remark: find("Remark")?,
            entry_by: find("Entry By")?,
            cash_in: find("Cash In")?,
            cash_out: find("Cash Out")?,
            time: find("Time"),
            category: find("Category"),
            mode: find("Mode"),
        })
    }
}

/// Minimum raw field count of a self-export row (the trailing balance
/// column is required but unused).
pub const PENNYWISE_MIN_FIELDS: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowShape {
    Cashbook(CashbookColumns),
    Pennywise,
}

impl RowShape {
    pub fn row<'a>(&self, fields: &'a [String]) -> Result<SourceRow<'a>, SkipReason> {
        let opt = |idx: Option<usize>| idx.map_or("", |i| fields[i].as_str());
        match self {
            Self::Cashbook(cols) => {
                if fields.len() != cols.width {
                    return Err(SkipReason::MalformedRow {
                        expected: cols.width,
                        found: fields.len(),
                    });
                }
                Ok(SourceRow::Cashbook(CashbookRow {
                    date: &fields[cols.date],
                    time: opt(cols.time),
                    remark: &fields[cols.remark],
                    category: opt(cols.category),
                    mode: opt(cols.mode),
                    entry_by: &fields[cols.entry_by],
                    cash_in: &fields[cols.cash_in],
                    cash_out: &fields[cols.cash_out],
                }))
            }
            Self::Pennywise => {
                if fields.len() < PENNYWISE_MIN_FIELDS {
                    return Err(SkipReason::MalformedRow {
                        expected: PENNYWISE_MIN_FIELDS,
                        found: fields.len(),
                    });
                }
                Ok(SourceRow::Pennywise(PennywiseRow {
                    date: &fields[0],
                    description: &fields[1],
                    category: &fields[2],
                    payment_mode: &fields[3],
                    paid_by: &fields[4],
                    amount: &fields[5],
                    kind: &fields[6],
                }))
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CashbookRow<'a> {
    pub date: &'a str,
    pub time: &'a str,
    pub remark: &'a str,
    pub category: &'a str,
    pub mode: &'a str,
    pub entry_by: &'a str,
    pub cash_in: &'a str,
    pub cash_out: &'a str,
}

#[derive(Debug, Clone, Copy)]
pub struct PennywiseRow<'a> {
    pub date: &'a str,
    pub description: &'a str,
    pub category: &'a str,
    pub payment_mode: &'a str,
    pub paid_by: &'a str,
    pub amount: &'a str,
    pub kind: &'a str,
}

#[derive(Debug, Clone, Copy)]
pub enum SourceRow<'a> {
    Cashbook(CashbookRow<'a>),
    Pennywise(PennywiseRow<'a>),
}

impl SourceRow<'_> {
    pub fn normalize(&self, line: usize) -> Result<TransactionDraft, SkipReason> {
        match self {
            Self::Cashbook(row) => normalize_cashbook(row, line),
            Self::Pennywise(row) => normalize_pennywise(row, line),
        }
    }
}

// ---------------------------------------------------------------------------
// Cashbook export
// ---------------------------------------------------------------------------

fn normalize_cashbook(row: &CashbookRow<'_>, line: usize) -> Result<TransactionDraft, SkipReason> {
    let occurred_at = compose_timestamp(row.date, row.time)?;

    // Blank or unreadable cash cells count as zero.
    let cash_in = parse_amount(row.cash_in).unwrap_or(Decimal::ZERO);
    let cash_out = parse_amount(row.cash_out).unwrap_or(Decimal::ZERO);
    let (amount, kind) = if cash_in > Decimal::ZERO && cash_out.is_zero() {
        (cash_in, TransactionKind::Income)
    } else if cash_out > Decimal::ZERO && cash_in.is_zero() {
        (cash_out, TransactionKind::Expense)
    } else {
        return Err(SkipReason::AmbiguousAmount);
    };

    let payer = non_empty(row.entry_by).ok_or(SkipReason::MissingPayer)?;

    Ok(TransactionDraft {
        line,
        amount,
        kind,
        occurred_at,
        note: non_empty(row.remark),
        category: non_empty(row.category),
        payment_mode: non_empty(row.mode),
        payer: Some(payer),
    })
}

// ---------------------------------------------------------------------------
// Pennywise self-export
// ---------------------------------------------------------------------------

fn normalize_pennywise(row: &PennywiseRow<'_>, line: usize) -> Result<TransactionDraft, SkipReason> {
    if row.date.trim().is_empty() {
        return Err(SkipReason::MissingField("Date"));
    }
    if row.description.trim().is_empty() {
        return Err(SkipReason::MissingField("Description"));
    }
    if row.amount.trim().is_empty() {
        return Err(SkipReason::MissingField("Amount"));
    }

    // The exported date may carry its time after a space or a `T`.
    let date_field = row.date.trim();
    let (date, time) = date_field
        .split_once(['T', ' '])
        .unwrap_or((date_field, ""));
    let occurred_at = compose_timestamp(date, time)?;

    let amount = parse_signed_amount(row.amount)
        .ok_or(SkipReason::InvalidAmount)?
        .abs();

    let kind = if row.kind.trim().is_empty() {
        TransactionKind::Expense
    } else {
        TransactionKind::parse(row.kind).ok_or(SkipReason::InvalidType)?
    };

    Ok(TransactionDraft {
        line,
        amount,
        kind,
        occurred_at,
        note: non_empty(row.description),
        category: non_empty(row.category),
        payment_mode: non_empty(row.payment_mode),
        payer: non_empty(row.paid_by),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn cashbook<'a>(cash_in: &'a str, cash_out: &'a str) -> CashbookRow<'a> {
        CashbookRow {
            date: "01/02/2024",
            time: "09:30",
            remark: "Groceries",
            category: "",
            mode: "Cash",
            entry_by: "Alice",
            cash_in,
            cash_out,
        }
    }

    fn strings(fields: &[&str]) -> Vec<String> {
        fields.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("1,234.56"), Some(dec("1234.56")));
        assert_eq!(parse_amount("$50"), Some(dec("50")));
        assert_eq!(parse_amount("(20.00)"), Some(dec("-20.00")));
        assert_eq!(parse_amount(""), None);
        assert_eq!(parse_amount("abc"), None);
    }

    #[test]
    fn test_parse_signed_amount() {
        assert_eq!(parse_signed_amount("-1,200.50"), Some(dec("-1200.50")));
        assert_eq!(parse_signed_amount("₹ 300"), Some(dec("300")));
        assert_eq!(parse_signed_amount("n/a"), None);
    }

    #[test]
    fn test_date_is_day_first() {
        let d = parse_date("01/02/2024").unwrap();
        assert_eq!((d.year(), d.month(), d.day()), (2024, 2, 1));
    }

    #[test]
    fn test_date_iso_fallback() {
        assert_eq!(parse_date("2024-03-15"), NaiveDate::from_ymd_opt(2024, 3, 15));
    }

    #[test]
    fn test_invalid_dates() {
        assert_eq!(parse_date("31/02/2024"), None);
        assert_eq!(parse_date("2024/03"), None);
        assert_eq!(parse_date("13-01-2024"), None);
        assert_eq!(parse_date(""), None);
    }

    #[test]
    fn test_compose_timestamp_applies_time() {
        let ts = compose_timestamp("15/01/2024", "14:05").unwrap();
        assert_eq!((ts.hour(), ts.minute(), ts.second()), (14, 5, 0));
        assert_eq!(ts.to_rfc3339(), "2024-01-15T14:05:00+00:00");
    }

    #[test]
    fn test_compose_timestamp_ignores_seconds_and_blank_time() {
        let ts = compose_timestamp("2024-01-15", "08:10:59").unwrap();
        assert_eq!((ts.hour(), ts.minute(), ts.second()), (8, 10, 0));
        let midnight = compose_timestamp("2024-01-15", "").unwrap();
        assert_eq!(midnight.hour(), 0);
    }

    #[test]
    fn test_compose_timestamp_reads_twelve_hour_times() {
        let pm = compose_timestamp("01/01/2024", "09:30 PM").unwrap();
        assert_eq!((pm.hour(), pm.minute()), (21, 30));
        let after_midnight = compose_timestamp("01/01/2024", "12:05 AM").unwrap();
        assert_eq!((after_midnight.hour(), after_midnight.minute()), (0, 5));
        let noon = compose_timestamp("01/01/2024", "12:15 pm").unwrap();
        assert_eq!((noon.hour(), noon.minute()), (12, 15));
        let morning = compose_timestamp("01/01/2024", "9:05AM").unwrap();
        assert_eq!((morning.hour(), morning.minute()), (9, 5));
    }

    #[test]
    fn test_cashbook_row_with_pm_time_is_kept() {
        let mut row = cashbook("0", "5");
        row.time = "09:30 PM";
        let draft = normalize_cashbook(&row, 2).unwrap();
        assert_eq!(draft.occurred_at.to_rfc3339(), "2024-02-01T21:30:00+00:00");
    }

    #[test]
    fn test_compose_timestamp_rejects_bad_time() {
        assert_eq!(compose_timestamp("2024-01-15", "25:00"), Err(SkipReason::InvalidTime));
        assert_eq!(compose_timestamp("2024-01-15", "ab:cd"), Err(SkipReason::InvalidTime));
        assert_eq!(compose_timestamp("2024-01-15", "10:"), Err(SkipReason::InvalidTime));
        assert_eq!(compose_timestamp("nope", "10:00"), Err(SkipReason::InvalidDate));
    }

    #[test]
    fn test_cashbook_income_and_expense() {
        let income = normalize_cashbook(&cashbook("250", "0"), 2).unwrap();
        assert_eq!(income.kind, TransactionKind::Income);
        assert_eq!(income.amount, dec("250"));
        assert_eq!(income.line, 2);

        let expense = normalize_cashbook(&cashbook("", "99.5"), 3).unwrap();
        assert_eq!(expense.kind, TransactionKind::Expense);
        assert_eq!(expense.amount, dec("99.5"));
        assert_eq!(expense.payer.as_deref(), Some("Alice"));
        assert_eq!(expense.payment_mode.as_deref(), Some("Cash"));
    }

    #[test]
    fn test_cashbook_ambiguous_amounts() {
        assert_eq!(normalize_cashbook(&cashbook("10", "5"), 2), Err(SkipReason::AmbiguousAmount));
        assert_eq!(normalize_cashbook(&cashbook("0", "0"), 2), Err(SkipReason::AmbiguousAmount));
        assert_eq!(normalize_cashbook(&cashbook("", ""), 2), Err(SkipReason::AmbiguousAmount));
        assert_eq!(normalize_cashbook(&cashbook("-5", "10"), 2), Err(SkipReason::AmbiguousAmount));
    }

    #[test]
    fn test_cashbook_missing_category_is_fine() {
        let draft = normalize_cashbook(&cashbook("10", ""), 2).unwrap();
        assert_eq!(draft.category, None);
    }

    #[test]
    fn test_cashbook_requires_payer() {
        let mut row = cashbook("10", "");
        row.entry_by = "  ";
        assert_eq!(normalize_cashbook(&row, 2), Err(SkipReason::MissingPayer));
    }

    #[test]
    fn test_cashbook_shape_rejects_short_rows() {
        let headers = strings(&["Date", "Remark", "Entry By", "Cash In", "Cash Out"]);
        let shape = RowShape::Cashbook(CashbookColumns::resolve(&headers).unwrap());
        let short = strings(&["01/01/2024", "x", "Bob", "5"]);
        assert_eq!(
            shape.row(&short).unwrap_err(),
            SkipReason::MalformedRow { expected: 5, found: 4 }
        );
    }

    #[test]
    fn test_cashbook_columns_follow_header_order() {
        let headers = strings(&["Cash Out", "Cash In", "Entry By", "Remark", "Date", "Category"]);
        let shape = RowShape::Cashbook(CashbookColumns::resolve(&headers).unwrap());
        let fields = strings(&["0", "40", "Bob", "Salary", "2024-05-01", "Work"]);
        let draft = shape.row(&fields).unwrap().normalize(2).unwrap();
        assert_eq!(draft.kind, TransactionKind::Income);
        assert_eq!(draft.amount, dec("40"));
        assert_eq!(draft.category.as_deref(), Some("Work"));
        assert_eq!(draft.note.as_deref(), Some("Salary"));
    }

    #[test]
    fn test_pennywise_row() {
        let fields = strings(&[
            "2024-01-15 10:30", "Dinner", "Food", "UPI", "Bob", "-1,200.00", "expense", "0",
        ]);
        let draft = RowShape::Pennywise.row(&fields).unwrap().normalize(4).unwrap();
        assert_eq!(draft.amount, dec("1200.00"));
        assert_eq!(draft.kind, TransactionKind::Expense);
        assert_eq!(draft.occurred_at.hour(), 10);
        assert_eq!(draft.payer.as_deref(), Some("Bob"));
        assert_eq!(draft.line, 4);
    }

    #[test]
    fn test_pennywise_defaults_and_skips() {
        let no_type = strings(&["01/03/2024", "Rent", "", "", "", "500", "", ""]);
        let draft = RowShape::Pennywise.row(&no_type).unwrap().normalize(2).unwrap();
        assert_eq!(draft.kind, TransactionKind::Expense);
        assert_eq!(draft.payer, None);
        assert_eq!(draft.category, None);

        let short = strings(&["01/03/2024", "Rent", "", "", "", "500", "INCOME"]);
        assert!(matches!(
            RowShape::Pennywise.row(&short),
            Err(SkipReason::MalformedRow { expected: 8, found: 7 })
        ));

        let bad_type = strings(&["01/03/2024", "Rent", "", "", "", "500", "REFUND", ""]);
        assert_eq!(
            RowShape::Pennywise.row(&bad_type).unwrap().normalize(2),
            Err(SkipReason::InvalidType)
        );

        let no_desc = strings(&["01/03/2024", "", "", "", "", "500", "INCOME", ""]);
        assert_eq!(
            RowShape::Pennywise.row(&no_desc).unwrap().normalize(2),
            Err(SkipReason::MissingField("Description"))
        );
    }
}
