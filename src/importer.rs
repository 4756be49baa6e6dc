use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::FileFailure;
use crate::models::TransactionDraft;
use crate::normalizer::{CashbookColumns, RowShape, SkippedRow};
use crate::tokenizer::tokenize;
use crate::validator::{HeaderSchema, ValidationVerdict, CASHBOOK_SCHEMA, PENNYWISE_SCHEMA};

// ---------------------------------------------------------------------------
// Import formats: enum dispatch over the supported layouts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportFormat {
    /// Cashbook app export with separate Cash In / Cash Out columns.
    Cashbook,
    /// Pennywise's own flat export with a signed Amount and a Type column.
    Pennywise,
}

impl ImportFormat {
    pub fn key(&self) -> &'static str {
        match self {
            Self::Cashbook => "cashbook",
            Self::Pennywise => "pennywise",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Cashbook => "Cashbook export",
            Self::Pennywise => "Pennywise export",
        }
    }

    pub fn schema(&self) -> &'static HeaderSchema {
        match self {
            Self::Cashbook => &CASHBOOK_SCHEMA,
            Self::Pennywise => &PENNYWISE_SCHEMA,
        }
    }

    /// Guess the layout from a header line. Anything that is not clearly a
    /// self-export goes through the cashbook validator.
    pub fn detect(headers: &[String]) -> Self {
        let has = |name: &str| headers.iter().any(|h| h == name);
        if has("Paid By") && has("Type") && !has("Cash In") {
            Self::Pennywise
        } else {
            Self::Cashbook
        }
    }

    /// Resolve the typed row shape for validated headers.
    pub fn shape(&self, headers: &[String]) -> Option<RowShape> {
        match self {
            Self::Cashbook => CashbookColumns::resolve(headers).map(RowShape::Cashbook),
            Self::Pennywise => Some(RowShape::Pennywise),
        }
    }
}

const ALL_FORMATS: &[ImportFormat] = &[ImportFormat::Cashbook, ImportFormat::Pennywise];

pub fn get_by_key(key: &str) -> Option<ImportFormat> {
    ALL_FORMATS.iter().find(|f| f.key() == key).copied()
}

// ---------------------------------------------------------------------------
// Tokenized table
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRow {
    /// 1-based physical line, so the first data row is line 2.
    pub line: usize,
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTable {
    pub headers: Vec<String>,
    pub rows: Vec<RawRow>,
}

/// Tokenize file content into a header line and data rows. Blank lines are
/// skipped but still advance the line count.
pub fn parse_table(content: &str) -> Result<ParsedTable, FileFailure> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let mut lines = content
        .lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l.trim_end_matches('\r')))
        .filter(|(_, l)| !l.trim().is_empty());

    let (_, header_line) = lines.next().ok_or(FileFailure::Empty)?;
    let headers = tokenize(header_line);
    let rows: Vec<RawRow> = lines
        .map(|(line, text)| RawRow {
            line,
            fields: tokenize(text),
        })
        .collect();

    if rows.is_empty() {
        return Err(FileFailure::Empty);
    }
    Ok(ParsedTable { headers, rows })
}

// ---------------------------------------------------------------------------
// parse_file
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileMetadata {
    pub row_count: usize,
    pub column_count: usize,
    pub size_bytes: usize,
    pub checksum: String,
}

/// Everything learned from one file before any payer is resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFile {
    pub format: ImportFormat,
    pub verdict: ValidationVerdict,
    pub metadata: FileMetadata,
    pub drafts: Vec<TransactionDraft>,
    pub skipped: Vec<SkippedRow>,
}

fn compute_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Tokenize, validate and normalize one file. A file that fails header
/// validation comes back with its verdict and no drafts.
pub fn parse_file(data: &[u8], forced: Option<ImportFormat>) -> Result<ParsedFile, FileFailure> {
    let content = String::from_utf8_lossy(data);
    let table = parse_table(&content)?;
    let format = forced.unwrap_or_else(|| ImportFormat::detect(&table.headers));
    let verdict = format.schema().validate(&table.headers, table.rows.len());
    let metadata = FileMetadata {
        row_count: table.rows.len(),
        column_count: table.headers.len(),
        size_bytes: data.len(),
        checksum: compute_checksum(data),
    };

    let mut drafts = Vec::new();
    let mut skipped = Vec::new();

    if verdict.success {
        let shape = format
            .shape(&table.headers)
            .ok_or_else(|| FileFailure::MissingHeaders(verdict.missing_required_headers.clone()))?;
        for raw in &table.rows {
            match shape.row(&raw.fields).and_then(|row| row.normalize(raw.line)) {
                Ok(draft) => drafts.push(draft),
                Err(reason) => {
                    debug!(line = raw.line, %reason, "skipping row");
                    skipped.push(SkippedRow {
                        line: raw.line,
                        reason,
                    });
                }
            }
        }
    }

    Ok(ParsedFile {
        format,
        verdict,
        metadata,
        drafts,
        skipped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::SkipReason;

    const CASHBOOK: &str = "\
Date,Time,Remark,Category,Mode,Entry By,Cash In,Cash Out,Balance
01/02/2024,09:00,Salary,,Bank,Alice,5000,0,5000
02/02/2024,12:15,\"Lunch, team\",Food,Cash,Bob,0,450,4550
03/02/2024,,Broken,,Cash,Bob,10,10,4550
31/02/2024,,Bad date,,Cash,Bob,0,10,4540
";

    #[test]
    fn test_get_by_key() {
        assert_eq!(get_by_key("cashbook"), Some(ImportFormat::Cashbook));
        assert_eq!(get_by_key("pennywise"), Some(ImportFormat::Pennywise));
        assert_eq!(get_by_key("bofa"), None);
    }

    #[test]
    fn test_detect() {
        let pw: Vec<String> = ["Date", "Description", "Category", "Payment Mode", "Paid By", "Amount", "Type", "Balance"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(ImportFormat::detect(&pw), ImportFormat::Pennywise);
        let cb: Vec<String> = ["Date", "Remark", "Entry By", "Cash In", "Cash Out"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(ImportFormat::detect(&cb), ImportFormat::Cashbook);
    }

    #[test]
    fn test_parse_table_line_numbers_skip_blanks() {
        let table = parse_table("\u{feff}A,B\r\n1,2\r\n\r\n3,4\r\n").unwrap();
        assert_eq!(table.headers, vec!["A", "B"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0].line, 2);
        assert_eq!(table.rows[1].line, 4);
        assert_eq!(table.rows[1].fields, vec!["3", "4"]);
    }

    #[test]
    fn test_parse_table_rejects_empty() {
        assert_eq!(parse_table(""), Err(FileFailure::Empty));
        assert_eq!(parse_table("Date,Remark\n\n"), Err(FileFailure::Empty));
    }

    #[test]
    fn test_parse_cashbook_file() {
        let parsed = parse_file(CASHBOOK.as_bytes(), None).unwrap();
        assert_eq!(parsed.format, ImportFormat::Cashbook);
        assert!(parsed.verdict.success);
        assert_eq!(parsed.verdict.total_rows, 4);
        assert_eq!(parsed.drafts.len(), 2);
        assert_eq!(parsed.drafts[1].note.as_deref(), Some("Lunch, team"));
        assert_eq!(
            parsed.skipped,
            vec![
                SkippedRow { line: 4, reason: SkipReason::AmbiguousAmount },
                SkippedRow { line: 5, reason: SkipReason::InvalidDate },
            ]
        );
        assert_eq!(parsed.metadata.column_count, 9);
        assert_eq!(parsed.metadata.size_bytes, CASHBOOK.len());
        assert_eq!(parsed.metadata.checksum.len(), 64);
    }

    #[test]
    fn test_first_data_row_reports_line_two() {
        let csv = "Date,Remark,Entry By,Cash In,Cash Out\n01/01/2024,x,Alice,5,5\n";
        let parsed = parse_file(csv.as_bytes(), None).unwrap();
        assert_eq!(parsed.skipped[0].line, 2);
    }

    #[test]
    fn test_missing_headers_blocks_rows() {
        let csv = "Date,Remark,Cash In\n01/01/2024,x,5\n";
        let parsed = parse_file(csv.as_bytes(), None).unwrap();
        assert!(!parsed.verdict.success);
        assert_eq!(parsed.verdict.missing_required_headers, vec!["Entry By", "Cash Out"]);
        assert!(parsed.drafts.is_empty());
        assert!(parsed.skipped.is_empty());
    }

    #[test]
    fn test_forced_pennywise_format() {
        let csv = "\
Date,Description,Category,Payment Mode,Paid By,Amount,Type,Balance
2024-01-10,Rent,Housing,Bank,Alice,-15000,EXPENSE,0
2024-01-11,Refund,,,Bob,200,INCOME
";
        let parsed = parse_file(csv.as_bytes(), Some(ImportFormat::Pennywise)).unwrap();
        assert_eq!(parsed.format, ImportFormat::Pennywise);
        assert_eq!(parsed.drafts.len(), 1);
        assert_eq!(parsed.skipped.len(), 1);
        assert_eq!(parsed.skipped[0].line, 3);
    }
}
