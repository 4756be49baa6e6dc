use std::path::Path;

use colored::Colorize;
use comfy_table::{Cell, Table};
use rust_decimal::Decimal;

use crate::error::{FileFailure, Result};
use crate::fmt::money;
use crate::importer::{parse_file, ImportFormat, ParsedFile};
use crate::models::TransactionKind;
use crate::settings::load_settings;

use super::import::display_name;
use super::resolve_format;

/// Outcome of checking one file on disk.
pub struct FileCheck {
    pub name: String,
    pub outcome: std::result::Result<ParsedFile, FileFailure>,
}

pub fn run(files: &[String], format: Option<&str>) -> Result<()> {
    let forced = resolve_format(format, &load_settings())?;
    let checks: Vec<FileCheck> = files.iter().map(|f| check_file(Path::new(f), forced)).collect();
    println!("{}", format_checks(&checks));
    Ok(())
}

pub fn check_file(path: &Path, forced: Option<ImportFormat>) -> FileCheck {
    let name = display_name(path);
    let outcome = std::fs::read(path)
        .map_err(|e| FileFailure::Unreadable(e.to_string()))
        .and_then(|bytes| parse_file(&bytes, forced));
    FileCheck { name, outcome }
}

fn totals(parsed: &ParsedFile) -> (Decimal, Decimal) {
    parsed.drafts.iter().fold((Decimal::ZERO, Decimal::ZERO), |(inc, exp), d| match d.kind {
        TransactionKind::Income => (inc + d.amount, exp),
        TransactionKind::Expense => (inc, exp + d.amount),
    })
}

pub fn format_checks(checks: &[FileCheck]) -> String {
    let mut table = Table::new();
    table.set_header(vec!["File", "Format", "Rows", "Valid", "Skipped", "Income", "Expense", "Status"]);
    let mut skip_lines = Vec::new();

    for check in checks {
        match &check.outcome {
            Err(failure) => {
                table.add_row(vec![
                    Cell::new(&check.name),
                    Cell::new(""),
                    Cell::new(""),
                    Cell::new(""),
                    Cell::new(""),
                    Cell::new(""),
                    Cell::new(""),
                    Cell::new(failure.to_string().red()),
                ]);
            }
            Ok(parsed) => {
                let (income, expense) = totals(parsed);
                let status = if parsed.verdict.success {
                    parsed.verdict.message().green()
                } else {
                    parsed.verdict.message().red()
                };
                table.add_row(vec![
                    Cell::new(&check.name),
                    Cell::new(parsed.format.name()),
                    Cell::new(parsed.verdict.total_rows),
                    Cell::new(parsed.drafts.len()),
                    Cell::new(parsed.skipped.len()),
                    Cell::new(money(income)),
                    Cell::new(money(expense)),
                    Cell::new(status),
                ]);
                for skip in &parsed.skipped {
                    skip_lines.push(format!("  {} line {}: {}", check.name, skip.line, skip.reason));
                }
            }
        }
    }

    let mut out = format!("Validation\n{table}");
    if !skip_lines.is_empty() {
        out.push_str("\n\nSkipped rows\n");
        out.push_str(&skip_lines.join("\n"));
    }
    out
}
