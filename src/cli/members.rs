use std::path::Path;

use comfy_table::{Cell, Table};
use rusqlite::Connection;
use serde::Deserialize;
use tracing::debug;

use crate::db::{add_member, find_group, list_members};
use crate::error::Result;
use crate::models::GroupId;

use super::open_ledger;

#[derive(Debug, Deserialize)]
struct RosterRow {
    full_name: String,
    #[serde(default)]
    email: Option<String>,
}

pub fn add(group: &str, full_name: &str, email: Option<&str>) -> Result<()> {
    let conn = open_ledger()?;
    let group = find_group(&conn, group)?;
    let id = add_member(&conn, group.id, full_name, email)?;
    println!("Added {full_name} to {} (user id {id})", group.name);
    Ok(())
}

pub fn list(group: &str) -> Result<()> {
    let conn = open_ledger()?;
    let group = find_group(&conn, group)?;
    let members = list_members(&conn, group.id)?;

    let mut table = Table::new();
    table.set_header(vec!["User ID", "Name", "Email"]);
    for m in members {
        table.add_row(vec![
            Cell::new(m.user_id),
            Cell::new(m.full_name),
            Cell::new(m.email.unwrap_or_default()),
        ]);
    }
    println!("Members of {}\n{table}", group.name);
    Ok(())
}

pub fn import(group: &str, file: &str) -> Result<()> {
    let conn = open_ledger()?;
    let group = find_group(&conn, group)?;
    let added = import_roster(&conn, group.id, Path::new(file))?;
    println!("{added} members added to {}", group.name);
    Ok(())
}

/// Add every row of a `full_name,email` roster. Rows with a blank name are
/// skipped; a blank email is stored as unset.
fn import_roster(conn: &Connection, group_id: GroupId, path: &Path) -> Result<usize> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)?;
    let mut added = 0;
    for row in reader.deserialize::<RosterRow>() {
        let row = row?;
        if row.full_name.is_empty() {
            continue;
        }
        let email = row.email.as_deref().filter(|e| !e.is_empty());
        add_member(conn, group_id, &row.full_name, email)?;
        added += 1;
    }
    debug!(group_id, added, "roster imported");
    Ok(added)
}
