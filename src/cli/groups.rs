use comfy_table::{Cell, Table};

use crate::db::{add_group, list_groups};
use crate::error::Result;

use super::open_ledger;

pub fn add(name: &str) -> Result<()> {
    let conn = open_ledger()?;
    let id = add_group(&conn, name)?;
    println!("Added group: {name} (id {id})");
    Ok(())
}

pub fn list() -> Result<()> {
    let conn = open_ledger()?;
    let groups = list_groups(&conn)?;

    let mut table = Table::new();
    table.set_header(vec!["ID", "Name"]);
    for group in groups {
        table.add_row(vec![Cell::new(group.id), Cell::new(group.name)]);
    }
    println!("Groups\n{table}");
    Ok(())
}
