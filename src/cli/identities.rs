use colored::Colorize;
use comfy_table::{Cell, Table};

use crate::error::Result;
use crate::mapping::MappingTarget;
use crate::models::Member;
use crate::session::{ImportSession, SessionSnapshot};
use crate::settings::load_settings;

use super::import::{load_files, runtime};
use super::{open_ledger, resolve_format, resolve_group};

pub fn run(files: &[String], group: Option<&str>, format: Option<&str>) -> Result<()> {
    let settings = load_settings();
    let forced = resolve_format(format, &settings)?;
    let conn = open_ledger()?;
    let (group, members) = resolve_group(&conn, group, &settings)?;

    let mut session = ImportSession::new(group.id, members.clone())
        .with_format(forced)
        .allow_ignored(settings.allow_ignored_identities);
    runtime()?.block_on(load_files(&mut session, files))?;

    println!("Payers found for {}", group.name);
    println!("{}", format_identities(&session.snapshot(), &members));
    Ok(())
}

pub fn format_identities(snapshot: &SessionSnapshot, members: &[Member]) -> String {
    let mut table = Table::new();
    table.set_header(vec!["Identity", "Suggested", "Member"]);
    for identity in &snapshot.identities {
        let (suggested, member) = match snapshot.mapping.get(identity) {
            Some(MappingTarget::User(id)) => {
                let name = members
                    .iter()
                    .find(|m| m.user_id == id)
                    .map(|m| m.full_name.clone())
                    .unwrap_or_default();
                (id.to_string().green(), name)
            }
            Some(MappingTarget::Ignore) | None => ("ignore".yellow(), String::new()),
        };
        table.add_row(vec![Cell::new(identity), Cell::new(suggested), Cell::new(member)]);
    }

    let mut out = table.to_string();
    for file in snapshot.files.iter().filter(|f| f.error.is_some()) {
        let error = file.error.as_deref().unwrap_or_default();
        out.push_str(&format!("\n{}", format!("{}: {error}", file.name).red()));
    }
    if !snapshot.unmapped.is_empty() {
        out.push_str(&format!(
            "\n{} of {} payers need a member. Pass --map IDENTITY=USER_ID when importing.",
            snapshot.unmapped.len(),
            snapshot.identities.len()
        ));
    }
    out
}
