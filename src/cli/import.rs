use std::future::Future;
use std::io::Read;
use std::path::{Path, PathBuf};

use colored::Colorize;
use comfy_table::{Cell, Table};
use tracing::debug;

use crate::error::{PennywiseError, Result};
use crate::mapping::MappingTarget;
use crate::models::Member;
use crate::session::{load_all, FileSource, ImportSession, SessionResult};
use crate::settings::load_settings;
use crate::submit::LedgerSubmitter;

use super::{open_ledger, resolve_format, resolve_group};

pub(crate) fn runtime() -> Result<tokio::runtime::Runtime> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    Ok(rt)
}

pub(crate) fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

/// Add every path to the session and wait for all of them to load. `-`
/// reads one file from stdin. Ctrl-C while loading clears the session.
pub(crate) async fn load_files(session: &mut ImportSession, files: &[String]) -> Result<()> {
    load_files_until(session, files, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await
}

async fn load_files_until(
    session: &mut ImportSession,
    files: &[String],
    interrupt: impl Future<Output = ()>,
) -> Result<()> {
    for file in files {
        if file == "-" {
            let mut bytes = Vec::new();
            std::io::stdin().read_to_end(&mut bytes)?;
            session.add_file("stdin", FileSource::Bytes(bytes));
            continue;
        }
        let path = PathBuf::from(file);
        session.add_file(display_name(&path), FileSource::Path(path));
    }
    let tickets = session.begin_validation();
    tokio::select! {
        biased;
        _ = interrupt => {
            session.clear();
            Err(PennywiseError::Other("Import cancelled".into()))
        }
        loaded = load_all(tickets) => {
            for file in loaded {
                session.apply(file);
            }
            Ok(())
        }
    }
}

/// Parse `IDENTITY=USER_ID` (or `IDENTITY=ignore`). The last `=` splits, so
/// identities may contain one.
pub fn parse_override(raw: &str, members: &[Member]) -> Result<(String, MappingTarget)> {
    let invalid = || PennywiseError::InvalidMapping(raw.to_string());
    let (identity, target) = raw.rsplit_once('=').ok_or_else(invalid)?;
    let identity = identity.trim();
    if identity.is_empty() {
        return Err(invalid());
    }
    let target: MappingTarget = target.parse().map_err(|_| invalid())?;
    if let MappingTarget::User(id) = target {
        if !members.iter().any(|m| m.user_id == id) {
            return Err(PennywiseError::Other(format!(
                "User {id} is not a member of this group"
            )));
        }
    }
    Ok((identity.to_string(), target))
}

pub fn run(
    files: &[String],
    group: Option<&str>,
    format: Option<&str>,
    map: &[String],
    ignore: &[String],
    allow_ignored: bool,
    json: bool,
) -> Result<()> {
    let settings = load_settings();
    let forced = resolve_format(format, &settings)?;
    let conn = open_ledger()?;
    let (group, members) = resolve_group(&conn, group, &settings)?;

    let mut overrides = Vec::new();
    for raw in map {
        overrides.push(parse_override(raw, &members)?);
    }
    overrides.extend(ignore.iter().map(|id| (id.clone(), MappingTarget::Ignore)));

    let mut session = ImportSession::new(group.id, members)
        .with_format(forced)
        .allow_ignored(allow_ignored || settings.allow_ignored_identities);
    let submitter = LedgerSubmitter::new(conn);

    let result = runtime()?.block_on(async {
        load_files(&mut session, files).await?;
        for (identity, target) in overrides {
            session.set_mapping(identity, target);
        }
        debug!(state = %session.state(), "submitting session");
        session.submit(&submitter).await
    })?;

    for event in session.events() {
        debug!(?event, "session event");
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&session.snapshot())?);
    } else {
        println!("Importing into {}", group.name);
        println!("{}", format_result(&result));
    }
    Ok(())
}

pub fn format_result(result: &SessionResult) -> String {
    let mut table = Table::new();
    table.set_header(vec!["File", "Status", "Imported", "Skipped lines", "Error"]);
    for file in &result.files {
        let status = if file.success { "imported".green() } else { "failed".red() };
        let skipped: Vec<String> = file.skipped_rows.iter().map(|l| l.to_string()).collect();
        table.add_row(vec![
            Cell::new(&file.file_name),
            Cell::new(status),
            Cell::new(file.imported_count),
            Cell::new(skipped.join(", ")),
            Cell::new(file.errors.join("; ")),
        ]);
    }

    let summary = format!(
        "{} transactions imported from {} file(s)",
        result.total_imported, result.total_files
    );
    let summary = if result.success {
        summary.green().bold()
    } else {
        summary.red().bold()
    };
    let mut out = format!("Import Results\n{table}\n{summary}");
    for error in &result.errors {
        out.push_str(&format!("\n  {}", error.red()));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{add_group, add_member, get_connection, init_db, list_members};
    use crate::session::{ImportState, SessionEvent};

    fn members() -> Vec<Member> {
        vec![Member { user_id: 4, full_name: "Alice".into(), email: None }]
    }

    #[test]
    fn test_parse_override() {
        let m = members();
        assert_eq!(parse_override("Ali=4", &m).unwrap(), ("Ali".to_string(), MappingTarget::User(4)));
        assert_eq!(parse_override("a=b=ignore", &m).unwrap(), ("a=b".to_string(), MappingTarget::Ignore));
        assert!(matches!(parse_override("Ali", &m), Err(PennywiseError::InvalidMapping(_))));
        assert!(matches!(parse_override("=4", &m), Err(PennywiseError::InvalidMapping(_))));
        assert!(matches!(parse_override("Ali=x", &m), Err(PennywiseError::InvalidMapping(_))));
        assert!(matches!(parse_override("Ali=9", &m), Err(PennywiseError::Other(_))));
    }

    #[tokio::test]
    async fn test_interrupt_clears_the_session() {
        let dir = tempfile::tempdir().unwrap();
        let book = dir.path().join("book.csv");
        std::fs::write(&book, "Date,Remark,Entry By,Cash In,Cash Out\n01/01/2024,Tea,Alice,0,4\n").unwrap();
        let files = vec![book.to_string_lossy().to_string()];

        let mut session = ImportSession::new(1, members());
        let err = load_files_until(&mut session, &files, std::future::ready(())).await.unwrap_err();
        assert!(matches!(err, PennywiseError::Other(ref m) if m == "Import cancelled"));
        assert_eq!(session.state(), ImportState::Idle);
        assert!(session.snapshot().files.is_empty());
        assert!(session.events().iter().any(|e| matches!(e, SessionEvent::SessionCleared { .. })));
    }

    #[tokio::test]
    async fn test_session_into_ledger_and_report() {
        colored::control::set_override(false);
        let dir = tempfile::tempdir().unwrap();
        let conn = get_connection(&dir.path().join("test.db")).unwrap();
        init_db(&conn).unwrap();
        let group = add_group(&conn, "Home").unwrap();
        add_member(&conn, group, "Alice", None).unwrap();
        let members = list_members(&conn, group).unwrap();

        let good = dir.path().join("good.csv");
        std::fs::write(
            &good,
            "Date,Remark,Entry By,Cash In,Cash Out\n01/01/2024,Tea,Alice,0,4\n02/01/2024,?,Alice,1,1\n",
        )
        .unwrap();
        let files = vec![good.to_string_lossy().to_string(), "/no/such/missing.csv".to_string()];

        let mut session = ImportSession::new(group, members);
        load_files(&mut session, &files).await.unwrap();
        let submitter = LedgerSubmitter::new(conn);
        let result = session.submit(&submitter).await.unwrap();

        assert_eq!(result.total_imported, 1);
        assert_eq!(result.total_files, 2);
        let out = format_result(&result);
        assert!(out.contains("good.csv"));
        assert!(out.contains("imported"));
        assert!(out.contains("1 transactions imported from 2 file(s)"));
        assert!(out.contains("missing.csv: Failed to read file"));
    }
}
