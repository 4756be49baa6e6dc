pub mod groups;
pub mod identities;
pub mod import;
pub mod init;
pub mod members;
pub mod validate;

use clap::{Parser, Subcommand};
use rusqlite::Connection;

use crate::db::{find_group, get_connection, list_members};
use crate::error::{PennywiseError, Result};
use crate::importer::{get_by_key, ImportFormat};
use crate::models::{Group, Member};
use crate::settings::{ledger_path, Settings};

/// Open the ledger, refusing to create one outside `pennywise init`.
pub(crate) fn open_ledger() -> Result<Connection> {
    let path = ledger_path();
    if !path.exists() {
        return Err(PennywiseError::Settings(format!(
            "No ledger found at {}\nRun `pennywise init` to create one.",
            path.display()
        )));
    }
    get_connection(&path)
}

/// `--format` wins over the configured default; neither means per-file detection.
pub(crate) fn resolve_format(flag: Option<&str>, settings: &Settings) -> Result<Option<ImportFormat>> {
    match flag.or(settings.default_format.as_deref()) {
        None => Ok(None),
        Some(key) => get_by_key(key)
            .map(Some)
            .ok_or_else(|| PennywiseError::UnknownFormat(key.to_string())),
    }
}

pub(crate) fn resolve_group(conn: &Connection, flag: Option<&str>, settings: &Settings) -> Result<(Group, Vec<Member>)> {
    let key = flag.or(settings.default_group.as_deref()).ok_or_else(|| {
        PennywiseError::Settings("No group given. Pass --group or set default_group in settings.".to_string())
    })?;
    let group = find_group(conn, key)?;
    let members = list_members(conn, group.id)?;
    Ok((group, members))
}

#[derive(Parser)]
#[command(
    name = "pennywise",
    version,
    about = "Import cashbook CSV exports into a shared expense ledger."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Set up Pennywise: choose a data directory and initialize the ledger.
    Init {
        /// Path for Pennywise data (default: ~/Documents/pennywise)
        #[arg(long = "data-dir")]
        data_dir: Option<String>,
    },
    /// Manage groups.
    Groups {
        #[command(subcommand)]
        command: GroupsCommands,
    },
    /// Manage the members of a group.
    Members {
        #[command(subcommand)]
        command: MembersCommands,
    },
    /// Check CSV files against their format without importing anything.
    Validate {
        /// CSV files to check
        #[arg(required = true)]
        files: Vec<String>,
        /// Format key (cashbook, pennywise); detected per file when omitted
        #[arg(long)]
        format: Option<String>,
    },
    /// List the payer identities found in CSV files and their suggested members.
    Identities {
        /// CSV files to scan
        #[arg(required = true)]
        files: Vec<String>,
        /// Group name or id
        #[arg(long)]
        group: Option<String>,
        #[arg(long)]
        format: Option<String>,
    },
    /// Import CSV files into a group's ledger.
    Import {
        /// CSV files to import (`-` reads one file from stdin)
        #[arg(required = true)]
        files: Vec<String>,
        /// Group name or id
        #[arg(long)]
        group: Option<String>,
        /// Format key (cashbook, pennywise); detected per file when omitted
        #[arg(long)]
        format: Option<String>,
        /// Map a payer identity to a member: IDENTITY=USER_ID
        #[arg(long = "map", value_name = "IDENTITY=USER_ID")]
        map: Vec<String>,
        /// Leave a payer identity's rows out of the import
        #[arg(long = "ignore", value_name = "IDENTITY")]
        ignore: Vec<String>,
        /// Accept identities mapped to ignore instead of refusing to import
        #[arg(long = "allow-ignored")]
        allow_ignored: bool,
        /// Print the final session snapshot as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum GroupsCommands {
    /// Add a new group.
    Add {
        /// Group name, e.g. 'Flat 4B'
        name: String,
    },
    /// List all groups.
    List,
}

#[derive(Subcommand)]
pub enum MembersCommands {
    /// Add a member to a group.
    Add {
        /// Group name or id
        group: String,
        /// Display name as it appears in CSV exports
        full_name: String,
        #[arg(long)]
        email: Option<String>,
    },
    /// List a group's members.
    List {
        /// Group name or id
        group: String,
    },
    /// Add members from a roster CSV with full_name,email columns.
    Import {
        /// Group name or id
        group: String,
        /// Path to the roster CSV
        file: String,
    },
}
