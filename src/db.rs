use std::path::Path;

use rusqlite::{Connection, OptionalExtension};

use crate::error::{PennywiseError, Result};
use crate::models::{Group, GroupId, Member, UserId};

pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS groups (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    created_at TEXT DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS members (
    id INTEGER PRIMARY KEY,
    group_id INTEGER NOT NULL,
    full_name TEXT NOT NULL,
    email TEXT,
    created_at TEXT DEFAULT (datetime('now')),
    FOREIGN KEY (group_id) REFERENCES groups(id)
);

CREATE TABLE IF NOT EXISTS imports (
    id INTEGER PRIMARY KEY,
    group_id INTEGER NOT NULL,
    filename TEXT NOT NULL,
    import_date TEXT DEFAULT (datetime('now')),
    record_count INTEGER,
    date_range_start TEXT,
    date_range_end TEXT,
    checksum TEXT,
    FOREIGN KEY (group_id) REFERENCES groups(id)
);

CREATE TABLE IF NOT EXISTS transactions (
    id INTEGER PRIMARY KEY,
    group_id INTEGER NOT NULL,
    amount TEXT NOT NULL,
    kind TEXT NOT NULL CHECK (kind IN ('INCOME', 'EXPENSE')),
    occurred_at TEXT NOT NULL,
    note TEXT,
    category TEXT,
    payment_mode TEXT,
    paid_by INTEGER,
    import_id INTEGER,
    created_at TEXT DEFAULT (datetime('now')),
    FOREIGN KEY (group_id) REFERENCES groups(id),
    FOREIGN KEY (paid_by) REFERENCES members(id),
    FOREIGN KEY (import_id) REFERENCES imports(id)
);
";

pub fn get_connection(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

pub fn add_group(conn: &Connection, name: &str) -> Result<GroupId> {
    conn.execute("INSERT INTO groups (name) VALUES (?1)", [name])?;
    Ok(conn.last_insert_rowid())
}

pub fn list_groups(conn: &Connection) -> Result<Vec<Group>> {
    let mut stmt = conn.prepare("SELECT id, name FROM groups ORDER BY name")?;
    let groups = stmt
        .query_map([], |row| {
            Ok(Group {
                id: row.get(0)?,
                name: row.get(1)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(groups)
}

/// Look a group up by name, or by id when the key is numeric.
pub fn find_group(conn: &Connection, key: &str) -> Result<Group> {
    let by_name = conn
        .query_row("SELECT id, name FROM groups WHERE name = ?1", [key], |row| {
            Ok(Group {
                id: row.get(0)?,
                name: row.get(1)?,
            })
        })
        .optional()?;
    if let Some(group) = by_name {
        return Ok(group);
    }
    let id: GroupId = key
        .parse()
        .map_err(|_| PennywiseError::UnknownGroup(key.to_string()))?;
    conn.query_row("SELECT id, name FROM groups WHERE id = ?1", [id], |row| {
        Ok(Group {
            id: row.get(0)?,
            name: row.get(1)?,
        })
    })
    .optional()?
    .ok_or_else(|| PennywiseError::UnknownGroup(key.to_string()))
}

pub fn add_member(conn: &Connection, group_id: GroupId, full_name: &str, email: Option<&str>) -> Result<UserId> {
    conn.execute(
        "INSERT INTO members (group_id, full_name, email) VALUES (?1, ?2, ?3)",
        rusqlite::params![group_id, full_name, email],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn list_members(conn: &Connection, group_id: GroupId) -> Result<Vec<Member>> {
    let mut stmt = conn.prepare("SELECT id, full_name, email FROM members WHERE group_id = ?1 ORDER BY id")?;
    let members = stmt
        .query_map([group_id], |row| {
            Ok(Member {
                user_id: row.get(0)?,
                full_name: row.get(1)?,
                email: row.get(2)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(members)
}
