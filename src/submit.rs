//! Boundary to the persistence side: one bulk insert per file.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::SecondsFormat;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::models::{CanonicalTransaction, GroupId, UserId};

#[derive(Debug, Clone, Serialize)]
pub struct BatchRequest {
    pub group_id: GroupId,
    pub source_name: String,
    pub source_checksum: Option<String>,
    pub identity_map: BTreeMap<String, UserId>,
    pub transactions: Vec<CanonicalTransaction>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchReceipt {
    pub imported_count: usize,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmitError {
    #[error("batch rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<rusqlite::Error> for SubmitError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

#[async_trait]
pub trait BatchSubmitter: Send + Sync {
    async fn submit_batch(&self, request: BatchRequest) -> Result<BatchReceipt, SubmitError>;
}

// ---------------------------------------------------------------------------
// Local SQLite ledger
// ---------------------------------------------------------------------------

/// Writes each batch into the local ledger inside one SQLite transaction.
pub struct LedgerSubmitter {
    conn: Mutex<Connection>,
}

impl LedgerSubmitter {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }
}

#[async_trait]
impl BatchSubmitter for LedgerSubmitter {
    async fn submit_batch(&self, request: BatchRequest) -> Result<BatchReceipt, SubmitError> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| SubmitError::Storage("ledger connection poisoned".to_string()))?;
        insert_batch(&mut conn, &request)
    }
}

fn insert_batch(conn: &mut Connection, request: &BatchRequest) -> Result<BatchReceipt, SubmitError> {
    let group: Option<i64> = conn
        .query_row("SELECT id FROM groups WHERE id = ?1", [request.group_id], |r| r.get(0))
        .optional()?;
    if group.is_none() {
        return Err(SubmitError::Rejected {
            status: 404,
            message: format!("group {} not found", request.group_id),
        });
    }

    let tx = conn.transaction()?;
    let dates: Vec<String> = request
        .transactions
        .iter()
        .map(|t| t.occurred_at.date_naive().format("%Y-%m-%d").to_string())
        .collect();
    tx.execute(
        "INSERT INTO imports (group_id, filename, record_count, date_range_start, date_range_end, checksum) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![
            request.group_id,
            request.source_name,
            request.transactions.len() as i64,
            dates.iter().min(),
            dates.iter().max(),
            request.source_checksum,
        ],
    )?;
    let import_id = tx.last_insert_rowid();

    let mut imported = 0usize;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO transactions (group_id, amount, kind, occurred_at, note, category, payment_mode, paid_by, import_id) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )?;
        for t in &request.transactions {
            stmt.execute(rusqlite::params![
                t.group_id,
                t.amount.to_string(),
                t.kind.as_str(),
                t.occurred_at.to_rfc3339_opts(SecondsFormat::Millis, true),
                t.note,
                t.category,
                t.payment_mode,
                t.paid_by,
                import_id,
            ])?;
            imported += 1;
        }
    }
    tx.commit()?;

    debug!(source = %request.source_name, imported, "batch written to ledger");
    Ok(BatchReceipt {
        imported_count: imported,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{add_group, add_member, get_connection, init_db};
    use crate::models::TransactionKind;
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;

    fn test_db() -> (tempfile::TempDir, Connection) {
        let dir = tempfile::tempdir().unwrap();
        let conn = get_connection(&dir.path().join("test.db")).unwrap();
        init_db(&conn).unwrap();
        (dir, conn)
    }

    fn txn(group_id: GroupId, paid_by: Option<UserId>, day: u32) -> CanonicalTransaction {
        CanonicalTransaction {
            group_id,
            amount: Decimal::new(12_50, 2),
            kind: TransactionKind::Expense,
            occurred_at: Utc.with_ymd_and_hms(2024, 2, day, 9, 30, 0).unwrap(),
            note: Some("Tea".into()),
            category: None,
            payment_mode: Some("Cash".into()),
            paid_by,
        }
    }

    fn request(group_id: GroupId, transactions: Vec<CanonicalTransaction>) -> BatchRequest {
        BatchRequest {
            group_id,
            source_name: "cashbook.csv".into(),
            source_checksum: Some("abc".into()),
            identity_map: BTreeMap::new(),
            transactions,
        }
    }

    #[tokio::test]
    async fn test_ledger_inserts_batch() {
        let (_dir, conn) = test_db();
        let group = add_group(&conn, "Home").unwrap();
        let alice = add_member(&conn, group, "Alice", None).unwrap();
        let ledger = LedgerSubmitter::new(conn);

        let receipt = ledger
            .submit_batch(request(group, vec![txn(group, Some(alice), 1), txn(group, None, 3)]))
            .await
            .unwrap();
        assert_eq!(receipt.imported_count, 2);

        let conn = ledger.conn.lock().unwrap();
        let (amount, occurred_at): (String, String) = conn
            .query_row("SELECT amount, occurred_at FROM transactions ORDER BY id LIMIT 1", [], |r| {
                Ok((r.get(0)?, r.get(1)?))
            })
            .unwrap();
        assert_eq!(amount, "12.50");
        assert_eq!(occurred_at, "2024-02-01T09:30:00.000Z");
        let (count, start, end): (i64, String, String) = conn
            .query_row("SELECT record_count, date_range_start, date_range_end FROM imports", [], |r| {
                Ok((r.get(0)?, r.get(1)?, r.get(2)?))
            })
            .unwrap();
        assert_eq!((count, start.as_str(), end.as_str()), (2, "2024-02-01", "2024-02-03"));
    }

    #[tokio::test]
    async fn test_ledger_rejects_unknown_group() {
        let (_dir, conn) = test_db();
        let ledger = LedgerSubmitter::new(conn);
        let err = ledger.submit_batch(request(42, vec![txn(42, None, 1)])).await.unwrap_err();
        assert!(matches!(err, SubmitError::Rejected { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_ledger_batch_is_all_or_nothing() {
        let (_dir, conn) = test_db();
        let group = add_group(&conn, "Home").unwrap();
        let ledger = LedgerSubmitter::new(conn);
        // paid_by 99 violates the members foreign key on the second row.
        let err = ledger
            .submit_batch(request(group, vec![txn(group, None, 1), txn(group, Some(99), 2)]))
            .await
            .unwrap_err();
        assert!(matches!(err, SubmitError::Storage(_)));
        let conn = ledger.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT count(*) FROM transactions", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 0);
    }
}
