use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub type GroupId = i64;
pub type UserId = i64;

#[derive(Debug, Clone, Serialize)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
}

/// A group member payer identities can be mapped onto.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub user_id: UserId,
    pub full_name: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionKind {
    Income,
    Expense,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Income => "INCOME",
            Self::Expense => "EXPENSE",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_uppercase().as_str() {
            "INCOME" => Some(Self::Income),
            "EXPENSE" => Some(Self::Expense),
            _ => None,
        }
    }
}

/// A normalized row whose payer has not been resolved to a user yet.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionDraft {
    /// 1-based line in the source file, header included.
    pub line: usize,
    pub amount: Decimal,
    pub kind: TransactionKind,
    pub occurred_at: DateTime<Utc>,
    pub note: Option<String>,
    pub category: Option<String>,
    pub payment_mode: Option<String>,
    pub payer: Option<String>,
}

/// A draft with its payer resolved, ready for the ledger.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanonicalTransaction {
    pub group_id: GroupId,
    pub amount: Decimal,
    pub kind: TransactionKind,
    pub occurred_at: DateTime<Utc>,
    pub note: Option<String>,
    pub category: Option<String>,
    pub payment_mode: Option<String>,
    pub paid_by: Option<UserId>,
}

impl CanonicalTransaction {
    pub fn from_draft(draft: &TransactionDraft, group_id: GroupId, paid_by: Option<UserId>) -> Self {
        Self {
            group_id,
            amount: draft.amount,
            kind: draft.kind,
            occurred_at: draft.occurred_at,
            note: draft.note.clone(),
            category: draft.category.clone(),
            payment_mode: draft.payment_mode.clone(),
            paid_by,
        }
    }
}
