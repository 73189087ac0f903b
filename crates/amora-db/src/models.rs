//! Database row types. These map directly to SQLite rows and are converted
//! into `amora_types::models` values at the crate boundary.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use uuid::Uuid;

use amora_types::models::{
    EscrowState, MembershipTier, Message, Thread, TokenTransaction, TransactionKind,
};

use crate::error::{DbError, Result};

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password: String,
    pub membership_tier: String,
    pub created_at: String,
}

pub struct ThreadRow {
    pub id: String,
    pub user_a: String,
    pub user_b: String,
    pub initial_fee_paid: bool,
    pub escrow_amount: i64,
    pub escrow_sender_id: Option<String>,
    pub last_message_at: Option<String>,
    pub created_at: String,
}

pub struct MessageRow {
    pub id: String,
    pub thread_id: String,
    pub sender_id: String,
    pub content: String,
    pub created_at: String,
}

pub struct TransactionRow {
    pub id: String,
    pub user_id: String,
    pub kind: String,
    pub token_type: String,
    pub amount: i64,
    pub balance_before: i64,
    pub balance_after: i64,
    pub description: String,
    pub created_at: String,
}

/// Current time in the fixed-width format used for every timestamp column,
/// so that text ordering matches chronological ordering.
pub fn now_ts() -> String {
    format_ts(Utc::now())
}

pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            // SQLite's datetime('now') has no timezone; treat as UTC.
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .map_err(|e| DbError::Corrupt(format!("timestamp '{}': {}", raw, e)))
}

pub fn parse_date(raw: &str) -> Result<NaiveDate> {
    raw.parse::<NaiveDate>()
        .map_err(|e| DbError::Corrupt(format!("date '{}': {}", raw, e)))
}

pub fn parse_uuid(raw: &str) -> Result<Uuid> {
    raw.parse::<Uuid>()
        .map_err(|e| DbError::Corrupt(format!("id '{}': {}", raw, e)))
}

impl UserRow {
    pub fn tier(&self) -> Result<MembershipTier> {
        self.membership_tier
            .parse()
            .map_err(|e: amora_types::models::ParseEnumError| DbError::Corrupt(e.to_string()))
    }
}

impl TryFrom<ThreadRow> for Thread {
    type Error = DbError;

    fn try_from(row: ThreadRow) -> Result<Self> {
        let escrow = match (row.escrow_amount, row.escrow_sender_id.as_deref()) {
            (0, None) => EscrowState::NoEscrow,
            (amount, Some(sender)) if amount > 0 => EscrowState::AwaitingReply {
                sender_id: parse_uuid(sender)?,
                amount,
            },
            (amount, sender) => {
                return Err(DbError::Corrupt(format!(
                    "thread '{}' escrow amount {} with sender {:?}",
                    row.id, amount, sender
                )));
            }
        };

        Ok(Thread {
            id: parse_uuid(&row.id)?,
            participants: [parse_uuid(&row.user_a)?, parse_uuid(&row.user_b)?],
            initial_fee_paid: row.initial_fee_paid,
            escrow,
            last_message_at: row.last_message_at.as_deref().map(parse_ts).transpose()?,
            created_at: parse_ts(&row.created_at)?,
        })
    }
}

impl TryFrom<MessageRow> for Message {
    type Error = DbError;

    fn try_from(row: MessageRow) -> Result<Self> {
        Ok(Message {
            id: parse_uuid(&row.id)?,
            thread_id: parse_uuid(&row.thread_id)?,
            sender_id: parse_uuid(&row.sender_id)?,
            content: row.content,
            created_at: parse_ts(&row.created_at)?,
        })
    }
}

impl TryFrom<TransactionRow> for TokenTransaction {
    type Error = DbError;

    fn try_from(row: TransactionRow) -> Result<Self> {
        let kind: TransactionKind = row
            .kind
            .parse()
            .map_err(|e: amora_types::models::ParseEnumError| DbError::Corrupt(e.to_string()))?;
        let token_type = row
            .token_type
            .parse()
            .map_err(|e: amora_types::models::ParseEnumError| DbError::Corrupt(e.to_string()))?;

        Ok(TokenTransaction {
            id: parse_uuid(&row.id)?,
            user_id: parse_uuid(&row.user_id)?,
            kind,
            token_type,
            amount: row.amount,
            balance_before: row.balance_before,
            balance_after: row.balance_after,
            description: row.description,
            created_at: parse_ts(&row.created_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thread_row(amount: i64, sender: Option<&str>) -> ThreadRow {
        ThreadRow {
            id: Uuid::new_v4().to_string(),
            user_a: Uuid::new_v4().to_string(),
            user_b: Uuid::new_v4().to_string(),
            initial_fee_paid: amount > 0,
            escrow_amount: amount,
            escrow_sender_id: sender.map(str::to_string),
            last_message_at: None,
            created_at: now_ts(),
        }
    }

    #[test]
    fn timestamps_sort_as_text() {
        let earlier = format_ts("2026-01-02T03:04:05.000001Z".parse().unwrap());
        let later = format_ts("2026-01-02T03:04:05.1Z".parse().unwrap());
        assert!(earlier < later);
        assert_eq!(parse_ts(&later).unwrap().to_rfc3339(), "2026-01-02T03:04:05.100+00:00");
    }

    #[test]
    fn sqlite_datetime_parses_as_utc() {
        let ts = parse_ts("2026-03-01 12:00:00").unwrap();
        assert_eq!(ts.to_rfc3339(), "2026-03-01T12:00:00+00:00");
    }

    #[test]
    fn escrow_columns_map_to_state() {
        let sender = Uuid::new_v4();
        let thread = Thread::try_from(thread_row(10, Some(&sender.to_string()))).unwrap();
        assert_eq!(
            thread.escrow,
            EscrowState::AwaitingReply {
                sender_id: sender,
                amount: 10
            }
        );

        let thread = Thread::try_from(thread_row(0, None)).unwrap();
        assert_eq!(thread.escrow, EscrowState::NoEscrow);
    }

    #[test]
    fn inconsistent_escrow_columns_are_corrupt() {
        assert!(matches!(
            Thread::try_from(thread_row(5, None)),
            Err(DbError::Corrupt(_))
        ));
        let sender = Uuid::new_v4().to_string();
        assert!(matches!(
            Thread::try_from(thread_row(0, Some(&sender))),
            Err(DbError::Corrupt(_))
        ));
    }
}
