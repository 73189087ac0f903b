use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

use amora_types::models::{MembershipTier, TokenType, TransactionKind};

use crate::Database;
use crate::error::{DbError, Result};
use crate::ledger;
use crate::models::{UserRow, now_ts};

impl Database {
    // -- Users --

    /// Insert a user and credit the signup bonus in the same transaction.
    pub fn create_user(
        &self,
        id: Uuid,
        username: &str,
        password_hash: &str,
        signup_bonus: i64,
    ) -> Result<()> {
        self.with_tx(|tx| {
            let inserted = tx.execute(
                "INSERT INTO users (id, username, password, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(username) DO NOTHING",
                (id.to_string(), username, password_hash, now_ts()),
            )?;
            if inserted == 0 {
                return Err(DbError::UsernameTaken);
            }

            if signup_bonus > 0 {
                ledger::credit(
                    tx,
                    id,
                    TokenType::Love,
                    signup_bonus,
                    TransactionKind::SignupBonus,
                    "Signup bonus",
                )?;
            }
            Ok(())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username", username))
    }

    pub fn get_user_by_id(&self, id: Uuid) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", &id.to_string()))
    }

    pub fn set_membership_tier(&self, user_id: Uuid, tier: MembershipTier) -> Result<()> {
        self.with_tx(|tx| {
            let updated = tx.execute(
                "UPDATE users SET membership_tier = ?1 WHERE id = ?2",
                (tier.as_str(), user_id.to_string()),
            )?;
            if updated == 0 {
                return Err(DbError::UserNotFound);
            }
            Ok(())
        })
    }
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    let sql = format!(
        "SELECT id, username, password, membership_tier, created_at FROM users WHERE {} = ?1",
        column
    );
    let mut stmt = conn.prepare_cached(&sql)?;

    let row = stmt
        .query_row([value], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
                password: row.get(2)?,
                membership_tier: row.get(3)?,
                created_at: row.get(4)?,
            })
        })
        .optional()?;

    Ok(row)
}

/// Fails with `UserNotFound` unless a user row exists.
pub(crate) fn ensure_user(conn: &Connection, user_id: Uuid) -> Result<()> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM users WHERE id = ?1)",
        [user_id.to_string()],
        |row| row.get(0),
    )?;
    if exists { Ok(()) } else { Err(DbError::UserNotFound) }
}
