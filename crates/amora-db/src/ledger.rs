//! LOVE / LOVE2 balances and the token transaction log.
//!
//! Balance changes are applied with a single guarded `UPDATE ... RETURNING`
//! (or upsert) and the audit row is written in the same transaction, so a
//! reader never sees a balance without its log entry and concurrent
//! mutations of one user's balance cannot lose updates.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use amora_types::models::{Balances, TokenTransaction, TokenType, TransactionKind};

use crate::Database;
use crate::error::{DbError, Result};
use crate::models::{TransactionRow, format_ts, now_ts, parse_date};
use crate::queries::ensure_user;

const MAX_PAGE: u32 = 200;

impl Database {
    /// Missing balance rows read as zero.
    pub fn get_balances(&self, user_id: Uuid) -> Result<Balances> {
        self.with_conn(|conn| query_balances(conn, user_id))
    }

    pub fn earn_tokens(
        &self,
        user_id: Uuid,
        token_type: TokenType,
        amount: i64,
        description: &str,
    ) -> Result<TokenTransaction> {
        check_amount(amount)?;
        self.with_tx(|tx| {
            ensure_user(tx, user_id)?;
            credit(tx, user_id, token_type, amount, TransactionKind::Earn, description)
        })
    }

    pub fn spend_tokens(
        &self,
        user_id: Uuid,
        token_type: TokenType,
        amount: i64,
        description: &str,
    ) -> Result<TokenTransaction> {
        check_amount(amount)?;
        self.with_tx(|tx| {
            ensure_user(tx, user_id)?;
            debit(tx, user_id, token_type, amount, TransactionKind::Spend, description)
        })
    }

    /// Newest first. `before` is a `created_at` cursor from a previous page.
    pub fn list_transactions(
        &self,
        user_id: Uuid,
        limit: u32,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<TokenTransaction>> {
        let before = before.map(format_ts);
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT id, user_id, kind, token_type, amount, balance_before, balance_after,
                        description, created_at
                 FROM token_transactions
                 WHERE user_id = ?1 AND (?2 IS NULL OR created_at < ?2)
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT ?3",
            )?;

            let rows = stmt
                .query_map(
                    params![user_id.to_string(), before, limit.min(MAX_PAGE)],
                    |row| {
                        Ok(TransactionRow {
                            id: row.get(0)?,
                            user_id: row.get(1)?,
                            kind: row.get(2)?,
                            token_type: row.get(3)?,
                            amount: row.get(4)?,
                            balance_before: row.get(5)?,
                            balance_after: row.get(6)?,
                            description: row.get(7)?,
                            created_at: row.get(8)?,
                        })
                    },
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            rows.into_iter().map(TokenTransaction::try_from).collect()
        })
    }

    /// Credit `amount` LOVE at most once per UTC day.
    pub fn claim_daily_faucet(
        &self,
        user_id: Uuid,
        today: NaiveDate,
        amount: i64,
    ) -> Result<TokenTransaction> {
        check_amount(amount)?;
        self.with_tx(|tx| {
            let last: Option<Option<String>> = tx
                .query_row(
                    "SELECT last_faucet_date FROM users WHERE id = ?1",
                    [user_id.to_string()],
                    |row| row.get(0),
                )
                .optional()?;

            let last = last.ok_or(DbError::UserNotFound)?;
            if let Some(last) = last {
                if parse_date(&last)? >= today {
                    return Err(DbError::FaucetAlreadyClaimed);
                }
            }

            tx.execute(
                "UPDATE users SET last_faucet_date = ?1 WHERE id = ?2",
                (today.to_string(), user_id.to_string()),
            )?;
            credit(
                tx,
                user_id,
                TokenType::Love,
                amount,
                TransactionKind::Faucet,
                "Daily faucet",
            )
        })
    }
}

fn check_amount(amount: i64) -> Result<()> {
    if amount <= 0 {
        return Err(DbError::InvalidAmount(amount));
    }
    Ok(())
}

pub(crate) fn query_balances(conn: &Connection, user_id: Uuid) -> Result<Balances> {
    let mut stmt =
        conn.prepare_cached("SELECT token_type, amount FROM balances WHERE user_id = ?1")?;
    let rows = stmt
        .query_map([user_id.to_string()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut balances = Balances::default();
    for (token_type, amount) in rows {
        match token_type.parse::<TokenType>() {
            Ok(TokenType::Love) => balances.love = amount,
            Ok(TokenType::Love2) => balances.love2 = amount,
            Err(e) => return Err(DbError::Corrupt(e.to_string())),
        }
    }
    Ok(balances)
}

/// Add `amount` to a balance and log it. Must run inside a transaction.
///
/// A credit that would push the balance past `i64::MAX` fails with
/// `BalanceOverflow`; SQLite would otherwise store the sum as a REAL.
pub(crate) fn credit(
    conn: &Connection,
    user_id: Uuid,
    token_type: TokenType,
    amount: i64,
    kind: TransactionKind,
    description: &str,
) -> Result<TokenTransaction> {
    let after: Option<i64> = conn
        .query_row(
            "INSERT INTO balances (user_id, token_type, amount) VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id, token_type) DO UPDATE SET amount = amount + excluded.amount
             WHERE balances.amount <= ?4
             RETURNING amount",
            params![
                user_id.to_string(),
                token_type.as_str(),
                amount,
                i64::MAX - amount
            ],
            |row| row.get(0),
        )
        .optional()?;
    let after = after.ok_or(DbError::BalanceOverflow { amount })?;

    log_transaction(conn, user_id, kind, token_type, amount, after - amount, after, description)
}

/// Subtract `amount` from a balance and log it, failing with
/// `InsufficientBalance` if the balance would go negative. Must run inside
/// a transaction.
pub(crate) fn debit(
    conn: &Connection,
    user_id: Uuid,
    token_type: TokenType,
    amount: i64,
    kind: TransactionKind,
    description: &str,
) -> Result<TokenTransaction> {
    let after: Option<i64> = conn
        .query_row(
            "UPDATE balances SET amount = amount - ?3
             WHERE user_id = ?1 AND token_type = ?2 AND amount >= ?3
             RETURNING amount",
            params![user_id.to_string(), token_type.as_str(), amount],
            |row| row.get(0),
        )
        .optional()?;

    let Some(after) = after else {
        let available = query_balances(conn, user_id)?.get(token_type);
        return Err(DbError::InsufficientBalance {
            needed: amount,
            available,
        });
    };

    log_transaction(conn, user_id, kind, token_type, amount, after + amount, after, description)
}

#[allow(clippy::too_many_arguments)]
fn log_transaction(
    conn: &Connection,
    user_id: Uuid,
    kind: TransactionKind,
    token_type: TokenType,
    amount: i64,
    balance_before: i64,
    balance_after: i64,
    description: &str,
) -> Result<TokenTransaction> {
    let id = Uuid::new_v4();
    let created_at = now_ts();
    conn.execute(
        "INSERT INTO token_transactions
            (id, user_id, kind, token_type, amount, balance_before, balance_after, description, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            id.to_string(),
            user_id.to_string(),
            kind.as_str(),
            token_type.as_str(),
            amount,
            balance_before,
            balance_after,
            description,
            created_at,
        ],
    )?;

    TokenTransaction::try_from(TransactionRow {
        id: id.to_string(),
        user_id: user_id.to_string(),
        kind: kind.as_str().to_string(),
        token_type: token_type.as_str().to_string(),
        amount,
        balance_before,
        balance_after,
        description: description.to_string(),
        created_at,
    })
}
