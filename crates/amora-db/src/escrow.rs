//! Pay-to-message escrow.
//!
//! The first message of a thread debits a fee from the sender and holds it
//! against the thread. The other participant's first reply releases the
//! held amount to them. Every later message is free. Each send is one
//! `IMMEDIATE` transaction, so two participants racing to send the first
//! message serialize and exactly one of them opens the escrow.

use rusqlite::Connection;
use tracing::{debug, info};
use uuid::Uuid;

use amora_types::models::{
    BalanceChange, EscrowState, EscrowTransition, Message, Thread, TokenType, TransactionKind,
};

use crate::Database;
use crate::error::{DbError, Result};
use crate::ledger::{credit, debit};
use crate::models::{MessageRow, now_ts};
use crate::threads::load_thread;

pub const MAX_CONTENT_CHARS: usize = 4000;

/// Result of one escrow send.
#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub message: Message,
    /// Thread state after the send.
    pub thread: Thread,
    pub transition: EscrowTransition,
    /// LOVE balances that changed during the send.
    pub balances: Vec<BalanceChange>,
}

impl Database {
    /// Insert a message and apply the escrow rule for `fee` LOVE.
    ///
    /// Fails without touching the thread or any balance when the sender is
    /// not a participant, the content is empty, or the sender cannot cover
    /// the fee on a thread's first message.
    pub fn send_message_with_escrow(
        &self,
        thread_id: Uuid,
        sender_id: Uuid,
        content: &str,
        fee: i64,
    ) -> Result<SendOutcome> {
        let content = validate_content(content)?;
        if fee < 0 {
            return Err(DbError::InvalidAmount(fee));
        }

        let outcome = self.with_tx(|tx| {
            let tid = thread_id.to_string();
            let thread = load_thread(tx, &tid)?.ok_or(DbError::ThreadNotFound)?;
            if !thread.has_participant(sender_id) {
                return Err(DbError::NotParticipant);
            }

            let mut balances = Vec::new();
            let transition = match (thread.initial_fee_paid, thread.escrow) {
                (false, _) => open_escrow(tx, &tid, sender_id, fee, &mut balances)?,
                (true, EscrowState::AwaitingReply { sender_id: holder, amount })
                    if holder != sender_id =>
                {
                    release_escrow(tx, &tid, holder, sender_id, amount, &mut balances)?
                }
                // Escrow sender writing again before a reply, or a thread
                // whose escrow has already been settled.
                _ => EscrowTransition::None,
            };

            let message = insert_message(tx, &tid, sender_id, content)?;
            let thread = load_thread(tx, &tid)?.ok_or(DbError::ThreadNotFound)?;

            Ok(SendOutcome {
                message,
                thread,
                transition,
                balances,
            })
        })?;

        match outcome.transition {
            EscrowTransition::Opened { amount, .. } => {
                info!("Thread {} escrow opened by {} ({} LOVE)", thread_id, sender_id, amount)
            }
            EscrowTransition::Released { recipient_id, amount } => {
                info!("Thread {} escrow released to {} ({} LOVE)", thread_id, recipient_id, amount)
            }
            EscrowTransition::None => debug!("Thread {} message from {}", thread_id, sender_id),
        }

        Ok(outcome)
    }
}

fn validate_content(content: &str) -> Result<&str> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(DbError::InvalidContent("message is empty"));
    }
    if trimmed.chars().count() > MAX_CONTENT_CHARS {
        return Err(DbError::InvalidContent("message is too long"));
    }
    Ok(trimmed)
}

fn open_escrow(
    conn: &Connection,
    thread_id: &str,
    sender_id: Uuid,
    fee: i64,
    balances: &mut Vec<BalanceChange>,
) -> Result<EscrowTransition> {
    if fee == 0 {
        conn.execute(
            "UPDATE threads SET initial_fee_paid = 1 WHERE id = ?1 AND initial_fee_paid = 0",
            [thread_id],
        )?;
        return Ok(EscrowTransition::None);
    }

    let hold = debit(
        conn,
        sender_id,
        TokenType::Love,
        fee,
        TransactionKind::EscrowHold,
        &format!("Escrow hold for thread {}", thread_id),
    )?;

    let updated = conn.execute(
        "UPDATE threads SET initial_fee_paid = 1, escrow_amount = ?2, escrow_sender_id = ?3
         WHERE id = ?1 AND initial_fee_paid = 0",
        (thread_id, fee, sender_id.to_string()),
    )?;
    if updated != 1 {
        return Err(DbError::Corrupt(format!(
            "thread '{}' changed during escrow open",
            thread_id
        )));
    }

    balances.push(BalanceChange {
        user_id: sender_id,
        token_type: TokenType::Love,
        balance: hold.balance_after,
    });
    Ok(EscrowTransition::Opened {
        sender_id,
        amount: fee,
    })
}

fn release_escrow(
    conn: &Connection,
    thread_id: &str,
    holder_id: Uuid,
    recipient_id: Uuid,
    amount: i64,
    balances: &mut Vec<BalanceChange>,
) -> Result<EscrowTransition> {
    let updated = conn.execute(
        "UPDATE threads SET escrow_amount = 0, escrow_sender_id = NULL
         WHERE id = ?1 AND escrow_sender_id = ?2 AND escrow_amount = ?3",
        (thread_id, holder_id.to_string(), amount),
    )?;
    if updated != 1 {
        return Err(DbError::Corrupt(format!(
            "thread '{}' changed during escrow release",
            thread_id
        )));
    }

    let release = credit(
        conn,
        recipient_id,
        TokenType::Love,
        amount,
        TransactionKind::EscrowRelease,
        &format!("Escrow release for thread {}", thread_id),
    )?;

    balances.push(BalanceChange {
        user_id: recipient_id,
        token_type: TokenType::Love,
        balance: release.balance_after,
    });
    Ok(EscrowTransition::Released {
        recipient_id,
        amount,
    })
}

fn insert_message(
    conn: &Connection,
    thread_id: &str,
    sender_id: Uuid,
    content: &str,
) -> Result<Message> {
    let id = Uuid::new_v4().to_string();
    let created_at = now_ts();
    conn.execute(
        "INSERT INTO messages (id, thread_id, sender_id, content, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        (&id, thread_id, sender_id.to_string(), content, &created_at),
    )?;
    conn.execute(
        "UPDATE threads SET last_message_at = ?1 WHERE id = ?2",
        (&created_at, thread_id),
    )?;

    Message::try_from(MessageRow {
        id,
        thread_id: thread_id.to_string(),
        sender_id: sender_id.to_string(),
        content: content.to_string(),
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{open_temp, user};
    use std::sync::Arc;

    const FEE: i64 = 10;

    fn love(db: &Database, id: Uuid) -> i64 {
        db.get_balances(id).unwrap().love
    }

    fn setup(a_love: i64, b_love: i64) -> (tempfile::TempDir, Database, Uuid, Uuid, Uuid) {
        let (dir, db) = open_temp();
        let a = user(&db, "a", a_love);
        let b = user(&db, "b", b_love);
        let thread = db.get_or_create_thread(a, b).unwrap();
        (dir, db, a, b, thread.id)
    }

    #[test]
    fn first_message_opens_escrow() {
        let (_dir, db, a, _b, thread_id) = setup(100, 10);

        let out = db.send_message_with_escrow(thread_id, a, "hello", FEE).unwrap();
        assert_eq!(
            out.transition,
            EscrowTransition::Opened { sender_id: a, amount: FEE }
        );
        assert_eq!(love(&db, a), 90);
        assert!(out.thread.initial_fee_paid);
        assert_eq!(out.thread.escrow.amount(), FEE);
        assert_eq!(out.thread.escrow.sender_id(), Some(a));
        assert_eq!(
            out.balances,
            vec![BalanceChange { user_id: a, token_type: TokenType::Love, balance: 90 }]
        );
        assert_eq!(out.message.content, "hello");
        assert_eq!(out.thread.last_message_at, Some(out.message.created_at));
    }

    #[test]
    fn first_reply_releases_escrow() {
        let (_dir, db, a, b, thread_id) = setup(100, 10);
        db.send_message_with_escrow(thread_id, a, "hello", FEE).unwrap();

        let out = db.send_message_with_escrow(thread_id, b, "hi!", FEE).unwrap();
        assert_eq!(
            out.transition,
            EscrowTransition::Released { recipient_id: b, amount: FEE }
        );
        assert_eq!(out.thread.escrow, EscrowState::NoEscrow);
        assert!(out.thread.initial_fee_paid);

        assert_eq!(love(&db, a), 90);
        assert_eq!(love(&db, b), 20);
    }

    #[test]
    fn later_messages_are_free() {
        let (_dir, db, a, b, thread_id) = setup(100, 10);
        db.send_message_with_escrow(thread_id, a, "1", FEE).unwrap();
        db.send_message_with_escrow(thread_id, b, "2", FEE).unwrap();

        for (sender, text) in [(a, "3"), (b, "4"), (a, "5")] {
            let out = db.send_message_with_escrow(thread_id, sender, text, FEE).unwrap();
            assert_eq!(out.transition, EscrowTransition::None);
            assert!(out.balances.is_empty());
        }
        assert_eq!((love(&db, a), love(&db, b)), (90, 20));
        assert_eq!(db.get_messages(thread_id, 50, None).unwrap().len(), 5);
    }

    #[test]
    fn repeat_from_escrow_sender_is_free() {
        let (_dir, db, a, b, thread_id) = setup(100, 10);
        db.send_message_with_escrow(thread_id, a, "hello", FEE).unwrap();

        let out = db.send_message_with_escrow(thread_id, a, "anyone?", FEE).unwrap();
        assert_eq!(out.transition, EscrowTransition::None);
        assert_eq!(love(&db, a), 90);
        assert_eq!(out.thread.escrow.amount(), FEE);

        // The reply still releases the original hold, once.
        let out = db.send_message_with_escrow(thread_id, b, "hey", FEE).unwrap();
        assert_eq!(
            out.transition,
            EscrowTransition::Released { recipient_id: b, amount: FEE }
        );
        assert_eq!(love(&db, b), 20);
    }

    #[test]
    fn tokens_are_conserved_at_every_step() {
        let (_dir, db, a, b, thread_id) = setup(100, 10);
        let total = love(&db, a) + love(&db, b);

        let check = |db: &Database| {
            let thread = db.get_thread(thread_id).unwrap().unwrap();
            let charged = 100 - love(db, a);
            let credited = love(db, b) - 10;
            assert_eq!(charged, thread.escrow.amount() + credited);
            assert_eq!(love(db, a) + love(db, b) + thread.escrow.amount(), total);
        };

        check(&db);
        db.send_message_with_escrow(thread_id, a, "1", FEE).unwrap();
        check(&db);
        db.send_message_with_escrow(thread_id, a, "2", FEE).unwrap();
        check(&db);
        db.send_message_with_escrow(thread_id, b, "3", FEE).unwrap();
        check(&db);
        db.send_message_with_escrow(thread_id, b, "4", FEE).unwrap();
        check(&db);
    }

    #[test]
    fn reads_are_idempotent() {
        let (_dir, db, a, _b, thread_id) = setup(100, 10);
        db.send_message_with_escrow(thread_id, a, "hello", FEE).unwrap();

        let t1 = db.get_thread(thread_id).unwrap().unwrap();
        let t2 = db.get_thread(thread_id).unwrap().unwrap();
        assert_eq!(t1.escrow, t2.escrow);
        assert_eq!(t1.last_message_at, t2.last_message_at);
        assert_eq!(db.get_balances(a).unwrap(), db.get_balances(a).unwrap());
    }

    #[test]
    fn insufficient_balance_changes_nothing() {
        let (_dir, db, a, b, thread_id) = setup(5, 10);

        let err = db.send_message_with_escrow(thread_id, a, "hello", FEE).unwrap_err();
        assert!(matches!(
            err,
            DbError::InsufficientBalance { needed: FEE, available: 5 }
        ));

        let thread = db.get_thread(thread_id).unwrap().unwrap();
        assert!(!thread.initial_fee_paid);
        assert_eq!(thread.escrow, EscrowState::NoEscrow);
        assert!(thread.last_message_at.is_none());
        assert_eq!(love(&db, a), 5);
        assert!(db.get_messages(thread_id, 10, None).unwrap().is_empty());
        assert_eq!(db.list_transactions(a, 10, None).unwrap().len(), 1);

        // The other participant can still open the thread.
        let out = db.send_message_with_escrow(thread_id, b, "hi", FEE).unwrap();
        assert_eq!(
            out.transition,
            EscrowTransition::Opened { sender_id: b, amount: FEE }
        );
        assert_eq!(love(&db, b), 0);
    }

    #[test]
    fn outsider_cannot_send() {
        let (_dir, db, _a, _b, thread_id) = setup(100, 10);
        let mallory = user(&db, "mallory", 100);
        let err = db
            .send_message_with_escrow(thread_id, mallory, "hi", FEE)
            .unwrap_err();
        assert!(matches!(err, DbError::NotParticipant));
        assert_eq!(love(&db, mallory), 100);
    }

    #[test]
    fn invalid_input_is_rejected() {
        let (_dir, db, a, _b, thread_id) = setup(100, 10);
        assert!(matches!(
            db.send_message_with_escrow(thread_id, a, "   ", FEE),
            Err(DbError::InvalidContent(_))
        ));
        let long = "x".repeat(MAX_CONTENT_CHARS + 1);
        assert!(matches!(
            db.send_message_with_escrow(thread_id, a, &long, FEE),
            Err(DbError::InvalidContent(_))
        ));
        assert!(matches!(
            db.send_message_with_escrow(Uuid::new_v4(), a, "hi", FEE),
            Err(DbError::ThreadNotFound)
        ));
        assert!(matches!(
            db.send_message_with_escrow(thread_id, a, "hi", -1),
            Err(DbError::InvalidAmount(-1))
        ));
        assert_eq!(love(&db, a), 100);
    }

    #[test]
    fn zero_fee_marks_thread_paid_without_escrow() {
        let (_dir, db, a, b, thread_id) = setup(0, 0);
        let out = db.send_message_with_escrow(thread_id, a, "free", 0).unwrap();
        assert_eq!(out.transition, EscrowTransition::None);
        assert!(out.thread.initial_fee_paid);
        assert_eq!(out.thread.escrow, EscrowState::NoEscrow);

        let out = db.send_message_with_escrow(thread_id, b, "reply", 0).unwrap();
        assert_eq!(out.transition, EscrowTransition::None);
        assert!(db.list_transactions(a, 10, None).unwrap().is_empty());
    }

    #[test]
    fn audit_log_records_hold_and_release() {
        let (_dir, db, a, b, thread_id) = setup(100, 10);
        db.send_message_with_escrow(thread_id, a, "hello", FEE).unwrap();
        db.send_message_with_escrow(thread_id, b, "hi", FEE).unwrap();

        let hold = &db.list_transactions(a, 1, None).unwrap()[0];
        assert_eq!(hold.kind, TransactionKind::EscrowHold);
        assert_eq!((hold.balance_before, hold.balance_after), (100, 90));

        let release = &db.list_transactions(b, 1, None).unwrap()[0];
        assert_eq!(release.kind, TransactionKind::EscrowRelease);
        assert_eq!((release.balance_before, release.balance_after), (10, 20));
    }

    #[test]
    fn racing_first_messages_open_escrow_once() {
        let (_dir, db, a, b, thread_id) = setup(100, 100);
        let db = Arc::new(db);

        let handles: Vec<_> = [a, b]
            .into_iter()
            .map(|sender| {
                let db = db.clone();
                std::thread::spawn(move || {
                    db.send_message_with_escrow(thread_id, sender, "first!", FEE)
                        .unwrap()
                        .transition
                })
            })
            .collect();
        let transitions: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let opened = transitions
            .iter()
            .filter(|t| matches!(t, EscrowTransition::Opened { .. }))
            .count();
        let released = transitions
            .iter()
            .filter(|t| matches!(t, EscrowTransition::Released { .. }))
            .count();
        assert_eq!((opened, released), (1, 1));

        // Whoever opened paid the fee and the other got it back as the reply.
        assert_eq!(love(&db, a) + love(&db, b), 200);
        let thread = db.get_thread(thread_id).unwrap().unwrap();
        assert_eq!(thread.escrow, EscrowState::NoEscrow);
    }
}
