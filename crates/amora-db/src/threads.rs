use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use amora_types::models::{Message, Thread};

use crate::Database;
use crate::error::{DbError, Result};
use crate::models::{MessageRow, ThreadRow, format_ts, now_ts};
use crate::queries::ensure_user;

const MAX_PAGE: u32 = 200;

const THREAD_COLUMNS: &str = "t.id, t.user_a, t.user_b, t.initial_fee_paid, t.escrow_amount,
     t.escrow_sender_id, t.last_message_at, t.created_at";

impl Database {
    /// Return the thread between two users, creating it on first use.
    pub fn get_or_create_thread(&self, user_a: Uuid, user_b: Uuid) -> Result<Thread> {
        if user_a == user_b {
            return Err(DbError::SameUser);
        }
        let (lo, hi) = canonical_pair(user_a, user_b);

        self.with_tx(|tx| {
            ensure_user(tx, user_a)?;
            ensure_user(tx, user_b)?;

            let existing: Option<String> = tx
                .query_row(
                    "SELECT id FROM threads WHERE user_a = ?1 AND user_b = ?2",
                    (&lo, &hi),
                    |row| row.get(0),
                )
                .optional()?;

            let thread_id = match existing {
                Some(id) => id,
                None => {
                    let id = Uuid::new_v4().to_string();
                    tx.execute(
                        "INSERT INTO threads (id, user_a, user_b, created_at) VALUES (?1, ?2, ?3, ?4)",
                        (&id, &lo, &hi, now_ts()),
                    )?;
                    let mut stmt = tx.prepare_cached(
                        "INSERT INTO thread_participants (thread_id, user_id) VALUES (?1, ?2)",
                    )?;
                    stmt.execute((&id, &lo))?;
                    stmt.execute((&id, &hi))?;
                    id
                }
            };

            load_thread(tx, &thread_id)?.ok_or(DbError::ThreadNotFound)
        })
    }

    pub fn get_thread(&self, thread_id: Uuid) -> Result<Option<Thread>> {
        self.with_conn(|conn| load_thread(conn, &thread_id.to_string()))
    }

    /// Threads the user takes part in, most recently active first.
    pub fn threads_for_user(&self, user_id: Uuid) -> Result<Vec<Thread>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {}
                 FROM threads t
                 JOIN thread_participants p ON p.thread_id = t.id
                 WHERE p.user_id = ?1
                 ORDER BY COALESCE(t.last_message_at, t.created_at) DESC",
                THREAD_COLUMNS
            );
            let mut stmt = conn.prepare_cached(&sql)?;
            let rows = stmt
                .query_map([user_id.to_string()], map_thread_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            rows.into_iter().map(Thread::try_from).collect()
        })
    }

    /// Messages of a thread, newest first. `before` is a `created_at`
    /// cursor taken from the oldest message of the previous page.
    pub fn get_messages(
        &self,
        thread_id: Uuid,
        limit: u32,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>> {
        let before = before.map(format_ts);
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT id, thread_id, sender_id, content, created_at
                 FROM messages
                 WHERE thread_id = ?1 AND (?2 IS NULL OR created_at < ?2)
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT ?3",
            )?;

            let rows = stmt
                .query_map(
                    params![thread_id.to_string(), before, limit.min(MAX_PAGE)],
                    |row| {
                        Ok(MessageRow {
                            id: row.get(0)?,
                            thread_id: row.get(1)?,
                            sender_id: row.get(2)?,
                            content: row.get(3)?,
                            created_at: row.get(4)?,
                        })
                    },
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            rows.into_iter().map(Message::try_from).collect()
        })
    }
}

fn canonical_pair(a: Uuid, b: Uuid) -> (String, String) {
    let (a, b) = (a.to_string(), b.to_string());
    if a < b { (a, b) } else { (b, a) }
}

fn map_thread_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ThreadRow> {
    Ok(ThreadRow {
        id: row.get(0)?,
        user_a: row.get(1)?,
        user_b: row.get(2)?,
        initial_fee_paid: row.get(3)?,
        escrow_amount: row.get(4)?,
        escrow_sender_id: row.get(5)?,
        last_message_at: row.get(6)?,
        created_at: row.get(7)?,
    })
}

pub(crate) fn load_thread(conn: &Connection, thread_id: &str) -> Result<Option<Thread>> {
    let sql = format!("SELECT {} FROM threads t WHERE t.id = ?1", THREAD_COLUMNS);
    let mut stmt = conn.prepare_cached(&sql)?;
    let row = stmt.query_row([thread_id], map_thread_row).optional()?;
    row.map(Thread::try_from).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{open_temp, user};
    use amora_types::models::EscrowState;

    #[test]
    fn thread_is_shared_per_pair() {
        let (_dir, db) = open_temp();
        let a = user(&db, "a", 0);
        let b = user(&db, "b", 0);

        let first = db.get_or_create_thread(a, b).unwrap();
        let again = db.get_or_create_thread(b, a).unwrap();
        assert_eq!(first.id, again.id);
        assert!(first.has_participant(a) && first.has_participant(b));
        assert_eq!(first.peer_of(a), Some(b));
        assert!(!first.initial_fee_paid);
        assert_eq!(first.escrow, EscrowState::NoEscrow);
        assert!(first.last_message_at.is_none());
    }

    #[test]
    fn thread_needs_two_known_users() {
        let (_dir, db) = open_temp();
        let a = user(&db, "a", 0);
        assert!(matches!(db.get_or_create_thread(a, a), Err(DbError::SameUser)));
        assert!(matches!(
            db.get_or_create_thread(a, Uuid::new_v4()),
            Err(DbError::UserNotFound)
        ));
    }

    #[test]
    fn threads_listed_per_participant() {
        let (_dir, db) = open_temp();
        let a = user(&db, "a", 100);
        let b = user(&db, "b", 0);
        let c = user(&db, "c", 0);

        let ab = db.get_or_create_thread(a, b).unwrap();
        let ac = db.get_or_create_thread(a, c).unwrap();
        db.send_message_with_escrow(ab.id, a, "hi b", 10).unwrap();

        let threads = db.threads_for_user(a).unwrap();
        assert_eq!(threads.len(), 2);
        assert_eq!(threads[0].id, ab.id);
        assert_eq!(threads[1].id, ac.id);

        assert_eq!(db.threads_for_user(c).unwrap().len(), 1);
        assert!(db.get_thread(Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn messages_page_newest_first() {
        let (_dir, db) = open_temp();
        let a = user(&db, "a", 100);
        let b = user(&db, "b", 0);
        let thread = db.get_or_create_thread(a, b).unwrap();
        for i in 0..5 {
            db.send_message_with_escrow(thread.id, a, &format!("m{}", i), 10)
                .unwrap();
        }

        let page = db.get_messages(thread.id, 3, None).unwrap();
        let contents: Vec<_> = page.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m4", "m3", "m2"]);

        let limit = db.get_messages(thread.id, 1000, None).unwrap();
        assert_eq!(limit.len(), 5);
    }

    #[test]
    fn message_cursor_compares_instants_not_text() {
        let (_dir, db) = open_temp();
        let a = user(&db, "a", 100);
        let b = user(&db, "b", 0);
        let thread = db.get_or_create_thread(a, b).unwrap();
        let sent = db
            .send_message_with_escrow(thread.id, a, "hello", 10)
            .unwrap()
            .message;

        // One hour before the message, written with a +05:00 offset. As text
        // it sorts after the stored UTC timestamp.
        let offset = chrono::FixedOffset::east_opt(5 * 3600).unwrap();
        let earlier = (sent.created_at - chrono::Duration::hours(1)).with_timezone(&offset);
        assert!(earlier.to_rfc3339() > format_ts(sent.created_at));

        let page = db
            .get_messages(thread.id, 50, Some(earlier.with_timezone(&Utc)))
            .unwrap();
        assert!(page.is_empty());

        let later = sent.created_at + chrono::Duration::seconds(1);
        assert_eq!(db.get_messages(thread.id, 50, Some(later)).unwrap().len(), 1);
    }
}
