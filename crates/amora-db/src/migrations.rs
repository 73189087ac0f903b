use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &mut Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (users, ledger, threads)");
        let tx = conn.transaction()?;
        tx.execute_batch(
            "
            CREATE TABLE users (
                id                  TEXT PRIMARY KEY,
                username            TEXT NOT NULL UNIQUE,
                password            TEXT NOT NULL,
                membership_tier     TEXT NOT NULL DEFAULT 'standard'
                                    CHECK (membership_tier IN ('standard', 'plus', 'premium')),
                daily_likes_used    INTEGER NOT NULL DEFAULT 0 CHECK (daily_likes_used >= 0),
                last_like_date      TEXT,
                last_faucet_date    TEXT,
                created_at          TEXT NOT NULL
            );

            CREATE TABLE balances (
                user_id     TEXT NOT NULL REFERENCES users(id),
                token_type  TEXT NOT NULL CHECK (token_type IN ('LOVE', 'LOVE2')),
                amount      INTEGER NOT NULL DEFAULT 0 CHECK (amount >= 0),
                PRIMARY KEY (user_id, token_type)
            );

            CREATE TABLE token_transactions (
                id              TEXT PRIMARY KEY,
                user_id         TEXT NOT NULL REFERENCES users(id),
                kind            TEXT NOT NULL,
                token_type      TEXT NOT NULL,
                amount          INTEGER NOT NULL CHECK (amount > 0),
                balance_before  INTEGER NOT NULL,
                balance_after   INTEGER NOT NULL,
                description     TEXT NOT NULL,
                created_at      TEXT NOT NULL
            );

            CREATE INDEX idx_token_transactions_user
                ON token_transactions(user_id, created_at);

            -- user_a < user_b; one thread per unordered pair
            CREATE TABLE threads (
                id                  TEXT PRIMARY KEY,
                user_a              TEXT NOT NULL REFERENCES users(id),
                user_b              TEXT NOT NULL REFERENCES users(id),
                initial_fee_paid    INTEGER NOT NULL DEFAULT 0,
                escrow_amount       INTEGER NOT NULL DEFAULT 0 CHECK (escrow_amount >= 0),
                escrow_sender_id    TEXT REFERENCES users(id),
                last_message_at     TEXT,
                created_at          TEXT NOT NULL,
                UNIQUE (user_a, user_b),
                CHECK (user_a < user_b),
                CHECK ((escrow_amount > 0) = (escrow_sender_id IS NOT NULL)),
                CHECK (escrow_amount = 0 OR initial_fee_paid = 1)
            );

            CREATE TABLE thread_participants (
                thread_id   TEXT NOT NULL REFERENCES threads(id),
                user_id     TEXT NOT NULL REFERENCES users(id),
                PRIMARY KEY (thread_id, user_id)
            );

            CREATE INDEX idx_thread_participants_user
                ON thread_participants(user_id);

            CREATE TABLE messages (
                id          TEXT PRIMARY KEY,
                thread_id   TEXT NOT NULL REFERENCES threads(id),
                sender_id   TEXT NOT NULL REFERENCES users(id),
                content     TEXT NOT NULL,
                created_at  TEXT NOT NULL
            );

            CREATE INDEX idx_messages_thread
                ON messages(thread_id, created_at);

            CREATE TABLE likes (
                liker_id    TEXT NOT NULL REFERENCES users(id),
                likee_id    TEXT NOT NULL REFERENCES users(id),
                created_at  TEXT NOT NULL,
                PRIMARY KEY (liker_id, likee_id),
                CHECK (liker_id != likee_id)
            );

            CREATE INDEX idx_likes_likee
                ON likes(likee_id);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
        tx.commit()?;
    }

    info!("Database migrations complete");
    Ok(())
}
