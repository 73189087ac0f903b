use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::info;
use uuid::Uuid;

use amora_types::models::{LikeAllowance, MembershipTier};

use crate::Database;
use crate::error::{DbError, Result};
use crate::models::{now_ts, parse_date, parse_uuid};
use crate::queries::ensure_user;

#[derive(Debug, Clone, Copy)]
pub struct LikeOutcome {
    /// The likee had already liked the liker.
    pub matched: bool,
    pub allowance: LikeAllowance,
}

struct LikeCounter {
    tier: MembershipTier,
    used: u32,
    last_like_date: Option<NaiveDate>,
}

impl LikeCounter {
    /// The stored count only applies to the day it was recorded on.
    fn used_on(&self, today: NaiveDate) -> u32 {
        match self.last_like_date {
            Some(day) if day == today => self.used,
            _ => 0,
        }
    }

    fn allowance(&self, today: NaiveDate) -> LikeAllowance {
        let used = self.used_on(today);
        let limit = self.tier.daily_like_limit();
        LikeAllowance {
            allowed: limit.is_none_or(|limit| used < limit),
            used,
            limit,
            date: today,
        }
    }
}

impl Database {
    pub fn can_user_like(&self, user_id: Uuid, today: NaiveDate) -> Result<LikeAllowance> {
        self.with_conn(|conn| Ok(load_counter(conn, user_id)?.allowance(today)))
    }

    /// Record a like, counting it against the liker's daily limit.
    ///
    /// Liking the same user twice is a no-op that does not use up the
    /// allowance.
    pub fn record_like(
        &self,
        liker_id: Uuid,
        likee_id: Uuid,
        today: NaiveDate,
    ) -> Result<LikeOutcome> {
        if liker_id == likee_id {
            return Err(DbError::InvalidLike);
        }

        self.with_tx(|tx| {
            let counter = load_counter(tx, liker_id)?;
            ensure_user(tx, likee_id)?;

            let (liker, likee) = (liker_id.to_string(), likee_id.to_string());
            let matched = like_exists(tx, &likee, &liker)?;

            if like_exists(tx, &liker, &likee)? {
                return Ok(LikeOutcome {
                    matched,
                    allowance: counter.allowance(today),
                });
            }

            let allowance = counter.allowance(today);
            if !allowance.allowed {
                return Err(DbError::LikeLimitReached {
                    limit: allowance.limit.unwrap_or_default(),
                });
            }

            tx.execute(
                "INSERT INTO likes (liker_id, likee_id, created_at) VALUES (?1, ?2, ?3)",
                (&liker, &likee, now_ts()),
            )?;

            let used = allowance.used + 1;
            tx.execute(
                "UPDATE users SET daily_likes_used = ?1, last_like_date = ?2 WHERE id = ?3",
                params![used, today.to_string(), &liker],
            )?;

            if matched {
                info!("Match between {} and {}", liker_id, likee_id);
            }

            Ok(LikeOutcome {
                matched,
                allowance: LikeCounter {
                    tier: counter.tier,
                    used,
                    last_like_date: Some(today),
                }
                .allowance(today),
            })
        })
    }

    /// Users the given user has a mutual like with, as `(id, username)`.
    pub fn list_matches(&self, user_id: Uuid) -> Result<Vec<(Uuid, String)>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT u.id, u.username
                 FROM likes mine
                 JOIN likes theirs
                   ON theirs.liker_id = mine.likee_id AND theirs.likee_id = mine.liker_id
                 JOIN users u ON u.id = mine.likee_id
                 WHERE mine.liker_id = ?1
                 ORDER BY u.username",
            )?;
            let rows = stmt
                .query_map([user_id.to_string()], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            rows.into_iter()
                .map(|(id, username)| Ok((parse_uuid(&id)?, username)))
                .collect()
        })
    }
}

fn load_counter(conn: &Connection, user_id: Uuid) -> Result<LikeCounter> {
    let row: Option<(String, u32, Option<String>)> = conn
        .query_row(
            "SELECT membership_tier, daily_likes_used, last_like_date FROM users WHERE id = ?1",
            [user_id.to_string()],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;

    let (tier, used, last) = row.ok_or(DbError::UserNotFound)?;
    Ok(LikeCounter {
        tier: tier
            .parse()
            .map_err(|e: amora_types::models::ParseEnumError| DbError::Corrupt(e.to_string()))?,
        used,
        last_like_date: last.as_deref().map(parse_date).transpose()?,
    })
}

fn like_exists(conn: &Connection, liker: &str, likee: &str) -> Result<bool> {
    Ok(conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM likes WHERE liker_id = ?1 AND likee_id = ?2)",
        [liker, likee],
        |row| row.get(0),
    )?)
}
