//! Affinity engine: per-character proficiency tracks (weapon/magic schools)
//! that level independently of character level. Tier experience grows
//! geometrically like the main curve but stays small enough for plain
//! integers; the bonus a tier grants is a flat 2% per tier applied by
//! combat when it asks for a weapon or magic affinity's bonus.

use crate::db::Db;
use crate::lock::{DistributedLock, LockError};
use crate::ratelimit::{RateLimitOutcome, RateLimiter};
use rusqlite::{params, OptionalExtension};
use std::sync::Arc;
use std::time::Duration;

const TIER_BASE: f64 = 100.0;
const TIER_SCALE: f64 = 1.2;
const BONUS_PER_TIER: f64 = 0.02;
/// Single awards above this are rejected outright as almost certainly a
/// client bug or an exploit rather than throttled like a burst would be.
const MAX_SINGLE_AWARD: i64 = 10_000;

pub fn tier_threshold(tier: i64) -> i64 {
    (TIER_BASE * TIER_SCALE.powi((tier - 1).max(0) as i32)).floor() as i64
}

pub fn bonus_for_tier(tier: i64) -> f64 {
    tier as f64 * BONUS_PER_TIER
}

#[derive(Debug, thiserror::Error)]
pub enum AffinityError {
    #[error("affinity not found")]
    NotFound,
    #[error("award of {0} exceeds the single-award ceiling")]
    AwardTooLarge(i64),
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error(transparent)]
    Db(#[from] rusqlite::Error),
    #[error(transparent)]
    Cache(#[from] crate::cache::CacheError),
}

#[derive(Debug, Clone)]
pub struct AffinityAwardResult {
    pub character_id: String,
    pub affinity_id: String,
    pub previous_tier: i64,
    pub new_tier: i64,
    pub experience: i64,
    pub tier_changed: bool,
}

pub struct AffinityEngine {
    db: Arc<Db>,
    lock: Arc<DistributedLock>,
    limiter: Arc<RateLimiter>,
}

impl AffinityEngine {
    pub fn new(db: Arc<Db>, lock: Arc<DistributedLock>, limiter: Arc<RateLimiter>) -> Self {
        Self { db, lock, limiter }
    }

    pub async fn award(&self, character_id: &str, affinity_id: &str, amount: i64, source: &str, now_ms: i64) -> Result<AffinityAwardResult, AffinityError> {
        if amount > MAX_SINGLE_AWARD {
            return Err(AffinityError::AwardTooLarge(amount));
        }

        let burst_profile = crate::config::LimiterProfile { max_events: 1, window_ms: 500 };
        let sustained_profile = crate::config::LimiterProfile { max_events: 10, window_ms: 60_000 };
        let subject = format!("affinity:{character_id}:{affinity_id}");
        match self.limiter.check(&format!("{subject}:burst"), burst_profile, now_ms).await? {
            RateLimitOutcome::Denied { retry_after_ms } => return Err(AffinityError::RateLimited { retry_after_ms }),
            RateLimitOutcome::Allowed { .. } => {}
        }
        match self.limiter.check(&format!("{subject}:sustained"), sustained_profile, now_ms).await? {
            RateLimitOutcome::Denied { retry_after_ms } => return Err(AffinityError::RateLimited { retry_after_ms }),
            RateLimitOutcome::Allowed { .. } => {}
        }

        let db = self.db.clone();
        let character_id_owned = character_id.to_string();
        let affinity_id_owned = affinity_id.to_string();
        let source = source.to_string();
        self.lock
            .with_lock(
                &format!("affinity:{character_id}:{affinity_id}"),
                Duration::from_secs(2),
                Duration::from_millis(500),
                move || async move { apply_award(&db, &character_id_owned, &affinity_id_owned, amount, &source) },
            )
            .await
    }
}

fn apply_award(db: &Db, character_id: &str, affinity_id: &str, amount: i64, source: &str) -> Result<AffinityAwardResult, AffinityError> {
    let conn = db.conn.lock().unwrap();
    let now = chrono::Utc::now().to_rfc3339();

    let existing: Option<(String, i64)> = conn
        .query_row(
            "SELECT experience, tier FROM character_affinities WHERE character_id = ?1 AND affinity_id = ?2",
            params![character_id, affinity_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;

    let (mut experience, mut tier) = match existing {
        Some((exp, tier)) => (exp.parse::<i64>().unwrap_or(0), tier),
        None => {
            conn.execute(
                "INSERT INTO character_affinities (character_id, affinity_id, experience, tier, last_updated) VALUES (?1, ?2, '0', 1, ?3)",
                params![character_id, affinity_id, now],
            )?;
            (0, 1)
        }
    };

    let previous_tier = tier;
    experience += amount;
    let max_tier: i64 = conn
        .query_row("SELECT max_tier FROM affinities WHERE id = ?1", params![affinity_id], |r| r.get(0))
        .optional()?
        .ok_or(AffinityError::NotFound)?;

    while tier < max_tier && experience >= tier_threshold(tier) {
        experience -= tier_threshold(tier);
        tier += 1;
    }

    conn.execute(
        "UPDATE character_affinities SET experience = ?1, tier = ?2, last_updated = ?3 WHERE character_id = ?4 AND affinity_id = ?5",
        params![experience.to_string(), tier, now, character_id, affinity_id],
    )?;
    conn.execute(
        "INSERT INTO affinity_experience_log (id, character_id, affinity_id, experience_awarded, source, previous_tier, new_tier, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![uuid::Uuid::new_v4().to_string(), character_id, affinity_id, amount.to_string(), source, previous_tier, tier, now],
    )?;

    Ok(AffinityAwardResult {
        character_id: character_id.to_string(),
        affinity_id: affinity_id.to_string(),
        previous_tier,
        new_tier: tier,
        experience,
        tier_changed: tier != previous_tier,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_threshold_grows_geometrically() {
        assert_eq!(tier_threshold(1), 100);
        assert!(tier_threshold(2) > tier_threshold(1));
        assert!(tier_threshold(5) > tier_threshold(2));
    }

    #[test]
    fn bonus_scales_linearly_with_tier() {
        assert!((bonus_for_tier(1) - 0.02).abs() < 1e-9);
        assert!((bonus_for_tier(7) - 0.14).abs() < 1e-9);
    }
}
