//! Movement engine. Normal movement walks the zone exit graph one step at a
//! time and is rate-limited and cooldown-gated; teleport-class movement
//! (recall/summon/admin teleport) writes the same location record but skips
//! the exit lookup and cooldown since nothing walked anywhere.
//!
//! Item-gated exits ask a caller-supplied predicate rather than reaching
//! into an inventory system this crate doesn't own.

use crate::db::Db;
use crate::lock::{DistributedLock, LockError};
use crate::models::{CharacterStatus, Direction, MovementType};
use crate::ratelimit::{RateLimitOutcome, RateLimiter};
use crate::zone::{ZoneEngine, ZoneError};
use rusqlite::{params, OptionalExtension};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum MovementError {
    #[error("character not found")]
    NotFound,
    #[error("character is dead or busy")]
    NotNormal,
    #[error("there is no exit in that direction")]
    NoExit,
    #[error("moving too quickly, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },
    #[error("that exit is locked")]
    Locked,
    #[error("requires level {required}, character is level {actual}")]
    LevelTooLow { required: i64, actual: i64 },
    #[error("requires an item this character doesn't have")]
    MissingItem,
    #[error(transparent)]
    Zone(#[from] ZoneError),
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error(transparent)]
    Db(#[from] rusqlite::Error),
    #[error(transparent)]
    Cache(#[from] crate::cache::CacheError),
}

#[derive(Debug, Clone)]
pub struct MovementResult {
    pub character_id: String,
    pub from_zone: Option<String>,
    pub to_zone: String,
    pub movement_type: MovementType,
}

pub struct MovementEngine {
    db: Arc<Db>,
    zones: Arc<ZoneEngine>,
    lock: Arc<DistributedLock>,
    limiter: Arc<RateLimiter>,
}

impl MovementEngine {
    pub fn new(db: Arc<Db>, zones: Arc<ZoneEngine>, lock: Arc<DistributedLock>, limiter: Arc<RateLimiter>) -> Self {
        Self { db, zones, lock, limiter }
    }

    /// Normal directional movement: exit lookup, cooldown, lock/level/item
    /// gates, in that order, then the transactional commit.
    pub async fn move_character(
        &self,
        character_id: &str,
        direction: Direction,
        now_ms: i64,
        has_item: impl Fn(&str, &str) -> bool,
    ) -> Result<MovementResult, MovementError> {
        let (status, level, current_zone) = self.load_character_state(character_id)?;
        if status != CharacterStatus::Normal {
            return Err(MovementError::NotNormal);
        }

        let exit = self.zones.exit_for_direction(&current_zone, direction)?.ok_or(MovementError::NoExit)?;

        let profile = crate::config::LimiterProfile { max_events: 2, window_ms: 1000 };
        if let RateLimitOutcome::Denied { retry_after_ms } = self.limiter.check(&format!("movement:{character_id}"), profile, now_ms).await? {
            return Err(MovementError::RateLimited { retry_after_ms });
        }

        if exit.locked {
            return Err(MovementError::Locked);
        }
        if level < exit.required_level {
            return Err(MovementError::LevelTooLow { required: exit.required_level, actual: level });
        }
        if let Some(item) = &exit.required_item {
            if !has_item(character_id, item) {
                return Err(MovementError::MissingItem);
            }
        }

        let db = self.db.clone();
        let zones = self.zones.clone();
        let character_id_owned = character_id.to_string();
        let to_zone = exit.to_zone.clone();
        let from_zone = Some(current_zone.clone());
        let direction_label = Some(direction.as_str().to_string());
        self.lock
            .with_lock(&format!("move:{character_id}"), Duration::from_secs(2), Duration::from_millis(500), move || async move {
                let result = commit_move(&db, &character_id_owned, from_zone.as_deref(), &to_zone, direction_label.as_deref(), MovementType::Normal)?;
                zones.leave(result.from_zone.as_deref().unwrap_or(""), &character_id_owned).await;
                zones.enter(&result.to_zone, &character_id_owned).await;
                Ok(result)
            })
            .await
    }

    /// Teleport-class movement bypasses the exit graph and cooldown entirely;
    /// it still goes through the same per-character lock and location commit.
    pub async fn teleport(&self, character_id: &str, to_zone: &str, movement_type: MovementType) -> Result<MovementResult, MovementError> {
        let (_, _, current_zone) = self.load_character_state(character_id)?;
        let db = self.db.clone();
        let zones = self.zones.clone();
        let character_id_owned = character_id.to_string();
        let to_zone = to_zone.to_string();
        let from_zone = Some(current_zone);
        self.lock
            .with_lock(&format!("move:{character_id}"), Duration::from_secs(2), Duration::from_millis(500), move || async move {
                let result = commit_move(&db, &character_id_owned, from_zone.as_deref(), &to_zone, None, movement_type)?;
                zones.leave(result.from_zone.as_deref().unwrap_or(""), &character_id_owned).await;
                zones.enter(&result.to_zone, &character_id_owned).await;
                Ok(result)
            })
            .await
    }

    fn load_character_state(&self, character_id: &str) -> Result<(CharacterStatus, i64, String), MovementError> {
        let conn = self.db.conn.lock().unwrap();
        let row: Option<(String, i64, String)> = conn
            .query_row(
                "SELECT status, level, current_zone_id FROM characters WHERE id = ?1 AND deleted_at IS NULL",
                params![character_id],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .optional()?;
        let (status, level, zone) = row.ok_or(MovementError::NotFound)?;
        Ok((parse_status(&status), level, zone))
    }
}

fn commit_move(db: &Db, character_id: &str, from_zone: Option<&str>, to_zone: &str, direction: Option<&str>, movement_type: MovementType) -> Result<MovementResult, MovementError> {
    let conn = db.conn.lock().unwrap();
    let now = chrono::Utc::now().to_rfc3339();

    conn.execute("UPDATE characters SET current_zone_id = ?1, x = 0, y = 0 WHERE id = ?2", params![to_zone, character_id])?;
    conn.execute(
        "INSERT INTO character_locations (character_id, zone_id, instance_id, x, y, last_movement, total_moves, distance_traveled)
         VALUES (?1, ?2, NULL, 0, 0, ?3, 1, 1)
         ON CONFLICT(character_id) DO UPDATE SET
            zone_id = excluded.zone_id, x = 0, y = 0, last_movement = excluded.last_movement,
            total_moves = total_moves + 1, distance_traveled = distance_traveled + 1",
        params![character_id, to_zone, now],
    )?;
    conn.execute(
        "INSERT OR IGNORE INTO unique_zones_visited (character_id, zone_id) VALUES (?1, ?2)",
        params![character_id, to_zone],
    )?;
    conn.execute(
        "INSERT INTO movement_log (id, character_id, from_zone, to_zone, direction, movement_type, travel_time_ms, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7)",
        params![uuid::Uuid::new_v4().to_string(), character_id, from_zone, to_zone, direction, format!("{movement_type:?}").to_lowercase(), now],
    )?;

    Ok(MovementResult {
        character_id: character_id.to_string(),
        from_zone: from_zone.map(str::to_string),
        to_zone: to_zone.to_string(),
        movement_type,
    })
}

fn parse_status(s: &str) -> CharacterStatus {
    use CharacterStatus::*;
    match s {
        "combat" => Combat,
        "dead" => Dead,
        "busy" => Busy,
        _ => Normal,
    }
}
