//! Zone engine: the static map graph (zones and their exits) plus the live
//! occupancy index that `look` and the connection layer's presence view
//! read from. Zone/exit rows rarely change once seeded, so they sit behind
//! a short cache TTL; occupancy is cache-only and never touches SQLite.

use crate::cache::{self, KvCache};
use crate::db::Db;
use crate::models::{Direction, Zone, ZoneExit};
use std::sync::Arc;

const ZONE_CACHE_TTL_SECS: u64 = 300;

fn occupancy_key(zone_id: &str) -> String {
    format!("zone:occupants:{zone_id}")
}

#[derive(Debug, thiserror::Error)]
pub enum ZoneError {
    #[error("zone not found")]
    NotFound,
    #[error(transparent)]
    Db(#[from] rusqlite::Error),
}

#[derive(Debug, Clone)]
pub struct LookResult {
    pub zone: Zone,
    pub exits: Vec<ZoneExit>,
    pub occupants: Vec<String>,
}

pub struct ZoneEngine {
    db: Arc<Db>,
    cache: Arc<dyn KvCache>,
}

impl ZoneEngine {
    pub fn new(db: Arc<Db>, cache: Arc<dyn KvCache>) -> Self {
        Self { db, cache }
    }

    pub async fn get_zone(&self, zone_id: &str) -> Result<Zone, ZoneError> {
        let key = format!("zone:meta:{zone_id}");
        if let Some(zone) = cache::get::<Zone>(self.cache.as_ref(), &key).await {
            return Ok(zone);
        }
        let zone = self.load_zone(zone_id)?;
        let _ = cache::set(self.cache.as_ref(), &key, &zone, ZONE_CACHE_TTL_SECS).await;
        Ok(zone)
    }

    fn load_zone(&self, zone_id: &str) -> Result<Zone, ZoneError> {
        let conn = self.db.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, internal_name, zone_type, level_min, level_max, pvp_enabled, safe_zone, climate, terrain, lighting, map_x, map_y, map_layer, spawn_rate
             FROM zones WHERE id = ?1",
            rusqlite::params![zone_id],
            row_to_zone,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => ZoneError::NotFound,
            other => ZoneError::Db(other),
        })
    }

    pub fn exits(&self, zone_id: &str) -> Result<Vec<ZoneExit>, ZoneError> {
        let conn = self.db.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT from_zone, to_zone, direction, exit_type, visible, locked, lock_type, required_level, required_item, travel_message
             FROM zone_exits WHERE from_zone = ?1",
        )?;
        let rows = stmt.query_map(rusqlite::params![zone_id], row_to_exit)?;
        Ok(rows.filter_map(Result::ok).collect())
    }

    pub fn exit_for_direction(&self, zone_id: &str, direction: Direction) -> Result<Option<ZoneExit>, ZoneError> {
        let conn = self.db.conn.lock().unwrap();
        conn.query_row(
            "SELECT from_zone, to_zone, direction, exit_type, visible, locked, lock_type, required_level, required_item, travel_message
             FROM zone_exits WHERE from_zone = ?1 AND direction = ?2",
            rusqlite::params![zone_id, direction.as_str()],
            row_to_exit,
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(ZoneError::Db(other)),
        })
    }

    pub async fn look(&self, zone_id: &str) -> Result<LookResult, ZoneError> {
        let zone = self.get_zone(zone_id).await?;
        let exits = self.exits(zone_id)?.into_iter().filter(|e| e.visible).collect();
        let occupants = self.occupants(zone_id).await;
        Ok(LookResult { zone, exits, occupants })
    }

    pub async fn occupants(&self, zone_id: &str) -> Vec<String> {
        self.cache.smembers(&occupancy_key(zone_id)).await
    }

    pub async fn enter(&self, zone_id: &str, character_id: &str) {
        let _ = self.cache.sadd(&occupancy_key(zone_id), character_id).await;
    }

    pub async fn leave(&self, zone_id: &str, character_id: &str) {
        let _ = self.cache.srem(&occupancy_key(zone_id), character_id).await;
    }
}

fn row_to_zone(row: &rusqlite::Row) -> Result<Zone, rusqlite::Error> {
    let zone_type: String = row.get(2)?;
    Ok(Zone {
        id: row.get(0)?,
        internal_name: row.get(1)?,
        zone_type: parse_zone_type(&zone_type),
        level_min: row.get(3)?,
        level_max: row.get(4)?,
        pvp_enabled: row.get::<_, i64>(5)? != 0,
        safe_zone: row.get::<_, i64>(6)? != 0,
        climate: row.get(7)?,
        terrain: row.get(8)?,
        lighting: row.get(9)?,
        map_x: row.get(10)?,
        map_y: row.get(11)?,
        map_layer: row.get(12)?,
        spawn_rate: row.get(13)?,
    })
}

fn row_to_exit(row: &rusqlite::Row) -> Result<ZoneExit, rusqlite::Error> {
    let direction: String = row.get(2)?;
    let exit_type: String = row.get(3)?;
    Ok(ZoneExit {
        from_zone: row.get(0)?,
        to_zone: row.get(1)?,
        direction: Direction::parse(&direction).unwrap_or(Direction::North),
        exit_type: parse_exit_type(&exit_type),
        visible: row.get::<_, i64>(4)? != 0,
        locked: row.get::<_, i64>(5)? != 0,
        lock_type: row.get(6)?,
        required_level: row.get(7)?,
        required_item: row.get(8)?,
        travel_message: row.get(9)?,
    })
}

fn parse_zone_type(s: &str) -> crate::models::ZoneType {
    use crate::models::ZoneType::*;
    match s {
        "city" => City,
        "cave" => Cave,
        "dungeon" => Dungeon,
        "tower" => Tower,
        "arena" => Arena,
        "guildhall" => GuildHall,
        "instance" => Instance,
        "wilderness" => Wilderness,
        _ => Normal,
    }
}

fn parse_exit_type(s: &str) -> crate::models::ExitType {
    use crate::models::ExitType::*;
    match s {
        "door" => Door,
        "portal" => Portal,
        "teleporter" => Teleporter,
        "hidden" => Hidden,
        "magical" => Magical,
        "ladder" => Ladder,
        "stairs" => Stairs,
        _ => Normal,
    }
}
