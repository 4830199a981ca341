use crate::error::Surface;
use crate::models::Direction;
use crate::movement::MovementError;
use crate::routes::Authenticated;
use crate::zone::ZoneError;
use crate::AppState;
use rocket::serde::json::Json;
use rocket::{get, post, State};
use rusqlite::params;
use serde::Deserialize;
use std::sync::Arc;

impl From<ZoneError> for Surface {
    fn from(e: ZoneError) -> Self {
        match e {
            ZoneError::NotFound => Surface::not_found("zone not found"),
            ZoneError::Db(e) => Surface::from(e),
        }
    }
}

impl From<MovementError> for Surface {
    fn from(e: MovementError) -> Self {
        match e {
            MovementError::NotFound => Surface::not_found("character not found"),
            MovementError::NotNormal => Surface::gated("NotNormal", "character is dead or busy", None),
            MovementError::NoExit => Surface::validation("there is no exit in that direction"),
            MovementError::RateLimited { retry_after_ms } => Surface::rate_limited(retry_after_ms),
            MovementError::Locked => Surface::gated("Locked", "that exit is locked", None),
            MovementError::LevelTooLow { required, actual } => {
                Surface::gated("LevelTooLow", format!("requires level {required}"), Some(serde_json::json!({ "required": required, "actual": actual })))
            }
            MovementError::MissingItem => Surface::gated("MissingItem", "requires an item this character doesn't have", None),
            MovementError::Zone(e) => Surface::from(e),
            MovementError::Lock(_) => Surface::transient("lock service unavailable"),
            MovementError::Db(e) => Surface::from(e),
            MovementError::Cache(_) => Surface::transient("cache unavailable"),
        }
    }
}

#[get("/api/v1/characters/<character_id>/look")]
pub async fn look(state: &State<Arc<AppState>>, _auth: Authenticated, character_id: &str) -> Result<Json<serde_json::Value>, Surface> {
    let zone_id: String = {
        let conn = state.db.conn.lock().unwrap();
        conn.query_row("SELECT current_zone_id FROM characters WHERE id = ?1 AND deleted_at IS NULL", [character_id], |r| r.get(0))
            .map_err(|_| Surface::not_found("character not found"))?
    };
    let result = state.zones.look(&zone_id).await?;
    Ok(Json(serde_json::json!({
        "zone": result.zone,
        "exits": result.exits,
        "occupants": result.occupants,
    })))
}

#[derive(Debug, Deserialize)]
pub struct MoveRequest {
    pub direction: String,
}

#[post("/api/v1/characters/<character_id>/move", data = "<body>")]
pub async fn move_character(
    state: &State<Arc<AppState>>,
    _auth: Authenticated,
    character_id: &str,
    body: Json<MoveRequest>,
) -> Result<Json<serde_json::Value>, Surface> {
    let Some(direction) = Direction::parse(&body.direction) else {
        return Err(Surface::validation("unrecognized direction"));
    };
    let now_ms = chrono::Utc::now().timestamp_millis();
    let result = state.movement.move_character(character_id, direction, now_ms, |_, _| true).await?;
    Ok(Json(serde_json::json!({ "from_zone": result.from_zone, "to_zone": result.to_zone })))
}

#[get("/api/v1/characters/<character_id>/location")]
pub fn location(state: &State<Arc<AppState>>, _auth: Authenticated, character_id: &str) -> Result<Json<serde_json::Value>, Surface> {
    let conn = state.db.conn.lock().unwrap();
    conn.query_row(
        "SELECT current_zone_id, x, y FROM characters WHERE id = ?1 AND deleted_at IS NULL",
        params![character_id],
        |r| {
            Ok(serde_json::json!({
                "zone_id": r.get::<_, String>(0)?,
                "x": r.get::<_, i64>(1)?,
                "y": r.get::<_, i64>(2)?,
            }))
        },
    )
    .map(Json)
    .map_err(|_| Surface::not_found("character not found"))
}

#[get("/api/v1/characters/<character_id>/movement_history?<limit>&<offset>")]
pub fn movement_history(
    state: &State<Arc<AppState>>,
    _auth: Authenticated,
    character_id: &str,
    limit: Option<i64>,
    offset: Option<i64>,
) -> Result<Json<Vec<serde_json::Value>>, Surface> {
    let limit = limit.unwrap_or(50).clamp(1, 200);
    let offset = offset.unwrap_or(0).max(0);
    let conn = state.db.conn.lock().unwrap();
    let mut stmt = conn.prepare(
        "SELECT id, from_zone, to_zone, direction, movement_type, travel_time_ms, created_at
         FROM movement_log WHERE character_id = ?1 ORDER BY created_at DESC LIMIT ?2 OFFSET ?3",
    )?;
    let rows = stmt.query_map(params![character_id, limit, offset], |r| {
        Ok(serde_json::json!({
            "id": r.get::<_, String>(0)?,
            "from_zone": r.get::<_, Option<String>>(1)?,
            "to_zone": r.get::<_, String>(2)?,
            "direction": r.get::<_, Option<String>>(3)?,
            "movement_type": r.get::<_, String>(4)?,
            "travel_time_ms": r.get::<_, i64>(5)?,
            "created_at": r.get::<_, String>(6)?,
        }))
    })?;
    Ok(Json(rows.filter_map(Result::ok).collect()))
}

#[derive(Debug, Deserialize)]
pub struct TeleportRequest {
    pub zone_id: String,
}

#[post("/api/v1/characters/<character_id>/teleport", data = "<body>")]
pub async fn teleport(state: &State<Arc<AppState>>, auth: Authenticated, character_id: &str, body: Json<TeleportRequest>) -> Result<Json<serde_json::Value>, Surface> {
    if auth.account.role != crate::models::Role::Admin {
        return Err(Surface::forbidden("teleport is restricted to administrators"));
    }
    let result = state.movement.teleport(character_id, &body.zone_id, crate::models::MovementType::Teleport).await?;
    Ok(Json(serde_json::json!({ "from_zone": result.from_zone, "to_zone": result.to_zone })))
}
