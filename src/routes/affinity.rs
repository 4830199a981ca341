use crate::affinity::{self, AffinityError};
use crate::error::Surface;
use crate::models::{Affinity, CharacterAffinity};
use crate::routes::Authenticated;
use crate::AppState;
use rocket::serde::json::Json;
use rocket::{get, post, State};
use rusqlite::params;
use serde::Deserialize;
use std::sync::Arc;

impl From<AffinityError> for Surface {
    fn from(e: AffinityError) -> Self {
        match e {
            AffinityError::NotFound => Surface::not_found("affinity not found"),
            AffinityError::AwardTooLarge(amount) => Surface::validation(format!("award of {amount} exceeds the single-award ceiling")),
            AffinityError::RateLimited { retry_after_ms } => Surface::rate_limited(retry_after_ms),
            AffinityError::Lock(_) => Surface::transient("lock service unavailable"),
            AffinityError::Db(e) => Surface::from(e),
            AffinityError::Cache(_) => Surface::transient("cache unavailable"),
        }
    }
}

#[get("/api/v1/characters/<character_id>/affinities")]
pub fn list_for_character(state: &State<Arc<AppState>>, _auth: Authenticated, character_id: &str) -> Result<Json<Vec<CharacterAffinity>>, Surface> {
    let conn = state.db.conn.lock().unwrap();
    let mut stmt = conn.prepare(
        "SELECT character_id, affinity_id, experience, tier, last_updated FROM character_affinities WHERE character_id = ?1 ORDER BY affinity_id",
    )?;
    let rows = stmt.query_map(params![character_id], |row| {
        Ok(CharacterAffinity {
            character_id: row.get(0)?,
            affinity_id: row.get(1)?,
            experience: row.get(2)?,
            tier: row.get(3)?,
            last_updated: row.get(4)?,
        })
    })?;
    Ok(Json(rows.filter_map(Result::ok).collect()))
}

#[get("/api/v1/affinities")]
pub fn all(state: &State<Arc<AppState>>, _auth: Authenticated) -> Result<Json<Vec<Affinity>>, Surface> {
    let conn = state.db.conn.lock().unwrap();
    let mut stmt = conn.prepare("SELECT id, name, affinity_type, max_tier FROM affinities ORDER BY name")?;
    let rows = stmt.query_map([], |r| {
        Ok(Affinity { id: r.get(0)?, name: r.get(1)?, affinity_type: r.get(2)?, max_tier: r.get(3)? })
    })?;
    Ok(Json(rows.filter_map(Result::ok).collect()))
}

#[get("/api/v1/characters/<character_id>/affinities/<affinity_id>")]
pub fn get_one(state: &State<Arc<AppState>>, _auth: Authenticated, character_id: &str, affinity_id: &str) -> Result<Json<CharacterAffinity>, Surface> {
    let conn = state.db.conn.lock().unwrap();
    conn.query_row(
        "SELECT character_id, affinity_id, experience, tier, last_updated FROM character_affinities WHERE character_id = ?1 AND affinity_id = ?2",
        params![character_id, affinity_id],
        |row| {
            Ok(CharacterAffinity {
                character_id: row.get(0)?,
                affinity_id: row.get(1)?,
                experience: row.get(2)?,
                tier: row.get(3)?,
                last_updated: row.get(4)?,
            })
        },
    )
    .map(Json)
    .map_err(|_| Surface::not_found("character has no progress in that affinity"))
}

#[get("/api/v1/characters/<character_id>/affinities/<affinity_id>/bonus")]
pub fn bonus(state: &State<Arc<AppState>>, _auth: Authenticated, character_id: &str, affinity_id: &str) -> Result<Json<serde_json::Value>, Surface> {
    let tier: i64 = {
        let conn = state.db.conn.lock().unwrap();
        conn.query_row(
            "SELECT tier FROM character_affinities WHERE character_id = ?1 AND affinity_id = ?2",
            params![character_id, affinity_id],
            |r| r.get(0),
        )
        .unwrap_or(0)
    };
    Ok(Json(serde_json::json!({ "tier": tier, "bonus": affinity::bonus_for_tier(tier) })))
}

#[derive(Debug, Deserialize)]
pub struct AwardAffinityRequest {
    pub character_id: String,
    pub affinity_id: String,
    pub amount: i64,
    pub source: String,
}

#[post("/api/v1/affinities/award", data = "<body>")]
pub async fn award(state: &State<Arc<AppState>>, _auth: Authenticated, body: Json<AwardAffinityRequest>) -> Result<Json<serde_json::Value>, Surface> {
    let now_ms = chrono::Utc::now().timestamp_millis();
    let result = state.affinity.award(&body.character_id, &body.affinity_id, body.amount, &body.source, now_ms).await?;
    Ok(Json(serde_json::json!({
        "character_id": result.character_id,
        "affinity_id": result.affinity_id,
        "previous_tier": result.previous_tier,
        "new_tier": result.new_tier,
        "experience": result.experience,
        "tier_changed": result.tier_changed,
    })))
}
