use crate::error::Surface;
use crate::models::ExperienceSource;
use crate::progression::{self, ProgressionError};
use crate::routes::Authenticated;
use crate::AppState;
use num_bigint::BigUint;
use rocket::serde::json::Json;
use rocket::{get, post, State};
use serde::Deserialize;
use std::sync::Arc;

impl From<ProgressionError> for Surface {
    fn from(e: ProgressionError) -> Self {
        match e {
            ProgressionError::NotFound => Surface::not_found("character not found"),
            ProgressionError::Deleted => Surface::gated("Deleted", "character has been deleted", None),
            ProgressionError::Lock(_) => Surface::transient("lock service unavailable"),
            ProgressionError::Db(e) => Surface::from(e),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AwardRequest {
    pub character_id: String,
    pub amount: String,
    pub race_bonus_pct: u64,
    pub source: ExperienceSource,
}

#[post("/api/v1/progression/award", data = "<body>")]
pub async fn award(state: &State<Arc<AppState>>, _auth: Authenticated, body: Json<AwardRequest>) -> Result<Json<serde_json::Value>, Surface> {
    let amount: BigUint = body.amount.parse().map_err(|_| Surface::validation("amount must be a non-negative integer"))?;
    let result = state.progression.award(&body.character_id, amount, body.race_bonus_pct, body.source).await?;
    Ok(Json(serde_json::json!({
        "character_id": result.character_id,
        "awarded": result.awarded.to_string(),
        "levels_gained": result.levels_gained,
        "new_level": result.new_level,
        "new_experience": result.new_experience.to_string(),
        "stat_points_awarded": result.stat_points_awarded,
        "milestones_reached": result.milestones_reached,
        "phase_changed": result.phase_changed,
        "titles_gained": result.titles_gained,
    })))
}

#[get("/api/v1/progression/phases")]
pub fn phases(_auth: Authenticated) -> Json<serde_json::Value> {
    let phases: Vec<_> = progression::all_phases()
        .iter()
        .map(|p| serde_json::json!({ "name": p.name, "min_level": p.min_level, "bonus_multiplier_pct": p.bonus_multiplier_pct, "title": p.title, "stat_points_per_level": p.stat_points_per_level }))
        .collect();
    Json(serde_json::json!({ "phases": phases }))
}

#[get("/api/v1/progression/curve?<from>&<to>")]
pub fn curve(_auth: Authenticated, from: i64, to: i64) -> Result<Json<serde_json::Value>, Surface> {
    if to < from || to - from > 100 {
        return Err(Surface::validation("curve range must be at most 100 levels"));
    }
    let entries: Vec<_> = (from..=to)
        .map(|level| serde_json::json!({ "level": level, "exp_required": progression::exp_required_for_level(level).to_string() }))
        .collect();
    Ok(Json(serde_json::json!({ "entries": entries })))
}

#[get("/api/v1/progression/level_for_experience?<experience>")]
pub fn level_for_experience(_auth: Authenticated, experience: String) -> Result<Json<serde_json::Value>, Surface> {
    let mut remaining: BigUint = experience.parse().map_err(|_| Surface::validation("experience must be a non-negative integer"))?;
    let mut level = 1i64;
    loop {
        let required = progression::exp_required_for_level(level);
        if remaining < required {
            break;
        }
        remaining -= required;
        level += 1;
    }
    Ok(Json(serde_json::json!({ "level": level, "remainder": remaining.to_string() })))
}
