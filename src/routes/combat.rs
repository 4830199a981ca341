use crate::combat::{CombatError, ParticipantInit};
use crate::error::Surface;
use crate::models::{ActionType, CombatSessionType, ParticipantType, Side};
use crate::routes::Authenticated;
use crate::AppState;
use rocket::serde::json::Json;
use rocket::{get, post, State};
use rusqlite::params;
use serde::Deserialize;
use std::sync::Arc;

impl From<CombatError> for Surface {
    fn from(e: CombatError) -> Self {
        match e {
            CombatError::NotFound => Surface::not_found("combat session not found"),
            CombatError::NotActive => Surface::gated("NotActive", "combat session is not active", None),
            CombatError::NotYourTurn => Surface::gated("NotYourTurn", "it is not this participant's turn", None),
            CombatError::ParticipantIncapacitated => Surface::gated("ParticipantIncapacitated", "participant is not able to act", None),
            CombatError::OnCooldown => Surface::gated("OnCooldown", "action is still on cooldown", None),
            CombatError::TargetRequired => Surface::validation("target is required for this action"),
            CombatError::TargetNotFound => Surface::not_found("target not found in this session"),
            CombatError::TargetIncapacitated => Surface::gated("TargetIncapacitated", "target is not able to be targeted", None),
            CombatError::InsufficientMp => Surface::gated("InsufficientMp", "not enough mp", None),
            CombatError::RateLimited { retry_after_ms } => Surface::rate_limited(retry_after_ms),
            CombatError::Lock(_) => Surface::transient("lock service unavailable"),
            CombatError::Db(e) => Surface::from(e),
            CombatError::Cache(_) => Surface::transient("cache unavailable"),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ParticipantSpec {
    pub character_id: Option<String>,
    pub participant_type: ParticipantType,
    pub side: Side,
    pub max_hp: i64,
    pub max_mp: i64,
    pub str_stat: i64,
    pub vit: i64,
    pub dex: i64,
    pub int_stat: i64,
    pub wis: i64,
    pub level: i64,
}

#[derive(Debug, Deserialize)]
pub struct StartRequest {
    pub session_type: CombatSessionType,
    pub initiator: String,
    pub target: Option<String>,
    pub zone_id: String,
    pub participants: Vec<ParticipantSpec>,
}

#[post("/api/v1/combat/start", data = "<body>")]
pub fn start(state: &State<Arc<AppState>>, _auth: Authenticated, body: Json<StartRequest>) -> Result<Json<serde_json::Value>, Surface> {
    let participants = body
        .participants
        .iter()
        .map(|p| ParticipantInit {
            character_id: p.character_id.clone(),
            participant_type: p.participant_type,
            side: p.side,
            max_hp: p.max_hp,
            max_mp: p.max_mp,
            str_stat: p.str_stat,
            vit: p.vit,
            dex: p.dex,
            int_stat: p.int_stat,
            wis: p.wis,
            level: p.level,
        })
        .collect();
    let session_id = state.combat.start(body.session_type, &body.initiator, body.target.as_deref(), &body.zone_id, participants)?;
    Ok(Json(serde_json::json!({ "session_id": session_id })))
}

#[derive(Debug, Deserialize)]
pub struct ActionRequest {
    pub participant_id: String,
    pub action_type: ActionType,
    pub target_id: Option<String>,
}

#[post("/api/v1/combat/<session_id>/action", data = "<body>")]
pub async fn action(state: &State<Arc<AppState>>, _auth: Authenticated, session_id: &str, body: Json<ActionRequest>) -> Result<Json<serde_json::Value>, Surface> {
    let now_ms = chrono::Utc::now().timestamp_millis();
    let outcome = state.combat.action(session_id, &body.participant_id, body.action_type, body.target_id.as_deref(), now_ms).await?;
    Ok(Json(serde_json::json!({
        "actor_id": outcome.actor_id,
        "target_id": outcome.target_id,
        "damage": outcome.damage,
        "healing": outcome.healing,
        "is_critical": outcome.is_critical,
        "is_blocked": outcome.is_blocked,
        "is_missed": outcome.is_missed,
        "target_defeated": outcome.target_defeated,
        "session_ended": outcome.session_ended,
    })))
}

#[derive(Debug, Deserialize)]
pub struct FleeRequest {
    pub participant_id: String,
}

#[post("/api/v1/combat/<session_id>/flee", data = "<body>")]
pub async fn flee(state: &State<Arc<AppState>>, _auth: Authenticated, session_id: &str, body: Json<FleeRequest>) -> Result<Json<serde_json::Value>, Surface> {
    let succeeded = state.combat.flee(session_id, &body.participant_id).await?;
    Ok(Json(serde_json::json!({ "succeeded": succeeded })))
}

#[get("/api/v1/combat/<session_id>")]
pub fn get(state: &State<Arc<AppState>>, _auth: Authenticated, session_id: &str) -> Result<Json<serde_json::Value>, Surface> {
    let conn = state.db.conn.lock().unwrap();
    conn.query_row(
        "SELECT id, session_type, status, initiator, target, zone_id, turn_order, current_turn, turn_number, started_at, ended_at, winner
         FROM combat_sessions WHERE id = ?1",
        params![session_id],
        |r| {
            Ok(serde_json::json!({
                "id": r.get::<_, String>(0)?,
                "session_type": r.get::<_, String>(1)?,
                "status": r.get::<_, String>(2)?,
                "initiator": r.get::<_, String>(3)?,
                "target": r.get::<_, Option<String>>(4)?,
                "zone_id": r.get::<_, String>(5)?,
                "turn_order": r.get::<_, String>(6)?,
                "current_turn": r.get::<_, i64>(7)?,
                "turn_number": r.get::<_, i64>(8)?,
                "started_at": r.get::<_, Option<String>>(9)?,
                "ended_at": r.get::<_, Option<String>>(10)?,
                "winner": r.get::<_, Option<String>>(11)?,
            }))
        },
    )
    .map(Json)
    .map_err(|_| Surface::not_found("combat session not found"))
}

#[get("/api/v1/characters/<character_id>/combat/active")]
pub fn active(state: &State<Arc<AppState>>, _auth: Authenticated, character_id: &str) -> Result<Json<serde_json::Value>, Surface> {
    let conn = state.db.conn.lock().unwrap();
    let session_id: Option<String> = conn
        .query_row(
            "SELECT cs.id FROM combat_sessions cs
             JOIN combat_participants cp ON cp.session_id = cs.id
             WHERE cp.character_id = ?1 AND cs.status = 'active'
             ORDER BY cs.started_at DESC LIMIT 1",
            params![character_id],
            |r| r.get(0),
        )
        .ok();
    Ok(Json(serde_json::json!({ "session_id": session_id })))
}
