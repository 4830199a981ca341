//! Connection layer: one bidirectional socket per authenticated session,
//! funneled through a single dispatch point so every inbound frame gets the
//! same rate-limit check, schema validation, and bus fan-out regardless of
//! which engine it ends up calling. Disconnect/reconnect never replays from
//! a log — room membership is reconstructed from the character's current
//! location and combat session each time a socket opens.

use crate::bus::Room;
use crate::models::Direction;
use crate::AppState;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

fn presence_key(account_id: &str) -> String {
    format!("presence:{account_id}")
}

const PRESENCE_TTL_SECS: u64 = 3600;

#[derive(Debug, Deserialize)]
#[serde(tag = "op", content = "payload", rename_all = "snake_case")]
pub enum InboundFrame {
    Look,
    Move { direction: String },
    CombatAction { session_id: String, participant_id: String, action_type: String, target_id: Option<String> },
    Chat { message: String },
}

#[derive(Debug, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum OutboundFrame {
    Ack,
    Error { code: &'static str, message: String },
    LookResult { zone_id: String, occupants: Vec<String> },
    Moved { to_zone: String },
    CombatResult { damage: i64, healing: i64, is_critical: bool, is_missed: bool, session_ended: bool },
    Chat { account_id: String, message: String },
}

pub struct ConnectionContext {
    pub account_id: String,
    pub character_id: Option<String>,
    rooms: HashSet<Room>,
    state: Arc<AppState>,
}

impl ConnectionContext {
    pub async fn open(state: Arc<AppState>, account_id: String, character_id: Option<String>) -> Self {
        let _ = crate::cache::set(state.cache.as_ref(), &presence_key(&account_id), &true, PRESENCE_TTL_SECS).await;
        let mut rooms = HashSet::new();
        rooms.insert(Room::User(account_id.clone()));
        if let Some(character_id) = &character_id {
            rooms.insert(Room::Character(character_id.clone()));
            if let Ok(zone_id) = current_zone_of(&state, character_id) {
                rooms.insert(Room::Zone(zone_id));
            }
        }
        Self { account_id, character_id, rooms, state }
    }

    pub fn rooms(&self) -> &HashSet<Room> {
        &self.rooms
    }

    pub async fn close(&self) {
        let _ = self.state.cache.delete(&presence_key(&self.account_id)).await;
    }

    /// The single funnel every inbound frame passes through: rate limit,
    /// then the matching engine call, then a reply the caller sends back
    /// over the socket. Side effects the engine produces (zone broadcasts,
    /// combat turn notifications) go out over the bus, not the reply.
    pub async fn dispatch(&mut self, frame: InboundFrame, now_ms: i64) -> OutboundFrame {
        let profile = self.state.settings.limiter_chat;
        let subject = format!("conn:{}", self.account_id);
        match self.state.rate_limiter.check(&subject, profile, now_ms).await {
            Ok(crate::ratelimit::RateLimitOutcome::Denied { retry_after_ms }) => {
                return OutboundFrame::Error { code: "RateLimited", message: format!("retry after {retry_after_ms}ms") };
            }
            Err(e) => return OutboundFrame::Error { code: "TransientDependencyError", message: e.to_string() },
            _ => {}
        }

        match frame {
            InboundFrame::Look => self.handle_look().await,
            InboundFrame::Move { direction } => self.handle_move(&direction, now_ms).await,
            InboundFrame::CombatAction { session_id, participant_id, action_type, target_id } => {
                self.handle_combat_action(&session_id, &participant_id, &action_type, target_id.as_deref(), now_ms).await
            }
            InboundFrame::Chat { message } => {
                self.state.bus.publish(&Room::GlobalChat, "chat", serde_json::json!({ "account_id": self.account_id, "message": message }));
                OutboundFrame::Chat { account_id: self.account_id.clone(), message }
            }
        }
    }

    async fn handle_look(&self) -> OutboundFrame {
        let Some(character_id) = &self.character_id else {
            return OutboundFrame::Error { code: "ValidationFailed", message: "no active character".to_string() };
        };
        let Ok(zone_id) = current_zone_of(&self.state, character_id) else {
            return OutboundFrame::Error { code: "NotFound", message: "character not found".to_string() };
        };
        match self.state.zones.look(&zone_id).await {
            Ok(result) => OutboundFrame::LookResult { zone_id: result.zone.id, occupants: result.occupants },
            Err(_) => OutboundFrame::Error { code: "NotFound", message: "zone not found".to_string() },
        }
    }

    async fn handle_move(&mut self, direction: &str, now_ms: i64) -> OutboundFrame {
        let Some(character_id) = self.character_id.clone() else {
            return OutboundFrame::Error { code: "ValidationFailed", message: "no active character".to_string() };
        };
        let Some(direction) = Direction::parse(direction) else {
            return OutboundFrame::Error { code: "ValidationFailed", message: "unrecognized direction".to_string() };
        };
        match self.state.movement.move_character(&character_id, direction, now_ms, |_, _| true).await {
            Ok(result) => {
                self.rooms.remove(&Room::Zone(result.from_zone.clone().unwrap_or_default()));
                self.rooms.insert(Room::Zone(result.to_zone.clone()));
                self.state.bus.publish(&Room::Zone(result.to_zone.clone()), "character_entered", serde_json::json!({ "character_id": character_id }));
                OutboundFrame::Moved { to_zone: result.to_zone }
            }
            Err(e) => OutboundFrame::Error { code: "Gated", message: e.to_string() },
        }
    }

    async fn handle_combat_action(&self, session_id: &str, participant_id: &str, action_type: &str, target_id: Option<&str>, now_ms: i64) -> OutboundFrame {
        let Some(action_type) = parse_action_type(action_type) else {
            return OutboundFrame::Error { code: "ValidationFailed", message: "unrecognized action type".to_string() };
        };
        match self.state.combat.action(session_id, participant_id, action_type, target_id, now_ms).await {
            Ok(outcome) => {
                self.state.bus.publish(
                    &Room::Combat(session_id.to_string()),
                    "combat_action",
                    serde_json::json!({ "actor_id": outcome.actor_id, "damage": outcome.damage, "session_ended": outcome.session_ended }),
                );
                OutboundFrame::CombatResult {
                    damage: outcome.damage,
                    healing: outcome.healing,
                    is_critical: outcome.is_critical,
                    is_missed: outcome.is_missed,
                    session_ended: outcome.session_ended,
                }
            }
            Err(e) => OutboundFrame::Error { code: "Gated", message: e.to_string() },
        }
    }
}

fn current_zone_of(state: &AppState, character_id: &str) -> Result<String, rusqlite::Error> {
    let conn = state.db.conn.lock().unwrap();
    conn.query_row("SELECT current_zone_id FROM characters WHERE id = ?1", rusqlite::params![character_id], |r| r.get(0))
}

fn parse_action_type(s: &str) -> Option<crate::models::ActionType> {
    use crate::models::ActionType::*;
    Some(match s {
        "attack" => Attack,
        "spell" => Spell,
        "heal" => Heal,
        "defend" => Defend,
        "item" => Item,
        "special" => Special,
        "flee" => Flee,
        _ => return None,
    })
}
