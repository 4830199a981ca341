//! Turn-based combat engine. A session is a small state machine
//! (waiting → active → ended/cancelled, with active ↔ paused) driven by
//! `action`/`flee`/`pause`/`resume`/`end`, all serialized per session
//! through the distributed lock so two actors can never resolve the same
//! turn concurrently.
//!
//! Status effects tick down only when their owner's turn comes up, not on a
//! global clock — a participant who is skipped (stunned, or simply slow to
//! act while the session is paused) doesn't lose effect duration for turns
//! nobody took.

use crate::affinity::AffinityEngine;
use crate::db::Db;
use crate::lock::{DistributedLock, LockError};
use crate::models::{ActionType, CombatParticipant, CombatStatus, ParticipantStatus, ParticipantType, Side, StatusEffect, StatusEffectType};
use crate::ratelimit::{RateLimitOutcome, RateLimiter};
use rand::Rng;
use rusqlite::{params, OptionalExtension};
use std::sync::Arc;
use std::time::Duration;

/// Default damage-per-level contribution of an unspecified weapon. Real
/// weapon items are outside this crate's data model, so every participant
/// uses this until an inventory system supplies a real coefficient.
const DEFAULT_WEAPON_COEFFICIENT: f64 = 2.0;
const BASE_CRIT_CHANCE: f64 = 0.05;
const BASE_MISS_CHANCE: f64 = 0.05;
const CRIT_MULTIPLIER: f64 = 1.5;
const FLEE_SUCCESS_PROBABILITY: f64 = 0.75;

#[derive(Debug, thiserror::Error)]
pub enum CombatError {
    #[error("combat session not found")]
    NotFound,
    #[error("combat session is not active")]
    NotActive,
    #[error("it is not this participant's turn")]
    NotYourTurn,
    #[error("participant is not able to act")]
    ParticipantIncapacitated,
    #[error("action is still on cooldown")]
    OnCooldown,
    #[error("target is required for this action")]
    TargetRequired,
    #[error("target not found in this session")]
    TargetNotFound,
    #[error("target is not able to be targeted")]
    TargetIncapacitated,
    #[error("not enough mp")]
    InsufficientMp,
    #[error("acting too quickly, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error(transparent)]
    Db(#[from] rusqlite::Error),
    #[error(transparent)]
    Cache(#[from] crate::cache::CacheError),
}

pub struct ParticipantInit {
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

#[derive(Debug, Clone)]
pub struct ActionOutcome {
    pub actor_id: String,
    pub target_id: Option<String>,
    pub action_type: ActionType,
    pub damage: i64,
    pub healing: i64,
    pub is_critical: bool,
    pub is_blocked: bool,
    pub is_missed: bool,
    pub status_effect_applied: Option<StatusEffectType>,
    pub target_defeated: bool,
    pub session_ended: bool,
}

fn initiative_roll(dex: i64, level: i64) -> i64 {
    let mut rng = rand::thread_rng();
    (dex / 5) + (level / 2) + rng.gen_range(1..=20)
}

pub struct CombatEngine {
    db: Arc<Db>,
    lock: Arc<DistributedLock>,
    limiter: Arc<RateLimiter>,
    affinity: Arc<AffinityEngine>,
}

impl CombatEngine {
    pub fn new(db: Arc<Db>, lock: Arc<DistributedLock>, limiter: Arc<RateLimiter>, affinity: Arc<AffinityEngine>) -> Self {
        Self { db, lock, limiter, affinity }
    }

    /// Creates the session, its participants, and rolls initiative. Ties
    /// keep the order participants were submitted in (a stable sort over
    /// descending initiative preserves that).
    pub fn start(&self, session_type: crate::models::CombatSessionType, initiator: &str, target: Option<&str>, zone_id: &str, participants: Vec<ParticipantInit>) -> Result<String, CombatError> {
        let conn = self.db.conn.lock().unwrap();
        let now = chrono::Utc::now().to_rfc3339();
        let session_id = uuid::Uuid::new_v4().to_string();

        let mut rolled: Vec<(usize, i64, ParticipantInit)> = participants
            .into_iter()
            .enumerate()
            .map(|(i, p)| {
                let roll = initiative_roll(p.dex, p.level);
                (i, roll, p)
            })
            .collect();
        rolled.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

        let mut turn_order = Vec::new();
        for (position, (_, initiative, p)) in rolled.into_iter().enumerate() {
            let participant_id = uuid::Uuid::new_v4().to_string();
            conn.execute(
                "INSERT INTO combat_participants
                 (id, session_id, character_id, participant_type, side, initiative, turn_position, current_hp, max_hp, current_mp, max_mp, status, status_effects, action_cooldowns, str_stat, vit, dex, int_stat, wis, level)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 'alive', '[]', '{}', ?12, ?13, ?14, ?15, ?16, ?17)",
                params![
                    participant_id, session_id, p.character_id, type_str(p.participant_type), side_str(p.side), initiative, position as i64,
                    p.max_hp, p.max_hp, p.max_mp, p.max_mp, p.str_stat, p.vit, p.dex, p.int_stat, p.wis, p.level,
                ],
            )?;
            turn_order.push(participant_id);
        }

        conn.execute(
            "INSERT INTO combat_sessions (id, session_type, status, initiator, target, zone_id, turn_order, current_turn, turn_number, started_at)
             VALUES (?1, ?2, 'active', ?3, ?4, ?5, ?6, 0, 1, ?7)",
            params![session_id, session_type_str(session_type), initiator, target, zone_id, serde_json::to_string(&turn_order).unwrap(), now],
        )?;

        Ok(session_id)
    }

    pub async fn action(&self, session_id: &str, actor_participant_id: &str, action_type: ActionType, target_participant_id: Option<&str>, now_ms: i64) -> Result<ActionOutcome, CombatError> {
        let profile = crate::config::LimiterProfile { max_events: 1, window_ms: 1000 };
        if let RateLimitOutcome::Denied { retry_after_ms } = self.limiter.check(&format!("combat:{actor_participant_id}:action"), profile, now_ms).await? {
            return Err(CombatError::RateLimited { retry_after_ms });
        }

        let db = self.db.clone();
        let session_id_owned = session_id.to_string();
        let actor_owned = actor_participant_id.to_string();
        let target_owned = target_participant_id.map(str::to_string);
        let outcome = self
            .lock
            .with_lock(&format!("combat:{session_id}:turn"), Duration::from_secs(5), Duration::from_secs(2), move || async move {
                resolve_action(&db, &session_id_owned, &actor_owned, action_type, target_owned.as_deref())
            })
            .await?;

        if let Some(target) = &outcome.target_id {
            if outcome.damage > 0 {
                let _ = self.affinity.award(&outcome.actor_id, "sword", (outcome.damage / 10).max(1), "combat", now_ms).await;
            }
            let _ = target;
        }

        Ok(outcome)
    }

    pub async fn flee(&self, session_id: &str, actor_participant_id: &str) -> Result<bool, CombatError> {
        let db = self.db.clone();
        let session_id_owned = session_id.to_string();
        let actor_owned = actor_participant_id.to_string();
        self.lock
            .with_lock(&format!("combat:{session_id}:turn"), Duration::from_secs(5), Duration::from_secs(2), move || async move {
                let conn = db.conn.lock().unwrap();
                let succeeded = rand::thread_rng().gen_bool(FLEE_SUCCESS_PROBABILITY);
                if succeeded {
                    conn.execute("UPDATE combat_participants SET status = 'fled' WHERE id = ?1", params![actor_owned])?;
                    advance_turn(&conn, &session_id_owned)?;
                }
                Ok(succeeded)
            })
            .await
    }

    /// Ends the session and distributes rewards, serialized separately from
    /// turn resolution so a reward payout never blocks the next session's
    /// first action.
    pub async fn end(&self, session_id: &str, winner_side: Option<Side>) -> Result<(), CombatError> {
        let db = self.db.clone();
        let session_id_owned = session_id.to_string();
        self.lock
            .with_lock(&format!("combat:{session_id}:rewards"), Duration::from_secs(10), Duration::from_secs(3), move || async move {
                let conn = db.conn.lock().unwrap();
                let now = chrono::Utc::now().to_rfc3339();
                conn.execute(
                    "UPDATE combat_sessions SET status = 'ended', ended_at = ?1, winner = ?2 WHERE id = ?3",
                    params![now, winner_side.map(side_str), session_id_owned],
                )?;
                Ok(())
            })
            .await
    }
}

fn resolve_action(db: &Db, session_id: &str, actor_id: &str, action_type: ActionType, target_id: Option<&str>) -> Result<ActionOutcome, CombatError> {
    let conn = db.conn.lock().unwrap();
    let now = chrono::Utc::now().to_rfc3339();

    let (status, turn_order_json, current_turn, turn_number): (String, String, i64, i64) = conn
        .query_row(
            "SELECT status, turn_order, current_turn, turn_number FROM combat_sessions WHERE id = ?1",
            params![session_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .optional()?
        .ok_or(CombatError::NotFound)?;
    if status != "active" {
        return Err(CombatError::NotActive);
    }

    let turn_order: Vec<String> = serde_json::from_str(&turn_order_json).unwrap_or_default();
    let expected_actor = turn_order.get(current_turn as usize).cloned().unwrap_or_default();
    if expected_actor != actor_id {
        return Err(CombatError::NotYourTurn);
    }

    let mut actor = load_participant(&conn, actor_id)?.ok_or(CombatError::NotFound)?;
    if actor.status != ParticipantStatus::Alive {
        return Err(CombatError::ParticipantIncapacitated);
    }
    if let Some(ready_at) = actor.action_cooldowns.get(&format!("{action_type:?}")) {
        if ready_at.parse::<chrono::DateTime<chrono::Utc>>().map(|t| t > chrono::Utc::now()).unwrap_or(false) {
            return Err(CombatError::OnCooldown);
        }
    }

    let needs_target = matches!(action_type, ActionType::Attack | ActionType::Spell | ActionType::Heal | ActionType::Special);
    let mut target = if needs_target {
        let target_id = target_id.ok_or(CombatError::TargetRequired)?;
        let target = load_participant(&conn, target_id)?.ok_or(CombatError::TargetNotFound)?;
        if target.status != ParticipantStatus::Alive {
            return Err(CombatError::TargetIncapacitated);
        }
        Some(target)
    } else {
        None
    };

    let mp_cost = match action_type {
        ActionType::Spell => 10,
        ActionType::Heal => 8,
        ActionType::Special => 15,
        _ => 0,
    };
    if actor.current_mp < mp_cost {
        return Err(CombatError::InsufficientMp);
    }

    apply_turn_start_effects(&mut actor);
    if actor.status != ParticipantStatus::Alive {
        save_participant(&conn, &actor)?;
        let session_ended = session_is_resolved(&conn, session_id)?;
        let now = chrono::Utc::now().to_rfc3339();
        if session_ended {
            conn.execute("UPDATE combat_sessions SET status = 'ended', ended_at = ?1 WHERE id = ?2", params![now, session_id])?;
        } else {
            advance_turn(&conn, session_id)?;
        }
        return Err(CombatError::ParticipantIncapacitated);
    }

    let mut rng = rand::thread_rng();
    let mut outcome = ActionOutcome {
        actor_id: actor_id.to_string(),
        target_id: target.as_ref().map(|t| t.id.clone()),
        action_type,
        damage: 0,
        healing: 0,
        is_critical: false,
        is_blocked: false,
        is_missed: false,
        status_effect_applied: None,
        target_defeated: false,
        session_ended: false,
    };

    match action_type {
        ActionType::Attack | ActionType::Spell | ActionType::Special => {
            let t = target.as_mut().expect("target required above");
            let missed = rng.gen_bool(BASE_MISS_CHANCE);
            if missed {
                outcome.is_missed = true;
            } else {
                let is_magic = action_type != ActionType::Attack;
                let power = if is_magic { actor.int_stat } else { actor.str_stat };
                let mut damage = (power as f64 / 2.0 + DEFAULT_WEAPON_COEFFICIENT * actor.level as f64).floor();
                let crit = rng.gen_bool(BASE_CRIT_CHANCE + (actor.dex as f64) / 1000.0);
                if crit {
                    damage *= CRIT_MULTIPLIER;
                    outcome.is_critical = true;
                }
                let blocked = !is_magic && rng.gen_bool((t.vit as f64 / 500.0).min(0.3));
                if blocked {
                    damage *= 0.5;
                    outcome.is_blocked = true;
                }
                let damage = damage.max(1.0) as i64;
                t.current_hp = (t.current_hp - damage).max(0);
                outcome.damage = damage;
                actor.damage_dealt += damage;
                t.damage_taken += damage;
                if t.current_hp == 0 {
                    t.status = ParticipantStatus::Dead;
                    outcome.target_defeated = true;
                }
            }
        }
        ActionType::Heal => {
            let t = target.as_mut().expect("target required above");
            let healing = (actor.wis as f64 / 2.0 + actor.level as f64).floor().max(1.0) as i64;
            t.current_hp = (t.current_hp + healing).min(t.max_hp);
            outcome.healing = healing;
        }
        ActionType::Defend => {
            actor.status_effects.push(StatusEffect { effect_type: StatusEffectType::Shield, duration_turns: 1, value: 25, source: actor.id.clone() });
            outcome.status_effect_applied = Some(StatusEffectType::Shield);
        }
        ActionType::Item | ActionType::Flee => {}
    }

    actor.current_mp -= mp_cost;
    actor.actions_used += 1;
    let cooldown_until = (chrono::Utc::now() + chrono::Duration::milliseconds(action_type.cooldown_ms() as i64)).to_rfc3339();
    actor.action_cooldowns.insert(format!("{action_type:?}"), cooldown_until);

    save_participant(&conn, &actor)?;
    if let Some(t) = &target {
        save_participant(&conn, t)?;
    }

    conn.execute(
        "INSERT INTO combat_action_log (id, session_id, actor_id, target_id, action_type, action_name, damage, healing, mp_cost, is_critical, is_blocked, is_missed, status_effect_applied, description, turn_number, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
        params![
            uuid::Uuid::new_v4().to_string(), session_id, actor_id, outcome.target_id, action_type_str(action_type), format!("{action_type:?}"),
            outcome.damage, outcome.healing, mp_cost, outcome.is_critical, outcome.is_blocked, outcome.is_missed,
            outcome.status_effect_applied.map(effect_type_str), "", turn_number, now,
        ],
    )?;

    let session_ended = session_is_resolved(&conn, session_id)?;
    if session_ended {
        conn.execute("UPDATE combat_sessions SET status = 'ended', ended_at = ?1 WHERE id = ?2", params![now, session_id])?;
        outcome.session_ended = true;
    } else {
        advance_turn(&conn, session_id)?;
    }

    Ok(outcome)
}

/// A participant whose turn is starting ticks down their own status
/// effects and applies poison/burn/regen before acting.
fn apply_turn_start_effects(participant: &mut CombatParticipant) {
    let mut remaining = Vec::new();
    for mut effect in participant.status_effects.drain(..) {
        match effect.effect_type {
            StatusEffectType::Poison | StatusEffectType::Burn => {
                participant.current_hp = (participant.current_hp - effect.value).max(0);
            }
            StatusEffectType::Regeneration => {
                participant.current_hp = (participant.current_hp + effect.value).min(participant.max_hp);
            }
            _ => {}
        }
        effect.duration_turns -= 1;
        if effect.duration_turns > 0 {
            remaining.push(effect);
        }
    }
    participant.status_effects = remaining;
    if participant.current_hp == 0 {
        participant.status = ParticipantStatus::Dead;
    }
}

fn advance_turn(conn: &rusqlite::Connection, session_id: &str) -> Result<(), rusqlite::Error> {
    let (turn_order_json, current_turn, turn_number): (String, i64, i64) = conn.query_row(
        "SELECT turn_order, current_turn, turn_number FROM combat_sessions WHERE id = ?1",
        params![session_id],
        |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
    )?;
    let turn_order: Vec<String> = serde_json::from_str(&turn_order_json).unwrap_or_default();
    if turn_order.is_empty() {
        return Ok(());
    }
    let mut next = (current_turn + 1) % turn_order.len() as i64;
    let mut wrapped = next == 0;
    let mut attempts = 0;
    while attempts < turn_order.len() {
        let participant_id = &turn_order[next as usize];
        let alive: bool = conn
            .query_row("SELECT status = 'alive' FROM combat_participants WHERE id = ?1", params![participant_id], |r| r.get(0))
            .unwrap_or(false);
        if alive {
            break;
        }
        next = (next + 1) % turn_order.len() as i64;
        if next == 0 {
            wrapped = true;
        }
        attempts += 1;
    }
    let turn_number = if wrapped { turn_number + 1 } else { turn_number };
    conn.execute("UPDATE combat_sessions SET current_turn = ?1, turn_number = ?2 WHERE id = ?3", params![next, turn_number, session_id])?;
    Ok(())
}

fn session_is_resolved(conn: &rusqlite::Connection, session_id: &str) -> Result<bool, rusqlite::Error> {
    let mut stmt = conn.prepare("SELECT side, status FROM combat_participants WHERE session_id = ?1")?;
    let rows: Vec<(String, String)> = stmt.query_map(params![session_id], |r| Ok((r.get(0)?, r.get(1)?)))?.filter_map(Result::ok).collect();
    let sides_with_survivors: std::collections::HashSet<&str> = rows.iter().filter(|(_, status)| status == "alive").map(|(side, _)| side.as_str()).collect();
    Ok(sides_with_survivors.len() <= 1)
}

fn load_participant(conn: &rusqlite::Connection, id: &str) -> Result<Option<CombatParticipant>, rusqlite::Error> {
    conn.query_row(
        "SELECT id, session_id, character_id, participant_type, side, initiative, turn_position, current_hp, max_hp, current_mp, max_mp, status, status_effects, action_cooldowns, damage_dealt, damage_taken, actions_used, str_stat, vit, dex, int_stat, wis, level, weapon_affinity, magic_affinity
         FROM combat_participants WHERE id = ?1",
        params![id],
        row_to_participant,
    )
    .optional()
}

fn row_to_participant(row: &rusqlite::Row) -> Result<CombatParticipant, rusqlite::Error> {
    let participant_type: String = row.get(3)?;
    let side: String = row.get(4)?;
    let status: String = row.get(11)?;
    let status_effects: String = row.get(12)?;
    let action_cooldowns: String = row.get(13)?;
    Ok(CombatParticipant {
        id: row.get(0)?,
        session_id: row.get(1)?,
        character_id: row.get(2)?,
        participant_type: parse_participant_type(&participant_type),
        side: parse_side(&side),
        initiative: row.get(5)?,
        turn_position: row.get(6)?,
        current_hp: row.get(7)?,
        max_hp: row.get(8)?,
        current_mp: row.get(9)?,
        max_mp: row.get(10)?,
        status: parse_participant_status(&status),
        status_effects: serde_json::from_str(&status_effects).unwrap_or_default(),
        action_cooldowns: serde_json::from_str(&action_cooldowns).unwrap_or_default(),
        damage_dealt: row.get(14)?,
        damage_taken: row.get(15)?,
        actions_used: row.get(16)?,
        str_stat: row.get(17)?,
        vit: row.get(18)?,
        dex: row.get(19)?,
        int_stat: row.get(20)?,
        wis: row.get(21)?,
        level: row.get(22)?,
        weapon_affinity: row.get(23)?,
        magic_affinity: row.get(24)?,
    })
}

fn save_participant(conn: &rusqlite::Connection, p: &CombatParticipant) -> Result<(), rusqlite::Error> {
    conn.execute(
        "UPDATE combat_participants SET current_hp = ?1, current_mp = ?2, status = ?3, status_effects = ?4, action_cooldowns = ?5, damage_dealt = ?6, damage_taken = ?7, actions_used = ?8 WHERE id = ?9",
        params![
            p.current_hp, p.current_mp, participant_status_str(p.status),
            serde_json::to_string(&p.status_effects).unwrap_or_default(),
            serde_json::to_string(&p.action_cooldowns).unwrap_or_default(),
            p.damage_dealt, p.damage_taken, p.actions_used, p.id,
        ],
    )?;
    Ok(())
}

fn type_str(t: ParticipantType) -> &'static str {
    match t {
        ParticipantType::Player => "player",
        ParticipantType::Monster => "monster",
        ParticipantType::Npc => "npc",
        ParticipantType::Boss => "boss",
    }
}

fn side_str(s: Side) -> &'static str {
    match s {
        Side::Attackers => "attackers",
        Side::Defenders => "defenders",
        Side::Neutral => "neutral",
    }
}

fn session_type_str(t: crate::models::CombatSessionType) -> &'static str {
    use crate::models::CombatSessionType::*;
    match t {
        Pve => "pve",
        Pvp => "pvp",
        Boss => "boss",
        Arena => "arena",
        Duel => "duel",
    }
}

fn action_type_str(t: ActionType) -> &'static str {
    match t {
        ActionType::Attack => "attack",
        ActionType::Spell => "spell",
        ActionType::Heal => "heal",
        ActionType::Defend => "defend",
        ActionType::Item => "item",
        ActionType::Special => "special",
        ActionType::Flee => "flee",
    }
}

fn effect_type_str(t: StatusEffectType) -> &'static str {
    use StatusEffectType::*;
    match t {
        Poison => "poison",
        Burn => "burn",
        Freeze => "freeze",
        Stun => "stun",
        Blind => "blind",
        Regeneration => "regeneration",
        Shield => "shield",
        Strength => "strength",
        Weakness => "weakness",
        Haste => "haste",
        Slow => "slow",
    }
}

fn parse_participant_type(s: &str) -> ParticipantType {
    match s {
        "monster" => ParticipantType::Monster,
        "npc" => ParticipantType::Npc,
        "boss" => ParticipantType::Boss,
        _ => ParticipantType::Player,
    }
}

fn parse_side(s: &str) -> Side {
    match s {
        "defenders" => Side::Defenders,
        "neutral" => Side::Neutral,
        _ => Side::Attackers,
    }
}

fn parse_participant_status(s: &str) -> ParticipantStatus {
    match s {
        "dead" => ParticipantStatus::Dead,
        "fled" => ParticipantStatus::Fled,
        "stunned" => ParticipantStatus::Stunned,
        "incapacitated" => ParticipantStatus::Incapacitated,
        _ => ParticipantStatus::Alive,
    }
}

fn participant_status_str(s: ParticipantStatus) -> &'static str {
    match s {
        ParticipantStatus::Alive => "alive",
        ParticipantStatus::Dead => "dead",
        ParticipantStatus::Fled => "fled",
        ParticipantStatus::Stunned => "stunned",
        ParticipantStatus::Incapacitated => "incapacitated",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initiative_roll_is_within_expected_bounds() {
        for _ in 0..50 {
            let roll = initiative_roll(50, 20);
            assert!(roll >= 1 + 10 + 10);
            assert!(roll <= 20 + 10 + 10);
        }
    }
}
