//! Entity shapes for the relational store. Field names mirror the
//! spec's data model; `experience`-class fields are decimal strings on the
//! wire and in SQLite, parsed to `BigUint` for arithmetic.

use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Suspended,
    Banned,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Player,
    Moderator,
    Admin,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Account {
    pub id: String,
    pub email: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub status: AccountStatus,
    pub role: Role,
    pub email_verified: bool,
    pub created_at: String,
    pub last_login: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct AccountSecurity {
    pub account_id: String,
    pub login_attempts: i64,
    pub locked_until: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Session {
    pub id: String,
    pub account_id: String,
    pub character_id: Option<String>,
    pub created_at: String,
    pub last_active: String,
    pub expires_at: String,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub device: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Race {
    pub id: String,
    pub name: String,
    pub str_mod: i64,
    pub vit_mod: i64,
    pub dex_mod: i64,
    pub int_mod: i64,
    pub wis_mod: i64,
    pub exp_bonus_multiplier: f64,
    pub starting_gold: i64,
    pub starting_zone_key: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CharacterStatus {
    Normal,
    Combat,
    Dead,
    Busy,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Character {
    pub id: String,
    pub account_id: String,
    pub race_id: String,
    pub name: String,
    pub level: i64,
    pub experience: String,
    pub next_level_exp: String,
    pub status: CharacterStatus,
    pub str_stat: i64,
    pub vit: i64,
    pub dex: i64,
    pub int_stat: i64,
    pub wis: i64,
    pub hp: i64,
    pub max_hp: i64,
    pub mp: i64,
    pub max_mp: i64,
    pub current_zone_id: String,
    pub x: i64,
    pub y: i64,
    pub gold: i64,
    pub titles: Vec<String>,
    pub active_title: Option<String>,
    pub available_stat_points: i64,
    pub deleted_at: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ZoneType {
    Normal,
    City,
    Cave,
    Dungeon,
    Tower,
    Arena,
    GuildHall,
    Instance,
    Wilderness,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Zone {
    pub id: String,
    pub internal_name: String,
    pub zone_type: ZoneType,
    pub level_min: i64,
    pub level_max: i64,
    pub pvp_enabled: bool,
    pub safe_zone: bool,
    pub climate: String,
    pub terrain: String,
    pub lighting: String,
    pub map_x: i64,
    pub map_y: i64,
    pub map_layer: i64,
    pub spawn_rate: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    North,
    South,
    East,
    West,
    Northeast,
    Northwest,
    Southeast,
    Southwest,
    Up,
    Down,
    In,
    Out,
}

impl Direction {
    pub fn reverse(self) -> Direction {
        use Direction::*;
        match self {
            North => South,
            South => North,
            East => West,
            West => East,
            Northeast => Southwest,
            Southwest => Northeast,
            Northwest => Southeast,
            Southeast => Northwest,
            Up => Down,
            Down => Up,
            In => Out,
            Out => In,
        }
    }

    pub fn as_str(&self) -> &'static str {
        use Direction::*;
        match self {
            North => "north",
            South => "south",
            East => "east",
            West => "west",
            Northeast => "northeast",
            Northwest => "northwest",
            Southeast => "southeast",
            Southwest => "southwest",
            Up => "up",
            Down => "down",
            In => "in",
            Out => "out",
        }
    }

    pub fn parse(s: &str) -> Option<Direction> {
        use Direction::*;
        Some(match s.to_lowercase().as_str() {
            "north" => North,
            "south" => South,
            "east" => East,
            "west" => West,
            "northeast" => Northeast,
            "northwest" => Northwest,
            "southeast" => Southeast,
            "southwest" => Southwest,
            "up" => Up,
            "down" => Down,
            "in" => In,
            "out" => Out,
            _ => return None,
        })
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExitType {
    Normal,
    Door,
    Portal,
    Teleporter,
    Hidden,
    Magical,
    Ladder,
    Stairs,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ZoneExit {
    pub from_zone: String,
    pub to_zone: String,
    pub direction: Direction,
    pub exit_type: ExitType,
    pub visible: bool,
    pub locked: bool,
    pub lock_type: Option<String>,
    pub required_level: i64,
    pub required_item: Option<String>,
    pub travel_message: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CharacterLocation {
    pub character_id: String,
    pub zone_id: String,
    pub instance_id: Option<String>,
    pub x: i64,
    pub y: i64,
    pub last_movement: String,
    pub total_moves: i64,
    pub distance_traveled: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MovementType {
    Normal,
    Teleport,
    Recall,
    Summon,
    Forced,
    Respawn,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MovementLogRow {
    pub id: String,
    pub character_id: String,
    pub from_zone: Option<String>,
    pub to_zone: String,
    pub direction: Option<String>,
    pub movement_type: MovementType,
    pub travel_time_ms: i64,
    pub created_at: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CombatSessionType {
    Pve,
    Pvp,
    Boss,
    Arena,
    Duel,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CombatStatus {
    Waiting,
    Active,
    Paused,
    Ended,
    Cancelled,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CombatSession {
    pub id: String,
    pub session_type: CombatSessionType,
    pub status: CombatStatus,
    pub initiator: String,
    pub target: Option<String>,
    pub zone_id: String,
    pub turn_order: Vec<String>,
    pub current_turn: usize,
    pub turn_number: i64,
    pub started_at: Option<String>,
    pub ended_at: Option<String>,
    pub winner: Option<String>,
    pub experience_reward: i64,
    pub gold_reward: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantType {
    Player,
    Monster,
    Npc,
    Boss,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Attackers,
    Defenders,
    Neutral,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantStatus {
    Alive,
    Dead,
    Fled,
    Stunned,
    Incapacitated,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum StatusEffectType {
    Poison,
    Burn,
    Freeze,
    Stun,
    Blind,
    Regeneration,
    Shield,
    Strength,
    Weakness,
    Haste,
    Slow,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StatusEffect {
    pub effect_type: StatusEffectType,
    pub duration_turns: i64,
    pub value: i64,
    pub source: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CombatParticipant {
    pub id: String,
    pub session_id: String,
    pub character_id: Option<String>,
    pub participant_type: ParticipantType,
    pub side: Side,
    pub initiative: i64,
    pub turn_position: i64,
    pub current_hp: i64,
    pub max_hp: i64,
    pub current_mp: i64,
    pub max_mp: i64,
    pub status: ParticipantStatus,
    pub status_effects: Vec<StatusEffect>,
    pub action_cooldowns: std::collections::HashMap<String, String>,
    pub damage_dealt: i64,
    pub damage_taken: i64,
    pub actions_used: i64,
    pub str_stat: i64,
    pub vit: i64,
    pub dex: i64,
    pub int_stat: i64,
    pub wis: i64,
    pub level: i64,
    pub weapon_affinity: Option<String>,
    pub magic_affinity: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    Attack,
    Spell,
    Heal,
    Defend,
    Item,
    Special,
    Flee,
}

impl ActionType {
    pub fn cooldown_ms(self) -> u64 {
        match self {
            ActionType::Attack => 1000,
            ActionType::Spell => 3000,
            ActionType::Heal => 2000,
            ActionType::Special => 5000,
            ActionType::Item => 1500,
            ActionType::Defend => 500,
            ActionType::Flee => 0,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CombatActionLogRow {
    pub id: String,
    pub session_id: String,
    pub actor_id: String,
    pub target_id: Option<String>,
    pub action_type: ActionType,
    pub action_name: String,
    pub damage: i64,
    pub healing: i64,
    pub mp_cost: i64,
    pub is_critical: bool,
    pub is_blocked: bool,
    pub is_missed: bool,
    pub status_effect_applied: Option<StatusEffectType>,
    pub description: String,
    pub turn_number: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExperienceSource {
    Combat,
    Quest,
    Exploration,
    Crafting,
    Pvp,
    Event,
    Milestone,
    Admin,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Affinity {
    pub id: String,
    pub name: String,
    pub affinity_type: String,
    pub max_tier: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CharacterAffinity {
    pub character_id: String,
    pub affinity_id: String,
    pub experience: String,
    pub tier: i64,
    pub last_updated: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AuditEntry {
    pub actor_id: Option<String>,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub changes: serde_json::Value,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}
