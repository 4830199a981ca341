//! The relational store: a `Mutex<Connection>` over SQLite, migrated at
//! startup. It is the sole write authority for every entity in the data
//! model; the cache is a read-through mirror only.

use rusqlite::Connection;
use std::sync::Mutex;

pub struct Db {
    pub conn: Mutex<Connection>,
}

impl Db {
    pub fn new(path: &str) -> Self {
        if let Some(parent) = std::path::Path::new(path).parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(path).expect("failed to open database");
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .expect("failed to set pragmas");
        let db = Db { conn: Mutex::new(conn) };
        db.migrate();
        db
    }

    fn migrate(&self) {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS accounts (
                id TEXT PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                email_lower TEXT NOT NULL UNIQUE,
                username TEXT NOT NULL UNIQUE,
                username_lower TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'active',
                role TEXT NOT NULL DEFAULT 'player',
                email_verified INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                last_login TEXT
            );

            CREATE TABLE IF NOT EXISTS account_security (
                account_id TEXT PRIMARY KEY REFERENCES accounts(id) ON DELETE CASCADE,
                login_attempts INTEGER NOT NULL DEFAULT 0,
                locked_until TEXT
            );

            CREATE TABLE IF NOT EXISTS races (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                str_mod INTEGER NOT NULL,
                vit_mod INTEGER NOT NULL,
                dex_mod INTEGER NOT NULL,
                int_mod INTEGER NOT NULL,
                wis_mod INTEGER NOT NULL,
                exp_bonus_multiplier REAL NOT NULL DEFAULT 1.0,
                starting_gold INTEGER NOT NULL DEFAULT 0,
                starting_zone_key TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS characters (
                id TEXT PRIMARY KEY,
                account_id TEXT NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
                race_id TEXT NOT NULL REFERENCES races(id),
                name TEXT NOT NULL,
                name_lower TEXT NOT NULL,
                level INTEGER NOT NULL DEFAULT 1,
                experience TEXT NOT NULL DEFAULT '0',
                next_level_exp TEXT NOT NULL DEFAULT '1000',
                status TEXT NOT NULL DEFAULT 'normal',
                str_stat INTEGER NOT NULL,
                vit INTEGER NOT NULL,
                dex INTEGER NOT NULL,
                int_stat INTEGER NOT NULL,
                wis INTEGER NOT NULL,
                hp INTEGER NOT NULL,
                max_hp INTEGER NOT NULL,
                mp INTEGER NOT NULL,
                max_mp INTEGER NOT NULL,
                current_zone_id TEXT NOT NULL,
                x INTEGER NOT NULL DEFAULT 0,
                y INTEGER NOT NULL DEFAULT 0,
                gold INTEGER NOT NULL DEFAULT 0,
                titles TEXT NOT NULL DEFAULT '[]',
                active_title TEXT,
                available_stat_points INTEGER NOT NULL DEFAULT 0,
                deleted_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_characters_account ON characters(account_id);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_characters_name_live
                ON characters(name_lower) WHERE deleted_at IS NULL;
            CREATE INDEX IF NOT EXISTS idx_characters_zone ON characters(current_zone_id);
            CREATE INDEX IF NOT EXISTS idx_characters_level ON characters(level);

            CREATE TABLE IF NOT EXISTS zones (
                id TEXT PRIMARY KEY,
                internal_name TEXT NOT NULL UNIQUE,
                zone_type TEXT NOT NULL DEFAULT 'normal',
                level_min INTEGER NOT NULL DEFAULT 1,
                level_max INTEGER NOT NULL DEFAULT 1000,
                pvp_enabled INTEGER NOT NULL DEFAULT 0,
                safe_zone INTEGER NOT NULL DEFAULT 0,
                climate TEXT NOT NULL DEFAULT '',
                terrain TEXT NOT NULL DEFAULT '',
                lighting TEXT NOT NULL DEFAULT '',
                map_x INTEGER NOT NULL DEFAULT 0,
                map_y INTEGER NOT NULL DEFAULT 0,
                map_layer INTEGER NOT NULL DEFAULT 0,
                spawn_rate REAL NOT NULL DEFAULT 0.0
            );
            CREATE INDEX IF NOT EXISTS idx_zones_map ON zones(map_x, map_y, map_layer);

            CREATE TABLE IF NOT EXISTS zone_exits (
                from_zone TEXT NOT NULL REFERENCES zones(id) ON DELETE CASCADE,
                to_zone TEXT NOT NULL REFERENCES zones(id) ON DELETE CASCADE,
                direction TEXT NOT NULL,
                exit_type TEXT NOT NULL DEFAULT 'normal',
                visible INTEGER NOT NULL DEFAULT 1,
                locked INTEGER NOT NULL DEFAULT 0,
                lock_type TEXT,
                required_level INTEGER NOT NULL DEFAULT 1,
                required_item TEXT,
                travel_message TEXT NOT NULL DEFAULT '',
                PRIMARY KEY (from_zone, direction)
            );

            CREATE TABLE IF NOT EXISTS character_locations (
                character_id TEXT PRIMARY KEY REFERENCES characters(id) ON DELETE CASCADE,
                zone_id TEXT NOT NULL REFERENCES zones(id),
                instance_id TEXT,
                x INTEGER NOT NULL DEFAULT 0,
                y INTEGER NOT NULL DEFAULT 0,
                last_movement TEXT NOT NULL,
                total_moves INTEGER NOT NULL DEFAULT 0,
                distance_traveled INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_char_locations_zone ON character_locations(zone_id);

            CREATE TABLE IF NOT EXISTS unique_zones_visited (
                character_id TEXT NOT NULL REFERENCES characters(id) ON DELETE CASCADE,
                zone_id TEXT NOT NULL,
                PRIMARY KEY (character_id, zone_id)
            );

            CREATE TABLE IF NOT EXISTS movement_log (
                id TEXT PRIMARY KEY,
                character_id TEXT NOT NULL,
                from_zone TEXT,
                to_zone TEXT NOT NULL,
                direction TEXT,
                movement_type TEXT NOT NULL DEFAULT 'normal',
                travel_time_ms INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_movement_log_char ON movement_log(character_id, created_at);

            CREATE TABLE IF NOT EXISTS combat_sessions (
                id TEXT PRIMARY KEY,
                session_type TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'waiting',
                initiator TEXT NOT NULL,
                target TEXT,
                zone_id TEXT NOT NULL,
                turn_order TEXT NOT NULL DEFAULT '[]',
                current_turn INTEGER NOT NULL DEFAULT 0,
                turn_number INTEGER NOT NULL DEFAULT 1,
                started_at TEXT,
                ended_at TEXT,
                winner TEXT,
                experience_reward INTEGER NOT NULL DEFAULT 0,
                gold_reward INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_combat_sessions_status ON combat_sessions(status);
            CREATE INDEX IF NOT EXISTS idx_combat_sessions_zone ON combat_sessions(zone_id);

            CREATE TABLE IF NOT EXISTS combat_participants (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL REFERENCES combat_sessions(id) ON DELETE CASCADE,
                character_id TEXT,
                participant_type TEXT NOT NULL,
                side TEXT NOT NULL,
                initiative INTEGER NOT NULL DEFAULT 0,
                turn_position INTEGER NOT NULL DEFAULT 0,
                current_hp INTEGER NOT NULL,
                max_hp INTEGER NOT NULL,
                current_mp INTEGER NOT NULL DEFAULT 0,
                max_mp INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'alive',
                status_effects TEXT NOT NULL DEFAULT '[]',
                action_cooldowns TEXT NOT NULL DEFAULT '{}',
                damage_dealt INTEGER NOT NULL DEFAULT 0,
                damage_taken INTEGER NOT NULL DEFAULT 0,
                actions_used INTEGER NOT NULL DEFAULT 0,
                str_stat INTEGER NOT NULL DEFAULT 0,
                vit INTEGER NOT NULL DEFAULT 0,
                dex INTEGER NOT NULL DEFAULT 0,
                int_stat INTEGER NOT NULL DEFAULT 0,
                wis INTEGER NOT NULL DEFAULT 0,
                level INTEGER NOT NULL DEFAULT 1,
                weapon_affinity TEXT,
                magic_affinity TEXT,
                UNIQUE(session_id, character_id)
            );

            CREATE TABLE IF NOT EXISTS combat_action_log (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL REFERENCES combat_sessions(id) ON DELETE CASCADE,
                actor_id TEXT NOT NULL,
                target_id TEXT,
                action_type TEXT NOT NULL,
                action_name TEXT NOT NULL,
                damage INTEGER NOT NULL DEFAULT 0,
                healing INTEGER NOT NULL DEFAULT 0,
                mp_cost INTEGER NOT NULL DEFAULT 0,
                is_critical INTEGER NOT NULL DEFAULT 0,
                is_blocked INTEGER NOT NULL DEFAULT 0,
                is_missed INTEGER NOT NULL DEFAULT 0,
                status_effect_applied TEXT,
                description TEXT NOT NULL DEFAULT '',
                turn_number INTEGER NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_combat_log_session_turn ON combat_action_log(session_id, turn_number);

            CREATE TABLE IF NOT EXISTS experience_log (
                id TEXT PRIMARY KEY,
                character_id TEXT NOT NULL,
                amount TEXT NOT NULL,
                final_amount TEXT NOT NULL,
                source TEXT NOT NULL,
                source_details TEXT,
                resulting_level INTEGER NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_experience_log_char ON experience_log(character_id, created_at);

            CREATE TABLE IF NOT EXISTS level_up_log (
                id TEXT PRIMARY KEY,
                character_id TEXT NOT NULL,
                from_level INTEGER NOT NULL,
                to_level INTEGER NOT NULL,
                stat_points_awarded INTEGER NOT NULL,
                phase_changed INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_level_up_log_char ON level_up_log(character_id, created_at);

            CREATE TABLE IF NOT EXISTS milestone_achievements (
                character_id TEXT NOT NULL,
                milestone_level INTEGER NOT NULL,
                achievement_type TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (character_id, milestone_level, achievement_type)
            );

            CREATE TABLE IF NOT EXISTS affinities (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                affinity_type TEXT NOT NULL,
                max_tier INTEGER NOT NULL DEFAULT 7
            );

            CREATE TABLE IF NOT EXISTS character_affinities (
                character_id TEXT NOT NULL,
                affinity_id TEXT NOT NULL REFERENCES affinities(id),
                experience TEXT NOT NULL DEFAULT '0',
                tier INTEGER NOT NULL DEFAULT 1,
                last_updated TEXT NOT NULL,
                PRIMARY KEY (character_id, affinity_id)
            );

            CREATE TABLE IF NOT EXISTS affinity_experience_log (
                id TEXT PRIMARY KEY,
                character_id TEXT NOT NULL,
                affinity_id TEXT NOT NULL,
                experience_awarded TEXT NOT NULL,
                source TEXT NOT NULL,
                previous_tier INTEGER NOT NULL,
                new_tier INTEGER NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS audit_log (
                id TEXT PRIMARY KEY,
                actor_id TEXT,
                action TEXT NOT NULL,
                resource_type TEXT NOT NULL,
                resource_id TEXT,
                changes TEXT NOT NULL DEFAULT '{}',
                ip TEXT,
                user_agent TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_audit_log_actor ON audit_log(actor_id, created_at);
            ",
        )
        .expect("failed to run migrations");

        seed_default_world(&conn);
    }
}

/// Minimal default world so a fresh database is immediately usable:
/// a starter race, a starter zone with no exits, and the weapon/magic
/// affinities referenced by the combat engine's default feedback loop.
fn seed_default_world(conn: &Connection) {
    let race_count: i64 = conn
        .query_row("SELECT COUNT(*) FROM races", [], |r| r.get(0))
        .unwrap_or(0);
    if race_count == 0 {
        conn.execute(
            "INSERT INTO races (id, name, str_mod, vit_mod, dex_mod, int_mod, wis_mod, exp_bonus_multiplier, starting_gold, starting_zone_key)
             VALUES ('human', 'Human', 0, 0, 0, 0, 0, 1.0, 50, 'town-square')",
            [],
        )
        .ok();
    }

    let zone_count: i64 = conn
        .query_row("SELECT COUNT(*) FROM zones", [], |r| r.get(0))
        .unwrap_or(0);
    if zone_count == 0 {
        conn.execute(
            "INSERT INTO zones (id, internal_name, zone_type, level_min, level_max, pvp_enabled, safe_zone, climate, terrain, lighting, map_x, map_y, map_layer, spawn_rate)
             VALUES ('town-square', 'town-square', 'city', 1, 1000, 0, 1, 'temperate', 'cobblestone', 'bright', 0, 0, 0, 0.0)",
            [],
        )
        .ok();
    }

    let affinity_count: i64 = conn
        .query_row("SELECT COUNT(*) FROM affinities", [], |r| r.get(0))
        .unwrap_or(0);
    if affinity_count == 0 {
        conn.execute(
            "INSERT INTO affinities (id, name, affinity_type, max_tier) VALUES ('sword', 'sword', 'weapon', 7)",
            [],
        )
        .ok();
        conn.execute(
            "INSERT INTO affinities (id, name, affinity_type, max_tier) VALUES ('fire', 'fire', 'magic', 7)",
            [],
        )
        .ok();
    }
}
