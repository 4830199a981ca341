//! Character creation and lookup. There's no dedicated character engine —
//! creation is a single insert gated by the race catalogue and an
//! account-level cap, and reads go straight through the relational store;
//! everything past creation (movement, combat, progression, affinity) is
//! its own engine.

use crate::error::Surface;
use crate::models::Character;
use crate::routes::Authenticated;
use crate::AppState;
use rocket::serde::json::Json;
use rocket::{get, post, State};
use rusqlite::{params, OptionalExtension};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct CreateCharacterRequest {
    pub name: String,
    pub race_id: String,
}

#[post("/api/v1/characters", data = "<body>")]
pub async fn create_character(state: &State<Arc<AppState>>, auth: Authenticated, body: Json<CreateCharacterRequest>) -> Result<Json<Character>, Surface> {
    let name = body.name.trim();
    if !(3..=24).contains(&name.len()) {
        return Err(Surface::validation("character name must be 3-24 characters"));
    }

    let Some(race) = state.races.get(&body.race_id).await else {
        return Err(Surface::validation("unknown race"));
    };

    let existing_count: i64 = {
        let conn = state.db.conn.lock().unwrap();
        conn.query_row(
            "SELECT COUNT(*) FROM characters WHERE account_id = ?1 AND deleted_at IS NULL",
            params![auth.account.account_id],
            |r| r.get(0),
        )?
    };
    if existing_count as usize >= state.settings.character_cap_per_account {
        return Err(Surface::gated("CharacterCapReached", "character slot limit reached", None));
    }

    let id = uuid::Uuid::new_v4().to_string();
    let str_stat = 10 + race.str_mod;
    let vit = 10 + race.vit_mod;
    let dex = 10 + race.dex_mod;
    let int_stat = 10 + race.int_mod;
    let wis = 10 + race.wis_mod;
    let max_hp = 100 + vit * 10;
    let max_mp = 50 + int_stat * 5;

    {
        let conn = state.db.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO characters (id, account_id, race_id, name, name_lower, level, experience, next_level_exp, status,
                                      str_stat, vit, dex, int_stat, wis, hp, max_hp, mp, max_mp, current_zone_id, gold)
             VALUES (?1, ?2, ?3, ?4, ?5, 1, '0', '1000', 'normal', ?6, ?7, ?8, ?9, ?10, ?11, ?11, ?12, ?12, ?13, ?14)",
            params![
                id,
                auth.account.account_id,
                race.id,
                name,
                name.to_lowercase(),
                str_stat,
                vit,
                dex,
                int_stat,
                wis,
                max_hp,
                max_mp,
                race.starting_zone_key,
                race.starting_gold,
            ],
        )
        .map_err(|e| if e.to_string().contains("UNIQUE") { Surface::conflict("character name already taken") } else { Surface::from(e) })?;
    }

    state.zones.enter(&race.starting_zone_key, &id).await;

    load_character(&state.db, &id)?.ok_or_else(|| Surface::internal("character row missing immediately after insert")).map(Json)
}

#[get("/api/v1/characters")]
pub fn list_characters(state: &State<Arc<AppState>>, auth: Authenticated) -> Result<Json<Vec<Character>>, Surface> {
    let conn = state.db.conn.lock().unwrap();
    let mut stmt = conn.prepare(
        "SELECT id, account_id, race_id, name, level, experience, next_level_exp, status, str_stat, vit, dex, int_stat, wis,
                hp, max_hp, mp, max_mp, current_zone_id, x, y, gold, titles, active_title, available_stat_points, deleted_at
         FROM characters WHERE account_id = ?1 AND deleted_at IS NULL ORDER BY name",
    )?;
    let rows = stmt.query_map(params![auth.account.account_id], row_to_character)?;
    Ok(Json(rows.filter_map(Result::ok).collect()))
}

#[get("/api/v1/characters/<id>")]
pub fn get_character(state: &State<Arc<AppState>>, _auth: Authenticated, id: &str) -> Result<Json<Character>, Surface> {
    load_character(&state.db, id)?.ok_or_else(|| Surface::not_found("character not found")).map(Json)
}

#[post("/api/v1/characters/<id>/delete")]
pub fn delete_character(state: &State<Arc<AppState>>, auth: Authenticated, id: &str) -> Result<Json<serde_json::Value>, Surface> {
    let now = chrono::Utc::now().to_rfc3339();
    let conn = state.db.conn.lock().unwrap();
    let affected = conn.execute(
        "UPDATE characters SET deleted_at = ?1 WHERE id = ?2 AND account_id = ?3 AND deleted_at IS NULL",
        params![now, id, auth.account.account_id],
    )?;
    if affected == 0 {
        return Err(Surface::not_found("character not found"));
    }
    Ok(Json(serde_json::json!({ "deleted": true })))
}

#[get("/api/v1/races")]
pub async fn list_races(state: &State<Arc<AppState>>, _auth: Authenticated) -> Json<Vec<crate::models::Race>> {
    Json(state.races.list().await)
}

#[get("/api/v1/characters/name_available?<name>")]
pub fn name_available(state: &State<Arc<AppState>>, _auth: Authenticated, name: &str) -> Json<serde_json::Value> {
    let available = (3..=24).contains(&name.trim().len()) && {
        let conn = state.db.conn.lock().unwrap();
        let taken: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM characters WHERE name_lower = ?1 AND deleted_at IS NULL",
                params![name.trim().to_lowercase()],
                |r| r.get(0),
            )
            .unwrap_or(1);
        taken == 0
    };
    Json(serde_json::json!({ "available": available }))
}

fn load_character(db: &crate::db::Db, id: &str) -> Result<Option<Character>, Surface> {
    let conn = db.conn.lock().unwrap();
    conn.query_row(
        "SELECT id, account_id, race_id, name, level, experience, next_level_exp, status, str_stat, vit, dex, int_stat, wis,
                hp, max_hp, mp, max_mp, current_zone_id, x, y, gold, titles, active_title, available_stat_points, deleted_at
         FROM characters WHERE id = ?1 AND deleted_at IS NULL",
        params![id],
        row_to_character,
    )
    .optional()
    .map_err(Surface::from)
}

fn row_to_character(row: &rusqlite::Row) -> Result<Character, rusqlite::Error> {
    let status: String = row.get(7)?;
    let titles: String = row.get(21)?;
    Ok(Character {
        id: row.get(0)?,
        account_id: row.get(1)?,
        race_id: row.get(2)?,
        name: row.get(3)?,
        level: row.get(4)?,
        experience: row.get(5)?,
        next_level_exp: row.get(6)?,
        status: match status.as_str() {
            "combat" => crate::models::CharacterStatus::Combat,
            "dead" => crate::models::CharacterStatus::Dead,
            "busy" => crate::models::CharacterStatus::Busy,
            _ => crate::models::CharacterStatus::Normal,
        },
        str_stat: row.get(8)?,
        vit: row.get(9)?,
        dex: row.get(10)?,
        int_stat: row.get(11)?,
        wis: row.get(12)?,
        hp: row.get(13)?,
        max_hp: row.get(14)?,
        mp: row.get(15)?,
        max_mp: row.get(16)?,
        current_zone_id: row.get(17)?,
        x: row.get(18)?,
        y: row.get(19)?,
        gold: row.get(20)?,
        titles: serde_json::from_str(&titles).unwrap_or_default(),
        active_title: row.get(22)?,
        available_stat_points: row.get(23)?,
        deleted_at: row.get(24)?,
    })
}
