mod common;

use common::TestApp;
use rocket::http::{Header, Status};

fn auth_header(token: &str) -> Header<'static> {
    Header::new("Authorization", format!("Bearer {token}"))
}

fn create_character(app: &TestApp, token: &str, name: &str) -> String {
    let body = serde_json::json!({ "name": name, "race_id": "human" });
    let response = app.client.post("/api/v1/characters").header(auth_header(token)).json(&body).dispatch();
    let character: serde_json::Value = response.into_json().unwrap();
    character["id"].as_str().unwrap().to_string()
}

fn start_session_against_a_monster(app: &TestApp, token: &str, character_id: &str) -> String {
    let body = serde_json::json!({
        "session_type": "pve",
        "initiator": character_id,
        "target": null,
        "zone_id": "town-square",
        "participants": [
            {
                "character_id": character_id,
                "participant_type": "player",
                "side": "attackers",
                "max_hp": 110,
                "max_mp": 55,
                "str_stat": 10,
                "vit": 10,
                "dex": 10,
                "int_stat": 10,
                "wis": 10,
                "level": 1
            },
            {
                "character_id": null,
                "participant_type": "monster",
                "side": "defenders",
                "max_hp": 40,
                "max_mp": 0,
                "str_stat": 6,
                "vit": 6,
                "dex": 6,
                "int_stat": 4,
                "wis": 4,
                "level": 1
            }
        ]
    });
    let response = app.client.post("/api/v1/combat/start").header(auth_header(token)).json(&body).dispatch();
    assert_eq!(response.status(), Status::Ok);
    let result: serde_json::Value = response.into_json().unwrap();
    result["session_id"].as_str().unwrap().to_string()
}

#[test]
fn starting_a_session_returns_a_session_id() {
    let app = TestApp::new();
    let token = common::register_and_sign_in(&app, "fighter@example.com", "fighter", "correct horse battery staple");
    let character_id = create_character(&app, &token, "Fighter");
    let session_id = start_session_against_a_monster(&app, &token, &character_id);
    assert!(!session_id.is_empty());
}

#[test]
fn acting_for_a_nonexistent_session_is_not_found() {
    let app = TestApp::new();
    let token = common::register_and_sign_in(&app, "ghostfighter@example.com", "ghostfighter", "correct horse battery staple");

    let body = serde_json::json!({ "participant_id": "nobody", "action_type": "attack", "target_id": null });
    let response = app.client.post("/api/v1/combat/no-such-session/action").header(auth_header(&token)).json(&body).dispatch();
    assert_eq!(response.status(), Status::NotFound);
}

#[test]
fn fleeing_a_nonexistent_session_is_not_found() {
    let app = TestApp::new();
    let token = common::register_and_sign_in(&app, "runner@example.com", "runner", "correct horse battery staple");

    let body = serde_json::json!({ "participant_id": "nobody" });
    let response = app.client.post("/api/v1/combat/no-such-session/flee").header(auth_header(&token)).json(&body).dispatch();
    assert_eq!(response.status(), Status::NotFound);
}
