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

#[test]
fn a_large_enough_award_levels_up_the_character() {
    let app = TestApp::new();
    let token = common::register_and_sign_in(&app, "leveler@example.com", "leveler", "correct horse battery staple");
    let character_id = create_character(&app, &token, "Leveler");

    let body = serde_json::json!({ "character_id": character_id, "amount": "1000", "race_bonus_pct": 100, "source": "quest" });
    let response = app.client.post("/api/v1/progression/award").header(auth_header(&token)).json(&body).dispatch();
    assert_eq!(response.status(), Status::Ok);
    let result: serde_json::Value = response.into_json().unwrap();
    assert_eq!(result["levels_gained"], 1);
    assert_eq!(result["new_level"], 2);
}

#[test]
fn a_small_award_accumulates_without_leveling() {
    let app = TestApp::new();
    let token = common::register_and_sign_in(&app, "trickle@example.com", "trickle", "correct horse battery staple");
    let character_id = create_character(&app, &token, "Trickle");

    let body = serde_json::json!({ "character_id": character_id, "amount": "10", "race_bonus_pct": 100, "source": "exploration" });
    let response = app.client.post("/api/v1/progression/award").header(auth_header(&token)).json(&body).dispatch();
    let result: serde_json::Value = response.into_json().unwrap();
    assert_eq!(result["levels_gained"], 0);
    assert_eq!(result["new_level"], 1);
}

#[test]
fn awarding_experience_to_an_unknown_character_is_not_found() {
    let app = TestApp::new();
    let token = common::register_and_sign_in(&app, "ghost@example.com", "ghost", "correct horse battery staple");

    let body = serde_json::json!({ "character_id": "does-not-exist", "amount": "100", "race_bonus_pct": 100, "source": "admin" });
    let response = app.client.post("/api/v1/progression/award").header(auth_header(&token)).json(&body).dispatch();
    assert_eq!(response.status(), Status::NotFound);
}
