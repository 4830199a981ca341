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
fn awarding_affinity_experience_creates_a_tier_one_track() {
    let app = TestApp::new();
    let token = common::register_and_sign_in(&app, "swordsman@example.com", "swordsman", "correct horse battery staple");
    let character_id = create_character(&app, &token, "Swordsman");

    let body = serde_json::json!({ "character_id": character_id, "affinity_id": "sword", "amount": 40, "source": "combat" });
    let response = app.client.post("/api/v1/affinities/award").header(auth_header(&token)).json(&body).dispatch();
    assert_eq!(response.status(), Status::Ok);
    let result: serde_json::Value = response.into_json().unwrap();
    assert_eq!(result["previous_tier"], 1);
    assert_eq!(result["new_tier"], 1);

    let response = app.client.get(format!("/api/v1/characters/{character_id}/affinities")).header(auth_header(&token)).dispatch();
    let affinities: serde_json::Value = response.into_json().unwrap();
    assert_eq!(affinities.as_array().unwrap().len(), 1);
    assert_eq!(affinities[0]["affinity_id"], "sword");
}

#[test]
fn an_award_past_the_single_award_ceiling_is_rejected() {
    let app = TestApp::new();
    let token = common::register_and_sign_in(&app, "cheater@example.com", "cheater", "correct horse battery staple");
    let character_id = create_character(&app, &token, "Cheater");

    let body = serde_json::json!({ "character_id": character_id, "affinity_id": "sword", "amount": 999_999, "source": "combat" });
    let response = app.client.post("/api/v1/affinities/award").header(auth_header(&token)).json(&body).dispatch();
    assert_eq!(response.status(), Status::BadRequest);
}

#[test]
fn awarding_an_unknown_affinity_is_not_found() {
    let app = TestApp::new();
    let token = common::register_and_sign_in(&app, "noaffinity@example.com", "noaffinity", "correct horse battery staple");
    let character_id = create_character(&app, &token, "NoAffinity");

    let body = serde_json::json!({ "character_id": character_id, "affinity_id": "not-a-real-affinity", "amount": 10, "source": "combat" });
    let response = app.client.post("/api/v1/affinities/award").header(auth_header(&token)).json(&body).dispatch();
    assert_eq!(response.status(), Status::NotFound);
}
