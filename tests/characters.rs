mod common;

use common::TestApp;
use rocket::http::{Header, Status};

fn auth_header(token: &str) -> Header<'static> {
    Header::new("Authorization", format!("Bearer {token}"))
}

#[test]
fn creating_a_character_places_it_in_the_races_starting_zone() {
    let app = TestApp::new();
    let token = common::register_and_sign_in(&app, "hero@example.com", "hero", "correct horse battery staple");

    let body = serde_json::json!({ "name": "Aldric", "race_id": "human" });
    let response = app.client.post("/api/v1/characters").header(auth_header(&token)).json(&body).dispatch();
    assert_eq!(response.status(), Status::Ok);
    let character: serde_json::Value = response.into_json().unwrap();
    assert_eq!(character["name"], "Aldric");
    assert_eq!(character["level"], 1);
    assert_eq!(character["current_zone_id"], "town-square");
}

#[test]
fn character_names_shorter_than_three_characters_are_rejected() {
    let app = TestApp::new();
    let token = common::register_and_sign_in(&app, "short@example.com", "short", "correct horse battery staple");

    let body = serde_json::json!({ "name": "Al", "race_id": "human" });
    let response = app.client.post("/api/v1/characters").header(auth_header(&token)).json(&body).dispatch();
    assert_eq!(response.status(), Status::BadRequest);
}

#[test]
fn unknown_race_is_rejected() {
    let app = TestApp::new();
    let token = common::register_and_sign_in(&app, "norace@example.com", "norace", "correct horse battery staple");

    let body = serde_json::json!({ "name": "Nobody", "race_id": "not-a-real-race" });
    let response = app.client.post("/api/v1/characters").header(auth_header(&token)).json(&body).dispatch();
    assert_eq!(response.status(), Status::BadRequest);
}

#[test]
fn duplicate_character_names_conflict() {
    let app = TestApp::new();
    let token = common::register_and_sign_in(&app, "namer@example.com", "namer", "correct horse battery staple");

    let body = serde_json::json!({ "name": "Sameface", "race_id": "human" });
    let first = app.client.post("/api/v1/characters").header(auth_header(&token)).json(&body).dispatch();
    assert_eq!(first.status(), Status::Ok);

    let second = app.client.post("/api/v1/characters").header(auth_header(&token)).json(&body).dispatch();
    assert_eq!(second.status(), Status::Conflict);
}

#[test]
fn listing_characters_returns_only_the_callers_own() {
    let app = TestApp::new();
    let token_a = common::register_and_sign_in(&app, "a@example.com", "account_a", "correct horse battery staple");
    let token_b = common::register_and_sign_in(&app, "b@example.com", "account_b", "correct horse battery staple");

    let body = serde_json::json!({ "name": "Avatar", "race_id": "human" });
    app.client.post("/api/v1/characters").header(auth_header(&token_a)).json(&body).dispatch();

    let response = app.client.get("/api/v1/characters").header(auth_header(&token_b)).dispatch();
    let characters: serde_json::Value = response.into_json().unwrap();
    assert_eq!(characters.as_array().unwrap().len(), 0);
}
