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
fn looking_from_the_starting_zone_reports_the_character_as_an_occupant() {
    let app = TestApp::new();
    let token = common::register_and_sign_in(&app, "looker@example.com", "looker", "correct horse battery staple");
    let character_id = create_character(&app, &token, "Wanderer");

    let response = app.client.get(format!("/api/v1/characters/{character_id}/look")).header(auth_header(&token)).dispatch();
    assert_eq!(response.status(), Status::Ok);
    let body: serde_json::Value = response.into_json().unwrap();
    assert_eq!(body["zone"]["id"], "town-square");
    assert!(body["occupants"].as_array().unwrap().contains(&serde_json::json!(character_id)));
}

#[test]
fn moving_in_a_direction_with_no_exit_is_a_validation_error() {
    let app = TestApp::new();
    let token = common::register_and_sign_in(&app, "stuck@example.com", "stuck", "correct horse battery staple");
    let character_id = create_character(&app, &token, "Stuck");

    let body = serde_json::json!({ "direction": "north" });
    let response = app.client.post(format!("/api/v1/characters/{character_id}/move")).header(auth_header(&token)).json(&body).dispatch();
    assert_eq!(response.status(), Status::BadRequest);
}

#[test]
fn an_unrecognized_direction_string_is_rejected() {
    let app = TestApp::new();
    let token = common::register_and_sign_in(&app, "confused@example.com", "confused", "correct horse battery staple");
    let character_id = create_character(&app, &token, "Confused");

    let body = serde_json::json!({ "direction": "sideways" });
    let response = app.client.post(format!("/api/v1/characters/{character_id}/move")).header(auth_header(&token)).json(&body).dispatch();
    assert_eq!(response.status(), Status::BadRequest);
}
