mod common;

use common::TestApp;
use rocket::http::Status;

#[test]
fn register_then_sign_in_round_trips_a_usable_access_token() {
    let app = TestApp::new();
    let token = common::register_and_sign_in(&app, "player@example.com", "player_one", "correct horse battery staple");

    let response = app
        .client
        .get("/api/v1/auth/me")
        .header(rocket::http::Header::new("Authorization", format!("Bearer {token}")))
        .dispatch();
    assert_eq!(response.status(), Status::Ok);
    let body: serde_json::Value = response.into_json().unwrap();
    assert_eq!(body["role"], "player");
}

#[test]
fn duplicate_email_is_rejected_as_conflict() {
    let app = TestApp::new();
    let body = serde_json::json!({ "email": "dup@example.com", "username": "dup_one", "password": "correct horse battery staple" });
    let first = app.client.post("/api/v1/auth/register").json(&body).dispatch();
    assert_eq!(first.status(), Status::Ok);

    let body = serde_json::json!({ "email": "dup@example.com", "username": "dup_two", "password": "correct horse battery staple" });
    let second = app.client.post("/api/v1/auth/register").json(&body).dispatch();
    assert_eq!(second.status(), Status::Conflict);
}

#[test]
fn wrong_password_is_rejected_without_revealing_whether_the_account_exists() {
    let app = TestApp::new();
    let body = serde_json::json!({ "email": "wrongpw@example.com", "username": "wrongpw", "password": "correct horse battery staple" });
    app.client.post("/api/v1/auth/register").json(&body).dispatch();

    let body = serde_json::json!({ "identifier": "wrongpw@example.com", "password": "not the right password" });
    let response = app.client.post("/api/v1/auth/sign_in").json(&body).dispatch();
    assert_eq!(response.status(), Status::Unauthorized);
}

#[test]
fn protected_route_without_a_bearer_token_is_unauthorized() {
    let app = TestApp::new();
    let response = app.client.get("/api/v1/auth/me").dispatch();
    assert_eq!(response.status(), Status::Unauthorized);
}

#[test]
fn refresh_token_rotates_and_old_token_is_rejected_on_reuse() {
    let app = TestApp::new();
    let body = serde_json::json!({ "email": "rotator@example.com", "username": "rotator", "password": "correct horse battery staple" });
    app.client.post("/api/v1/auth/register").json(&body).dispatch();
    let body = serde_json::json!({ "identifier": "rotator@example.com", "password": "correct horse battery staple" });
    let response = app.client.post("/api/v1/auth/sign_in").json(&body).dispatch();
    let tokens: serde_json::Value = response.into_json().unwrap();
    let refresh_token = tokens["refresh_token"].as_str().unwrap().to_string();

    let body = serde_json::json!({ "refresh_token": refresh_token });
    let response = app.client.post("/api/v1/auth/refresh").json(&body).dispatch();
    assert_eq!(response.status(), Status::Ok);

    // Reusing the now-rotated refresh token should be treated as a replay.
    let body = serde_json::json!({ "refresh_token": refresh_token });
    let response = app.client.post("/api/v1/auth/refresh").json(&body).dispatch();
    assert_eq!(response.status(), Status::Unauthorized);
}
