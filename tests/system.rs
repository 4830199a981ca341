mod common;

use common::TestApp;
use rocket::http::Status;

#[test]
fn health_check_reports_ok_without_touching_any_dependency() {
    let app = TestApp::new();
    let response = app.client.get("/api/v1/health").dispatch();
    assert_eq!(response.status(), Status::Ok);
    let body: serde_json::Value = response.into_json().unwrap();
    assert_eq!(body["status"], "ok");
}

#[test]
fn readiness_reports_ok_when_the_database_and_cache_are_reachable() {
    let app = TestApp::new();
    let response = app.client.get("/api/v1/ready").dispatch();
    assert_eq!(response.status(), Status::Ok);
}

#[test]
fn unknown_routes_return_a_structured_404_body() {
    let app = TestApp::new();
    let response = app.client.get("/api/v1/does-not-exist").dispatch();
    assert_eq!(response.status(), Status::NotFound);
    let body: serde_json::Value = response.into_json().unwrap();
    assert_eq!(body["error"]["code"], "NotFound");
}
