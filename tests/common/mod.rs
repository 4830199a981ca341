use realmkeep::rocket_with_db;
use rocket::local::blocking::Client;
use std::path::PathBuf;

/// A Redis-free test harness: each test gets its own throwaway SQLite file,
/// removed on drop so a failed test doesn't leave state for the next one.
pub struct TestApp {
    pub client: Client,
    db_path: PathBuf,
}

impl TestApp {
    pub fn new() -> Self {
        let db_path = std::env::temp_dir().join(format!("realmkeep-test-{}.sqlite", uuid::Uuid::new_v4()));
        let client = Client::tracked(rocket_with_db(db_path.to_str().unwrap())).expect("failed to build test rocket instance");
        Self { client, db_path }
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.db_path);
    }
}

pub fn register_and_sign_in(app: &TestApp, email: &str, username: &str, password: &str) -> String {
    let register_body = serde_json::json!({ "email": email, "username": username, "password": password });
    let response = app.client.post("/api/v1/auth/register").json(&register_body).dispatch();
    assert_eq!(response.status(), rocket::http::Status::Ok);

    let sign_in_body = serde_json::json!({ "identifier": email, "password": password });
    let response = app.client.post("/api/v1/auth/sign_in").json(&sign_in_body).dispatch();
    assert_eq!(response.status(), rocket::http::Status::Ok);
    let body: serde_json::Value = response.into_json().expect("sign in response was not json");
    body["access_token"].as_str().unwrap().to_string()
}
