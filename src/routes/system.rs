//! Health/readiness endpoints. No per-table operational stats here — just
//! enough to tell a load balancer whether this instance can serve traffic.

use crate::AppState;
use rocket::serde::json::Json;
use rocket::{get, State};
use std::sync::Arc;

#[get("/api/v1/health")]
pub fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "realmkeep",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Readiness checks both dependencies the engines actually need: the
/// relational store and the cache. A request blocks on neither for long —
/// `PING`/a trivial `SELECT 1` only.
#[get("/api/v1/ready")]
pub async fn readiness(state: &State<Arc<AppState>>) -> (rocket::http::Status, Json<serde_json::Value>) {
    let db_ok = {
        let conn = state.db.conn.lock().unwrap();
        conn.query_row("SELECT 1", [], |_| Ok(())).is_ok()
    };
    let cache_ok = state.cache.healthy().await;

    let status = if db_ok && cache_ok { rocket::http::Status::Ok } else { rocket::http::Status::ServiceUnavailable };
    (status, Json(serde_json::json!({ "db": db_ok, "cache": cache_ok })))
}

#[rocket::catch(429)]
pub fn too_many_requests() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "error": { "code": "RateLimited", "message": "rate limit exceeded" } }))
}

#[rocket::catch(404)]
pub fn not_found() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "error": { "code": "NotFound", "message": "not found" } }))
}
