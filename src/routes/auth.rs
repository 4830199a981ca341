use crate::error::Surface;
use crate::identity::IdentityError;
use crate::routes::{Authenticated, ClientIp};
use crate::session::SessionMetadata;
use crate::AppState;
use rocket::serde::json::Json;
use rocket::{post, get, State};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

impl From<IdentityError> for Surface {
    fn from(e: IdentityError) -> Self {
        match e {
            IdentityError::InvalidCredentials => Surface::unauthenticated("invalid credentials"),
            IdentityError::AccountLocked { until } => {
                Surface::gated("AccountLocked", "account temporarily locked", Some(serde_json::json!({ "locked_until": until })))
            }
            IdentityError::AccountSuspended => Surface::forbidden("account suspended"),
            IdentityError::EmailNotVerified => Surface::forbidden("email not verified"),
            IdentityError::TokenExpired => Surface::unauthenticated("token expired"),
            IdentityError::TokenReused => Surface::unauthenticated("refresh token already used, sessions revoked"),
            IdentityError::Validation(msg) => Surface::validation(msg),
            IdentityError::Conflict(field) => Surface::conflict(format!("{field} already in use")),
            IdentityError::Db(e) => Surface::from(e),
            IdentityError::Cache(_) => Surface::transient("cache unavailable"),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub username: String,
    pub password: String,
}

#[post("/api/v1/auth/register", data = "<body>")]
pub fn register(state: &State<Arc<AppState>>, body: Json<RegisterRequest>) -> Result<Json<serde_json::Value>, Surface> {
    let account = state.identity.register(&body.email, &body.username, &body.password)?;
    Ok(Json(serde_json::json!({ "id": account.id, "email": account.email, "username": account.username })))
}

#[derive(Debug, Deserialize)]
pub struct SignInRequest {
    pub identifier: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct TokenPairResponse {
    pub access_token: String,
    pub refresh_token: String,
}

#[post("/api/v1/auth/sign_in", data = "<body>")]
pub async fn sign_in(state: &State<Arc<AppState>>, ip: ClientIp, body: Json<SignInRequest>) -> Result<Json<TokenPairResponse>, Surface> {
    let metadata = SessionMetadata { ip: Some(ip.0), user_agent: None, device: None };
    let result = state.identity.sign_in(&body.identifier, &body.password, metadata).await?;
    Ok(Json(TokenPairResponse { access_token: result.access_token, refresh_token: result.refresh_token }))
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[post("/api/v1/auth/refresh", data = "<body>")]
pub async fn refresh(state: &State<Arc<AppState>>, body: Json<RefreshRequest>) -> Result<Json<TokenPairResponse>, Surface> {
    let result = state.identity.refresh(&body.refresh_token).await?;
    Ok(Json(TokenPairResponse { access_token: result.access_token, refresh_token: result.refresh_token }))
}

#[post("/api/v1/auth/sign_out")]
pub async fn sign_out(state: &State<Arc<AppState>>, auth: Authenticated) -> Json<serde_json::Value> {
    state.identity.sign_out(&auth.token).await;
    Json(serde_json::json!({ "signed_out": true }))
}

#[get("/api/v1/auth/me")]
pub fn me(auth: Authenticated) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "account_id": auth.account.account_id, "role": auth.account.role }))
}

#[derive(Debug, Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

/// Always returns 200 regardless of whether the email matches an account,
/// so the response can't be used to enumerate registered addresses.
#[post("/api/v1/auth/forgot_password", data = "<body>")]
pub async fn forgot_password(state: &State<Arc<AppState>>, body: Json<ForgotPasswordRequest>) -> Result<Json<serde_json::Value>, Surface> {
    state.identity.forgot_password(&body.email).await?;
    Ok(Json(serde_json::json!({ "requested": true })))
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub account_id: String,
    pub reset_token: String,
    pub new_password: String,
}

#[post("/api/v1/auth/reset_password", data = "<body>")]
pub async fn reset_password(state: &State<Arc<AppState>>, body: Json<ResetPasswordRequest>) -> Result<Json<serde_json::Value>, Surface> {
    state.identity.reset_password(&body.account_id, &body.reset_token, &body.new_password).await?;
    Ok(Json(serde_json::json!({ "reset": true })))
}
