// Route module decomposition — each domain area in its own file.
// Shared request guards live here; route functions in submodules.

pub mod affinity;
pub mod auth;
pub mod characters;
pub mod combat;
pub mod progression;
pub mod system;
pub mod ws;
pub mod zones;

pub use system::{not_found, too_many_requests};

use crate::identity::AuthenticatedAccount;
use crate::AppState;
use rocket::http::Status;
use rocket::request::{FromRequest, Outcome, Request};
use rocket::State;

pub struct ClientIp(pub String);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for ClientIp {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let ip = req
            .headers()
            .get_one("X-Forwarded-For")
            .and_then(|s| s.split(',').next())
            .map(|s| s.trim().to_string())
            .or_else(|| req.remote().map(|r| r.ip().to_string()))
            .unwrap_or_else(|| "unknown".to_string());
        Outcome::Success(ClientIp(ip))
    }
}

/// Extracts and verifies the bearer access token on a request. Every
/// authenticated route takes `Authenticated` instead of reaching into the
/// header itself.
pub struct Authenticated {
    pub account: AuthenticatedAccount,
    pub token: String,
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for Authenticated {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let Some(state) = req.guard::<&State<std::sync::Arc<AppState>>>().await.succeeded() else {
            return Outcome::Error((Status::InternalServerError, ()));
        };
        let Some(token) = req.headers().get_one("Authorization").and_then(|h| h.strip_prefix("Bearer ")) else {
            return Outcome::Error((Status::Unauthorized, ()));
        };
        if state.identity.is_blacklisted(token).await {
            return Outcome::Error((Status::Unauthorized, ()));
        }
        match state.identity.verify_access_token(token) {
            Ok(account) => Outcome::Success(Authenticated { account, token: token.to_string() }),
            Err(_) => Outcome::Error((Status::Unauthorized, ())),
        }
    }
}
