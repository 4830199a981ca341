//! Per-engine configuration, read directly from the environment with defaults.
//!
//! Full environment/config-file loading and the command-line launcher are
//! external collaborators; this module only gives them something
//! concrete to construct and pass in.

use std::env;
use std::time::Duration;

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Sliding-window limiter profile: max events allowed per window.
#[derive(Debug, Clone, Copy)]
pub struct LimiterProfile {
    pub max_events: usize,
    pub window_ms: u64,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub database_path: String,
    pub redis_url: String,
    pub jwt_secret: String,
    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
    pub reset_token_ttl: Duration,
    pub session_ttl_secs: u64,
    pub session_cap_per_account: usize,
    pub character_cap_per_account: usize,
    pub login_lockout_threshold: u32,
    pub login_lockout_window: Duration,
    pub login_lockout_cooldown: Duration,
    pub lock_acquire_timeout_ms: u64,

    pub limiter_sign_in: LimiterProfile,
    pub limiter_chat: LimiterProfile,
    pub limiter_movement: LimiterProfile,
    pub limiter_combat_action: LimiterProfile,
    pub limiter_affinity_award: LimiterProfile,
}

impl Settings {
    pub fn from_env() -> Self {
        Self {
            database_path: env_string("DATABASE_PATH", "data/realmkeep.db"),
            redis_url: env_string("REDIS_URL", "redis://127.0.0.1:6379"),
            jwt_secret: env_string("JWT_SECRET", "dev-secret-change-me"),
            access_token_ttl: Duration::from_secs(env_u64("ACCESS_TOKEN_TTL_SECS", 15 * 60)),
            refresh_token_ttl: Duration::from_secs(env_u64("REFRESH_TOKEN_TTL_SECS", 7 * 24 * 60 * 60)),
            reset_token_ttl: Duration::from_secs(env_u64("RESET_TOKEN_TTL_SECS", 60 * 60)),
            session_ttl_secs: env_u64("SESSION_TTL_SECS", 30 * 60),
            session_cap_per_account: env_usize("SESSION_CAP", 5),
            character_cap_per_account: env_usize("CHARACTER_CAP", 5),
            login_lockout_threshold: env_usize("LOGIN_LOCKOUT_THRESHOLD", 5) as u32,
            login_lockout_window: Duration::from_secs(env_u64("LOGIN_LOCKOUT_WINDOW_SECS", 15 * 60)),
            login_lockout_cooldown: Duration::from_secs(env_u64("LOGIN_LOCKOUT_COOLDOWN_SECS", 15 * 60)),
            lock_acquire_timeout_ms: env_u64("LOCK_ACQUIRE_TIMEOUT_MS", 500),

            limiter_sign_in: LimiterProfile { max_events: 5, window_ms: 15 * 60 * 1000 },
            limiter_chat: LimiterProfile { max_events: 10, window_ms: 60 * 1000 },
            limiter_movement: LimiterProfile { max_events: 2, window_ms: 1000 },
            limiter_combat_action: LimiterProfile { max_events: 1, window_ms: 1000 },
            limiter_affinity_award: LimiterProfile { max_events: 1, window_ms: 500 },
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_env()
    }
}
