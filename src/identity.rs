//! Identity. Credential verification with lock-on-5-in-15min,
//! short-lived signed access tokens and longer-lived signed refresh tokens,
//! single-use refresh rotation with family revocation on replay, and
//! password-reset token issuance. Password hashing is Argon2, tokens are
//! HS256 JWTs, both invoked by name rather than re-derived here.

use crate::audit::AuditLog;
use crate::cache::{self, KvCache};
use crate::config::Settings;
use crate::db::Db;
use crate::models::{Account, AccountSecurity, AccountStatus, AuditEntry, Role};
use crate::session::{SessionMetadata, SessionStore};
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("account locked until {until}")]
    AccountLocked { until: String },
    #[error("account suspended")]
    AccountSuspended,
    #[error("email not verified")]
    EmailNotVerified,
    #[error("token expired")]
    TokenExpired,
    #[error("token reused")]
    TokenReused,
    #[error("{0}")]
    Validation(String),
    #[error("{0} already in use")]
    Conflict(&'static str),
    #[error(transparent)]
    Db(#[from] rusqlite::Error),
    #[error(transparent)]
    Cache(#[from] crate::cache::CacheError),
}

#[derive(Debug, Serialize, Deserialize)]
struct AccessClaims {
    sub: String,
    role: Role,
    token_type: String,
    exp: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct RefreshClaims {
    sub: String,
    token_type: String,
    family_id: String,
    exp: usize,
}

pub struct AuthenticatedAccount {
    pub account_id: String,
    pub role: Role,
}

pub struct SignInResult {
    pub account: Account,
    pub access_token: String,
    pub refresh_token: String,
}

pub struct Identity {
    db: Arc<Db>,
    cache: Arc<dyn KvCache>,
    sessions: Arc<SessionStore>,
    audit: Arc<AuditLog>,
    settings: Arc<Settings>,
}

impl Identity {
    pub fn new(db: Arc<Db>, cache: Arc<dyn KvCache>, sessions: Arc<SessionStore>, audit: Arc<AuditLog>, settings: Arc<Settings>) -> Self {
        Self { db, cache, sessions, audit, settings }
    }

    pub fn register(&self, email: &str, username: &str, password: &str) -> Result<Account, IdentityError> {
        validate_username(username)?;
        validate_password(password)?;
        validate_email(email)?;

        let password_hash = hash_password(password);
        let conn = self.db.conn.lock().unwrap();
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let email_lower = email.to_lowercase();
        let username_lower = username.to_lowercase();

        conn.execute(
            "INSERT INTO accounts (id, email, email_lower, username, username_lower, password_hash, status, role, email_verified, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'active', 'player', 0, ?7)",
            params![id, email, email_lower, username, username_lower, password_hash, now],
        )
        .map_err(|e| {
            if e.to_string().contains("UNIQUE") {
                IdentityError::Conflict("email or username")
            } else {
                IdentityError::Db(e)
            }
        })?;
        conn.execute("INSERT INTO account_security (account_id, login_attempts) VALUES (?1, 0)", params![id])?;

        Ok(Account {
            id,
            email: email.to_string(),
            username: username.to_string(),
            password_hash: String::new(),
            status: AccountStatus::Active,
            role: Role::Player,
            email_verified: false,
            created_at: now,
            last_login: None,
        })
    }

    pub async fn sign_in(&self, identifier: &str, password: &str, metadata: SessionMetadata) -> Result<SignInResult, IdentityError> {
        let identifier_lower = identifier.to_lowercase();
        let (account, security) = {
            let conn = self.db.conn.lock().unwrap();
            let account = load_account_by_identifier(&conn, &identifier_lower)?;
            let Some(account) = account else {
                return Err(IdentityError::InvalidCredentials);
            };
            let security = load_security(&conn, &account.id)?;
            (account, security)
        };

        if let Some(locked_until) = &security.locked_until {
            let until: DateTime<Utc> = locked_until.parse().unwrap_or(Utc::now());
            if until > Utc::now() {
                self.audit.record(AuditEntry {
                    actor_id: Some(account.id.clone()),
                    action: "sign_in.denied.locked".to_string(),
                    resource_type: "account".to_string(),
                    resource_id: Some(account.id.clone()),
                    changes: serde_json::json!({}),
                    ip: metadata.ip.clone(),
                    user_agent: metadata.user_agent.clone(),
                });
                return Err(IdentityError::AccountLocked { until: locked_until.clone() });
            }
        }

        if account.status == AccountStatus::Suspended || account.status == AccountStatus::Banned {
            return Err(IdentityError::AccountSuspended);
        }

        if !verify_password(password, &account.password_hash) {
            self.register_failed_attempt(&account.id, &metadata)?;
            return Err(IdentityError::InvalidCredentials);
        }

        {
            let conn = self.db.conn.lock().unwrap();
            conn.execute(
                "UPDATE account_security SET login_attempts = 0, locked_until = NULL WHERE account_id = ?1",
                params![account.id],
            )?;
            conn.execute("UPDATE accounts SET last_login = ?1 WHERE id = ?2", params![Utc::now().to_rfc3339(), account.id])?;
        }

        let family_id = uuid::Uuid::new_v4().to_string();
        let access_token = self.issue_access_token(&account)?;
        let refresh_token = self.issue_refresh_token(&account.id, &family_id)?;
        self.store_refresh_fingerprint(&account.id, &family_id, &refresh_token).await;

        Ok(SignInResult { account, access_token, refresh_token })
    }

    fn register_failed_attempt(&self, account_id: &str, metadata: &SessionMetadata) -> Result<(), IdentityError> {
        let conn = self.db.conn.lock().unwrap();
        conn.execute("UPDATE account_security SET login_attempts = login_attempts + 1 WHERE account_id = ?1", params![account_id])?;
        let attempts: i64 = conn.query_row("SELECT login_attempts FROM account_security WHERE account_id = ?1", params![account_id], |r| r.get(0))?;
        if attempts >= self.settings.login_lockout_threshold as i64 {
            let until = (Utc::now() + ChronoDuration::from_std(self.settings.login_lockout_cooldown).unwrap()).to_rfc3339();
            conn.execute("UPDATE account_security SET locked_until = ?1 WHERE account_id = ?2", params![until, account_id])?;
        }
        drop(conn);
        self.audit.record(AuditEntry {
            actor_id: Some(account_id.to_string()),
            action: "sign_in.denied.bad_credentials".to_string(),
            resource_type: "account".to_string(),
            resource_id: Some(account_id.to_string()),
            changes: serde_json::json!({}),
            ip: metadata.ip.clone(),
            user_agent: metadata.user_agent.clone(),
        });
        Ok(())
    }

    fn issue_access_token(&self, account: &Account) -> Result<String, IdentityError> {
        let exp = (Utc::now() + ChronoDuration::from_std(self.settings.access_token_ttl).unwrap()).timestamp() as usize;
        let claims = AccessClaims { sub: account.id.clone(), role: account.role, token_type: "access".to_string(), exp };
        jsonwebtoken::encode(&Header::default(), &claims, &EncodingKey::from_secret(self.settings.jwt_secret.as_bytes()))
            .map_err(|_| IdentityError::Validation("token encoding failed".to_string()))
    }

    fn issue_refresh_token(&self, account_id: &str, family_id: &str) -> Result<String, IdentityError> {
        let exp = (Utc::now() + ChronoDuration::from_std(self.settings.refresh_token_ttl).unwrap()).timestamp() as usize;
        let claims = RefreshClaims { sub: account_id.to_string(), token_type: "refresh".to_string(), family_id: family_id.to_string(), exp };
        jsonwebtoken::encode(&Header::default(), &claims, &EncodingKey::from_secret(self.settings.jwt_secret.as_bytes()))
            .map_err(|_| IdentityError::Validation("token encoding failed".to_string()))
    }

    fn refresh_fingerprint_key(account_id: &str, family_id: &str) -> String {
        format!("refresh_fp:{account_id}:{family_id}")
    }

    async fn store_refresh_fingerprint(&self, account_id: &str, family_id: &str, token: &str) {
        let fp = fingerprint(token);
        let _ = cache::set(
            self.cache.as_ref(),
            &Self::refresh_fingerprint_key(account_id, family_id),
            &fp,
            self.settings.refresh_token_ttl.as_secs(),
        )
        .await;
    }

    pub fn verify_access_token(&self, token: &str) -> Result<AuthenticatedAccount, IdentityError> {
        let claims = jsonwebtoken::decode::<AccessClaims>(token, &DecodingKey::from_secret(self.settings.jwt_secret.as_bytes()), &Validation::default())
            .map_err(|_| IdentityError::TokenExpired)?
            .claims;
        if claims.token_type != "access" {
            return Err(IdentityError::InvalidCredentials);
        }
        Ok(AuthenticatedAccount { account_id: claims.sub, role: claims.role })
    }

    /// Refresh is single-use: rotating a token invalidates the prior one in
    /// its family by replacing the stored fingerprint. A replayed token
    /// (fingerprint mismatch) revokes the whole family.
    pub async fn refresh(&self, refresh_token: &str) -> Result<SignInResult, IdentityError> {
        let claims = jsonwebtoken::decode::<RefreshClaims>(
            refresh_token,
            &DecodingKey::from_secret(self.settings.jwt_secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|_| IdentityError::TokenExpired)?
        .claims;
        if claims.token_type != "refresh" {
            return Err(IdentityError::InvalidCredentials);
        }

        let stored_fp: Option<String> = cache::get(self.cache.as_ref(), &Self::refresh_fingerprint_key(&claims.sub, &claims.family_id)).await;
        let presented_fp = fingerprint(refresh_token);
        if stored_fp.as_deref() != Some(presented_fp.as_str()) {
            let _ = self.cache.delete(&Self::refresh_fingerprint_key(&claims.sub, &claims.family_id)).await;
            self.sessions.destroy_all_for(&claims.sub).await;
            self.audit.record(AuditEntry {
                actor_id: Some(claims.sub.clone()),
                action: "refresh.denied.reused".to_string(),
                resource_type: "account".to_string(),
                resource_id: Some(claims.sub.clone()),
                changes: serde_json::json!({}),
                ip: None,
                user_agent: None,
            });
            return Err(IdentityError::TokenReused);
        }

        let account = {
            let conn = self.db.conn.lock().unwrap();
            load_account_by_id(&conn, &claims.sub)?.ok_or(IdentityError::InvalidCredentials)?
        };
        let access_token = self.issue_access_token(&account)?;
        let new_refresh = self.issue_refresh_token(&account.id, &claims.family_id)?;
        self.store_refresh_fingerprint(&account.id, &claims.family_id, &new_refresh).await;
        Ok(SignInResult { account, access_token, refresh_token: new_refresh })
    }

    pub async fn sign_out(&self, access_token: &str) {
        let key = format!("blacklist:{}", fingerprint(access_token));
        let _ = cache::set(self.cache.as_ref(), &key, &true, self.settings.access_token_ttl.as_secs()).await;
    }

    pub async fn is_blacklisted(&self, access_token: &str) -> bool {
        self.cache.exists(&format!("blacklist:{}", fingerprint(access_token))).await
    }

    pub async fn forgot_password(&self, email: &str) -> Result<(), IdentityError> {
        let account_id = {
            let conn = self.db.conn.lock().unwrap();
            load_account_by_identifier(&conn, &email.to_lowercase())?.map(|a| a.id)
        };
        let Some(account_id) = account_id else {
            return Ok(()); // do not reveal account existence
        };
        let token = uuid::Uuid::new_v4().to_string();
        let _ = cache::set(self.cache.as_ref(), &format!("reset:{account_id}"), &token, self.settings.reset_token_ttl.as_secs()).await;
        Ok(())
    }

    pub async fn reset_password(&self, account_id: &str, reset_token: &str, new_password: &str) -> Result<(), IdentityError> {
        let stored: Option<String> = cache::get(self.cache.as_ref(), &format!("reset:{account_id}")).await;
        if stored.as_deref() != Some(reset_token) {
            return Err(IdentityError::TokenExpired);
        }
        validate_password(new_password)?;
        let hash = hash_password(new_password);
        {
            let conn = self.db.conn.lock().unwrap();
            conn.execute("UPDATE accounts SET password_hash = ?1 WHERE id = ?2", params![hash, account_id])?;
        }
        let _ = self.cache.delete(&format!("reset:{account_id}")).await;
        self.sessions.destroy_all_for(account_id).await;
        Ok(())
    }
}

fn fingerprint(token: &str) -> String {
    use sha2::{Digest, Sha256};
    hex::encode(Sha256::digest(token.as_bytes()))
}

fn hash_password(password: &str) -> String {
    let salt = SaltString::generate(&mut argon2::password_hash::rand_core::OsRng);
    Argon2::default().hash_password(password.as_bytes(), &salt).expect("argon2 hashing failed").to_string()
}

fn verify_password(password: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else { return false };
    Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok()
}

fn validate_username(username: &str) -> Result<(), IdentityError> {
    let len_ok = (3..=20).contains(&username.len());
    let chars_ok = username.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if len_ok && chars_ok {
        Ok(())
    } else {
        Err(IdentityError::Validation("username must be 3-20 characters of [A-Za-z0-9_]".to_string()))
    }
}

fn validate_password(password: &str) -> Result<(), IdentityError> {
    let has_upper = password.chars().any(|c| c.is_ascii_uppercase());
    let has_lower = password.chars().any(|c| c.is_ascii_lowercase());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    if password.len() >= 8 && has_upper && has_lower && has_digit {
        Ok(())
    } else {
        Err(IdentityError::Validation("password must be >= 8 characters with upper, lower, and digit".to_string()))
    }
}

fn validate_email(email: &str) -> Result<(), IdentityError> {
    let valid = email.split('@').count() == 2 && email.contains('.') && !email.starts_with('@') && !email.ends_with('@');
    if valid {
        Ok(())
    } else {
        Err(IdentityError::Validation("invalid email".to_string()))
    }
}

fn load_account_by_identifier(conn: &rusqlite::Connection, identifier_lower: &str) -> Result<Option<Account>, rusqlite::Error> {
    conn.query_row(
        "SELECT id, email, username, password_hash, status, role, email_verified, created_at, last_login
         FROM accounts WHERE email_lower = ?1 OR username_lower = ?1",
        params![identifier_lower],
        row_to_account,
    )
    .optional()
}

fn load_account_by_id(conn: &rusqlite::Connection, id: &str) -> Result<Option<Account>, rusqlite::Error> {
    conn.query_row(
        "SELECT id, email, username, password_hash, status, role, email_verified, created_at, last_login
         FROM accounts WHERE id = ?1",
        params![id],
        row_to_account,
    )
    .optional()
}

fn row_to_account(row: &rusqlite::Row) -> Result<Account, rusqlite::Error> {
    let status: String = row.get(4)?;
    let role: String = row.get(5)?;
    Ok(Account {
        id: row.get(0)?,
        email: row.get(1)?,
        username: row.get(2)?,
        password_hash: row.get(3)?,
        status: match status.as_str() {
            "suspended" => AccountStatus::Suspended,
            "banned" => AccountStatus::Banned,
            _ => AccountStatus::Active,
        },
        role: match role.as_str() {
            "moderator" => Role::Moderator,
            "admin" => Role::Admin,
            _ => Role::Player,
        },
        email_verified: row.get::<_, i64>(6)? != 0,
        created_at: row.get(7)?,
        last_login: row.get(8)?,
    })
}

fn load_security(conn: &rusqlite::Connection, account_id: &str) -> Result<AccountSecurity, rusqlite::Error> {
    conn.query_row(
        "SELECT account_id, login_attempts, locked_until FROM account_security WHERE account_id = ?1",
        params![account_id],
        |row| {
            Ok(AccountSecurity {
                account_id: row.get(0)?,
                login_attempts: row.get(1)?,
                locked_until: row.get(2)?,
            })
        },
    )
}
