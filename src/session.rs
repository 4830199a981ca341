//! Session store. Sessions live solely in the cache, keyed by
//! an opaque token, with a sliding TTL and a per-account active-session cap
//! enforced on create (oldest evicted first).

use crate::cache::{self, KvCache};
use crate::models::Session;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;

pub struct SessionStore {
    cache: Arc<dyn KvCache>,
    ttl_secs: u64,
    cap_per_account: usize,
}

#[derive(Debug, Clone, Default)]
pub struct SessionMetadata {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub device: Option<String>,
}

fn session_key(id: &str) -> String {
    format!("session:{id}")
}

fn account_index_key(account_id: &str) -> String {
    format!("session:by_account:{account_id}")
}

impl SessionStore {
    pub fn new(cache: Arc<dyn KvCache>, ttl_secs: u64, cap_per_account: usize) -> Self {
        Self { cache, ttl_secs, cap_per_account }
    }

    pub async fn create(&self, account_id: &str, character_id: Option<&str>, metadata: SessionMetadata) -> Session {
        let existing = self.cache.smembers(&account_index_key(account_id)).await;
        if existing.len() >= self.cap_per_account {
            let mut scored: Vec<(String, Session)> = Vec::new();
            for id in &existing {
                if let Some(session) = self.get_raw(id).await {
                    scored.push((id.clone(), session));
                }
            }
            scored.sort_by(|a, b| a.1.last_active.cmp(&b.1.last_active));
            if let Some((oldest_id, _)) = scored.first() {
                self.destroy(oldest_id).await;
            }
        }

        let now = Utc::now();
        let session = Session {
            id: uuid::Uuid::new_v4().to_string(),
            account_id: account_id.to_string(),
            character_id: character_id.map(str::to_string),
            created_at: now.to_rfc3339(),
            last_active: now.to_rfc3339(),
            expires_at: (now + ChronoDuration::seconds(self.ttl_secs as i64)).to_rfc3339(),
            ip: metadata.ip,
            user_agent: metadata.user_agent,
            device: metadata.device,
        };
        let _ = cache::set(self.cache.as_ref(), &session_key(&session.id), &session, self.ttl_secs).await;
        let _ = self.cache.sadd(&account_index_key(account_id), &session.id).await;
        session
    }

    async fn get_raw(&self, id: &str) -> Option<Session> {
        cache::get(self.cache.as_ref(), &session_key(id)).await
    }

    /// Returns the session, sliding `expires_at` forward. The slide is
    /// debounced to once per minute to avoid write amplification on hot
    /// sessions.
    pub async fn get(&self, id: &str) -> Option<Session> {
        let mut session = self.get_raw(id).await?;
        let now = Utc::now();
        let last_active: DateTime<Utc> = session.last_active.parse().unwrap_or(now);
        if (now - last_active) >= ChronoDuration::minutes(1) {
            session.last_active = now.to_rfc3339();
            session.expires_at = (now + ChronoDuration::seconds(self.ttl_secs as i64)).to_rfc3339();
            let _ = cache::set(self.cache.as_ref(), &session_key(id), &session, self.ttl_secs).await;
        }
        Some(session)
    }

    pub async fn destroy(&self, id: &str) {
        if let Some(session) = self.get_raw(id).await {
            let _ = self.cache.srem(&account_index_key(&session.account_id), id).await;
        }
        let _ = self.cache.delete(&session_key(id)).await;
    }

    pub async fn destroy_all_for(&self, account_id: &str) {
        let ids = self.cache.smembers(&account_index_key(account_id)).await;
        for id in ids {
            let _ = self.cache.delete(&session_key(&id)).await;
        }
        let _ = self.cache.delete(&account_index_key(account_id)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::FakeCache;

    #[tokio::test]
    async fn create_and_get_round_trips() {
        let cache: Arc<dyn KvCache> = Arc::new(FakeCache::default());
        let store = SessionStore::new(cache, 1800, 5);
        let session = store.create("acct-1", None, SessionMetadata::default()).await;
        let fetched = store.get(&session.id).await.unwrap();
        assert_eq!(fetched.account_id, "acct-1");
    }

    #[tokio::test]
    async fn exceeding_cap_evicts_oldest() {
        let cache: Arc<dyn KvCache> = Arc::new(FakeCache::default());
        let store = SessionStore::new(cache, 1800, 2);
        let first = store.create("acct-1", None, SessionMetadata::default()).await;
        let _second = store.create("acct-1", None, SessionMetadata::default()).await;
        let _third = store.create("acct-1", None, SessionMetadata::default()).await;
        assert!(store.get(&first.id).await.is_none());
    }

    #[tokio::test]
    async fn destroy_all_for_revokes_every_session() {
        let cache: Arc<dyn KvCache> = Arc::new(FakeCache::default());
        let store = SessionStore::new(cache, 1800, 5);
        let a = store.create("acct-1", None, SessionMetadata::default()).await;
        let b = store.create("acct-1", None, SessionMetadata::default()).await;
        store.destroy_all_for("acct-1").await;
        assert!(store.get(&a.id).await.is_none());
        assert!(store.get(&b.id).await.is_none());
    }
}
