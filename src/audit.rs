//! Audit log. Append-only, never on a request's critical
//! path: callers spawn the write and move on instead of blocking on it.

use crate::db::Db;
use crate::models::AuditEntry;
use std::sync::Arc;

pub struct AuditLog {
    db: Arc<Db>,
}

impl AuditLog {
    pub fn new(db: Arc<Db>) -> Self {
        Self { db }
    }

    pub fn record(&self, entry: AuditEntry) {
        let db = self.db.clone();
        tokio::spawn(async move {
            let conn = db.conn.lock().unwrap();
            let now = chrono::Utc::now().to_rfc3339();
            let changes = serde_json::to_string(&entry.changes).unwrap_or_else(|_| "{}".to_string());
            let res = conn.execute(
                "INSERT INTO audit_log (id, actor_id, action, resource_type, resource_id, changes, ip, user_agent, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                rusqlite::params![
                    uuid::Uuid::new_v4().to_string(),
                    entry.actor_id,
                    entry.action,
                    entry.resource_type,
                    entry.resource_id,
                    changes,
                    entry.ip,
                    entry.user_agent,
                    now,
                ],
            );
            if let Err(e) = res {
                tracing::warn!(error = %e, "audit log write failed");
            }
        });
    }
}
