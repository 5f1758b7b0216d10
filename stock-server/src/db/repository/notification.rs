//! Notification Repository
//!
//! Append-only archive; also serves the dedup window lookups.

use serde::Deserialize;
use uuid::Uuid;

use super::{BaseRepository, RepoError, RepoResult};
use crate::db::models::Notification;

use shared::AlertKind;

#[derive(Debug, Deserialize)]
struct CountRow {
    count: i64,
}

#[derive(Clone)]
pub struct NotificationRepository {
    base: BaseRepository,
}

impl NotificationRepository {
    pub fn new(db: surrealdb::Surreal<surrealdb::engine::local::Db>) -> Self {
        Self {
            base: BaseRepository::new(db),
        }
    }

    /// Persist one notification
    pub async fn create(&self, notification: Notification) -> RepoResult<Notification> {
        let key = Uuid::new_v4().simple().to_string();
        let mut res = self
            .base
            .db()
            .query("CREATE type::thing('notification', $key) CONTENT $content")
            .bind(("key", key))
            .bind(("content", notification))
            .await?;
        res.take::<Vec<Notification>>(0)?
            .into_iter()
            .next()
            .ok_or_else(|| RepoError::Database("CREATE notification returned no record".into()))
    }

    /// Count records of the same kind/title created at or after `cutoff`
    /// (Unix millis) - the dedup window lookup.
    pub async fn count_since(
        &self,
        kind: AlertKind,
        title: &str,
        cutoff: i64,
    ) -> RepoResult<i64> {
        let mut res = self
            .base
            .db()
            .query(
                "SELECT count() AS count FROM notification \
                 WHERE kind = $kind AND title = $title AND created_at >= $cutoff \
                 GROUP ALL",
            )
            .bind(("kind", kind))
            .bind(("title", title.to_string()))
            .bind(("cutoff", cutoff))
            .await?;
        let row: Option<CountRow> = res.take(0)?;
        Ok(row.map(|r| r.count).unwrap_or(0))
    }

    /// Latest persisted notifications, newest first; the tests use this
    /// to assert what the alert pipeline actually archived.
    pub async fn recent(&self, limit: usize) -> RepoResult<Vec<Notification>> {
        let mut res = self
            .base
            .db()
            .query("SELECT * FROM notification ORDER BY created_at DESC LIMIT $limit")
            .bind(("limit", limit as i64))
            .await?;
        Ok(res.take(0)?)
    }
}
