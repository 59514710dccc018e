/// Inbox - per-user append-only list of in-app notifications
///
/// The inbox is the guaranteed delivery channel: every dispatch writes exactly
/// one record per target user whether or not a push got through. Changes are
/// also published on a broadcast channel that backs the live inbox stream.
use crate::{
    db::{parse_timestamp, timestamp},
    error::{NotifyError, NotifyResult},
    metrics,
    models::{InboxNotification, NotificationPayload, NotificationType},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use tokio::sync::broadcast;
use tracing::{debug, error};
use uuid::Uuid;

/// Capacity of the live update channel
const UPDATE_CHANNEL_SIZE: usize = 1024;

/// Frame of the live inbox stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboxFrame {
    /// Latest page, newest first, sent once on connect
    Snapshot {
        notifications: Vec<InboxNotification>,
    },
    Created {
        notification: InboxNotification,
    },
    Read {
        ids: Vec<String>,
    },
    Deleted {
        id: String,
    },
}

/// A frame addressed to one user
#[derive(Debug, Clone)]
pub struct InboxEvent {
    pub user_id: String,
    pub frame: InboxFrame,
}

/// Inbox store with live change notifications
#[derive(Clone)]
pub struct InboxStore {
    db: SqlitePool,
    updates: broadcast::Sender<InboxEvent>,
}

impl InboxStore {
    pub fn new(db: SqlitePool) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_SIZE);
        Self { db, updates }
    }

    /// Subscribe to inbox changes for all users
    pub fn subscribe(&self) -> broadcast::Receiver<InboxEvent> {
        self.updates.subscribe()
    }

    /// Append an unread record for a user
    pub async fn append(
        &self,
        user_id: &str,
        payload: &NotificationPayload,
    ) -> NotifyResult<InboxNotification> {
        let record = InboxNotification {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            notification_type: payload.notification_type,
            title: payload.title.clone(),
            body: payload.body.clone(),
            data: payload.data.clone(),
            image_url: payload.image_url.clone(),
            created_at: Utc::now(),
            is_read: false,
        };

        let data = serde_json::to_string(&record.data)
            .map_err(|e| NotifyError::Internal(format!("Failed to encode notification data: {}", e)))?;

        sqlx::query(
            r#"
            INSERT INTO inbox_notifications (id, user_id, type, title, body, data, image_url, created_at, is_read)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0)
            "#,
        )
        .bind(&record.id)
        .bind(user_id)
        .bind(record.notification_type.as_str())
        .bind(&record.title)
        .bind(&record.body)
        .bind(data)
        .bind(&record.image_url)
        .bind(timestamp(record.created_at))
        .execute(&self.db)
        .await
        .map_err(|e| {
            error!("Failed to store notification for user {}: {}", user_id, e);
            NotifyError::Database(e)
        })?;

        metrics::record_inbox_write();
        self.publish(user_id, InboxFrame::Created {
            notification: record.clone(),
        });

        Ok(record)
    }

    /// Latest records for a user, newest first
    pub async fn list_latest(&self, user_id: &str, limit: i64) -> NotifyResult<Vec<InboxNotification>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, type, title, body, data, image_url, created_at, is_read
            FROM inbox_notifications
            WHERE user_id = ?1
            ORDER BY created_at DESC, rowid DESC
            LIMIT ?2
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(Self::parse_notification).collect()
    }

    /// Number of unread records for a user
    pub async fn unread_count(&self, user_id: &str) -> NotifyResult<i64> {
        let count = sqlx::query_scalar(
            "SELECT COUNT(*) FROM inbox_notifications WHERE user_id = ?1 AND is_read = 0",
        )
        .bind(user_id)
        .fetch_one(&self.db)
        .await?;

        Ok(count)
    }

    /// Flag the caller's records as read in one transaction
    ///
    /// Ids that do not belong to the user are skipped. Returns the ids that
    /// were actually updated.
    pub async fn mark_read(&self, user_id: &str, ids: &[String]) -> NotifyResult<Vec<String>> {
        let mut tx = self.db.begin().await?;
        let mut updated = Vec::new();

        for id in ids {
            let result = sqlx::query(
                "UPDATE inbox_notifications SET is_read = 1 WHERE id = ?1 AND user_id = ?2",
            )
            .bind(id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() > 0 {
                updated.push(id.clone());
            }
        }

        tx.commit().await?;

        debug!("Marked {} of {} notifications read for {}", updated.len(), ids.len(), user_id);
        if !updated.is_empty() {
            self.publish(user_id, InboxFrame::Read { ids: updated.clone() });
        }

        Ok(updated)
    }

    /// Delete one of the user's records
    pub async fn delete(&self, user_id: &str, id: &str) -> NotifyResult<()> {
        let result = sqlx::query("DELETE FROM inbox_notifications WHERE id = ?1 AND user_id = ?2")
            .bind(id)
            .bind(user_id)
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(NotifyError::NotFound(format!("Notification {} not found", id)));
        }

        self.publish(user_id, InboxFrame::Deleted { id: id.to_string() });
        Ok(())
    }

    fn publish(&self, user_id: &str, frame: InboxFrame) {
        // No subscribers is the common case
        let _ = self.updates.send(InboxEvent {
            user_id: user_id.to_string(),
            frame,
        });
    }

    fn parse_notification(row: sqlx::sqlite::SqliteRow) -> NotifyResult<InboxNotification> {
        let type_str: String = row.try_get("type")?;
        let data_str: String = row.try_get("data")?;
        let created_at: String = row.try_get("created_at")?;

        let data: BTreeMap<String, String> = serde_json::from_str(&data_str)
            .map_err(|e| NotifyError::Internal(format!("Invalid notification data: {}", e)))?;

        Ok(InboxNotification {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            notification_type: NotificationType::from_str(&type_str)?,
            title: row.try_get("title")?,
            body: row.try_get("body")?,
            data,
            image_url: row.try_get("image_url")?,
            created_at: parse_timestamp(&created_at)?,
            is_read: row.try_get::<i64, _>("is_read")? != 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_memory_pool;

    fn payload(title: &str) -> NotificationPayload {
        NotificationPayload::new(NotificationType::General, title, "body", BTreeMap::new())
    }

    #[tokio::test]
    async fn test_append_and_list_newest_first() {
        let inbox = InboxStore::new(create_memory_pool().await.unwrap());

        inbox.append("alice", &payload("first")).await.unwrap();
        inbox.append("alice", &payload("second")).await.unwrap();
        inbox.append("bob", &payload("other")).await.unwrap();

        let list = inbox.list_latest("alice", 50).await.unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].title, "second");
        assert_eq!(list[1].title, "first");
        assert!(list.iter().all(|n| !n.is_read));
        assert_eq!(list[0].data.get("type").map(String::as_str), Some("general"));
    }

    #[tokio::test]
    async fn test_list_respects_limit() {
        let inbox = InboxStore::new(create_memory_pool().await.unwrap());
        for i in 0..5 {
            inbox.append("alice", &payload(&format!("n{}", i))).await.unwrap();
        }

        let list = inbox.list_latest("alice", 3).await.unwrap();
        assert_eq!(list.len(), 3);
        assert_eq!(list[0].title, "n4");
    }

    #[tokio::test]
    async fn test_mark_read_only_touches_requested_ids() {
        let inbox = InboxStore::new(create_memory_pool().await.unwrap());
        let a = inbox.append("alice", &payload("a")).await.unwrap();
        let b = inbox.append("alice", &payload("b")).await.unwrap();
        let c = inbox.append("alice", &payload("c")).await.unwrap();

        let updated = inbox
            .mark_read("alice", &[a.id.clone(), b.id.clone()])
            .await
            .unwrap();
        assert_eq!(updated.len(), 2);

        let list = inbox.list_latest("alice", 50).await.unwrap();
        for n in &list {
            assert_eq!(n.is_read, n.id != c.id);
        }
        assert_eq!(inbox.unread_count("alice").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_mark_read_skips_foreign_records() {
        let inbox = InboxStore::new(create_memory_pool().await.unwrap());
        let theirs = inbox.append("bob", &payload("b")).await.unwrap();

        let updated = inbox.mark_read("alice", &[theirs.id.clone()]).await.unwrap();
        assert!(updated.is_empty());
        assert_eq!(inbox.unread_count("bob").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_own_record() {
        let inbox = InboxStore::new(create_memory_pool().await.unwrap());
        let record = inbox.append("alice", &payload("a")).await.unwrap();

        assert!(matches!(
            inbox.delete("bob", &record.id).await,
            Err(NotifyError::NotFound(_))
        ));
        inbox.delete("alice", &record.id).await.unwrap();
        assert!(inbox.list_latest("alice", 50).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_updates_are_broadcast() {
        let inbox = InboxStore::new(create_memory_pool().await.unwrap());
        let mut rx = inbox.subscribe();

        let record = inbox.append("alice", &payload("a")).await.unwrap();
        inbox.mark_read("alice", &[record.id.clone()]).await.unwrap();

        let created = rx.recv().await.unwrap();
        assert_eq!(created.user_id, "alice");
        assert!(matches!(created.frame, InboxFrame::Created { ref notification } if notification.id == record.id));

        let read = rx.recv().await.unwrap();
        assert_eq!(read.frame, InboxFrame::Read { ids: vec![record.id.clone()] });
    }

    #[test]
    fn test_frame_wire_format() {
        let json = serde_json::to_value(InboxFrame::Read { ids: vec!["n1".into()] }).unwrap();
        assert_eq!(json["type"], "read");
        assert_eq!(json["ids"][0], "n1");
    }
}
