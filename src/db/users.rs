//! User rows: creation on first contact, identity lookups.

use tokio_postgres::Row;
use uuid::Uuid;

use crate::error::StoreError;
use crate::model::{User, UserStatus};

use super::{Store, parse_column};

fn map_user(row: &Row) -> Result<User, StoreError> {
    let status: UserStatus = parse_column("users", "status", row.get("status"))?;
    Ok(User {
        id: row.get("id"),
        channel_user_id: row.get("channel_user_id"),
        status,
        is_deleted: row.get("is_deleted"),
        created_at: row.get("created_at"),
        last_contact_at: row.get("last_contact_at"),
    })
}

impl Store {
    /// Create the user on first contact, or refresh the contact timestamp.
    /// Idempotent under duplicate follow/message deliveries.
    pub async fn ensure_user(&self, channel_user_id: &str) -> Result<User, StoreError> {
        let conn = self.conn().await?;
        let row = conn
            .query_one(
                "INSERT INTO users (id, channel_user_id, status, last_contact_at)
                 VALUES ($1, $2, 'active', now())
                 ON CONFLICT (channel_user_id)
                 DO UPDATE SET last_contact_at = now(), updated_at = now()
                 RETURNING id, channel_user_id, status, is_deleted, created_at, last_contact_at",
                &[&Uuid::new_v4(), &channel_user_id],
            )
            .await?;
        map_user(&row)
    }

    /// Stamp the terms-of-use consent once. Re-consenting keeps the
    /// original timestamp.
    pub async fn record_consent(&self, user_id: Uuid) -> Result<(), StoreError> {
        let conn = self.conn().await?;
        conn.execute(
            "UPDATE users SET consented_at = now(), updated_at = now()
             WHERE id = $1 AND consented_at IS NULL",
            &[&user_id],
        )
        .await?;
        Ok(())
    }

    /// Look up a live (non-soft-deleted) user by the channel's opaque
    /// identifier.
    pub async fn user_by_channel_id(
        &self,
        channel_user_id: &str,
    ) -> Result<Option<User>, StoreError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                "SELECT id, channel_user_id, status, is_deleted, created_at, last_contact_at
                 FROM users WHERE channel_user_id = $1 AND is_deleted = FALSE",
                &[&channel_user_id],
            )
            .await?;
        row.as_ref().map(map_user).transpose()
    }
}
