//! Webhook delivery journal. The platform redelivers events it considers
//! unacknowledged, so the (channel, message_id) pair is recorded before any
//! side effect runs.

use crate::error::StoreError;

use super::Store;

impl Store {
    /// Record a delivery, returning `true` the first time this
    /// (channel, message_id) pair is seen and `false` on a repeat.
    pub async fn record_delivery(
        &self,
        channel: &str,
        message_id: &str,
    ) -> Result<bool, StoreError> {
        let conn = self.conn().await?;
        let inserted = conn
            .execute(
                "INSERT INTO webhook_deliveries (channel, message_id)
                 VALUES ($1, $2)
                 ON CONFLICT (channel, message_id) DO NOTHING",
                &[&channel, &message_id],
            )
            .await?;
        Ok(inserted == 1)
    }

    /// Drop journal rows older than `days`. Redeliveries arrive within
    /// minutes, so a short horizon keeps the table small.
    pub async fn cleanup_old_deliveries(&self, days: i32) -> Result<u64, StoreError> {
        let conn = self.conn().await?;
        let deleted = conn
            .execute(
                "DELETE FROM webhook_deliveries
                 WHERE received_at < now() - ($1 * interval '1 day')",
                &[&days],
            )
            .await?;
        if deleted > 0 {
            tracing::debug!(deleted, "pruned webhook delivery journal");
        }
        Ok(deleted)
    }
}
