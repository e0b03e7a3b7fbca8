//! Conversation-state rows: at most one per (user, state name), an opaque
//! JSON payload with optional expiry. An expired row reads as absent.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::conversation::Phase;
use crate::error::StoreError;
use crate::model::ProfileField;

use super::{Store, parse_column};

const STATE_DIALOGUE: &str = "dialogue";
const STATE_EDITING: &str = "editing";

/// Dialogue rows outlive a working session but not an abandoned one.
fn dialogue_expiry() -> DateTime<Utc> {
    Utc::now() + Duration::hours(24)
}

/// Edit markers are short-lived by design; a forgotten edit must not
/// swallow an unrelated message a day later.
fn editing_expiry() -> DateTime<Utc> {
    Utc::now() + Duration::minutes(30)
}

impl Store {
    async fn upsert_state(
        &self,
        user_id: Uuid,
        state_name: &str,
        payload: &Value,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let conn = self.conn().await?;
        conn.execute(
            "INSERT INTO conversation_states (id, user_id, state_name, payload, expires_at)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (user_id, state_name)
             DO UPDATE SET payload = $4, expires_at = $5, updated_at = now()",
            &[&Uuid::new_v4(), &user_id, &state_name, payload, &expires_at],
        )
        .await?;
        Ok(())
    }

    async fn state_payload(
        &self,
        user_id: Uuid,
        state_name: &str,
    ) -> Result<Option<Value>, StoreError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                "SELECT payload FROM conversation_states
                 WHERE user_id = $1 AND state_name = $2
                   AND (expires_at IS NULL OR expires_at > now())",
                &[&user_id, &state_name],
            )
            .await?;
        Ok(row.map(|r| r.get("payload")))
    }

    async fn clear_state(&self, user_id: Uuid, state_name: &str) -> Result<(), StoreError> {
        let conn = self.conn().await?;
        conn.execute(
            "DELETE FROM conversation_states WHERE user_id = $1 AND state_name = $2",
            &[&user_id, &state_name],
        )
        .await?;
        Ok(())
    }

    /// Current dialogue phase, if a live row exists.
    pub async fn dialogue_phase(&self, user_id: Uuid) -> Result<Option<Phase>, StoreError> {
        let payload = self.state_payload(user_id, STATE_DIALOGUE).await?;
        match payload {
            None => Ok(None),
            Some(value) => serde_json::from_value::<Phase>(value.clone())
                .map(Some)
                .map_err(|_| StoreError::CorruptRow {
                    table: "conversation_states",
                    column: "payload",
                    value: value.to_string(),
                }),
        }
    }

    pub async fn set_dialogue_phase(&self, user_id: Uuid, phase: &Phase) -> Result<(), StoreError> {
        let payload = serde_json::to_value(phase).map_err(|e| StoreError::CorruptRow {
            table: "conversation_states",
            column: "payload",
            value: e.to_string(),
        })?;
        self.upsert_state(user_id, STATE_DIALOGUE, &payload, dialogue_expiry())
            .await
    }

    /// Compare-and-set on the dialogue phase tag. This is the at-most-once
    /// guard for entering the generating phase: of two racing deliveries,
    /// exactly one observes the expected tag and wins.
    pub async fn cas_dialogue_phase(
        &self,
        user_id: Uuid,
        expected_tag: &str,
        to: &Phase,
    ) -> Result<bool, StoreError> {
        let payload = serde_json::to_value(to).map_err(|e| StoreError::CorruptRow {
            table: "conversation_states",
            column: "payload",
            value: e.to_string(),
        })?;
        let conn = self.conn().await?;
        let updated = conn
            .execute(
                "UPDATE conversation_states
                 SET payload = $3, expires_at = $4, updated_at = now()
                 WHERE user_id = $1 AND state_name = 'dialogue'
                   AND payload->>'phase' = $2
                   AND (expires_at IS NULL OR expires_at > now())",
                &[&user_id, &expected_tag, &payload, &dialogue_expiry()],
            )
            .await?;
        Ok(updated == 1)
    }

    /// The profile field a pending edit action scoped the next message to.
    pub async fn editing_field(&self, user_id: Uuid) -> Result<Option<ProfileField>, StoreError> {
        let payload = self.state_payload(user_id, STATE_EDITING).await?;
        match payload {
            None => Ok(None),
            Some(value) => {
                let raw = value
                    .get("field")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                parse_column("conversation_states", "payload", raw).map(Some)
            }
        }
    }

    pub async fn set_editing_field(
        &self,
        user_id: Uuid,
        field: ProfileField,
    ) -> Result<(), StoreError> {
        let payload = serde_json::json!({ "field": field.as_str() });
        self.upsert_state(user_id, STATE_EDITING, &payload, editing_expiry())
            .await
    }

    pub async fn clear_editing(&self, user_id: Uuid) -> Result<(), StoreError> {
        self.clear_state(user_id, STATE_EDITING).await
    }
}
