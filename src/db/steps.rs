//! The durable step log: one row per (user, stage), with the atomic claim
//! primitive that makes every stage handler safe to invoke zero, one, or
//! many times concurrently.

use tokio_postgres::Row;
use uuid::Uuid;

use crate::error::StoreError;
use crate::model::{ClaimOutcome, GenerationStep, Stage, StepStatus};

use super::{Store, parse_column};

fn map_step(row: &Row) -> Result<GenerationStep, StoreError> {
    let stage: Stage = parse_column("task_generation_steps", "stage", row.get("stage"))?;
    let status: StepStatus = parse_column("task_generation_steps", "status", row.get("status"))?;
    Ok(GenerationStep {
        id: row.get("id"),
        user_id: row.get("user_id"),
        stage,
        status,
        error_message: row.get("error_message"),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
        updated_at: row.get("updated_at"),
    })
}

impl Store {
    /// Make sure the (user, stage) row exists in `pending`. Idempotent.
    pub async fn ensure_step(&self, user_id: Uuid, stage: Stage) -> Result<(), StoreError> {
        let conn = self.conn().await?;
        conn.execute(
            "INSERT INTO task_generation_steps (id, user_id, stage, status)
             VALUES ($1, $2, $3, 'pending')
             ON CONFLICT (user_id, stage) DO NOTHING",
            &[&Uuid::new_v4(), &user_id, &stage.as_str()],
        )
        .await?;
        Ok(())
    }

    pub async fn step_status(
        &self,
        user_id: Uuid,
        stage: Stage,
    ) -> Result<Option<StepStatus>, StoreError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                "SELECT status FROM task_generation_steps WHERE user_id = $1 AND stage = $2",
                &[&user_id, &stage.as_str()],
            )
            .await?;
        row.map(|r| parse_column("task_generation_steps", "status", r.get("status")))
            .transpose()
    }

    /// All step rows for a user, in stage order.
    pub async fn steps_for_user(&self, user_id: Uuid) -> Result<Vec<GenerationStep>, StoreError> {
        let conn = self.conn().await?;
        let rows = conn
            .query(
                "SELECT id, user_id, stage, status, error_message,
                        started_at, completed_at, updated_at
                 FROM task_generation_steps
                 WHERE user_id = $1
                 ORDER BY CASE stage
                            WHEN 'basic' THEN 1
                            WHEN 'personalized' THEN 2
                            WHEN 'enhanced' THEN 3
                          END",
                &[&user_id],
            )
            .await?;
        rows.iter().map(map_step).collect()
    }

    /// Atomic pending → in_progress claim. Exactly one of any number of
    /// concurrent invocations gets `Claimed`; the rest observe the row's
    /// actual status and exit as no-ops.
    pub async fn claim_step(
        &self,
        user_id: Uuid,
        stage: Stage,
    ) -> Result<ClaimOutcome, StoreError> {
        self.ensure_step(user_id, stage).await?;
        let conn = self.conn().await?;
        let claimed = conn
            .execute(
                "UPDATE task_generation_steps
                 SET status = 'in_progress', started_at = now(),
                     error_message = NULL, updated_at = now()
                 WHERE user_id = $1 AND stage = $2 AND status = 'pending'",
                &[&user_id, &stage.as_str()],
            )
            .await?;
        if claimed == 1 {
            return Ok(ClaimOutcome::Claimed);
        }
        // Lost the conditional update; report what the winner left behind.
        match self.step_status(user_id, stage).await? {
            Some(StepStatus::Completed) => Ok(ClaimOutcome::AlreadyCompleted),
            Some(StepStatus::Failed) => Ok(ClaimOutcome::AlreadyFailed),
            Some(StepStatus::InProgress) | Some(StepStatus::Pending) | None => {
                Ok(ClaimOutcome::AlreadyRunning)
            }
        }
    }

    /// Terminal success. Guarded on in_progress so a reclaimed step cannot
    /// be completed twice by a zombie worker.
    pub async fn complete_step(&self, user_id: Uuid, stage: Stage) -> Result<bool, StoreError> {
        let conn = self.conn().await?;
        let updated = conn
            .execute(
                "UPDATE task_generation_steps
                 SET status = 'completed', completed_at = now(),
                     error_message = NULL, updated_at = now()
                 WHERE user_id = $1 AND stage = $2 AND status = 'in_progress'",
                &[&user_id, &stage.as_str()],
            )
            .await?;
        Ok(updated == 1)
    }

    /// Hand a claimed step back to pending. Used when a run cannot proceed
    /// yet (predecessor incomplete) or hit a transient fault and the next
    /// redelivery should get a fresh claim.
    pub async fn release_step(&self, user_id: Uuid, stage: Stage) -> Result<bool, StoreError> {
        let conn = self.conn().await?;
        let updated = conn
            .execute(
                "UPDATE task_generation_steps
                 SET status = 'pending', started_at = NULL, updated_at = now()
                 WHERE user_id = $1 AND stage = $2 AND status = 'in_progress'",
                &[&user_id, &stage.as_str()],
            )
            .await?;
        Ok(updated == 1)
    }

    /// Terminal failure with captured detail.
    pub async fn fail_step(
        &self,
        user_id: Uuid,
        stage: Stage,
        error: &str,
    ) -> Result<bool, StoreError> {
        let conn = self.conn().await?;
        let updated = conn
            .execute(
                "UPDATE task_generation_steps
                 SET status = 'failed', completed_at = now(),
                     error_message = $3, updated_at = now()
                 WHERE user_id = $1 AND stage = $2 AND status = 'in_progress'",
                &[&user_id, &stage.as_str(), &error],
            )
            .await?;
        Ok(updated == 1)
    }

    /// Manual retry: re-arm a dead-lettered step. Conditional on `failed` so
    /// a retry postback delivered twice re-arms at most once.
    pub async fn rearm_failed_step(&self, user_id: Uuid, stage: Stage) -> Result<bool, StoreError> {
        let conn = self.conn().await?;
        let updated = conn
            .execute(
                "UPDATE task_generation_steps
                 SET status = 'pending', started_at = NULL, completed_at = NULL,
                     updated_at = now()
                 WHERE user_id = $1 AND stage = $2 AND status = 'failed'",
                &[&user_id, &stage.as_str()],
            )
            .await?;
        Ok(updated == 1)
    }

    /// Recover steps stuck in in_progress past the staleness threshold by
    /// re-arming them to pending. Same conditional-update shape as the
    /// claim, so a still-live worker and the reclaim cannot both win.
    pub async fn reclaim_stale_steps(&self, older_than_minutes: i32) -> Result<u64, StoreError> {
        let conn = self.conn().await?;
        let reclaimed = conn
            .execute(
                "UPDATE task_generation_steps
                 SET status = 'pending', started_at = NULL, updated_at = now()
                 WHERE status = 'in_progress'
                   AND started_at < now() - ($1 * interval '1 minute')",
                &[&older_than_minutes],
            )
            .await?;
        if reclaimed > 0 {
            tracing::info!(reclaimed, older_than_minutes, "re-armed stale generation steps");
        }
        Ok(reclaimed)
    }
}
