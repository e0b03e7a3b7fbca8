//! Checklist task rows. Later stages only insert new rows or append notes;
//! nothing here ever deletes a task on behalf of a stage.

use tokio_postgres::Row;
use uuid::Uuid;

use crate::error::StoreError;
use crate::model::{NewTask, Priority, Stage, Task, TaskCategory};

use super::{Store, parse_column};

const TASK_COLUMNS: &str = "id, user_id, group_id, title, description, category, priority, \
     due_date, display_order, stage, notes, is_completed, completed_at, is_deleted, created_at";

fn map_task(row: &Row) -> Result<Task, StoreError> {
    let category: TaskCategory = parse_column("tasks", "category", row.get("category"))?;
    let priority: Priority = parse_column("tasks", "priority", row.get("priority"))?;
    let stage: Stage = parse_column("tasks", "stage", row.get("stage"))?;
    Ok(Task {
        id: row.get("id"),
        user_id: row.get("user_id"),
        group_id: row.get("group_id"),
        title: row.get("title"),
        description: row.get("description"),
        category,
        priority,
        due_date: row.get("due_date"),
        display_order: row.get("display_order"),
        stage,
        notes: row.get("notes"),
        is_completed: row.get("is_completed"),
        completed_at: row.get("completed_at"),
        is_deleted: row.get("is_deleted"),
        created_at: row.get("created_at"),
    })
}

impl Store {
    /// Insert a batch of generated tasks in one transaction, so the
    /// checklist appears to the user all at once or not at all.
    pub async fn insert_tasks(
        &self,
        user_id: Uuid,
        tasks: &[NewTask],
    ) -> Result<Vec<Uuid>, StoreError> {
        let mut conn = self.conn().await?;
        let tx = conn.transaction().await?;
        let mut ids = Vec::with_capacity(tasks.len());
        for task in tasks {
            let id = Uuid::new_v4();
            tx.execute(
                "INSERT INTO tasks
                   (id, user_id, title, description, category, priority,
                    due_date, display_order, stage)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
                &[
                    &id,
                    &user_id,
                    &task.title,
                    &task.description,
                    &task.category.as_str(),
                    &task.priority.as_str(),
                    &task.due_date,
                    &task.display_order,
                    &task.stage.as_str(),
                ],
            )
            .await?;
            ids.push(id);
        }
        tx.commit().await?;
        Ok(ids)
    }

    /// Open (not completed, not deleted) tasks, soonest due first.
    pub async fn open_tasks(&self, user_id: Uuid) -> Result<Vec<Task>, StoreError> {
        let conn = self.conn().await?;
        let rows = conn
            .query(
                &format!(
                    "SELECT {TASK_COLUMNS} FROM tasks
                     WHERE user_id = $1 AND is_deleted = FALSE AND is_completed = FALSE
                     ORDER BY due_date ASC NULLS LAST, display_order ASC"
                ),
                &[&user_id],
            )
            .await?;
        rows.iter().map(map_task).collect()
    }

    pub async fn task_by_id(&self, task_id: Uuid) -> Result<Option<Task>, StoreError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                &format!(
                    "SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1 AND is_deleted = FALSE"
                ),
                &[&task_id],
            )
            .await?;
        row.as_ref().map(map_task).transpose()
    }

    /// Owning user of a live task, for ownership checks.
    pub async fn task_owner(&self, task_id: Uuid) -> Result<Option<Uuid>, StoreError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                "SELECT user_id FROM tasks WHERE id = $1 AND is_deleted = FALSE",
                &[&task_id],
            )
            .await?;
        Ok(row.map(|r| r.get("user_id")))
    }

    /// Highest display order so far; later stages append after it.
    pub async fn max_display_order(&self, user_id: Uuid) -> Result<i32, StoreError> {
        let conn = self.conn().await?;
        let row = conn
            .query_one(
                "SELECT COALESCE(MAX(display_order), 0) AS max_order
                 FROM tasks WHERE user_id = $1 AND is_deleted = FALSE",
                &[&user_id],
            )
            .await?;
        Ok(row.get("max_order"))
    }

    pub async fn count_tasks(&self, user_id: Uuid) -> Result<i64, StoreError> {
        let conn = self.conn().await?;
        let row = conn
            .query_one(
                "SELECT COUNT(*) AS n FROM tasks WHERE user_id = $1 AND is_deleted = FALSE",
                &[&user_id],
            )
            .await?;
        Ok(row.get("n"))
    }

    pub async fn set_task_completed(
        &self,
        task_id: Uuid,
        completed: bool,
    ) -> Result<(), StoreError> {
        let conn = self.conn().await?;
        let updated = conn
            .execute(
                "UPDATE tasks
                 SET is_completed = $2,
                     completed_at = CASE WHEN $2 THEN now() ELSE NULL END,
                     updated_at = now()
                 WHERE id = $1 AND is_deleted = FALSE",
                &[&task_id, &completed],
            )
            .await?;
        if updated == 0 {
            return Err(StoreError::NotFound {
                entity: "task",
                id: task_id.to_string(),
            });
        }
        Ok(())
    }

    /// Append an enrichment note, preserving earlier notes.
    pub async fn append_task_note(&self, task_id: Uuid, note: &str) -> Result<(), StoreError> {
        let conn = self.conn().await?;
        let updated = conn
            .execute(
                "UPDATE tasks
                 SET notes = CASE WHEN notes IS NULL OR notes = '' THEN $2
                                  ELSE notes || E'\\n\\n' || $2 END,
                     updated_at = now()
                 WHERE id = $1 AND is_deleted = FALSE",
                &[&task_id, &note],
            )
            .await?;
        if updated == 0 {
            return Err(StoreError::NotFound {
                entity: "task",
                id: task_id.to_string(),
            });
        }
        Ok(())
    }
}
