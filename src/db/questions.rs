//! Follow-up question rows.

use chrono::{DateTime, Utc};
use tokio_postgres::Row;
use uuid::Uuid;

use crate::error::StoreError;
use crate::followup::QuestionSeed;
use crate::model::{FollowUpQuestion, QuestionKey, QuestionType};

use super::{Store, parse_column, parse_column_opt};

fn map_question(row: &Row) -> Result<FollowUpQuestion, StoreError> {
    let key: QuestionKey =
        parse_column("follow_up_questions", "question_key", row.get("question_key"))?;
    let question_type: QuestionType =
        parse_column("follow_up_questions", "question_type", row.get("question_type"))?;
    let parent_key: Option<QuestionKey> =
        parse_column_opt("follow_up_questions", "parent_key", row.get("parent_key"))?;
    Ok(FollowUpQuestion {
        id: row.get("id"),
        user_id: row.get("user_id"),
        key,
        text: row.get("question_text"),
        question_type,
        parent_key,
        trigger_answer: row.get("trigger_answer"),
        is_answered: row.get("is_answered"),
        answer: row.get("answer"),
        answered_at: row.get("answered_at"),
        display_order: row.get("display_order"),
    })
}

impl Store {
    /// Seed the question set for a user. Existing keys are left untouched so
    /// re-running a completed basic stage never clobbers recorded answers.
    pub async fn seed_questions(
        &self,
        user_id: Uuid,
        seeds: &[QuestionSeed],
    ) -> Result<u64, StoreError> {
        let conn = self.conn().await?;
        let mut inserted = 0;
        for seed in seeds {
            inserted += conn
                .execute(
                    "INSERT INTO follow_up_questions
                       (id, user_id, question_key, question_text, question_type,
                        parent_key, trigger_answer, display_order)
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                     ON CONFLICT (user_id, question_key) DO NOTHING",
                    &[
                        &Uuid::new_v4(),
                        &user_id,
                        &seed.key.as_str(),
                        &seed.text,
                        &seed.question_type.as_str(),
                        &seed.parent_key.map(|k| k.as_str()),
                        &seed.trigger_answer,
                        &seed.display_order,
                    ],
                )
                .await?;
        }
        Ok(inserted)
    }

    /// All questions for a user in display order.
    pub async fn questions_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<FollowUpQuestion>, StoreError> {
        let conn = self.conn().await?;
        let rows = conn
            .query(
                "SELECT id, user_id, question_key, question_text, question_type,
                        parent_key, trigger_answer, is_answered, answer, answered_at,
                        display_order
                 FROM follow_up_questions
                 WHERE user_id = $1
                 ORDER BY display_order ASC",
                &[&user_id],
            )
            .await?;
        rows.iter().map(map_question).collect()
    }

    /// Record an answer on the question row. The profile-flag write happens
    /// separately through the closed mapping in `set_profile_flag`.
    pub async fn record_question_answer(
        &self,
        user_id: Uuid,
        key: QuestionKey,
        answer: &str,
    ) -> Result<DateTime<Utc>, StoreError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                "UPDATE follow_up_questions
                 SET answer = $3, is_answered = TRUE, answered_at = now()
                 WHERE user_id = $1 AND question_key = $2
                 RETURNING answered_at",
                &[&user_id, &key.as_str(), &answer],
            )
            .await?;
        match row {
            Some(row) => Ok(row.get("answered_at")),
            None => Err(StoreError::NotFound {
                entity: "follow_up_question",
                id: format!("{user_id}/{key}"),
            }),
        }
    }
}
