//! The three-stage checklist generation pipeline.
//!
//! Stages run as queue deliveries against `POST /worker/generate`: `basic`
//! first, `personalized` once the follow-up answers are in, `enhanced` as a
//! final best-effort enrichment. Every run goes through the same protocol:
//! verify the job's claimed identity, win the atomic claim on the step row,
//! check the predecessor gate, then execute. Duplicate deliveries and
//! concurrent invocations fall out of the claim as no-ops, so a stage's
//! side effects happen at most once per claim.

mod baseline;
mod basic;
mod enhanced;
mod personalized;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Days, NaiveDate};
use serde::Deserialize;
use uuid::Uuid;

use crate::capabilities::{CompletionProvider, RetrievalProvider};
use crate::channels::{MessageAction, Notifier, OutboundMessage};
use crate::conversation::{Phase, PostbackAction};
use crate::db::Store;
use crate::error::{Error, Result, StoreError};
use crate::followup::{self, QuestionSeed};
use crate::guard::{IdentityStore, OwnershipGuard};
use crate::model::{
    ClaimOutcome, FollowUpQuestion, NewTask, Priority, Stage, StepStatus, Task, TaskCategory,
    User, UserProfile,
};
use crate::queue::{GenerationJob, JobQueue};
use crate::util::truncate_for_log;

/// Store surface the pipeline runs against. A trait seam so stage logic and
/// the run protocol are testable with an in-memory fake.
#[async_trait]
pub trait PipelineStore: Send + Sync {
    async fn profile(&self, user_id: Uuid)
    -> std::result::Result<Option<UserProfile>, StoreError>;
    async fn claim_step(
        &self,
        user_id: Uuid,
        stage: Stage,
    ) -> std::result::Result<ClaimOutcome, StoreError>;
    async fn step_status(
        &self,
        user_id: Uuid,
        stage: Stage,
    ) -> std::result::Result<Option<StepStatus>, StoreError>;
    async fn release_step(
        &self,
        user_id: Uuid,
        stage: Stage,
    ) -> std::result::Result<bool, StoreError>;
    async fn complete_step(
        &self,
        user_id: Uuid,
        stage: Stage,
    ) -> std::result::Result<bool, StoreError>;
    async fn fail_step(
        &self,
        user_id: Uuid,
        stage: Stage,
        error: &str,
    ) -> std::result::Result<bool, StoreError>;
    async fn ensure_step(&self, user_id: Uuid, stage: Stage)
    -> std::result::Result<(), StoreError>;
    async fn insert_tasks(
        &self,
        user_id: Uuid,
        tasks: &[NewTask],
    ) -> std::result::Result<Vec<Uuid>, StoreError>;
    async fn open_tasks(&self, user_id: Uuid) -> std::result::Result<Vec<Task>, StoreError>;
    async fn max_display_order(&self, user_id: Uuid) -> std::result::Result<i32, StoreError>;
    async fn append_task_note(
        &self,
        task_id: Uuid,
        note: &str,
    ) -> std::result::Result<(), StoreError>;
    async fn seed_questions(
        &self,
        user_id: Uuid,
        seeds: &[QuestionSeed],
    ) -> std::result::Result<u64, StoreError>;
    async fn questions_for_user(
        &self,
        user_id: Uuid,
    ) -> std::result::Result<Vec<FollowUpQuestion>, StoreError>;
    async fn set_dialogue_phase(
        &self,
        user_id: Uuid,
        phase: &Phase,
    ) -> std::result::Result<(), StoreError>;
}

#[async_trait]
impl PipelineStore for Store {
    async fn profile(
        &self,
        user_id: Uuid,
    ) -> std::result::Result<Option<UserProfile>, StoreError> {
        Store::profile(self, user_id).await
    }

    async fn claim_step(
        &self,
        user_id: Uuid,
        stage: Stage,
    ) -> std::result::Result<ClaimOutcome, StoreError> {
        Store::claim_step(self, user_id, stage).await
    }

    async fn step_status(
        &self,
        user_id: Uuid,
        stage: Stage,
    ) -> std::result::Result<Option<StepStatus>, StoreError> {
        Store::step_status(self, user_id, stage).await
    }

    async fn release_step(
        &self,
        user_id: Uuid,
        stage: Stage,
    ) -> std::result::Result<bool, StoreError> {
        Store::release_step(self, user_id, stage).await
    }

    async fn complete_step(
        &self,
        user_id: Uuid,
        stage: Stage,
    ) -> std::result::Result<bool, StoreError> {
        Store::complete_step(self, user_id, stage).await
    }

    async fn fail_step(
        &self,
        user_id: Uuid,
        stage: Stage,
        error: &str,
    ) -> std::result::Result<bool, StoreError> {
        Store::fail_step(self, user_id, stage, error).await
    }

    async fn ensure_step(
        &self,
        user_id: Uuid,
        stage: Stage,
    ) -> std::result::Result<(), StoreError> {
        Store::ensure_step(self, user_id, stage).await
    }

    async fn insert_tasks(
        &self,
        user_id: Uuid,
        tasks: &[NewTask],
    ) -> std::result::Result<Vec<Uuid>, StoreError> {
        Store::insert_tasks(self, user_id, tasks).await
    }

    async fn open_tasks(&self, user_id: Uuid) -> std::result::Result<Vec<Task>, StoreError> {
        Store::open_tasks(self, user_id).await
    }

    async fn max_display_order(&self, user_id: Uuid) -> std::result::Result<i32, StoreError> {
        Store::max_display_order(self, user_id).await
    }

    async fn append_task_note(
        &self,
        task_id: Uuid,
        note: &str,
    ) -> std::result::Result<(), StoreError> {
        Store::append_task_note(self, task_id, note).await
    }

    async fn seed_questions(
        &self,
        user_id: Uuid,
        seeds: &[QuestionSeed],
    ) -> std::result::Result<u64, StoreError> {
        Store::seed_questions(self, user_id, seeds).await
    }

    async fn questions_for_user(
        &self,
        user_id: Uuid,
    ) -> std::result::Result<Vec<FollowUpQuestion>, StoreError> {
        Store::questions_for_user(self, user_id).await
    }

    async fn set_dialogue_phase(
        &self,
        user_id: Uuid,
        phase: &Phase,
    ) -> std::result::Result<(), StoreError> {
        Store::set_dialogue_phase(self, user_id, phase).await
    }
}

/// How one delivery of a generation job ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunDisposition {
    /// The stage ran to completion on this delivery.
    Completed,
    /// The stage had already completed; duplicate delivery, nothing done.
    Duplicate,
    /// Another invocation holds the claim. The only non-acknowledging
    /// disposition: the delivery should come back later.
    Busy,
    /// A gate was not satisfied (predecessor or follow-up answers). The
    /// claim was released; the legitimate enqueue arrives separately.
    NotReady,
    /// The stage was dead-lettered earlier; only a manual retry re-arms it.
    DeadLettered,
    /// This delivery was the last permitted attempt (or hit a persistence
    /// fault) and dead-lettered the stage.
    Failed,
}

impl RunDisposition {
    /// Whether the queue delivery should be acknowledged.
    pub fn consumes_delivery(&self) -> bool {
        !matches!(self, RunDisposition::Busy)
    }
}

pub struct Orchestrator<S> {
    store: S,
    guard: OwnershipGuard<S>,
    retrieval: Arc<dyn RetrievalProvider>,
    completion: Arc<dyn CompletionProvider>,
    notifier: Arc<dyn Notifier>,
    queue: Arc<dyn JobQueue>,
    max_attempts: u32,
}

impl<S> Orchestrator<S>
where
    S: PipelineStore + IdentityStore + Clone,
{
    pub fn new(
        store: S,
        retrieval: Arc<dyn RetrievalProvider>,
        completion: Arc<dyn CompletionProvider>,
        notifier: Arc<dyn Notifier>,
        queue: Arc<dyn JobQueue>,
        max_attempts: u32,
    ) -> Self {
        let guard = OwnershipGuard::new(store.clone());
        Self {
            store,
            guard,
            retrieval,
            completion,
            notifier,
            queue,
            max_attempts,
        }
    }

    /// Run one delivery of a generation job. `attempt` is the zero-based
    /// delivery counter from the queue header.
    ///
    /// Authorization failures propagate without touching any state. After a
    /// won claim, an execution error either releases the claim for the next
    /// redelivery (transient) or dead-letters the step (final attempt, or a
    /// persistence fault that must never leave the step silently pending).
    pub async fn run(&self, job: &GenerationJob, attempt: u32) -> Result<RunDisposition> {
        let user = self
            .guard
            .verify_identity(&job.channel_user_id, job.user_id)
            .await?;

        match self.store.claim_step(user.id, job.stage).await? {
            ClaimOutcome::Claimed => {}
            ClaimOutcome::AlreadyCompleted => {
                tracing::info!(user = %user.id, stage = %job.stage, "stage already completed, duplicate delivery");
                return Ok(RunDisposition::Duplicate);
            }
            ClaimOutcome::AlreadyRunning => {
                tracing::info!(user = %user.id, stage = %job.stage, "stage claim held elsewhere");
                return Ok(RunDisposition::Busy);
            }
            ClaimOutcome::AlreadyFailed => {
                tracing::info!(user = %user.id, stage = %job.stage, "stage dead-lettered, waiting for manual retry");
                return Ok(RunDisposition::DeadLettered);
            }
        }

        if let Some(predecessor) = job.stage.predecessor() {
            let done = matches!(
                self.store.step_status(user.id, predecessor).await?,
                Some(StepStatus::Completed)
            );
            if !done {
                self.store.release_step(user.id, job.stage).await?;
                tracing::warn!(user = %user.id, stage = %job.stage, %predecessor, "predecessor incomplete, claim released");
                return Ok(RunDisposition::NotReady);
            }
        }
        if job.stage == Stage::Personalized {
            let questions = self.store.questions_for_user(user.id).await?;
            if !followup::collection_complete(&questions) {
                self.store.release_step(user.id, job.stage).await?;
                tracing::warn!(user = %user.id, "follow-up answers incomplete, claim released");
                return Ok(RunDisposition::NotReady);
            }
        }

        let outcome = match job.stage {
            Stage::Basic => self.run_basic(&user).await,
            Stage::Personalized => self.run_personalized(&user).await,
            Stage::Enhanced => self.run_enhanced(&user).await,
        };
        match outcome {
            Ok(()) => Ok(RunDisposition::Completed),
            Err(e) => {
                let last_attempt = attempt + 1 >= self.max_attempts;
                let persistence = matches!(e, Error::Store(_) | Error::Validation(_));
                if last_attempt || persistence {
                    tracing::error!(user = %user.id, stage = %job.stage, error = %e, "dead-lettering stage");
                    let detail = truncate_for_log(&e.to_string(), 500);
                    self.store.fail_step(user.id, job.stage, &detail).await?;
                    if job.stage != Stage::Enhanced {
                        self.notify_failure(&user, job.stage).await;
                    }
                    Ok(RunDisposition::Failed)
                } else {
                    tracing::warn!(user = %user.id, stage = %job.stage, attempt, error = %e, "stage failed, releasing for redelivery");
                    if !self.store.release_step(user.id, job.stage).await? {
                        tracing::warn!(user = %user.id, stage = %job.stage, "release lost, step changed hands");
                    }
                    Err(e)
                }
            }
        }
    }

    async fn notify_failure(&self, user: &User, stage: Stage) {
        let message = OutboundMessage::Buttons {
            text: "チェックリストの作成中に問題が発生しました。お手数ですが、再試行をお願いします。"
                .to_string(),
            actions: vec![MessageAction {
                label: "再試行".to_string(),
                data: PostbackAction::Retry { stage }.to_data(),
            }],
        };
        self.push(user, vec![message]).await;
    }

    async fn push(&self, user: &User, messages: Vec<OutboundMessage>) {
        if let Err(e) = self.notifier.push(&user.channel_user_id, messages).await {
            tracing::warn!(user = %user.id, error = %e, "push failed");
        }
    }
}

/// One checklist item as produced by the model. Lenient on everything but
/// the title: unknown categories and priorities fall back to defaults so a
/// single odd field does not discard the whole draft.
#[derive(Debug, Deserialize)]
pub(crate) struct TaskDraft {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_category")]
    pub category: TaskCategory,
    #[serde(default = "default_priority")]
    pub priority: Priority,
    #[serde(default)]
    pub due_days: Option<i64>,
}

fn default_category() -> TaskCategory {
    TaskCategory::Other
}

fn default_priority() -> Priority {
    Priority::Medium
}

/// The first top-level JSON array in a completion, fences and prose
/// stripped by construction.
pub(crate) fn extract_json_array(raw: &str) -> Option<&str> {
    let start = raw.find('[')?;
    let end = raw.rfind(']')?;
    (end > start).then(|| &raw[start..=end])
}

/// Parse drafts out of a completion, salvaging per item: a malformed entry
/// is dropped, not fatal. Returns empty when nothing usable remains.
pub(crate) fn parse_task_drafts(raw: &str) -> Vec<TaskDraft> {
    let Some(json) = extract_json_array(raw) else {
        return Vec::new();
    };
    let Ok(items) = serde_json::from_str::<Vec<serde_json::Value>>(json) else {
        return Vec::new();
    };
    items
        .into_iter()
        .filter_map(|item| serde_json::from_value::<TaskDraft>(item).ok())
        .filter(|draft| !draft.title.trim().is_empty())
        .collect()
}

/// Materialize drafts as insertable rows. Due dates are anchored on the
/// death date; drafts without one (or without a recorded death date) stay
/// undated rather than guessing.
pub(crate) fn drafts_to_tasks(
    drafts: Vec<TaskDraft>,
    stage: Stage,
    death_date: Option<NaiveDate>,
    first_order: i32,
) -> Vec<NewTask> {
    drafts
        .into_iter()
        .enumerate()
        .map(|(i, draft)| NewTask {
            title: draft.title.trim().to_string(),
            description: draft
                .description
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty()),
            category: draft.category,
            priority: draft.priority,
            due_date: match (death_date, draft.due_days) {
                (Some(base), Some(days)) => {
                    base.checked_add_days(Days::new(days.clamp(0, 365) as u64))
                }
                _ => None,
            },
            display_order: first_order + i as i32,
            stage,
        })
        .collect()
}

/// Bulleted passage block for prompts, one line per retrieval hit.
pub(crate) fn passages_block(hits: &[crate::capabilities::RetrievalHit]) -> String {
    hits.iter()
        .map(|hit| format!("- 【{}】{}", hit.source, hit.text))
        .collect::<Vec<_>>()
        .join("\n")
}
