//! Executes transition outcomes against the stores, the job queue, and the
//! messaging channel.
//!
//! The split with [`super::transition`] is strict: the transition decides,
//! this layer does. Everything here is either a database write, an enqueue,
//! or a push, sequenced so that duplicate webhook deliveries and crashed
//! handlers converge on the same persisted state.

use std::sync::Arc;

use chrono::Utc;
use chrono_tz::Tz;
use uuid::Uuid;

use crate::channels::{MessageAction, Notifier, OutboundMessage};
use crate::chat::ChatService;
use crate::db::Store;
use crate::error::{Error, QuotaError, Result, StoreError};
use crate::followup::FollowUpEngine;
use crate::guard::{OwnedResource, OwnershipGuard};
use crate::model::{ProfileField, Stage, Task, User, UserStatus};
use crate::queue::{GenerationJob, JobQueue};
use crate::quota::{PlanResource, QuotaLimiter, local_day};

use super::commands::{Command, render_progress, render_task_list};
use super::{
    Effect, Event, Outcome, Phase, field_reprompt, help_messages, parse_field_answer,
    question_message, text_msg, transition,
};

const GENERATION_STARTED: &str = "ありがとうございます。ご入力いただいた内容をもとにチェックリストを作成します。完成したらこちらからお知らせしますので、少しお待ちください。";
const GENERATION_QUOTA_REACHED: &str =
    "今月のチェックリスト作成回数が上限に達しています。プランの更新後にあらためてお試しください。";
const FOLLOWUPS_DONE: &str =
    "ご回答ありがとうございました。いただいた内容をもとに追加のタスクを作成しています。チェックリストは「一覧」と送るといつでも確認できます。";
const NO_PENDING_QUESTION: &str =
    "追加のご質問は以上です。チェックリストの準備が整い次第お知らせします。";
const ANSWER_REJECTED: &str = "すみません、回答を読み取れませんでした。";
const STALE_QUESTION: &str = "その質問は受付を終了しています。";
const TASK_NOT_FOUND: &str = "そのタスクは見つかりませんでした。";
const RETRY_STARTED: &str = "再試行しています。完了までお待ちください。";
const CHAT_UNAVAILABLE: &str =
    "申し訳ありません、うまくお答えできませんでした。少し時間をおいてお試しください。";

fn enqueue_failed_offer(stage: Stage) -> OutboundMessage {
    OutboundMessage::Buttons {
        text: "作成処理を開始できませんでした。時間をおいて再試行してください。".to_string(),
        actions: vec![MessageAction {
            label: "再試行".to_string(),
            data: super::PostbackAction::Retry { stage }.to_data(),
        }],
    }
}

/// Completion confirmation carrying an undo button.
fn completed_confirmation(text: String, task_id: Uuid) -> OutboundMessage {
    OutboundMessage::Buttons {
        text,
        actions: vec![MessageAction {
            label: "取り消す".to_string(),
            data: super::PostbackAction::UncompleteTask { task_id }.to_data(),
        }],
    }
}

/// Quick completion action for the most urgent open task, pushed with the
/// list.
fn next_task_offer(task: &Task) -> OutboundMessage {
    OutboundMessage::Buttons {
        text: format!("直近のタスク:「{}」", task.title),
        actions: vec![MessageAction {
            label: "完了にする".to_string(),
            data: super::PostbackAction::CompleteTask { task_id: task.id }.to_data(),
        }],
    }
}

fn quota_notice(cause: &QuotaError) -> &'static str {
    match cause {
        QuotaError::DailyCeiling { .. } => {
            "本日お送りいただけるメッセージ数の上限に達しました。明日またお声がけください。「一覧」や「完了 番号」はこれまでどおりご利用いただけます。"
        }
        QuotaError::PlanDisabled { .. } => "現在のプランではAIチャットをご利用いただけません。",
        QuotaError::PlanCeiling { .. } => {
            "今月のAIチャット回数の上限に達しました。月が替わると再度ご利用いただけます。"
        }
        QuotaError::SubscriptionInactive { .. } => {
            "ご契約の状態を確認できませんでした。プランの状況をご確認ください。"
        }
    }
}

pub struct ConversationFlow {
    store: Store,
    quota: QuotaLimiter<Store>,
    followups: FollowUpEngine<Store>,
    guard: OwnershipGuard<Store>,
    chat: ChatService,
    queue: Arc<dyn JobQueue>,
    notifier: Arc<dyn Notifier>,
    timezone: Tz,
}

impl ConversationFlow {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Store,
        quota: QuotaLimiter<Store>,
        followups: FollowUpEngine<Store>,
        guard: OwnershipGuard<Store>,
        chat: ChatService,
        queue: Arc<dyn JobQueue>,
        notifier: Arc<dyn Notifier>,
        timezone: Tz,
    ) -> Self {
        Self {
            store,
            quota,
            followups,
            guard,
            chat,
            queue,
            notifier,
            timezone,
        }
    }

    /// Handle one inbound channel event end to end. Called after the webhook
    /// has already acknowledged the delivery, so latency here never blocks
    /// the channel's retry timer.
    pub async fn handle_event(&self, channel_user_id: &str, event: Event) -> Result<()> {
        let user = self.store.ensure_user(channel_user_id).await?;
        if user.is_deleted || user.status != UserStatus::Active {
            tracing::info!(user = %user.id, status = %user.status, "dropping event for inactive user");
            return Ok(());
        }
        self.store.ensure_profile(user.id).await?;

        // A pending edit action scopes the next free-text message to one
        // profile field, whatever phase the dialogue is in.
        if let Event::Text { text } = &event {
            if let Some(field) = self.store.editing_field(user.id).await? {
                return self.finish_edit(&user, field, text).await;
            }
        }

        let phase = self
            .store
            .dialogue_phase(user.id)
            .await?
            .unwrap_or(Phase::New);
        let today = local_day(Utc::now(), self.timezone);
        let outcome = transition(&phase, &event, today);
        self.apply(&user, &phase, outcome).await
    }

    async fn apply(&self, user: &User, phase: &Phase, outcome: Outcome) -> Result<()> {
        for effect in outcome.effects {
            match effect {
                Effect::Reply(messages) => self.push(user, messages).await,
                Effect::SaveField(value) => {
                    self.store.set_profile_field(user.id, &value).await?;
                }
                Effect::RecordConsent => self.store.record_consent(user.id).await?,
                Effect::Answer { key, value } => {
                    self.record_followup_answer(user, key, &value).await?;
                }
                Effect::BeginGeneration => self.begin_generation(user, phase).await?,
                Effect::Retry(stage) => self.retry_stage(user, stage).await?,
                Effect::CompleteTask(task_id) => {
                    self.set_completion(user, task_id, true).await?;
                }
                Effect::UncompleteTask(task_id) => {
                    self.set_completion(user, task_id, false).await?;
                }
                Effect::Command(command) => self.run_command(user, command).await?,
                Effect::Chat(text) => self.run_chat(user, &text).await?,
                Effect::BeginEdit(field) => {
                    self.store.set_editing_field(user.id, field).await?;
                }
            }
        }
        if let Some(next) = outcome.next {
            self.store.set_dialogue_phase(user.id, &next).await?;
        }
        Ok(())
    }

    /// Kick off checklist generation after the final intake answer.
    ///
    /// The compare-and-set runs before the quota charge: of two racing
    /// deliveries of the same answer, the loser exits here without charging
    /// the plan counter or touching the phase again.
    async fn begin_generation(&self, user: &User, phase: &Phase) -> Result<()> {
        if !self
            .store
            .cas_dialogue_phase(user.id, phase.tag(), &Phase::Generating)
            .await?
        {
            tracing::info!(user = %user.id, "generation already triggered, skipping enqueue");
            return Ok(());
        }

        match self
            .quota
            .charge_plan_resource(user.id, PlanResource::TaskGeneration, Utc::now())
            .await
        {
            Ok(_) => {}
            Err(Error::Quota(cause)) => {
                tracing::info!(user = %user.id, %cause, "generation blocked by plan quota");
                self.push(user, vec![text_msg(GENERATION_QUOTA_REACHED)]).await;
                self.store.set_dialogue_phase(user.id, &Phase::Ready).await?;
                return Ok(());
            }
            Err(e) => {
                // Put the phase back so a resent answer can trigger again.
                if let Err(restore) = self.store.set_dialogue_phase(user.id, phase).await {
                    tracing::error!(user = %user.id, error = %restore, "phase restore failed");
                }
                return Err(e);
            }
        }

        self.store.ensure_step(user.id, Stage::Basic).await?;
        let job = GenerationJob {
            user_id: user.id,
            channel_user_id: user.channel_user_id.clone(),
            stage: Stage::Basic,
        };
        if let Err(e) = self.queue.enqueue(&job).await {
            tracing::error!(user = %user.id, error = %e, "basic stage enqueue failed");
            self.push(user, vec![enqueue_failed_offer(Stage::Basic)]).await;
            return Ok(());
        }
        self.push(user, vec![text_msg(GENERATION_STARTED)]).await;
        Ok(())
    }

    /// Record one follow-up answer. Free-text answers (`key: None`) target
    /// whatever question is currently active; exhausting the question set
    /// enqueues the personalized stage and settles the dialogue into ready.
    async fn record_followup_answer(
        &self,
        user: &User,
        key: Option<String>,
        value: &str,
    ) -> Result<()> {
        let key = match key {
            Some(key) => key,
            None => match self.followups.current_question(user.id).await? {
                Some(question) => question.key.as_str().to_string(),
                None => {
                    self.push(user, vec![text_msg(NO_PENDING_QUESTION)]).await;
                    return Ok(());
                }
            },
        };

        match self.followups.record_answer(user.id, &key, value).await {
            Ok(outcome) if outcome.complete => {
                self.store.ensure_step(user.id, Stage::Personalized).await?;
                let job = GenerationJob {
                    user_id: user.id,
                    channel_user_id: user.channel_user_id.clone(),
                    stage: Stage::Personalized,
                };
                if let Err(e) = self.queue.enqueue(&job).await {
                    tracing::error!(user = %user.id, error = %e, "personalized stage enqueue failed");
                    self.push(user, vec![enqueue_failed_offer(Stage::Personalized)])
                        .await;
                } else {
                    self.push(user, vec![text_msg(FOLLOWUPS_DONE)]).await;
                }
                self.store.set_dialogue_phase(user.id, &Phase::Ready).await?;
            }
            Ok(outcome) => {
                if let Some(question) = outcome.next_question {
                    self.push(user, vec![question_message(&question)]).await;
                }
            }
            Err(Error::Validation(cause)) => {
                tracing::debug!(user = %user.id, %cause, "follow-up answer rejected");
                let mut messages = vec![text_msg(ANSWER_REJECTED)];
                if let Some(question) = self.followups.current_question(user.id).await? {
                    messages.push(question_message(&question));
                }
                self.push(user, messages).await;
            }
            Err(Error::Store(StoreError::NotFound { .. })) => {
                // A button from a question set that no longer exists.
                self.push(user, vec![text_msg(STALE_QUESTION)]).await;
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }

    /// Manual retry of a dead-lettered stage. The re-arm is conditional on
    /// `failed`, and the claim protocol makes a duplicate enqueue harmless,
    /// so this enqueues unconditionally.
    async fn retry_stage(&self, user: &User, stage: Stage) -> Result<()> {
        let rearmed = self.store.rearm_failed_step(user.id, stage).await?;
        if !rearmed {
            tracing::debug!(user = %user.id, %stage, "retry without failed step, enqueueing anyway");
        }
        let job = GenerationJob {
            user_id: user.id,
            channel_user_id: user.channel_user_id.clone(),
            stage,
        };
        if let Err(e) = self.queue.enqueue(&job).await {
            tracing::error!(user = %user.id, %stage, error = %e, "retry enqueue failed");
            self.push(user, vec![enqueue_failed_offer(stage)]).await;
            return Ok(());
        }
        self.push(user, vec![text_msg(RETRY_STARTED)]).await;
        Ok(())
    }

    /// Toggle a task's completion from a checklist or undo button. Postback
    /// data is attacker controlled, so the ownership check runs before any
    /// write; a foreign or unknown task id gets a not-found reply and no
    /// state change.
    async fn set_completion(&self, user: &User, task_id: Uuid, completed: bool) -> Result<()> {
        if let Err(e) = self
            .guard
            .verify_resource_ownership(user.id, OwnedResource::Task(task_id))
            .await
        {
            tracing::warn!(user = %user.id, task = %task_id, error = %e, "task completion toggle rejected");
            self.push(user, vec![text_msg(TASK_NOT_FOUND)]).await;
            return Ok(());
        }
        let Some(task) = self.store.task_by_id(task_id).await? else {
            self.push(user, vec![text_msg(TASK_NOT_FOUND)]).await;
            return Ok(());
        };
        self.store.set_task_completed(task_id, completed).await?;
        let message = if completed {
            completed_confirmation(
                format!("「{}」を完了にしました。お疲れさまです。", task.title),
                task_id,
            )
        } else {
            text_msg(format!("「{}」を未完了に戻しました。", task.title))
        };
        self.push(user, vec![message]).await;
        Ok(())
    }

    async fn run_command(&self, user: &User, command: Command) -> Result<()> {
        match command {
            Command::ListTasks => {
                let tasks = self.store.open_tasks(user.id).await?;
                let mut messages = vec![text_msg(render_task_list(&tasks))];
                if let Some(first) = tasks.first() {
                    messages.push(next_task_offer(first));
                }
                self.push(user, messages).await;
            }
            Command::CompleteByNumber(number) => {
                let tasks = self.store.open_tasks(user.id).await?;
                match tasks.get(number - 1) {
                    Some(task) => {
                        self.store.set_task_completed(task.id, true).await?;
                        self.push(
                            user,
                            vec![completed_confirmation(
                                format!("{number}. 「{}」を完了にしました。", task.title),
                                task.id,
                            )],
                        )
                        .await;
                    }
                    None => {
                        self.push(
                            user,
                            vec![text_msg(format!(
                                "番号{number}のタスクが見つかりません。「一覧」で現在の番号をご確認ください。"
                            ))],
                        )
                        .await;
                    }
                }
            }
            Command::Progress => {
                let steps = self.store.steps_for_user(user.id).await?;
                let open = self.store.open_tasks(user.id).await?.len();
                let total = self.store.count_tasks(user.id).await? as usize;
                let completed = total.saturating_sub(open);
                self.push(user, vec![text_msg(render_progress(&steps, open, completed))])
                    .await;
            }
            Command::Help => {
                self.push(user, help_messages()).await;
            }
        }
        Ok(())
    }

    /// One AI chat turn behind both quota gates. Only messages that reach
    /// here count against the daily ceiling; command traffic stays free.
    async fn run_chat(&self, user: &User, text: &str) -> Result<()> {
        let now = Utc::now();
        if let Err(e) = self.quota.charge_daily_message(user.id, now).await {
            return self.reject_chat(user, e).await;
        }
        if let Err(e) = self
            .quota
            .charge_plan_resource(user.id, PlanResource::AiChat, now)
            .await
        {
            return self.reject_chat(user, e).await;
        }
        match self.chat.respond(user, text).await {
            Ok(reply) => self.push(user, vec![text_msg(reply)]).await,
            Err(Error::Capability(cause)) => {
                tracing::warn!(user = %user.id, %cause, "chat turn failed");
                self.push(user, vec![text_msg(CHAT_UNAVAILABLE)]).await;
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }

    async fn reject_chat(&self, user: &User, error: Error) -> Result<()> {
        let Error::Quota(cause) = error else {
            return Err(error);
        };
        tracing::info!(user = %user.id, %cause, "chat blocked by quota");
        self.push(user, vec![text_msg(quota_notice(&cause))]).await;
        Ok(())
    }

    /// Apply a scoped edit to one profile field. The edit marker survives a
    /// rejected answer so the user can simply try again.
    async fn finish_edit(&self, user: &User, field: ProfileField, text: &str) -> Result<()> {
        let today = local_day(Utc::now(), self.timezone);
        match parse_field_answer(field, text, today) {
            Ok(value) => {
                self.store.set_profile_field(user.id, &value).await?;
                self.store.clear_editing(user.id).await?;
                self.push(
                    user,
                    vec![text_msg(format!("{}を更新しました。", field.label()))],
                )
                .await;
            }
            Err(cause) => {
                tracing::debug!(user = %user.id, %cause, "edit answer rejected");
                self.push(user, field_reprompt(field)).await;
            }
        }
        Ok(())
    }

    /// Pushes are best effort: a channel delivery failure is logged and
    /// swallowed so the state writes that preceded it stay authoritative.
    async fn push(&self, user: &User, messages: Vec<OutboundMessage>) {
        if let Err(e) = self.notifier.push(&user.channel_user_id, messages).await {
            tracing::warn!(user = %user.id, error = %e, "push failed");
        }
    }
}
