//! Basic stage: the core checklist from the four intake fields.
//!
//! Drafts tasks with the model over regional and general retrieval context,
//! falling back to the curated baseline when the completion yields nothing
//! usable. On success it seeds the follow-up question set, moves the
//! dialogue to awaiting-followups, and pushes the summary plus the first
//! question. Tasks already present from an interrupted earlier run are
//! reused, so a redelivery never doubles the checklist.

use futures::future;

use crate::capabilities::ChatMessage;
use crate::channels::OutboundMessage;
use crate::conversation::{Phase, commands, question_message};
use crate::error::{Error, Result, StoreError, ValidationError};
use crate::followup::{next_active_question, seed_catalog};
use crate::guard::IdentityStore;
use crate::model::{ProfileField, Stage, Task, User, UserProfile};

use super::{
    Orchestrator, PipelineStore, TaskDraft, baseline, drafts_to_tasks, parse_task_drafts,
    passages_block,
};

pub(super) const DRAFT_SCHEMA: &str = r#"[{"title": "手続き名", "description": "概要と窓口", "category": "administrative|pension|insurance|tax|inheritance|finance|other", "priority": "high|medium|low", "due_days": 逝去日からの日数}]"#;

fn basic_prompt(profile: &UserProfile, passages: &str) -> Vec<ChatMessage> {
    let system = format!(
        "あなたは日本の死後事務手続きの専門家です。遺族が行う手続きのチェックリストを作成します。\
         出力は次の形式のJSON配列のみとし、説明文やコードフェンスは含めないでください。\n{DRAFT_SCHEMA}"
    );
    let mut context = String::from("相談者の状況:");
    if let Some(r) = profile.relationship {
        context.push_str(&format!("\n- 故人との関係: {}", r.label()));
    }
    let region = profile.region();
    if !region.is_empty() {
        context.push_str(&format!("\n- お住まい: {region}"));
    }
    if let Some(d) = profile.death_date {
        context.push_str(&format!("\n- 逝去日: {}", d.format("%Y年%-m月%-d日")));
    }
    let mut request = context;
    if !passages.is_empty() {
        request.push_str(&format!("\n\n参考情報:\n{passages}"));
    }
    request.push_str(
        "\n\n上記の状況で必要になる手続きを10〜15件、期限の早いものから順に挙げてください。",
    );
    vec![ChatMessage::system(system), ChatMessage::user(request)]
}

impl<S> Orchestrator<S>
where
    S: PipelineStore + IdentityStore + Clone,
{
    pub(super) async fn run_basic(&self, user: &User) -> Result<()> {
        let profile =
            self.store
                .profile(user.id)
                .await?
                .ok_or_else(|| StoreError::NotFound {
                    entity: "user_profile",
                    id: user.id.to_string(),
                })?;
        if !profile.intake_complete() {
            let missing = profile
                .missing_fields()
                .iter()
                .map(ProfileField::as_str)
                .collect::<Vec<_>>()
                .join(", ");
            return Err(Error::Validation(ValidationError::IncompleteProfile {
                missing,
            }));
        }
        let Some(relationship) = profile.relationship else {
            return Err(Error::Validation(ValidationError::IncompleteProfile {
                missing: ProfileField::Relationship.as_str().to_string(),
            }));
        };

        let mut tasks = self.basic_tasks(user).await?;
        if tasks.is_empty() {
            let drafts = self.draft_basic_tasks(&profile).await?;
            let new_tasks = drafts_to_tasks(drafts, Stage::Basic, profile.death_date, 1);
            self.store.insert_tasks(user.id, &new_tasks).await?;
            tasks = self.basic_tasks(user).await?;
        } else {
            tracing::info!(user = %user.id, count = tasks.len(), "basic tasks already present, reusing");
        }

        self.store
            .seed_questions(user.id, &seed_catalog(relationship))
            .await?;
        self.store
            .set_dialogue_phase(user.id, &Phase::AwaitingFollowups)
            .await?;
        if !self.store.complete_step(user.id, Stage::Basic).await? {
            tracing::info!(user = %user.id, "basic completion lost, step changed hands");
            return Ok(());
        }
        tracing::info!(user = %user.id, tasks = tasks.len(), "basic stage completed");

        let questions = self.store.questions_for_user(user.id).await?;
        let mut messages = vec![OutboundMessage::Text {
            text: commands::completion_summary(&tasks),
        }];
        if let Some(question) = next_active_question(&questions) {
            messages.push(question_message(question));
        }
        self.push(user, messages).await;
        Ok(())
    }

    async fn basic_tasks(&self, user: &User) -> Result<Vec<Task>> {
        let tasks = self
            .store
            .open_tasks(user.id)
            .await?
            .into_iter()
            .filter(|t| t.stage == Stage::Basic)
            .collect();
        Ok(tasks)
    }

    /// Draft the checklist. A retrieval outage degrades to a context-free
    /// prompt; an unusable completion degrades to the baseline. Only a
    /// completion-call failure propagates, for the queue to retry.
    async fn draft_basic_tasks(&self, profile: &UserProfile) -> Result<Vec<TaskDraft>> {
        let region = profile.region();
        let passages = match future::try_join(
            self.retrieval
                .search(&format!("{region} 死亡後 行政手続き 窓口")),
            self.retrieval.search("死亡後 手続き 期限 一覧 年金 保険"),
        )
        .await
        {
            Ok((mut regional, general)) => {
                regional.extend(general);
                passages_block(&regional)
            }
            Err(e) => {
                tracing::warn!(error = %e, "retrieval failed, drafting without passages");
                String::new()
            }
        };

        let raw = self
            .completion
            .complete(basic_prompt(profile, &passages))
            .await?;
        let drafts = parse_task_drafts(&raw);
        if drafts.is_empty() {
            tracing::warn!("completion unusable, using baseline checklist");
            return Ok(baseline::baseline_drafts());
        }
        Ok(drafts)
    }
}
