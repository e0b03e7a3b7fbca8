//! Personalized stage: additional tasks from the follow-up answers.
//!
//! Runs only after the basic stage completed and every active question has
//! an answer (both gates are enforced in the orchestrator). New tasks are
//! appended after the existing display order; the basic checklist is never
//! modified. A user whose answers flag nothing gets zero additions, which
//! is a legitimate outcome, not a failure.

use crate::capabilities::ChatMessage;
use crate::channels::OutboundMessage;
use crate::error::{Result, StoreError};
use crate::guard::IdentityStore;
use crate::model::{FollowUpQuestion, Stage, Task, User, UserProfile};
use crate::queue::GenerationJob;

use super::{
    Orchestrator, PipelineStore, TaskDraft, drafts_to_tasks, parse_task_drafts, passages_block,
};

/// Retrieval topics for the circumstances the user answered yes to.
fn affirmative_topics(profile: &UserProfile) -> Vec<&'static str> {
    let mut topics = Vec::new();
    if profile.has_pension == Some(true) {
        topics.push("年金 未支給年金");
    }
    if profile.has_care_insurance == Some(true) {
        topics.push("介護保険 資格喪失");
    }
    if profile.has_real_estate == Some(true) {
        topics.push("不動産 相続登記");
    }
    if profile.has_vehicle == Some(true) {
        topics.push("自動車 名義変更");
    }
    if profile.has_life_insurance == Some(true) {
        topics.push("生命保険 死亡保険金");
    }
    if profile.is_self_employed == Some(true) {
        topics.push("個人事業 廃業届");
    }
    if profile.is_dependent_family == Some(true) {
        topics.push("遺族年金");
    }
    if profile.has_children == Some(true) {
        topics.push("子ども 手当 学資");
    }
    topics
}

fn personalized_prompt(
    profile: &UserProfile,
    questions: &[FollowUpQuestion],
    existing: &[Task],
    passages: &str,
) -> Vec<ChatMessage> {
    let system = format!(
        "あなたは日本の死後事務手続きの専門家です。ご遺族の個別の状況に応じて追加で必要になる手続きだけを挙げます。\
         出力は次の形式のJSON配列のみとし、説明文やコードフェンスは含めないでください。該当がなければ空の配列を返してください。\n{}",
        super::basic::DRAFT_SCHEMA
    );
    let mut request = String::from("確認済みの状況:");
    for question in questions {
        if let Some(answer) = &question.answer {
            request.push_str(&format!("\n- {} → {}", question.text, answer));
        }
    }
    let region = profile.region();
    if !region.is_empty() {
        request.push_str(&format!("\nお住まい: {region}"));
    }
    request.push_str("\n\n既にチェックリストにある手続き（重複して挙げないこと）:");
    for task in existing {
        request.push_str(&format!("\n- {}", task.title));
    }
    if !passages.is_empty() {
        request.push_str(&format!("\n\n参考情報:\n{passages}"));
    }
    request.push_str("\n\n「はい」と答えた状況で追加で必要になる手続きのみを挙げてください。");
    vec![ChatMessage::system(system), ChatMessage::user(request)]
}

impl<S> Orchestrator<S>
where
    S: PipelineStore + IdentityStore + Clone,
{
    pub(super) async fn run_personalized(&self, user: &User) -> Result<()> {
        let profile =
            self.store
                .profile(user.id)
                .await?
                .ok_or_else(|| StoreError::NotFound {
                    entity: "user_profile",
                    id: user.id.to_string(),
                })?;
        let questions = self.store.questions_for_user(user.id).await?;
        let existing = self.store.open_tasks(user.id).await?;

        let added = if existing.iter().any(|t| t.stage == Stage::Personalized) {
            tracing::info!(user = %user.id, "personalized tasks already present, skipping generation");
            0
        } else {
            let drafts = self
                .draft_personalized_tasks(&profile, &questions, &existing)
                .await?;
            let first_order = self.store.max_display_order(user.id).await? + 1;
            let new_tasks =
                drafts_to_tasks(drafts, Stage::Personalized, profile.death_date, first_order);
            if !new_tasks.is_empty() {
                self.store.insert_tasks(user.id, &new_tasks).await?;
            }
            new_tasks.len()
        };

        if !self.store.complete_step(user.id, Stage::Personalized).await? {
            tracing::info!(user = %user.id, "personalized completion lost, step changed hands");
            return Ok(());
        }
        tracing::info!(user = %user.id, added, "personalized stage completed");

        // Enrichment is best effort: a lost enqueue costs the supplements,
        // never the checklist.
        if let Err(e) = self.enqueue_enhanced(user).await {
            tracing::warn!(user = %user.id, error = %e, "enhanced stage enqueue failed");
        }

        let text = if added > 0 {
            format!(
                "ご回答をもとに、追加のタスクを{added}件チェックリストに加えました。「一覧」でご確認ください。"
            )
        } else {
            "ご回答を確認しました。今回の内容では追加のタスクはありませんでした。".to_string()
        };
        self.push(user, vec![OutboundMessage::Text { text }]).await;
        Ok(())
    }

    async fn enqueue_enhanced(&self, user: &User) -> Result<()> {
        self.store.ensure_step(user.id, Stage::Enhanced).await?;
        let job = GenerationJob {
            user_id: user.id,
            channel_user_id: user.channel_user_id.clone(),
            stage: Stage::Enhanced,
        };
        self.queue.enqueue(&job).await?;
        Ok(())
    }

    async fn draft_personalized_tasks(
        &self,
        profile: &UserProfile,
        questions: &[FollowUpQuestion],
        existing: &[Task],
    ) -> Result<Vec<TaskDraft>> {
        let topics = affirmative_topics(profile);
        if topics.is_empty() {
            tracing::info!("no circumstances flagged, nothing to add");
            return Ok(Vec::new());
        }

        let query = format!("{} {} 死亡後 手続き", profile.region(), topics.join(" "));
        let passages = match self.retrieval.search(&query).await {
            Ok(hits) => passages_block(&hits),
            Err(e) => {
                tracing::warn!(error = %e, "retrieval failed, drafting without passages");
                String::new()
            }
        };
        let raw = self
            .completion
            .complete(personalized_prompt(profile, questions, existing, &passages))
            .await?;
        Ok(parse_task_drafts(&raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topics_follow_the_affirmative_flags() {
        let profile = UserProfile {
            has_pension: Some(true),
            has_real_estate: Some(true),
            has_vehicle: Some(false),
            has_life_insurance: None,
            ..UserProfile::default()
        };
        let topics = affirmative_topics(&profile);
        assert_eq!(topics, vec!["年金 未支給年金", "不動産 相続登記"]);
    }

    #[test]
    fn all_negative_flags_mean_no_topics() {
        let profile = UserProfile {
            has_pension: Some(false),
            has_care_insurance: Some(false),
            has_real_estate: Some(false),
            has_vehicle: Some(false),
            has_life_insurance: Some(false),
            is_self_employed: Some(false),
            ..UserProfile::default()
        };
        assert!(affirmative_topics(&profile).is_empty());
    }
}
