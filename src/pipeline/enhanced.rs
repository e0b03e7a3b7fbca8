//! Enhanced stage: best-effort enrichment notes on existing tasks.
//!
//! Looks up region-specific detail (offices, required documents) and
//! attaches it as notes to matching open tasks. This stage creates no task
//! rows and its failure never blocks the checklist; the orchestrator
//! dead-letters it silently instead of notifying the user.

use serde::Deserialize;

use crate::capabilities::ChatMessage;
use crate::channels::OutboundMessage;
use crate::error::{Result, StoreError};
use crate::guard::IdentityStore;
use crate::model::{Task, User, UserProfile};

use super::{Orchestrator, PipelineStore, extract_json_array, passages_block};

#[derive(Debug, Deserialize)]
struct NoteDraft {
    task: String,
    note: String,
}

fn parse_note_drafts(raw: &str) -> Vec<NoteDraft> {
    let Some(json) = extract_json_array(raw) else {
        return Vec::new();
    };
    let Ok(items) = serde_json::from_str::<Vec<serde_json::Value>>(json) else {
        return Vec::new();
    };
    items
        .into_iter()
        .filter_map(|item| serde_json::from_value::<NoteDraft>(item).ok())
        .filter(|draft| !draft.task.trim().is_empty() && !draft.note.trim().is_empty())
        .collect()
}

/// Match a note's target against the open tasks, exact title first, then
/// containment either way. `None` drops the note.
fn match_task<'a>(tasks: &'a [Task], title: &str) -> Option<&'a Task> {
    let needle = title.trim();
    if needle.is_empty() {
        return None;
    }
    tasks
        .iter()
        .find(|t| t.title == needle)
        .or_else(|| {
            tasks
                .iter()
                .find(|t| t.title.contains(needle) || needle.contains(t.title.as_str()))
        })
}

fn enhance_prompt(profile: &UserProfile, tasks: &[Task], passages: &str) -> Vec<ChatMessage> {
    let system = "あなたは日本の死後事務手続きの専門家です。チェックリストの各タスクに、窓口・必要書類・注意点の補足を付けます。\
         出力は次の形式のJSON配列のみとし、説明文やコードフェンスは含めないでください。補足できるタスクだけを含めてください。\n\
         [{\"task\": \"対象タスクのtitle\", \"note\": \"補足\"}]"
        .to_string();
    let mut request = String::from("タスク一覧:");
    for task in tasks {
        request.push_str(&format!("\n- {}", task.title));
    }
    let region = profile.region();
    if !region.is_empty() {
        request.push_str(&format!("\n\nお住まい: {region}"));
    }
    if !passages.is_empty() {
        request.push_str(&format!("\n\n参考情報:\n{passages}"));
    }
    request.push_str("\n\n地域の窓口や必要書類がわかるタスクに補足を付けてください。");
    vec![ChatMessage::system(system), ChatMessage::user(request)]
}

impl<S> Orchestrator<S>
where
    S: PipelineStore + IdentityStore + Clone,
{
    pub(super) async fn run_enhanced(&self, user: &User) -> Result<()> {
        let profile =
            self.store
                .profile(user.id)
                .await?
                .ok_or_else(|| StoreError::NotFound {
                    entity: "user_profile",
                    id: user.id.to_string(),
                })?;
        let tasks = self.store.open_tasks(user.id).await?;
        if tasks.is_empty() {
            tracing::info!(user = %user.id, "no open tasks to enrich");
            self.finish_enhanced(user).await?;
            return Ok(());
        }

        let region = profile.region();
        let passages = match self
            .retrieval
            .search(&format!("{region} 死亡 手続き 窓口 必要書類"))
            .await
        {
            Ok(hits) => passages_block(&hits),
            Err(e) => {
                tracing::warn!(error = %e, "retrieval failed, enriching without passages");
                String::new()
            }
        };
        let raw = self
            .completion
            .complete(enhance_prompt(&profile, &tasks, &passages))
            .await?;

        let mut noted = 0;
        for draft in parse_note_drafts(&raw) {
            let Some(task) = match_task(&tasks, &draft.task) else {
                tracing::debug!(target = %draft.task, "note without matching task, dropped");
                continue;
            };
            self.store
                .append_task_note(task.id, draft.note.trim())
                .await?;
            noted += 1;
        }
        tracing::info!(user = %user.id, noted, "enhanced stage completed");

        self.finish_enhanced(user).await?;
        if noted > 0 {
            self.push(
                user,
                vec![OutboundMessage::Text {
                    text: "チェックリストのタスクに、窓口や必要書類の補足を追加しました。"
                        .to_string(),
                }],
            )
            .await;
        }
        Ok(())
    }

    async fn finish_enhanced(&self, user: &User) -> Result<()> {
        if !self
            .store
            .complete_step(user.id, crate::model::Stage::Enhanced)
            .await?
        {
            tracing::info!(user = %user.id, "enhanced completion lost, step changed hands");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use crate::model::{Priority, Stage, TaskCategory};

    use super::*;

    fn task(title: &str) -> Task {
        Task {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            group_id: None,
            title: title.to_string(),
            description: None,
            category: TaskCategory::Administrative,
            priority: Priority::Medium,
            due_date: None,
            display_order: 1,
            stage: Stage::Basic,
            notes: None,
            is_completed: false,
            completed_at: None,
            is_deleted: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn exact_title_wins_over_containment() {
        let tasks = vec![task("死亡届の提出"), task("死亡届")];
        let matched = match_task(&tasks, "死亡届").map(|t| t.title.as_str());
        assert_eq!(matched, Some("死亡届"));
    }

    #[test]
    fn containment_matches_both_directions() {
        let tasks = vec![task("年金受給停止の手続き")];
        assert!(match_task(&tasks, "年金受給停止").is_some());
        assert!(match_task(&tasks, "年金受給停止の手続き（国民年金）").is_some());
        assert!(match_task(&tasks, "自動車の名義変更").is_none());
        assert!(match_task(&tasks, "  ").is_none());
    }

    #[test]
    fn note_drafts_require_target_and_body() {
        let raw = r#"補足です。
        [
            {"task": "死亡届の提出", "note": "本庁1階の戸籍窓口。印鑑と届出人の本人確認書類が必要。"},
            {"task": "", "note": "宛先なし"},
            {"task": "年金", "note": "   "},
            {"note": "タスク指定なし"}
        ]"#;
        let drafts = parse_note_drafts(raw);
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].task, "死亡届の提出");
    }
}
