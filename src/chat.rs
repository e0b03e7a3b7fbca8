//! Retrieval-augmented AI chat for users with a finished checklist.
//!
//! Each turn grounds the model with the user's intake profile and the top
//! knowledge-base passages for the question, plus a short window of prior
//! dialogue. Quota charging happens in the conversation flow before this
//! service runs; a retrieval failure degrades to an answer without passages
//! rather than failing the turn.

use std::sync::Arc;

use crate::capabilities::{ChatMessage, CompletionProvider, RetrievalHit, RetrievalProvider};
use crate::db::Store;
use crate::error::Result;
use crate::model::{ConversationMessage, MessageRole, User, UserProfile};

/// Stored turns carried into each completion: five exchanges.
const HISTORY_TURNS: i64 = 10;

pub(crate) fn system_prompt(profile: Option<&UserProfile>, hits: &[RetrievalHit]) -> String {
    let mut prompt = String::from(
        "あなたは死別後の行政手続きに詳しい日本語アシスタントです。\
         思いやりを持ちつつ、手続きの期限・窓口・必要書類を簡潔に案内してください。\
         確実でない情報は その旨を伝え、市区町村の窓口確認を促してください。",
    );
    if let Some(p) = profile {
        prompt.push_str("\n\n相談者の状況:");
        if let Some(r) = p.relationship {
            prompt.push_str(&format!("\n- 故人との関係: {}", r.label()));
        }
        let region = p.region();
        if !region.is_empty() {
            prompt.push_str(&format!("\n- お住まい: {region}"));
        }
        if let Some(d) = p.death_date {
            prompt.push_str(&format!("\n- 逝去日: {}", d.format("%Y年%-m月%-d日")));
        }
    }
    if !hits.is_empty() {
        prompt.push_str("\n\n参考情報:");
        for hit in hits {
            prompt.push_str(&format!("\n- 【{}】{}", hit.source, hit.text));
        }
    }
    prompt
}

/// History rows as completion input, oldest first. Stored system rows (none
/// are written today) are dropped so the prompt stays the single system turn.
pub(crate) fn context_messages(history: &[ConversationMessage]) -> Vec<ChatMessage> {
    history
        .iter()
        .filter(|m| m.role != MessageRole::System)
        .map(|m| ChatMessage {
            role: m.role,
            content: m.content.clone(),
        })
        .collect()
}

pub struct ChatService {
    store: Store,
    completion: Arc<dyn CompletionProvider>,
    retrieval: Arc<dyn RetrievalProvider>,
}

impl ChatService {
    pub fn new(
        store: Store,
        completion: Arc<dyn CompletionProvider>,
        retrieval: Arc<dyn RetrievalProvider>,
    ) -> Self {
        Self {
            store,
            completion,
            retrieval,
        }
    }

    /// One chat turn: retrieve, complete, persist both sides, return the
    /// reply text.
    pub async fn respond(&self, user: &User, text: &str) -> Result<String> {
        let profile = self.store.profile(user.id).await?;
        let hits = match self.retrieval.search(text).await {
            Ok(hits) => hits,
            Err(e) => {
                tracing::warn!(user = %user.id, error = %e, "retrieval failed, answering without context");
                Vec::new()
            }
        };
        let history = self.store.recent_messages(user.id, HISTORY_TURNS).await?;

        let mut messages = vec![ChatMessage::system(system_prompt(profile.as_ref(), &hits))];
        messages.extend(context_messages(&history));
        messages.push(ChatMessage::user(text));

        let reply = self.completion.complete(messages).await?;

        self.store
            .append_message(user.id, MessageRole::User, text)
            .await?;
        self.store
            .append_message(user.id, MessageRole::Assistant, &reply)
            .await?;
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};
    use uuid::Uuid;

    use crate::model::Relationship;

    use super::*;

    #[test]
    fn prompt_carries_profile_and_passages() {
        let profile = UserProfile {
            relationship: Some(Relationship::Spouse),
            prefecture: Some("東京都".to_string()),
            municipality: Some("千代田区".to_string()),
            death_date: NaiveDate::from_ymd_opt(2024, 1, 15),
            ..UserProfile::default()
        };
        let hits = vec![RetrievalHit {
            source: "年金機構".to_string(),
            text: "年金受給権者死亡届は14日以内に提出。".to_string(),
            url: None,
        }];
        let prompt = system_prompt(Some(&profile), &hits);
        assert!(prompt.contains("配偶者"));
        assert!(prompt.contains("東京都千代田区"));
        assert!(prompt.contains("2024年1月15日"));
        assert!(prompt.contains("年金受給権者死亡届"));
    }

    #[test]
    fn prompt_without_profile_or_hits_is_still_usable() {
        let prompt = system_prompt(None, &[]);
        assert!(prompt.contains("行政手続き"));
        assert!(!prompt.contains("相談者の状況"));
        assert!(!prompt.contains("参考情報"));
    }

    #[test]
    fn history_keeps_order_and_drops_system_rows() {
        let user_id = Uuid::new_v4();
        let msg = |role: MessageRole, content: &str| ConversationMessage {
            id: Uuid::new_v4(),
            user_id,
            role,
            content: content.to_string(),
            created_at: Utc::now(),
        };
        let history = vec![
            msg(MessageRole::User, "死亡届はどこに出しますか"),
            msg(MessageRole::Assistant, "市区町村の窓口です"),
            msg(MessageRole::System, "should be dropped"),
        ];
        let context = context_messages(&history);
        assert_eq!(context.len(), 2);
        assert_eq!(context[0].content, "死亡届はどこに出しますか");
        assert_eq!(context[1].role, MessageRole::Assistant);
    }
}
