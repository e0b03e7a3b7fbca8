//! Follow-up questions asked between the basic and personalized stages.
//!
//! The question set is a fixed catalog keyed by [`QuestionKey`]. Answers
//! land in two places: the question row (audit trail, activation input for
//! dependent questions) and a boolean profile flag chosen by a match over
//! the closed key enum. Free-form input can therefore never name a write
//! target.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::db::Store;
use crate::error::{Error, Result, StoreError, ValidationError};
use crate::model::{FollowUpQuestion, QuestionKey, QuestionType, Relationship};

/// Canonical affirmative answer, used as the dependency trigger value.
pub const ANSWER_YES: &str = "はい";
/// Canonical negative answer for yes/no buttons.
pub const ANSWER_NO: &str = "いいえ";

/// A catalog entry, inserted per user when the basic stage completes.
#[derive(Debug, Clone, Copy)]
pub struct QuestionSeed {
    pub key: QuestionKey,
    pub text: &'static str,
    pub question_type: QuestionType,
    pub parent_key: Option<QuestionKey>,
    pub trigger_answer: Option<&'static str>,
    pub display_order: i32,
}

const fn base_seed(key: QuestionKey, text: &'static str, display_order: i32) -> QuestionSeed {
    QuestionSeed {
        key,
        text,
        question_type: QuestionType::YesNo,
        parent_key: None,
        trigger_answer: None,
        display_order,
    }
}

const BASE_QUESTIONS: [QuestionSeed; 6] = [
    base_seed(QuestionKey::HasPension, "故人は年金を受給していましたか？", 1),
    base_seed(
        QuestionKey::HasCareInsurance,
        "故人は介護保険サービスを利用していましたか？",
        2,
    ),
    base_seed(
        QuestionKey::HasRealEstate,
        "故人名義の不動産（土地・建物）はありますか？",
        3,
    ),
    base_seed(
        QuestionKey::HasVehicle,
        "故人名義の自動車やバイクはありますか？",
        4,
    ),
    base_seed(
        QuestionKey::HasLifeInsurance,
        "故人は生命保険に加入していましたか？",
        5,
    ),
    base_seed(
        QuestionKey::IsSelfEmployed,
        "故人は自営業・個人事業主でしたか？",
        6,
    ),
];

/// The question set for a relationship. Everyone gets the six asset and
/// status questions; a surviving spouse or parent-line user additionally
/// gets the dependency pair, where the children question only activates
/// after an affirmative dependency answer (survivor pension eligibility
/// hinges on that combination).
pub fn seed_catalog(relationship: Relationship) -> Vec<QuestionSeed> {
    let mut seeds = BASE_QUESTIONS.to_vec();
    if relationship.has_dependent_questions() {
        seeds.push(QuestionSeed {
            key: QuestionKey::IsDependentFamily,
            text: "あなたは故人の扶養に入っていましたか？",
            question_type: QuestionType::YesNo,
            parent_key: None,
            trigger_answer: None,
            display_order: 7,
        });
        seeds.push(QuestionSeed {
            key: QuestionKey::HasChildren,
            text: "故人との間に18歳未満のお子さんはいますか？",
            question_type: QuestionType::YesNo,
            parent_key: Some(QuestionKey::IsDependentFamily),
            trigger_answer: Some(ANSWER_YES),
            display_order: 8,
        });
    }
    seeds
}

/// Whether a free-text or button answer counts as "yes".
pub fn is_affirmative(answer: &str) -> bool {
    let t = answer.trim();
    t == ANSWER_YES || t == "1" || t.eq_ignore_ascii_case("yes") || t.eq_ignore_ascii_case("true")
}

fn parent_satisfies(parent: &FollowUpQuestion, trigger: Option<&str>) -> bool {
    if !parent.is_answered {
        return false;
    }
    match trigger {
        None => true,
        Some(t) => parent.answer.as_deref().map(str::trim) == Some(t.trim()),
    }
}

/// A question is active when it has no parent, or its parent was answered
/// with exactly the trigger value.
pub fn is_active(question: &FollowUpQuestion, all: &[FollowUpQuestion]) -> bool {
    match question.parent_key {
        None => true,
        Some(parent_key) => all
            .iter()
            .find(|p| p.key == parent_key)
            .is_some_and(|p| parent_satisfies(p, question.trigger_answer.as_deref())),
    }
}

/// The first active unanswered question in display order.
pub fn next_active_question(all: &[FollowUpQuestion]) -> Option<&FollowUpQuestion> {
    all.iter()
        .filter(|q| !q.is_answered && is_active(q, all))
        .min_by_key(|q| q.display_order)
}

/// Whether every active question has been answered. True for an empty set,
/// and true while unanswered questions exist that are merely inactive.
pub fn collection_complete(all: &[FollowUpQuestion]) -> bool {
    all.iter()
        .filter(|q| is_active(q, all))
        .all(|q| q.is_answered)
}

/// Question persistence the engine needs. [`Store`] implements this against
/// Postgres; tests substitute an in-memory set.
#[async_trait]
pub trait QuestionStore: Send + Sync {
    async fn questions_for_user(
        &self,
        user_id: Uuid,
    ) -> std::result::Result<Vec<FollowUpQuestion>, StoreError>;
    async fn record_question_answer(
        &self,
        user_id: Uuid,
        key: QuestionKey,
        answer: &str,
    ) -> std::result::Result<DateTime<Utc>, StoreError>;
    async fn set_profile_flag(
        &self,
        user_id: Uuid,
        key: QuestionKey,
        value: bool,
    ) -> std::result::Result<(), StoreError>;
}

#[async_trait]
impl QuestionStore for Store {
    async fn questions_for_user(
        &self,
        user_id: Uuid,
    ) -> std::result::Result<Vec<FollowUpQuestion>, StoreError> {
        Store::questions_for_user(self, user_id).await
    }

    async fn record_question_answer(
        &self,
        user_id: Uuid,
        key: QuestionKey,
        answer: &str,
    ) -> std::result::Result<DateTime<Utc>, StoreError> {
        Store::record_question_answer(self, user_id, key, answer).await
    }

    async fn set_profile_flag(
        &self,
        user_id: Uuid,
        key: QuestionKey,
        value: bool,
    ) -> std::result::Result<(), StoreError> {
        Store::set_profile_flag(self, user_id, key, value).await
    }
}

/// Result of recording one answer.
#[derive(Debug, Clone)]
pub struct AnswerOutcome {
    pub next_question: Option<FollowUpQuestion>,
    pub complete: bool,
}

pub struct FollowUpEngine<S> {
    store: S,
}

impl<S: QuestionStore> FollowUpEngine<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// The question to present next, if any remains.
    pub async fn current_question(&self, user_id: Uuid) -> Result<Option<FollowUpQuestion>> {
        let questions = self.store.questions_for_user(user_id).await?;
        Ok(next_active_question(&questions).cloned())
    }

    /// Parse the key token against the closed enum, record the answer on the
    /// question row, route the boolean onto the matching profile flag, and
    /// report what to ask next.
    pub async fn record_answer(
        &self,
        user_id: Uuid,
        key_token: &str,
        answer: &str,
    ) -> Result<AnswerOutcome> {
        let key: QuestionKey = key_token.parse().map_err(|_| {
            Error::Validation(ValidationError::UnknownQuestionKey {
                key: key_token.to_string(),
            })
        })?;
        let answer = answer.trim();
        if answer.is_empty() {
            return Err(Error::Validation(ValidationError::EmptyField {
                field: "answer",
            }));
        }
        self.store.record_question_answer(user_id, key, answer).await?;
        self.store
            .set_profile_flag(user_id, key, is_affirmative(answer))
            .await?;
        tracing::debug!(user = %user_id, %key, affirmative = is_affirmative(answer), "follow-up answered");

        let questions = self.store.questions_for_user(user_id).await?;
        Ok(AnswerOutcome {
            next_question: next_active_question(&questions).cloned(),
            complete: collection_complete(&questions),
        })
    }

    /// Whether the personalized stage may run.
    pub async fn collection_complete(&self, user_id: Uuid) -> Result<bool> {
        let questions = self.store.questions_for_user(user_id).await?;
        Ok(collection_complete(&questions))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn everyone_gets_the_six_base_questions() {
        let seeds = seed_catalog(Relationship::Child);
        assert_eq!(seeds.len(), 6);
        assert_eq!(
            seeds.iter().map(|s| s.display_order).collect::<Vec<_>>(),
            vec![1, 2, 3, 4, 5, 6]
        );
        assert!(seeds.iter().all(|s| s.parent_key.is_none()));
    }

    #[test]
    fn spouse_gets_the_dependency_pair() {
        let seeds = seed_catalog(Relationship::Spouse);
        assert_eq!(seeds.len(), 8);
        let children = seeds
            .iter()
            .find(|s| s.key == QuestionKey::HasChildren)
            .unwrap();
        assert_eq!(children.parent_key, Some(QuestionKey::IsDependentFamily));
        assert_eq!(children.trigger_answer, Some(ANSWER_YES));
        assert_eq!(children.display_order, 8);
    }

    #[test]
    fn affirmative_forms() {
        for yes in ["はい", " はい ", "yes", "YES", "true", "1"] {
            assert!(is_affirmative(yes), "{yes:?} should be affirmative");
        }
        for no in ["いいえ", "no", "0", "", "たぶん"] {
            assert!(!is_affirmative(no), "{no:?} should not be affirmative");
        }
    }

    fn question(
        key: QuestionKey,
        order: i32,
        parent: Option<(QuestionKey, &str)>,
        answer: Option<&str>,
    ) -> FollowUpQuestion {
        FollowUpQuestion {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            key,
            text: String::new(),
            question_type: QuestionType::YesNo,
            parent_key: parent.map(|(k, _)| k),
            trigger_answer: parent.map(|(_, t)| t.to_string()),
            is_answered: answer.is_some(),
            answer: answer.map(str::to_string),
            answered_at: answer.map(|_| Utc::now()),
            display_order: order,
        }
    }

    #[test]
    fn child_question_stays_inactive_until_parent_matches_trigger() {
        let parent_key = QuestionKey::IsDependentFamily;
        let child = |parent_answer: Option<&str>| {
            vec![
                question(parent_key, 1, None, parent_answer),
                question(QuestionKey::HasChildren, 2, Some((parent_key, "はい")), None),
            ]
        };

        let unanswered = child(None);
        assert!(!is_active(&unanswered[1], &unanswered));

        let negative = child(Some("いいえ"));
        assert!(!is_active(&negative[1], &negative));

        let affirmative = child(Some("はい"));
        assert!(is_active(&affirmative[1], &affirmative));
    }

    #[test]
    fn completeness_ignores_inactive_children() {
        let parent_key = QuestionKey::IsDependentFamily;
        let questions = vec![
            question(QuestionKey::HasPension, 1, None, Some("はい")),
            question(parent_key, 2, None, Some("いいえ")),
            question(QuestionKey::HasChildren, 3, Some((parent_key, "はい")), None),
        ];
        assert!(collection_complete(&questions));

        let activated = vec![
            question(QuestionKey::HasPension, 1, None, Some("はい")),
            question(parent_key, 2, None, Some("はい")),
            question(QuestionKey::HasChildren, 3, Some((parent_key, "はい")), None),
        ];
        assert!(!collection_complete(&activated));
    }

    #[test]
    fn next_question_follows_display_order_and_skips_inactive() {
        let parent_key = QuestionKey::IsDependentFamily;
        let questions = vec![
            question(QuestionKey::HasPension, 1, None, Some("はい")),
            question(QuestionKey::HasVehicle, 2, None, None),
            question(parent_key, 3, None, None),
            question(QuestionKey::HasChildren, 4, Some((parent_key, "はい")), None),
        ];
        let next = next_active_question(&questions).unwrap();
        assert_eq!(next.key, QuestionKey::HasVehicle);
    }

    #[test]
    fn empty_set_is_complete() {
        assert!(collection_complete(&[]));
        assert!(next_active_question(&[]).is_none());
    }

    struct FakeQuestions {
        rows: Mutex<Vec<FollowUpQuestion>>,
        flags: Mutex<HashMap<QuestionKey, bool>>,
    }

    impl FakeQuestions {
        fn for_relationship(user_id: Uuid, relationship: Relationship) -> Self {
            let rows = seed_catalog(relationship)
                .into_iter()
                .map(|seed| FollowUpQuestion {
                    id: Uuid::new_v4(),
                    user_id,
                    key: seed.key,
                    text: seed.text.to_string(),
                    question_type: seed.question_type,
                    parent_key: seed.parent_key,
                    trigger_answer: seed.trigger_answer.map(str::to_string),
                    is_answered: false,
                    answer: None,
                    answered_at: None,
                    display_order: seed.display_order,
                })
                .collect();
            Self {
                rows: Mutex::new(rows),
                flags: Mutex::new(HashMap::new()),
            }
        }
    }

    #[async_trait]
    impl QuestionStore for FakeQuestions {
        async fn questions_for_user(
            &self,
            _user_id: Uuid,
        ) -> std::result::Result<Vec<FollowUpQuestion>, StoreError> {
            Ok(self.rows.lock().unwrap().clone())
        }

        async fn record_question_answer(
            &self,
            user_id: Uuid,
            key: QuestionKey,
            answer: &str,
        ) -> std::result::Result<DateTime<Utc>, StoreError> {
            let mut rows = self.rows.lock().unwrap();
            let Some(row) = rows.iter_mut().find(|q| q.key == key) else {
                return Err(StoreError::NotFound {
                    entity: "follow_up_question",
                    id: format!("{user_id}/{key}"),
                });
            };
            let now = Utc::now();
            row.answer = Some(answer.to_string());
            row.is_answered = true;
            row.answered_at = Some(now);
            Ok(now)
        }

        async fn set_profile_flag(
            &self,
            _user_id: Uuid,
            key: QuestionKey,
            value: bool,
        ) -> std::result::Result<(), StoreError> {
            self.flags.lock().unwrap().insert(key, value);
            Ok(())
        }
    }

    #[tokio::test]
    async fn unknown_key_token_is_rejected_before_any_write() {
        let user = Uuid::new_v4();
        let engine = FollowUpEngine::new(FakeQuestions::for_relationship(
            user,
            Relationship::Child,
        ));

        let err = engine
            .record_answer(user, "has_pension'; DROP TABLE tasks; --", "はい")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::UnknownQuestionKey { .. })
        ));
        assert!(engine.store.flags.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn answer_routes_to_question_row_and_profile_flag() {
        let user = Uuid::new_v4();
        let engine = FollowUpEngine::new(FakeQuestions::for_relationship(
            user,
            Relationship::Child,
        ));

        let outcome = engine.record_answer(user, "has_pension", "はい").await.unwrap();
        assert!(!outcome.complete);
        assert_eq!(
            outcome.next_question.unwrap().key,
            QuestionKey::HasCareInsurance
        );
        assert_eq!(
            engine.store.flags.lock().unwrap().get(&QuestionKey::HasPension),
            Some(&true)
        );

        let outcome = engine
            .record_answer(user, "has_care_insurance", "いいえ")
            .await
            .unwrap();
        assert_eq!(
            engine
                .store
                .flags
                .lock()
                .unwrap()
                .get(&QuestionKey::HasCareInsurance),
            Some(&false)
        );
        assert_eq!(outcome.next_question.unwrap().key, QuestionKey::HasRealEstate);
    }

    #[tokio::test]
    async fn negative_dependency_answer_finishes_the_spouse_set_early() {
        let user = Uuid::new_v4();
        let engine = FollowUpEngine::new(FakeQuestions::for_relationship(
            user,
            Relationship::Spouse,
        ));

        for key in [
            "has_pension",
            "has_care_insurance",
            "has_real_estate",
            "has_vehicle",
            "has_life_insurance",
            "is_self_employed",
        ] {
            let outcome = engine.record_answer(user, key, "いいえ").await.unwrap();
            assert!(!outcome.complete);
        }

        // "No" on the dependency question deactivates the children question,
        // so the set completes without it.
        let outcome = engine
            .record_answer(user, "is_dependent_family", "いいえ")
            .await
            .unwrap();
        assert!(outcome.complete);
        assert!(outcome.next_question.is_none());
    }

    #[tokio::test]
    async fn affirmative_dependency_answer_activates_the_children_question() {
        let user = Uuid::new_v4();
        let engine = FollowUpEngine::new(FakeQuestions::for_relationship(
            user,
            Relationship::Spouse,
        ));

        for key in [
            "has_pension",
            "has_care_insurance",
            "has_real_estate",
            "has_vehicle",
            "has_life_insurance",
            "is_self_employed",
        ] {
            engine.record_answer(user, key, "いいえ").await.unwrap();
        }

        let outcome = engine
            .record_answer(user, "is_dependent_family", "はい")
            .await
            .unwrap();
        assert!(!outcome.complete);
        assert_eq!(outcome.next_question.unwrap().key, QuestionKey::HasChildren);

        let outcome = engine
            .record_answer(user, "has_children", "はい")
            .await
            .unwrap();
        assert!(outcome.complete);
    }

    #[tokio::test]
    async fn empty_answer_is_rejected() {
        let user = Uuid::new_v4();
        let engine = FollowUpEngine::new(FakeQuestions::for_relationship(
            user,
            Relationship::Child,
        ));

        let err = engine.record_answer(user, "has_pension", "   ").await.unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::EmptyField { field: "answer" })
        ));
    }
}
