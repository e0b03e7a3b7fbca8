//! Conversation front door.
//!
//! Dialogue is a finite-state object persisted per user: a phase name plus a
//! serializable payload, at most one live row per user. [`transition`] is a
//! pure function of (phase, event); everything with side effects comes back
//! as an [`Effect`] list that [`flow::ConversationFlow`] executes. Unrecognized
//! input never advances a phase, it re-prompts, so redelivered or garbled
//! events leave persisted state untouched by construction.

pub mod commands;
mod flow;

pub use flow::ConversationFlow;

use std::sync::LazyLock;

use chrono::{Datelike, NaiveDate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use url::form_urlencoded;
use uuid::Uuid;

use crate::channels::{MessageAction, OutboundMessage};
use crate::error::ValidationError;
use crate::model::{FieldValue, FollowUpQuestion, ProfileField, Relationship, Stage};
use crate::util::fold_zenkaku_digits;

use commands::Command;

/// Persisted dialogue phase. The serialized form is `{"phase": "...", ...}`;
/// [`Phase::tag`] must match the serde tag so the compare-and-set on the
/// stored payload can name the expected phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum Phase {
    New,
    AwaitingConsent,
    CollectingProfile { field: ProfileField },
    AwaitingFollowups,
    Generating,
    Ready,
    Chatting,
}

impl Phase {
    pub fn tag(&self) -> &'static str {
        match self {
            Phase::New => "new",
            Phase::AwaitingConsent => "awaiting_consent",
            Phase::CollectingProfile { .. } => "collecting_profile",
            Phase::AwaitingFollowups => "awaiting_followups",
            Phase::Generating => "generating",
            Phase::Ready => "ready",
            Phase::Chatting => "chatting",
        }
    }
}

/// One inbound channel event, already signature-verified and deduplicated.
#[derive(Debug, Clone)]
pub enum Event {
    /// The user added or re-added the bot.
    Follow,
    Text { text: String },
    Postback { data: String },
}

/// Parsed button payload. Serialized as form-urlencoded key/value pairs so
/// the channel can echo it back opaquely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostbackAction {
    Consent { agreed: bool },
    /// Button answer for an intake field prompt.
    Field { field: ProfileField, value: String },
    /// Answer to a follow-up question.
    Answer { key: String, value: String },
    CompleteTask { task_id: Uuid },
    /// Undo button attached to a completion confirmation.
    UncompleteTask { task_id: Uuid },
    Retry { stage: Stage },
    Edit { field: ProfileField },
}

impl PostbackAction {
    pub fn to_data(&self) -> String {
        let mut s = form_urlencoded::Serializer::new(String::new());
        match self {
            PostbackAction::Consent { agreed } => {
                s.append_pair("action", "consent");
                s.append_pair("agree", if *agreed { "true" } else { "false" });
            }
            PostbackAction::Field { field, value } => {
                s.append_pair("action", "field");
                s.append_pair("field", field.as_str());
                s.append_pair("value", value);
            }
            PostbackAction::Answer { key, value } => {
                s.append_pair("action", "answer");
                s.append_pair("key", key);
                s.append_pair("value", value);
            }
            PostbackAction::CompleteTask { task_id } => {
                s.append_pair("action", "complete");
                s.append_pair("task", &task_id.to_string());
            }
            PostbackAction::UncompleteTask { task_id } => {
                s.append_pair("action", "uncomplete");
                s.append_pair("task", &task_id.to_string());
            }
            PostbackAction::Retry { stage } => {
                s.append_pair("action", "retry");
                s.append_pair("stage", stage.as_str());
            }
            PostbackAction::Edit { field } => {
                s.append_pair("action", "edit");
                s.append_pair("field", field.as_str());
            }
        }
        s.finish()
    }

    pub fn parse(data: &str) -> Option<Self> {
        let pairs: Vec<(String, String)> = form_urlencoded::parse(data.as_bytes())
            .into_owned()
            .collect();
        let get = |name: &str| {
            pairs
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.as_str())
        };
        match get("action")? {
            "consent" => Some(PostbackAction::Consent {
                agreed: get("agree")? == "true",
            }),
            "field" => Some(PostbackAction::Field {
                field: get("field")?.parse().ok()?,
                value: get("value")?.to_string(),
            }),
            "answer" => Some(PostbackAction::Answer {
                key: get("key")?.to_string(),
                value: get("value")?.to_string(),
            }),
            "complete" => Some(PostbackAction::CompleteTask {
                task_id: get("task")?.parse().ok()?,
            }),
            "uncomplete" => Some(PostbackAction::UncompleteTask {
                task_id: get("task")?.parse().ok()?,
            }),
            "retry" => Some(PostbackAction::Retry {
                stage: get("stage")?.parse().ok()?,
            }),
            "edit" => Some(PostbackAction::Edit {
                field: get("field")?.parse().ok()?,
            }),
            _ => None,
        }
    }
}

/// Side effects requested by a transition, executed by the flow layer.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Reply(Vec<OutboundMessage>),
    SaveField(FieldValue),
    RecordConsent,
    /// Record a follow-up answer. `key: None` targets the current active
    /// question (free-text answer); `Some` carries a button's question key.
    Answer { key: Option<String>, value: String },
    /// Quota-gate, CAS into `generating`, and enqueue the basic stage.
    BeginGeneration,
    Retry(Stage),
    CompleteTask(Uuid),
    UncompleteTask(Uuid),
    Command(Command),
    Chat(String),
    BeginEdit(ProfileField),
}

/// Result of one pure transition. `next: None` keeps the current phase.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub next: Option<Phase>,
    pub effects: Vec<Effect>,
}

impl Outcome {
    fn stay(effects: Vec<Effect>) -> Self {
        Self {
            next: None,
            effects,
        }
    }

    fn to(next: Phase, effects: Vec<Effect>) -> Self {
        Self {
            next: Some(next),
            effects,
        }
    }
}

fn text_msg(text: impl Into<String>) -> OutboundMessage {
    OutboundMessage::Text { text: text.into() }
}

fn reply(messages: Vec<OutboundMessage>) -> Effect {
    Effect::Reply(messages)
}

pub(crate) fn welcome_messages() -> Vec<OutboundMessage> {
    vec![
        text_msg(
            "ご利用ありがとうございます。みずひきは、ご家族を亡くされた後の行政手続きをお手伝いするサービスです。",
        ),
        OutboundMessage::Buttons {
            text: "チェックリスト作成のため、ご入力いただく情報の利用に同意をお願いします。"
                .to_string(),
            actions: vec![
                MessageAction {
                    label: "同意する".to_string(),
                    data: PostbackAction::Consent { agreed: true }.to_data(),
                },
                MessageAction {
                    label: "同意しない".to_string(),
                    data: PostbackAction::Consent { agreed: false }.to_data(),
                },
            ],
        },
    ]
}

fn consent_declined() -> Vec<OutboundMessage> {
    vec![text_msg(
        "同意いただけない場合、チェックリストの作成はできません。いつでも「同意する」ボタンから再開できます。",
    )]
}

/// Prompt for one intake field. Relationship offers buttons; the rest take
/// free text.
pub(crate) fn field_prompt(field: ProfileField) -> OutboundMessage {
    match field {
        ProfileField::Relationship => OutboundMessage::Buttons {
            text: "亡くなられた方とのご関係を教えてください。".to_string(),
            actions: [
                Relationship::Spouse,
                Relationship::Child,
                Relationship::Parent,
                Relationship::Sibling,
            ]
            .iter()
            .map(|r| MessageAction {
                label: r.label().to_string(),
                data: PostbackAction::Field {
                    field: ProfileField::Relationship,
                    value: r.as_str().to_string(),
                }
                .to_data(),
            })
            .collect(),
        },
        ProfileField::Prefecture => {
            text_msg("お住まいの都道府県を教えてください。（例: 東京都）")
        }
        ProfileField::Municipality => {
            text_msg("市区町村を教えてください。（例: 千代田区）")
        }
        ProfileField::DeathDate => text_msg(
            "お亡くなりになった日を教えてください。（例: 2024-01-15、2024年1月15日）",
        ),
    }
}

fn field_reprompt(field: ProfileField) -> Vec<OutboundMessage> {
    vec![
        text_msg("うまく読み取れませんでした。"),
        field_prompt(field),
    ]
}

/// Yes/no buttons for one follow-up question.
pub(crate) fn question_message(question: &FollowUpQuestion) -> OutboundMessage {
    let answer_button = |value: &str| MessageAction {
        label: value.to_string(),
        data: PostbackAction::Answer {
            key: question.key.as_str().to_string(),
            value: value.to_string(),
        }
        .to_data(),
    };
    OutboundMessage::Buttons {
        text: question.text.clone(),
        actions: vec![
            answer_button(crate::followup::ANSWER_YES),
            answer_button(crate::followup::ANSWER_NO),
        ],
    }
}

static JP_DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:(\d{1,4})年)?(\d{1,2})月(\d{1,2})日$").unwrap());

/// Parse a death-date answer. Accepts ISO, slashed, and Japanese era-free
/// forms, with full-width digits folded. A date after `today` is rejected.
/// A year-less form resolves to the most recent occurrence not after today.
pub fn parse_date_answer(input: &str, today: NaiveDate) -> Result<NaiveDate, ValidationError> {
    let folded = fold_zenkaku_digits(input.trim());
    let unparsable = || ValidationError::UnparsableDate {
        input: input.trim().to_string(),
    };

    let parsed = NaiveDate::parse_from_str(&folded, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(&folded, "%Y/%m/%d"))
        .ok()
        .or_else(|| {
            let caps = JP_DATE_RE.captures(&folded)?;
            let month: u32 = caps.get(2)?.as_str().parse().ok()?;
            let day: u32 = caps.get(3)?.as_str().parse().ok()?;
            match caps.get(1) {
                Some(year) => NaiveDate::from_ymd_opt(year.as_str().parse().ok()?, month, day),
                None => {
                    let this_year = NaiveDate::from_ymd_opt(today.year(), month, day)?;
                    if this_year > today {
                        NaiveDate::from_ymd_opt(today.year() - 1, month, day)
                    } else {
                        Some(this_year)
                    }
                }
            }
        })
        .ok_or_else(unparsable)?;

    if parsed > today {
        return Err(unparsable());
    }
    Ok(parsed)
}

/// Parse one intake answer against the expected field.
fn parse_field_answer(
    field: ProfileField,
    raw: &str,
    today: NaiveDate,
) -> Result<FieldValue, ValidationError> {
    let trimmed = raw.trim();
    match field {
        ProfileField::Relationship => Relationship::parse_answer(trimmed)
            .map(|value| FieldValue::Relationship { value })
            .ok_or_else(|| ValidationError::UnknownRelationship {
                input: trimmed.to_string(),
            }),
        ProfileField::Prefecture => {
            if trimmed.is_empty() || trimmed.chars().count() > 10 {
                Err(ValidationError::EmptyField {
                    field: "prefecture",
                })
            } else {
                Ok(FieldValue::Prefecture {
                    value: trimmed.to_string(),
                })
            }
        }
        ProfileField::Municipality => {
            if trimmed.is_empty() || trimmed.chars().count() > 20 {
                Err(ValidationError::EmptyField {
                    field: "municipality",
                })
            } else {
                Ok(FieldValue::Municipality {
                    value: trimmed.to_string(),
                })
            }
        }
        ProfileField::DeathDate => parse_date_answer(trimmed, today)
            .map(|value| FieldValue::DeathDate { value }),
    }
}

fn collect_field(field: ProfileField, raw: &str, today: NaiveDate) -> Outcome {
    match parse_field_answer(field, raw, today) {
        Ok(value) => {
            let mut effects = vec![Effect::SaveField(value)];
            match field.next() {
                Some(next_field) => {
                    effects.push(reply(vec![field_prompt(next_field)]));
                    Outcome::to(Phase::CollectingProfile { field: next_field }, effects)
                }
                None => {
                    // Intake complete. The flow layer owns the phase write:
                    // it goes through the compare-and-set that makes the
                    // basic-stage enqueue at-most-once.
                    effects.push(Effect::BeginGeneration);
                    Outcome::stay(effects)
                }
            }
        }
        Err(_) => Outcome::stay(vec![reply(field_reprompt(field))]),
    }
}

const GENERATING_WAIT: &str =
    "チェックリストを作成しています。完成したらこちらからお知らせしますので、少々お待ちください。";

fn help_messages() -> Vec<OutboundMessage> {
    vec![text_msg(
        "「一覧」でチェックリストを表示、「完了 番号」でタスクを完了にできます。「進捗」で作成状況、「ヘルプ」でこの案内を表示します。その他のメッセージには手続きに関する質問としてお答えします。",
    )]
}

/// The pure transition. Interprets `event` in `phase` and returns the next
/// phase plus requested effects; persistence and I/O happen in the flow
/// layer.
pub fn transition(phase: &Phase, event: &Event, today: NaiveDate) -> Outcome {
    match phase {
        Phase::New => Outcome::to(Phase::AwaitingConsent, vec![reply(welcome_messages())]),

        Phase::AwaitingConsent => match event {
            Event::Postback { data } => match PostbackAction::parse(data) {
                Some(PostbackAction::Consent { agreed: true }) => Outcome::to(
                    Phase::CollectingProfile {
                        field: ProfileField::first(),
                    },
                    vec![
                        Effect::RecordConsent,
                        reply(vec![
                            text_msg("ありがとうございます。いくつか質問させてください。"),
                            field_prompt(ProfileField::first()),
                        ]),
                    ],
                ),
                Some(PostbackAction::Consent { agreed: false }) => {
                    Outcome::stay(vec![reply(consent_declined())])
                }
                _ => Outcome::stay(vec![reply(welcome_messages())]),
            },
            Event::Text { text } => match text.trim() {
                "同意する" | "同意します" | "同意" => Outcome::to(
                    Phase::CollectingProfile {
                        field: ProfileField::first(),
                    },
                    vec![
                        Effect::RecordConsent,
                        reply(vec![
                            text_msg("ありがとうございます。いくつか質問させてください。"),
                            field_prompt(ProfileField::first()),
                        ]),
                    ],
                ),
                _ => Outcome::stay(vec![reply(welcome_messages())]),
            },
            Event::Follow => Outcome::stay(vec![reply(welcome_messages())]),
        },

        Phase::CollectingProfile { field } => match event {
            Event::Text { text } => collect_field(*field, text, today),
            Event::Postback { data } => match PostbackAction::parse(data) {
                Some(PostbackAction::Field {
                    field: answered,
                    value,
                }) if answered == *field => collect_field(*field, &value, today),
                _ => Outcome::stay(vec![reply(field_reprompt(*field))]),
            },
            Event::Follow => Outcome::stay(vec![reply(vec![field_prompt(*field)])]),
        },

        Phase::AwaitingFollowups => match event {
            Event::Text { text } => Outcome::stay(vec![Effect::Answer {
                key: None,
                value: text.clone(),
            }]),
            Event::Postback { data } => match PostbackAction::parse(data) {
                Some(PostbackAction::Answer { key, value }) => Outcome::stay(vec![Effect::Answer {
                    key: Some(key),
                    value,
                }]),
                Some(PostbackAction::Retry { stage }) => Outcome::stay(vec![Effect::Retry(stage)]),
                _ => Outcome::stay(vec![reply(vec![text_msg(
                    "ボタンまたは「はい／いいえ」でお答えください。",
                )])]),
            },
            Event::Follow => Outcome::stay(vec![reply(vec![text_msg(
                "引き続き、いくつかの質問にお答えください。",
            )])]),
        },

        Phase::Generating => match event {
            Event::Postback { data } => match PostbackAction::parse(data) {
                Some(PostbackAction::Retry { stage }) => Outcome::stay(vec![Effect::Retry(stage)]),
                _ => Outcome::stay(vec![reply(vec![text_msg(GENERATING_WAIT)])]),
            },
            _ => Outcome::stay(vec![reply(vec![text_msg(GENERATING_WAIT)])]),
        },

        Phase::Ready | Phase::Chatting => match event {
            Event::Text { text } => match commands::parse_command(text) {
                Some(command) => {
                    let outcome = Outcome::stay(vec![Effect::Command(command)]);
                    // A command while chatting steps back to the checklist.
                    if *phase == Phase::Chatting {
                        Outcome {
                            next: Some(Phase::Ready),
                            ..outcome
                        }
                    } else {
                        outcome
                    }
                }
                None => {
                    let effects = vec![Effect::Chat(text.clone())];
                    if *phase == Phase::Ready {
                        Outcome::to(Phase::Chatting, effects)
                    } else {
                        Outcome::stay(effects)
                    }
                }
            },
            Event::Postback { data } => match PostbackAction::parse(data) {
                Some(PostbackAction::CompleteTask { task_id }) => {
                    Outcome::stay(vec![Effect::CompleteTask(task_id)])
                }
                Some(PostbackAction::UncompleteTask { task_id }) => {
                    Outcome::stay(vec![Effect::UncompleteTask(task_id)])
                }
                Some(PostbackAction::Retry { stage }) => Outcome::stay(vec![Effect::Retry(stage)]),
                Some(PostbackAction::Edit { field }) => Outcome::stay(vec![
                    Effect::BeginEdit(field),
                    reply(vec![
                        text_msg("新しい値を入力してください。"),
                        field_prompt(field),
                    ]),
                ]),
                Some(PostbackAction::Answer { key, value }) => Outcome::stay(vec![Effect::Answer {
                    key: Some(key),
                    value,
                }]),
                _ => Outcome::stay(vec![reply(help_messages())]),
            },
            Event::Follow => Outcome::stay(vec![reply(help_messages())]),
        },
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 15).unwrap()
    }

    fn text_event(s: &str) -> Event {
        Event::Text {
            text: s.to_string(),
        }
    }

    fn has_reply(outcome: &Outcome) -> bool {
        outcome
            .effects
            .iter()
            .any(|e| matches!(e, Effect::Reply(_)))
    }

    #[test]
    fn phase_tag_matches_serialized_form() {
        let phases = [
            Phase::New,
            Phase::AwaitingConsent,
            Phase::CollectingProfile {
                field: ProfileField::Prefecture,
            },
            Phase::AwaitingFollowups,
            Phase::Generating,
            Phase::Ready,
            Phase::Chatting,
        ];
        for phase in phases {
            let value = serde_json::to_value(&phase).unwrap();
            assert_eq!(value["phase"], phase.tag(), "{phase:?}");
        }
    }

    #[test]
    fn collecting_profile_payload_round_trips() {
        let phase = Phase::CollectingProfile {
            field: ProfileField::DeathDate,
        };
        let json = serde_json::to_string(&phase).unwrap();
        assert_eq!(
            serde_json::from_str::<Phase>(&json).unwrap(),
            phase
        );
    }

    #[test]
    fn new_user_is_welcomed_into_consent() {
        let outcome = transition(&Phase::New, &Event::Follow, today());
        assert_eq!(outcome.next, Some(Phase::AwaitingConsent));
        assert!(has_reply(&outcome));
    }

    #[test]
    fn consent_agreement_starts_profile_collection() {
        let data = PostbackAction::Consent { agreed: true }.to_data();
        let outcome = transition(&Phase::AwaitingConsent, &Event::Postback { data }, today());
        assert_eq!(
            outcome.next,
            Some(Phase::CollectingProfile {
                field: ProfileField::Relationship,
            })
        );
        assert!(outcome.effects.contains(&Effect::RecordConsent));
    }

    #[test]
    fn consent_decline_does_not_advance() {
        let data = PostbackAction::Consent { agreed: false }.to_data();
        let outcome = transition(&Phase::AwaitingConsent, &Event::Postback { data }, today());
        assert_eq!(outcome.next, None);
        assert!(!outcome.effects.contains(&Effect::RecordConsent));
    }

    #[test]
    fn relationship_answer_advances_the_cursor() {
        let phase = Phase::CollectingProfile {
            field: ProfileField::Relationship,
        };
        let outcome = transition(&phase, &text_event("配偶者"), today());
        assert_eq!(
            outcome.next,
            Some(Phase::CollectingProfile {
                field: ProfileField::Prefecture,
            })
        );
        assert!(outcome.effects.contains(&Effect::SaveField(
            FieldValue::Relationship {
                value: Relationship::Spouse,
            }
        )));
    }

    #[test]
    fn garbled_input_reprompts_without_advancing() {
        let phase = Phase::CollectingProfile {
            field: ProfileField::Relationship,
        };
        let outcome = transition(&phase, &text_event("よくわからない"), today());
        assert_eq!(outcome.next, None);
        assert!(
            !outcome
                .effects
                .iter()
                .any(|e| matches!(e, Effect::SaveField(_)))
        );
        assert!(has_reply(&outcome));
    }

    #[test]
    fn relationship_button_answer_is_accepted() {
        let phase = Phase::CollectingProfile {
            field: ProfileField::Relationship,
        };
        let data = PostbackAction::Field {
            field: ProfileField::Relationship,
            value: "spouse".to_string(),
        }
        .to_data();
        let outcome = transition(&phase, &Event::Postback { data }, today());
        assert_eq!(
            outcome.next,
            Some(Phase::CollectingProfile {
                field: ProfileField::Prefecture,
            })
        );
    }

    #[test]
    fn stale_field_button_reprompts() {
        // A button for an earlier field arrives after the cursor moved on.
        let phase = Phase::CollectingProfile {
            field: ProfileField::Prefecture,
        };
        let data = PostbackAction::Field {
            field: ProfileField::Relationship,
            value: "spouse".to_string(),
        }
        .to_data();
        let outcome = transition(&phase, &Event::Postback { data }, today());
        assert_eq!(outcome.next, None);
        assert!(
            !outcome
                .effects
                .iter()
                .any(|e| matches!(e, Effect::SaveField(_)))
        );
    }

    #[test]
    fn final_field_requests_generation_without_writing_the_phase() {
        let phase = Phase::CollectingProfile {
            field: ProfileField::DeathDate,
        };
        let outcome = transition(&phase, &text_event("2024-01-15"), today());
        // The CAS in the flow layer owns the generating phase write.
        assert_eq!(outcome.next, None);
        assert!(outcome.effects.contains(&Effect::SaveField(
            FieldValue::DeathDate {
                value: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
            }
        )));
        assert!(outcome.effects.contains(&Effect::BeginGeneration));
    }

    #[test]
    fn date_answers_parse_across_formats() {
        let t = today();
        for (input, expected) in [
            ("2024-01-15", (2024, 1, 15)),
            ("2024/1/15", (2024, 1, 15)),
            ("2024年1月15日", (2024, 1, 15)),
            ("２０２４年１月１５日", (2024, 1, 15)),
            // Year-less, already passed this year.
            ("1月15日", (2024, 1, 15)),
            // Year-less, not yet reached this year: previous year.
            ("12月1日", (2023, 12, 1)),
        ] {
            let parsed = parse_date_answer(input, t).unwrap();
            let (y, m, d) = expected;
            assert_eq!(parsed, NaiveDate::from_ymd_opt(y, m, d).unwrap(), "{input}");
        }
    }

    #[test]
    fn future_and_nonsense_dates_are_rejected() {
        let t = today();
        for input in ["2030-01-01", "昨日", "13月32日", ""] {
            assert!(parse_date_answer(input, t).is_err(), "{input:?}");
        }
    }

    #[test]
    fn followup_text_routes_to_current_question() {
        let outcome = transition(&Phase::AwaitingFollowups, &text_event("はい"), today());
        assert_eq!(
            outcome.effects,
            vec![Effect::Answer {
                key: None,
                value: "はい".to_string(),
            }]
        );
        assert_eq!(outcome.next, None);
    }

    #[test]
    fn followup_button_carries_its_key() {
        let data = PostbackAction::Answer {
            key: "has_pension".to_string(),
            value: "はい".to_string(),
        }
        .to_data();
        let outcome = transition(&Phase::AwaitingFollowups, &Event::Postback { data }, today());
        assert_eq!(
            outcome.effects,
            vec![Effect::Answer {
                key: Some("has_pension".to_string()),
                value: "はい".to_string(),
            }]
        );
    }

    #[test]
    fn generating_phase_asks_for_patience() {
        let outcome = transition(&Phase::Generating, &text_event("まだ？"), today());
        assert_eq!(outcome.next, None);
        assert!(has_reply(&outcome));
    }

    #[test]
    fn retry_button_is_honored_while_generating() {
        let data = PostbackAction::Retry { stage: Stage::Basic }.to_data();
        let outcome = transition(&Phase::Generating, &Event::Postback { data }, today());
        assert_eq!(outcome.effects, vec![Effect::Retry(Stage::Basic)]);
    }

    #[test]
    fn ready_commands_execute_in_place() {
        let outcome = transition(&Phase::Ready, &text_event("一覧"), today());
        assert_eq!(outcome.next, None);
        assert_eq!(outcome.effects, vec![Effect::Command(Command::ListTasks)]);
    }

    #[test]
    fn ready_free_text_enters_chat() {
        let outcome = transition(&Phase::Ready, &text_event("年金の手続きについて教えて"), today());
        assert_eq!(outcome.next, Some(Phase::Chatting));
        assert_eq!(
            outcome.effects,
            vec![Effect::Chat("年金の手続きについて教えて".to_string())]
        );
    }

    #[test]
    fn chatting_command_returns_to_ready() {
        let outcome = transition(&Phase::Chatting, &text_event("一覧"), today());
        assert_eq!(outcome.next, Some(Phase::Ready));
        assert_eq!(outcome.effects, vec![Effect::Command(Command::ListTasks)]);
    }

    #[test]
    fn chatting_free_text_stays_in_chat() {
        let outcome = transition(&Phase::Chatting, &text_event("ありがとう"), today());
        assert_eq!(outcome.next, None);
        assert_eq!(outcome.effects, vec![Effect::Chat("ありがとう".to_string())]);
    }

    #[test]
    fn undo_button_requests_uncompletion() {
        let task_id = Uuid::new_v4();
        let data = PostbackAction::UncompleteTask { task_id }.to_data();
        let outcome = transition(&Phase::Ready, &Event::Postback { data }, today());
        assert_eq!(outcome.next, None);
        assert_eq!(outcome.effects, vec![Effect::UncompleteTask(task_id)]);
    }

    #[test]
    fn edit_button_starts_an_edit() {
        let data = PostbackAction::Edit {
            field: ProfileField::Prefecture,
        }
        .to_data();
        let outcome = transition(&Phase::Ready, &Event::Postback { data }, today());
        assert!(outcome
            .effects
            .contains(&Effect::BeginEdit(ProfileField::Prefecture)));
    }

    #[test]
    fn postback_actions_round_trip() {
        let task_id = Uuid::new_v4();
        let actions = [
            PostbackAction::Consent { agreed: true },
            PostbackAction::Field {
                field: ProfileField::Relationship,
                value: "spouse".to_string(),
            },
            PostbackAction::Answer {
                key: "has_vehicle".to_string(),
                value: "いいえ".to_string(),
            },
            PostbackAction::CompleteTask { task_id },
            PostbackAction::UncompleteTask { task_id },
            PostbackAction::Retry {
                stage: Stage::Personalized,
            },
            PostbackAction::Edit {
                field: ProfileField::DeathDate,
            },
        ];
        for action in actions {
            let data = action.to_data();
            assert_eq!(PostbackAction::parse(&data), Some(action), "{data}");
        }
        assert_eq!(PostbackAction::parse("action=unknown"), None);
        assert_eq!(PostbackAction::parse("garbage"), None);
    }
}
