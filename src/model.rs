//! Core domain types shared across the conversation front door, the
//! generation pipeline, and the store.
//!
//! Entities map 1:1 to the relational schema in `migrations/`. Enum columns
//! are stored as their `as_str` token and parsed back with `FromStr`; a token
//! that no longer parses surfaces as `StoreError::CorruptRow` at the mapping
//! site rather than being silently defaulted.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A registered end user, keyed internally by UUID and externally by the
/// messaging channel's opaque user identifier.
#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub channel_user_id: String,
    pub status: UserStatus,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub last_contact_at: Option<DateTime<Utc>>,
}

/// User lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    Active,
    Suspended,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Active => "active",
            UserStatus::Suspended => "suspended",
        }
    }
}

impl fmt::Display for UserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(UserStatus::Active),
            "suspended" => Ok(UserStatus::Suspended),
            other => Err(format!("unknown user status: {other}")),
        }
    }
}

/// Relationship of the user to the deceased.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relationship {
    Spouse,
    Child,
    Parent,
    Sibling,
    Grandchild,
    Other,
}

impl Relationship {
    pub fn as_str(&self) -> &'static str {
        match self {
            Relationship::Spouse => "spouse",
            Relationship::Child => "child",
            Relationship::Parent => "parent",
            Relationship::Sibling => "sibling",
            Relationship::Grandchild => "grandchild",
            Relationship::Other => "other",
        }
    }

    /// Japanese label used in conversation rendering.
    pub fn label(&self) -> &'static str {
        match self {
            Relationship::Spouse => "配偶者",
            Relationship::Child => "子",
            Relationship::Parent => "親",
            Relationship::Sibling => "兄弟姉妹",
            Relationship::Grandchild => "孫",
            Relationship::Other => "その他",
        }
    }

    /// Whether the dependent-family / children follow-up questions apply.
    /// Only a surviving spouse or a child of the deceased's parent line is
    /// plausibly carrying dependents of the deceased.
    pub fn has_dependent_questions(&self) -> bool {
        matches!(self, Relationship::Spouse | Relationship::Parent)
    }

    /// Parse a free-text or button answer. Accepts the wire token and the
    /// common Japanese forms a user actually types.
    pub fn parse_answer(input: &str) -> Option<Relationship> {
        let t = input.trim();
        match t {
            "spouse" | "配偶者" | "夫" | "妻" => Some(Relationship::Spouse),
            "child" | "子" | "息子" | "娘" | "長男" | "長女" => Some(Relationship::Child),
            "parent" | "親" | "父" | "母" | "父親" | "母親" => Some(Relationship::Parent),
            "sibling" | "兄弟姉妹" | "兄" | "弟" | "姉" | "妹" => Some(Relationship::Sibling),
            "grandchild" | "孫" => Some(Relationship::Grandchild),
            "other" | "その他" => Some(Relationship::Other),
            _ => None,
        }
    }
}

impl fmt::Display for Relationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Relationship {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "spouse" => Ok(Relationship::Spouse),
            "child" => Ok(Relationship::Child),
            "parent" => Ok(Relationship::Parent),
            "sibling" => Ok(Relationship::Sibling),
            "grandchild" => Ok(Relationship::Grandchild),
            "other" => Ok(Relationship::Other),
            other => Err(format!("unknown relationship: {other}")),
        }
    }
}

/// The intake fields, in the order the conversation collects them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileField {
    Relationship,
    Prefecture,
    Municipality,
    DeathDate,
}

impl ProfileField {
    pub fn first() -> ProfileField {
        ProfileField::Relationship
    }

    pub fn next(&self) -> Option<ProfileField> {
        match self {
            ProfileField::Relationship => Some(ProfileField::Prefecture),
            ProfileField::Prefecture => Some(ProfileField::Municipality),
            ProfileField::Municipality => Some(ProfileField::DeathDate),
            ProfileField::DeathDate => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProfileField::Relationship => "relationship",
            ProfileField::Prefecture => "prefecture",
            ProfileField::Municipality => "municipality",
            ProfileField::DeathDate => "death_date",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ProfileField::Relationship => "続柄",
            ProfileField::Prefecture => "都道府県",
            ProfileField::Municipality => "市区町村",
            ProfileField::DeathDate => "死亡日",
        }
    }
}

impl fmt::Display for ProfileField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProfileField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "relationship" => Ok(ProfileField::Relationship),
            "prefecture" => Ok(ProfileField::Prefecture),
            "municipality" => Ok(ProfileField::Municipality),
            "death_date" => Ok(ProfileField::DeathDate),
            other => Err(format!("unknown profile field: {other}")),
        }
    }
}

/// The per-user intake profile. Exactly one live row per user.
#[derive(Debug, Clone, Default)]
pub struct UserProfile {
    pub id: Uuid,
    pub user_id: Uuid,
    pub relationship: Option<Relationship>,
    pub prefecture: Option<String>,
    pub municipality: Option<String>,
    pub death_date: Option<NaiveDate>,
    pub has_pension: Option<bool>,
    pub has_care_insurance: Option<bool>,
    pub has_real_estate: Option<bool>,
    pub has_vehicle: Option<bool>,
    pub has_life_insurance: Option<bool>,
    pub is_self_employed: Option<bool>,
    pub is_dependent_family: Option<bool>,
    pub has_children: Option<bool>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl UserProfile {
    /// All four intake fields recorded; precondition for the basic stage.
    pub fn intake_complete(&self) -> bool {
        self.missing_fields().is_empty()
    }

    pub fn missing_fields(&self) -> Vec<ProfileField> {
        let mut missing = Vec::new();
        if self.relationship.is_none() {
            missing.push(ProfileField::Relationship);
        }
        if self.prefecture.is_none() {
            missing.push(ProfileField::Prefecture);
        }
        if self.municipality.is_none() {
            missing.push(ProfileField::Municipality);
        }
        if self.death_date.is_none() {
            missing.push(ProfileField::DeathDate);
        }
        missing
    }

    /// One-line region string for retrieval queries and prompt context.
    pub fn region(&self) -> String {
        match (&self.prefecture, &self.municipality) {
            (Some(p), Some(m)) => format!("{p}{m}"),
            (Some(p), None) => p.clone(),
            (None, Some(m)) => m.clone(),
            (None, None) => String::new(),
        }
    }
}

/// One ordered phase of checklist generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Basic,
    Personalized,
    Enhanced,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Basic => "basic",
            Stage::Personalized => "personalized",
            Stage::Enhanced => "enhanced",
        }
    }

    /// The stage whose completion gates this one.
    pub fn predecessor(&self) -> Option<Stage> {
        match self {
            Stage::Basic => None,
            Stage::Personalized => Some(Stage::Basic),
            Stage::Enhanced => Some(Stage::Personalized),
        }
    }

    pub fn successor(&self) -> Option<Stage> {
        match self {
            Stage::Basic => Some(Stage::Personalized),
            Stage::Personalized => Some(Stage::Enhanced),
            Stage::Enhanced => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "basic" => Ok(Stage::Basic),
            "personalized" => Ok(Stage::Personalized),
            "enhanced" => Ok(Stage::Enhanced),
            other => Err(format!("unknown stage: {other}")),
        }
    }
}

/// Status of one (user, stage) step in the durable step log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::InProgress => "in_progress",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(StepStatus::Pending),
            "in_progress" => Ok(StepStatus::InProgress),
            "completed" => Ok(StepStatus::Completed),
            "failed" => Ok(StepStatus::Failed),
            other => Err(format!("unknown step status: {other}")),
        }
    }
}

/// One row of the durable step log, keyed by (user, stage).
#[derive(Debug, Clone)]
pub struct GenerationStep {
    pub id: Uuid,
    pub user_id: Uuid,
    pub stage: Stage,
    pub status: StepStatus,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Checklist item category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskCategory {
    Administrative,
    Pension,
    Insurance,
    Tax,
    Inheritance,
    Finance,
    Other,
}

impl TaskCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskCategory::Administrative => "administrative",
            TaskCategory::Pension => "pension",
            TaskCategory::Insurance => "insurance",
            TaskCategory::Tax => "tax",
            TaskCategory::Inheritance => "inheritance",
            TaskCategory::Finance => "finance",
            TaskCategory::Other => "other",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TaskCategory::Administrative => "行政手続き",
            TaskCategory::Pension => "年金",
            TaskCategory::Insurance => "保険",
            TaskCategory::Tax => "税金",
            TaskCategory::Inheritance => "相続",
            TaskCategory::Finance => "金融",
            TaskCategory::Other => "その他",
        }
    }

    /// Lenient parse for generative output: accepts the wire token or the
    /// Japanese label, anything else lands in `Other`.
    pub fn from_label(input: &str) -> TaskCategory {
        match input.trim() {
            "administrative" | "行政手続き" => TaskCategory::Administrative,
            "pension" | "年金" => TaskCategory::Pension,
            "insurance" | "保険" => TaskCategory::Insurance,
            "tax" | "税金" => TaskCategory::Tax,
            "inheritance" | "相続" => TaskCategory::Inheritance,
            "finance" | "金融" => TaskCategory::Finance,
            _ => TaskCategory::Other,
        }
    }
}

impl fmt::Display for TaskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "administrative" => Ok(TaskCategory::Administrative),
            "pension" => Ok(TaskCategory::Pension),
            "insurance" => Ok(TaskCategory::Insurance),
            "tax" => Ok(TaskCategory::Tax),
            "inheritance" => Ok(TaskCategory::Inheritance),
            "finance" => Ok(TaskCategory::Finance),
            "other" => Ok(TaskCategory::Other),
            other => Err(format!("unknown task category: {other}")),
        }
    }
}

/// Checklist item priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }

    pub fn from_label(input: &str) -> Priority {
        match input.trim() {
            "high" | "高" => Priority::High,
            "low" | "低" => Priority::Low,
            _ => Priority::Medium,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "high" => Ok(Priority::High),
            "medium" => Ok(Priority::Medium),
            "low" => Ok(Priority::Low),
            other => Err(format!("unknown priority: {other}")),
        }
    }
}

/// A generated checklist item. Later stages only add rows or annotate
/// existing ones; the authoring stage is immutable once written.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: Uuid,
    pub user_id: Uuid,
    pub group_id: Option<Uuid>,
    pub title: String,
    pub description: Option<String>,
    pub category: TaskCategory,
    pub priority: Priority,
    pub due_date: Option<NaiveDate>,
    pub display_order: i32,
    pub stage: Stage,
    pub notes: Option<String>,
    pub is_completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
}

impl Task {
    pub fn is_open(&self) -> bool {
        !self.is_completed && !self.is_deleted
    }
}

/// Subscription plan tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Plan {
    Free,
    Basic,
    Premium,
}

impl Plan {
    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::Free => "free",
            Plan::Basic => "basic",
            Plan::Premium => "premium",
        }
    }

    /// Static plan catalog. Billing owns the authoritative copy; these values
    /// seed new Subscription rows and back the fallback for users without one.
    pub fn spec(&self) -> PlanSpec {
        match self {
            Plan::Free => PlanSpec {
                ai_chat_limit: 0,
                generation_limit: 1,
                monthly_price: dec!(0),
                group_enabled: false,
            },
            Plan::Basic => PlanSpec {
                ai_chat_limit: 10,
                generation_limit: 1,
                monthly_price: dec!(500),
                group_enabled: false,
            },
            Plan::Premium => PlanSpec {
                ai_chat_limit: -1,
                generation_limit: 1,
                monthly_price: dec!(1500),
                group_enabled: true,
            },
        }
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Plan {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(Plan::Free),
            "basic" => Ok(Plan::Basic),
            "premium" => Ok(Plan::Premium),
            other => Err(format!("unknown plan: {other}")),
        }
    }
}

/// Limits and pricing attached to a plan tier.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanSpec {
    /// -1 = unlimited, 0 = disabled.
    pub ai_chat_limit: i32,
    pub generation_limit: i32,
    pub monthly_price: Decimal,
    pub group_enabled: bool,
}

/// Subscription lifecycle status as mirrored from the billing collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    PastDue,
    Canceled,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Canceled => "canceled",
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SubscriptionStatus::Active),
            "past_due" => Ok(SubscriptionStatus::PastDue),
            "canceled" => Ok(SubscriptionStatus::Canceled),
            other => Err(format!("unknown subscription status: {other}")),
        }
    }
}

/// One row per user; counters reset lazily on read at the billing-period
/// boundary.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub id: Uuid,
    pub user_id: Uuid,
    pub plan: Plan,
    pub status: SubscriptionStatus,
    pub ai_chat_count: i32,
    pub ai_chat_limit: i32,
    pub generation_count: i32,
    pub generation_limit: i32,
    pub last_reset_at: DateTime<Utc>,
}

/// Role of a stored conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            "system" => Ok(MessageRole::System),
            other => Err(format!("unknown message role: {other}")),
        }
    }
}

/// A stored dialogue turn.
#[derive(Debug, Clone)]
pub struct ConversationMessage {
    pub id: Uuid,
    pub user_id: Uuid,
    pub role: MessageRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// A parsed intake answer, ready to persist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "field", rename_all = "snake_case")]
pub enum FieldValue {
    Relationship { value: Relationship },
    Prefecture { value: String },
    Municipality { value: String },
    DeathDate { value: NaiveDate },
}

impl FieldValue {
    pub fn field(&self) -> ProfileField {
        match self {
            FieldValue::Relationship { .. } => ProfileField::Relationship,
            FieldValue::Prefecture { .. } => ProfileField::Prefecture,
            FieldValue::Municipality { .. } => ProfileField::Municipality,
            FieldValue::DeathDate { .. } => ProfileField::DeathDate,
        }
    }
}

/// The closed set of follow-up question keys. Each key maps to exactly one
/// profile flag column; answers can never select a write target outside this
/// enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKey {
    HasPension,
    HasCareInsurance,
    HasRealEstate,
    HasVehicle,
    HasLifeInsurance,
    IsSelfEmployed,
    IsDependentFamily,
    HasChildren,
}

impl QuestionKey {
    pub const ALL: [QuestionKey; 8] = [
        QuestionKey::HasPension,
        QuestionKey::HasCareInsurance,
        QuestionKey::HasRealEstate,
        QuestionKey::HasVehicle,
        QuestionKey::HasLifeInsurance,
        QuestionKey::IsSelfEmployed,
        QuestionKey::IsDependentFamily,
        QuestionKey::HasChildren,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionKey::HasPension => "has_pension",
            QuestionKey::HasCareInsurance => "has_care_insurance",
            QuestionKey::HasRealEstate => "has_real_estate",
            QuestionKey::HasVehicle => "has_vehicle",
            QuestionKey::HasLifeInsurance => "has_life_insurance",
            QuestionKey::IsSelfEmployed => "is_self_employed",
            QuestionKey::IsDependentFamily => "is_dependent_family",
            QuestionKey::HasChildren => "has_children",
        }
    }
}

impl fmt::Display for QuestionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuestionKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "has_pension" => Ok(QuestionKey::HasPension),
            "has_care_insurance" => Ok(QuestionKey::HasCareInsurance),
            "has_real_estate" => Ok(QuestionKey::HasRealEstate),
            "has_vehicle" => Ok(QuestionKey::HasVehicle),
            "has_life_insurance" => Ok(QuestionKey::HasLifeInsurance),
            "is_self_employed" => Ok(QuestionKey::IsSelfEmployed),
            "is_dependent_family" => Ok(QuestionKey::IsDependentFamily),
            "has_children" => Ok(QuestionKey::HasChildren),
            other => Err(format!("unknown question key: {other}")),
        }
    }
}

/// Follow-up question answer format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    YesNo,
    MultipleChoice,
    FreeText,
}

impl QuestionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionType::YesNo => "yes_no",
            QuestionType::MultipleChoice => "multiple_choice",
            QuestionType::FreeText => "free_text",
        }
    }
}

impl fmt::Display for QuestionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuestionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "yes_no" => Ok(QuestionType::YesNo),
            "multiple_choice" => Ok(QuestionType::MultipleChoice),
            "free_text" => Ok(QuestionType::FreeText),
            other => Err(format!("unknown question type: {other}")),
        }
    }
}

/// A follow-up question instance bound to a user.
#[derive(Debug, Clone)]
pub struct FollowUpQuestion {
    pub id: Uuid,
    pub user_id: Uuid,
    pub key: QuestionKey,
    pub text: String,
    pub question_type: QuestionType,
    pub parent_key: Option<QuestionKey>,
    pub trigger_answer: Option<String>,
    pub is_answered: bool,
    pub answer: Option<String>,
    pub answered_at: Option<DateTime<Utc>>,
    pub display_order: i32,
}

/// Result of the atomic pending → in_progress claim on a step row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// This invocation won the claim and owns the stage run.
    Claimed,
    /// Another invocation holds the claim; exit as a no-op.
    AlreadyRunning,
    /// The stage already completed; duplicate delivery, report success.
    AlreadyCompleted,
    /// The stage is dead-lettered; only a manual retry re-arms it.
    AlreadyFailed,
}

/// A checklist item ready for insertion.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub title: String,
    pub description: Option<String>,
    pub category: TaskCategory,
    pub priority: Priority,
    pub due_date: Option<NaiveDate>,
    pub display_order: i32,
    pub stage: Stage,
}
