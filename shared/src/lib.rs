use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod field_value;

pub use field_value::FieldValue;

// ============================================
// Status enums
// ============================================

/// Kind of workflow step, as declared by the product template.
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "step_type", rename_all = "SCREAMING_SNAKE_CASE"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepType {
    Client,
    Admin,
    Formation,
    Timer,
}

/// Lifecycle of a step instance.
///
/// ```text
/// DRAFT -> SUBMITTED -> UNDER_REVIEW -> APPROVED
///              \              \-> REJECTED -> SUBMITTED
///               \-> APPROVED | REJECTED
/// ```
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "step_validation_status", rename_all = "SCREAMING_SNAKE_CASE"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepInstanceStatus {
    Draft,
    Submitted,
    UnderReview,
    Approved,
    Rejected,
}

impl StepInstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::Submitted => "SUBMITTED",
            Self::UnderReview => "UNDER_REVIEW",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
        }
    }

    /// True once the client has handed the step over for review and it has
    /// not been sent back.
    pub fn is_submitted(&self) -> bool {
        matches!(self, Self::Submitted | Self::UnderReview | Self::Approved)
    }

    /// States from which an admin may approve or reject the instance.
    pub fn is_reviewable(&self) -> bool {
        matches!(self, Self::Submitted | Self::UnderReview)
    }
}

impl std::fmt::Display for StepInstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Review state of a single submitted field value.
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "field_validation_status", rename_all = "SCREAMING_SNAKE_CASE"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewStatus {
    Pending,
    Approved,
    Rejected,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
        }
    }
}

impl std::fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "document_status", rename_all = "SCREAMING_SNAKE_CASE"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentStatus {
    Pending,
    Approved,
    Rejected,
    Outdated,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
            Self::Outdated => "OUTDATED",
        }
    }
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================
// Templates (read-only configuration)
// ============================================

#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub step_type: StepType,
}

#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductStep {
    pub product_id: Uuid,
    pub step_id: Uuid,
    pub position: i32,
    pub is_required: bool,
    /// Dossier status applied when an instance of this step is approved.
    pub dossier_status_on_approval: Option<String>,
}

/// A product step joined with its step template.
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductStepDefinition {
    pub product_id: Uuid,
    #[cfg_attr(feature = "sqlx", sqlx(flatten))]
    #[serde(flatten)]
    pub step: Step,
    pub position: i32,
    pub is_required: bool,
    pub dossier_status_on_approval: Option<String>,
}

#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepField {
    pub id: Uuid,
    pub step_id: Uuid,
    pub field_key: String,
    pub label: String,
    pub field_type: String, // text, number, date, select, multiselect, table
    pub is_required: bool,
    pub position: i32,
}

#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDocumentRequirement {
    pub step_id: Uuid,
    pub document_type_id: Uuid,
    pub is_required: bool,
}

#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentType {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    /// Lowercase extensions without the leading dot. Empty means any.
    pub allowed_extensions: Vec<String>,
    pub max_size_bytes: i64,
}

// ============================================
// Workflow state
// ============================================

#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dossier {
    pub id: Uuid,
    pub product_id: Uuid,
    pub owner_id: Uuid,
    pub status: String,
    pub current_step_instance_id: Option<Uuid>,
    /// Delivery lease on the client steps signal.
    pub client_steps_signal_claimed_at: Option<DateTime<Utc>>,
    /// Set once the signal has been delivered.
    pub client_steps_signaled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepInstance {
    pub id: Uuid,
    pub dossier_id: Uuid,
    pub step_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub validation_status: StepInstanceStatus,
    pub rejection_reason: Option<String>,
    pub validated_by: Option<Uuid>,
    pub validated_at: Option<DateTime<Utc>>,
}

impl StepInstance {
    pub fn draft(dossier_id: Uuid, step_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            dossier_id,
            step_id,
            started_at: now,
            completed_at: None,
            validation_status: StepInstanceStatus::Draft,
            rejection_reason: None,
            validated_by: None,
            validated_at: None,
        }
    }
}

/// A submitted value for one template field of one step instance.
///
/// Not `FromRow`: the storage layer folds the `value`/`value_jsonb` column
/// pair into [`FieldValue`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepFieldValue {
    pub id: Uuid,
    pub step_instance_id: Uuid,
    pub step_field_id: Uuid,
    pub value: FieldValue,
    pub validation_status: ReviewStatus,
    pub rejection_reason: Option<String>,
    pub reviewed_by: Option<Uuid>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub id: Uuid,
    pub dossier_id: Uuid,
    pub document_type_id: Uuid,
    pub step_instance_id: Option<Uuid>,
    pub status: DocumentStatus,
    pub current_version_id: Option<Uuid>,
    pub rejection_reason: Option<String>,
    pub reviewed_by: Option<Uuid>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Immutable record of one uploaded file.
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentVersion {
    pub id: Uuid,
    pub document_id: Uuid,
    pub version_number: i32,
    pub file_ref: String,
    pub original_filename: String,
    pub file_size: i64,
    pub mime_type: String,
    pub uploaded_by: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Who reviewed an item, when, and why (for rejections).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReviewStamp {
    pub reviewer: Uuid,
    pub at: DateTime<Utc>,
    pub reason: Option<String>,
}
