//! Persistence for the workflow engine.
//!
//! [`WorkflowStore`] is the seam between the engine and its storage. Two
//! implementations exist: [`PgStore`] for production and [`MemoryStore`] for
//! development and tests. Both enforce the same natural-key uniqueness
//! constraints, and both implement every status change as a compare-and-set
//! against the expected prior status so the engine never acts on a stale read.
//!
//! ## Uniqueness
//!
//! | Entity | Key |
//! |---|---|
//! | step instance | `(dossier_id, step_id)` |
//! | field value | `(step_instance_id, step_field_id)` |
//! | document | `(dossier_id, document_type_id, step_instance_id)` |
//! | document version | `(document_id, version_number)` |
//!
//! Violations surface as [`StoreError::UniqueViolation`]; the engine treats
//! them as a signal to re-read and retry.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use dossierflow_shared::{
    Document, DocumentStatus, DocumentType, DocumentVersion, Dossier, FieldValue,
    ProductStepDefinition, ReviewStamp, ReviewStatus, StepDocumentRequirement, StepField,
    StepFieldValue, StepInstance, StepInstanceStatus,
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A natural-key uniqueness constraint rejected the write.
    #[error("unique constraint violated: {constraint}")]
    UniqueViolation { constraint: String },

    /// A backend-specific storage error (connection, decoding, ...).
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => Self::UniqueViolation {
                constraint: db.constraint().unwrap_or("unknown").to_string(),
            },
            _ => Self::Backend(err.to_string()),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Logical slot a document lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DocumentSlot {
    pub dossier_id: Uuid,
    pub document_type_id: Uuid,
    pub step_instance_id: Option<Uuid>,
}

/// New values for a step instance, applied only if its status still matches.
#[derive(Debug, Clone)]
pub struct StepTransition {
    pub to: StepInstanceStatus,
    pub completed_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub validated_by: Option<Uuid>,
    pub validated_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait WorkflowStore: Send + Sync + 'static {
    /// Cheap liveness check used by the health endpoints.
    async fn ping(&self) -> StoreResult<()>;

    // ── Templates (read-only) ────────────────────────────────────────────────

    /// Steps of a product, ordered by position.
    async fn product_steps(&self, product_id: Uuid) -> StoreResult<Vec<ProductStepDefinition>>;

    /// Template fields of a step, ordered by position.
    async fn step_fields(&self, step_id: Uuid) -> StoreResult<Vec<StepField>>;

    async fn step_document_requirements(
        &self,
        step_id: Uuid,
    ) -> StoreResult<Vec<StepDocumentRequirement>>;

    async fn document_type(&self, id: Uuid) -> StoreResult<Option<DocumentType>>;

    // ── Dossiers ─────────────────────────────────────────────────────────────

    async fn dossier(&self, id: Uuid) -> StoreResult<Option<Dossier>>;

    async fn set_current_step_instance(
        &self,
        dossier_id: Uuid,
        step_instance_id: Uuid,
    ) -> StoreResult<()>;

    async fn set_dossier_status(&self, dossier_id: Uuid, status: &str) -> StoreResult<()>;

    /// Take the delivery lease on the client steps signal by setting
    /// `client_steps_signal_claimed_at = at`. Succeeds only while the signal
    /// is undelivered and no lease newer than `stale_before` is held, so a
    /// lease left behind by a crashed request expires. Returns whether this
    /// call won the lease.
    async fn claim_client_steps_signal(
        &self,
        dossier_id: Uuid,
        at: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Record a delivered signal in `client_steps_signaled_at`.
    async fn mark_client_steps_signaled(
        &self,
        dossier_id: Uuid,
        at: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Drop the lease after a failed delivery.
    async fn release_client_steps_signal(&self, dossier_id: Uuid) -> StoreResult<()>;

    // ── Step instances ───────────────────────────────────────────────────────

    async fn step_instance(&self, id: Uuid) -> StoreResult<Option<StepInstance>>;

    async fn find_step_instance(
        &self,
        dossier_id: Uuid,
        step_id: Uuid,
    ) -> StoreResult<Option<StepInstance>>;

    /// Insert a new instance. `UniqueViolation` if `(dossier_id, step_id)`
    /// already exists.
    async fn insert_step_instance(&self, instance: &StepInstance) -> StoreResult<()>;

    async fn step_instances_for_dossier(&self, dossier_id: Uuid) -> StoreResult<Vec<StepInstance>>;

    /// Apply `transition` only if the instance is currently in `expected`.
    /// Returns the updated instance, or `None` when the status had moved on.
    async fn transition_step_instance(
        &self,
        id: Uuid,
        expected: StepInstanceStatus,
        transition: &StepTransition,
    ) -> StoreResult<Option<StepInstance>>;

    // ── Field values ─────────────────────────────────────────────────────────

    /// Values of an instance, in template field order.
    async fn field_values(&self, step_instance_id: Uuid) -> StoreResult<Vec<StepFieldValue>>;

    async fn field_value(&self, id: Uuid) -> StoreResult<Option<StepFieldValue>>;

    /// Insert or overwrite the value for `(step_instance_id, step_field_id)`,
    /// resetting it to PENDING and clearing review metadata.
    async fn upsert_field_value(
        &self,
        step_instance_id: Uuid,
        step_field_id: Uuid,
        value: &FieldValue,
        at: DateTime<Utc>,
    ) -> StoreResult<StepFieldValue>;

    /// Overwrite a value only if it is currently REJECTED. `None` otherwise.
    async fn resubmit_field_value(
        &self,
        id: Uuid,
        value: &FieldValue,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<StepFieldValue>>;

    /// Record a review decision. `None` if the value does not exist.
    async fn review_field_value(
        &self,
        id: Uuid,
        status: ReviewStatus,
        stamp: &ReviewStamp,
    ) -> StoreResult<Option<StepFieldValue>>;

    // ── Documents ────────────────────────────────────────────────────────────

    async fn document(&self, id: Uuid) -> StoreResult<Option<Document>>;

    async fn find_document(&self, slot: &DocumentSlot) -> StoreResult<Option<Document>>;

    /// Insert a new document. `UniqueViolation` if the slot is taken.
    async fn insert_document(&self, document: &Document) -> StoreResult<()>;

    async fn documents_for_step_instance(&self, step_instance_id: Uuid)
        -> StoreResult<Vec<Document>>;

    /// Documents of a dossier that are not scoped to any step instance.
    async fn dossier_level_documents(&self, dossier_id: Uuid) -> StoreResult<Vec<Document>>;

    async fn latest_version_number(&self, document_id: Uuid) -> StoreResult<Option<i32>>;

    /// Append a version. `UniqueViolation` if the number is taken.
    async fn insert_document_version(&self, version: &DocumentVersion) -> StoreResult<()>;

    /// Point the document at `version` unless it already points at a higher
    /// version number, and reset its review state to PENDING.
    async fn advance_current_version(
        &self,
        document_id: Uuid,
        version: &DocumentVersion,
    ) -> StoreResult<Document>;

    /// Versions of a document, ascending by number.
    async fn document_versions(&self, document_id: Uuid) -> StoreResult<Vec<DocumentVersion>>;

    /// Record a review decision. `None` if the document does not exist.
    async fn review_document(
        &self,
        id: Uuid,
        status: DocumentStatus,
        stamp: &ReviewStamp,
    ) -> StoreResult<Option<Document>>;
}
