//! Workflow Step Validation Engine
//!
//! Drives a dossier through the per-product sequence of steps:
//!
//! - [`TemplateResolver`] reads the product's step, field and document
//!   templates.
//! - [`StepInstanceManager`] owns the one instance per (dossier, step) and
//!   resolves dossier ownership and progress.
//! - [`FieldValidation`] stores submitted field values and their individual
//!   review state.
//! - [`DocumentVersioning`] stores uploads as immutable versions behind a
//!   forward-only current pointer.
//! - [`SubmissionCoordinator`] runs the client side: draft, submit, resubmit
//!   and the outbound signal once all client steps are in.
//! - [`ApprovalAggregator`] runs the admin side: review, approve and reject
//!   whole step instances.
//!
//! Every status change is a compare-and-set in the store, and every
//! read-then-insert sequence retries on a natural-key conflict within a
//! [`RetryBudget`](retry::RetryBudget).

pub mod approval;
pub mod documents;
pub mod error;
pub mod fields;
pub mod instances;
pub mod retry;
pub mod submission;
pub mod templates;

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::files::BlobStore;
use crate::notifications::SignalSink;
use crate::store::WorkflowStore;

pub use approval::{ApprovalAggregator, ItemKind, ItemOutcome, ItemResult, StepApproval};
pub use documents::{DocumentVersioning, UploadRequest, UploadedVersion};
pub use error::{WorkflowError, WorkflowResult};
pub use fields::{FieldValidation, FieldWriteReport};
pub use instances::{DossierProgress, StepInstanceDetail, StepInstanceManager, StepProgress};
pub use submission::{SignalOutcome, SubmissionCoordinator, SubmissionResult};
pub use templates::{StepTemplate, TemplateResolver, WorkflowTemplate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Client,
    Admin,
}

/// The authenticated caller of an engine operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Actor {
    pub user_id: Uuid,
    pub role: Role,
}

impl Actor {
    pub fn client(user_id: Uuid) -> Self {
        Self { user_id, role: Role::Client }
    }

    pub fn admin(user_id: Uuid) -> Self {
        Self { user_id, role: Role::Admin }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn require_admin(&self) -> WorkflowResult<()> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(WorkflowError::Forbidden("admin role required".to_string()))
        }
    }
}

/// How `approve_step_instance` treats items that are not yet approved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalMode {
    /// Every required field and document must already be APPROVED.
    #[default]
    Strict,
    /// Approve outstanding fields and documents along with the instance.
    Bulk,
}

impl FromStr for ApprovalMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "bulk" => Ok(Self::Bulk),
            other => Err(format!("unknown approval mode '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    pub approval_mode: ApprovalMode,
    /// Re-reads allowed after a natural-key conflict before giving up.
    pub max_conflict_retries: u32,
    /// How long a signal delivery claim holds before another request may
    /// take it over. Must exceed the webhook timeout.
    pub signal_lease: Duration,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            approval_mode: ApprovalMode::Strict,
            max_conflict_retries: 3,
            signal_lease: Duration::from_secs(60),
        }
    }
}

/// Entry point bundling the engine components over shared collaborators.
#[derive(Clone)]
pub struct WorkflowEngine {
    store: Arc<dyn WorkflowStore>,
    pub templates: TemplateResolver,
    pub instances: StepInstanceManager,
    pub fields: FieldValidation,
    pub documents: DocumentVersioning,
    pub submissions: SubmissionCoordinator,
    pub approvals: ApprovalAggregator,
}

impl WorkflowEngine {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        blobs: Arc<dyn BlobStore>,
        signals: Arc<dyn SignalSink>,
        config: WorkflowConfig,
    ) -> Self {
        let templates = TemplateResolver::new(store.clone());
        let instances = StepInstanceManager::new(store.clone(), config.max_conflict_retries);
        let fields = FieldValidation::new(store.clone(), instances.clone());
        let documents = DocumentVersioning::new(
            store.clone(),
            blobs,
            templates.clone(),
            instances.clone(),
            config.max_conflict_retries,
        );
        let submissions = SubmissionCoordinator::new(
            store.clone(),
            templates.clone(),
            instances.clone(),
            fields.clone(),
            signals,
            config.signal_lease,
        );
        let approvals = ApprovalAggregator::new(
            store.clone(),
            templates.clone(),
            instances.clone(),
            fields.clone(),
            documents.clone(),
            config.approval_mode,
        );

        Self {
            store,
            templates,
            instances,
            fields,
            documents,
            submissions,
            approvals,
        }
    }

    pub fn store(&self) -> &Arc<dyn WorkflowStore> {
        &self.store
    }
}
