//! Document versioning
//!
//! A [`Document`] is the slot for one document type within a dossier,
//! optionally scoped to a step instance. Each upload appends an immutable
//! [`DocumentVersion`] numbered `1..N` and moves the document's current
//! pointer forward. The pointer never moves backwards: when two uploads race,
//! the one with the higher version number ends up current whichever finishes
//! last.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use dossierflow_shared::{Document, DocumentStatus, DocumentVersion, ReviewStamp};

use super::error::{WorkflowError, WorkflowResult};
use super::instances::StepInstanceManager;
use super::retry::RetryBudget;
use super::templates::TemplateResolver;
use super::Actor;
use crate::files::{format_file_size, BlobError, BlobStore};
use crate::store::{DocumentSlot, StoreError, WorkflowStore};
use crate::validation;

#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub dossier_id: Uuid,
    pub document_type_id: Uuid,
    pub step_instance_id: Option<Uuid>,
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadedVersion {
    pub document: Document,
    pub version: DocumentVersion,
}

impl From<BlobError> for WorkflowError {
    fn from(err: BlobError) -> Self {
        WorkflowError::UpstreamFailure {
            service: "blob storage".to_string(),
            message: err.to_string(),
        }
    }
}

#[derive(Clone)]
pub struct DocumentVersioning {
    store: Arc<dyn WorkflowStore>,
    blobs: Arc<dyn BlobStore>,
    templates: TemplateResolver,
    instances: StepInstanceManager,
    max_conflict_retries: u32,
}

impl DocumentVersioning {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        blobs: Arc<dyn BlobStore>,
        templates: TemplateResolver,
        instances: StepInstanceManager,
        max_conflict_retries: u32,
    ) -> Self {
        Self { store, blobs, templates, instances, max_conflict_retries }
    }

    /// Validate and store a new version of the document in the request's slot.
    ///
    /// Nothing is written when the file does not satisfy the document type.
    pub async fn upload(&self, actor: &Actor, request: UploadRequest) -> WorkflowResult<UploadedVersion> {
        let dossier = self.instances.load_dossier(actor, request.dossier_id).await?;

        if let Some(instance_id) = request.step_instance_id {
            let instance = self.instances.load_instance(instance_id).await?;
            if instance.dossier_id != dossier.id {
                return Err(WorkflowError::not_found("Step instance", instance_id));
            }
        }

        let document_type = self.templates.document_type(request.document_type_id).await?;
        let mime_type = validation::upload::validate(
            &document_type,
            &request.filename,
            &request.content_type,
            request.bytes.len(),
        )?;

        let slot = DocumentSlot {
            dossier_id: dossier.id,
            document_type_id: document_type.id,
            step_instance_id: request.step_instance_id,
        };
        let document = self.get_or_create_document(&slot).await?;

        let file_ref = self
            .blobs
            .put(&request.bytes, &mime_type, &request.filename)
            .await?;

        let version = match self
            .append_version(actor, &document, &request, &mime_type, &file_ref)
            .await
        {
            Ok(version) => version,
            Err(e) => {
                if let Err(cleanup) = self.blobs.delete(&file_ref).await {
                    warn!(blob = %file_ref, "Failed to remove orphaned blob: {}", cleanup);
                }
                return Err(e);
            }
        };

        let document = self.store.advance_current_version(document.id, &version).await?;

        info!(
            document_id = %document.id,
            version = version.version_number,
            size = %format_file_size(version.file_size),
            uploaded_by = %actor.user_id,
            "Uploaded document version"
        );

        Ok(UploadedVersion { document, version })
    }

    /// Insert the next version number for `document`, re-reading after a
    /// concurrent upload took it.
    async fn append_version(
        &self,
        actor: &Actor,
        document: &Document,
        request: &UploadRequest,
        mime_type: &str,
        file_ref: &str,
    ) -> WorkflowResult<DocumentVersion> {
        let mut budget = RetryBudget::new("document version numbering", self.max_conflict_retries);
        loop {
            let next = self.store.latest_version_number(document.id).await?.unwrap_or(0) + 1;
            let version = DocumentVersion {
                id: Uuid::new_v4(),
                document_id: document.id,
                version_number: next,
                file_ref: file_ref.to_string(),
                original_filename: request.filename.clone(),
                file_size: request.bytes.len() as i64,
                mime_type: mime_type.to_string(),
                uploaded_by: actor.user_id,
                created_at: Utc::now(),
            };

            match self.store.insert_document_version(&version).await {
                Ok(()) => return Ok(version),
                Err(StoreError::UniqueViolation { constraint }) => {
                    budget.absorb(WorkflowError::ConflictRetryable(constraint))?;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn get_or_create_document(&self, slot: &DocumentSlot) -> WorkflowResult<Document> {
        let mut budget = RetryBudget::new("document creation", self.max_conflict_retries);

        loop {
            if let Some(existing) = self.store.find_document(slot).await? {
                return Ok(existing);
            }

            let document = Document {
                id: Uuid::new_v4(),
                dossier_id: slot.dossier_id,
                document_type_id: slot.document_type_id,
                step_instance_id: slot.step_instance_id,
                status: DocumentStatus::Pending,
                current_version_id: None,
                rejection_reason: None,
                reviewed_by: None,
                reviewed_at: None,
                created_at: Utc::now(),
                updated_at: None,
            };

            match self.store.insert_document(&document).await {
                Ok(()) => return Ok(document),
                Err(StoreError::UniqueViolation { constraint }) => {
                    budget.absorb(WorkflowError::ConflictRetryable(constraint))?;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// A document the caller may see.
    pub async fn document(&self, actor: &Actor, id: Uuid) -> WorkflowResult<Document> {
        let document = self
            .store
            .document(id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("Document", id))?;
        self.instances.load_dossier(actor, document.dossier_id).await?;
        Ok(document)
    }

    pub async fn versions(&self, actor: &Actor, id: Uuid) -> WorkflowResult<Vec<DocumentVersion>> {
        let document = self.document(actor, id).await?;
        Ok(self.store.document_versions(document.id).await?)
    }

    /// Bytes of one version of a document.
    pub async fn content(
        &self,
        actor: &Actor,
        document_id: Uuid,
        version_id: Uuid,
    ) -> WorkflowResult<(DocumentVersion, Vec<u8>)> {
        let version = self
            .versions(actor, document_id)
            .await?
            .into_iter()
            .find(|v| v.id == version_id)
            .ok_or_else(|| WorkflowError::not_found("Document version", version_id))?;

        let bytes = self.blobs.get(&version.file_ref).await?;
        Ok((version, bytes))
    }

    pub async fn approve(&self, actor: &Actor, id: Uuid) -> WorkflowResult<Document> {
        actor.require_admin()?;
        self.review(actor, id, DocumentStatus::Approved, None).await
    }

    /// Reject the current version. Versions are kept.
    pub async fn reject(&self, actor: &Actor, id: Uuid, reason: &str) -> WorkflowResult<Document> {
        actor.require_admin()?;
        let reason = validation::reason::validate(reason)?;
        self.review(actor, id, DocumentStatus::Rejected, Some(reason)).await
    }

    /// Mark a document as no longer valid, e.g. an expired identity card.
    /// The next upload puts it back to PENDING.
    pub async fn outdate(&self, actor: &Actor, id: Uuid, reason: &str) -> WorkflowResult<Document> {
        actor.require_admin()?;
        let reason = validation::reason::validate(reason)?;
        self.review(actor, id, DocumentStatus::Outdated, Some(reason)).await
    }

    pub(crate) async fn review(
        &self,
        actor: &Actor,
        id: Uuid,
        status: DocumentStatus,
        reason: Option<String>,
    ) -> WorkflowResult<Document> {
        let stamp = ReviewStamp { reviewer: actor.user_id, at: Utc::now(), reason };
        let document = self
            .store
            .review_document(id, status, &stamp)
            .await?
            .ok_or_else(|| WorkflowError::not_found("Document", id))?;

        info!(document_id = %id, status = %status, reviewer = %actor.user_id, "Reviewed document");
        Ok(document)
    }
}
