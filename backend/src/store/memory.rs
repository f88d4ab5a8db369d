//! In-memory workflow storage for development and testing.
//!
//! Every operation takes the single state lock, so each call is atomic on its
//! own, exactly like one SQL statement. Multi-call sequences interleave the
//! same way they would against PostgreSQL, which is what the concurrency
//! tests rely on. Not suitable for production use: nothing is persisted.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use dossierflow_shared::{
    Document, DocumentStatus, DocumentType, DocumentVersion, Dossier, FieldValue, ProductStep,
    ProductStepDefinition, ReviewStamp, ReviewStatus, Step, StepDocumentRequirement, StepField,
    StepFieldValue, StepInstance, StepInstanceStatus,
};

use super::{DocumentSlot, StepTransition, StoreError, StoreResult, WorkflowStore};

#[derive(Default)]
struct MemoryState {
    steps: HashMap<Uuid, Step>,
    product_steps: Vec<ProductStep>,
    step_fields: Vec<StepField>,
    document_requirements: Vec<StepDocumentRequirement>,
    document_types: HashMap<Uuid, DocumentType>,
    dossiers: HashMap<Uuid, Dossier>,
    step_instances: HashMap<Uuid, StepInstance>,
    field_values: HashMap<Uuid, StepFieldValue>,
    documents: HashMap<Uuid, Document>,
    document_versions: HashMap<Uuid, DocumentVersion>,
}

/// In-memory [`WorkflowStore`].
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // Template and dossier seeding. In production these rows come from the
    // back-office; here they are inserted directly.

    pub async fn insert_step(&self, step: Step) {
        self.state.write().await.steps.insert(step.id, step);
    }

    pub async fn insert_product_step(&self, product_step: ProductStep) {
        self.state.write().await.product_steps.push(product_step);
    }

    pub async fn insert_step_field(&self, field: StepField) {
        self.state.write().await.step_fields.push(field);
    }

    pub async fn insert_document_requirement(&self, requirement: StepDocumentRequirement) {
        self.state.write().await.document_requirements.push(requirement);
    }

    pub async fn insert_document_type(&self, document_type: DocumentType) {
        self.state
            .write()
            .await
            .document_types
            .insert(document_type.id, document_type);
    }

    pub async fn insert_dossier(&self, dossier: Dossier) {
        self.state.write().await.dossiers.insert(dossier.id, dossier);
    }

    /// Number of step instances for a `(dossier, step)` pair.
    pub async fn count_step_instances(&self, dossier_id: Uuid, step_id: Uuid) -> usize {
        self.state
            .read()
            .await
            .step_instances
            .values()
            .filter(|i| i.dossier_id == dossier_id && i.step_id == step_id)
            .count()
    }

    /// Number of documents in a slot.
    pub async fn count_documents(&self, slot: &DocumentSlot) -> usize {
        self.state
            .read()
            .await
            .documents
            .values()
            .filter(|d| slot_of(d) == *slot)
            .count()
    }
}

fn slot_of(document: &Document) -> DocumentSlot {
    DocumentSlot {
        dossier_id: document.dossier_id,
        document_type_id: document.document_type_id,
        step_instance_id: document.step_instance_id,
    }
}

fn unique_violation(constraint: &str) -> StoreError {
    StoreError::UniqueViolation { constraint: constraint.to_string() }
}

#[async_trait]
impl WorkflowStore for MemoryStore {
    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn product_steps(&self, product_id: Uuid) -> StoreResult<Vec<ProductStepDefinition>> {
        let state = self.state.read().await;
        let mut steps: Vec<ProductStepDefinition> = state
            .product_steps
            .iter()
            .filter(|ps| ps.product_id == product_id)
            .filter_map(|ps| {
                state.steps.get(&ps.step_id).map(|step| ProductStepDefinition {
                    product_id: ps.product_id,
                    step: step.clone(),
                    position: ps.position,
                    is_required: ps.is_required,
                    dossier_status_on_approval: ps.dossier_status_on_approval.clone(),
                })
            })
            .collect();
        steps.sort_by_key(|s| s.position);
        Ok(steps)
    }

    async fn step_fields(&self, step_id: Uuid) -> StoreResult<Vec<StepField>> {
        let state = self.state.read().await;
        let mut fields: Vec<StepField> = state
            .step_fields
            .iter()
            .filter(|f| f.step_id == step_id)
            .cloned()
            .collect();
        fields.sort_by_key(|f| f.position);
        Ok(fields)
    }

    async fn step_document_requirements(
        &self,
        step_id: Uuid,
    ) -> StoreResult<Vec<StepDocumentRequirement>> {
        let state = self.state.read().await;
        Ok(state
            .document_requirements
            .iter()
            .filter(|r| r.step_id == step_id)
            .cloned()
            .collect())
    }

    async fn document_type(&self, id: Uuid) -> StoreResult<Option<DocumentType>> {
        Ok(self.state.read().await.document_types.get(&id).cloned())
    }

    async fn dossier(&self, id: Uuid) -> StoreResult<Option<Dossier>> {
        Ok(self.state.read().await.dossiers.get(&id).cloned())
    }

    async fn set_current_step_instance(
        &self,
        dossier_id: Uuid,
        step_instance_id: Uuid,
    ) -> StoreResult<()> {
        let mut state = self.state.write().await;
        if let Some(dossier) = state.dossiers.get_mut(&dossier_id) {
            dossier.current_step_instance_id = Some(step_instance_id);
            dossier.updated_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn set_dossier_status(&self, dossier_id: Uuid, status: &str) -> StoreResult<()> {
        let mut state = self.state.write().await;
        if let Some(dossier) = state.dossiers.get_mut(&dossier_id) {
            dossier.status = status.to_string();
            dossier.updated_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn claim_client_steps_signal(
        &self,
        dossier_id: Uuid,
        at: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        match state.dossiers.get_mut(&dossier_id) {
            Some(dossier)
                if dossier.client_steps_signaled_at.is_none()
                    && dossier
                        .client_steps_signal_claimed_at
                        .is_none_or(|claimed| claimed < stale_before) =>
            {
                dossier.client_steps_signal_claimed_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_client_steps_signaled(
        &self,
        dossier_id: Uuid,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut state = self.state.write().await;
        if let Some(dossier) = state.dossiers.get_mut(&dossier_id) {
            dossier.client_steps_signaled_at = Some(at);
        }
        Ok(())
    }

    async fn release_client_steps_signal(&self, dossier_id: Uuid) -> StoreResult<()> {
        let mut state = self.state.write().await;
        if let Some(dossier) = state.dossiers.get_mut(&dossier_id) {
            dossier.client_steps_signal_claimed_at = None;
        }
        Ok(())
    }

    async fn step_instance(&self, id: Uuid) -> StoreResult<Option<StepInstance>> {
        Ok(self.state.read().await.step_instances.get(&id).cloned())
    }

    async fn find_step_instance(
        &self,
        dossier_id: Uuid,
        step_id: Uuid,
    ) -> StoreResult<Option<StepInstance>> {
        let state = self.state.read().await;
        Ok(state
            .step_instances
            .values()
            .find(|i| i.dossier_id == dossier_id && i.step_id == step_id)
            .cloned())
    }

    async fn insert_step_instance(&self, instance: &StepInstance) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let taken = state
            .step_instances
            .values()
            .any(|i| i.dossier_id == instance.dossier_id && i.step_id == instance.step_id);
        if taken {
            return Err(unique_violation("step_instances_dossier_step_key"));
        }
        state.step_instances.insert(instance.id, instance.clone());
        Ok(())
    }

    async fn step_instances_for_dossier(&self, dossier_id: Uuid) -> StoreResult<Vec<StepInstance>> {
        let state = self.state.read().await;
        let mut instances: Vec<StepInstance> = state
            .step_instances
            .values()
            .filter(|i| i.dossier_id == dossier_id)
            .cloned()
            .collect();
        instances.sort_by_key(|i| i.started_at);
        Ok(instances)
    }

    async fn transition_step_instance(
        &self,
        id: Uuid,
        expected: StepInstanceStatus,
        transition: &StepTransition,
    ) -> StoreResult<Option<StepInstance>> {
        let mut state = self.state.write().await;
        match state.step_instances.get_mut(&id) {
            Some(instance) if instance.validation_status == expected => {
                instance.validation_status = transition.to;
                instance.completed_at = transition.completed_at;
                instance.rejection_reason = transition.rejection_reason.clone();
                instance.validated_by = transition.validated_by;
                instance.validated_at = transition.validated_at;
                Ok(Some(instance.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn field_values(&self, step_instance_id: Uuid) -> StoreResult<Vec<StepFieldValue>> {
        let state = self.state.read().await;
        let position = |field_id: Uuid| {
            state
                .step_fields
                .iter()
                .find(|f| f.id == field_id)
                .map(|f| f.position)
        };
        let mut values: Vec<StepFieldValue> = state
            .field_values
            .values()
            .filter(|v| v.step_instance_id == step_instance_id)
            .cloned()
            .collect();
        values.sort_by_key(|v| position(v.step_field_id));
        Ok(values)
    }

    async fn field_value(&self, id: Uuid) -> StoreResult<Option<StepFieldValue>> {
        Ok(self.state.read().await.field_values.get(&id).cloned())
    }

    async fn upsert_field_value(
        &self,
        step_instance_id: Uuid,
        step_field_id: Uuid,
        value: &FieldValue,
        at: DateTime<Utc>,
    ) -> StoreResult<StepFieldValue> {
        let mut state = self.state.write().await;
        let existing = state
            .field_values
            .values_mut()
            .find(|v| v.step_instance_id == step_instance_id && v.step_field_id == step_field_id);

        if let Some(current) = existing {
            current.value = value.clone();
            current.validation_status = ReviewStatus::Pending;
            current.rejection_reason = None;
            current.reviewed_by = None;
            current.reviewed_at = None;
            current.updated_at = at;
            return Ok(current.clone());
        }

        let created = StepFieldValue {
            id: Uuid::new_v4(),
            step_instance_id,
            step_field_id,
            value: value.clone(),
            validation_status: ReviewStatus::Pending,
            rejection_reason: None,
            reviewed_by: None,
            reviewed_at: None,
            updated_at: at,
        };
        state.field_values.insert(created.id, created.clone());
        Ok(created)
    }

    async fn resubmit_field_value(
        &self,
        id: Uuid,
        value: &FieldValue,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<StepFieldValue>> {
        let mut state = self.state.write().await;
        match state.field_values.get_mut(&id) {
            Some(current) if current.validation_status == ReviewStatus::Rejected => {
                current.value = value.clone();
                current.validation_status = ReviewStatus::Pending;
                current.rejection_reason = None;
                current.reviewed_by = None;
                current.reviewed_at = None;
                current.updated_at = at;
                Ok(Some(current.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn review_field_value(
        &self,
        id: Uuid,
        status: ReviewStatus,
        stamp: &ReviewStamp,
    ) -> StoreResult<Option<StepFieldValue>> {
        let mut state = self.state.write().await;
        Ok(state.field_values.get_mut(&id).map(|current| {
            current.validation_status = status;
            current.rejection_reason = stamp.reason.clone();
            current.reviewed_by = Some(stamp.reviewer);
            current.reviewed_at = Some(stamp.at);
            current.clone()
        }))
    }

    async fn document(&self, id: Uuid) -> StoreResult<Option<Document>> {
        Ok(self.state.read().await.documents.get(&id).cloned())
    }

    async fn find_document(&self, slot: &DocumentSlot) -> StoreResult<Option<Document>> {
        let state = self.state.read().await;
        Ok(state.documents.values().find(|d| slot_of(d) == *slot).cloned())
    }

    async fn insert_document(&self, document: &Document) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let slot = slot_of(document);
        if state.documents.values().any(|d| slot_of(d) == slot) {
            return Err(unique_violation("documents_slot_key"));
        }
        state.documents.insert(document.id, document.clone());
        Ok(())
    }

    async fn documents_for_step_instance(
        &self,
        step_instance_id: Uuid,
    ) -> StoreResult<Vec<Document>> {
        let state = self.state.read().await;
        Ok(state
            .documents
            .values()
            .filter(|d| d.step_instance_id == Some(step_instance_id))
            .cloned()
            .collect())
    }

    async fn dossier_level_documents(&self, dossier_id: Uuid) -> StoreResult<Vec<Document>> {
        let state = self.state.read().await;
        Ok(state
            .documents
            .values()
            .filter(|d| d.dossier_id == dossier_id && d.step_instance_id.is_none())
            .cloned()
            .collect())
    }

    async fn latest_version_number(&self, document_id: Uuid) -> StoreResult<Option<i32>> {
        let state = self.state.read().await;
        Ok(state
            .document_versions
            .values()
            .filter(|v| v.document_id == document_id)
            .map(|v| v.version_number)
            .max())
    }

    async fn insert_document_version(&self, version: &DocumentVersion) -> StoreResult<()> {
        let mut state = self.state.write().await;
        let taken = state.document_versions.values().any(|v| {
            v.document_id == version.document_id && v.version_number == version.version_number
        });
        if taken {
            return Err(unique_violation("document_versions_document_number_key"));
        }
        state.document_versions.insert(version.id, version.clone());
        Ok(())
    }

    async fn advance_current_version(
        &self,
        document_id: Uuid,
        version: &DocumentVersion,
    ) -> StoreResult<Document> {
        let mut state = self.state.write().await;
        let current_number = state
            .documents
            .get(&document_id)
            .and_then(|d| d.current_version_id)
            .and_then(|vid| state.document_versions.get(&vid))
            .map(|v| v.version_number);

        let document = state
            .documents
            .get_mut(&document_id)
            .ok_or_else(|| StoreError::Backend(format!("document {} vanished", document_id)))?;

        if current_number.is_none_or(|n| n < version.version_number) {
            document.current_version_id = Some(version.id);
        }
        document.status = DocumentStatus::Pending;
        document.rejection_reason = None;
        document.reviewed_by = None;
        document.reviewed_at = None;
        document.updated_at = Some(version.created_at);
        Ok(document.clone())
    }

    async fn document_versions(&self, document_id: Uuid) -> StoreResult<Vec<DocumentVersion>> {
        let state = self.state.read().await;
        let mut versions: Vec<DocumentVersion> = state
            .document_versions
            .values()
            .filter(|v| v.document_id == document_id)
            .cloned()
            .collect();
        versions.sort_by_key(|v| v.version_number);
        Ok(versions)
    }

    async fn review_document(
        &self,
        id: Uuid,
        status: DocumentStatus,
        stamp: &ReviewStamp,
    ) -> StoreResult<Option<Document>> {
        let mut state = self.state.write().await;
        Ok(state.documents.get_mut(&id).map(|document| {
            document.status = status;
            document.rejection_reason = stamp.reason.clone();
            document.reviewed_by = Some(stamp.reviewer);
            document.reviewed_at = Some(stamp.at);
            document.updated_at = Some(stamp.at);
            document.clone()
        }))
    }
}
