//! Admin-side review of step instances.
//!
//! Approval runs in one of two [`ApprovalMode`]s. Strict approval re-reads
//! the current field and document statuses and refuses while a required item
//! is not APPROVED. Bulk approval approves outstanding items one by one and
//! reports each outcome; if any item fails the instance stays where it is and
//! the admin can retry, already approved items being skipped.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use dossierflow_shared::{
    DocumentStatus, Dossier, ReviewStatus, StepInstance, StepInstanceStatus,
};

use super::documents::DocumentVersioning;
use super::error::{WorkflowError, WorkflowResult};
use super::fields::FieldValidation;
use super::instances::StepInstanceManager;
use super::templates::{StepTemplate, TemplateResolver};
use super::{Actor, ApprovalMode};
use crate::store::{StepTransition, WorkflowStore};
use crate::validation;

/// Compare-and-set attempts when an instance moves between reads, e.g.
/// SUBMITTED to UNDER_REVIEW while an approval is in flight.
const MAX_TRANSITION_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Field,
    Document,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ItemResult {
    Approved,
    AlreadyApproved,
    Failed { message: String },
}

/// What bulk approval did with one field value or document.
#[derive(Debug, Clone, Serialize)]
pub struct ItemOutcome {
    pub kind: ItemKind,
    pub id: Uuid,
    pub label: String,
    #[serde(flatten)]
    pub result: ItemResult,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepApproval {
    pub instance: StepInstance,
    pub mode: ApprovalMode,
    /// False when bulk approval left an item unapproved.
    pub approved: bool,
    pub items: Vec<ItemOutcome>,
    pub dossier_status: String,
    pub next_step_id: Option<Uuid>,
}

impl StepApproval {
    pub fn failed_items(&self) -> impl Iterator<Item = &ItemOutcome> {
        self.items
            .iter()
            .filter(|i| matches!(i.result, ItemResult::Failed { .. }))
    }
}

#[derive(Clone)]
pub struct ApprovalAggregator {
    store: Arc<dyn WorkflowStore>,
    templates: TemplateResolver,
    instances: StepInstanceManager,
    fields: FieldValidation,
    documents: DocumentVersioning,
    mode: ApprovalMode,
}

impl ApprovalAggregator {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        templates: TemplateResolver,
        instances: StepInstanceManager,
        fields: FieldValidation,
        documents: DocumentVersioning,
        mode: ApprovalMode,
    ) -> Self {
        Self { store, templates, instances, fields, documents, mode }
    }

    /// SUBMITTED to UNDER_REVIEW. A no-op when already under review.
    pub async fn start_review(&self, actor: &Actor, id: Uuid) -> WorkflowResult<StepInstance> {
        actor.require_admin()?;
        let mut instance = self.instances.load_instance(id).await?;

        for _ in 0..MAX_TRANSITION_ATTEMPTS {
            match instance.validation_status {
                StepInstanceStatus::UnderReview => return Ok(instance),
                StepInstanceStatus::Submitted => {
                    let transition = StepTransition {
                        to: StepInstanceStatus::UnderReview,
                        completed_at: instance.completed_at,
                        rejection_reason: None,
                        validated_by: None,
                        validated_at: None,
                    };
                    if let Some(updated) = self
                        .store
                        .transition_step_instance(id, StepInstanceStatus::Submitted, &transition)
                        .await?
                    {
                        info!(instance_id = %id, reviewer = %actor.user_id, "Started review");
                        return Ok(updated);
                    }
                    instance = self.instances.load_instance(id).await?;
                }
                other => return Err(WorkflowError::illegal(other, "start review")),
            }
        }

        Err(WorkflowError::illegal(instance.validation_status, "start review"))
    }

    /// Approve a step instance under the configured [`ApprovalMode`].
    ///
    /// Repeating the call on an APPROVED instance succeeds without changes.
    pub async fn approve_step_instance(&self, actor: &Actor, id: Uuid) -> WorkflowResult<StepApproval> {
        actor.require_admin()?;
        let (instance, dossier) = self.instances.load_instance_for(actor, id).await?;

        if instance.validation_status == StepInstanceStatus::Approved {
            // A previous attempt may have stopped between the instance write
            // and the dossier status write.
            let template = self
                .templates
                .step_template(dossier.product_id, instance.step_id)
                .await?;
            let dossier_status = self.cascade_dossier_status(&dossier, &template, true).await?;
            let next_step_id = self.instances.next_step_id(&dossier).await?;
            return Ok(StepApproval {
                instance,
                mode: self.mode,
                approved: true,
                items: Vec::new(),
                dossier_status,
                next_step_id,
            });
        }
        if !instance.validation_status.is_reviewable() {
            return Err(WorkflowError::illegal(instance.validation_status, "approve"));
        }

        let template = self
            .templates
            .step_template(dossier.product_id, instance.step_id)
            .await?;

        let items = match self.mode {
            ApprovalMode::Strict => {
                let missing = self.strict_missing(&instance, &dossier, &template).await?;
                if !missing.is_empty() {
                    return Err(WorkflowError::IncompleteValidation { missing });
                }
                Vec::new()
            }
            ApprovalMode::Bulk => {
                let items = self.bulk_approve_items(actor, &instance, &template).await?;
                if items.iter().any(|i| matches!(i.result, ItemResult::Failed { .. })) {
                    info!(
                        instance_id = %id,
                        failed = items.iter().filter(|i| matches!(i.result, ItemResult::Failed { .. })).count(),
                        "Bulk approval incomplete"
                    );
                    let next_step_id = self.instances.next_step_id(&dossier).await?;
                    return Ok(StepApproval {
                        instance,
                        mode: self.mode,
                        approved: false,
                        items,
                        dossier_status: dossier.status,
                        next_step_id,
                    });
                }
                items
            }
        };

        let now = Utc::now();
        let transition = StepTransition {
            to: StepInstanceStatus::Approved,
            completed_at: instance.completed_at.or(Some(now)),
            rejection_reason: None,
            validated_by: Some(actor.user_id),
            validated_at: Some(now),
        };
        let instance = self.settle(instance, &transition, "approve").await?;

        let dossier_status = self.cascade_dossier_status(&dossier, &template, false).await?;

        let next_step_id = self.instances.next_step_id(&dossier).await?;
        info!(
            instance_id = %instance.id,
            mode = ?self.mode,
            reviewer = %actor.user_id,
            "Approved step instance"
        );

        Ok(StepApproval {
            instance,
            mode: self.mode,
            approved: true,
            items,
            dossier_status,
            next_step_id,
        })
    }

    /// Send a step instance back to the client. Field and document statuses
    /// are left as they are.
    pub async fn reject_step_instance(
        &self,
        actor: &Actor,
        id: Uuid,
        reason: &str,
    ) -> WorkflowResult<StepInstance> {
        actor.require_admin()?;
        let reason = validation::reason::validate(reason)?;
        let (instance, _) = self.instances.load_instance_for(actor, id).await?;

        if instance.validation_status == StepInstanceStatus::Rejected {
            return Ok(instance);
        }
        if !instance.validation_status.is_reviewable() {
            return Err(WorkflowError::illegal(instance.validation_status, "reject"));
        }

        let transition = StepTransition {
            to: StepInstanceStatus::Rejected,
            completed_at: instance.completed_at,
            rejection_reason: Some(reason),
            validated_by: Some(actor.user_id),
            validated_at: Some(Utc::now()),
        };
        let instance = self.settle(instance, &transition, "reject").await?;

        info!(instance_id = %instance.id, reviewer = %actor.user_id, "Rejected step instance");
        Ok(instance)
    }

    /// Apply the step's `dossier_status_on_approval`. The write is a plain
    /// set, so repeating it is harmless. On a repeated approval it is skipped
    /// once a later step has been approved, which would own a newer status.
    async fn cascade_dossier_status(
        &self,
        dossier: &Dossier,
        template: &StepTemplate,
        repeated: bool,
    ) -> WorkflowResult<String> {
        let Some(status) = &template.definition.dossier_status_on_approval else {
            return Ok(dossier.status.clone());
        };
        if *status == dossier.status {
            return Ok(dossier.status.clone());
        }
        if repeated && self.later_step_approved(dossier, template).await? {
            return Ok(dossier.status.clone());
        }

        self.store.set_dossier_status(dossier.id, status).await?;
        info!(dossier_id = %dossier.id, status = %status, "Dossier status advanced");
        Ok(status.clone())
    }

    async fn later_step_approved(
        &self,
        dossier: &Dossier,
        template: &StepTemplate,
    ) -> WorkflowResult<bool> {
        let position = template.definition.position;
        let later: Vec<Uuid> = self
            .store
            .product_steps(dossier.product_id)
            .await?
            .into_iter()
            .filter(|s| s.position > position)
            .map(|s| s.step.id)
            .collect();
        let instances = self.store.step_instances_for_dossier(dossier.id).await?;
        Ok(instances.iter().any(|i| {
            later.contains(&i.step_id) && i.validation_status == StepInstanceStatus::Approved
        }))
    }

    /// Move a reviewable instance to `transition.to`, following it through
    /// concurrent SUBMITTED to UNDER_REVIEW moves.
    async fn settle(
        &self,
        mut instance: StepInstance,
        transition: &StepTransition,
        action: &'static str,
    ) -> WorkflowResult<StepInstance> {
        for _ in 0..MAX_TRANSITION_ATTEMPTS {
            if instance.validation_status == transition.to {
                return Ok(instance);
            }
            if !instance.validation_status.is_reviewable() {
                return Err(WorkflowError::illegal(instance.validation_status, action));
            }

            if let Some(updated) = self
                .store
                .transition_step_instance(instance.id, instance.validation_status, transition)
                .await?
            {
                return Ok(updated);
            }
            instance = self.instances.load_instance(instance.id).await?;
        }

        Err(WorkflowError::illegal(instance.validation_status, action))
    }

    /// Required items that are not APPROVED, as `field:<key>` and
    /// `document:<code>`.
    async fn strict_missing(
        &self,
        instance: &StepInstance,
        dossier: &Dossier,
        template: &StepTemplate,
    ) -> WorkflowResult<Vec<String>> {
        let mut missing = Vec::new();

        let values = self.store.field_values(instance.id).await?;
        for field in template.required_fields() {
            let approved = values.iter().any(|v| {
                v.step_field_id == field.id && v.validation_status == ReviewStatus::Approved
            });
            if !approved {
                missing.push(format!("field:{}", field.field_key));
            }
        }

        let mut documents = self.store.documents_for_step_instance(instance.id).await?;
        documents.extend(self.store.dossier_level_documents(dossier.id).await?);
        for requirement in template.required_documents() {
            let approved = documents.iter().any(|d| {
                d.document_type_id == requirement.document_type_id
                    && d.status == DocumentStatus::Approved
            });
            if !approved {
                let document_type = self.templates.document_type(requirement.document_type_id).await?;
                missing.push(format!("document:{}", document_type.code));
            }
        }

        Ok(missing)
    }

    async fn bulk_approve_items(
        &self,
        actor: &Actor,
        instance: &StepInstance,
        template: &StepTemplate,
    ) -> WorkflowResult<Vec<ItemOutcome>> {
        let mut items = Vec::new();

        for value in self.store.field_values(instance.id).await? {
            let label = template
                .field(value.step_field_id)
                .map(|f| f.field_key.clone())
                .unwrap_or_else(|| value.step_field_id.to_string());

            let result = if value.validation_status == ReviewStatus::Approved {
                ItemResult::AlreadyApproved
            } else {
                match self.fields.review(actor, value.id, ReviewStatus::Approved, None).await {
                    Ok(_) => ItemResult::Approved,
                    Err(e) => ItemResult::Failed { message: e.to_string() },
                }
            };
            items.push(ItemOutcome { kind: ItemKind::Field, id: value.id, label, result });
        }

        for document in self.store.documents_for_step_instance(instance.id).await? {
            let label = match self.templates.document_type(document.document_type_id).await {
                Ok(document_type) => document_type.code,
                Err(_) => document.document_type_id.to_string(),
            };

            let result = if document.status == DocumentStatus::Approved {
                ItemResult::AlreadyApproved
            } else {
                match self
                    .documents
                    .review(actor, document.id, DocumentStatus::Approved, None)
                    .await
                {
                    Ok(_) => ItemResult::Approved,
                    Err(e) => ItemResult::Failed { message: e.to_string() },
                }
            };
            items.push(ItemOutcome { kind: ItemKind::Document, id: document.id, label, result });
        }

        Ok(items)
    }
}
