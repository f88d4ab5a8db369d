use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use dossierflow_shared::{
    Document, Dossier, ProductStepDefinition, StepFieldValue, StepInstance, StepInstanceStatus,
};

use super::error::{WorkflowError, WorkflowResult};
use super::retry::RetryBudget;
use super::Actor;
use crate::store::{StoreError, WorkflowStore};

/// A stored field value together with the template key it answers.
#[derive(Debug, Clone, Serialize)]
pub struct KeyedFieldValue {
    pub field_key: String,
    #[serde(flatten)]
    pub value: StepFieldValue,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepInstanceDetail {
    pub instance: StepInstance,
    pub fields: Vec<KeyedFieldValue>,
    pub documents: Vec<Document>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepProgress {
    #[serde(flatten)]
    pub definition: ProductStepDefinition,
    pub instance: Option<StepInstance>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DossierProgress {
    pub dossier_id: Uuid,
    pub status: String,
    pub current_step_instance_id: Option<Uuid>,
    /// First required step, by position, whose instance is not approved.
    pub next_step_id: Option<Uuid>,
    pub steps: Vec<StepProgress>,
}

/// First required step (steps are ordered by position) without an APPROVED
/// instance.
pub fn next_required_step(
    steps: &[ProductStepDefinition],
    instances: &[StepInstance],
) -> Option<Uuid> {
    steps
        .iter()
        .filter(|s| s.is_required)
        .find(|s| {
            !instances.iter().any(|i| {
                i.step_id == s.step.id && i.validation_status == StepInstanceStatus::Approved
            })
        })
        .map(|s| s.step.id)
}

/// Owns the one-per-(dossier, step) instance and its lifecycle.
#[derive(Clone)]
pub struct StepInstanceManager {
    store: Arc<dyn WorkflowStore>,
    max_conflict_retries: u32,
}

impl StepInstanceManager {
    pub fn new(store: Arc<dyn WorkflowStore>, max_conflict_retries: u32) -> Self {
        Self { store, max_conflict_retries }
    }

    /// Load a dossier the caller may act on. Clients only see their own.
    pub async fn load_dossier(&self, actor: &Actor, dossier_id: Uuid) -> WorkflowResult<Dossier> {
        let dossier = self
            .store
            .dossier(dossier_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("Dossier", dossier_id))?;

        if !actor.is_admin() && dossier.owner_id != actor.user_id {
            return Err(WorkflowError::Forbidden(format!(
                "dossier {} belongs to another user",
                dossier_id
            )));
        }

        Ok(dossier)
    }

    /// Existing instance for `(dossier_id, step_id)` or a new DRAFT one.
    ///
    /// Concurrent callers converge on the same row: the loser of the insert
    /// race hits the uniqueness constraint and re-reads.
    pub async fn get_or_create(&self, dossier_id: Uuid, step_id: Uuid) -> WorkflowResult<StepInstance> {
        let mut budget = RetryBudget::new("step instance creation", self.max_conflict_retries);

        loop {
            if let Some(existing) = self.store.find_step_instance(dossier_id, step_id).await? {
                return Ok(existing);
            }

            let instance = StepInstance::draft(dossier_id, step_id, Utc::now());
            match self.store.insert_step_instance(&instance).await {
                Ok(()) => {
                    info!(
                        dossier_id = %dossier_id,
                        step_id = %step_id,
                        instance_id = %instance.id,
                        "Created step instance"
                    );
                    return Ok(instance);
                }
                Err(StoreError::UniqueViolation { constraint }) => {
                    budget.absorb(WorkflowError::ConflictRetryable(constraint))?;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// The instance the dossier pointer designates, if any.
    pub async fn current(&self, actor: &Actor, dossier_id: Uuid) -> WorkflowResult<Option<StepInstance>> {
        let dossier = self.load_dossier(actor, dossier_id).await?;
        match dossier.current_step_instance_id {
            Some(id) => Ok(self.store.step_instance(id).await?),
            None => Ok(None),
        }
    }

    pub async fn load_instance(&self, id: Uuid) -> WorkflowResult<StepInstance> {
        self.store
            .step_instance(id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("Step instance", id))
    }

    /// Load an instance and its dossier, checking the caller may act on it.
    pub async fn load_instance_for(
        &self,
        actor: &Actor,
        id: Uuid,
    ) -> WorkflowResult<(StepInstance, Dossier)> {
        let instance = self.load_instance(id).await?;
        let dossier = self.load_dossier(actor, instance.dossier_id).await?;
        Ok((instance, dossier))
    }

    pub async fn detail(&self, actor: &Actor, id: Uuid) -> WorkflowResult<StepInstanceDetail> {
        let (instance, _) = self.load_instance_for(actor, id).await?;

        let keys: HashMap<Uuid, String> = self
            .store
            .step_fields(instance.step_id)
            .await?
            .into_iter()
            .map(|f| (f.id, f.field_key))
            .collect();

        let fields = self
            .store
            .field_values(instance.id)
            .await?
            .into_iter()
            .map(|value| KeyedFieldValue {
                field_key: keys.get(&value.step_field_id).cloned().unwrap_or_default(),
                value,
            })
            .collect();

        let documents = self.store.documents_for_step_instance(instance.id).await?;

        Ok(StepInstanceDetail { instance, fields, documents })
    }

    pub async fn progress(&self, actor: &Actor, dossier_id: Uuid) -> WorkflowResult<DossierProgress> {
        let dossier = self.load_dossier(actor, dossier_id).await?;
        let definitions = self.store.product_steps(dossier.product_id).await?;
        let instances = self.store.step_instances_for_dossier(dossier.id).await?;

        let next_step_id = next_required_step(&definitions, &instances);
        let steps = definitions
            .into_iter()
            .map(|definition| {
                let instance = instances
                    .iter()
                    .find(|i| i.step_id == definition.step.id)
                    .cloned();
                StepProgress { definition, instance }
            })
            .collect();

        Ok(DossierProgress {
            dossier_id: dossier.id,
            status: dossier.status,
            current_step_instance_id: dossier.current_step_instance_id,
            next_step_id,
            steps,
        })
    }

    /// Next step after an approval, read fresh from the store.
    pub async fn next_step_id(&self, dossier: &Dossier) -> WorkflowResult<Option<Uuid>> {
        let definitions = self.store.product_steps(dossier.product_id).await?;
        let instances = self.store.step_instances_for_dossier(dossier.id).await?;
        Ok(next_required_step(&definitions, &instances))
    }
}
