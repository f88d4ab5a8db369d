use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use dossierflow_shared::{DocumentType, ProductStepDefinition, StepDocumentRequirement, StepField};

use super::error::{WorkflowError, WorkflowResult};
use crate::store::WorkflowStore;

/// One step of a product with its field and document templates.
#[derive(Debug, Clone, Serialize)]
pub struct StepTemplate {
    #[serde(flatten)]
    pub definition: ProductStepDefinition,
    pub fields: Vec<StepField>,
    pub documents: Vec<StepDocumentRequirement>,
}

impl StepTemplate {
    pub fn step_id(&self) -> Uuid {
        self.definition.step.id
    }

    pub fn field_by_key(&self, key: &str) -> Option<&StepField> {
        self.fields.iter().find(|f| f.field_key == key)
    }

    pub fn field(&self, id: Uuid) -> Option<&StepField> {
        self.fields.iter().find(|f| f.id == id)
    }

    pub fn required_fields(&self) -> impl Iterator<Item = &StepField> {
        self.fields.iter().filter(|f| f.is_required)
    }

    pub fn required_documents(&self) -> impl Iterator<Item = &StepDocumentRequirement> {
        self.documents.iter().filter(|d| d.is_required)
    }
}

/// The ordered steps of a product, as shown to a client filling in a dossier.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowTemplate {
    pub product_id: Uuid,
    pub steps: Vec<StepTemplate>,
}

/// Read-only access to product templates.
#[derive(Clone)]
pub struct TemplateResolver {
    store: Arc<dyn WorkflowStore>,
}

impl TemplateResolver {
    pub fn new(store: Arc<dyn WorkflowStore>) -> Self {
        Self { store }
    }

    pub async fn workflow_template(&self, product_id: Uuid) -> WorkflowResult<WorkflowTemplate> {
        let definitions = self.store.product_steps(product_id).await?;

        let mut steps = Vec::with_capacity(definitions.len());
        for definition in definitions {
            steps.push(self.expand(definition).await?);
        }

        Ok(WorkflowTemplate { product_id, steps })
    }

    /// One step of the product. `NotFound` if the product does not use it.
    pub async fn step_template(
        &self,
        product_id: Uuid,
        step_id: Uuid,
    ) -> WorkflowResult<StepTemplate> {
        let definition = self
            .store
            .product_steps(product_id)
            .await?
            .into_iter()
            .find(|d| d.step.id == step_id)
            .ok_or_else(|| WorkflowError::not_found("Step", step_id))?;

        self.expand(definition).await
    }

    pub async fn document_type(&self, id: Uuid) -> WorkflowResult<DocumentType> {
        self.store
            .document_type(id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("Document type", id))
    }

    async fn expand(&self, definition: ProductStepDefinition) -> WorkflowResult<StepTemplate> {
        let step_id = definition.step.id;
        let fields = self.store.step_fields(step_id).await?;
        let documents = self.store.step_document_requirements(step_id).await?;
        Ok(StepTemplate { definition, fields, documents })
    }
}
