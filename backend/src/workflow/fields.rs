use chrono::Utc;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use dossierflow_shared::{FieldValue, ReviewStamp, ReviewStatus, StepFieldValue, StepInstance};

use super::error::{WorkflowError, WorkflowResult};
use super::instances::StepInstanceManager;
use super::templates::StepTemplate;
use super::Actor;
use crate::store::WorkflowStore;
use crate::validation;

/// Outcome of writing a batch of field values.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FieldWriteReport {
    pub values: Vec<StepFieldValue>,
    /// Keys that match no template field of the step.
    pub ignored_keys: Vec<String>,
    /// Keys left untouched because the stored value was not REJECTED.
    pub skipped_keys: Vec<String>,
}

/// A payload entry resolved against the step template.
#[derive(Debug, Clone)]
struct ResolvedValue {
    field_id: Uuid,
    key: String,
    value: FieldValue,
}

/// Map payload keys onto template field ids. Unknown keys are reported back
/// and `null` entries carry no value.
fn resolve_payload(
    template: &StepTemplate,
    payload: HashMap<String, JsonValue>,
) -> (Vec<ResolvedValue>, Vec<String>) {
    let mut resolved = Vec::new();
    let mut ignored = Vec::new();

    // BTreeMap keeps writes in a stable order.
    for (key, raw) in payload.into_iter().collect::<BTreeMap<_, _>>() {
        let Some(field) = template.field_by_key(&key) else {
            warn!(step_id = %template.step_id(), field_key = %key, "Ignoring unknown field key");
            ignored.push(key);
            continue;
        };
        if let Some(value) = FieldValue::from_json(raw) {
            resolved.push(ResolvedValue { field_id: field.id, key, value });
        }
    }

    (resolved, ignored)
}

/// Per-field values and their individual review state.
#[derive(Clone)]
pub struct FieldValidation {
    store: Arc<dyn WorkflowStore>,
    instances: StepInstanceManager,
}

impl FieldValidation {
    pub fn new(store: Arc<dyn WorkflowStore>, instances: StepInstanceManager) -> Self {
        Self { store, instances }
    }

    /// Insert or overwrite values, resetting each to PENDING.
    pub async fn upsert_values(
        &self,
        instance: &StepInstance,
        template: &StepTemplate,
        payload: HashMap<String, JsonValue>,
    ) -> WorkflowResult<FieldWriteReport> {
        let (resolved, ignored_keys) = resolve_payload(template, payload);
        let now = Utc::now();

        let mut values = Vec::with_capacity(resolved.len());
        for entry in resolved {
            let stored = self
                .store
                .upsert_field_value(instance.id, entry.field_id, &entry.value, now)
                .await?;
            values.push(stored);
        }

        Ok(FieldWriteReport { values, ignored_keys, skipped_keys: Vec::new() })
    }

    /// Overwrite only values currently REJECTED; everything else is skipped.
    pub async fn resubmit_rejected(
        &self,
        instance: &StepInstance,
        template: &StepTemplate,
        payload: HashMap<String, JsonValue>,
    ) -> WorkflowResult<FieldWriteReport> {
        let (resolved, ignored_keys) = resolve_payload(template, payload);
        let stored: HashMap<Uuid, StepFieldValue> = self
            .store
            .field_values(instance.id)
            .await?
            .into_iter()
            .map(|v| (v.step_field_id, v))
            .collect();
        let now = Utc::now();

        let mut report = FieldWriteReport { ignored_keys, ..Default::default() };
        for entry in resolved {
            let rejected = stored
                .get(&entry.field_id)
                .filter(|v| v.validation_status == ReviewStatus::Rejected);
            let Some(current) = rejected else {
                report.skipped_keys.push(entry.key);
                continue;
            };

            match self.store.resubmit_field_value(current.id, &entry.value, now).await? {
                Some(updated) => report.values.push(updated),
                None => report.skipped_keys.push(entry.key),
            }
        }

        Ok(report)
    }

    /// Keys of required template fields that would be left without a usable
    /// value once `payload` is written. A non-null payload entry replaces the
    /// stored value; a null or absent one leaves it in place.
    pub async fn missing_required(
        &self,
        instance_id: Uuid,
        template: &StepTemplate,
        payload: &HashMap<String, JsonValue>,
    ) -> WorkflowResult<Vec<String>> {
        let stored = self.store.field_values(instance_id).await?;
        Ok(template
            .required_fields()
            .filter(|field| {
                let incoming = payload
                    .get(&field.field_key)
                    .cloned()
                    .and_then(FieldValue::from_json);
                let usable = match incoming {
                    Some(value) => !value.is_blank(),
                    None => stored
                        .iter()
                        .any(|v| v.step_field_id == field.id && !v.value.is_blank()),
                };
                !usable
            })
            .map(|field| field.field_key.clone())
            .collect())
    }

    pub async fn load(&self, id: Uuid) -> WorkflowResult<StepFieldValue> {
        self.store
            .field_value(id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("Field value", id))
    }

    pub async fn approve(&self, actor: &Actor, id: Uuid) -> WorkflowResult<StepFieldValue> {
        actor.require_admin()?;
        self.review(actor, id, ReviewStatus::Approved, None).await
    }

    pub async fn reject(&self, actor: &Actor, id: Uuid, reason: &str) -> WorkflowResult<StepFieldValue> {
        actor.require_admin()?;
        let reason = validation::reason::validate(reason)?;
        self.review(actor, id, ReviewStatus::Rejected, Some(reason)).await
    }

    /// Record a review decision; the caller has already been checked.
    pub(crate) async fn review(
        &self,
        actor: &Actor,
        id: Uuid,
        status: ReviewStatus,
        reason: Option<String>,
    ) -> WorkflowResult<StepFieldValue> {
        let stamp = ReviewStamp { reviewer: actor.user_id, at: Utc::now(), reason };
        let reviewed = self
            .store
            .review_field_value(id, status, &stamp)
            .await?
            .ok_or_else(|| WorkflowError::not_found("Field value", id))?;

        info!(field_value_id = %id, status = %status, reviewer = %actor.user_id, "Reviewed field value");
        Ok(reviewed)
    }

    /// Replace a single REJECTED value. The status is checked by the write
    /// itself, so a concurrent approval wins over a stale resubmission.
    pub async fn resubmit(
        &self,
        actor: &Actor,
        id: Uuid,
        raw: JsonValue,
    ) -> WorkflowResult<StepFieldValue> {
        let current = self.load(id).await?;
        self.instances.load_instance_for(actor, current.step_instance_id).await?;

        let value = FieldValue::from_json(raw)
            .ok_or_else(|| WorkflowError::invalid("value", "value is required"))?;

        match self.store.resubmit_field_value(id, &value, Utc::now()).await? {
            Some(updated) => {
                info!(field_value_id = %id, "Resubmitted field value");
                Ok(updated)
            }
            None => {
                let status = self.load(id).await?.validation_status;
                Err(WorkflowError::illegal(status, "resubmit field"))
            }
        }
    }
}
