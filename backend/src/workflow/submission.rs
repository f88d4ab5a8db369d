//! Client-side submission protocol.
//!
//! ```text
//! DRAFT --submit--> SUBMITTED --(admin review)--> UNDER_REVIEW --approve--> APPROVED
//!                                                \--reject---> REJECTED --resubmit--> SUBMITTED
//! ```
//!
//! After each submit or resubmit the coordinator checks whether every CLIENT
//! step of the product has been handed over. The first request to see that
//! takes a time-limited delivery lease on the dossier and emits the outbound
//! signal; `client_steps_signaled_at` is only set once delivery succeeded.
//! A failed delivery drops the lease at once. A request that dies while
//! holding it leaves a lease that expires after `signal_lease`, after which
//! the next submission or [`SubmissionCoordinator::evaluate_signal`] call
//! delivers again.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

use dossierflow_shared::{Dossier, StepInstance, StepInstanceStatus, StepType};

use super::error::{WorkflowError, WorkflowResult};
use super::fields::{FieldValidation, FieldWriteReport};
use super::instances::StepInstanceManager;
use super::templates::{StepTemplate, TemplateResolver};
use super::Actor;
use crate::notifications::{ClientStepsSubmitted, SignalSink};
use crate::store::{StepTransition, WorkflowStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalOutcome {
    /// Some CLIENT step has not been submitted yet.
    NotReady,
    Emitted,
    /// Another submission already emitted the signal for this dossier.
    AlreadyEmitted,
    /// Another request holds an unexpired delivery lease.
    InFlight,
    /// Delivery failed; the next submission will try again.
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmissionResult {
    pub instance: StepInstance,
    pub fields: FieldWriteReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal: Option<SignalOutcome>,
}

#[derive(Clone)]
pub struct SubmissionCoordinator {
    store: Arc<dyn WorkflowStore>,
    templates: TemplateResolver,
    instances: StepInstanceManager,
    fields: FieldValidation,
    signals: Arc<dyn SignalSink>,
    signal_lease: ChronoDuration,
}

impl SubmissionCoordinator {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        templates: TemplateResolver,
        instances: StepInstanceManager,
        fields: FieldValidation,
        signals: Arc<dyn SignalSink>,
        signal_lease: Duration,
    ) -> Self {
        let signal_lease = ChronoDuration::from_std(signal_lease).unwrap_or_else(|_| ChronoDuration::seconds(60));
        Self { store, templates, instances, fields, signals, signal_lease }
    }

    /// Save field values without submitting. Only legal while DRAFT.
    pub async fn save_draft(
        &self,
        actor: &Actor,
        dossier_id: Uuid,
        step_id: Uuid,
        payload: HashMap<String, JsonValue>,
    ) -> WorkflowResult<SubmissionResult> {
        let (_, template, instance) = self.prepare(actor, dossier_id, step_id).await?;
        if instance.validation_status != StepInstanceStatus::Draft {
            return Err(WorkflowError::illegal(instance.validation_status, "save draft"));
        }

        let fields = self.fields.upsert_values(&instance, &template, payload).await?;
        Ok(SubmissionResult { instance, fields, signal: None })
    }

    /// Submit a step for review. Only legal from DRAFT.
    pub async fn submit_step(
        &self,
        actor: &Actor,
        dossier_id: Uuid,
        step_id: Uuid,
        payload: HashMap<String, JsonValue>,
    ) -> WorkflowResult<SubmissionResult> {
        let (dossier, template, instance) = self.prepare(actor, dossier_id, step_id).await?;
        if instance.validation_status != StepInstanceStatus::Draft {
            return Err(WorkflowError::illegal(instance.validation_status, "submit"));
        }

        let missing = self
            .fields
            .missing_required(instance.id, &template, &payload)
            .await?;
        if !missing.is_empty() {
            let details = missing
                .into_iter()
                .map(|key| {
                    let message = format!("{} is required", key);
                    (key, vec![message])
                })
                .collect();
            return Err(WorkflowError::ValidationFailed { details });
        }

        let fields = self.fields.upsert_values(&instance, &template, payload).await?;

        let now = Utc::now();
        let transition = StepTransition {
            to: StepInstanceStatus::Submitted,
            completed_at: Some(now),
            rejection_reason: None,
            validated_by: None,
            validated_at: None,
        };
        let instance = self
            .transition(instance, StepInstanceStatus::Draft, &transition, "submit")
            .await?;

        info!(
            dossier_id = %dossier.id,
            step_id = %step_id,
            instance_id = %instance.id,
            "Submitted step"
        );

        let signal = self.after_submission(&dossier, &instance).await?;
        Ok(SubmissionResult { instance, fields, signal: Some(signal) })
    }

    /// Resubmit a REJECTED instance with corrected values.
    ///
    /// The status is checked before anything is written. Only field values
    /// still REJECTED are overwritten; the others are reported as skipped.
    pub async fn resubmit_step(
        &self,
        actor: &Actor,
        dossier_id: Uuid,
        instance_id: Uuid,
        payload: HashMap<String, JsonValue>,
    ) -> WorkflowResult<SubmissionResult> {
        let dossier = self.instances.load_dossier(actor, dossier_id).await?;
        let instance = self.instances.load_instance(instance_id).await?;
        if instance.dossier_id != dossier.id {
            return Err(WorkflowError::not_found("Step instance", instance_id));
        }
        if instance.validation_status != StepInstanceStatus::Rejected {
            return Err(WorkflowError::illegal(instance.validation_status, "resubmit"));
        }

        let template = self
            .templates
            .step_template(dossier.product_id, instance.step_id)
            .await?;
        let fields = self.fields.resubmit_rejected(&instance, &template, payload).await?;

        let transition = StepTransition {
            to: StepInstanceStatus::Submitted,
            completed_at: Some(Utc::now()),
            rejection_reason: None,
            validated_by: None,
            validated_at: None,
        };
        let instance = self
            .transition(instance, StepInstanceStatus::Rejected, &transition, "resubmit")
            .await?;

        info!(
            dossier_id = %dossier.id,
            instance_id = %instance.id,
            updated = fields.values.len(),
            skipped = fields.skipped_keys.len(),
            "Resubmitted step"
        );

        let signal = self.after_submission(&dossier, &instance).await?;
        Ok(SubmissionResult { instance, fields, signal: Some(signal) })
    }

    async fn prepare(
        &self,
        actor: &Actor,
        dossier_id: Uuid,
        step_id: Uuid,
    ) -> WorkflowResult<(Dossier, StepTemplate, StepInstance)> {
        let dossier = self.instances.load_dossier(actor, dossier_id).await?;
        let template = self.templates.step_template(dossier.product_id, step_id).await?;
        let instance = self.instances.get_or_create(dossier.id, step_id).await?;
        Ok((dossier, template, instance))
    }

    async fn transition(
        &self,
        instance: StepInstance,
        expected: StepInstanceStatus,
        transition: &StepTransition,
        action: &'static str,
    ) -> WorkflowResult<StepInstance> {
        match self
            .store
            .transition_step_instance(instance.id, expected, transition)
            .await?
        {
            Some(updated) => Ok(updated),
            None => {
                let current = self.instances.load_instance(instance.id).await?;
                Err(WorkflowError::illegal(current.validation_status, action))
            }
        }
    }

    async fn after_submission(
        &self,
        dossier: &Dossier,
        instance: &StepInstance,
    ) -> WorkflowResult<SignalOutcome> {
        self.store
            .set_current_step_instance(dossier.id, instance.id)
            .await?;
        self.evaluate_signal(dossier.id, dossier.product_id).await
    }

    /// Emit the signal if every CLIENT step of the product is submitted and
    /// nobody has emitted it yet.
    pub async fn evaluate_signal(
        &self,
        dossier_id: Uuid,
        product_id: Uuid,
    ) -> WorkflowResult<SignalOutcome> {
        let client_steps: Vec<Uuid> = self
            .store
            .product_steps(product_id)
            .await?
            .into_iter()
            .filter(|s| s.step.step_type == StepType::Client)
            .map(|s| s.step.id)
            .collect();
        if client_steps.is_empty() {
            return Ok(SignalOutcome::NotReady);
        }

        let instances = self.store.step_instances_for_dossier(dossier_id).await?;
        let all_submitted = client_steps.iter().all(|step_id| {
            instances
                .iter()
                .any(|i| i.step_id == *step_id && i.validation_status.is_submitted())
        });
        if !all_submitted {
            return Ok(SignalOutcome::NotReady);
        }

        let now = Utc::now();
        let stale_before = now
            .checked_sub_signed(self.signal_lease)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        if !self
            .store
            .claim_client_steps_signal(dossier_id, now, stale_before)
            .await?
        {
            let delivered = self
                .store
                .dossier(dossier_id)
                .await?
                .is_some_and(|d| d.client_steps_signaled_at.is_some());
            return Ok(if delivered {
                SignalOutcome::AlreadyEmitted
            } else {
                SignalOutcome::InFlight
            });
        }

        let signal = ClientStepsSubmitted { dossier_id, timestamp: now };
        match self.signals.client_steps_submitted(&signal).await {
            Ok(()) => {
                info!(dossier_id = %dossier_id, "All client steps submitted");
                if let Err(e) = self.store.mark_client_steps_signaled(dossier_id, Utc::now()).await {
                    // The lease expires and a later evaluation redelivers.
                    warn!(dossier_id = %dossier_id, "Failed to record signal delivery: {}", e);
                }
                Ok(SignalOutcome::Emitted)
            }
            Err(e) => {
                error!(dossier_id = %dossier_id, "Failed to deliver client steps signal: {}", e);
                if let Err(release) = self.store.release_client_steps_signal(dossier_id).await {
                    error!(dossier_id = %dossier_id, "Failed to release signal claim: {}", release);
                }
                Ok(SignalOutcome::Failed)
            }
        }
    }
}
