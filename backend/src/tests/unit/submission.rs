use chrono::{Duration, Utc};
use serde_json::json;
use std::collections::HashMap;

use dossierflow_shared::{FieldValue, ReviewStatus, StepInstanceStatus};

use crate::store::WorkflowStore;
use crate::tests::fixtures::{company_payload, shareholders_payload};
use crate::tests::TestContext;
use crate::workflow::{SignalOutcome, WorkflowError};

#[tokio::test]
async fn test_submit_requires_required_fields() {
    let ctx = TestContext::new().await;
    let fx = &ctx.fixture;

    let payload = HashMap::from([("activity_codes".to_string(), json!(["62.01"]))]);
    let err = ctx
        .engine
        .submissions
        .submit_step(&fx.client(), fx.dossier_id, fx.company_step_id, payload)
        .await
        .unwrap_err();

    match err {
        WorkflowError::ValidationFailed { details } => {
            assert_eq!(details.get("company_name"), Some(&vec!["company_name is required".to_string()]));
        }
        other => panic!("expected validation failure, got {:?}", other),
    }

    let instance = ctx
        .engine
        .instances
        .get_or_create(fx.dossier_id, fx.company_step_id)
        .await
        .unwrap();
    assert_eq!(instance.validation_status, StepInstanceStatus::Draft);
    assert!(ctx.store.field_values(instance.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_blank_payload_does_not_satisfy_stored_value() {
    let ctx = TestContext::new().await;
    let fx = &ctx.fixture;
    let submissions = &ctx.engine.submissions;

    submissions
        .save_draft(&fx.client(), fx.dossier_id, fx.company_step_id, company_payload())
        .await
        .unwrap();

    let blank = HashMap::from([("company_name".to_string(), json!("   "))]);
    let err = submissions
        .submit_step(&fx.client(), fx.dossier_id, fx.company_step_id, blank)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::ValidationFailed { .. }));

    // A draft saved earlier satisfies the requirement on its own.
    let submitted = submissions
        .submit_step(&fx.client(), fx.dossier_id, fx.company_step_id, HashMap::new())
        .await
        .unwrap();
    assert_eq!(submitted.instance.validation_status, StepInstanceStatus::Submitted);
}

#[tokio::test]
async fn test_submit_is_one_way() {
    let ctx = TestContext::new().await;
    let fx = &ctx.fixture;
    let submissions = &ctx.engine.submissions;

    let submitted = submissions
        .submit_step(&fx.client(), fx.dossier_id, fx.company_step_id, company_payload())
        .await
        .unwrap();
    assert_eq!(submitted.instance.validation_status, StepInstanceStatus::Submitted);
    assert!(submitted.instance.completed_at.is_some());
    assert_eq!(submitted.signal, Some(SignalOutcome::NotReady));

    let dossier = ctx.store.dossier(fx.dossier_id).await.unwrap().unwrap();
    assert_eq!(dossier.current_step_instance_id, Some(submitted.instance.id));

    let again = submissions
        .submit_step(&fx.client(), fx.dossier_id, fx.company_step_id, company_payload())
        .await
        .unwrap_err();
    assert!(matches!(
        again,
        WorkflowError::IllegalStateTransition { ref from, action: "submit" } if from == "SUBMITTED"
    ));

    let draft = submissions
        .save_draft(&fx.client(), fx.dossier_id, fx.company_step_id, company_payload())
        .await
        .unwrap_err();
    assert!(matches!(draft, WorkflowError::IllegalStateTransition { action: "save draft", .. }));
}

#[tokio::test]
async fn test_submit_rejects_other_clients() {
    let ctx = TestContext::new().await;
    let fx = &ctx.fixture;

    let err = ctx
        .engine
        .submissions
        .submit_step(&fx.stranger(), fx.dossier_id, fx.company_step_id, company_payload())
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::Forbidden(_)));
    assert_eq!(ctx.store.count_step_instances(fx.dossier_id, fx.company_step_id).await, 0);
}

#[tokio::test]
async fn test_resubmit_requires_rejected_instance() {
    let ctx = TestContext::new().await;
    let fx = &ctx.fixture;

    let submitted = ctx
        .engine
        .submissions
        .submit_step(&fx.client(), fx.dossier_id, fx.company_step_id, company_payload())
        .await
        .unwrap();
    let before = ctx.store.field_values(submitted.instance.id).await.unwrap();

    let payload = HashMap::from([("company_name".to_string(), json!("Rewritten SARL"))]);
    let err = ctx
        .engine
        .submissions
        .resubmit_step(&fx.client(), fx.dossier_id, submitted.instance.id, payload)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::IllegalStateTransition { ref from, action: "resubmit" } if from == "SUBMITTED"
    ));

    let after = ctx.store.field_values(submitted.instance.id).await.unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_resubmit_overwrites_only_rejected_fields() {
    let ctx = TestContext::new().await;
    let fx = &ctx.fixture;
    let admin = fx.admin();

    let submitted = ctx
        .engine
        .submissions
        .submit_step(&fx.client(), fx.dossier_id, fx.company_step_id, company_payload())
        .await
        .unwrap();
    let instance_id = submitted.instance.id;
    let name = submitted
        .fields
        .values
        .iter()
        .find(|v| v.step_field_id == fx.company_name_field_id)
        .cloned()
        .unwrap();

    ctx.engine
        .fields
        .reject(&admin, name.id, "Company name must include the legal form")
        .await
        .unwrap();
    let rejected = ctx
        .engine
        .approvals
        .reject_step_instance(&admin, instance_id, "Please correct the company name")
        .await
        .unwrap();
    assert_eq!(rejected.validation_status, StepInstanceStatus::Rejected);
    assert_eq!(rejected.rejection_reason.as_deref(), Some("Please correct the company name"));

    let payload = HashMap::from([
        ("company_name".to_string(), json!("Acme Holdings SAS")),
        ("activity_codes".to_string(), json!(["99.99"])),
    ]);
    let resubmitted = ctx
        .engine
        .submissions
        .resubmit_step(&fx.client(), fx.dossier_id, instance_id, payload)
        .await
        .unwrap();

    assert_eq!(resubmitted.instance.validation_status, StepInstanceStatus::Submitted);
    assert!(resubmitted.instance.rejection_reason.is_none());
    assert!(resubmitted.instance.validated_by.is_none());
    assert_eq!(resubmitted.fields.skipped_keys, vec!["activity_codes".to_string()]);
    assert_eq!(resubmitted.fields.values.len(), 1);

    let stored = ctx.store.field_values(instance_id).await.unwrap();
    let name = stored.iter().find(|v| v.step_field_id == fx.company_name_field_id).unwrap();
    assert_eq!(name.value, FieldValue::Scalar("Acme Holdings SAS".to_string()));
    assert_eq!(name.validation_status, ReviewStatus::Pending);
    let codes = stored.iter().find(|v| v.step_field_id == fx.activity_codes_field_id).unwrap();
    assert_eq!(codes.value, FieldValue::Structured(json!(["62.01", "62.02"])));
}

#[tokio::test]
async fn test_resubmit_instance_of_another_dossier_is_not_found() {
    let ctx = TestContext::new().await;
    let fx = &ctx.fixture;

    let (other_dossier, _) = fx.other_dossier(&ctx.store).await;
    let foreign = ctx
        .engine
        .instances
        .get_or_create(other_dossier, fx.company_step_id)
        .await
        .unwrap();

    let err = ctx
        .engine
        .submissions
        .resubmit_step(&fx.client(), fx.dossier_id, foreign.id, company_payload())
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::NotFound { entity: "Step instance", .. }));
}

#[tokio::test]
async fn test_signal_emitted_once_when_client_steps_submitted() {
    let ctx = TestContext::new().await;
    let fx = &ctx.fixture;
    let submissions = &ctx.engine.submissions;

    let first = submissions
        .submit_step(&fx.client(), fx.dossier_id, fx.company_step_id, company_payload())
        .await
        .unwrap();
    assert_eq!(first.signal, Some(SignalOutcome::NotReady));
    assert!(ctx.signals.delivered().is_empty());

    let second = submissions
        .submit_step(&fx.client(), fx.dossier_id, fx.shareholders_step_id, shareholders_payload())
        .await
        .unwrap();
    assert_eq!(second.signal, Some(SignalOutcome::Emitted));

    let delivered = ctx.signals.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].dossier_id, fx.dossier_id);

    let dossier = ctx.store.dossier(fx.dossier_id).await.unwrap().unwrap();
    assert!(dossier.client_steps_signaled_at.is_some());

    // A reject and resubmit cycle does not emit a second signal.
    ctx.engine
        .approvals
        .reject_step_instance(&fx.admin(), second.instance.id, "Shares must add up to one hundred")
        .await
        .unwrap();
    let resubmitted = submissions
        .resubmit_step(&fx.client(), fx.dossier_id, second.instance.id, shareholders_payload())
        .await
        .unwrap();
    assert_eq!(resubmitted.signal, Some(SignalOutcome::AlreadyEmitted));
    assert_eq!(ctx.signals.delivered().len(), 1);
}

#[tokio::test]
async fn test_failed_signal_is_retried() {
    let ctx = TestContext::new().await;
    let fx = &ctx.fixture;
    let submissions = &ctx.engine.submissions;
    ctx.signals.set_failing(true);

    submissions
        .submit_step(&fx.client(), fx.dossier_id, fx.company_step_id, company_payload())
        .await
        .unwrap();
    let last = submissions
        .submit_step(&fx.client(), fx.dossier_id, fx.shareholders_step_id, shareholders_payload())
        .await
        .unwrap();

    // The submission itself stands even though delivery failed.
    assert_eq!(last.instance.validation_status, StepInstanceStatus::Submitted);
    assert_eq!(last.signal, Some(SignalOutcome::Failed));
    let dossier = ctx.store.dossier(fx.dossier_id).await.unwrap().unwrap();
    assert!(dossier.client_steps_signaled_at.is_none());
    assert!(dossier.client_steps_signal_claimed_at.is_none());

    ctx.signals.set_failing(false);
    let retried = submissions
        .evaluate_signal(fx.dossier_id, fx.product_id)
        .await
        .unwrap();
    assert_eq!(retried, SignalOutcome::Emitted);
    assert_eq!(ctx.signals.delivered().len(), 1);
}

#[tokio::test]
async fn test_expired_signal_claim_is_taken_over() {
    let ctx = TestContext::new().await;
    let fx = &ctx.fixture;
    let submissions = &ctx.engine.submissions;

    // A request claimed delivery long ago and never finished.
    let long_ago = Utc::now() - Duration::hours(1);
    assert!(ctx
        .store
        .claim_client_steps_signal(fx.dossier_id, long_ago, long_ago - Duration::seconds(1))
        .await
        .unwrap());

    submissions
        .submit_step(&fx.client(), fx.dossier_id, fx.company_step_id, company_payload())
        .await
        .unwrap();
    let last = submissions
        .submit_step(&fx.client(), fx.dossier_id, fx.shareholders_step_id, shareholders_payload())
        .await
        .unwrap();

    assert_eq!(last.signal, Some(SignalOutcome::Emitted));
    assert_eq!(ctx.signals.delivered().len(), 1);
    let dossier = ctx.store.dossier(fx.dossier_id).await.unwrap().unwrap();
    assert!(dossier.client_steps_signaled_at.is_some());

    let again = submissions
        .evaluate_signal(fx.dossier_id, fx.product_id)
        .await
        .unwrap();
    assert_eq!(again, SignalOutcome::AlreadyEmitted);
    assert_eq!(ctx.signals.delivered().len(), 1);
}

#[tokio::test]
async fn test_live_signal_claim_is_in_flight() {
    let ctx = TestContext::new().await;
    let fx = &ctx.fixture;
    let submissions = &ctx.engine.submissions;

    let now = Utc::now();
    assert!(ctx
        .store
        .claim_client_steps_signal(fx.dossier_id, now, now - Duration::seconds(60))
        .await
        .unwrap());

    submissions
        .submit_step(&fx.client(), fx.dossier_id, fx.company_step_id, company_payload())
        .await
        .unwrap();
    let last = submissions
        .submit_step(&fx.client(), fx.dossier_id, fx.shareholders_step_id, shareholders_payload())
        .await
        .unwrap();

    assert_eq!(last.signal, Some(SignalOutcome::InFlight));
    assert!(ctx.signals.delivered().is_empty());
    let dossier = ctx.store.dossier(fx.dossier_id).await.unwrap().unwrap();
    assert!(dossier.client_steps_signaled_at.is_none());
}
