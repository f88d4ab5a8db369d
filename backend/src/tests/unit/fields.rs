use serde_json::json;
use std::collections::HashMap;

use dossierflow_shared::{FieldValue, ReviewStatus, StepFieldValue};

use crate::tests::fixtures::company_payload;
use crate::store::WorkflowStore;
use crate::tests::TestContext;
use crate::workflow::WorkflowError;

fn value_for(values: &[StepFieldValue], field_id: uuid::Uuid) -> StepFieldValue {
    values
        .iter()
        .find(|v| v.step_field_id == field_id)
        .cloned()
        .expect("field value present")
}

#[tokio::test]
async fn test_payload_is_classified_and_unknown_keys_reported() {
    let ctx = TestContext::new().await;
    let fx = &ctx.fixture;

    let payload = HashMap::from([
        ("company_name".to_string(), json!("Acme Holdings")),
        ("activity_codes".to_string(), json!(["62.01"])),
        ("favourite_colour".to_string(), json!("blue")),
    ]);
    let saved = ctx
        .engine
        .submissions
        .save_draft(&fx.client(), fx.dossier_id, fx.company_step_id, payload)
        .await
        .unwrap();

    assert_eq!(saved.fields.ignored_keys, vec!["favourite_colour".to_string()]);
    assert_eq!(saved.fields.values.len(), 2);

    let name = value_for(&saved.fields.values, fx.company_name_field_id);
    assert_eq!(name.value, FieldValue::Scalar("Acme Holdings".to_string()));
    assert_eq!(name.validation_status, ReviewStatus::Pending);

    let codes = value_for(&saved.fields.values, fx.activity_codes_field_id);
    assert_eq!(codes.value, FieldValue::Structured(json!(["62.01"])));
}

#[tokio::test]
async fn test_null_entries_leave_stored_value() {
    let ctx = TestContext::new().await;
    let fx = &ctx.fixture;
    let drafts = &ctx.engine.submissions;

    drafts
        .save_draft(&fx.client(), fx.dossier_id, fx.company_step_id, company_payload())
        .await
        .unwrap();
    let saved = drafts
        .save_draft(
            &fx.client(),
            fx.dossier_id,
            fx.company_step_id,
            HashMap::from([("company_name".to_string(), json!(null))]),
        )
        .await
        .unwrap();
    assert!(saved.fields.values.is_empty());

    let values = ctx.store.field_values(saved.instance.id).await.unwrap();
    assert_eq!(values.len(), 2);
}

#[tokio::test]
async fn test_rewrite_resets_review_state() {
    let ctx = TestContext::new().await;
    let fx = &ctx.fixture;

    let saved = ctx
        .engine
        .submissions
        .save_draft(&fx.client(), fx.dossier_id, fx.company_step_id, company_payload())
        .await
        .unwrap();
    let name = value_for(&saved.fields.values, fx.company_name_field_id);

    ctx.engine
        .fields
        .reject(&fx.admin(), name.id, "Company name does not match the registry")
        .await
        .unwrap();

    let saved = ctx
        .engine
        .submissions
        .save_draft(
            &fx.client(),
            fx.dossier_id,
            fx.company_step_id,
            HashMap::from([("company_name".to_string(), json!("Acme Holdings SAS"))]),
        )
        .await
        .unwrap();

    let rewritten = value_for(&saved.fields.values, fx.company_name_field_id);
    assert_eq!(rewritten.id, name.id);
    assert_eq!(rewritten.validation_status, ReviewStatus::Pending);
    assert!(rewritten.rejection_reason.is_none());
    assert!(rewritten.reviewed_by.is_none());
}

#[tokio::test]
async fn test_review_requires_admin_and_reason() {
    let ctx = TestContext::new().await;
    let fx = &ctx.fixture;

    let saved = ctx
        .engine
        .submissions
        .save_draft(&fx.client(), fx.dossier_id, fx.company_step_id, company_payload())
        .await
        .unwrap();
    let name = value_for(&saved.fields.values, fx.company_name_field_id);

    assert!(matches!(
        ctx.engine.fields.approve(&fx.client(), name.id).await,
        Err(WorkflowError::Forbidden(_))
    ));
    assert!(matches!(
        ctx.engine.fields.reject(&fx.admin(), name.id, "   too short ").await,
        Err(WorkflowError::ValidationFailed { .. })
    ));

    let rejected = ctx
        .engine
        .fields
        .reject(&fx.admin(), name.id, "  Please use the registered name  ")
        .await
        .unwrap();
    assert_eq!(rejected.validation_status, ReviewStatus::Rejected);
    assert_eq!(rejected.rejection_reason.as_deref(), Some("Please use the registered name"));
    assert_eq!(rejected.reviewed_by, Some(fx.admin_id));
    assert!(rejected.reviewed_at.is_some());

    let approved = ctx.engine.fields.approve(&fx.admin(), name.id).await.unwrap();
    assert_eq!(approved.validation_status, ReviewStatus::Approved);
    assert!(approved.rejection_reason.is_none());
}

#[tokio::test]
async fn test_resubmit_field_only_when_rejected() {
    let ctx = TestContext::new().await;
    let fx = &ctx.fixture;

    let saved = ctx
        .engine
        .submissions
        .save_draft(&fx.client(), fx.dossier_id, fx.company_step_id, company_payload())
        .await
        .unwrap();
    let name = value_for(&saved.fields.values, fx.company_name_field_id);

    let err = ctx
        .engine
        .fields
        .resubmit(&fx.client(), name.id, json!("Another name"))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::IllegalStateTransition { ref from, .. } if from == "PENDING"));

    ctx.engine
        .fields
        .reject(&fx.admin(), name.id, "Name is missing the legal form")
        .await
        .unwrap();

    assert!(matches!(
        ctx.engine.fields.resubmit(&fx.stranger(), name.id, json!("Hijack")).await,
        Err(WorkflowError::Forbidden(_))
    ));

    let resubmitted = ctx
        .engine
        .fields
        .resubmit(&fx.client(), name.id, json!("Acme Holdings SAS"))
        .await
        .unwrap();
    assert_eq!(resubmitted.value, FieldValue::Scalar("Acme Holdings SAS".to_string()));
    assert_eq!(resubmitted.validation_status, ReviewStatus::Pending);
    assert!(resubmitted.rejection_reason.is_none());
}

#[tokio::test]
async fn test_missing_field_value_is_not_found() {
    let ctx = TestContext::new().await;
    let fx = &ctx.fixture;

    let err = ctx
        .engine
        .fields
        .approve(&fx.admin(), uuid::Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::NotFound { entity: "Field value", .. }));
}
