use std::sync::Arc;
use uuid::Uuid;

use dossierflow_shared::{DocumentStatus, ReviewStatus, StepInstance, StepInstanceStatus};

use crate::store::{MemoryStore, WorkflowStore};
use crate::tests::fixtures::{company_payload, pdf_bytes, COMPANY_VALIDATED};
use crate::tests::helpers::FlakyStore;
use crate::tests::TestContext;
use crate::workflow::{
    ApprovalMode, ItemKind, ItemResult, UploadRequest, WorkflowConfig, WorkflowError,
};

/// Submit the company step and attach an ID card, scoped to the instance or
/// to the dossier.
async fn submitted_company_step(ctx: &TestContext, scoped: bool) -> (StepInstance, Uuid) {
    let fx = &ctx.fixture;
    let submitted = ctx
        .engine
        .submissions
        .submit_step(&fx.client(), fx.dossier_id, fx.company_step_id, company_payload())
        .await
        .unwrap();

    let uploaded = ctx
        .engine
        .documents
        .upload(
            &fx.client(),
            UploadRequest {
                dossier_id: fx.dossier_id,
                document_type_id: fx.id_card_type_id,
                step_instance_id: scoped.then_some(submitted.instance.id),
                filename: "id-card.pdf".to_string(),
                content_type: "application/pdf".to_string(),
                bytes: pdf_bytes("id card"),
            },
        )
        .await
        .unwrap();

    (submitted.instance, uploaded.document.id)
}

#[tokio::test]
async fn test_strict_approval_lists_unapproved_items() {
    let ctx = TestContext::new().await;
    let fx = &ctx.fixture;
    let (instance, _) = submitted_company_step(&ctx, true).await;

    let err = ctx
        .engine
        .approvals
        .approve_step_instance(&fx.admin(), instance.id)
        .await
        .unwrap_err();
    match err {
        WorkflowError::IncompleteValidation { missing } => {
            assert_eq!(missing, vec!["field:company_name".to_string(), "document:ID_CARD".to_string()]);
        }
        other => panic!("expected incomplete validation, got {:?}", other),
    }

    let unchanged = ctx.engine.instances.load_instance(instance.id).await.unwrap();
    assert_eq!(unchanged.validation_status, StepInstanceStatus::Submitted);
}

#[tokio::test]
async fn test_strict_approval_cascades_dossier_status() {
    let ctx = TestContext::new().await;
    let fx = &ctx.fixture;
    let admin = fx.admin();
    let (instance, document_id) = submitted_company_step(&ctx, true).await;

    for value in ctx.store.field_values(instance.id).await.unwrap() {
        ctx.engine.fields.approve(&admin, value.id).await.unwrap();
    }
    ctx.engine.documents.approve(&admin, document_id).await.unwrap();

    let approval = ctx
        .engine
        .approvals
        .approve_step_instance(&admin, instance.id)
        .await
        .unwrap();
    assert!(approval.approved);
    assert_eq!(approval.mode, ApprovalMode::Strict);
    assert_eq!(approval.instance.validation_status, StepInstanceStatus::Approved);
    assert_eq!(approval.instance.validated_by, Some(fx.admin_id));
    assert!(approval.instance.validated_at.is_some());
    assert_eq!(approval.dossier_status, COMPANY_VALIDATED);
    assert_eq!(approval.next_step_id, Some(fx.shareholders_step_id));

    let dossier = ctx.store.dossier(fx.dossier_id).await.unwrap().unwrap();
    assert_eq!(dossier.status, COMPANY_VALIDATED);

    // Approving again is a no-op.
    let again = ctx
        .engine
        .approvals
        .approve_step_instance(&admin, instance.id)
        .await
        .unwrap();
    assert!(again.approved);
    assert!(again.items.is_empty());
    assert_eq!(again.instance, approval.instance);
}

#[tokio::test]
async fn test_strict_approval_accepts_dossier_level_document() {
    let ctx = TestContext::new().await;
    let fx = &ctx.fixture;
    let admin = fx.admin();
    let (instance, document_id) = submitted_company_step(&ctx, false).await;

    for value in ctx.store.field_values(instance.id).await.unwrap() {
        ctx.engine.fields.approve(&admin, value.id).await.unwrap();
    }
    ctx.engine.documents.approve(&admin, document_id).await.unwrap();

    let approval = ctx
        .engine
        .approvals
        .approve_step_instance(&admin, instance.id)
        .await
        .unwrap();
    assert_eq!(approval.instance.validation_status, StepInstanceStatus::Approved);
}

#[tokio::test]
async fn test_bulk_approval_approves_items_and_cascades() {
    let ctx = TestContext::with_mode(ApprovalMode::Bulk).await;
    let fx = &ctx.fixture;
    let (instance, document_id) = submitted_company_step(&ctx, true).await;

    let approval = ctx
        .engine
        .approvals
        .approve_step_instance(&fx.admin(), instance.id)
        .await
        .unwrap();

    assert!(approval.approved);
    assert_eq!(approval.items.len(), 3);
    assert!(approval.items.iter().all(|i| i.result == ItemResult::Approved));
    assert_eq!(approval.dossier_status, COMPANY_VALIDATED);

    let values = ctx.store.field_values(instance.id).await.unwrap();
    assert!(values.iter().all(|v| v.validation_status == ReviewStatus::Approved));
    let document = ctx.store.document(document_id).await.unwrap().unwrap();
    assert_eq!(document.status, DocumentStatus::Approved);
}

#[tokio::test]
async fn test_bulk_approval_partial_failure_then_retry() {
    let store = Arc::new(MemoryStore::new());
    let flaky = Arc::new(FlakyStore::new(store.clone()));
    let ctx = TestContext::with_store(
        store,
        flaky.clone(),
        WorkflowConfig { approval_mode: ApprovalMode::Bulk, ..Default::default() },
    )
    .await;
    let fx = &ctx.fixture;
    let (instance, document_id) = submitted_company_step(&ctx, true).await;

    flaky.fail_document_reviews(true);
    let partial = ctx
        .engine
        .approvals
        .approve_step_instance(&fx.admin(), instance.id)
        .await
        .unwrap();

    assert!(!partial.approved);
    assert_eq!(partial.instance.validation_status, StepInstanceStatus::Submitted);
    let failed: Vec<_> = partial.failed_items().collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].kind, ItemKind::Document);
    assert_eq!(failed[0].id, document_id);
    assert_eq!(failed[0].label, "ID_CARD");

    let dossier = ctx.store.dossier(fx.dossier_id).await.unwrap().unwrap();
    assert_eq!(dossier.status, "IN_PROGRESS");

    flaky.fail_document_reviews(false);
    let retried = ctx
        .engine
        .approvals
        .approve_step_instance(&fx.admin(), instance.id)
        .await
        .unwrap();

    assert!(retried.approved);
    assert_eq!(retried.instance.validation_status, StepInstanceStatus::Approved);
    for item in &retried.items {
        let expected = match item.kind {
            ItemKind::Field => ItemResult::AlreadyApproved,
            ItemKind::Document => ItemResult::Approved,
        };
        assert_eq!(item.result, expected, "{}", item.label);
    }
}

#[tokio::test]
async fn test_repeated_approval_finishes_interrupted_cascade() {
    let store = Arc::new(MemoryStore::new());
    let flaky = Arc::new(FlakyStore::new(store.clone()));
    let ctx = TestContext::with_store(
        store,
        flaky.clone(),
        WorkflowConfig { approval_mode: ApprovalMode::Bulk, ..Default::default() },
    )
    .await;
    let fx = &ctx.fixture;
    let (instance, _) = submitted_company_step(&ctx, true).await;

    flaky.fail_next_dossier_status();
    let err = ctx
        .engine
        .approvals
        .approve_step_instance(&fx.admin(), instance.id)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::Store(_)));

    // The instance write landed, the dossier write did not.
    let approved = ctx.engine.instances.load_instance(instance.id).await.unwrap();
    assert_eq!(approved.validation_status, StepInstanceStatus::Approved);
    let dossier = ctx.store.dossier(fx.dossier_id).await.unwrap().unwrap();
    assert_eq!(dossier.status, "IN_PROGRESS");

    let retried = ctx
        .engine
        .approvals
        .approve_step_instance(&fx.admin(), instance.id)
        .await
        .unwrap();
    assert!(retried.approved);
    assert_eq!(retried.dossier_status, COMPANY_VALIDATED);
    assert_eq!(retried.next_step_id, Some(fx.shareholders_step_id));

    let dossier = ctx.store.dossier(fx.dossier_id).await.unwrap().unwrap();
    assert_eq!(dossier.status, COMPANY_VALIDATED);
}

#[tokio::test]
async fn test_approval_requires_admin_and_reviewable_state() {
    let ctx = TestContext::with_mode(ApprovalMode::Bulk).await;
    let fx = &ctx.fixture;

    let draft = ctx
        .engine
        .instances
        .get_or_create(fx.dossier_id, fx.company_step_id)
        .await
        .unwrap();

    assert!(matches!(
        ctx.engine.approvals.approve_step_instance(&fx.client(), draft.id).await,
        Err(WorkflowError::Forbidden(_))
    ));

    let err = ctx
        .engine
        .approvals
        .approve_step_instance(&fx.admin(), draft.id)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::IllegalStateTransition { ref from, action: "approve" } if from == "DRAFT"
    ));
}

#[tokio::test]
async fn test_reject_leaves_item_statuses() {
    let ctx = TestContext::new().await;
    let fx = &ctx.fixture;
    let admin = fx.admin();
    let (instance, document_id) = submitted_company_step(&ctx, true).await;

    assert!(matches!(
        ctx.engine.approvals.reject_step_instance(&admin, instance.id, "no").await,
        Err(WorkflowError::ValidationFailed { .. })
    ));

    let rejected = ctx
        .engine
        .approvals
        .reject_step_instance(&admin, instance.id, "Please provide the full registered name")
        .await
        .unwrap();
    assert_eq!(rejected.validation_status, StepInstanceStatus::Rejected);
    assert_eq!(rejected.validated_by, Some(fx.admin_id));

    let values = ctx.store.field_values(instance.id).await.unwrap();
    assert!(values.iter().all(|v| v.validation_status == ReviewStatus::Pending));
    let document = ctx.store.document(document_id).await.unwrap().unwrap();
    assert_eq!(document.status, DocumentStatus::Pending);

    // Rejecting twice keeps the first decision.
    let again = ctx
        .engine
        .approvals
        .reject_step_instance(&admin, instance.id, "A different reason entirely")
        .await
        .unwrap();
    assert_eq!(again.rejection_reason, rejected.rejection_reason);
}

#[tokio::test]
async fn test_start_review_is_idempotent() {
    let ctx = TestContext::new().await;
    let fx = &ctx.fixture;
    let admin = fx.admin();

    let draft = ctx
        .engine
        .instances
        .get_or_create(fx.dossier_id, fx.company_step_id)
        .await
        .unwrap();
    assert!(matches!(
        ctx.engine.approvals.start_review(&admin, draft.id).await,
        Err(WorkflowError::IllegalStateTransition { .. })
    ));

    let (instance, _) = submitted_company_step(&ctx, true).await;
    let first = ctx.engine.approvals.start_review(&admin, instance.id).await.unwrap();
    let second = ctx.engine.approvals.start_review(&admin, instance.id).await.unwrap();
    assert_eq!(first.validation_status, StepInstanceStatus::UnderReview);
    assert_eq!(second, first);

    // An instance under review can still be rejected.
    let rejected = ctx
        .engine
        .approvals
        .reject_step_instance(&admin, instance.id, "Missing the second page of the ID")
        .await
        .unwrap();
    assert_eq!(rejected.validation_status, StepInstanceStatus::Rejected);
}
