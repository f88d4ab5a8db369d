use axum::http::{Method, StatusCode};
use serde_json::json;
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

use crate::store::MemoryStore;
use crate::tests::fixtures::{company_payload, pdf_bytes, COMPANY_VALIDATED};
use crate::tests::helpers::{json_request, read_json, FlakyStore};
use crate::tests::TestContext;
use crate::workflow::{ApprovalMode, UploadRequest, WorkflowConfig};

/// Submit the company step with an instance-scoped ID card.
async fn submit_company_step(ctx: &TestContext) -> Uuid {
    let fx = &ctx.fixture;
    let submitted = ctx
        .engine
        .submissions
        .submit_step(&fx.client(), fx.dossier_id, fx.company_step_id, company_payload())
        .await
        .unwrap();
    ctx.engine
        .documents
        .upload(
            &fx.client(),
            UploadRequest {
                dossier_id: fx.dossier_id,
                document_type_id: fx.id_card_type_id,
                step_instance_id: Some(submitted.instance.id),
                filename: "id.pdf".to_string(),
                content_type: "application/pdf".to_string(),
                bytes: pdf_bytes("id"),
            },
        )
        .await
        .unwrap();
    submitted.instance.id
}

fn approve_uri(id: Uuid) -> String {
    format!("/api/v1/step-instances/{}/approve", id)
}

#[tokio::test]
async fn test_strict_approval_reports_missing_items() {
    let ctx = TestContext::new().await;
    let fx = &ctx.fixture;
    let id = submit_company_step(&ctx).await;

    let response = ctx
        .app()
        .oneshot(json_request(Method::POST, &approve_uri(id), Some(&fx.admin()), None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = read_json(response).await;
    assert_eq!(body["code"], "INCOMPLETE_VALIDATION");
    assert_eq!(body["details"]["missing"], json!(["field:company_name", "document:ID_CARD"]));
}

#[tokio::test]
async fn test_client_cannot_approve() {
    let ctx = TestContext::with_mode(ApprovalMode::Bulk).await;
    let fx = &ctx.fixture;
    let id = submit_company_step(&ctx).await;

    let response = ctx
        .app()
        .oneshot(json_request(Method::POST, &approve_uri(id), Some(&fx.client()), None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(read_json(response).await["code"], "FORBIDDEN");
}

#[tokio::test]
async fn test_bulk_approval_over_http() {
    let ctx = TestContext::with_mode(ApprovalMode::Bulk).await;
    let fx = &ctx.fixture;
    let id = submit_company_step(&ctx).await;

    let response = ctx
        .app()
        .oneshot(json_request(
            Method::POST,
            &format!("/api/v1/step-instances/{}/review", id),
            Some(&fx.admin()),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await["validation_status"], "UNDER_REVIEW");

    let response = ctx
        .app()
        .oneshot(json_request(Method::POST, &approve_uri(id), Some(&fx.admin()), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = read_json(response).await;
    assert_eq!(body["approved"], true);
    assert_eq!(body["mode"], "bulk");
    assert_eq!(body["instance"]["validation_status"], "APPROVED");
    assert_eq!(body["dossier_status"], COMPANY_VALIDATED);
    assert_eq!(body["next_step_id"], fx.shareholders_step_id.to_string());
    let items = body["items"].as_array().cloned().unwrap_or_default();
    assert_eq!(items.len(), 3);
    assert!(items.iter().all(|i| i["status"] == "approved"));
}

#[tokio::test]
async fn test_partial_bulk_approval_is_multi_status() {
    let store = Arc::new(MemoryStore::new());
    let flaky = Arc::new(FlakyStore::new(store.clone()));
    let ctx = TestContext::with_store(
        store,
        flaky.clone(),
        WorkflowConfig { approval_mode: ApprovalMode::Bulk, ..Default::default() },
    )
    .await;
    let fx = &ctx.fixture;
    let id = submit_company_step(&ctx).await;

    flaky.fail_document_reviews(true);
    let response = ctx
        .app()
        .oneshot(json_request(Method::POST, &approve_uri(id), Some(&fx.admin()), None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::MULTI_STATUS);
    let body = read_json(response).await;
    assert_eq!(body["approved"], false);
    assert_eq!(body["instance"]["validation_status"], "SUBMITTED");
    let failed: Vec<_> = body["items"]
        .as_array()
        .cloned()
        .unwrap_or_default()
        .into_iter()
        .filter(|i| i["status"] == "failed")
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0]["kind"], "document");
    assert_eq!(failed[0]["label"], "ID_CARD");
    assert!(failed[0]["message"].is_string());
}

#[tokio::test]
async fn test_reject_requires_meaningful_reason() {
    let ctx = TestContext::new().await;
    let fx = &ctx.fixture;
    let id = submit_company_step(&ctx).await;
    let uri = format!("/api/v1/step-instances/{}/reject", id);

    let response = ctx
        .app()
        .oneshot(json_request(Method::POST, &uri, Some(&fx.admin()), Some(json!({ "reason": "bad" }))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(read_json(response).await["code"], "VALIDATION_ERROR");

    let response = ctx
        .app()
        .oneshot(json_request(
            Method::POST,
            &uri,
            Some(&fx.admin()),
            Some(json!({ "reason": "The company name is not the registered one" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["validation_status"], "REJECTED");
    assert_eq!(body["rejection_reason"], "The company name is not the registered one");
}

#[tokio::test]
async fn test_field_review_endpoints() {
    let ctx = TestContext::new().await;
    let fx = &ctx.fixture;
    let id = submit_company_step(&ctx).await;

    let response = ctx
        .app()
        .oneshot(json_request(
            Method::GET,
            &format!("/api/v1/step-instances/{}", id),
            Some(&fx.client()),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let detail = read_json(response).await;
    let name = detail["fields"]
        .as_array()
        .and_then(|fields| fields.iter().find(|f| f["field_key"] == "company_name").cloned())
        .unwrap();
    let field_id = name["id"].as_str().unwrap().to_string();
    assert_eq!(detail["documents"].as_array().map(Vec::len), Some(1));

    let response = ctx
        .app()
        .oneshot(json_request(
            Method::POST,
            &format!("/api/v1/fields/{}/reject", field_id),
            Some(&fx.admin()),
            Some(json!({ "reason": "Missing the legal form suffix" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await["validation_status"], "REJECTED");

    let response = ctx
        .app()
        .oneshot(json_request(
            Method::POST,
            &format!("/api/v1/fields/{}/resubmit", field_id),
            Some(&fx.client()),
            Some(json!({ "value": "Acme Holdings SAS" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["value"], "Acme Holdings SAS");
    assert_eq!(body["validation_status"], "PENDING");
}
