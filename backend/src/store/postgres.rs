use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use dossierflow_shared::{
    Document, DocumentStatus, DocumentType, DocumentVersion, Dossier, FieldValue,
    ProductStepDefinition, ReviewStamp, ReviewStatus, StepDocumentRequirement, StepField,
    StepFieldValue, StepInstance, StepInstanceStatus,
};

use super::{DocumentSlot, StepTransition, StoreError, StoreResult, WorkflowStore};

/// PostgreSQL-backed [`WorkflowStore`].
///
/// Invariants are carried by the schema in `migrations/`: unique indexes on
/// every natural key and a CHECK that a field value fills exactly one of its
/// two value columns.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Raw `step_field_values` row before folding the value columns.
#[derive(Debug, FromRow)]
struct StepFieldValueRow {
    id: Uuid,
    step_instance_id: Uuid,
    step_field_id: Uuid,
    value: Option<String>,
    value_jsonb: Option<JsonValue>,
    validation_status: ReviewStatus,
    rejection_reason: Option<String>,
    reviewed_by: Option<Uuid>,
    reviewed_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<StepFieldValueRow> for StepFieldValue {
    type Error = StoreError;

    fn try_from(row: StepFieldValueRow) -> Result<Self, Self::Error> {
        let value = FieldValue::from_columns(row.value, row.value_jsonb).ok_or_else(|| {
            StoreError::Backend(format!("field value {} has no value column set", row.id))
        })?;
        Ok(StepFieldValue {
            id: row.id,
            step_instance_id: row.step_instance_id,
            step_field_id: row.step_field_id,
            value,
            validation_status: row.validation_status,
            rejection_reason: row.rejection_reason,
            reviewed_by: row.reviewed_by,
            reviewed_at: row.reviewed_at,
            updated_at: row.updated_at,
        })
    }
}

const FIELD_VALUE_COLUMNS: &str = "id, step_instance_id, step_field_id, value, value_jsonb, \
     validation_status, rejection_reason, reviewed_by, reviewed_at, updated_at";

const STEP_INSTANCE_COLUMNS: &str = "id, dossier_id, step_id, started_at, completed_at, \
     validation_status, rejection_reason, validated_by, validated_at";

const DOCUMENT_COLUMNS: &str = "id, dossier_id, document_type_id, step_instance_id, status, \
     current_version_id, rejection_reason, reviewed_by, reviewed_at, created_at, updated_at";

const VERSION_COLUMNS: &str = "id, document_id, version_number, file_ref, original_filename, \
     file_size, mime_type, uploaded_by, created_at";

#[async_trait]
impl WorkflowStore for PgStore {
    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn product_steps(&self, product_id: Uuid) -> StoreResult<Vec<ProductStepDefinition>> {
        let steps = sqlx::query_as::<_, ProductStepDefinition>(
            r#"
            SELECT ps.product_id, s.id, s.code, s.name, s.step_type,
                   ps.position, ps.is_required, ps.dossier_status_on_approval
            FROM product_steps ps
            JOIN steps s ON s.id = ps.step_id
            WHERE ps.product_id = $1
            ORDER BY ps.position ASC
            "#,
        )
        .bind(product_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(steps)
    }

    async fn step_fields(&self, step_id: Uuid) -> StoreResult<Vec<StepField>> {
        let fields = sqlx::query_as::<_, StepField>(
            r#"
            SELECT id, step_id, field_key, label, field_type, is_required, position
            FROM step_fields
            WHERE step_id = $1
            ORDER BY position ASC
            "#,
        )
        .bind(step_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(fields)
    }

    async fn step_document_requirements(
        &self,
        step_id: Uuid,
    ) -> StoreResult<Vec<StepDocumentRequirement>> {
        let requirements = sqlx::query_as::<_, StepDocumentRequirement>(
            "SELECT step_id, document_type_id, is_required FROM step_document_types WHERE step_id = $1",
        )
        .bind(step_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(requirements)
    }

    async fn document_type(&self, id: Uuid) -> StoreResult<Option<DocumentType>> {
        let document_type = sqlx::query_as::<_, DocumentType>(
            "SELECT id, code, name, allowed_extensions, max_size_bytes FROM document_types WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(document_type)
    }

    async fn dossier(&self, id: Uuid) -> StoreResult<Option<Dossier>> {
        let dossier = sqlx::query_as::<_, Dossier>(
            r#"
            SELECT id, product_id, owner_id, status, current_step_instance_id,
                   client_steps_signal_claimed_at, client_steps_signaled_at, created_at, updated_at
            FROM dossiers
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(dossier)
    }

    async fn set_current_step_instance(
        &self,
        dossier_id: Uuid,
        step_instance_id: Uuid,
    ) -> StoreResult<()> {
        sqlx::query(
            "UPDATE dossiers SET current_step_instance_id = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(dossier_id)
        .bind(step_instance_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_dossier_status(&self, dossier_id: Uuid, status: &str) -> StoreResult<()> {
        sqlx::query("UPDATE dossiers SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(dossier_id)
            .bind(status)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn claim_client_steps_signal(
        &self,
        dossier_id: Uuid,
        at: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE dossiers SET client_steps_signal_claimed_at = $2
            WHERE id = $1
              AND client_steps_signaled_at IS NULL
              AND (client_steps_signal_claimed_at IS NULL OR client_steps_signal_claimed_at < $3)
            "#,
        )
        .bind(dossier_id)
        .bind(at)
        .bind(stale_before)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_client_steps_signaled(
        &self,
        dossier_id: Uuid,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        sqlx::query("UPDATE dossiers SET client_steps_signaled_at = $2 WHERE id = $1")
            .bind(dossier_id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn release_client_steps_signal(&self, dossier_id: Uuid) -> StoreResult<()> {
        sqlx::query("UPDATE dossiers SET client_steps_signal_claimed_at = NULL WHERE id = $1")
            .bind(dossier_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn step_instance(&self, id: Uuid) -> StoreResult<Option<StepInstance>> {
        let sql = format!("SELECT {} FROM step_instances WHERE id = $1", STEP_INSTANCE_COLUMNS);
        let instance = sqlx::query_as::<_, StepInstance>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(instance)
    }

    async fn find_step_instance(
        &self,
        dossier_id: Uuid,
        step_id: Uuid,
    ) -> StoreResult<Option<StepInstance>> {
        let sql = format!(
            "SELECT {} FROM step_instances WHERE dossier_id = $1 AND step_id = $2",
            STEP_INSTANCE_COLUMNS
        );
        let instance = sqlx::query_as::<_, StepInstance>(&sql)
            .bind(dossier_id)
            .bind(step_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(instance)
    }

    async fn insert_step_instance(&self, instance: &StepInstance) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO step_instances (id, dossier_id, step_id, started_at, completed_at,
                                        validation_status, rejection_reason, validated_by, validated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(instance.id)
        .bind(instance.dossier_id)
        .bind(instance.step_id)
        .bind(instance.started_at)
        .bind(instance.completed_at)
        .bind(instance.validation_status)
        .bind(&instance.rejection_reason)
        .bind(instance.validated_by)
        .bind(instance.validated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn step_instances_for_dossier(&self, dossier_id: Uuid) -> StoreResult<Vec<StepInstance>> {
        let sql = format!(
            "SELECT {} FROM step_instances WHERE dossier_id = $1 ORDER BY started_at ASC",
            STEP_INSTANCE_COLUMNS
        );
        let instances = sqlx::query_as::<_, StepInstance>(&sql)
            .bind(dossier_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(instances)
    }

    async fn transition_step_instance(
        &self,
        id: Uuid,
        expected: StepInstanceStatus,
        transition: &StepTransition,
    ) -> StoreResult<Option<StepInstance>> {
        let sql = format!(
            r#"
            UPDATE step_instances
            SET validation_status = $3, completed_at = $4, rejection_reason = $5,
                validated_by = $6, validated_at = $7
            WHERE id = $1 AND validation_status = $2
            RETURNING {}
            "#,
            STEP_INSTANCE_COLUMNS
        );
        let instance = sqlx::query_as::<_, StepInstance>(&sql)
            .bind(id)
            .bind(expected)
            .bind(transition.to)
            .bind(transition.completed_at)
            .bind(&transition.rejection_reason)
            .bind(transition.validated_by)
            .bind(transition.validated_at)
            .fetch_optional(&self.pool)
            .await?;
        Ok(instance)
    }

    async fn field_values(&self, step_instance_id: Uuid) -> StoreResult<Vec<StepFieldValue>> {
        let sql = format!(
            "SELECT {} FROM step_field_values WHERE step_instance_id = $1 \
             ORDER BY (SELECT sf.position FROM step_fields sf WHERE sf.id = step_field_id) ASC",
            FIELD_VALUE_COLUMNS
        );
        let rows = sqlx::query_as::<_, StepFieldValueRow>(&sql)
            .bind(step_instance_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(StepFieldValue::try_from).collect()
    }

    async fn field_value(&self, id: Uuid) -> StoreResult<Option<StepFieldValue>> {
        let sql = format!("SELECT {} FROM step_field_values WHERE id = $1", FIELD_VALUE_COLUMNS);
        let row = sqlx::query_as::<_, StepFieldValueRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(StepFieldValue::try_from).transpose()
    }

    async fn upsert_field_value(
        &self,
        step_instance_id: Uuid,
        step_field_id: Uuid,
        value: &FieldValue,
        at: DateTime<Utc>,
    ) -> StoreResult<StepFieldValue> {
        let (scalar, structured) = value.to_columns();
        let sql = format!(
            r#"
            INSERT INTO step_field_values (id, step_instance_id, step_field_id, value, value_jsonb,
                                           validation_status, updated_at)
            VALUES ($1, $2, $3, $4, $5, 'PENDING', $6)
            ON CONFLICT (step_instance_id, step_field_id) DO UPDATE
            SET value = EXCLUDED.value,
                value_jsonb = EXCLUDED.value_jsonb,
                validation_status = 'PENDING',
                rejection_reason = NULL,
                reviewed_by = NULL,
                reviewed_at = NULL,
                updated_at = EXCLUDED.updated_at
            RETURNING {}
            "#,
            FIELD_VALUE_COLUMNS
        );
        let row = sqlx::query_as::<_, StepFieldValueRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(step_instance_id)
            .bind(step_field_id)
            .bind(scalar)
            .bind(structured)
            .bind(at)
            .fetch_one(&self.pool)
            .await?;
        StepFieldValue::try_from(row)
    }

    async fn resubmit_field_value(
        &self,
        id: Uuid,
        value: &FieldValue,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<StepFieldValue>> {
        let (scalar, structured) = value.to_columns();
        let sql = format!(
            r#"
            UPDATE step_field_values
            SET value = $2, value_jsonb = $3, validation_status = 'PENDING',
                rejection_reason = NULL, reviewed_by = NULL, reviewed_at = NULL, updated_at = $4
            WHERE id = $1 AND validation_status = 'REJECTED'
            RETURNING {}
            "#,
            FIELD_VALUE_COLUMNS
        );
        let row = sqlx::query_as::<_, StepFieldValueRow>(&sql)
            .bind(id)
            .bind(scalar)
            .bind(structured)
            .bind(at)
            .fetch_optional(&self.pool)
            .await?;
        row.map(StepFieldValue::try_from).transpose()
    }

    async fn review_field_value(
        &self,
        id: Uuid,
        status: ReviewStatus,
        stamp: &ReviewStamp,
    ) -> StoreResult<Option<StepFieldValue>> {
        let sql = format!(
            r#"
            UPDATE step_field_values
            SET validation_status = $2, rejection_reason = $3, reviewed_by = $4, reviewed_at = $5
            WHERE id = $1
            RETURNING {}
            "#,
            FIELD_VALUE_COLUMNS
        );
        let row = sqlx::query_as::<_, StepFieldValueRow>(&sql)
            .bind(id)
            .bind(status)
            .bind(&stamp.reason)
            .bind(stamp.reviewer)
            .bind(stamp.at)
            .fetch_optional(&self.pool)
            .await?;
        row.map(StepFieldValue::try_from).transpose()
    }

    async fn document(&self, id: Uuid) -> StoreResult<Option<Document>> {
        let sql = format!("SELECT {} FROM documents WHERE id = $1", DOCUMENT_COLUMNS);
        let document = sqlx::query_as::<_, Document>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(document)
    }

    async fn find_document(&self, slot: &DocumentSlot) -> StoreResult<Option<Document>> {
        let sql = format!(
            r#"
            SELECT {} FROM documents
            WHERE dossier_id = $1 AND document_type_id = $2
              AND step_instance_id IS NOT DISTINCT FROM $3
            "#,
            DOCUMENT_COLUMNS
        );
        let document = sqlx::query_as::<_, Document>(&sql)
            .bind(slot.dossier_id)
            .bind(slot.document_type_id)
            .bind(slot.step_instance_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(document)
    }

    async fn insert_document(&self, document: &Document) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO documents (id, dossier_id, document_type_id, step_instance_id, status,
                                   current_version_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(document.id)
        .bind(document.dossier_id)
        .bind(document.document_type_id)
        .bind(document.step_instance_id)
        .bind(document.status)
        .bind(document.current_version_id)
        .bind(document.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn documents_for_step_instance(
        &self,
        step_instance_id: Uuid,
    ) -> StoreResult<Vec<Document>> {
        let sql = format!(
            "SELECT {} FROM documents WHERE step_instance_id = $1 ORDER BY created_at ASC",
            DOCUMENT_COLUMNS
        );
        let documents = sqlx::query_as::<_, Document>(&sql)
            .bind(step_instance_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(documents)
    }

    async fn dossier_level_documents(&self, dossier_id: Uuid) -> StoreResult<Vec<Document>> {
        let sql = format!(
            "SELECT {} FROM documents WHERE dossier_id = $1 AND step_instance_id IS NULL",
            DOCUMENT_COLUMNS
        );
        let documents = sqlx::query_as::<_, Document>(&sql)
            .bind(dossier_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(documents)
    }

    async fn latest_version_number(&self, document_id: Uuid) -> StoreResult<Option<i32>> {
        let latest = sqlx::query_scalar::<_, Option<i32>>(
            "SELECT MAX(version_number) FROM document_versions WHERE document_id = $1",
        )
        .bind(document_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(latest)
    }

    async fn insert_document_version(&self, version: &DocumentVersion) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO document_versions (id, document_id, version_number, file_ref,
                                           original_filename, file_size, mime_type,
                                           uploaded_by, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(version.id)
        .bind(version.document_id)
        .bind(version.version_number)
        .bind(&version.file_ref)
        .bind(&version.original_filename)
        .bind(version.file_size)
        .bind(&version.mime_type)
        .bind(version.uploaded_by)
        .bind(version.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn advance_current_version(
        &self,
        document_id: Uuid,
        version: &DocumentVersion,
    ) -> StoreResult<Document> {
        // The pointer only moves forward: a slower concurrent upload of an
        // older number must not overwrite a newer pointer.
        let sql = format!(
            r#"
            UPDATE documents d
            SET current_version_id = CASE
                    WHEN d.current_version_id IS NULL
                      OR (SELECT v.version_number FROM document_versions v
                          WHERE v.id = d.current_version_id) < $3
                    THEN $2
                    ELSE d.current_version_id
                END,
                status = 'PENDING',
                rejection_reason = NULL,
                reviewed_by = NULL,
                reviewed_at = NULL,
                updated_at = $4
            WHERE d.id = $1
            RETURNING {}
            "#,
            DOCUMENT_COLUMNS
        );
        let document = sqlx::query_as::<_, Document>(&sql)
            .bind(document_id)
            .bind(version.id)
            .bind(version.version_number)
            .bind(version.created_at)
            .fetch_one(&self.pool)
            .await?;
        Ok(document)
    }

    async fn document_versions(&self, document_id: Uuid) -> StoreResult<Vec<DocumentVersion>> {
        let sql = format!(
            "SELECT {} FROM document_versions WHERE document_id = $1 ORDER BY version_number ASC",
            VERSION_COLUMNS
        );
        let versions = sqlx::query_as::<_, DocumentVersion>(&sql)
            .bind(document_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(versions)
    }

    async fn review_document(
        &self,
        id: Uuid,
        status: DocumentStatus,
        stamp: &ReviewStamp,
    ) -> StoreResult<Option<Document>> {
        let sql = format!(
            r#"
            UPDATE documents
            SET status = $2, rejection_reason = $3, reviewed_by = $4, reviewed_at = $5,
                updated_at = $5
            WHERE id = $1
            RETURNING {}
            "#,
            DOCUMENT_COLUMNS
        );
        let document = sqlx::query_as::<_, Document>(&sql)
            .bind(id)
            .bind(status)
            .bind(&stamp.reason)
            .bind(stamp.reviewer)
            .bind(stamp.at)
            .fetch_optional(&self.pool)
            .await?;
        Ok(document)
    }
}
