//! SQLite-backed stores
//!
//! A request is one row: indexed columns for lookups plus the full record
//! (signers and audit chain included) as JSON.

use async_trait::async_trait;
use chrono::Utc;
use docsign_core::{
    DocumentId, DocumentStore, RequestId, RequestStore, Result, SignatureRequest, SigningError,
};
use sqlx::sqlite::SqlitePool;
use uuid::Uuid;

const BY_ID: &str = "SELECT record_json FROM signature_requests WHERE id = ?";
const BY_TOKEN_DIGEST: &str = "SELECT record_json FROM signature_requests WHERE token_digest = ?";

fn storage_error(err: sqlx::Error) -> SigningError {
    SigningError::Storage(err.to_string())
}

pub struct SqliteRequestStore {
    pool: SqlitePool,
}

impl SqliteRequestStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn fetch_record(&self, query: &'static str, value: &str) -> Result<Option<SignatureRequest>> {
        let record: Option<String> = sqlx::query_scalar(query)
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error)?;
        match record {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl RequestStore for SqliteRequestStore {
    async fn insert(&self, request: &SignatureRequest) -> Result<()> {
        let record = serde_json::to_string(request)?;
        sqlx::query(
            r#"
            INSERT INTO signature_requests (id, token_digest, state, deadline, record_json, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(request.id.to_string())
        .bind(request.token().digest())
        .bind(request.state().as_str())
        .bind(request.deadline.map(|d| d.to_string()))
        .bind(record)
        .bind(request.created_at.to_rfc3339())
        .bind(request.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;
        Ok(())
    }

    async fn save(&self, request: &SignatureRequest) -> Result<()> {
        let record = serde_json::to_string(request)?;
        let result = sqlx::query(
            r#"
            UPDATE signature_requests
            SET state = ?, deadline = ?, record_json = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(request.state().as_str())
        .bind(request.deadline.map(|d| d.to_string()))
        .bind(record)
        .bind(Utc::now().to_rfc3339())
        .bind(request.id.to_string())
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        if result.rows_affected() == 0 {
            return Err(SigningError::NotFound(format!("request {}", request.id)));
        }
        Ok(())
    }

    async fn load(&self, id: RequestId) -> Result<SignatureRequest> {
        self.fetch_record(BY_ID, &id.to_string())
            .await?
            .ok_or_else(|| SigningError::NotFound(format!("request {}", id)))
    }

    async fn find_by_token_digest(&self, digest: &str) -> Result<Option<SignatureRequest>> {
        self.fetch_record(BY_TOKEN_DIGEST, digest).await
    }

    async fn list_active(&self) -> Result<Vec<RequestId>> {
        let ids: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT id FROM signature_requests
            WHERE state NOT IN ('completed', 'cancelled', 'expired')
            ORDER BY created_at
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        ids.iter()
            .map(|id| {
                id.parse()
                    .map_err(|_| SigningError::Storage(format!("Corrupt request id {}", id)))
            })
            .collect()
    }

    async fn list_all(&self) -> Result<Vec<SignatureRequest>> {
        let records: Vec<String> =
            sqlx::query_scalar("SELECT record_json FROM signature_requests ORDER BY created_at")
                .fetch_all(&self.pool)
                .await
                .map_err(storage_error)?;
        records
            .iter()
            .map(|json| serde_json::from_str(json).map_err(SigningError::from))
            .collect()
    }
}

pub struct SqliteDocumentStore {
    pool: SqlitePool,
}

impl SqliteDocumentStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn put_bytes(&self, filename: &str, content: Vec<u8>) -> Result<DocumentId> {
        let id = DocumentId(Uuid::new_v4().to_string());
        sqlx::query("INSERT INTO documents (id, filename, content) VALUES (?, ?, ?)")
            .bind(&id.0)
            .bind(filename)
            .bind(content)
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;
        tracing::debug!(document_id = %id, filename, "Document stored");
        Ok(id)
    }

    async fn get_bytes(&self, id: &DocumentId) -> Result<Vec<u8>> {
        let content: Option<Vec<u8>> =
            sqlx::query_scalar("SELECT content FROM documents WHERE id = ?")
                .bind(&id.0)
                .fetch_optional(&self.pool)
                .await
                .map_err(storage_error)?;
        content.ok_or_else(|| SigningError::NotFound(format!("document {}", id)))
    }
}
