//! Persistence collaborators
//!
//! The core never keeps request state or document bytes itself; it goes
//! through these traits. In-memory implementations back tests and demos.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{Result, SigningError};
use crate::model::{DocumentId, RequestId, SignatureRequest};

/// Durable storage for signature requests and their signers
#[async_trait]
pub trait RequestStore: Send + Sync {
    /// Store a new request; fails if the id already exists
    async fn insert(&self, request: &SignatureRequest) -> Result<()>;

    /// Overwrite an existing request
    async fn save(&self, request: &SignatureRequest) -> Result<()>;

    async fn load(&self, id: RequestId) -> Result<SignatureRequest>;

    /// Look a request up by the digest of its callback token
    async fn find_by_token_digest(&self, digest: &str) -> Result<Option<SignatureRequest>>;

    /// Ids of requests not yet in a terminal state
    async fn list_active(&self) -> Result<Vec<RequestId>>;

    async fn list_all(&self) -> Result<Vec<SignatureRequest>>;
}

/// Byte storage for source, placeholder and signed documents
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn put_bytes(&self, filename: &str, content: Vec<u8>) -> Result<DocumentId>;

    async fn get_bytes(&self, id: &DocumentId) -> Result<Vec<u8>>;
}

#[derive(Default)]
pub struct MemoryRequestStore {
    requests: RwLock<HashMap<RequestId, SignatureRequest>>,
    writes: AtomicUsize,
}

impl MemoryRequestStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful insert/save calls so far
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RequestStore for MemoryRequestStore {
    async fn insert(&self, request: &SignatureRequest) -> Result<()> {
        let mut requests = self.requests.write().await;
        if requests.contains_key(&request.id) {
            return Err(SigningError::Storage(format!(
                "Request {} already exists",
                request.id
            )));
        }
        requests.insert(request.id, request.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn save(&self, request: &SignatureRequest) -> Result<()> {
        let mut requests = self.requests.write().await;
        match requests.get_mut(&request.id) {
            Some(slot) => {
                *slot = request.clone();
                self.writes.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            None => Err(SigningError::NotFound(format!("request {}", request.id))),
        }
    }

    async fn load(&self, id: RequestId) -> Result<SignatureRequest> {
        self.requests
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| SigningError::NotFound(format!("request {}", id)))
    }

    async fn find_by_token_digest(&self, digest: &str) -> Result<Option<SignatureRequest>> {
        Ok(self
            .requests
            .read()
            .await
            .values()
            .find(|r| r.token().digest() == digest)
            .cloned())
    }

    async fn list_active(&self) -> Result<Vec<RequestId>> {
        let mut active: Vec<(chrono::DateTime<chrono::Utc>, RequestId)> = self
            .requests
            .read()
            .await
            .values()
            .filter(|r| !r.state().is_terminal())
            .map(|r| (r.created_at, r.id))
            .collect();
        active.sort();
        Ok(active.into_iter().map(|(_, id)| id).collect())
    }

    async fn list_all(&self) -> Result<Vec<SignatureRequest>> {
        let mut all: Vec<SignatureRequest> = self.requests.read().await.values().cloned().collect();
        all.sort_by_key(|r| r.created_at);
        Ok(all)
    }
}

#[derive(Default)]
pub struct MemoryDocumentStore {
    documents: RwLock<HashMap<DocumentId, (String, Vec<u8>)>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Filenames of everything stored, in no particular order
    pub async fn filenames(&self) -> Vec<String> {
        self.documents
            .read()
            .await
            .values()
            .map(|(name, _)| name.clone())
            .collect()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn put_bytes(&self, filename: &str, content: Vec<u8>) -> Result<DocumentId> {
        let id = DocumentId(Uuid::new_v4().to_string());
        self.documents
            .write()
            .await
            .insert(id.clone(), (filename.to_string(), content));
        Ok(id)
    }

    async fn get_bytes(&self, id: &DocumentId) -> Result<Vec<u8>> {
        self.documents
            .read()
            .await
            .get(id)
            .map(|(_, bytes)| bytes.clone())
            .ok_or_else(|| SigningError::NotFound(format!("document {}", id)))
    }
}
