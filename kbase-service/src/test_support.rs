//! Fixtures shared by the unit and scenario tests.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use uuid::Uuid;

use crate::clients::{
    ChatMessage, ChatModel, ConfigMembership, FsBlobStore, HashedEmbeddings, MemoryVectorIndex, OcrProvider,
    PayloadFilter, ScoredPoint, SpaceMember, SpaceMembership, VectorIndex, VectorPoint,
};
use crate::config::{DynamicConfig, MemberConfig, RuntimeConfig, StaticConfig};
use crate::db::{Chunk, Database, Document, DocumentStatus};
use crate::error::ClientError;
use crate::service::{Collaborators, KnowledgeBaseService, NewDocument};

pub(crate) const TEST_DIMENSIONS: usize = 64;

pub(crate) fn temp_database() -> (TempDir, Database) {
    let dir = TempDir::new().unwrap();
    let db = Database::open(&dir.path().join("kbase.db")).unwrap();
    (dir, db)
}

pub(crate) fn sample_document(space_id: &str, file_name: &str) -> Document {
    let now = Utc::now();
    let id = Uuid::new_v4().to_string();
    Document {
        storage_path: format!("documents/{}/{}_{}", space_id, id, file_name),
        id,
        title: file_name.to_string(),
        file_name: file_name.to_string(),
        file_size: 0,
        content_type: None,
        content: None,
        status: DocumentStatus::Uploading,
        process_progress: 0,
        retry_count: 0,
        last_retry_at: None,
        parse_error: None,
        vector_count: 0,
        need_approval: false,
        space_id: space_id.to_string(),
        sub_space_id: None,
        class_id: None,
        workflow_id: None,
        uploaded_by: "uploader".to_string(),
        version: 1,
        created_at: now,
        updated_at: now,
        processed_at: None,
        published_at: None,
    }
}

pub(crate) fn sample_chunk(document_id: &str, index: usize) -> Chunk {
    Chunk {
        id: Uuid::new_v4().to_string(),
        document_id: document_id.to_string(),
        chunk_index: index,
        content: format!("chunk {}", index),
        vector_id: Uuid::new_v4().to_string(),
        token_count: 2,
        created_at: Utc::now(),
    }
}

fn members_config(space_id: &str, members: &[(&str, &[&str])]) -> DynamicConfig {
    let mut config = DynamicConfig::default();
    config.membership.insert(
        space_id.to_string(),
        members
            .iter()
            .map(|(user_id, roles)| MemberConfig {
                user_id: user_id.to_string(),
                roles: roles.iter().map(|r| r.to_string()).collect(),
            })
            .collect(),
    );
    config
}

pub(crate) fn runtime_with_members(
    space_id: &str,
    members: &[(&str, &[&str])],
) -> Arc<RuntimeConfig> {
    Arc::new(RuntimeConfig::new(
        StaticConfig::default(),
        members_config(space_id, members),
    ))
}

/// Membership lookup whose directory is always down
pub(crate) struct FailingMembership;

#[async_trait]
impl SpaceMembership for FailingMembership {
    async fn members_of(&self, _space_id: &str) -> Result<Vec<SpaceMember>, ClientError> {
        Err(ClientError::InvalidResponse {
            message: "directory unavailable".to_string(),
        })
    }
}

/// OCR provider returning canned text, optionally after a delay
pub(crate) struct ScriptedOcr {
    text: String,
    delay: Option<Duration>,
}

impl ScriptedOcr {
    pub fn returning(text: &str) -> Self {
        Self {
            text: text.to_string(),
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl OcrProvider for ScriptedOcr {
    async fn recognize(&self, _file_name: &str, _data: &[u8]) -> Result<String, ClientError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.text.clone())
    }
}

/// Chat model with a canned reply that records every request
pub(crate) struct ScriptedChat {
    reply: String,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedChat {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatModel for ScriptedChat {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ClientError> {
        self.requests.lock().unwrap().push(messages.to_vec());
        Ok(self.reply.clone())
    }
}

/// In-memory index that can be told to fail or stall writes
#[derive(Default)]
pub(crate) struct FlakyIndex {
    pub inner: MemoryVectorIndex,
    fail_upserts: AtomicBool,
    fail_deletes: AtomicBool,
    upsert_delay_ms: AtomicU64,
    upserts: AtomicUsize,
}

impl FlakyIndex {
    pub fn delay_upserts(&self, delay: Duration) {
        self.upsert_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn fail_upserts(&self, fail: bool) {
        self.fail_upserts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    pub fn upsert_calls(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }

    fn unavailable() -> ClientError {
        ClientError::Status {
            url: "memory://points".to_string(),
            status: 503,
            message: "index unavailable".to_string(),
        }
    }
}

#[async_trait]
impl VectorIndex for FlakyIndex {
    async fn ensure_collection(&self, vector_size: usize) -> Result<(), ClientError> {
        self.inner.ensure_collection(vector_size).await
    }

    async fn upsert(&self, points: Vec<VectorPoint>) -> Result<(), ClientError> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        let delay = self.upsert_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail_upserts.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        self.inner.upsert(points).await
    }

    async fn delete(&self, ids: &[String]) -> Result<(), ClientError> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        self.inner.delete(ids).await
    }

    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: &PayloadFilter,
    ) -> Result<Vec<ScoredPoint>, ClientError> {
        self.inner.search(vector, top_k, filter).await
    }
}

/// A fully wired service over a scratch directory
pub(crate) struct TestHarness {
    pub _dir: TempDir,
    pub service: Arc<KnowledgeBaseService>,
    pub index: Arc<FlakyIndex>,
    pub blobs: Arc<FsBlobStore>,
    pub runtime: Arc<RuntimeConfig>,
}

pub(crate) struct HarnessBuilder {
    config: DynamicConfig,
    ocr: Option<Arc<dyn OcrProvider>>,
    membership: Option<Arc<dyn SpaceMembership>>,
    chat: Option<Arc<dyn ChatModel>>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> HarnessBuilder {
        HarnessBuilder {
            config: DynamicConfig::default(),
            ocr: None,
            membership: None,
            chat: None,
        }
    }

    pub fn new_document(&self, file_name: &str) -> NewDocument {
        NewDocument {
            title: file_name.to_string(),
            file_name: file_name.to_string(),
            content_type: None,
            space_id: "space-1".to_string(),
            sub_space_id: Some("sub-1".to_string()),
            class_id: None,
            need_approval: false,
            uploaded_by: "uploader".to_string(),
        }
    }

    /// Upload and run the pipeline inline, without the worker queue
    pub async fn ingest(&self, new: NewDocument, data: &[u8]) -> Document {
        let uploaded = self
            .service
            .upload_document(new, bytes::Bytes::copy_from_slice(data))
            .await
            .unwrap();
        self.service.process_document(&uploaded.id).await.unwrap()
    }

    /// Poll until the document satisfies `done`, or panic after a few seconds
    pub async fn wait_for(&self, document_id: &str, done: impl Fn(&Document) -> bool) -> Document {
        for _ in 0..200 {
            let document = self.service.get_document(document_id).unwrap();
            if done(&document) {
                return document;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("document {} did not reach the expected state", document_id);
    }
}

impl HarnessBuilder {
    pub fn members(mut self, members: &[(&str, &[&str])]) -> Self {
        let membership = members_config("space-1", members).membership;
        self.config.membership = membership;
        self
    }

    pub fn ocr(mut self, ocr: impl OcrProvider + 'static) -> Self {
        self.ocr = Some(Arc::new(ocr));
        self
    }

    pub fn membership(mut self, membership: impl SpaceMembership + 'static) -> Self {
        self.membership = Some(Arc::new(membership));
        self
    }

    pub fn chat(mut self, chat: Arc<dyn ChatModel>) -> Self {
        self.chat = Some(chat);
        self
    }

    pub fn configure(mut self, f: impl FnOnce(&mut DynamicConfig)) -> Self {
        f(&mut self.config);
        self
    }

    pub fn build(self) -> TestHarness {
        let (dir, db) = temp_database();
        let runtime = Arc::new(RuntimeConfig::new(StaticConfig::default(), self.config));
        let index = Arc::new(FlakyIndex::default());
        let blobs = Arc::new(FsBlobStore::new(dir.path().join("blobs")));
        let membership: Arc<dyn SpaceMembership> = match self.membership {
            Some(membership) => membership,
            None => Arc::new(ConfigMembership::new(runtime.clone())),
        };

        let service = Arc::new(KnowledgeBaseService::new(
            runtime.clone(),
            Arc::new(db),
            Collaborators {
                blobs: blobs.clone(),
                embeddings: Arc::new(HashedEmbeddings::new(TEST_DIMENSIONS)),
                vector_index: index.clone(),
                ocr: self.ocr,
                membership,
                chat: self.chat,
            },
        ));

        TestHarness {
            _dir: dir,
            service,
            index,
            blobs,
            runtime,
        }
    }
}
