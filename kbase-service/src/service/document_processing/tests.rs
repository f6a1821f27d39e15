use bytes::Bytes;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::clients::BlobStore;
use crate::db::DocumentStatus;
use crate::error::ServiceError;
use crate::test_support::{FailingMembership, ScriptedOcr, TestHarness, sample_document};
use crate::workflow::TaskDecision;

fn long_text(chars: usize) -> String {
    "abcdefghij".repeat(chars / 10)
}

fn chunk_vector_ids(harness: &TestHarness, document_id: &str) -> Vec<String> {
    harness
        .service
        .get_document_chunks(document_id)
        .unwrap()
        .into_iter()
        .map(|c| c.vector_id)
        .collect()
}

#[tokio::test]
async fn test_text_document_is_indexed() {
    let harness = TestHarness::new();
    let text = long_text(2000);

    let doc = harness
        .ingest(harness.new_document("guide.txt"), text.as_bytes())
        .await;

    assert_eq!(doc.status, DocumentStatus::PendingPublish);
    assert_eq!(doc.process_progress, 100);
    assert_eq!(doc.vector_count, 3);
    assert_eq!(doc.content.as_deref(), Some(text.as_str()));
    assert!(doc.parse_error.is_none());
    assert!(doc.processed_at.is_some());

    let chunks = harness.service.get_document_chunks(&doc.id).unwrap();
    let indexes: Vec<usize> = chunks.iter().map(|c| c.chunk_index).collect();
    assert_eq!(indexes, vec![0, 1, 2]);

    for chunk in &chunks {
        let payload = harness.index.inner.payload(&chunk.vector_id).unwrap();
        assert_eq!(payload["document_id"], doc.id.as_str());
        assert_eq!(payload["chunk_id"], chunk.id.as_str());
        assert_eq!(payload["space_id"], "space-1");
        assert_eq!(payload["sub_space_id"], "sub-1");
        assert_eq!(payload["content"], chunk.content.as_str());
    }
    assert_eq!(harness.index.inner.len(), 3);
}

#[tokio::test]
async fn test_html_is_stripped_before_indexing() {
    let harness = TestHarness::new();
    let html = "<html><head><style>p { color: red }</style></head><body><p>Hello &amp; welcome</p></body></html>";

    let doc = harness
        .ingest(harness.new_document("page.html"), html.as_bytes())
        .await;

    assert_eq!(doc.status, DocumentStatus::PendingPublish);
    assert_eq!(doc.content.as_deref(), Some("Hello & welcome"));
    assert_eq!(doc.vector_count, 1);
}

#[tokio::test]
async fn test_binary_without_ocr_fails() {
    let harness = TestHarness::new();

    let doc = harness
        .ingest(harness.new_document("scan.bin"), &[0x00, 0x01, 0x02])
        .await;

    assert_eq!(doc.status, DocumentStatus::ProcessFailed);
    assert_eq!(doc.vector_count, 0);
    assert_eq!(doc.process_progress, 0);
    let error = doc.parse_error.unwrap();
    assert!(error.contains("OCR"), "unexpected error: {}", error);
    assert!(harness.index.inner.is_empty());
}

#[tokio::test]
async fn test_ocr_text_is_indexed() {
    let harness = TestHarness::builder()
        .ocr(ScriptedOcr::returning("Invoice total 42"))
        .build();

    let doc = harness
        .ingest(harness.new_document("invoice.png"), &[0x89, 0x50, 0x4e, 0x47])
        .await;

    assert_eq!(doc.status, DocumentStatus::PendingPublish);
    assert_eq!(doc.content.as_deref(), Some("Invoice total 42"));
    assert_eq!(doc.vector_count, 1);
}

#[tokio::test]
async fn test_blank_text_fails() {
    let harness = TestHarness::new();

    let doc = harness
        .ingest(harness.new_document("blank.txt"), b"  \n\t  ")
        .await;

    assert_eq!(doc.status, DocumentStatus::ProcessFailed);
    assert!(doc.parse_error.is_some());
}

#[tokio::test]
async fn test_empty_upload_is_rejected() {
    let harness = TestHarness::new();

    let err = harness
        .service
        .upload_document(harness.new_document("empty.txt"), Bytes::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ServiceError::InvalidRequest { .. }));
    assert!(harness.service.list_documents("space-1").unwrap().is_empty());
    assert!(harness.service.queue().is_empty());
}

#[tokio::test]
async fn test_oversized_upload_is_rejected() {
    let harness = TestHarness::builder()
        .configure(|c| c.limits.max_document_size_bytes = 4)
        .build();

    let err = harness
        .service
        .upload_document(harness.new_document("big.txt"), Bytes::from_static(b"12345"))
        .await
        .unwrap_err();

    assert!(matches!(err, ServiceError::InvalidRequest { .. }));
}

#[tokio::test]
async fn test_blob_write_failure_marks_document_failed() {
    let harness = TestHarness::new();
    // A plain file where the blob root directory should be
    std::fs::write(harness._dir.path().join("blobs"), b"not a directory").unwrap();

    let err = harness
        .service
        .upload_document(harness.new_document("notes.txt"), Bytes::from_static(b"hello"))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Storage(_)));

    let docs = harness.service.list_documents("space-1").unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].status, DocumentStatus::ProcessFailed);
    assert!(docs[0].parse_error.is_some());
    assert!(harness.service.queue().is_empty());
}

#[tokio::test]
async fn test_upload_enqueues_once() {
    let harness = TestHarness::new();

    let doc = harness
        .service
        .upload_document(harness.new_document("notes.txt"), Bytes::from_static(b"hello"))
        .await
        .unwrap();

    assert_eq!(doc.status, DocumentStatus::Uploading);
    assert_eq!(doc.title, "notes.txt");
    assert!(harness.service.queue().is_queued(&doc.id));
    assert!(!harness.service.queue().enqueue(&doc.id));
    assert_eq!(harness.service.queue().len(), 1);
}

#[tokio::test]
async fn test_forced_retry_replaces_chunks() {
    let harness = TestHarness::new();
    let doc = harness
        .ingest(harness.new_document("guide.txt"), long_text(2000).as_bytes())
        .await;
    let old_ids = chunk_vector_ids(&harness, &doc.id);

    let reset = harness.service.retry_process_document(&doc.id, true).unwrap();
    assert_eq!(reset.status, DocumentStatus::Processing);
    assert_eq!(reset.process_progress, 0);
    assert_eq!(reset.retry_count, 1);
    assert!(reset.last_retry_at.is_some());
    assert!(harness.service.queue().is_queued(&doc.id));

    let done = harness.service.process_document(&doc.id).await.unwrap();
    assert_eq!(done.status, DocumentStatus::PendingPublish);
    assert_eq!(done.vector_count, 3);

    let new_ids = chunk_vector_ids(&harness, &doc.id);
    assert_eq!(new_ids.len(), 3);
    for id in &old_ids {
        assert!(!new_ids.contains(id));
        assert!(!harness.index.inner.contains(id));
    }
    for id in &new_ids {
        assert!(harness.index.inner.contains(id));
    }
    assert_eq!(harness.index.inner.len(), 3);
}

#[tokio::test]
async fn test_failed_upsert_keeps_previous_chunks() {
    let harness = TestHarness::new();
    let doc = harness
        .ingest(harness.new_document("guide.txt"), long_text(2000).as_bytes())
        .await;
    let old_ids = chunk_vector_ids(&harness, &doc.id);

    harness.index.fail_upserts(true);
    harness.service.retry_process_document(&doc.id, true).unwrap();
    let failed = harness.service.process_document(&doc.id).await.unwrap();

    assert_eq!(failed.status, DocumentStatus::ProcessFailed);
    assert!(failed.parse_error.unwrap().contains("upsert"));
    assert_eq!(chunk_vector_ids(&harness, &doc.id), old_ids);
    for id in &old_ids {
        assert!(harness.index.inner.contains(id));
    }
    assert_eq!(harness.index.inner.len(), 3);
    assert_eq!(harness.index.upsert_calls(), 2);
}

#[tokio::test]
async fn test_failed_stale_cleanup_still_commits_new_chunks() {
    let harness = TestHarness::new();
    let doc = harness
        .ingest(harness.new_document("guide.txt"), long_text(2000).as_bytes())
        .await;
    let old_ids = chunk_vector_ids(&harness, &doc.id);

    harness.index.fail_deletes(true);
    harness.service.retry_process_document(&doc.id, true).unwrap();
    let done = harness.service.process_document(&doc.id).await.unwrap();

    assert_eq!(done.status, DocumentStatus::PendingPublish);
    let new_ids = chunk_vector_ids(&harness, &doc.id);
    assert_eq!(new_ids.len(), 3);
    for id in &new_ids {
        assert!(harness.index.inner.contains(id));
    }
    // The old points linger but no chunk row points at them
    for id in &old_ids {
        assert!(harness.index.inner.contains(id));
        assert!(!new_ids.contains(id));
    }

    harness.service.publish_document(&doc.id).unwrap();
    let hits = harness
        .service
        .search_knowledge("abcdefghij", "space-1", Some(20))
        .await
        .unwrap();
    let live_chunks: Vec<String> = harness
        .service
        .get_document_chunks(&doc.id)
        .unwrap()
        .into_iter()
        .map(|c| c.id)
        .collect();
    assert_eq!(hits.len(), 3);
    assert!(hits.iter().all(|h| live_chunks.contains(&h.chunk_id)));
}

#[tokio::test]
async fn test_slow_index_does_not_block_other_writers() {
    let harness = TestHarness::new();
    let first = harness
        .service
        .upload_document(harness.new_document("slow.txt"), Bytes::from(long_text(2000)))
        .await
        .unwrap();
    harness.index.delay_upserts(Duration::from_millis(500));

    let service = harness.service.clone();
    let id = first.id.clone();
    let run = tokio::spawn(async move { service.process_document(&id).await });
    harness.wait_for(&first.id, |d| d.process_progress >= 60).await;

    let started = std::time::Instant::now();
    let second = harness
        .service
        .upload_document(harness.new_document("other.txt"), Bytes::from_static(b"other"))
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_millis(400));
    assert!(!run.is_finished());
    assert_eq!(second.status, DocumentStatus::Uploading);

    let done = run.await.unwrap().unwrap();
    assert_eq!(done.status, DocumentStatus::PendingPublish);
    assert_eq!(done.vector_count, 3);
}

#[tokio::test]
async fn test_retry_without_force_only_for_failed_documents() {
    let harness = TestHarness::new();
    let mut settled = sample_document("space-1", "notes.txt");
    settled.status = DocumentStatus::PendingPublish;
    harness.service.db.insert_document(&settled).unwrap();

    let unchanged = harness
        .service
        .retry_process_document(&settled.id, false)
        .unwrap();
    assert_eq!(unchanged.status, DocumentStatus::PendingPublish);
    assert_eq!(unchanged.retry_count, 0);
    assert_eq!(unchanged.version, settled.version);
    assert!(!harness.service.queue().is_queued(&settled.id));

    let failed = harness
        .ingest(harness.new_document("scan.bin"), &[1, 2, 3])
        .await;
    let reset = harness.service.retry_process_document(&failed.id, false).unwrap();
    assert_eq!(reset.status, DocumentStatus::Processing);
    assert_eq!(reset.retry_count, 1);
    assert!(reset.parse_error.is_none());
}

#[tokio::test]
async fn test_retry_unknown_document_is_not_found() {
    let harness = TestHarness::new();
    let err = harness
        .service
        .retry_process_document("missing", true)
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_retry_supersedes_running_pipeline() {
    let harness = TestHarness::builder()
        .ocr(ScriptedOcr::returning("late text").with_delay(Duration::from_millis(300)))
        .build();
    let uploaded = harness
        .service
        .upload_document(harness.new_document("scan.png"), Bytes::from_static(b"img"))
        .await
        .unwrap();

    let service = harness.service.clone();
    let id = uploaded.id.clone();
    let run = tokio::spawn(async move { service.process_document(&id).await });

    harness.wait_for(&uploaded.id, |d| d.process_progress >= 30).await;
    assert!(harness.service.is_processing(&uploaded.id));
    harness.service.retry_process_document(&uploaded.id, true).unwrap();

    let superseded = run.await.unwrap().unwrap();
    assert_eq!(superseded.status, DocumentStatus::Processing);
    assert_eq!(superseded.process_progress, 0);
    assert_eq!(superseded.retry_count, 1);
    assert!(superseded.content.is_none());
    assert!(!harness.service.is_processing(&uploaded.id));
}

#[tokio::test]
async fn test_delete_during_processing_stops_the_run() {
    let harness = TestHarness::builder()
        .ocr(ScriptedOcr::returning("late text").with_delay(Duration::from_millis(300)))
        .build();
    let uploaded = harness
        .service
        .upload_document(harness.new_document("scan.png"), Bytes::from_static(b"img"))
        .await
        .unwrap();

    let service = harness.service.clone();
    let id = uploaded.id.clone();
    let run = tokio::spawn(async move { service.process_document(&id).await });

    harness.wait_for(&uploaded.id, |d| d.process_progress >= 30).await;
    harness.service.delete_document(&uploaded.id).await.unwrap();

    let err = run.await.unwrap().unwrap_err();
    assert!(err.is_not_found());
    assert!(harness.service.get_document_chunks(&uploaded.id).is_err());
    assert!(harness.index.inner.is_empty());
}

#[tokio::test]
async fn test_delete_purges_points_and_blob() {
    let harness = TestHarness::new();
    let doc = harness
        .ingest(harness.new_document("guide.txt"), long_text(2000).as_bytes())
        .await;
    assert!(harness.blobs.exists(&doc.storage_path).await.unwrap());

    harness.service.delete_document(&doc.id).await.unwrap();

    assert!(harness.service.get_document(&doc.id).unwrap_err().is_not_found());
    assert!(harness.service.list_documents("space-1").unwrap().is_empty());
    assert!(harness.index.inner.is_empty());
    assert!(!harness.blobs.exists(&doc.storage_path).await.unwrap());

    let again = harness.service.delete_document(&doc.id).await.unwrap_err();
    assert!(again.is_not_found());
}

#[tokio::test]
async fn test_delete_tolerates_index_failure() {
    let harness = TestHarness::new();
    let doc = harness
        .ingest(harness.new_document("notes.txt"), b"some notes")
        .await;

    harness.index.fail_deletes(true);
    harness.service.delete_document(&doc.id).await.unwrap();

    assert!(harness.service.get_document(&doc.id).unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_publish_requires_pending_publish() {
    let harness = TestHarness::new();
    let failed = harness
        .ingest(harness.new_document("scan.bin"), &[1, 2, 3])
        .await;
    let err = harness.service.publish_document(&failed.id).unwrap_err();
    assert!(matches!(err, ServiceError::InvalidState { .. }));

    let doc = harness
        .ingest(harness.new_document("notes.txt"), b"some notes")
        .await;
    let published = harness.service.publish_document(&doc.id).unwrap();
    assert_eq!(published.status, DocumentStatus::Published);
    assert!(published.published_at.is_some());

    let err = harness.service.publish_document(&doc.id).unwrap_err();
    assert!(matches!(err, ServiceError::InvalidState { .. }));
}

#[tokio::test]
async fn test_approval_required_opens_workflow() {
    let harness = TestHarness::builder()
        .members(&[("alice", &["approver"]), ("bob", &["viewer"])])
        .build();
    let mut new = harness.new_document("policy.txt");
    new.need_approval = true;

    let doc = harness.ingest(new, b"travel policy").await;

    assert_eq!(doc.status, DocumentStatus::PendingApproval);
    assert_eq!(doc.process_progress, 100);
    let workflow_id = doc.workflow_id.clone().unwrap();
    let tasks = harness.service.workflows.get_workflow_tasks(&workflow_id).unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].approver_id, "alice");

    let err = harness.service.publish_document(&doc.id).unwrap_err();
    assert!(matches!(err, ServiceError::InvalidState { .. }));

    let outcome = harness
        .service
        .approve_task(&tasks[0].id, "alice", Some("ok".to_string()), TaskDecision::Approved)
        .await
        .unwrap();
    assert_eq!(outcome.resource_status, Some(DocumentStatus::PendingPublish));

    let approved = harness.service.get_document(&doc.id).unwrap();
    assert_eq!(approved.status, DocumentStatus::PendingPublish);
    harness.service.publish_document(&doc.id).unwrap();
}

#[tokio::test]
async fn test_rejection_fails_document() {
    let harness = TestHarness::builder()
        .members(&[("alice", &["approver"])])
        .build();
    let mut new = harness.new_document("policy.txt");
    new.need_approval = true;
    let doc = harness.ingest(new, b"travel policy").await;
    let tasks = harness
        .service
        .workflows
        .get_workflow_tasks(doc.workflow_id.as_deref().unwrap())
        .unwrap();

    harness
        .service
        .approve_task(&tasks[0].id, "alice", None, TaskDecision::Rejected)
        .await
        .unwrap();

    let rejected = harness.service.get_document(&doc.id).unwrap();
    assert_eq!(rejected.status, DocumentStatus::Failed);
    assert!(rejected.status.is_retryable());
}

#[tokio::test]
async fn test_decision_after_retry_does_not_touch_document() {
    let harness = TestHarness::builder()
        .members(&[("alice", &["approver"])])
        .build();
    let mut new = harness.new_document("policy.txt");
    new.need_approval = true;
    let doc = harness.ingest(new, b"travel policy").await;
    let tasks = harness
        .service
        .workflows
        .get_workflow_tasks(doc.workflow_id.as_deref().unwrap())
        .unwrap();

    harness.service.retry_process_document(&doc.id, true).unwrap();
    harness
        .service
        .approve_task(&tasks[0].id, "alice", None, TaskDecision::Approved)
        .await
        .unwrap();

    let current = harness.service.get_document(&doc.id).unwrap();
    assert_eq!(current.status, DocumentStatus::Processing);
}

#[tokio::test]
async fn test_membership_failure_skips_approval() {
    let harness = TestHarness::builder().membership(FailingMembership).build();
    let mut new = harness.new_document("policy.txt");
    new.need_approval = true;

    let doc = harness.ingest(new, b"travel policy").await;

    assert_eq!(doc.status, DocumentStatus::PendingPublish);
    assert!(doc.workflow_id.is_none());
    assert!(
        harness
            .service
            .workflows
            .current_workflow_for_resource(crate::workflow::DOCUMENT_RESOURCE, &doc.id)
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn test_workers_process_uploaded_documents() {
    let harness = TestHarness::builder()
        .configure(|c| c.pipeline.worker_concurrency = 2)
        .build();
    let shutdown = CancellationToken::new();
    let workers = harness
        .service
        .clone()
        .start_document_processing_workers(shutdown.clone())
        .unwrap();

    let mut ids = Vec::new();
    for name in ["a.txt", "b.txt", "c.txt"] {
        let doc = harness
            .service
            .upload_document(harness.new_document(name), Bytes::from(format!("contents of {}", name)))
            .await
            .unwrap();
        ids.push(doc.id);
    }

    for id in &ids {
        let doc = harness
            .wait_for(id, |d| d.status == DocumentStatus::PendingPublish)
            .await;
        assert_eq!(doc.vector_count, 1);
    }
    assert!(harness.service.queue().is_empty());

    let err = harness
        .service
        .clone()
        .start_document_processing_workers(shutdown.clone())
        .unwrap_err();
    assert!(matches!(err, ServiceError::Internal { .. }));

    shutdown.cancel();
    workers.await.unwrap();
}

#[tokio::test]
async fn test_workers_resume_interrupted_documents() {
    let harness = TestHarness::new();

    let mut interrupted = sample_document("space-1", "notes.txt");
    interrupted.status = DocumentStatus::Vectorizing;
    interrupted.process_progress = 70;
    harness.service.db.insert_document(&interrupted).unwrap();
    harness
        .blobs
        .put(&interrupted.storage_path, Bytes::from_static(b"recovered notes"))
        .await
        .unwrap();

    let mut finished = sample_document("space-1", "done.txt");
    finished.status = DocumentStatus::PendingPublish;
    harness.service.db.insert_document(&finished).unwrap();

    let shutdown = CancellationToken::new();
    let workers = harness
        .service
        .clone()
        .start_document_processing_workers(shutdown.clone())
        .unwrap();

    let doc = harness
        .wait_for(&interrupted.id, |d| d.status == DocumentStatus::PendingPublish)
        .await;
    assert_eq!(doc.content.as_deref(), Some("recovered notes"));

    let untouched = harness.service.get_document(&finished.id).unwrap();
    assert_eq!(untouched.version, 1);

    shutdown.cancel();
    workers.await.unwrap();
}

#[tokio::test]
async fn test_resume_disabled_leaves_documents_alone() {
    let harness = TestHarness::builder()
        .configure(|c| c.pipeline.resume_interrupted = false)
        .build();
    let mut interrupted = sample_document("space-1", "notes.txt");
    interrupted.status = DocumentStatus::Processing;
    harness.service.db.insert_document(&interrupted).unwrap();

    let shutdown = CancellationToken::new();
    let workers = harness
        .service
        .clone()
        .start_document_processing_workers(shutdown.clone())
        .unwrap();

    assert!(!harness.service.queue().is_queued(&interrupted.id));
    shutdown.cancel();
    workers.await.unwrap();

    assert_eq!(
        harness.service.get_document(&interrupted.id).unwrap().status,
        DocumentStatus::Processing
    );
}
