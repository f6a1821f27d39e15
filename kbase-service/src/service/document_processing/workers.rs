//! Background workers draining the processing queue.

use dashmap::DashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::db::DocumentStatus;
use crate::error::{ServiceError, ServiceResult, format_error_chain};
use crate::service::KnowledgeBaseService;

/// Unbounded FIFO of document ids awaiting a pipeline run.
///
/// An id is held at most once between `enqueue` and the moment a worker
/// picks it up, so repeated retries do not pile up duplicate runs.
pub struct ProcessingQueue {
    sender: mpsc::UnboundedSender<String>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    queued: DashSet<String>,
}

impl ProcessingQueue {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Mutex::new(Some(receiver)),
            queued: DashSet::new(),
        }
    }

    /// Returns false when the document is already waiting.
    pub fn enqueue(&self, document_id: &str) -> bool {
        if !self.queued.insert(document_id.to_string()) {
            debug!(doc_id = %document_id, "Document already queued");
            return false;
        }
        if self.sender.send(document_id.to_string()).is_err() {
            // Receiver gone: the workers have shut down
            self.queued.remove(document_id);
            warn!(doc_id = %document_id, "Processing queue is closed; document not queued");
            return false;
        }
        true
    }

    pub fn is_queued(&self, document_id: &str) -> bool {
        self.queued.contains(document_id)
    }

    pub fn len(&self) -> usize {
        self.queued.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queued.is_empty()
    }

    fn take_receiver(&self) -> Option<mpsc::UnboundedReceiver<String>> {
        self.receiver.lock().unwrap().take()
    }

    fn mark_started(&self, document_id: &str) {
        self.queued.remove(document_id);
    }
}

impl Default for ProcessingQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl KnowledgeBaseService {
    /// Start the worker pool.
    ///
    /// At most `pipeline.worker_concurrency` documents are processed at
    /// once. Runs until `shutdown` is cancelled; runs already started are
    /// left to finish on their own tasks. Can only be called once per service.
    pub fn start_document_processing_workers(
        self: Arc<Self>,
        shutdown: CancellationToken,
    ) -> ServiceResult<JoinHandle<()>> {
        let mut receiver = self.queue.take_receiver().ok_or_else(|| ServiceError::Internal {
            message: "Document processing workers already started".to_string(),
        })?;

        let (concurrency, resume) = {
            let config = self.runtime_config.dynamic();
            (
                config.pipeline.worker_concurrency.max(1),
                config.pipeline.resume_interrupted,
            )
        };

        if resume {
            match self.resume_interrupted_documents() {
                Ok(0) => {}
                Ok(count) => info!(count, "Re-queued documents interrupted by a previous shutdown"),
                Err(e) => error!(error = %format_error_chain(&e), "Failed to scan for interrupted documents"),
            }
        }

        let permits = Arc::new(Semaphore::new(concurrency));
        info!(concurrency, "Document processing workers started");

        let handle = tokio::spawn(async move {
            loop {
                let document_id = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    next = receiver.recv() => match next {
                        Some(id) => id,
                        None => break,
                    },
                };

                let permit = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    permit = permits.clone().acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break,
                    },
                };

                self.queue.mark_started(&document_id);
                let service = self.clone();
                tokio::spawn(async move {
                    service.run_queued_document(&document_id).await;
                    drop(permit);
                });
            }
            info!("Document processing workers stopped");
        });

        Ok(handle)
    }

    /// Enqueue every live document left in `uploading`, `processing` or
    /// `vectorizing`. Returns how many were queued.
    pub fn resume_interrupted_documents(&self) -> ServiceResult<usize> {
        let interrupted = self.db.list_documents_with_status(&[
            DocumentStatus::Uploading,
            DocumentStatus::Processing,
            DocumentStatus::Vectorizing,
        ])?;

        let mut queued = 0;
        for document in interrupted {
            if self.is_processing(&document.id) {
                continue;
            }
            if self.queue.enqueue(&document.id) {
                debug!(doc_id = %document.id, status = document.status.as_str(), "Resuming document");
                queued += 1;
            }
        }
        Ok(queued)
    }

    async fn run_queued_document(&self, document_id: &str) {
        match self.process_document(document_id).await {
            Ok(document) => {
                debug!(doc_id = %document_id, status = document.status.as_str(), "Queued run finished");
            }
            Err(e) if e.is_not_found() => {
                warn!(doc_id = %document_id, "Queued document no longer exists");
            }
            Err(e) => {
                error!(doc_id = %document_id, error = %format_error_chain(&e), "Queued run failed");
            }
        }
    }
}
