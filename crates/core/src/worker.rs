use crate::answering::AnsweringPipeline;
use crate::config::WorkerConfig;
use crate::ingest::IngestionPipeline;
use crate::{DocumentId, QuestionId, SubmitError};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

pub type JobId = Uuid;

enum Job {
    Ingest {
        id: JobId,
        document_id: DocumentId,
        source_url: String,
        _claim: InFlightClaim,
    },
    Answer {
        id: JobId,
        question_id: QuestionId,
        question: String,
        document_id: DocumentId,
    },
}

/// Documents with an ingestion job queued or running.
#[derive(Clone, Default)]
struct InFlight {
    documents: Arc<Mutex<HashSet<DocumentId>>>,
}

impl InFlight {
    fn claim(&self, document_id: DocumentId) -> Option<InFlightClaim> {
        let mut documents = self
            .documents
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        documents.insert(document_id).then(|| InFlightClaim {
            document_id,
            documents: Arc::clone(&self.documents),
        })
    }
}

/// Released when the owning job finishes or is dropped unqueued.
struct InFlightClaim {
    document_id: DocumentId,
    documents: Arc<Mutex<HashSet<DocumentId>>>,
}

impl Drop for InFlightClaim {
    fn drop(&mut self) {
        self.documents
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&self.document_id);
    }
}

pub struct WorkerHandle {
    sender: mpsc::Sender<Job>,
    dispatcher: JoinHandle<()>,
    permits: Arc<Semaphore>,
    concurrency: u32,
    in_flight: InFlight,
}

/// Starts the dispatcher on the current tokio runtime.
pub fn spawn_worker(
    ingestion: Arc<IngestionPipeline>,
    answering: Arc<AnsweringPipeline>,
    config: &WorkerConfig,
) -> WorkerHandle {
    let concurrency = u32::try_from(config.concurrency.max(1)).unwrap_or(u32::MAX);
    let permits = Arc::new(Semaphore::new(concurrency as usize));
    let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));

    let dispatcher = tokio::spawn(dispatch(
        receiver,
        ingestion,
        answering,
        Arc::clone(&permits),
    ));

    info!(concurrency, queue_capacity = config.queue_capacity, "worker started");
    WorkerHandle {
        sender,
        dispatcher,
        permits,
        concurrency,
        in_flight: InFlight::default(),
    }
}

impl WorkerHandle {
    /// Queues ingestion of one document. Rejected while an earlier ingestion
    /// of the same document is still queued or running.
    pub fn ingest(&self, document_id: DocumentId, source_url: &str) -> Result<JobId, SubmitError> {
        let claim = self
            .in_flight
            .claim(document_id)
            .ok_or(SubmitError::AlreadyInFlight(document_id))?;

        let id = Uuid::new_v4();
        self.enqueue(Job::Ingest {
            id,
            document_id,
            source_url: source_url.to_string(),
            _claim: claim,
        })?;

        info!(job = %id, document_id, "queued ingestion");
        Ok(id)
    }

    pub fn answer(
        &self,
        question_id: QuestionId,
        question: &str,
        document_id: DocumentId,
    ) -> Result<JobId, SubmitError> {
        let id = Uuid::new_v4();
        self.enqueue(Job::Answer {
            id,
            question_id,
            question: question.to_string(),
            document_id,
        })?;

        info!(job = %id, question_id, document_id, "queued answer");
        Ok(id)
    }

    fn enqueue(&self, job: Job) -> Result<(), SubmitError> {
        self.sender.try_send(job).map_err(|error| match error {
            TrySendError::Full(_) => SubmitError::QueueFull,
            TrySendError::Closed(_) => SubmitError::Closed,
        })
    }

    /// Stops accepting jobs, drains the queue and waits for running jobs.
    pub async fn shutdown(self) {
        let Self {
            sender,
            dispatcher,
            permits,
            concurrency,
            ..
        } = self;

        drop(sender);
        if let Err(error) = dispatcher.await {
            warn!(error = %error, "worker dispatcher ended abnormally");
        }

        if permits.acquire_many(concurrency).await.is_err() {
            warn!("worker semaphore closed during shutdown");
        }
        info!("worker stopped");
    }
}

async fn dispatch(
    mut receiver: mpsc::Receiver<Job>,
    ingestion: Arc<IngestionPipeline>,
    answering: Arc<AnsweringPipeline>,
    permits: Arc<Semaphore>,
) {
    while let Some(job) = receiver.recv().await {
        let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
            break;
        };

        let ingestion = Arc::clone(&ingestion);
        let answering = Arc::clone(&answering);
        tokio::spawn(async move {
            run_job(job, &ingestion, &answering).await;
            drop(permit);
        });
    }
}

async fn run_job(job: Job, ingestion: &IngestionPipeline, answering: &AnsweringPipeline) {
    match job {
        Job::Ingest {
            id,
            document_id,
            source_url,
            _claim,
        } => match ingestion.ingest(document_id, &source_url).await {
            Ok(report) => {
                info!(job = %id, document_id, outcome = ?report.outcome, "ingestion job finished")
            }
            Err(error) => error!(job = %id, document_id, error = %error, "ingestion job failed"),
        },
        Job::Answer {
            id,
            question_id,
            question,
            document_id,
        } => match answering.answer(question_id, &question, document_id).await {
            Ok(answer) => info!(job = %id, question_id, answer_id = answer.id, "answer job finished"),
            Err(error) => error!(job = %id, question_id, error = %error, "answer job failed"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::ChunkingConfig;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::extractor::{ExtractedPdf, Extraction, PageText, TextSource};
    use crate::retriever::Retriever;
    use crate::stores::MemoryStore;
    use crate::synthesizer::AnswerSynthesizer;
    use crate::traits::{ChunkStore, QuestionStore};
    use async_trait::async_trait;
    use std::time::Duration;
    use url::Url;

    struct StaticSource;

    #[async_trait]
    impl TextSource for StaticSource {
        async fn extract(&self, _url: &Url) -> Extraction {
            Extraction::Pages(ExtractedPdf {
                checksum: "feed".to_string(),
                byte_len: 4,
                strategy: "static",
                pages: vec![PageText {
                    number: 1,
                    text: "Filters are replaced every six months.".to_string(),
                }],
            })
        }
    }

    fn worker(store: &Arc<MemoryStore>, config: &WorkerConfig) -> WorkerHandle {
        let embedder = Arc::new(CharacterNgramEmbedder::default());
        let ingestion = IngestionPipeline::new(
            Arc::new(StaticSource),
            ChunkingConfig::default(),
            embedder.clone(),
            store.clone(),
            store.clone(),
            None,
        )
        .expect("pipeline");
        let answering = AnsweringPipeline::new(
            store.clone(),
            store.clone(),
            Retriever::new(embedder, 2),
            AnswerSynthesizer::new(None, 250),
            Duration::from_secs(5),
        );
        spawn_worker(Arc::new(ingestion), Arc::new(answering), config)
    }

    #[tokio::test]
    async fn queued_ingestion_runs_before_shutdown_returns() {
        let store = Arc::new(MemoryStore::new());
        let handle = worker(&store, &WorkerConfig::default());

        handle.ingest(1, "https://files.example.com/a.pdf").expect("queued");
        handle.shutdown().await;

        let chunks = store.list_chunks(1).await.expect("chunks");
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].content.contains("six months"));
    }

    #[tokio::test]
    async fn duplicate_ingestion_is_rejected_while_queued() {
        let store = Arc::new(MemoryStore::new());
        let handle = worker(&store, &WorkerConfig::default());

        handle.ingest(2, "https://files.example.com/a.pdf").expect("queued");
        let duplicate = handle.ingest(2, "https://files.example.com/a.pdf");
        let other = handle.ingest(3, "https://files.example.com/b.pdf");

        assert_eq!(duplicate, Err(SubmitError::AlreadyInFlight(2)));
        assert!(other.is_ok());
        handle.shutdown().await;
        assert_eq!(store.list_chunks(2).await.expect("chunks").len(), 1);
    }

    #[tokio::test]
    async fn full_queue_is_reported() {
        let store = Arc::new(MemoryStore::new());
        let config = WorkerConfig {
            concurrency: 1,
            queue_capacity: 1,
        };
        let handle = worker(&store, &config);

        handle.answer(1, "first?", 1).expect("queued");
        assert_eq!(handle.answer(2, "second?", 1), Err(SubmitError::QueueFull));
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn answer_job_stores_an_answer() {
        let store = Arc::new(MemoryStore::new());
        let handle = worker(&store, &WorkerConfig::default());
        handle.ingest(5, "https://files.example.com/a.pdf").expect("queued");
        handle.shutdown().await;

        let question = store
            .create_question(5, "How often are filters replaced?")
            .await
            .expect("question");
        let handle = worker(&store, &WorkerConfig::default());
        handle.answer(question.id, &question.content, 5).expect("queued");
        handle.shutdown().await;

        let answer = store.get_answer(question.id).await.expect("answer");
        assert!(answer.is_some_and(|answer| answer.content.contains("six months")));
    }

    #[test]
    fn claim_is_released_on_drop() {
        let in_flight = InFlight::default();
        let claim = in_flight.claim(7);
        assert!(claim.is_some());
        assert!(in_flight.claim(7).is_none());
        drop(claim);
        assert!(in_flight.claim(7).is_some());
    }
}
