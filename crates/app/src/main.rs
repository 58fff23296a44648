use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use pdf_qa_core::{
    build_embedder, build_generator, spawn_worker, AnswerSynthesizer, AnsweringConfig,
    AnsweringPipeline, ChunkStore, ChunkingConfig, DocumentId, DocumentStore, EmbeddingConfig,
    EmbeddingProvider, GenerationConfig, GenerationProvider, HttpConfig, IngestionPipeline,
    NewDocument, PdfTextSource, PipelineConfig, QuestionId, QuestionStore, Retriever, SqliteStore,
    WorkerConfig, WorkerHandle,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "pdf-qa", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// SQLite database holding documents, chunks, questions and answers.
    #[arg(long, env = "PDF_QA_DB", default_value = "pdf-qa.sqlite3")]
    db: PathBuf,

    /// Embedding backend: local or openai.
    #[arg(long, env = "PDF_QA_EMBEDDING_PROVIDER", default_value = "local")]
    embedding_provider: EmbeddingProvider,

    #[arg(long, env = "PDF_QA_EMBEDDING_MODEL", default_value = "char-trigram")]
    embedding_model: String,

    #[arg(long, env = "PDF_QA_EMBEDDING_DIMENSIONS", default_value = "128")]
    embedding_dimensions: usize,

    /// Base URL of an OpenAI-compatible embeddings API.
    #[arg(long, env = "PDF_QA_EMBEDDING_URL")]
    embedding_url: Option<String>,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_api_key: Option<String>,

    /// Generation backend: none, huggingface or ollama.
    #[arg(long, env = "PDF_QA_GENERATION_PROVIDER", default_value = "none")]
    generation_provider: GenerationProvider,

    #[arg(
        long,
        env = "PDF_QA_GENERATION_MODEL",
        default_value = "mistralai/Mixtral-8x7B-Instruct-v0.1"
    )]
    generation_model: String,

    /// Full endpoint URL (huggingface) or base URL (ollama).
    #[arg(long, env = "PDF_QA_GENERATION_ENDPOINT")]
    generation_endpoint: Option<String>,

    #[arg(long, env = "HUGGINGFACEHUB_API_TOKEN", hide_env_values = true)]
    huggingface_token: Option<String>,

    /// Prefix for document URLs that are stored as bare keys.
    #[arg(long, env = "PDF_QA_STORAGE_BASE_URL")]
    storage_base_url: Option<String>,

    #[arg(long, default_value = "1000")]
    chunk_size: usize,

    #[arg(long, default_value = "200")]
    chunk_overlap: usize,

    /// Chunks retrieved per question.
    #[arg(long, default_value = "2")]
    top_k: usize,

    #[arg(long, default_value = "30")]
    http_timeout_secs: u64,

    #[arg(long, default_value = "120")]
    answer_timeout_secs: u64,

    #[arg(long, default_value = "4")]
    concurrency: usize,
}

#[derive(Subcommand)]
enum Command {
    /// Register a PDF by URL and ingest it.
    Add {
        /// Download URL or storage key of the PDF.
        #[arg(long)]
        url: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        filename: Option<String>,
        #[arg(long)]
        file_key: Option<String>,
        #[arg(long, default_value = "0")]
        file_size: u64,
        #[arg(long, default_value = "application/pdf")]
        file_type: String,
    },
    /// Ingest a registered document that has no chunks yet.
    Ingest {
        #[arg(long)]
        document_id: DocumentId,
    },
    /// Ask a question about a document and wait for the answer.
    Ask {
        #[arg(long)]
        document_id: DocumentId,
        #[arg(long)]
        question: String,
    },
    /// List the stored chunks of a document.
    Chunks {
        #[arg(long)]
        document_id: DocumentId,
        /// Print full chunk text instead of a preview.
        #[arg(long, default_value_t = false)]
        full: bool,
    },
    /// Print the stored answer of a question.
    Answer {
        #[arg(long)]
        question_id: QuestionId,
    },
}

impl Cli {
    fn pipeline_config(&self) -> PipelineConfig {
        let http = HttpConfig {
            timeout_secs: self.http_timeout_secs,
            ..HttpConfig::default()
        };

        PipelineConfig {
            chunking: ChunkingConfig {
                max_chars: self.chunk_size,
                overlap_chars: self.chunk_overlap,
            },
            embedding: EmbeddingConfig {
                provider: self.embedding_provider,
                model: self.embedding_model.clone(),
                dimensions: self.embedding_dimensions,
                base_url: self.embedding_url.clone(),
                api_key: self.openai_api_key.clone(),
            },
            generation: GenerationConfig {
                provider: self.generation_provider,
                model: self.generation_model.clone(),
                endpoint: self.generation_endpoint.clone(),
                api_token: self.huggingface_token.clone(),
                ..GenerationConfig::default()
            },
            answering: AnsweringConfig {
                top_k: self.top_k,
                timeout_secs: self.answer_timeout_secs,
                ..AnsweringConfig::default()
            },
            http,
            worker: WorkerConfig {
                concurrency: self.concurrency,
                ..WorkerConfig::default()
            },
            storage_base_url: self.storage_base_url.clone(),
        }
    }
}

fn start_worker(config: &PipelineConfig, store: &Arc<SqliteStore>) -> anyhow::Result<WorkerHandle> {
    let embedder = build_embedder(&config.embedding, &config.http)?;
    let generator = build_generator(&config.generation, &config.http)?;

    let ingestion = IngestionPipeline::new(
        Arc::new(PdfTextSource::new(&config.http)?),
        config.chunking,
        embedder.clone(),
        store.clone(),
        store.clone(),
        config.storage_base_url.clone(),
    )?;
    let answering = AnsweringPipeline::new(
        store.clone(),
        store.clone(),
        Retriever::new(embedder, config.answering.top_k),
        AnswerSynthesizer::new(generator, config.answering.context_chars),
        Duration::from_secs(config.answering.timeout_secs),
    );

    Ok(spawn_worker(
        Arc::new(ingestion),
        Arc::new(answering),
        &config.worker,
    ))
}

async fn print_chunk_summary(store: &SqliteStore, document_id: DocumentId) -> anyhow::Result<()> {
    let chunks = store.list_chunks(document_id).await?;
    let embedded = chunks.iter().filter(|chunk| chunk.embedding.is_some()).count();

    match chunks.first() {
        Some(first) if first.is_diagnostic() => {
            println!("document {document_id}: no content stored");
            println!("  diagnostic: {}", first.content);
        }
        _ => println!(
            "document {document_id}: {} chunks stored ({embedded} embedded)",
            chunks.len()
        ),
    }
    Ok(())
}

fn file_name_from_url(url: &str) -> String {
    url.split(['?', '#'])
        .next()
        .and_then(|path| path.rsplit('/').find(|segment| !segment.is_empty()))
        .unwrap_or("document.pdf")
        .to_string()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = cli.pipeline_config();

    let store = Arc::new(
        SqliteStore::open(&cli.db)
            .with_context(|| format!("opening database {}", cli.db.display()))?,
    );
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        db = %cli.db.display(),
        "pdf-qa boot"
    );

    match cli.command {
        Command::Add {
            url,
            title,
            filename,
            file_key,
            file_size,
            file_type,
        } => {
            let filename = filename.unwrap_or_else(|| file_name_from_url(&url));
            let document = store
                .create_document(NewDocument {
                    title: title.unwrap_or_else(|| filename.clone()),
                    filename,
                    file_url: url,
                    file_key,
                    file_size,
                    file_type,
                })
                .await?;
            println!("registered document {} ({})", document.id, document.title);

            let worker = start_worker(&config, &store)?;
            worker.ingest(document.id, &document.file_url)?;
            worker.shutdown().await;

            print_chunk_summary(&store, document.id).await?;
        }
        Command::Ingest { document_id } => {
            let document = store
                .get_document(document_id)
                .await?
                .with_context(|| format!("document {document_id} not found"))?;

            let worker = start_worker(&config, &store)?;
            worker.ingest(document.id, &document.file_url)?;
            worker.shutdown().await;

            print_chunk_summary(&store, document.id).await?;
        }
        Command::Ask {
            document_id,
            question,
        } => {
            store
                .get_document(document_id)
                .await?
                .with_context(|| format!("document {document_id} not found"))?;
            let question = store.create_question(document_id, &question).await?;
            println!("question {}: {}", question.id, question.content);

            let worker = start_worker(&config, &store)?;
            worker.answer(question.id, &question.content, document_id)?;
            worker.shutdown().await;

            match store.get_answer(question.id).await? {
                Some(answer) => println!("{}", answer.content),
                None => println!("no answer was stored for question {}", question.id),
            }
        }
        Command::Chunks { document_id, full } => {
            let chunks = store.list_chunks(document_id).await?;
            if chunks.is_empty() {
                println!("document {document_id} has no chunks");
            }

            for chunk in chunks {
                let text = if full {
                    chunk.content.clone()
                } else {
                    let preview = chunk.content.chars().take(120).collect::<String>();
                    preview.replace('\n', " ")
                };
                println!(
                    "[{}] kind={} embedded={} chars={}",
                    chunk.index,
                    chunk.kind.as_str(),
                    chunk.embedding.is_some(),
                    chunk.content.chars().count()
                );
                println!("  {text}");
            }
        }
        Command::Answer { question_id } => {
            let question = store
                .get_question(question_id)
                .await?
                .with_context(|| format!("question {question_id} not found"))?;
            println!("question: {}", question.content);

            match store.get_answer(question_id).await? {
                Some(answer) => println!(
                    "answer ({}):\n{}",
                    answer.created_at.to_rfc3339(),
                    answer.content
                ),
                None => println!("answer: pending"),
            }
        }
    }

    Ok(())
}
