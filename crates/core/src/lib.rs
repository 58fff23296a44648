pub mod answering;
pub mod chunking;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod generation;
pub(crate) mod http;
pub mod ingest;
pub mod models;
pub mod retriever;
pub mod stores;
pub mod synthesizer;
pub mod traits;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_support;

pub use answering::{AnsweringPipeline, NO_CONTENT_MESSAGE};
pub use chunking::{chunk_pages, chunk_text, normalize_whitespace, ChunkingConfig, TextChunk};
pub use config::{
    AnsweringConfig, EmbeddingConfig, EmbeddingProvider, GenerationConfig, GenerationProvider,
    HttpConfig, PipelineConfig, WorkerConfig,
};
pub use embeddings::{
    build_embedder, cosine_similarity, CharacterNgramEmbedder, Embedder, HttpEmbedder,
    DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{
    AnswerError, EmbeddingError, GenerationError, IngestError, StoreError, SubmitError,
    TransportError,
};
pub use extractor::{
    extract_page_texts, extract_with, ExtractedPdf, Extraction, NoTextReason, PageText, PdfExtractor,
    PdfTextSource, TextSource,
};
pub use generation::{build_generator, HuggingFaceGenerator, OllamaGenerator, TextGenerator};
pub use ingest::{resolve_source_url, IngestOutcome, IngestionPipeline, IngestionReport};
pub use models::{
    Answer, ChunkKind, Document, DocumentId, NewChunk, NewDocument, Question, QuestionId,
    RankedChunk, StoredChunk,
};
pub use retriever::{Retriever, DEFAULT_TOP_K};
pub use stores::{MemoryStore, SqliteStore};
pub use synthesizer::{AnswerMode, AnswerSynthesizer, SynthesizedAnswer};
pub use traits::{ChunkStore, DocumentStore, QuestionStore};
pub use worker::{spawn_worker, JobId, WorkerHandle};
