use crate::chunking::{chunk_pages, ChunkingConfig, TextChunk};
use crate::embeddings::Embedder;
use crate::extractor::{Extraction, NoTextReason, PageText, TextSource};
use crate::traits::{ChunkStore, DocumentStore};
use crate::{DocumentId, IngestError, NewChunk};
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::{ParseError, Url};

pub const NO_TEXT_DIAGNOSTIC: &str = "No content could be extracted from this document.";
pub const EMPTY_DOCUMENT_DIAGNOSTIC: &str =
    "This document appears to be empty or could not be processed correctly.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Stored { chunks: usize, embedded: usize },
    /// Only a diagnostic chunk was written.
    Diagnostic { reason: String },
}

#[derive(Debug, Clone)]
pub struct IngestionReport {
    pub document_id: DocumentId,
    pub source_url: Option<Url>,
    pub checksum: Option<String>,
    pub pages: usize,
    pub outcome: IngestOutcome,
}

pub struct IngestionPipeline {
    source: Arc<dyn TextSource>,
    chunking: ChunkingConfig,
    embedder: Arc<dyn Embedder>,
    chunks: Arc<dyn ChunkStore>,
    documents: Arc<dyn DocumentStore>,
    storage_base_url: Option<String>,
}

impl IngestionPipeline {
    pub fn new(
        source: Arc<dyn TextSource>,
        chunking: ChunkingConfig,
        embedder: Arc<dyn Embedder>,
        chunks: Arc<dyn ChunkStore>,
        documents: Arc<dyn DocumentStore>,
        storage_base_url: Option<String>,
    ) -> Result<Self, IngestError> {
        chunking.validate()?;
        Ok(Self {
            source,
            chunking,
            embedder,
            chunks,
            documents,
            storage_base_url,
        })
    }

    /// Ingests a registered document from its stored URL.
    pub async fn ingest_document(&self, document_id: DocumentId) -> Result<IngestionReport, IngestError> {
        let document = self
            .documents
            .get_document(document_id)
            .await?
            .ok_or(IngestError::DocumentNotFound(document_id))?;

        self.ingest(document_id, &document.file_url).await
    }

    /// Extracts, chunks, embeds and stores one document. Every path that gets
    /// past the duplicate check leaves at least one chunk row behind.
    pub async fn ingest(
        &self,
        document_id: DocumentId,
        source_url: &str,
    ) -> Result<IngestionReport, IngestError> {
        if !self.chunks.list_chunks(document_id).await?.is_empty() {
            return Err(IngestError::AlreadyIngested(document_id));
        }

        let mut report = IngestionReport {
            document_id,
            source_url: None,
            checksum: None,
            pages: 0,
            outcome: IngestOutcome::Diagnostic {
                reason: String::new(),
            },
        };

        let diagnostic = match self.extract(source_url, &mut report).await {
            Ok(pages) => match self.store_pages(document_id, &pages).await {
                Ok((chunks, embedded)) => {
                    report.outcome = IngestOutcome::Stored { chunks, embedded };
                    info!(document_id, chunks, embedded, state = "stored", "ingestion finished");
                    return Ok(report);
                }
                Err(None) => EMPTY_DOCUMENT_DIAGNOSTIC.to_string(),
                Err(Some(error)) => format!("Error processing document: {error}"),
            },
            Err(reason) => format!("{NO_TEXT_DIAGNOSTIC} ({reason})"),
        };

        warn!(document_id, diagnostic = %diagnostic, "storing diagnostic chunk");
        self.chunks
            .append_chunk(document_id, NewChunk::diagnostic(diagnostic.clone()))
            .await?;

        report.outcome = IngestOutcome::Diagnostic { reason: diagnostic };
        Ok(report)
    }

    async fn extract(
        &self,
        source_url: &str,
        report: &mut IngestionReport,
    ) -> Result<Vec<PageText>, NoTextReason> {
        let url = resolve_source_url(source_url, self.storage_base_url.as_deref())
            .ok_or_else(|| NoTextReason::InvalidUrl(source_url.to_string()))?;
        info!(document_id = report.document_id, %url, state = "downloading", "ingestion started");
        report.source_url = Some(url.clone());

        match self.source.extract(&url).await {
            Extraction::Pages(pdf) => {
                info!(
                    document_id = report.document_id,
                    pages = pdf.pages.len(),
                    bytes = pdf.byte_len,
                    strategy = pdf.strategy,
                    state = "extracting",
                    "pages extracted"
                );
                report.checksum = Some(pdf.checksum);
                report.pages = pdf.pages.len();
                Ok(pdf.pages)
            }
            Extraction::NoText(reason) => Err(reason),
        }
    }

    /// Returns `(stored, embedded)`. `Err(None)` means chunking produced
    /// nothing to store.
    async fn store_pages(
        &self,
        document_id: DocumentId,
        pages: &[PageText],
    ) -> Result<(usize, usize), Option<IngestError>> {
        let pieces = chunk_pages(pages, self.chunking).map_err(Some)?;
        if pieces.is_empty() {
            return Err(None);
        }

        info!(document_id, chunks = pieces.len(), state = "chunking", "chunked pages");
        let (stored, embedded) = self.store_chunks(document_id, &pieces).await;

        if stored == 0 {
            return Err(Some(IngestError::NothingStored(document_id)));
        }
        Ok((stored, embedded))
    }

    async fn store_chunks(&self, document_id: DocumentId, pieces: &[TextChunk]) -> (usize, usize) {
        let mut next_index = 0u32;
        let mut embedded = 0usize;

        for (position, piece) in pieces.iter().enumerate() {
            let embedding = match self.embedder.embed(&piece.text).await {
                Ok(vector) => Some(vector),
                Err(error) => {
                    warn!(document_id, chunk = position, error = %error, "embedding failed; storing chunk without vector");
                    None
                }
            };
            let has_embedding = embedding.is_some();

            let first = self
                .chunks
                .append_chunk(
                    document_id,
                    NewChunk::content(next_index, piece.text.clone(), embedding),
                )
                .await;

            let stored_with_embedding = match first {
                Ok(_) => has_embedding,
                Err(error) => {
                    warn!(document_id, chunk = next_index, error = %error, "chunk write failed; retrying without embedding");
                    match self
                        .chunks
                        .append_chunk(
                            document_id,
                            NewChunk::content(next_index, piece.text.clone(), None),
                        )
                        .await
                    {
                        Ok(_) => false,
                        Err(error) => {
                            warn!(document_id, chunk = next_index, error = %error, "dropping chunk after retry");
                            continue;
                        }
                    }
                }
            };

            debug!(document_id, chunk = next_index, page = piece.page, "stored chunk");
            next_index += 1;
            if stored_with_embedding {
                embedded += 1;
            }
        }

        (next_index as usize, embedded)
    }
}

/// Absolute `http(s)` URLs pass through. A bare storage key is joined onto
/// `base`, or given an `https://` scheme when no base is configured.
pub fn resolve_source_url(raw: &str, base: Option<&str>) -> Option<Url> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    match Url::parse(raw) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Some(url),
        Ok(_) => None,
        Err(ParseError::RelativeUrlWithoutBase) => {
            let derived = match base {
                Some(base) => Url::parse(&format!("{}/", base.trim_end_matches('/')))
                    .and_then(|base| base.join(raw.trim_start_matches('/'))),
                None => Url::parse(&format!("https://{}", raw.trim_start_matches('/'))),
            };
            derived.ok()
        }
        Err(_) => None,
    }
}
