use crate::embeddings::{cosine_similarity, Embedder};
use crate::{AnswerError, EmbeddingError, RankedChunk, StoredChunk};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

pub const DEFAULT_TOP_K: usize = 2;

/// Flat index over one document's chunks, built per question and dropped
/// afterwards.
struct SimilarityIndex {
    entries: Vec<(StoredChunk, Vec<f32>)>,
    last_error: Option<EmbeddingError>,
}

impl SimilarityIndex {
    async fn build(embedder: &dyn Embedder, chunks: &[StoredChunk]) -> Self {
        let mut seen = HashSet::new();
        let mut entries = Vec::with_capacity(chunks.len());
        let mut reused = 0usize;
        let mut last_error = None;

        for chunk in chunks {
            if chunk.is_diagnostic() || !seen.insert(chunk.index) {
                continue;
            }

            let stored = chunk
                .embedding
                .as_ref()
                .filter(|vector| vector.len() == embedder.dimensions());

            let vector = match stored {
                Some(vector) => {
                    reused += 1;
                    vector.clone()
                }
                None => match embedder.embed(&chunk.content).await {
                    Ok(vector) => vector,
                    Err(error) => {
                        warn!(chunk = chunk.index, error = %error, "skipping chunk that could not be embedded");
                        last_error = Some(error);
                        continue;
                    }
                },
            };

            entries.push((chunk.clone(), vector));
        }

        debug!(indexed = entries.len(), reused, "built similarity index");
        Self {
            entries,
            last_error,
        }
    }

    fn search(&self, query: &[f32], top_k: usize) -> Vec<RankedChunk> {
        let mut ranked = self
            .entries
            .iter()
            .map(|(chunk, vector)| RankedChunk {
                chunk: chunk.clone(),
                score: cosine_similarity(query, vector),
            })
            .collect::<Vec<_>>();

        ranked.sort_by(|left, right| {
            right
                .score
                .total_cmp(&left.score)
                .then_with(|| left.chunk.index.cmp(&right.chunk.index))
        });
        ranked.truncate(top_k);
        ranked
    }
}

pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    top_k: usize,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn Embedder>, top_k: usize) -> Self {
        Self {
            embedder,
            top_k: top_k.max(1),
        }
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    pub async fn retrieve(
        &self,
        question: &str,
        chunks: &[StoredChunk],
    ) -> Result<Vec<RankedChunk>, AnswerError> {
        self.retrieve_top(question, chunks, self.top_k).await
    }

    /// Up to `top_k` content chunks, best first; equal scores keep index order.
    pub async fn retrieve_top(
        &self,
        question: &str,
        chunks: &[StoredChunk],
        top_k: usize,
    ) -> Result<Vec<RankedChunk>, AnswerError> {
        if top_k == 0 || chunks.iter().all(StoredChunk::is_diagnostic) {
            return Ok(Vec::new());
        }

        let query = self.embedder.embed(question).await?;

        let mut index = SimilarityIndex::build(self.embedder.as_ref(), chunks).await;
        if index.entries.is_empty() {
            // Every content chunk failed to embed.
            let error = index.last_error.take().unwrap_or_else(|| {
                EmbeddingError::BackendResponse {
                    backend: self.embedder.model().to_string(),
                    details: "no chunk could be embedded".to_string(),
                }
            });
            return Err(error.into());
        }

        Ok(index.search(&query, top_k))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::{ChunkKind, EmbeddingError};
    use async_trait::async_trait;

    fn chunk(index: u32, content: &str) -> StoredChunk {
        StoredChunk {
            id: i64::from(index) + 1,
            document_id: 1,
            index,
            content: content.to_string(),
            embedding: None,
            kind: ChunkKind::Content,
        }
    }

    fn manual_chunks() -> Vec<StoredChunk> {
        vec![
            chunk(0, "Safety notice: wear gloves and eye protection at all times."),
            chunk(1, "The hydraulic pump operates at a maximum pressure of 250 bar."),
            chunk(2, "Warranty terms cover parts and labour for two years."),
            chunk(3, "Replace the hydraulic pump seals when pressure drops below 200 bar."),
            chunk(4, "Contact support by email for spare part orders."),
        ]
    }

    fn retriever(top_k: usize) -> Retriever {
        Retriever::new(Arc::new(CharacterNgramEmbedder::default()), top_k)
    }

    /// Maps every text to the same vector, so every score ties.
    struct ConstantEmbedder;

    #[async_trait]
    impl Embedder for ConstantEmbedder {
        fn model(&self) -> &str {
            "constant"
        }

        fn dimensions(&self) -> usize {
            2
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            Ok(vec![1.0, 0.0])
        }
    }

    /// Embeds short questions but rejects anything longer.
    struct QuestionOnlyEmbedder;

    #[async_trait]
    impl Embedder for QuestionOnlyEmbedder {
        fn model(&self) -> &str {
            "question-only"
        }

        fn dimensions(&self) -> usize {
            2
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            if text.len() > 20 {
                return Err(EmbeddingError::BackendResponse {
                    backend: "question-only".to_string(),
                    details: "backend unreachable".to_string(),
                });
            }
            Ok(vec![1.0, 0.0])
        }
    }

    #[tokio::test]
    async fn top_two_of_five_is_best_first_and_stable() -> Result<(), AnswerError> {
        let retriever = retriever(2);
        let chunks = manual_chunks();

        let first = retriever.retrieve("hydraulic pump pressure", &chunks).await?;
        let second = retriever.retrieve("hydraulic pump pressure", &chunks).await?;

        assert_eq!(first.len(), 2);
        assert!(first[0].score >= first[1].score);
        let mut picked = first.iter().map(|hit| hit.chunk.index).collect::<Vec<_>>();
        picked.sort_unstable();
        assert_eq!(picked, vec![1, 3]);
        assert_eq!(first, second);
        Ok(())
    }

    #[tokio::test]
    async fn oversized_k_returns_every_chunk_once() -> Result<(), AnswerError> {
        let chunks = manual_chunks();
        let mut with_duplicate = chunks.clone();
        with_duplicate.push(chunk(2, "Warranty terms cover parts and labour for two years."));

        let hits = retriever(2).retrieve_top("warranty", &with_duplicate, 50).await?;

        assert_eq!(hits.len(), chunks.len());
        let unique = hits.iter().map(|hit| hit.chunk.index).collect::<HashSet<_>>();
        assert_eq!(unique.len(), chunks.len());
        assert!(hits.windows(2).all(|pair| pair[0].score >= pair[1].score));
        Ok(())
    }

    #[tokio::test]
    async fn zero_chunks_yield_empty_result() -> Result<(), AnswerError> {
        assert!(retriever(3).retrieve("anything", &[]).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn ties_break_on_lower_index() -> Result<(), AnswerError> {
        let retriever = Retriever::new(Arc::new(ConstantEmbedder), 3);
        let chunks = vec![chunk(4, "e"), chunk(0, "a"), chunk(2, "c"), chunk(1, "b")];

        let hits = retriever.retrieve("question", &chunks).await?;

        let order = hits.iter().map(|hit| hit.chunk.index).collect::<Vec<_>>();
        assert_eq!(order, vec![0, 1, 2]);
        Ok(())
    }

    #[tokio::test]
    async fn unembeddable_chunks_surface_the_backend_error() {
        let retriever = Retriever::new(Arc::new(QuestionOnlyEmbedder), 2);

        let result = retriever.retrieve("pump pressure", &manual_chunks()).await;

        match result {
            Err(AnswerError::Embedding(error)) => {
                assert!(error.to_string().contains("backend unreachable"))
            }
            other => panic!("expected an embedding error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn stored_vectors_are_reused_and_diagnostics_skipped() -> Result<(), AnswerError> {
        let retriever = Retriever::new(Arc::new(ConstantEmbedder), 5);
        let mut preferred = chunk(3, "text that would embed to the constant vector");
        preferred.embedding = Some(vec![1.0, 0.0]);
        let mut orthogonal = chunk(0, "stored vector points elsewhere");
        orthogonal.embedding = Some(vec![0.0, 1.0]);
        let mut diagnostic = chunk(1, "No content could be extracted from this document.");
        diagnostic.kind = ChunkKind::Diagnostic;

        let hits = retriever
            .retrieve("question", &[orthogonal, diagnostic, preferred])
            .await?;

        let order = hits.iter().map(|hit| hit.chunk.index).collect::<Vec<_>>();
        assert_eq!(order, vec![3, 0]);
        assert!(hits[1].score.abs() < 1e-6);
        Ok(())
    }
}
