use crate::traits::{ChunkStore, DocumentStore, QuestionStore};
use crate::{
    Answer, Document, DocumentId, NewChunk, NewDocument, Question, QuestionId, StoreError,
    StoredChunk,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

/// Process-local store. Chunks are not checked against known documents.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    last_id: i64,
    documents: BTreeMap<DocumentId, Document>,
    chunks: HashMap<DocumentId, Vec<StoredChunk>>,
    questions: BTreeMap<QuestionId, Question>,
    answers: HashMap<QuestionId, Answer>,
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChunkStore for MemoryStore {
    async fn append_chunk(
        &self,
        document_id: DocumentId,
        chunk: NewChunk,
    ) -> Result<StoredChunk, StoreError> {
        let mut state = self.state.write().await;
        let id = state.next_id();
        let rows = state.chunks.entry(document_id).or_default();

        if rows.iter().any(|row| row.index == chunk.index) {
            return Err(StoreError::Conflict(format!(
                "document {document_id} already has chunk {}",
                chunk.index
            )));
        }

        let stored = StoredChunk {
            id,
            document_id,
            index: chunk.index,
            content: chunk.content,
            embedding: chunk.embedding,
            kind: chunk.kind,
        };
        rows.push(stored.clone());
        Ok(stored)
    }

    async fn list_chunks(&self, document_id: DocumentId) -> Result<Vec<StoredChunk>, StoreError> {
        let state = self.state.read().await;
        let mut rows = state.chunks.get(&document_id).cloned().unwrap_or_default();
        rows.sort_by_key(|row| row.index);
        Ok(rows)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn create_document(&self, document: NewDocument) -> Result<Document, StoreError> {
        let mut state = self.state.write().await;
        let id = state.next_id();
        let stored = Document {
            id,
            title: document.title,
            filename: document.filename,
            file_url: document.file_url,
            file_key: document.file_key,
            file_size: document.file_size,
            file_type: document.file_type,
            created_at: Utc::now(),
        };
        state.documents.insert(id, stored.clone());
        Ok(stored)
    }

    async fn get_document(&self, id: DocumentId) -> Result<Option<Document>, StoreError> {
        Ok(self.state.read().await.documents.get(&id).cloned())
    }
}

#[async_trait]
impl QuestionStore for MemoryStore {
    async fn create_question(
        &self,
        document_id: DocumentId,
        content: &str,
    ) -> Result<Question, StoreError> {
        let mut state = self.state.write().await;
        let id = state.next_id();
        let question = Question {
            id,
            document_id,
            content: content.to_string(),
            created_at: Utc::now(),
        };
        state.questions.insert(id, question.clone());
        Ok(question)
    }

    async fn get_question(&self, id: QuestionId) -> Result<Option<Question>, StoreError> {
        Ok(self.state.read().await.questions.get(&id).cloned())
    }

    async fn create_answer(
        &self,
        question_id: QuestionId,
        content: &str,
    ) -> Result<Answer, StoreError> {
        let mut state = self.state.write().await;
        if state.answers.contains_key(&question_id) {
            return Err(StoreError::Conflict(format!(
                "question {question_id} is already answered"
            )));
        }

        let id = state.next_id();
        let answer = Answer {
            id,
            question_id,
            content: content.to_string(),
            created_at: Utc::now(),
        };
        state.answers.insert(question_id, answer.clone());
        Ok(answer)
    }

    async fn get_answer(&self, question_id: QuestionId) -> Result<Option<Answer>, StoreError> {
        Ok(self.state.read().await.answers.get(&question_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn chunks_come_back_in_index_order() -> Result<(), StoreError> {
        let store = MemoryStore::new();
        for index in [2, 0, 1] {
            let embedding = (index != 1).then(|| vec![index as f32, 0.5]);
            store
                .append_chunk(7, NewChunk::content(index, format!("chunk {index}"), embedding))
                .await?;
        }

        let chunks = store.list_chunks(7).await?;

        let indices = chunks.iter().map(|chunk| chunk.index).collect::<Vec<_>>();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(chunks[0].embedding, Some(vec![0.0, 0.5]));
        assert_eq!(chunks[1].embedding, None);
        assert_eq!(chunks[2].content, "chunk 2");
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_index_is_a_conflict() -> Result<(), StoreError> {
        let store = MemoryStore::new();
        store.append_chunk(1, NewChunk::content(0, "a", None)).await?;
        let duplicate = store.append_chunk(1, NewChunk::content(0, "b", None)).await;
        assert!(matches!(duplicate, Err(StoreError::Conflict(_))));
        Ok(())
    }

    #[tokio::test]
    async fn questions_take_one_answer() -> Result<(), StoreError> {
        let store = MemoryStore::new();
        let question = store.create_question(3, "What is the pressure?").await?;
        store.create_answer(question.id, "200 bar").await?;

        assert!(store.create_answer(question.id, "again").await.is_err());
        let answer = store.get_answer(question.id).await?;
        assert_eq!(answer.map(|answer| answer.content), Some("200 bar".to_string()));
        Ok(())
    }
}
