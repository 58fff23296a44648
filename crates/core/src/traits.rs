use crate::{
    Answer, Document, DocumentId, NewChunk, NewDocument, Question, QuestionId, StoreError,
    StoredChunk,
};
use async_trait::async_trait;

#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Appends one chunk. A second chunk with the same index for the same
    /// document is a `StoreError::Conflict`.
    async fn append_chunk(
        &self,
        document_id: DocumentId,
        chunk: NewChunk,
    ) -> Result<StoredChunk, StoreError>;

    /// All chunks of a document in ascending index order.
    async fn list_chunks(&self, document_id: DocumentId) -> Result<Vec<StoredChunk>, StoreError>;
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn create_document(&self, document: NewDocument) -> Result<Document, StoreError>;

    async fn get_document(&self, id: DocumentId) -> Result<Option<Document>, StoreError>;
}

#[async_trait]
pub trait QuestionStore: Send + Sync {
    async fn create_question(
        &self,
        document_id: DocumentId,
        content: &str,
    ) -> Result<Question, StoreError>;

    async fn get_question(&self, id: QuestionId) -> Result<Option<Question>, StoreError>;

    /// A question has at most one answer.
    async fn create_answer(
        &self,
        question_id: QuestionId,
        content: &str,
    ) -> Result<Answer, StoreError>;

    async fn get_answer(&self, question_id: QuestionId) -> Result<Option<Answer>, StoreError>;
}
