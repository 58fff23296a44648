use crate::retriever::Retriever;
use crate::synthesizer::{error_answer, AnswerMode, AnswerSynthesizer, SynthesizedAnswer};
use crate::traits::{ChunkStore, QuestionStore};
use crate::{Answer, AnswerError, DocumentId, QuestionId, StoreError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub const NO_CONTENT_MESSAGE: &str = "No document content is available to answer this question.";

pub struct AnsweringPipeline {
    chunks: Arc<dyn ChunkStore>,
    questions: Arc<dyn QuestionStore>,
    retriever: Retriever,
    synthesizer: AnswerSynthesizer,
    deadline: Duration,
}

impl AnsweringPipeline {
    pub fn new(
        chunks: Arc<dyn ChunkStore>,
        questions: Arc<dyn QuestionStore>,
        retriever: Retriever,
        synthesizer: AnswerSynthesizer,
        deadline: Duration,
    ) -> Self {
        Self {
            chunks,
            questions,
            retriever,
            synthesizer,
            deadline,
        }
    }

    /// Looks the question up and answers it.
    pub async fn answer_question(&self, question_id: QuestionId) -> Result<Answer, AnswerError> {
        let question = self
            .questions
            .get_question(question_id)
            .await?
            .ok_or(AnswerError::QuestionNotFound(question_id))?;

        Ok(self
            .answer(question.id, &question.content, question.document_id)
            .await?)
    }

    /// Writes exactly one answer for the question. Retrieval and generation
    /// failures become the answer text; only the final write can fail.
    pub async fn answer(
        &self,
        question_id: QuestionId,
        question: &str,
        document_id: DocumentId,
    ) -> Result<Answer, StoreError> {
        info!(question_id, document_id, state = "retrieving", "answering question");

        let synthesized = match tokio::time::timeout(self.deadline, self.compose(question, document_id)).await {
            Ok(Ok(answer)) => answer,
            Ok(Err(error)) => {
                warn!(question_id, error = %error, "answering failed");
                error_answer(&error)
            }
            Err(_) => {
                let error = AnswerError::Timeout(self.deadline);
                warn!(question_id, error = %error, "answering timed out");
                error_answer(&error)
            }
        };

        let answer = self
            .questions
            .create_answer(question_id, &synthesized.content)
            .await?;
        info!(question_id, mode = ?synthesized.mode, state = "answered", "answer stored");
        Ok(answer)
    }

    async fn compose(
        &self,
        question: &str,
        document_id: DocumentId,
    ) -> Result<SynthesizedAnswer, AnswerError> {
        let chunks = self.chunks.list_chunks(document_id).await?;

        if chunks.iter().all(|chunk| chunk.is_diagnostic()) {
            let mut content = NO_CONTENT_MESSAGE.to_string();
            for chunk in &chunks {
                content.push_str("\n\n");
                content.push_str(&chunk.content);
            }
            return Ok(SynthesizedAnswer {
                content,
                mode: AnswerMode::NoInformation,
            });
        }

        let ranked = self.retriever.retrieve(question, &chunks).await?;
        info!(document_id, retrieved = ranked.len(), state = "synthesizing", "retrieved chunks");
        Ok(self.synthesizer.synthesize(question, &ranked).await)
    }
}
