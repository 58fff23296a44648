use crate::generation::TextGenerator;
use crate::RankedChunk;
use std::fmt::Display;
use std::sync::Arc;
use tracing::warn;

pub const NO_INFORMATION_MESSAGE: &str =
    "I couldn't find any relevant information in the document to answer your question.";
pub const GENERATION_NOT_CONFIGURED_NOTE: &str =
    "(Note: To get an AI-generated answer, please configure a generation backend.)";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerMode {
    Generated,
    Excerpts,
    NoInformation,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesizedAnswer {
    pub content: String,
    pub mode: AnswerMode,
}

pub struct AnswerSynthesizer {
    generator: Option<Arc<dyn TextGenerator>>,
    context_chars: usize,
}

impl AnswerSynthesizer {
    pub fn new(generator: Option<Arc<dyn TextGenerator>>, context_chars: usize) -> Self {
        Self {
            generator,
            context_chars,
        }
    }

    pub async fn synthesize(&self, question: &str, chunks: &[RankedChunk]) -> SynthesizedAnswer {
        if chunks.is_empty() {
            return SynthesizedAnswer {
                content: NO_INFORMATION_MESSAGE.to_string(),
                mode: AnswerMode::NoInformation,
            };
        }

        let Some(generator) = &self.generator else {
            return SynthesizedAnswer {
                content: excerpt_answer(question, chunks),
                mode: AnswerMode::Excerpts,
            };
        };

        let prompt = build_prompt(question, chunks, self.context_chars);
        match generator.generate(&prompt).await {
            Ok(content) => SynthesizedAnswer {
                content,
                mode: AnswerMode::Generated,
            },
            Err(error) => {
                warn!(backend = generator.name(), error = %error, "generation failed");
                error_answer(&error)
            }
        }
    }
}

/// Each chunk is cut to `context_chars` characters before it reaches the
/// backend.
pub fn build_prompt(question: &str, chunks: &[RankedChunk], context_chars: usize) -> String {
    let context = chunks
        .iter()
        .enumerate()
        .map(|(position, ranked)| {
            let head = ranked
                .chunk
                .content
                .chars()
                .take(context_chars)
                .collect::<String>();
            format!("Document {}:\n{head}...", position + 1)
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    format!("Context: {context}\n\nQuestion: {question}\n\nAnswer:")
}

pub fn excerpt_answer(question: &str, chunks: &[RankedChunk]) -> String {
    let mut answer = format!("Here's what I found in the document related to '{question}':\n\n");
    for (position, ranked) in chunks.iter().enumerate() {
        answer.push_str(&format!(
            "Excerpt {}:\n{}\n\n",
            position + 1,
            ranked.chunk.content
        ));
    }
    answer.push_str(GENERATION_NOT_CONFIGURED_NOTE);
    answer
}

pub fn error_answer(error: &dyn Display) -> SynthesizedAnswer {
    SynthesizedAnswer {
        content: format!("Sorry, I encountered an error: {error}"),
        mode: AnswerMode::Failed,
    }
}
