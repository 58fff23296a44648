use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type DocumentId = i64;
pub type QuestionId = i64;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub id: DocumentId,
    pub title: String,
    pub filename: String,
    pub file_url: String,
    pub file_key: Option<String>,
    pub file_size: u64,
    pub file_type: String,
    pub created_at: DateTime<Utc>,
}

/// Metadata handed over by the upload broker once the bytes are stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewDocument {
    pub title: String,
    pub filename: String,
    pub file_url: String,
    pub file_key: Option<String>,
    pub file_size: u64,
    pub file_type: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChunkKind {
    Content,
    /// Placeholder explaining why a document produced no content.
    Diagnostic,
}

impl ChunkKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChunkKind::Content => "content",
            ChunkKind::Diagnostic => "diagnostic",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "content" => Some(ChunkKind::Content),
            "diagnostic" => Some(ChunkKind::Diagnostic),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewChunk {
    pub index: u32,
    pub content: String,
    pub embedding: Option<Vec<f32>>,
    pub kind: ChunkKind,
}

impl NewChunk {
    pub fn content(index: u32, content: impl Into<String>, embedding: Option<Vec<f32>>) -> Self {
        Self {
            index,
            content: content.into(),
            embedding,
            kind: ChunkKind::Content,
        }
    }

    pub fn diagnostic(content: impl Into<String>) -> Self {
        Self {
            index: 0,
            content: content.into(),
            embedding: None,
            kind: ChunkKind::Diagnostic,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredChunk {
    pub id: i64,
    pub document_id: DocumentId,
    pub index: u32,
    pub content: String,
    pub embedding: Option<Vec<f32>>,
    pub kind: ChunkKind,
}

impl StoredChunk {
    pub fn is_diagnostic(&self) -> bool {
        self.kind == ChunkKind::Diagnostic
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Question {
    pub id: QuestionId,
    pub document_id: DocumentId,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Answer {
    pub id: i64,
    pub question_id: QuestionId,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RankedChunk {
    pub chunk: StoredChunk,
    pub score: f32,
}
