use crate::traits::{ChunkStore, DocumentStore, QuestionStore};
use crate::{
    Answer, ChunkKind, Document, DocumentId, NewChunk, NewDocument, Question, QuestionId,
    StoreError, StoredChunk,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};

const SCHEMA: &str = r#"
    PRAGMA foreign_keys = ON;

    CREATE TABLE IF NOT EXISTS documents (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        title TEXT NOT NULL,
        filename TEXT NOT NULL,
        file_url TEXT NOT NULL,
        file_key TEXT UNIQUE,
        file_size INTEGER NOT NULL,
        file_type TEXT NOT NULL,
        created_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS document_chunks (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        document_id INTEGER NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
        chunk_index INTEGER NOT NULL,
        content TEXT NOT NULL,
        embedding TEXT,
        kind TEXT NOT NULL DEFAULT 'content',
        UNIQUE (document_id, chunk_index)
    );

    CREATE TABLE IF NOT EXISTS questions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        document_id INTEGER NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
        content TEXT NOT NULL,
        created_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS answers (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        question_id INTEGER NOT NULL UNIQUE REFERENCES questions(id) ON DELETE CASCADE,
        content TEXT NOT NULL,
        created_at TEXT NOT NULL
    );
"#;

/// SQLite-backed persistence. Embeddings are stored as JSON arrays.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs `work` on the blocking pool with the connection locked.
    async fn run<T, F>(&self, work: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|error| StoreError::Unavailable(error.to_string()))?;
            work(&guard)
        })
        .await
        .map_err(|error| StoreError::Unavailable(error.to_string()))?
    }
}

fn map_conflict(error: rusqlite::Error, what: String) -> StoreError {
    match &error {
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == ErrorCode::ConstraintViolation =>
        {
            StoreError::Conflict(format!("{what}: {error}"))
        }
        _ => StoreError::Sqlite(error),
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|error| StoreError::Corrupt(format!("timestamp {raw}: {error}")))
}

struct ChunkRow {
    id: i64,
    document_id: i64,
    index: i64,
    content: String,
    embedding: Option<String>,
    kind: String,
}

impl ChunkRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            document_id: row.get(1)?,
            index: row.get(2)?,
            content: row.get(3)?,
            embedding: row.get(4)?,
            kind: row.get(5)?,
        })
    }

    fn into_chunk(self) -> Result<StoredChunk, StoreError> {
        let index = u32::try_from(self.index)
            .map_err(|_| StoreError::Corrupt(format!("chunk index {}", self.index)))?;
        let kind = ChunkKind::parse(&self.kind)
            .ok_or_else(|| StoreError::Corrupt(format!("chunk kind {}", self.kind)))?;
        let embedding = self
            .embedding
            .as_deref()
            .map(serde_json::from_str::<Vec<f32>>)
            .transpose()?;

        Ok(StoredChunk {
            id: self.id,
            document_id: self.document_id,
            index,
            content: self.content,
            embedding,
            kind,
        })
    }
}

fn document_from_row(row: &Row<'_>) -> rusqlite::Result<(Document, String)> {
    let file_size: i64 = row.get(5)?;
    let created_at: String = row.get(7)?;
    Ok((
        Document {
            id: row.get(0)?,
            title: row.get(1)?,
            filename: row.get(2)?,
            file_url: row.get(3)?,
            file_key: row.get(4)?,
            file_size: file_size.max(0) as u64,
            file_type: row.get(6)?,
            created_at: Utc::now(),
        },
        created_at,
    ))
}

#[async_trait]
impl ChunkStore for SqliteStore {
    async fn append_chunk(
        &self,
        document_id: DocumentId,
        chunk: NewChunk,
    ) -> Result<StoredChunk, StoreError> {
        self.run(move |conn| {
            let embedding = chunk
                .embedding
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;

            conn.execute(
                "INSERT INTO document_chunks (document_id, chunk_index, content, embedding, kind)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    document_id,
                    i64::from(chunk.index),
                    chunk.content,
                    embedding,
                    chunk.kind.as_str()
                ],
            )
            .map_err(|error| {
                map_conflict(error, format!("chunk {} of document {document_id}", chunk.index))
            })?;

            Ok(StoredChunk {
                id: conn.last_insert_rowid(),
                document_id,
                index: chunk.index,
                content: chunk.content,
                embedding: chunk.embedding,
                kind: chunk.kind,
            })
        })
        .await
    }

    async fn list_chunks(&self, document_id: DocumentId) -> Result<Vec<StoredChunk>, StoreError> {
        self.run(move |conn| {
            let mut statement = conn.prepare(
                "SELECT id, document_id, chunk_index, content, embedding, kind
                 FROM document_chunks WHERE document_id = ?1 ORDER BY chunk_index ASC",
            )?;
            let rows = statement
                .query_map(params![document_id], ChunkRow::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            rows.into_iter().map(ChunkRow::into_chunk).collect()
        })
        .await
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn create_document(&self, document: NewDocument) -> Result<Document, StoreError> {
        self.run(move |conn| {
            let created_at = Utc::now();
            let file_size = i64::try_from(document.file_size)
                .map_err(|_| StoreError::Corrupt(format!("file size {}", document.file_size)))?;

            conn.execute(
                "INSERT INTO documents (title, filename, file_url, file_key, file_size, file_type, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    document.title,
                    document.filename,
                    document.file_url,
                    document.file_key,
                    file_size,
                    document.file_type,
                    created_at.to_rfc3339()
                ],
            )
            .map_err(|error| map_conflict(error, format!("document {}", document.filename)))?;

            Ok(Document {
                id: conn.last_insert_rowid(),
                title: document.title,
                filename: document.filename,
                file_url: document.file_url,
                file_key: document.file_key,
                file_size: document.file_size,
                file_type: document.file_type,
                created_at,
            })
        })
        .await
    }

    async fn get_document(&self, id: DocumentId) -> Result<Option<Document>, StoreError> {
        self.run(move |conn| {
            let found = conn
                .query_row(
                    "SELECT id, title, filename, file_url, file_key, file_size, file_type, created_at
                     FROM documents WHERE id = ?1",
                    params![id],
                    document_from_row,
                )
                .optional()?;

            found
                .map(|(mut document, created_at)| -> Result<Document, StoreError> {
                    document.created_at = parse_timestamp(&created_at)?;
                    Ok(document)
                })
                .transpose()
        })
        .await
    }
}

#[async_trait]
impl QuestionStore for SqliteStore {
    async fn create_question(
        &self,
        document_id: DocumentId,
        content: &str,
    ) -> Result<Question, StoreError> {
        let content = content.to_string();
        self.run(move |conn| {
            let created_at = Utc::now();
            conn.execute(
                "INSERT INTO questions (document_id, content, created_at) VALUES (?1, ?2, ?3)",
                params![document_id, content, created_at.to_rfc3339()],
            )
            .map_err(|error| map_conflict(error, format!("question on document {document_id}")))?;

            Ok(Question {
                id: conn.last_insert_rowid(),
                document_id,
                content,
                created_at,
            })
        })
        .await
    }

    async fn get_question(&self, id: QuestionId) -> Result<Option<Question>, StoreError> {
        self.run(move |conn| {
            let found = conn
                .query_row(
                    "SELECT id, document_id, content, created_at FROM questions WHERE id = ?1",
                    params![id],
                    |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, i64>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                        ))
                    },
                )
                .optional()?;

            found
                .map(|(id, document_id, content, created_at)| -> Result<Question, StoreError> {
                    Ok(Question {
                        id,
                        document_id,
                        content,
                        created_at: parse_timestamp(&created_at)?,
                    })
                })
                .transpose()
        })
        .await
    }

    async fn create_answer(
        &self,
        question_id: QuestionId,
        content: &str,
    ) -> Result<Answer, StoreError> {
        let content = content.to_string();
        self.run(move |conn| {
            let created_at = Utc::now();
            conn.execute(
                "INSERT INTO answers (question_id, content, created_at) VALUES (?1, ?2, ?3)",
                params![question_id, content, created_at.to_rfc3339()],
            )
            .map_err(|error| map_conflict(error, format!("answer for question {question_id}")))?;

            Ok(Answer {
                id: conn.last_insert_rowid(),
                question_id,
                content,
                created_at,
            })
        })
        .await
    }

    async fn get_answer(&self, question_id: QuestionId) -> Result<Option<Answer>, StoreError> {
        self.run(move |conn| {
            let found = conn
                .query_row(
                    "SELECT id, question_id, content, created_at FROM answers WHERE question_id = ?1",
                    params![question_id],
                    |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, i64>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                        ))
                    },
                )
                .optional()?;

            found
                .map(|(id, question_id, content, created_at)| -> Result<Answer, StoreError> {
                    Ok(Answer {
                        id,
                        question_id,
                        content,
                        created_at: parse_timestamp(&created_at)?,
                    })
                })
                .transpose()
        })
        .await
    }
}
