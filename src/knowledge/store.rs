//! Knowledge Store - rusqlite 기반 인덱스 스냅샷 저장소
//!
//! 인메모리 인덱스 엔트리를 SQLite에 기록해 프로세스 재시작 후 복원합니다.
//! 저장 위치: ~/.pdf-rag/index.db
//!
//! 엔트리 교체는 하나의 트랜잭션으로 수행되므로 디스크에도 부분 쓰기가 남지 않습니다.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags};
use serde::Serialize;

use crate::embedding::EmbeddingModel;
use crate::error::{RagError, Result};

use super::document::{DocumentId, DocumentMeta, IndexedChunk, TextChunk};
use super::index::IndexEntry;
use super::vector::{decode_vector, encode_vector};

// ============================================================================
// Types
// ============================================================================

/// 저장된 문서 요약
#[derive(Debug, Clone, Serialize)]
pub struct StoredDocument {
    pub meta: DocumentMeta,
    pub model: EmbeddingModel,
    pub chunk_count: usize,
    pub indexed_at: DateTime<Utc>,
}

/// 스냅샷 복원 결과
#[derive(Debug, Default)]
pub struct Snapshot {
    /// 현재 모델로 만들어진 엔트리
    pub entries: Vec<IndexEntry>,
    /// 다른 모델로 만들어졌거나 손상되어 건너뛴 문서
    pub stale: Vec<DocumentId>,
}

/// 저장소 통계
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub document_count: usize,
    pub chunk_count: usize,
    pub db_path: PathBuf,
}

// ============================================================================
// KnowledgeStore
// ============================================================================

/// 인덱스 스냅샷 저장소
#[derive(Clone)]
pub struct KnowledgeStore {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl std::fmt::Debug for KnowledgeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KnowledgeStore")
            .field("db_path", &self.db_path)
            .finish()
    }
}

impl KnowledgeStore {
    /// 저장소 열기 (없으면 생성)
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    RagError::Storage(format!("Failed to create database directory: {}", e))
                })?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: path.to_path_buf(),
        };

        store.initialize()?;
        Ok(store)
    }

    /// DB 경로 반환
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RagError::Storage(format!("Lock error: {}", e)))
    }

    /// 스키마 초기화
    fn initialize(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                owner TEXT,
                title TEXT,
                page_count INTEGER NOT NULL,
                char_count INTEGER NOT NULL,
                source_len INTEGER NOT NULL,
                content_sha256 TEXT NOT NULL,
                embedding_model TEXT NOT NULL,
                dimension INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                indexed_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS chunks (
                document_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                content TEXT NOT NULL,
                char_start INTEGER NOT NULL,
                start_page INTEGER NOT NULL,
                end_page INTEGER NOT NULL,
                embedding BLOB NOT NULL,
                PRIMARY KEY (document_id, seq)
            );

            CREATE INDEX IF NOT EXISTS idx_documents_owner ON documents(owner);
            "#,
        )?;

        tracing::debug!("Knowledge store initialized at {:?}", self.db_path);
        Ok(())
    }

    /// 엔트리 저장 (같은 ID가 있으면 통째로 교체)
    pub fn save_entry(&self, entry: &IndexEntry) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let meta = &entry.meta;

        tx.execute(
            "DELETE FROM chunks WHERE document_id = ?1",
            params![meta.id.as_str()],
        )?;
        tx.execute(
            "INSERT OR REPLACE INTO documents
                (id, owner, title, page_count, char_count, source_len, content_sha256,
                 embedding_model, dimension, created_at, indexed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                meta.id.as_str(),
                meta.owner,
                meta.title,
                meta.page_count as i64,
                meta.char_count as i64,
                meta.source_len as i64,
                meta.content_sha256,
                entry.model.name,
                entry.model.dimension as i64,
                meta.created_at.to_rfc3339(),
                entry.indexed_at.to_rfc3339(),
            ],
        )?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO chunks
                    (document_id, seq, content, char_start, start_page, end_page, embedding)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for indexed in &entry.chunks {
                let c = &indexed.chunk;
                stmt.execute(params![
                    meta.id.as_str(),
                    c.seq as i64,
                    c.text,
                    c.char_start as i64,
                    c.start_page as i64,
                    c.end_page as i64,
                    encode_vector(&indexed.embedding),
                ])?;
            }
        }

        tx.commit()?;
        tracing::debug!("Saved snapshot for {} ({} chunks)", meta.id, entry.chunks.len());
        Ok(())
    }

    /// 문서 삭제
    pub fn delete_document(&self, id: &DocumentId) -> Result<bool> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM chunks WHERE document_id = ?1", params![id.as_str()])?;
        let affected = tx.execute("DELETE FROM documents WHERE id = ?1", params![id.as_str()])?;
        tx.commit()?;
        Ok(affected > 0)
    }

    /// 저장된 문서 목록
    pub fn list_documents(&self) -> Result<Vec<StoredDocument>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT d.id, d.owner, d.title, d.page_count, d.char_count, d.source_len,
                    d.content_sha256, d.embedding_model, d.dimension, d.created_at,
                    d.indexed_at,
                    (SELECT COUNT(*) FROM chunks c WHERE c.document_id = d.id)
             FROM documents d ORDER BY d.id",
        )?;

        let docs = stmt
            .query_map([], |row| {
                let (meta, model, indexed_at) = read_document_row(row)?;
                Ok(StoredDocument {
                    meta,
                    model,
                    indexed_at,
                    chunk_count: row.get::<_, i64>(11)? as usize,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(docs)
    }

    /// 스냅샷 복원
    ///
    /// `model`과 다른 모델로 만들어진 엔트리는 복원하지 않습니다.
    pub fn load_snapshot(&self, model: &EmbeddingModel) -> Result<Snapshot> {
        let conn = self.lock()?;
        let mut snapshot = Snapshot::default();

        let mut doc_stmt = conn.prepare(
            "SELECT id, owner, title, page_count, char_count, source_len, content_sha256,
                    embedding_model, dimension, created_at, indexed_at
             FROM documents ORDER BY id",
        )?;
        let docs = doc_stmt
            .query_map([], read_document_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut chunk_stmt = conn.prepare(
            "SELECT seq, content, char_start, start_page, end_page, embedding
             FROM chunks WHERE document_id = ?1 ORDER BY seq",
        )?;

        for (meta, doc_model, indexed_at) in docs {
            if &doc_model != model {
                tracing::warn!(
                    "Skipping {} built with {} (index pinned to {})",
                    meta.id,
                    doc_model,
                    model
                );
                snapshot.stale.push(meta.id);
                continue;
            }

            let rows = chunk_stmt
                .query_map(params![meta.id.as_str()], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, Vec<u8>>(5)?,
                    ))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let mut chunks = Vec::with_capacity(rows.len());
            let mut corrupt = false;
            for (expected_seq, (seq, text, char_start, start_page, end_page, blob)) in
                rows.into_iter().enumerate()
            {
                let embedding = match decode_vector(&blob) {
                    Some(v) if v.len() == model.dimension && seq as usize == expected_seq => v,
                    _ => {
                        corrupt = true;
                        break;
                    }
                };
                chunks.push(IndexedChunk {
                    chunk: TextChunk {
                        document_id: meta.id.clone(),
                        seq: seq as usize,
                        text,
                        char_start: char_start as usize,
                        start_page: start_page as usize,
                        end_page: end_page as usize,
                    },
                    embedding,
                });
            }

            if corrupt || chunks.is_empty() {
                tracing::warn!("Skipping corrupt snapshot entry {}", meta.id);
                snapshot.stale.push(meta.id);
                continue;
            }

            snapshot.entries.push(IndexEntry {
                meta,
                model: doc_model,
                chunks,
                indexed_at,
            });
        }

        tracing::info!(
            "Loaded {} snapshot entries ({} stale)",
            snapshot.entries.len(),
            snapshot.stale.len()
        );
        Ok(snapshot)
    }

    /// 저장소 통계
    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.lock()?;

        let document_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?;
        let chunk_count: i64 = conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;

        Ok(StoreStats {
            document_count: document_count as usize,
            chunk_count: chunk_count as usize,
            db_path: self.db_path.clone(),
        })
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn read_document_row(
    row: &rusqlite::Row<'_>,
) -> rusqlite::Result<(DocumentMeta, EmbeddingModel, DateTime<Utc>)> {
    let meta = DocumentMeta {
        id: DocumentId::new(row.get::<_, String>(0)?),
        owner: row.get(1)?,
        title: row.get(2)?,
        page_count: row.get::<_, i64>(3)? as usize,
        char_count: row.get::<_, i64>(4)? as usize,
        source_len: row.get::<_, i64>(5)? as usize,
        content_sha256: row.get(6)?,
        created_at: parse_datetime(row.get::<_, String>(9)?),
    };
    let model = EmbeddingModel::new(row.get::<_, String>(7)?, row.get::<_, i64>(8)? as usize);
    let indexed_at = parse_datetime(row.get::<_, String>(10)?);
    Ok((meta, model, indexed_at))
}

/// RFC3339 문자열을 DateTime<Utc>로 파싱
fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

// ============================================================================
// Tests
// ============================================================================
