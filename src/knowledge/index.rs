//! Embedding Index - 문서별 청크/벡터 인메모리 인덱스
//!
//! - 엔트리는 `Arc<IndexEntry>` 스냅샷으로 공유되며 교체는 포인터 스왑 한 번
//! - 맵 락은 조회/스왑 동안만 잡고 임베딩 호출 중에는 잡지 않음
//! - 문서별 락 테이블: 같은 문서에 대한 인덱싱/삭제가 진행 중이면 즉시
//!   [`RagError::ConcurrentIndexInProgress`]로 거절
//! - 인덱스는 하나의 임베딩 모델에 고정 ([`EmbeddingModel`])

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard, RwLock};

use crate::embedding::{EmbeddingModel, EmbeddingProvider};
use crate::error::{RagError, Result};

use super::document::{DocumentId, DocumentMeta, IndexedChunk, TextChunk};
use super::store::KnowledgeStore;

// ============================================================================
// Types
// ============================================================================

/// 인덱스 엔트리 (문서 하나의 전체 청크 집합)
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub meta: DocumentMeta,
    pub model: EmbeddingModel,
    /// seq 오름차순
    pub chunks: Vec<IndexedChunk>,
    pub indexed_at: DateTime<Utc>,
}

impl IndexEntry {
    fn vector_bytes(&self) -> usize {
        self.chunks
            .iter()
            .map(|c| c.embedding.len() * std::mem::size_of::<f32>())
            .sum()
    }

    fn text_bytes(&self) -> usize {
        self.chunks.iter().map(|c| c.chunk.text.len()).sum()
    }
}

/// 인덱스 통계 (관측용, 읽기 전용)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexStats {
    pub document_count: usize,
    pub chunk_count: usize,
    /// 저장된 벡터의 대략적인 메모리 (바이트)
    pub vector_bytes: usize,
    /// 저장된 청크 텍스트 (바이트)
    pub text_bytes: usize,
    /// 인덱싱이 진행 중인 문서 수
    pub indexing_in_flight: usize,
    pub embedding_model: String,
    pub dimension: usize,
}

// ============================================================================
// Per-document lock table
// ============================================================================

#[derive(Debug, Default)]
struct LockTable {
    slots: Mutex<HashMap<DocumentId, Arc<AsyncMutex<()>>>>,
    /// 살아 있는 lease 수 (슬롯 뮤텍스를 건드리지 않고 집계)
    active: AtomicUsize,
}

impl LockTable {
    /// 문서 락 획득 시도 (대기하지 않음)
    fn try_acquire(self: &Arc<Self>, id: &DocumentId) -> Result<DocumentLease> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(
                slots
                    .entry(id.clone())
                    .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
            )
        };

        let guard = Arc::clone(&slot).try_lock_owned().map_err(|_| {
            tracing::debug!("Rejecting concurrent indexing for {}", id);
            RagError::ConcurrentIndexInProgress {
                document_id: id.clone(),
            }
        })?;

        self.active.fetch_add(1, Ordering::SeqCst);
        Ok(DocumentLease {
            table: Arc::clone(self),
            id: id.clone(),
            slot,
            _guard: guard,
        })
    }

    fn in_flight(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

/// 문서 하나에 대한 배타적 작업 권한
struct DocumentLease {
    table: Arc<LockTable>,
    id: DocumentId,
    slot: Arc<AsyncMutex<()>>,
    _guard: OwnedMutexGuard<()>,
}

impl Drop for DocumentLease {
    fn drop(&mut self) {
        self.table.active.fetch_sub(1, Ordering::SeqCst);

        // 테이블 + lease + guard 외에 참조가 없으면 슬롯 정리
        let mut slots = self.table.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let idle = slots
            .get(&self.id)
            .map(|s| Arc::ptr_eq(s, &self.slot) && Arc::strong_count(s) <= 3)
            .unwrap_or(false);
        if idle {
            slots.remove(&self.id);
        }
    }
}

// ============================================================================
// EmbeddingIndex
// ============================================================================

/// 임베딩 인덱스
///
/// 프로세스 전역 상태 대신 `Arc<EmbeddingIndex>`로 각 컴포넌트에 전달합니다.
pub struct EmbeddingIndex {
    embedder: Arc<dyn EmbeddingProvider>,
    model: EmbeddingModel,
    entries: RwLock<HashMap<DocumentId, Arc<IndexEntry>>>,
    locks: Arc<LockTable>,
    store: Option<KnowledgeStore>,
}

impl std::fmt::Debug for EmbeddingIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingIndex")
            .field("model", &self.model)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl EmbeddingIndex {
    /// 프로바이더에 고정된 빈 인덱스 생성
    pub fn new(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        let model = EmbeddingModel::of(embedder.as_ref());
        Self {
            embedder,
            model,
            entries: RwLock::new(HashMap::new()),
            locks: Arc::new(LockTable::default()),
            store: None,
        }
    }

    /// 스냅샷 저장소 연결 (write-through)
    pub fn with_store(mut self, store: KnowledgeStore) -> Self {
        self.store = Some(store);
        self
    }

    /// 고정된 임베딩 모델
    pub fn model(&self) -> &EmbeddingModel {
        &self.model
    }

    /// 인덱스가 사용하는 프로바이더 (쿼리 임베딩용)
    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    /// 스냅샷 저장소에서 엔트리 복원
    ///
    /// 다른 모델로 만들어진 엔트리는 건너뜁니다. 복원된 엔트리 수를 반환합니다.
    pub async fn restore(&self) -> Result<usize> {
        let Some(store) = &self.store else {
            return Ok(0);
        };

        let loader = store.clone();
        let model = self.model.clone();
        let snapshot = run_blocking(move || loader.load_snapshot(&model)).await?;
        let restored = snapshot.entries.len();

        let mut entries = self.entries.write().await;
        for entry in snapshot.entries {
            entries.insert(entry.meta.id.clone(), Arc::new(entry));
        }

        Ok(restored)
    }

    /// 메타데이터 없이 청크만으로 인덱싱
    pub async fn index_chunks(
        &self,
        id: &DocumentId,
        chunks: Vec<TextChunk>,
    ) -> Result<Arc<IndexEntry>> {
        let meta = DocumentMeta {
            id: id.clone(),
            owner: None,
            title: None,
            page_count: chunks.last().map(|c| c.end_page).unwrap_or(0),
            char_count: 0,
            source_len: 0,
            content_sha256: String::new(),
            created_at: Utc::now(),
        };
        self.index_document(meta, chunks).await
    }

    /// 문서 인덱싱 (기존 엔트리 교체)
    ///
    /// 모든 청크 임베딩이 성공한 경우에만 새 엔트리로 교체합니다.
    /// 실패하면 기존 엔트리는 그대로 남습니다.
    pub async fn index_document(
        &self,
        meta: DocumentMeta,
        chunks: Vec<TextChunk>,
    ) -> Result<Arc<IndexEntry>> {
        let id = meta.id.clone();

        if chunks.is_empty() {
            return Err(RagError::EmptyDocument { document_id: id });
        }
        if let Some((i, bad)) = chunks
            .iter()
            .enumerate()
            .find(|(i, c)| c.document_id != id || c.seq != *i)
        {
            return Err(RagError::Config(format!(
                "chunk {} ({} seq {}) does not belong to {} at position {}",
                i, bad.document_id, bad.seq, id, i
            )));
        }

        let _lease = self.locks.try_acquire(&id)?;

        tracing::debug!("Embedding {} chunks for {}", chunks.len(), id);
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = self.embedder.embed_batch(&texts).await?;

        if embeddings.len() != chunks.len() {
            return Err(RagError::provider(
                &self.model.name,
                format!(
                    "returned {} embeddings for {} chunks",
                    embeddings.len(),
                    chunks.len()
                ),
            ));
        }
        if let Some(v) = embeddings.iter().find(|v| v.len() != self.model.dimension) {
            return Err(RagError::provider(
                &self.model.name,
                format!(
                    "dimension mismatch: expected {}, got {}",
                    self.model.dimension,
                    v.len()
                ),
            ));
        }

        let entry = Arc::new(IndexEntry {
            meta,
            model: self.model.clone(),
            chunks: chunks
                .into_iter()
                .zip(embeddings)
                .map(|(chunk, embedding)| IndexedChunk { chunk, embedding })
                .collect(),
            indexed_at: Utc::now(),
        });

        // 디스크 먼저 → 실패 시 메모리도 기존 상태 유지
        if let Some(store) = &self.store {
            let store = store.clone();
            let snapshot = Arc::clone(&entry);
            run_blocking(move || store.save_entry(&snapshot)).await?;
        }

        let replaced = self
            .entries
            .write()
            .await
            .insert(id.clone(), Arc::clone(&entry))
            .is_some();

        tracing::info!(
            "Indexed {} ({} chunks, model={}, replaced={})",
            id,
            entry.chunks.len(),
            self.model,
            replaced
        );
        Ok(entry)
    }

    /// 문서 삭제
    ///
    /// 인덱싱 중인 문서는 삭제하지 않고 거절합니다.
    pub async fn remove_document(&self, id: &DocumentId) -> Result<bool> {
        let _lease = self.locks.try_acquire(id)?;

        let persisted = match &self.store {
            Some(store) => {
                let store = store.clone();
                let id = id.clone();
                run_blocking(move || store.delete_document(&id)).await?
            }
            None => false,
        };
        let removed = self.entries.write().await.remove(id).is_some();

        if removed || persisted {
            tracing::info!("Removed {} from index", id);
        }
        Ok(removed || persisted)
    }

    /// 엔트리 조회
    pub async fn get(&self, id: &DocumentId) -> Option<Arc<IndexEntry>> {
        self.entries.read().await.get(id).cloned()
    }

    /// 엔트리 조회 (없으면 NotIndexed)
    pub async fn entry(&self, id: &DocumentId) -> Result<Arc<IndexEntry>> {
        self.get(id).await.ok_or_else(|| RagError::NotIndexed {
            document_id: id.clone(),
        })
    }

    pub async fn contains(&self, id: &DocumentId) -> bool {
        self.entries.read().await.contains_key(id)
    }

    /// 인덱싱된 문서 메타데이터 목록 (ID 순)
    pub async fn documents(&self) -> Vec<DocumentMeta> {
        let entries = self.entries.read().await;
        let mut docs: Vec<DocumentMeta> = entries.values().map(|e| e.meta.clone()).collect();
        docs.sort_by(|a, b| a.id.cmp(&b.id));
        docs
    }

    /// 인덱스 통계
    pub async fn stats(&self) -> IndexStats {
        let entries = self.entries.read().await;

        IndexStats {
            document_count: entries.len(),
            chunk_count: entries.values().map(|e| e.chunks.len()).sum(),
            vector_bytes: entries.values().map(|e| e.vector_bytes()).sum(),
            text_bytes: entries.values().map(|e| e.text_bytes()).sum(),
            indexing_in_flight: self.locks.in_flight(),
            embedding_model: self.model.name.clone(),
            dimension: self.model.dimension,
        }
    }
}

/// 동기 SQLite 작업을 블로킹 스레드풀에서 실행
async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| RagError::Storage(format!("snapshot task failed: {}", e)))?
}

// ============================================================================
// Tests
// ============================================================================
