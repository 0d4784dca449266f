//! RAG 서비스 - Ingestor → Indexer → Retriever 연결
//!
//! 업로드 계층/채팅 계층이 사용하는 진입점입니다.
//! 수집은 백그라운드 태스크로 띄울 수 있고, 그동안 이미 인덱싱된 문서 검색은
//! 영향을 받지 않습니다.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::RagConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::Result;
use crate::extractor::{sha256_hex, IngestRequest, PdfIngestor};

use super::document::{DocumentId, DocumentMeta, ScoredChunk};
use super::index::{EmbeddingIndex, IndexStats};
use super::retriever::Retriever;
use super::store::KnowledgeStore;

// ============================================================================
// Types
// ============================================================================

/// 수집 결과 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    /// 새로 인덱싱됨 (기존 엔트리 교체 포함)
    Indexed,
    /// 같은 내용/모델로 이미 인덱싱되어 건너뜀
    Unchanged,
}

/// 수집 리포트
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    /// 로그 상관관계용 작업 ID
    pub job_id: Uuid,
    pub document_id: DocumentId,
    pub status: IngestStatus,
    pub page_count: usize,
    pub chunk_count: usize,
    pub elapsed_ms: u128,
}

// ============================================================================
// RagService
// ============================================================================

/// RAG 코어 서비스
#[derive(Debug)]
pub struct RagService {
    ingestor: PdfIngestor,
    index: Arc<EmbeddingIndex>,
    retriever: Retriever,
}

impl RagService {
    /// 인메모리 서비스 생성 (스냅샷 없음)
    pub fn new(config: &RagConfig, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        config.validate()?;
        let index = Arc::new(EmbeddingIndex::new(embedder));
        Self::assemble(config, index)
    }

    /// 스냅샷 저장소를 열고 기존 엔트리를 복원한 서비스 생성
    pub async fn open(config: &RagConfig, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        config.validate()?;
        let store = KnowledgeStore::open(&config.snapshot_path())?;
        let index = EmbeddingIndex::new(embedder).with_store(store);
        let restored = index.restore().await?;
        tracing::info!("Restored {} documents from snapshot", restored);
        Self::assemble(config, Arc::new(index))
    }

    fn assemble(config: &RagConfig, index: Arc<EmbeddingIndex>) -> Result<Self> {
        let retriever = Retriever::new(Arc::clone(&index))
            .with_default_k(config.top_k)
            .with_min_score(config.min_score);
        Ok(Self {
            ingestor: PdfIngestor::new(config.chunk.clone())?,
            index,
            retriever,
        })
    }

    pub fn index(&self) -> &Arc<EmbeddingIndex> {
        &self.index
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    /// PDF 수집 + 인덱싱
    ///
    /// `force`가 아니면 같은 바이트로 이미 인덱싱된 문서는 건너뜁니다.
    pub async fn ingest(&self, request: IngestRequest, force: bool) -> Result<IngestReport> {
        let job_id = Uuid::new_v4();
        let started = Instant::now();
        let id = request.id.clone();

        tracing::info!(%job_id, "Ingesting {} ({} bytes)", id, request.bytes.len());

        if !force {
            if let Some(existing) = self.index.get(&id).await {
                if existing.meta.content_sha256 == sha256_hex(&request.bytes) {
                    tracing::info!(%job_id, "{} unchanged, skipping", id);
                    return Ok(IngestReport {
                        job_id,
                        document_id: id,
                        status: IngestStatus::Unchanged,
                        page_count: existing.meta.page_count,
                        chunk_count: existing.chunks.len(),
                        elapsed_ms: started.elapsed().as_millis(),
                    });
                }
            }
        }

        let ingested = self.ingestor.ingest(request).await?;
        let page_count = ingested.document.page_count;
        let entry = self
            .index
            .index_document(ingested.document.meta(), ingested.chunks)
            .await?;

        Ok(IngestReport {
            job_id,
            document_id: id,
            status: IngestStatus::Indexed,
            page_count,
            chunk_count: entry.chunks.len(),
            elapsed_ms: started.elapsed().as_millis(),
        })
    }

    /// 백그라운드 수집
    ///
    /// 호출자는 핸들을 기다리거나 버릴 수 있습니다. 검색 경로는 블로킹되지 않습니다.
    pub fn spawn_ingest(
        self: &Arc<Self>,
        request: IngestRequest,
        force: bool,
    ) -> JoinHandle<Result<IngestReport>> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let id = request.id.clone();
            let result = service.ingest(request, force).await;
            if let Err(e) = &result {
                tracing::warn!("Background ingestion of {} failed: {}", id, e);
            }
            result
        })
    }

    /// 단일 문서 검색 (`k`가 없으면 설정의 top_k)
    pub async fn retrieve(
        &self,
        id: &DocumentId,
        query: &str,
        k: Option<usize>,
    ) -> Result<Vec<ScoredChunk>> {
        let k = k.unwrap_or_else(|| self.retriever.default_k());
        self.retriever.retrieve(id, query, k).await
    }

    /// 여러 문서 교차 검색
    pub async fn retrieve_many(
        &self,
        ids: &[DocumentId],
        query: &str,
        k: Option<usize>,
    ) -> Result<Vec<ScoredChunk>> {
        let k = k.unwrap_or_else(|| self.retriever.default_k());
        self.retriever.retrieve_many(ids, query, k).await
    }

    /// 문서 삭제 (PDF 레코드 삭제 시)
    pub async fn remove(&self, id: &DocumentId) -> Result<bool> {
        self.index.remove_document(id).await
    }

    pub async fn documents(&self) -> Vec<DocumentMeta> {
        self.index.documents().await
    }

    pub async fn stats(&self) -> IndexStats {
        self.index.stats().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedding;
    use crate::error::RagError;
    use crate::extractor::pdf::fixtures::sample_pdf;

    fn service() -> RagService {
        RagService::new(&RagConfig::default(), Arc::new(HashEmbedding::new(32))).unwrap()
    }

    #[tokio::test]
    async fn test_retrieve_unknown_document() {
        let err = service()
            .retrieve(&DocumentId::new("ghost"), "q", None)
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::NotIndexed { .. }));
    }

    #[tokio::test]
    async fn test_ingest_failure_leaves_index_empty() {
        let svc = service();
        let err = svc
            .ingest(IngestRequest::new("bad", b"not a pdf".to_vec()), false)
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::Extraction { .. }));
        assert_eq!(svc.stats().await.document_count, 0);
    }

    #[tokio::test]
    async fn test_spawned_ingest_reports_error() {
        let svc = Arc::new(service());
        let handle = svc.spawn_ingest(IngestRequest::new("bad", vec![]), true);
        let result = handle.await.unwrap();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_reingest_unchanged_and_forced() {
        let svc = RagService::new(
            &RagConfig {
                chunk: crate::knowledge::ChunkConfig::new(20, 5).unwrap(),
                ..RagConfig::default()
            },
            Arc::new(HashEmbedding::new(256)),
        )
        .unwrap();
        let bytes = sample_pdf(&["Alpha page one", "Bravo page two", "Charlie page three"]);

        let first = svc
            .ingest(IngestRequest::new("alice/lecture", bytes.clone()), false)
            .await
            .unwrap();
        assert_eq!(first.status, IngestStatus::Indexed);
        assert_eq!(first.page_count, 3);
        assert!(first.chunk_count > 1);

        let again = svc
            .ingest(IngestRequest::new("alice/lecture", bytes.clone()), false)
            .await
            .unwrap();
        assert_eq!(again.status, IngestStatus::Unchanged);
        assert_eq!(again.chunk_count, first.chunk_count);
        assert_ne!(again.job_id, first.job_id);

        let forced = svc
            .ingest(IngestRequest::new("alice/lecture", bytes), true)
            .await
            .unwrap();
        assert_eq!(forced.status, IngestStatus::Indexed);

        let hits = svc
            .retrieve(&DocumentId::new("alice/lecture"), "Charlie", Some(1))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].text.contains("Charlie"));
        assert_eq!(hits[0].end_page, 3);
    }

    #[tokio::test]
    async fn test_changed_bytes_are_reindexed() {
        let svc = service();
        let v1 = sample_pdf(&["first draft"]);
        let v2 = sample_pdf(&["second draft", "appendix"]);

        svc.ingest(IngestRequest::new("doc", v1), false).await.unwrap();
        let report = svc.ingest(IngestRequest::new("doc", v2), false).await.unwrap();
        assert_eq!(report.status, IngestStatus::Indexed);
        assert_eq!(report.page_count, 2);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = RagConfig::default();
        config.chunk.chunk_overlap = config.chunk.chunk_size;
        let err = RagService::new(&config, Arc::new(HashEmbedding::new(8))).unwrap_err();
        assert!(matches!(err, RagError::Config(_)));
    }

    #[test]
    fn test_report_serializes_job_id() {
        let job_id = Uuid::new_v4();
        let report = IngestReport {
            job_id,
            document_id: DocumentId::new("alice/paper"),
            status: IngestStatus::Indexed,
            page_count: 3,
            chunk_count: 7,
            elapsed_ms: 12,
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["job_id"], job_id.to_string());
        assert_eq!(json["document_id"], "alice/paper");
        assert_eq!(json["status"], "indexed");
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&IngestStatus::Unchanged).unwrap(),
            "\"unchanged\""
        );
    }
}
