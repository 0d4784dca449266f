//! Retriever - 코사인 유사도 Top-K 검색
//!
//! 쿼리는 인덱스에 고정된 프로바이더로 임베딩합니다 (임베딩 공간 일관성).
//! 정렬: 점수 내림차순 → 요청한 문서 순서 → 청크 순번 오름차순.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::config::DEFAULT_TOP_K;
use crate::error::{RagError, Result};

use super::document::{DocumentId, IndexedChunk, ScoredChunk};
use super::index::{EmbeddingIndex, IndexEntry};
use super::vector::cosine_similarity;

/// Top-K 검색기
#[derive(Debug, Clone)]
pub struct Retriever {
    index: Arc<EmbeddingIndex>,
    default_k: usize,
    min_score: Option<f32>,
}

impl Retriever {
    pub fn new(index: Arc<EmbeddingIndex>) -> Self {
        Self {
            index,
            default_k: DEFAULT_TOP_K,
            min_score: None,
        }
    }

    /// 기본 K 변경
    pub fn with_default_k(mut self, k: usize) -> Self {
        self.default_k = k;
        self
    }

    /// 최소 유사도 필터
    pub fn with_min_score(mut self, min_score: Option<f32>) -> Self {
        self.min_score = min_score;
        self
    }

    pub fn default_k(&self) -> usize {
        self.default_k
    }

    /// 단일 문서 검색
    ///
    /// 결과 길이는 min(k, 청크 수)입니다.
    pub async fn retrieve(
        &self,
        id: &DocumentId,
        query: &str,
        k: usize,
    ) -> Result<Vec<ScoredChunk>> {
        self.retrieve_many(std::slice::from_ref(id), query, k).await
    }

    /// 기본 K로 단일 문서 검색
    pub async fn retrieve_default(&self, id: &DocumentId, query: &str) -> Result<Vec<ScoredChunk>> {
        self.retrieve(id, query, self.default_k).await
    }

    /// 여러 문서 교차 검색
    ///
    /// 요청한 문서 중 하나라도 인덱싱되지 않았으면 NotIndexed.
    /// 중복 ID는 한 번만 검색합니다.
    pub async fn retrieve_many(
        &self,
        ids: &[DocumentId],
        query: &str,
        k: usize,
    ) -> Result<Vec<ScoredChunk>> {
        let mut entries: Vec<Arc<IndexEntry>> = Vec::with_capacity(ids.len());
        for (i, id) in ids.iter().enumerate() {
            if ids[..i].contains(id) {
                continue;
            }
            entries.push(self.index.entry(id).await?);
        }

        if k == 0 || entries.is_empty() {
            return Ok(vec![]);
        }

        let model = self.index.model();
        let query_vec = self.index.embedder().embed_query(query).await?;
        if query_vec.len() != model.dimension {
            return Err(RagError::provider(
                &model.name,
                format!(
                    "query dimension mismatch: expected {}, got {}",
                    model.dimension,
                    query_vec.len()
                ),
            ));
        }

        let mut candidates: Vec<(f32, usize, &IndexedChunk)> = entries
            .iter()
            .enumerate()
            .flat_map(|(doc_pos, entry)| {
                let query_vec = &query_vec;
                entry.chunks.iter().map(move |c| {
                    (cosine_similarity(query_vec, &c.embedding), doc_pos, c)
                })
            })
            .filter(|(score, _, _)| self.min_score.map_or(true, |min| *score >= min))
            .collect();

        candidates.sort_by(|a, b| rank_order(a, b));
        candidates.truncate(k);

        tracing::debug!(
            "Retrieved {} chunks from {} documents (k={})",
            candidates.len(),
            entries.len(),
            k
        );

        Ok(candidates
            .into_iter()
            .map(|(score, _, c)| ScoredChunk::from_indexed(c, score))
            .collect())
    }
}

/// 점수 내림차순, 동점이면 문서 순서 → 청크 순번 오름차순
fn rank_order(a: &(f32, usize, &IndexedChunk), b: &(f32, usize, &IndexedChunk)) -> Ordering {
    b.0.total_cmp(&a.0)
        .then(a.1.cmp(&b.1))
        .then(a.2.chunk.seq.cmp(&b.2.chunk.seq))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{EmbeddingProvider, HashEmbedding};
    use crate::knowledge::TextChunk;
    use async_trait::async_trait;

    /// 텍스트와 무관하게 같은 벡터를 반환 (모든 점수 동점)
    struct ConstantEmbedding;

    #[async_trait]
    impl EmbeddingProvider for ConstantEmbedding {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![1.0, 0.0])
        }

        fn dimension(&self) -> usize {
            2
        }

        fn name(&self) -> &str {
            "constant"
        }
    }

    fn chunks(id: &DocumentId, texts: &[&str]) -> Vec<TextChunk> {
        texts
            .iter()
            .enumerate()
            .map(|(seq, text)| TextChunk {
                document_id: id.clone(),
                seq,
                text: text.to_string(),
                char_start: 0,
                start_page: 1,
                end_page: 1,
            })
            .collect()
    }

    async fn setup(provider: Arc<dyn EmbeddingProvider>) -> (Arc<EmbeddingIndex>, Retriever) {
        let index = Arc::new(EmbeddingIndex::new(provider));
        let d1 = DocumentId::new("d1");
        let d2 = DocumentId::new("d2");
        index
            .index_chunks(
                &d1,
                chunks(
                    &d1,
                    &[
                        "rust borrow checker ownership",
                        "python garbage collection",
                        "cooking pasta al dente",
                    ],
                ),
            )
            .await
            .unwrap();
        index
            .index_chunks(&d2, chunks(&d2, &["ownership of rust values", "weather report"]))
            .await
            .unwrap();
        let retriever = Retriever::new(Arc::clone(&index));
        (index, retriever)
    }

    #[tokio::test]
    async fn test_most_similar_first() {
        let (_index, retriever) = setup(Arc::new(HashEmbedding::new(256))).await;
        let results = retriever
            .retrieve(&DocumentId::new("d1"), "rust ownership", 2)
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].seq, 0);
        assert!(results[0].score >= results[1].score);
    }

    #[tokio::test]
    async fn test_k_larger_than_chunks() {
        let (_index, retriever) = setup(Arc::new(HashEmbedding::new(64))).await;
        let results = retriever
            .retrieve(&DocumentId::new("d1"), "anything", 10)
            .await
            .unwrap();
        assert_eq!(results.len(), 3);
    }

    #[tokio::test]
    async fn test_k_zero_is_empty() {
        let (_index, retriever) = setup(Arc::new(HashEmbedding::new(64))).await;
        let results = retriever
            .retrieve(&DocumentId::new("d1"), "anything", 0)
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_not_indexed() {
        let (_index, retriever) = setup(Arc::new(HashEmbedding::new(64))).await;
        let err = retriever
            .retrieve(&DocumentId::new("nope"), "q", 5)
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::NotIndexed { document_id } if document_id.as_str() == "nope"));

        // 하나라도 없으면 교차 검색도 실패
        let err = retriever
            .retrieve_many(&[DocumentId::new("d1"), DocumentId::new("nope")], "q", 5)
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::NotIndexed { .. }));
    }

    #[tokio::test]
    async fn test_never_returns_other_documents() {
        let (_index, retriever) = setup(Arc::new(HashEmbedding::new(64))).await;
        let results = retriever
            .retrieve(&DocumentId::new("d2"), "rust ownership", 10)
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.document_id.as_str() == "d2"));
    }

    #[tokio::test]
    async fn test_ties_broken_by_sequence() {
        let (_index, retriever) = setup(Arc::new(ConstantEmbedding)).await;
        let results = retriever
            .retrieve(&DocumentId::new("d1"), "q", 3)
            .await
            .unwrap();
        let seqs: Vec<usize> = results.iter().map(|r| r.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_cross_document_ties_follow_request_order() {
        let (_index, retriever) = setup(Arc::new(ConstantEmbedding)).await;
        let ids = [DocumentId::new("d2"), DocumentId::new("d1"), DocumentId::new("d2")];
        let results = retriever.retrieve_many(&ids, "q", 10).await.unwrap();

        let order: Vec<(&str, usize)> = results
            .iter()
            .map(|r| (r.document_id.as_str(), r.seq))
            .collect();
        assert_eq!(
            order,
            vec![("d2", 0), ("d2", 1), ("d1", 0), ("d1", 1), ("d1", 2)]
        );
    }

    #[tokio::test]
    async fn test_deterministic_results() {
        let (_index, retriever) = setup(Arc::new(HashEmbedding::new(128))).await;
        let ids = [DocumentId::new("d1"), DocumentId::new("d2")];
        let first = retriever.retrieve_many(&ids, "rust ownership", 4).await.unwrap();
        for _ in 0..5 {
            assert_eq!(retriever.retrieve_many(&ids, "rust ownership", 4).await.unwrap(), first);
        }
    }

    #[tokio::test]
    async fn test_min_score_filter() {
        let (index, _) = setup(Arc::new(HashEmbedding::new(256))).await;
        let retriever = Retriever::new(index).with_min_score(Some(0.99));
        let results = retriever
            .retrieve(&DocumentId::new("d1"), "weather", 10)
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_default_k() {
        let (index, _) = setup(Arc::new(HashEmbedding::new(64))).await;
        let retriever = Retriever::new(index).with_default_k(1);
        let results = retriever
            .retrieve_default(&DocumentId::new("d1"), "pasta")
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
    }
}
