//! Knowledge 모듈 - PDF RAG 인덱스 코어
//!
//! - Chunker: 고정 길이 + 오버랩 문자 윈도우 분할
//! - Index: 문서별 락을 가진 인메모리 임베딩 인덱스
//! - Retriever: 코사인 유사도 Top-K
//! - Store: SQLite 스냅샷 (선택)
//! - Service: 수집 → 인덱싱 → 검색 연결

mod chunker;
mod document;
mod index;
mod retriever;
mod service;
mod store;
mod vector;

// Re-exports
pub use chunker::{reassemble, ChunkConfig, ChunkSpan, Chunker, PagedText, PAGE_SEPARATOR};
pub use document::{
    Document, DocumentId, DocumentMeta, IndexedChunk, ScoredChunk, TextChunk,
};
pub use index::{EmbeddingIndex, IndexEntry, IndexStats};
pub use retriever::Retriever;
pub use service::{IngestReport, IngestStatus, RagService};
pub use store::{KnowledgeStore, Snapshot, StoreStats, StoredDocument};
pub use vector::cosine_similarity;
