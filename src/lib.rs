//! pdf-rag - PDF 채팅용 RAG 코어
//!
//! 업로드된 PDF에서 텍스트를 추출해 오버랩 청크로 나누고, 청크마다 임베딩을
//! 계산해 문서별로 인덱싱한 뒤, 쿼리 시 코사인 유사도 Top-K 청크를 반환합니다.
//! 프롬프트 구성과 채팅 모델 호출은 이 크레이트 밖의 책임입니다.
//!
//! ```rust,ignore
//! let service = RagService::open(&RagConfig::from_env()?, Arc::new(embedder)).await?;
//! service.ingest(IngestRequest::new("alice/paper.pdf", bytes), false).await?;
//! let context = service.retrieve(&"alice/paper.pdf".into(), "결론이 뭐야?", None).await?;
//! ```

pub mod cli;
pub mod collector;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extractor;
pub mod knowledge;

// Re-exports
pub use config::{get_data_dir, RagConfig};
pub use embedding::{
    EmbeddingModel, EmbeddingProvider, GeminiEmbedding, HashEmbedding, get_api_key, has_api_key,
};
pub use error::{RagError, Result};
pub use extractor::{IngestRequest, IngestedDocument, PdfIngestor};
pub use knowledge::{
    ChunkConfig, Chunker, Document, DocumentId, DocumentMeta, EmbeddingIndex, IndexStats,
    IngestReport, IngestStatus, KnowledgeStore, RagService, Retriever, ScoredChunk, TextChunk,
    cosine_similarity,
};
