//! 에러 타입
//!
//! RAG 코어의 모든 실패는 단일 문서 작업 범위에 한정됩니다.
//! 어떤 에러도 프로세스를 종료시키지 않습니다.

use thiserror::Error;

use crate::knowledge::DocumentId;

/// RAG 코어 에러
#[derive(Debug, Error)]
pub enum RagError {
    /// PDF가 암호화/손상되었거나 추출 가능한 페이지가 없음
    #[error("Extraction failed for {document_id}: {message}")]
    Extraction {
        document_id: DocumentId,
        message: String,
    },

    /// 추출은 성공했지만 사용 가능한 문자가 없음 (스캔 PDF 등)
    #[error("Document {document_id} contains no usable text")]
    EmptyDocument { document_id: DocumentId },

    /// 임베딩 프로바이더 호출 실패 또는 타임아웃
    #[error("Embedding provider error ({provider}): {message}")]
    EmbeddingProvider { provider: String, message: String },

    /// 인덱스에 없는 문서 검색
    #[error("Document {document_id} is not indexed")]
    NotIndexed { document_id: DocumentId },

    /// 같은 문서에 대해 인덱싱이 이미 진행 중
    #[error("Indexing already in progress for {document_id}")]
    ConcurrentIndexInProgress { document_id: DocumentId },

    /// 스냅샷 저장소 에러
    #[error("Storage error: {0}")]
    Storage(String),

    /// 설정 검증 에러
    #[error("Configuration error: {0}")]
    Config(String),
}

impl RagError {
    pub(crate) fn extraction(document_id: &DocumentId, message: impl Into<String>) -> Self {
        Self::Extraction {
            document_id: document_id.clone(),
            message: message.into(),
        }
    }

    pub(crate) fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::EmbeddingProvider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// 재수집(ingest 재시도)으로 복구될 수 있는 에러인지 여부
    ///
    /// 손상/빈 문서는 같은 바이트로 다시 시도해도 결과가 같습니다.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::EmbeddingProvider { .. }
                | Self::NotIndexed { .. }
                | Self::ConcurrentIndexInProgress { .. }
                | Self::Storage(_)
        )
    }
}

impl From<rusqlite::Error> for RagError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

/// RAG 코어 Result 타입
pub type Result<T> = std::result::Result<T, RagError>;
