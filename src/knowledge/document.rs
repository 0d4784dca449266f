//! 문서/청크 타입

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// DocumentId
// ============================================================================

/// 문서 식별자 (소유자 범위)
///
/// 업로드 계층이 부여한 안정적인 ID입니다. `scoped`로 만들면 `owner/name` 형태가 됩니다.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// 소유자 범위 ID 생성
    pub fn scoped(owner: &str, name: &str) -> Self {
        Self(format!("{}/{}", owner, name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for DocumentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ============================================================================
// Document
// ============================================================================

/// 수집된 문서
///
/// 원본 바이트는 추출 후 보관하지 않고 길이와 SHA-256 지문만 남깁니다.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: DocumentId,
    pub owner: Option<String>,
    pub title: Option<String>,
    /// 추출된 전체 텍스트 (페이지는 `\n`으로 연결)
    pub text: String,
    pub page_count: usize,
    pub char_count: usize,
    pub source_len: usize,
    pub content_sha256: String,
    pub created_at: DateTime<Utc>,
}

impl Document {
    /// 인덱스에 보관할 메타데이터
    pub fn meta(&self) -> DocumentMeta {
        DocumentMeta {
            id: self.id.clone(),
            owner: self.owner.clone(),
            title: self.title.clone(),
            page_count: self.page_count,
            char_count: self.char_count,
            source_len: self.source_len,
            content_sha256: self.content_sha256.clone(),
            created_at: self.created_at,
        }
    }
}

/// 문서 메타데이터 (텍스트 제외)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMeta {
    pub id: DocumentId,
    pub owner: Option<String>,
    pub title: Option<String>,
    pub page_count: usize,
    pub char_count: usize,
    pub source_len: usize,
    pub content_sha256: String,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Chunks
// ============================================================================

/// 임베딩 전 텍스트 청크
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextChunk {
    pub document_id: DocumentId,
    /// 문서 내 순번 (0-based)
    pub seq: usize,
    pub text: String,
    /// 문서 텍스트 내 시작 위치 (문자 단위)
    pub char_start: usize,
    /// 시작 페이지 (1-based)
    pub start_page: usize,
    /// 끝 페이지 (1-based, 포함)
    pub end_page: usize,
}

/// 임베딩이 붙은 청크
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedChunk {
    pub chunk: TextChunk,
    pub embedding: Vec<f32>,
}

/// 검색 결과 한 건
///
/// LLM/채팅 계층이 프롬프트 컨텍스트로 사용합니다.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredChunk {
    pub document_id: DocumentId,
    pub seq: usize,
    pub text: String,
    pub start_page: usize,
    pub end_page: usize,
    /// 코사인 유사도 (-1.0 ~ 1.0)
    pub score: f32,
}

impl ScoredChunk {
    pub(crate) fn from_indexed(indexed: &IndexedChunk, score: f32) -> Self {
        let chunk = &indexed.chunk;
        Self {
            document_id: chunk.document_id.clone(),
            seq: chunk.seq,
            text: chunk.text.clone(),
            start_page: chunk.start_page,
            end_page: chunk.end_page,
            score,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scoped_id() {
        let id = DocumentId::scoped("user_42", "lecture-3.pdf");
        assert_eq!(id.as_str(), "user_42/lecture-3.pdf");
        assert_eq!(id.to_string(), "user_42/lecture-3.pdf");
    }

    #[test]
    fn test_id_serializes_as_plain_string() {
        let id = DocumentId::new("doc-1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"doc-1\"");
    }
}
