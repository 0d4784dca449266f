//! 임베딩 모듈 - 텍스트 벡터화 프로바이더
//!
//! 인덱스는 하나의 임베딩 모델에 고정됩니다 ([`EmbeddingModel`]).
//! 청크와 쿼리는 반드시 같은 프로바이더로 임베딩해야 합니다.
//!
//! - [`GeminiEmbedding`]: Gemini API (gemini-embedding-001)
//! - [`HashEmbedding`]: 오프라인 결정적 해싱 임베딩 (API 키 불필요)
//!
//! ## 사용법
//! ```rust,ignore
//! let embedder = GeminiEmbedding::from_env()?;
//! let embedding = embedder.embed("Hello, world!").await?;
//! ```

mod gemini;
mod hashing;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use gemini::{create_embedder, get_api_key, has_api_key, GeminiEmbedding};
pub use hashing::HashEmbedding;

/// 기본 임베딩 차원
pub const DEFAULT_DIMENSION: usize = 768;

// ============================================================================
// EmbeddingProvider Trait
// ============================================================================

/// 임베딩 프로바이더 트레이트
///
/// 텍스트를 고정 차원 벡터로 변환하는 인터페이스입니다.
/// 실패는 [`crate::RagError::EmbeddingProvider`]로 보고합니다.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 문서(청크) 텍스트 임베딩
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// 검색 쿼리 임베딩
    ///
    /// 같은 모델을 쓰되 쿼리용 태스크 타입이 있는 프로바이더만 재정의합니다.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(text).await
    }

    /// 배치 임베딩 (기본 구현: 순차 호출)
    ///
    /// 결과 순서는 입력 순서와 같아야 합니다.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// 임베딩 차원 수
    fn dimension(&self) -> usize;

    /// 모델 식별자
    fn name(&self) -> &str;
}

// ============================================================================
// EmbeddingModel
// ============================================================================

/// 인덱스가 고정된 임베딩 모델 (이름 + 차원)
///
/// 모델이 바뀌면 기존 벡터와 쿼리 벡터가 다른 공간에 놓이므로
/// 인덱스 엔트리마다 모델을 기록합니다.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmbeddingModel {
    pub name: String,
    pub dimension: usize,
}

impl EmbeddingModel {
    pub fn new(name: impl Into<String>, dimension: usize) -> Self {
        Self {
            name: name.into(),
            dimension,
        }
    }

    /// 프로바이더에서 모델 정보 추출
    pub fn of(provider: &dyn EmbeddingProvider) -> Self {
        Self::new(provider.name(), provider.dimension())
    }
}

impl fmt::Display for EmbeddingModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.dimension)
    }
}
