//! 설정 모듈
//!
//! 기본값 → 환경변수 → CLI 플래그 순으로 덮어씁니다.
//!
//! | 환경변수 | 필드 |
//! |---|---|
//! | `PDF_RAG_CHUNK_SIZE` | `chunk.chunk_size` |
//! | `PDF_RAG_CHUNK_OVERLAP` | `chunk.chunk_overlap` |
//! | `PDF_RAG_TOP_K` | `top_k` |
//! | `PDF_RAG_MIN_SCORE` | `min_score` |
//! | `PDF_RAG_EMBEDDING_DIMENSION` | `embedding_dimension` |
//! | `PDF_RAG_TIMEOUT_SECS` | `request_timeout` |
//! | `PDF_RAG_DATA_DIR` | `data_dir` |

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::embedding::DEFAULT_DIMENSION;
use crate::error::{RagError, Result};
use crate::knowledge::ChunkConfig;

/// 기본 Top-K
pub const DEFAULT_TOP_K: usize = 5;

/// 임베딩 요청 기본 타임아웃
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// 데이터 디렉토리 경로 (~/.pdf-rag/)
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".pdf-rag")
}

/// RAG 코어 설정
#[derive(Debug, Clone)]
pub struct RagConfig {
    /// 청킹 설정
    pub chunk: ChunkConfig,
    /// 검색 결과 수 기본값
    pub top_k: usize,
    /// 최소 유사도 (이 값 미만은 제외)
    pub min_score: Option<f32>,
    /// 임베딩 차원
    pub embedding_dimension: usize,
    /// 임베딩 요청 타임아웃
    pub request_timeout: Duration,
    /// 스냅샷 저장 디렉토리
    pub data_dir: PathBuf,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            chunk: ChunkConfig::default(),
            top_k: DEFAULT_TOP_K,
            min_score: None,
            embedding_dimension: DEFAULT_DIMENSION,
            request_timeout: DEFAULT_TIMEOUT,
            data_dir: get_data_dir(),
        }
    }
}

impl RagConfig {
    /// 환경변수로 기본값을 덮어쓴 설정
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 키 조회 함수로 설정 구성 (테스트에서 환경변수 없이 사용)
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = parse_var(&lookup, "PDF_RAG_CHUNK_SIZE")? {
            config.chunk.chunk_size = v;
        }
        if let Some(v) = parse_var(&lookup, "PDF_RAG_CHUNK_OVERLAP")? {
            config.chunk.chunk_overlap = v;
        }
        if let Some(v) = parse_var(&lookup, "PDF_RAG_TOP_K")? {
            config.top_k = v;
        }
        if let Some(v) = parse_var::<f32, _>(&lookup, "PDF_RAG_MIN_SCORE")? {
            config.min_score = Some(v);
        }
        if let Some(v) = parse_var(&lookup, "PDF_RAG_EMBEDDING_DIMENSION")? {
            config.embedding_dimension = v;
        }
        if let Some(v) = parse_var(&lookup, "PDF_RAG_TIMEOUT_SECS")? {
            config.request_timeout = Duration::from_secs(v);
        }
        if let Some(dir) = lookup("PDF_RAG_DATA_DIR").filter(|s| !s.is_empty()) {
            config.data_dir = PathBuf::from(dir);
        }

        config.validate()?;
        Ok(config)
    }

    /// 설정 검증
    pub fn validate(&self) -> Result<()> {
        self.chunk.validate()?;

        if self.top_k == 0 {
            return Err(RagError::Config("top_k must be greater than zero".into()));
        }
        if self.embedding_dimension == 0 {
            return Err(RagError::Config(
                "embedding_dimension must be greater than zero".into(),
            ));
        }
        if let Some(score) = self.min_score {
            if !(-1.0..=1.0).contains(&score) {
                return Err(RagError::Config(format!(
                    "min_score ({}) must be within -1.0..=1.0",
                    score
                )));
            }
        }
        if self.request_timeout.is_zero() {
            return Err(RagError::Config("request timeout must be non-zero".into()));
        }
        Ok(())
    }

    /// 스냅샷 DB 경로
    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join("index.db")
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| RagError::Config(format!("{}={:?}: {}", key, raw, e))),
        _ => Ok(None),
    }
}
