//! 오프라인 해싱 임베딩
//!
//! 소문자 단어를 FNV-1a로 해싱해 부호 있는 버킷에 누적한 뒤 L2 정규화합니다.
//! 의미 검색 품질은 없지만 단어가 겹치는 텍스트끼리는 유사도가 높습니다.
//! API 키 없이 CLI를 돌리거나 테스트할 때 사용합니다.

use async_trait::async_trait;

use super::EmbeddingProvider;
use crate::error::Result;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// 결정적 해싱 임베딩 프로바이더
#[derive(Debug, Clone)]
pub struct HashEmbedding {
    dimension: usize,
}

impl HashEmbedding {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimension];

        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let hash = fnv1a(&token.to_lowercase());
            let bucket = (hash % self.dimension as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        }

        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        v
    }
}

fn fnv1a(s: &str) -> u64 {
    s.bytes()
        .fold(FNV_OFFSET, |acc, b| (acc ^ b as u64).wrapping_mul(FNV_PRIME))
}

#[async_trait]
impl EmbeddingProvider for HashEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.vectorize(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "hash-embedding-v1"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::cosine_similarity;

    #[tokio::test]
    async fn test_deterministic() {
        let e = HashEmbedding::new(64);
        assert_eq!(
            e.embed("Rust ownership rules").await.unwrap(),
            e.embed("Rust ownership rules").await.unwrap()
        );
    }

    #[tokio::test]
    async fn test_case_insensitive_and_normalized() {
        let e = HashEmbedding::new(64);
        let a = e.embed("Borrow Checker").await.unwrap();
        let b = e.embed("borrow checker").await.unwrap();
        assert_eq!(a, b);

        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_shared_words_score_higher() {
        let e = HashEmbedding::new(256);
        let query = e.embed("invoice payment terms").await.unwrap();
        let related = e.embed("payment terms are net 30 on every invoice").await.unwrap();
        let unrelated = e.embed("the cat sat quietly").await.unwrap();

        assert!(cosine_similarity(&query, &related) > cosine_similarity(&query, &unrelated));
    }

    #[tokio::test]
    async fn test_empty_text_is_zero_vector() {
        let e = HashEmbedding::new(8);
        let v = e.embed("  ...  ").await.unwrap();
        assert_eq!(v, vec![0.0; 8]);
    }
}
