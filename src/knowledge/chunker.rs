//! Text Chunking Module
//!
//! 고정 길이 + 오버랩 문자 윈도우로 텍스트를 분할합니다.
//!
//! 경계 규칙 (문자 = Unicode scalar value):
//! - 청크 i는 `[i*(T-O), i*(T-O)+T)` 구간 (텍스트 길이로 잘림)
//! - 끝이 텍스트 끝에 닿는 첫 청크에서 멈춤 → 마지막 청크는 T보다 짧을 수 있음
//! - 인접 청크는 정확히 O 문자를 공유
//!
//! 예: `"AAAA BBBB CCCC"`, T=4, O=1 → `["AAAA", "A BB", "BBB ", " CCC", "CC"]`

use crate::error::{RagError, Result};

use super::document::{DocumentId, TextChunk};

// ============================================================================
// Chunk Configuration
// ============================================================================

/// 청킹 설정
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkConfig {
    /// 청크 크기 T (문자 수)
    pub chunk_size: usize,
    /// 오버랩 크기 O (문자 수, O < T)
    pub chunk_overlap: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

impl ChunkConfig {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        let config = Self {
            chunk_size,
            chunk_overlap,
        };
        config.validate()?;
        Ok(config)
    }

    /// RAG 최적화된 설정
    pub fn for_rag() -> Self {
        Self {
            chunk_size: 1500,
            chunk_overlap: 150,
        }
    }

    /// 빠른 인덱싱용 설정 (오버랩 없음)
    pub fn for_fast() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 0,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(RagError::Config("chunk_size must be greater than zero".into()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(RagError::Config(format!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        Ok(())
    }

    fn stride(&self) -> usize {
        self.chunk_size - self.chunk_overlap
    }
}

// ============================================================================
// PagedText
// ============================================================================

/// 페이지 경계 구분자
pub const PAGE_SEPARATOR: char = '\n';

/// 페이지를 이어 붙인 텍스트 + 페이지 시작 위치 테이블
///
/// 청크 → 페이지 역참조에 사용합니다. 구분자는 앞 페이지에 속합니다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagedText {
    text: String,
    /// 각 페이지의 시작 문자 위치 (오름차순, 첫 값은 0)
    page_starts: Vec<usize>,
}

impl PagedText {
    pub fn from_pages<S: AsRef<str>>(pages: &[S]) -> Self {
        let mut text = String::new();
        let mut page_starts = Vec::with_capacity(pages.len());
        let mut chars = 0;

        for (i, page) in pages.iter().enumerate() {
            if i > 0 {
                text.push(PAGE_SEPARATOR);
                chars += 1;
            }
            page_starts.push(chars);
            let page = page.as_ref();
            text.push_str(page);
            chars += page.chars().count();
        }

        Self { text, page_starts }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn into_text(self) -> String {
        self.text
    }

    pub fn page_count(&self) -> usize {
        self.page_starts.len()
    }

    /// 문자 위치가 속한 페이지 (1-based)
    pub fn page_of(&self, char_index: usize) -> usize {
        self.page_starts
            .partition_point(|&start| start <= char_index)
            .max(1)
    }
}

// ============================================================================
// Chunker
// ============================================================================

/// 분할 결과 구간
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSpan {
    pub char_start: usize,
    pub char_end: usize,
    pub text: String,
}

/// 문자 윈도우 청커
#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkConfig,
}

impl Chunker {
    /// 설정으로 생성 (검증 포함)
    pub fn new(config: ChunkConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ChunkConfig {
        &self.config
    }

    /// 텍스트를 구간으로 분할
    pub fn split(&self, text: &str) -> Vec<ChunkSpan> {
        // 문자 인덱스 → 바이트 오프셋 (마지막에 끝 위치 추가)
        let offsets: Vec<usize> = text
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(text.len()))
            .collect();
        let total = offsets.len() - 1;

        if total == 0 {
            return vec![];
        }

        let mut spans = Vec::with_capacity(total / self.config.stride() + 1);
        let mut start = 0;

        loop {
            let end = (start + self.config.chunk_size).min(total);
            spans.push(ChunkSpan {
                char_start: start,
                char_end: end,
                text: text[offsets[start]..offsets[end]].to_string(),
            });

            if end >= total {
                break;
            }
            start += self.config.stride();
        }

        spans
    }

    /// 페이지 텍스트를 문서 청크로 분할
    pub fn chunk_document(&self, document_id: &DocumentId, paged: &PagedText) -> Vec<TextChunk> {
        self.split(paged.text())
            .into_iter()
            .enumerate()
            .map(|(seq, span)| TextChunk {
                document_id: document_id.clone(),
                seq,
                start_page: paged.page_of(span.char_start),
                end_page: paged.page_of(span.char_end.saturating_sub(1)),
                char_start: span.char_start,
                text: span.text,
            })
            .collect()
    }
}

/// 청크에서 원문 복원 (오버랩 제거 후 연결)
pub fn reassemble<S: AsRef<str>>(chunks: &[S], overlap: usize) -> String {
    let mut out = String::new();
    for (i, chunk) in chunks.iter().enumerate() {
        let chunk = chunk.as_ref();
        if i == 0 {
            out.push_str(chunk);
        } else {
            out.extend(chunk.chars().skip(overlap));
        }
    }
    out
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(spans: &[ChunkSpan]) -> Vec<&str> {
        spans.iter().map(|s| s.text.as_str()).collect()
    }

    fn chunker(size: usize, overlap: usize) -> Chunker {
        Chunker::new(ChunkConfig::new(size, overlap).unwrap()).unwrap()
    }

    #[test]
    fn test_chunker_empty() {
        assert!(chunker(4, 1).split("").is_empty());
    }

    #[test]
    fn test_boundary_rule_three_words() {
        let spans = chunker(4, 1).split("AAAA BBBB CCCC");
        assert_eq!(texts(&spans), vec!["AAAA", "A BB", "BBB ", " CCC", "CC"]);
        assert_eq!(spans[4].char_start, 12);
        assert_eq!(spans[4].char_end, 14);
    }

    #[test]
    fn test_short_remainder_kept() {
        let spans = chunker(4, 0).split("abcdefghij");
        assert_eq!(texts(&spans), vec!["abcd", "efgh", "ij"]);
    }

    #[test]
    fn test_exact_fit_has_no_extra_chunk() {
        let spans = chunker(4, 1).split("abcdefg");
        assert_eq!(texts(&spans), vec!["abcd", "defg"]);
    }

    #[test]
    fn test_text_shorter_than_chunk() {
        let spans = chunker(100, 10).split("short");
        assert_eq!(texts(&spans), vec!["short"]);
    }

    #[test]
    fn test_adjacent_chunks_share_overlap() {
        let text = "The quick brown fox jumps over the lazy dog. 다람쥐 헌 쳇바퀴에 타고파.";
        let overlap = 5;
        let spans = chunker(16, overlap).split(text);

        for pair in spans.windows(2) {
            let tail: String = {
                let chars: Vec<char> = pair[0].text.chars().collect();
                chars[chars.len() - overlap..].iter().collect()
            };
            let head: String = pair[1].text.chars().take(overlap).collect();
            assert_eq!(tail, head);
        }
    }

    #[test]
    fn test_reassemble_reconstructs_text() {
        let text = "안녕하세요 세계! Lorem ipsum dolor sit amet, consectetur adipiscing elit.";
        for (size, overlap) in [(7, 3), (10, 0), (1, 0), (50, 49)] {
            let spans = chunker(size, overlap).split(text);
            let pieces: Vec<&str> = texts(&spans);
            assert_eq!(reassemble(&pieces, overlap), text, "T={} O={}", size, overlap);
        }
    }

    #[test]
    fn test_multibyte_lengths_in_chars() {
        let spans = chunker(3, 1).split("가나다라마");
        assert_eq!(texts(&spans), vec!["가나다", "다라마"]);
    }

    #[test]
    fn test_config_validation() {
        assert!(ChunkConfig::new(0, 0).is_err());
        assert!(ChunkConfig::new(4, 4).is_err());
        assert!(ChunkConfig::new(4, 3).is_ok());
        assert!(ChunkConfig::for_rag().validate().is_ok());
        assert_eq!(ChunkConfig::for_fast().chunk_overlap, 0);
    }

    #[test]
    fn test_paged_text_offsets() {
        let paged = PagedText::from_pages(&["AAAA", "BBBB", "CCCC"]);
        assert_eq!(paged.text(), "AAAA\nBBBB\nCCCC");
        assert_eq!(paged.page_count(), 3);
        assert_eq!(paged.page_of(0), 1);
        assert_eq!(paged.page_of(4), 1);
        assert_eq!(paged.page_of(5), 2);
        assert_eq!(paged.page_of(13), 3);
    }

    #[test]
    fn test_chunk_document_page_back_references() {
        let id = DocumentId::new("d1");
        let paged = PagedText::from_pages(&["AAAA", "BBBB", "CCCC"]);
        let chunks = chunker(4, 1).chunk_document(&id, &paged);

        assert_eq!(chunks[0].text, "AAAA");
        assert_eq!((chunks[0].start_page, chunks[0].end_page), (1, 1));
        // "A\nBB"
        assert_eq!((chunks[1].start_page, chunks[1].end_page), (1, 2));
        assert!(chunks.iter().enumerate().all(|(i, c)| c.seq == i));
        assert!(chunks.iter().all(|c| c.document_id == id));
        assert_eq!(chunks.last().map(|c| c.end_page), Some(3));
    }
}
