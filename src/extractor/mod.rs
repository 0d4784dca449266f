//! Document Ingestor - PDF 추출 + 청킹
//!
//! PDF 바이트를 페이지별 텍스트로 추출하고 오버랩 청크로 분할합니다.
//! 인덱스는 건드리지 않으므로 실패 시 그대로 다시 시도할 수 있습니다.

pub mod pdf;

use chrono::Utc;
use sha2::{Digest, Sha256};

use crate::error::{RagError, Result};
use crate::knowledge::{ChunkConfig, Chunker, Document, DocumentId, PagedText, TextChunk};

// ============================================================================
// Types
// ============================================================================

/// 수집 요청
#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub id: DocumentId,
    pub owner: Option<String>,
    pub title: Option<String>,
    pub bytes: Vec<u8>,
}

impl IngestRequest {
    pub fn new(id: impl Into<DocumentId>, bytes: Vec<u8>) -> Self {
        Self {
            id: id.into(),
            owner: None,
            title: None,
            bytes,
        }
    }

    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// 수집 결과
#[derive(Debug, Clone)]
pub struct IngestedDocument {
    pub document: Document,
    pub chunks: Vec<TextChunk>,
}

// ============================================================================
// PdfIngestor
// ============================================================================

/// PDF 수집기
#[derive(Debug, Clone)]
pub struct PdfIngestor {
    chunker: Chunker,
}

impl PdfIngestor {
    pub fn new(config: ChunkConfig) -> Result<Self> {
        Ok(Self {
            chunker: Chunker::new(config)?,
        })
    }

    pub fn chunk_config(&self) -> &ChunkConfig {
        self.chunker.config()
    }

    /// PDF 바이트 수집
    ///
    /// 추출은 CPU 바운드이므로 `spawn_blocking`에서 실행합니다.
    /// 파서가 패닉하면 Extraction 에러로 보고합니다.
    pub async fn ingest(&self, request: IngestRequest) -> Result<IngestedDocument> {
        let IngestRequest {
            id,
            owner,
            title,
            bytes,
        } = request;

        let source_len = bytes.len();
        let content_sha256 = sha256_hex(&bytes);

        let task_id = id.clone();
        let pages = tokio::task::spawn_blocking(move || pdf::extract_pages(&task_id, &bytes))
            .await
            .map_err(|e| RagError::extraction(&id, format!("PDF extraction task failed: {}", e)))??;

        tracing::debug!("Extracted {} pages from {}", pages.len(), id);

        self.build(id, owner, title, &pages, source_len, content_sha256)
    }

    /// 이미 추출된 페이지 텍스트 수집
    pub fn ingest_pages<S: AsRef<str>>(
        &self,
        id: &DocumentId,
        pages: &[S],
    ) -> Result<IngestedDocument> {
        let joined: String = pages.iter().map(|p| p.as_ref()).collect();
        self.build(
            id.clone(),
            None,
            None,
            pages,
            joined.len(),
            sha256_hex(joined.as_bytes()),
        )
    }

    fn build<S: AsRef<str>>(
        &self,
        id: DocumentId,
        owner: Option<String>,
        title: Option<String>,
        pages: &[S],
        source_len: usize,
        content_sha256: String,
    ) -> Result<IngestedDocument> {
        if pages.is_empty() {
            return Err(RagError::extraction(&id, "no extractable pages"));
        }

        let paged = PagedText::from_pages(pages);
        if paged.text().trim().is_empty() {
            return Err(RagError::EmptyDocument { document_id: id });
        }

        let chunks = self.chunker.chunk_document(&id, &paged);
        let page_count = paged.page_count();
        let text = paged.into_text();

        tracing::info!(
            "Ingested {} ({} pages, {} chunks)",
            id,
            page_count,
            chunks.len()
        );

        Ok(IngestedDocument {
            document: Document {
                char_count: text.chars().count(),
                id,
                owner,
                title,
                text,
                page_count,
                source_len,
                content_sha256,
                created_at: Utc::now(),
            },
            chunks,
        })
    }
}

/// SHA-256 hex 지문
pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::pdf::fixtures::sample_pdf;
    use super::*;
    use crate::knowledge::reassemble;

    fn ingestor(size: usize, overlap: usize) -> PdfIngestor {
        PdfIngestor::new(ChunkConfig::new(size, overlap).unwrap()).unwrap()
    }

    #[test]
    fn test_three_page_scenario() {
        let id = DocumentId::new("d1");
        let doc = ingestor(4, 1)
            .ingest_pages(&id, &["AAAA", "BBBB", "CCCC"])
            .unwrap();

        let texts: Vec<&str> = doc.chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["AAAA", "A\nBB", "BBB\n", "\nCCC", "CC"]);
        assert_eq!(doc.document.page_count, 3);
        assert_eq!(doc.document.char_count, 14);
        assert_eq!(reassemble(&texts, 1), doc.document.text);
    }

    #[test]
    fn test_blank_pages_are_empty_document() {
        let err = ingestor(10, 2)
            .ingest_pages(&DocumentId::new("blank"), &["  ", "\n\t"])
            .unwrap_err();
        assert!(matches!(err, RagError::EmptyDocument { .. }));
    }

    #[test]
    fn test_no_pages_is_extraction_error() {
        let pages: [&str; 0] = [];
        let err = ingestor(10, 2)
            .ingest_pages(&DocumentId::new("none"), &pages)
            .unwrap_err();
        assert!(matches!(err, RagError::Extraction { .. }));
    }

    #[test]
    fn test_ingestion_is_repeatable() {
        let id = DocumentId::new("d1");
        let ing = ingestor(8, 3);
        let a = ing.ingest_pages(&id, &["hello world", "second page"]).unwrap();
        let b = ing.ingest_pages(&id, &["hello world", "second page"]).unwrap();
        assert_eq!(a.chunks, b.chunks);
        assert_eq!(a.document.content_sha256, b.document.content_sha256);
    }

    #[tokio::test]
    async fn test_corrupt_bytes_are_extraction_error() {
        let request = IngestRequest::new("broken", b"%PDF-1.4\n garbage garbage".to_vec())
            .owner("alice")
            .title("Broken");
        let err = ingestor(100, 10).ingest(request).await.unwrap_err();
        assert!(matches!(err, RagError::Extraction { .. }));
    }

    #[tokio::test]
    async fn test_ingest_multi_page_pdf() {
        let bytes = sample_pdf(&["Alpha page one", "Bravo page two", "Charlie page three"]);
        let doc = ingestor(20, 5)
            .ingest(IngestRequest::new("lecture", bytes.clone()).owner("alice"))
            .await
            .unwrap();

        assert_eq!(doc.document.page_count, 3);
        assert_eq!(doc.document.source_len, bytes.len());
        assert_eq!(doc.document.content_sha256, sha256_hex(&bytes));
        assert!(!doc.document.text.contains("oneBravo"));
        assert!(doc.document.text.contains("one\nBravo"));

        assert_eq!(doc.chunks.first().unwrap().start_page, 1);
        assert_eq!(doc.chunks.last().unwrap().end_page, 3);
        for chunk in &doc.chunks {
            assert!(chunk.start_page <= chunk.end_page);
            if chunk.text.contains("Alpha") {
                assert_eq!(chunk.start_page, 1);
            }
            if chunk.text.contains("Bravo page two") {
                assert!(chunk.start_page <= 2 && chunk.end_page >= 2);
            }
            if chunk.text.contains("Charlie") {
                assert_eq!(chunk.end_page, 3);
            }
        }
        assert!(doc.chunks.iter().any(|c| c.start_page < c.end_page));
    }

    #[test]
    fn test_sha256_hex() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
