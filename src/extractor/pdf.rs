//! PDF 텍스트 추출 모듈
//!
//! pdf-extract 크레이트를 사용하여 메모리 상의 PDF에서 페이지별 텍스트를 추출합니다.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::{RagError, Result};
use crate::knowledge::DocumentId;

/// PDF 헤더를 찾는 범위 (일부 파일은 헤더 앞에 쓰레기 바이트가 있음)
const HEADER_SEARCH_LIMIT: usize = 1024;

/// PDF 바이트에서 페이지별 텍스트 추출
///
/// CPU 바운드이므로 async 컨텍스트에서는 `spawn_blocking`으로 호출합니다.
/// 암호화/손상/비-PDF 입력은 `Extraction` 에러입니다.
/// 반환 벡터의 i번째 원소가 (i+1)번째 페이지입니다. 빈 페이지도 자리를 유지합니다.
pub fn extract_pages(id: &DocumentId, bytes: &[u8]) -> Result<Vec<String>> {
    if !has_pdf_header(bytes) {
        return Err(RagError::extraction(id, "not a PDF (missing %PDF- header)"));
    }

    if is_encrypted(bytes) {
        return Err(RagError::extraction(id, "PDF is encrypted"));
    }

    let raw_pages = pdf_extract::extract_text_from_mem_by_pages(bytes).map_err(|e| {
        let message = e.to_string();
        if message.to_lowercase().contains("encrypt") {
            RagError::extraction(id, "PDF is encrypted")
        } else {
            RagError::extraction(id, format!("failed to extract text: {}", message))
        }
    })?;

    let pages = match raw_pages.len() {
        0 => return Ok(vec![]),
        // 단일 페이지 출력은 페이지 마커가 섞인 텍스트일 수 있음
        1 => split_pdf_pages(&raw_pages[0]),
        _ => raw_pages.iter().map(|p| p.trim().to_string()).collect(),
    };

    if pages.iter().all(|p| p.is_empty()) {
        tracing::warn!(
            "No text extracted from PDF {}. It might be a scanned document.",
            id
        );
    }

    Ok(pages)
}

fn has_pdf_header(bytes: &[u8]) -> bool {
    let head = &bytes[..bytes.len().min(HEADER_SEARCH_LIMIT)];
    find(head, b"%PDF-").is_some()
}

/// 마지막 트레일러 딕셔너리에 `/Encrypt` 항목이 있는지 확인
fn is_encrypted(bytes: &[u8]) -> bool {
    trailer_dictionary(bytes).is_some_and(|dict| find(dict, b"/Encrypt").is_some())
}

/// 마지막 트레일러 영역
///
/// 클래식 `trailer ... startxref` 또는 PDF 1.5 cross-reference stream 객체의
/// 딕셔너리(`N 0 obj ... stream`) 중 파일 뒤쪽에 있는 것을 사용합니다.
fn trailer_dictionary(bytes: &[u8]) -> Option<&[u8]> {
    let classic = rfind(bytes, b"trailer");
    let xref_stream = rfind(bytes, b"/XRef");

    match (classic, xref_stream) {
        (Some(t), x) if x.map_or(true, |x| t > x) => {
            let end = find(&bytes[t..], b"startxref").map_or(bytes.len(), |e| t + e);
            Some(&bytes[t..end])
        }
        (_, Some(x)) => {
            let start = rfind(&bytes[..x], b"obj").unwrap_or(0);
            let end = find(&bytes[x..], b"stream").map_or(bytes.len(), |e| x + e);
            Some(&bytes[start..end])
        }
        _ => None,
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn rfind(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).rposition(|w| w == needle)
}

fn page_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^[\s]*[-=]+[\s]*(?:Page[\s]*)?(\d+)[\s]*[-=]+[\s]*$")
            .expect("page marker regex is valid")
    })
}

/// 한 덩어리 텍스트를 페이지별로 분리
///
/// 폼피드(`\x0c`) → `--- Page N ---` 마커 → 전체를 한 페이지 순으로 시도합니다.
/// 중간의 빈 페이지는 페이지 번호 유지를 위해 남기고 앞뒤 빈 페이지만 제거합니다.
pub(crate) fn split_pdf_pages(text: &str) -> Vec<String> {
    let pages = trim_pages(text.split('\x0c'));
    if pages.len() > 1 {
        return pages;
    }

    let marker = page_marker();
    if marker.is_match(text) {
        let pages = trim_pages(marker.split(text));
        if pages.len() > 1 {
            return pages;
        }
    }

    vec![text.trim().to_string()]
}

fn trim_pages<'a>(parts: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut pages: Vec<String> = parts.map(|s| s.trim().to_string()).collect();

    while pages.last().is_some_and(|p| p.is_empty()) {
        pages.pop();
    }
    let leading = pages.iter().take_while(|p| p.is_empty()).count();
    pages.drain(..leading);

    pages
}


// ============================================================================
// Tests
// ============================================================================
