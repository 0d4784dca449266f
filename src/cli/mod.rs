//! CLI 모듈
//!
//! pdf-rag CLI 명령어 정의 및 구현

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};

use crate::collector::{CollectedPdf, PdfCollector};
use crate::config::RagConfig;
use crate::embedding::{create_embedder, has_api_key, EmbeddingProvider, HashEmbedding};
use crate::extractor::IngestRequest;
use crate::knowledge::{DocumentId, IngestStatus, KnowledgeStore, RagService};

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "pdf-rag")]
#[command(version, about = "PDF 채팅용 RAG 코어", long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// 모든 명령어에 공통인 옵션 (환경변수 설정을 덮어씀)
#[derive(Args, Debug, Default)]
pub struct GlobalArgs {
    /// 스냅샷 저장 디렉토리
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// API 키 없이 오프라인 해싱 임베딩 사용
    #[arg(long, global = true)]
    pub offline: bool,

    /// 청크 크기 (문자 수)
    #[arg(long, global = true)]
    pub chunk_size: Option<usize>,

    /// 청크 오버랩 (문자 수)
    #[arg(long, global = true)]
    pub chunk_overlap: Option<usize>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// PDF 파일 또는 폴더를 인덱스에 추가
    Ingest {
        /// 수집할 PDF 파일 경로
        #[arg(long)]
        file: Option<PathBuf>,

        /// 수집할 폴더 경로 (재귀)
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// 문서 소유자 (ID가 `owner/name` 형태가 됨)
        #[arg(short, long)]
        owner: Option<String>,

        /// 문서 ID (단일 파일만, 기본값: 파일 이름)
        #[arg(long)]
        id: Option<String>,

        /// 문서 제목
        #[arg(short, long)]
        title: Option<String>,

        /// 내용이 같아도 재인덱싱
        #[arg(long)]
        force: bool,
    },

    /// 문서에서 관련 청크 검색
    Query {
        /// 검색 쿼리
        query: String,

        /// 검색할 문서 ID (여러 번 지정 가능)
        #[arg(short, long = "doc", required = true)]
        docs: Vec<String>,

        /// 결과 개수 (기본값: 설정의 top_k)
        #[arg(short, long)]
        k: Option<usize>,

        /// JSON 출력
        #[arg(long)]
        json: bool,
    },

    /// 인덱싱된 문서 목록
    List {
        /// JSON 출력
        #[arg(long)]
        json: bool,
    },

    /// 문서 삭제
    Delete {
        /// 삭제할 문서 ID
        #[arg(long)]
        id: String,
    },

    /// 상태 확인
    Status {
        /// 인덱스 통계를 JSON으로 출력
        #[arg(long)]
        json: bool,
    },
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    let config = build_config(&cli.global)?;
    let offline = cli.global.offline;

    match cli.command {
        Commands::Ingest {
            file,
            dir,
            owner,
            id,
            title,
            force,
        } => cmd_ingest(&config, offline, file, dir, owner, id, title, force).await,
        Commands::Query { query, docs, k, json } => {
            cmd_query(&config, offline, &query, docs, k, json).await
        }
        Commands::List { json } => cmd_list(&config, json),
        Commands::Delete { id } => cmd_delete(&config, &id),
        Commands::Status { json } => cmd_status(&config, offline, json).await,
    }
}

/// 환경변수 설정 위에 CLI 플래그 적용
fn build_config(global: &GlobalArgs) -> Result<RagConfig> {
    let mut config = RagConfig::from_env().context("설정 로드 실패")?;

    if let Some(dir) = &global.data_dir {
        config.data_dir = dir.clone();
    }
    if let Some(size) = global.chunk_size {
        config.chunk.chunk_size = size;
    }
    if let Some(overlap) = global.chunk_overlap {
        config.chunk.chunk_overlap = overlap;
    }

    config.validate().context("잘못된 설정")?;
    Ok(config)
}

/// 임베딩 프로바이더 선택
fn build_embedder(config: &RagConfig, offline: bool) -> Result<Arc<dyn EmbeddingProvider>> {
    if offline {
        return Ok(Arc::new(HashEmbedding::new(config.embedding_dimension)));
    }

    if !has_api_key() {
        bail!(
            "API 키가 설정되지 않았습니다.\n\n\
             설정 방법:\n  \
             export GEMINI_API_KEY=your-api-key\n  \
             또는 --offline 으로 해싱 임베딩 사용\n\n\
             API 키 발급: https://aistudio.google.com/app/apikey"
        );
    }

    let embedder = create_embedder(config.embedding_dimension, config.request_timeout)
        .context("임베딩 프로바이더 생성 실패")?;
    Ok(Arc::new(embedder))
}

async fn open_service(config: &RagConfig, offline: bool) -> Result<Arc<RagService>> {
    let embedder = build_embedder(config, offline)?;
    let service = RagService::open(config, embedder)
        .await
        .context("RagService 초기화 실패")?;
    Ok(Arc::new(service))
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 수집 명령어 (ingest)
///
/// 파일마다 백그라운드 태스크로 수집하고 모두 끝날 때까지 기다립니다.
#[allow(clippy::too_many_arguments)]
async fn cmd_ingest(
    config: &RagConfig,
    offline: bool,
    file: Option<PathBuf>,
    dir: Option<PathBuf>,
    owner: Option<String>,
    id: Option<String>,
    title: Option<String>,
    force: bool,
) -> Result<()> {
    let collector = PdfCollector::with_defaults();

    let files: Vec<CollectedPdf> = if let Some(ref file_path) = file {
        match collector.collect_file(file_path)? {
            Some(f) => vec![f],
            None => {
                println!("[!] PDF 파일이 아니거나 너무 큽니다: {:?}", file_path);
                return Ok(());
            }
        }
    } else if let Some(ref dir_path) = dir {
        if id.is_some() {
            bail!("--id는 --file과 함께만 사용할 수 있습니다");
        }
        collector.collect_directory(dir_path)?
    } else {
        bail!("--file 또는 --dir를 지정해야 합니다");
    };

    if files.is_empty() {
        println!("[!] 수집할 PDF가 없습니다.");
        return Ok(());
    }

    let total_size: u64 = files.iter().map(|f| f.size).sum();
    println!(
        "[*] 수집 대상: PDF {} 개 ({})",
        files.len(),
        format_bytes(total_size as usize)
    );

    let ids = assign_document_ids(&files, owner.as_deref(), id.as_deref())?;
    let service = open_service(config, offline).await?;

    let mut handles = Vec::with_capacity(files.len());
    for (collected, doc_id) in files.iter().zip(ids) {
        let bytes = tokio::fs::read(&collected.path)
            .await
            .with_context(|| format!("Failed to read PDF: {:?}", collected.path))?;

        let mut request = IngestRequest::new(doc_id, bytes);
        if let Some(owner) = &owner {
            request = request.owner(owner.as_str());
        }
        request = request.title(title.clone().unwrap_or_else(|| collected.stem()));

        handles.push(service.spawn_ingest(request, force));
    }

    let mut success_count = 0;
    let mut error_count = 0;

    for (collected, joined) in files.iter().zip(futures::future::join_all(handles).await) {
        let name = collected.path.display();
        match joined {
            Ok(Ok(report)) => {
                success_count += 1;
                match report.status {
                    IngestStatus::Indexed => println!(
                        "[OK] {} → {} ({} 페이지, {} 청크, {} ms)",
                        name,
                        report.document_id,
                        report.page_count,
                        report.chunk_count,
                        report.elapsed_ms
                    ),
                    IngestStatus::Unchanged => println!(
                        "[=] {} → {} (변경 없음, --force로 재인덱싱)",
                        name, report.document_id
                    ),
                }
            }
            Ok(Err(e)) => {
                error_count += 1;
                let hint = if e.is_retryable() { " (재시도 가능)" } else { "" };
                println!("[!] {} 실패: {}{}", name, e, hint);
            }
            Err(e) => {
                error_count += 1;
                println!("[!] {} 작업 실패: {}", name, e);
            }
        }
    }

    println!();
    println!("[OK] 완료: 성공 {}, 실패 {}", success_count, error_count);
    Ok(())
}

/// 검색 명령어 (query)
async fn cmd_query(
    config: &RagConfig,
    offline: bool,
    query: &str,
    docs: Vec<String>,
    k: Option<usize>,
    json: bool,
) -> Result<()> {
    let service = open_service(config, offline).await?;
    let ids: Vec<DocumentId> = docs.into_iter().map(DocumentId::from).collect();

    let results = service
        .retrieve_many(&ids, query, k)
        .await
        .context("검색 실패")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    if results.is_empty() {
        println!("[!] 검색 결과가 없습니다.");
        return Ok(());
    }

    println!("[OK] 검색 결과 ({} 건):\n", results.len());

    for (i, result) in results.iter().enumerate() {
        let pages = if result.start_page == result.end_page {
            format!("p.{}", result.start_page)
        } else {
            format!("p.{}-{}", result.start_page, result.end_page)
        };
        println!(
            "{}. [점수: {:.4}] {} #{} ({})",
            i + 1,
            result.score,
            result.document_id,
            result.seq,
            pages
        );
        println!("   내용: {}", truncate_text(&result.text, 200));
        println!();
    }

    Ok(())
}

/// 목록 명령어 (list)
///
/// 임베딩 프로바이더 없이 스냅샷 저장소만 읽습니다.
fn cmd_list(config: &RagConfig, json: bool) -> Result<()> {
    let store = KnowledgeStore::open(&config.snapshot_path()).context("KnowledgeStore 열기 실패")?;
    let docs = store.list_documents().context("문서 목록 조회 실패")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&docs)?);
        return Ok(());
    }

    if docs.is_empty() {
        println!("[!] 인덱싱된 문서가 없습니다.");
        return Ok(());
    }

    println!("[OK] 인덱싱된 문서 ({} 건):\n", docs.len());

    for doc in docs {
        let title = doc
            .meta
            .title
            .as_deref()
            .map(|t| truncate_text(t, 40))
            .unwrap_or_else(|| "-".to_string());

        println!("  {} {}", doc.meta.id, title);
        println!(
            "        {} 페이지 | {} 청크 | {} | {}",
            doc.meta.page_count,
            doc.chunk_count,
            doc.model,
            doc.indexed_at.format("%Y-%m-%d %H:%M")
        );
    }

    Ok(())
}

/// 삭제 명령어 (delete)
fn cmd_delete(config: &RagConfig, id: &str) -> Result<()> {
    let store = KnowledgeStore::open(&config.snapshot_path()).context("KnowledgeStore 열기 실패")?;
    let id = DocumentId::new(id);

    if store.delete_document(&id).context("문서 삭제 실패")? {
        println!("[OK] 문서 {} 삭제됨", id);
    } else {
        println!("[!] 문서 {}를 찾을 수 없습니다", id);
    }
    Ok(())
}

/// 상태 명령어 (status)
async fn cmd_status(config: &RagConfig, offline: bool, json: bool) -> Result<()> {
    let embedder_ready = offline || has_api_key();

    if json {
        if !embedder_ready {
            bail!("인덱스 통계에는 API 키 또는 --offline이 필요합니다");
        }
        let service = open_service(config, offline).await?;
        println!("{}", serde_json::to_string_pretty(&service.stats().await)?);
        return Ok(());
    }

    println!("pdf-rag v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("[*] 데이터 디렉토리: {}", config.data_dir.display());
    println!(
        "[*] 청킹: {} 문자 / 오버랩 {}",
        config.chunk.chunk_size, config.chunk.chunk_overlap
    );

    if has_api_key() {
        println!("[OK] API 키: 설정됨");
    } else {
        println!("[!] API 키: 미설정");
        println!("    설정: export GEMINI_API_KEY=your-key");
    }

    match KnowledgeStore::open(&config.snapshot_path()).and_then(|s| s.stats()) {
        Ok(stats) => {
            println!(
                "[OK] 스냅샷: 문서 {} 건, 청크 {} 개",
                stats.document_count, stats.chunk_count
            );
        }
        Err(e) => println!("[!] 스냅샷 열기 실패: {}", e),
    }

    if embedder_ready {
        match open_service(config, offline).await {
            Ok(service) => {
                let stats = service.stats().await;
                println!(
                    "[OK] 인덱스 ({}@{}): 문서 {} 건, 청크 {} 개, 벡터 {}",
                    stats.embedding_model,
                    stats.dimension,
                    stats.document_count,
                    stats.chunk_count,
                    format_bytes(stats.vector_bytes)
                );
            }
            Err(e) => tracing::debug!("RagService 초기화 실패: {}", e),
        }
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 수집 파일마다 문서 ID 결정
///
/// 두 파일이 같은 ID로 매핑되면 서로의 인덱스를 덮어쓰므로 수집 전에 실패합니다.
fn assign_document_ids(
    files: &[CollectedPdf],
    owner: Option<&str>,
    id: Option<&str>,
) -> Result<Vec<DocumentId>> {
    let ids: Vec<DocumentId> = files
        .iter()
        .map(|collected| match (id, owner) {
            (Some(id), Some(owner)) => DocumentId::scoped(owner, id),
            (Some(id), None) => DocumentId::new(id),
            (None, _) => collected.document_id(owner),
        })
        .collect();

    let mut seen: HashMap<&DocumentId, &CollectedPdf> = HashMap::new();
    for (doc_id, collected) in ids.iter().zip(files) {
        if let Some(previous) = seen.insert(doc_id, collected) {
            bail!(
                "문서 ID {}가 중복됩니다: {:?}, {:?}",
                doc_id,
                previous.path,
                collected.path
            );
        }
    }

    Ok(ids)
}

/// 텍스트 자르기 (UTF-8 안전)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

/// 바이트 크기 포맷팅
fn format_bytes(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("hello", 10), "hello");
        assert_eq!(truncate_text("hello world", 5), "hello...");
        assert_eq!(truncate_text("hello\nworld", 20), "hello world");
    }

    #[test]
    fn test_truncate_unicode() {
        assert_eq!(truncate_text("안녕하세요 세계", 5), "안녕하세요...");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500), "500 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1048576), "1.00 MB");
    }

    fn collected(path: &str, name: &str) -> CollectedPdf {
        CollectedPdf {
            path: PathBuf::from(path),
            size: 1,
            name: name.to_string(),
        }
    }

    #[test]
    fn test_assign_ids_uses_relative_names() {
        let files = vec![
            collected("/pdfs/fall/syllabus.pdf", "fall/syllabus"),
            collected("/pdfs/spring/syllabus.pdf", "spring/syllabus"),
        ];
        let ids = assign_document_ids(&files, Some("alice"), None).unwrap();
        assert_eq!(ids[0].as_str(), "alice/fall/syllabus");
        assert_eq!(ids[1].as_str(), "alice/spring/syllabus");
    }

    #[test]
    fn test_assign_ids_rejects_collisions() {
        let files = vec![
            collected("/pdfs/Notes.pdf", "Notes"),
            collected("/pdfs/Notes.PDF", "Notes"),
        ];
        let err = assign_document_ids(&files, None, None).unwrap_err();
        assert!(err.to_string().contains("Notes"));
    }

    #[test]
    fn test_explicit_id_is_scoped_to_owner() {
        let files = vec![collected("/tmp/a.pdf", "a")];
        let ids = assign_document_ids(&files, Some("bob"), Some("paper")).unwrap();
        assert_eq!(ids[0].as_str(), "bob/paper");
    }

    #[test]
    fn test_parse_query_with_multiple_docs() {
        let cli = Cli::try_parse_from([
            "pdf-rag", "--offline", "query", "what is it", "--doc", "a", "--doc", "b", "-k", "3",
        ])
        .unwrap();
        assert!(cli.global.offline);
        match cli.command {
            Commands::Query { query, docs, k, json } => {
                assert_eq!(query, "what is it");
                assert_eq!(docs, vec!["a", "b"]);
                assert_eq!(k, Some(3));
                assert!(!json);
            }
            _ => panic!("expected query"),
        }
    }

    #[test]
    fn test_query_requires_doc() {
        assert!(Cli::try_parse_from(["pdf-rag", "query", "q"]).is_err());
    }

    #[test]
    fn test_global_overrides_apply() {
        let global = GlobalArgs {
            data_dir: Some(PathBuf::from("/tmp/pdf-rag-cli")),
            offline: true,
            chunk_size: Some(300),
            chunk_overlap: Some(30),
        };
        let config = build_config(&global).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/pdf-rag-cli"));
        assert_eq!(config.chunk.chunk_size, 300);
        assert_eq!(config.chunk.chunk_overlap, 30);
    }

    #[test]
    fn test_offline_embedder_needs_no_key() {
        let config = RagConfig::default();
        let embedder = build_embedder(&config, true).unwrap();
        assert_eq!(embedder.name(), "hash-embedding-v1");
        assert_eq!(embedder.dimension(), config.embedding_dimension);
    }
}
