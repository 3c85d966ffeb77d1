//! CLI 모듈
//!
//! symptom-checker 명령어 정의 및 구현.
//! 전역 플래그는 환경변수 설정을 덮어씁니다.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use crate::chat::{default_cases, evaluate, load_cases, MatchKind, ResponseMatcher};
use crate::config::{AppConfig, EmbeddingBackend};
use crate::embedding::{BertConfig, EmbeddingProvider, HashEmbedding};
use crate::knowledge::{load_pairs, EmbeddingCache, MedicalDataset};
use crate::server;

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "symptom-checker")]
#[command(version, about = "복부 통증 증상 안내 챗봇", long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// 모든 명령어에 적용되는 설정 덮어쓰기
#[derive(Args, Debug, Default)]
pub struct GlobalArgs {
    /// 지식 파일 (데이터셋 JSON 또는 질문/답변 목록)
    #[arg(long, global = true)]
    pub knowledge: Option<PathBuf>,

    /// 유사도 임계값 [-1, 1]
    #[arg(long, global = true)]
    pub threshold: Option<f32>,

    /// 임베딩 프로바이더 (gemini | local | hash)
    #[arg(long, global = true)]
    pub provider: Option<EmbeddingBackend>,

    /// 로컬 임베딩 모델 디렉토리
    #[arg(long, global = true)]
    pub model_dir: Option<PathBuf>,

    /// 인사말 정규식 (반복 가능, 기본 패턴을 대체)
    #[arg(long = "greeting", global = true)]
    pub greetings: Vec<String>,

    /// 임베딩 캐시 사용 안 함
    #[arg(long, global = true)]
    pub no_cache: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// HTTP API 서버 실행
    Serve {
        /// 바인딩 호스트
        #[arg(long)]
        host: Option<String>,

        /// 바인딩 포트
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// 메시지 하나에 대한 응답 확인
    Ask {
        /// 사용자 메시지
        message: String,

        /// 결정 정보를 JSON으로 출력
        #[arg(long)]
        json: bool,
    },

    /// 질문/기대 결정 케이스로 매처 평가
    Evaluate {
        /// 케이스 파일 (`[{question, expect}]`), 없으면 기본 케이스
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// 요약을 JSON으로 출력
        #[arg(long)]
        json: bool,
    },

    /// 내장 데이터셋을 JSON으로 내보내기
    ExportData {
        /// 출력 경로
        path: PathBuf,

        /// 데이터셋 대신 펼친 질문/답변 목록으로 저장
        #[arg(long)]
        pairs: bool,
    },

    /// 임베딩 캐시 비우기
    ClearCache,

    /// 상태 확인
    Status,
}

impl GlobalArgs {
    /// 환경변수 설정 로드 후 플래그 적용
    pub fn load_config(&self) -> Result<AppConfig> {
        let mut config = AppConfig::from_env()?;
        self.apply(&mut config)?;
        Ok(config)
    }

    /// 설정에 플래그 적용
    pub fn apply(&self, config: &mut AppConfig) -> Result<()> {
        if let Some(ref path) = self.knowledge {
            config.knowledge_base_path = Some(path.clone());
        }
        if let Some(threshold) = self.threshold {
            config.similarity_threshold = threshold;
        }
        if let Some(ref dir) = self.model_dir {
            config.embedding.model_dir = dir.clone();
            if self.provider.is_none() {
                config.embedding.backend = EmbeddingBackend::Local;
            }
        }
        if let Some(provider) = self.provider {
            config.embedding.backend = provider;
        }
        if !self.greetings.is_empty() {
            config.greeting_patterns = self.greetings.clone();
        }
        if self.no_cache {
            config.cache_enabled = false;
        }
        config.validate()
    }
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    let Cli { global, command } = cli;

    match command {
        Commands::Serve { host, port } => {
            let mut config = global.load_config()?;
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(port) = port {
                config.port = port;
            }
            server::run(&config).await
        }
        Commands::Ask { message, json } => cmd_ask(&global.load_config()?, &message, json).await,
        Commands::Evaluate { file, json } => {
            cmd_evaluate(&global.load_config()?, file.as_deref(), json).await
        }
        // 설정이 필요 없음
        Commands::ExportData { path, pairs } => cmd_export_data(&path, pairs),
        Commands::ClearCache => cmd_clear_cache(&global.load_config()?).map(|_| ()),
        Commands::Status => cmd_status(&global.load_config()?),
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 단일 메시지 응답 (ask)
async fn cmd_ask(config: &AppConfig, message: &str, json: bool) -> Result<()> {
    let matcher = ResponseMatcher::from_config(config).await?;
    let outcome = matcher.match_message(message).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }

    match &outcome.kind {
        MatchKind::Greeting => println!("[OK] 인사"),
        MatchKind::Answer { entry_id, score } => {
            println!("[OK] 매칭: {} [점수: {:.4}]", entry_id, score)
        }
        MatchKind::OutOfScope { best_score: Some(score) } => println!(
            "[!] 범위 밖 [최고 점수: {:.4} < {}]",
            score,
            matcher.threshold()
        ),
        MatchKind::OutOfScope { best_score: None } => println!("[!] 범위 밖 (빈 메시지)"),
    }
    println!();
    println!("{}", outcome.response);

    Ok(())
}

/// 평가 명령어 (evaluate)
async fn cmd_evaluate(config: &AppConfig, file: Option<&Path>, json: bool) -> Result<()> {
    let matcher = ResponseMatcher::from_config(config).await?;

    let cases = match file {
        Some(path) => load_cases(path)?,
        None => default_cases(&matcher),
    };

    if !json {
        println!("[*] 평가 케이스: {} 건 (임계값 {})", cases.len(), matcher.threshold());
    }

    let summary = evaluate(&matcher, &cases).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    for outcome in summary.outcomes.iter().filter(|o| !o.passed) {
        let score = outcome
            .score
            .map(|s| format!("{:.4}", s))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "[!] \"{}\" 기대: {}, 실제: {} [점수: {}]",
            truncate_text(&outcome.question, 60),
            outcome.expect,
            outcome.actual,
            score
        );
    }

    println!();
    println!(
        "[OK] 통과 {}/{} ({:.1}%)",
        summary.passed,
        summary.total,
        summary.pass_rate * 100.0
    );
    if let Some(similarity) = summary.mean_answer_similarity {
        println!("     질문-답변 평균 유사도: {:.4}", similarity);
    }

    Ok(())
}

/// 데이터셋 내보내기 (export-data)
fn cmd_export_data(path: &Path, pairs: bool) -> Result<()> {
    let dataset = MedicalDataset::builtin();

    if pairs {
        let pairs = dataset.to_pairs();
        let json = serde_json::to_string_pretty(&pairs).context("Failed to serialize pairs")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("[OK] 질문/답변 {} 건 저장: {}", pairs.len(), path.display());
    } else {
        dataset.save(path)?;
        println!(
            "[OK] 데이터셋 저장: {} (원인 {} 건)",
            path.display(),
            dataset.causes.len()
        );
    }

    Ok(())
}

/// 캐시 비우기 (clear-cache), 삭제된 항목 수 반환
fn cmd_clear_cache(config: &AppConfig) -> Result<usize> {
    let cache_path = config.cache_path();
    if !cache_path.exists() {
        println!("[*] 임베딩 캐시 없음: {}", cache_path.display());
        return Ok(0);
    }

    let cache = EmbeddingCache::open(&cache_path).context("Failed to open embedding cache")?;
    let removed = cache.clear()?;
    println!("[OK] 임베딩 캐시 {} 건 삭제: {}", removed, cache_path.display());
    Ok(removed)
}

/// 상태 명령어 (status)
fn cmd_status(config: &AppConfig) -> Result<()> {
    println!("symptom-checker v{}", env!("CARGO_PKG_VERSION"));
    println!();

    println!("[*] 데이터 디렉토리: {}", config.data_dir.display());
    println!("[*] 바인딩 주소: {}", config.bind_addr());
    println!("[*] 유사도 임계값: {}", config.similarity_threshold);

    match config.embedding.backend {
        EmbeddingBackend::Gemini => println!(
            "[OK] 임베딩: Gemini API (dimension {})",
            config.embedding.dimension
        ),
        EmbeddingBackend::Local => match BertConfig::load(&config.embedding.model_dir) {
            Ok(model) if config.embedding.model_dir.is_dir() => println!(
                "[OK] 임베딩: 로컬 모델 {} (dimension {})",
                config.embedding.model_dir.display(),
                model.hidden_size
            ),
            Ok(_) => println!(
                "[!] 임베딩: 로컬 모델 디렉토리 없음 ({})",
                config.embedding.model_dir.display()
            ),
            Err(e) => println!("[!] 임베딩: 모델 설정 읽기 실패: {:#}", e),
        },
        EmbeddingBackend::Hash => println!(
            "[OK] 임베딩: 로컬 해시 (dimension {})",
            HashEmbedding::new(config.embedding.dimension).dimension()
        ),
    }

    let source = config
        .knowledge_base_path
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "내장 데이터셋".to_string());
    match load_pairs(config.knowledge_base_path.as_deref()) {
        Ok(pairs) => println!("[OK] 지식베이스: {} 항목 ({})", pairs.len(), source),
        Err(e) => println!("[!] 지식베이스 로드 실패: {:#}", e),
    }

    if !config.cache_enabled {
        println!("[*] 임베딩 캐시: 사용 안 함");
        return Ok(());
    }

    let cache_path = config.cache_path();
    if !cache_path.exists() {
        println!("[*] 임베딩 캐시: 없음 ({})", cache_path.display());
        return Ok(());
    }

    match EmbeddingCache::open(&cache_path).and_then(|cache| cache.stats()) {
        Ok(stats) => {
            println!("[OK] 임베딩 캐시: {} 건", stats.entry_count);
            println!("     크기: {}", format_bytes(stats.total_vector_bytes));
            println!("     경로: {}", stats.db_path.display());
        }
        Err(e) => println!("[!] 캐시 통계 조회 실패: {}", e),
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

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
    use crate::knowledge::{KnowledgeSource, QaPair};
    use tempfile::TempDir;

    fn base_config() -> AppConfig {
        AppConfig::from_lookup(|_| None).unwrap()
    }

    #[test]
    fn test_parse_global_flags() {
        let cli = Cli::try_parse_from([
            "symptom-checker",
            "ask",
            "what causes cramps",
            "--threshold",
            "0.75",
            "--provider",
            "hash",
            "--no-cache",
        ])
        .unwrap();

        let mut config = base_config();
        cli.global.apply(&mut config).unwrap();
        assert_eq!(config.similarity_threshold, 0.75);
        assert_eq!(config.embedding.backend, EmbeddingBackend::Hash);
        assert!(!config.cache_enabled);

        match cli.command {
            Commands::Ask { message, json } => {
                assert_eq!(message, "what causes cramps");
                assert!(!json);
            }
            _ => panic!("expected ask"),
        }
    }

    #[test]
    fn test_invalid_threshold_rejected() {
        let cli = Cli::try_parse_from(["symptom-checker", "status", "--threshold", "1.5"]).unwrap();
        let mut config = base_config();
        assert!(cli.global.apply(&mut config).is_err());
    }

    #[test]
    fn test_unknown_provider_rejected() {
        assert!(Cli::try_parse_from(["symptom-checker", "status", "--provider", "openai"]).is_err());
    }

    #[test]
    fn test_serve_flags() {
        let cli = Cli::try_parse_from(["symptom-checker", "serve", "--host", "127.0.0.1", "-p", "8080"])
            .unwrap();
        match cli.command {
            Commands::Serve { host, port } => {
                assert_eq!(host.as_deref(), Some("127.0.0.1"));
                assert_eq!(port, Some(8080));
            }
            _ => panic!("expected serve"),
        }
    }

    #[test]
    fn test_export_data_round_trips_through_loader() {
        let dir = TempDir::new().unwrap();

        let dataset_path = dir.path().join("dataset.json");
        cmd_export_data(&dataset_path, false).unwrap();
        let pairs = load_pairs(Some(&dataset_path)).unwrap();
        assert_eq!(pairs, MedicalDataset::builtin().to_pairs());

        let pairs_path = dir.path().join("pairs.json");
        cmd_export_data(&pairs_path, true).unwrap();
        match KnowledgeSource::load(&pairs_path).unwrap() {
            KnowledgeSource::Pairs(loaded) => {
                let expected: Vec<QaPair> = MedicalDataset::builtin().to_pairs();
                assert_eq!(loaded, expected);
            }
            KnowledgeSource::Dataset(_) => panic!("expected pairs"),
        }
    }

    #[test]
    fn test_model_dir_and_greeting_flags() {
        let cli = Cli::try_parse_from([
            "symptom-checker",
            "status",
            "--model-dir",
            "/opt/models/minilm",
            "--greeting",
            r"\bhola\b",
            "--greeting",
            r"\bciao\b",
        ])
        .unwrap();

        let mut config = base_config();
        cli.global.apply(&mut config).unwrap();
        assert_eq!(config.embedding.backend, EmbeddingBackend::Local);
        assert_eq!(config.embedding.model_dir, PathBuf::from("/opt/models/minilm"));
        assert_eq!(config.greeting_patterns, vec![r"\bhola\b", r"\bciao\b"]);

        // 명시적 프로바이더가 우선
        let cli = Cli::try_parse_from([
            "symptom-checker",
            "status",
            "--model-dir",
            "/opt/models/minilm",
            "--provider",
            "hash",
        ])
        .unwrap();
        let mut config = base_config();
        cli.global.apply(&mut config).unwrap();
        assert_eq!(config.embedding.backend, EmbeddingBackend::Hash);
    }

    #[test]
    fn test_export_data_parses_without_config() {
        let cli = Cli::try_parse_from(["symptom-checker", "export-data", "out.json", "--pairs"]).unwrap();
        match cli.command {
            Commands::ExportData { path, pairs } => {
                assert_eq!(path, PathBuf::from("out.json"));
                assert!(pairs);
            }
            _ => panic!("expected export-data"),
        }
    }

    #[test]
    fn test_clear_cache_removes_entries() {
        let dir = TempDir::new().unwrap();
        let mut config = base_config();
        config.data_dir = dir.path().to_path_buf();

        // 캐시 파일이 없으면 아무것도 하지 않음
        assert_eq!(cmd_clear_cache(&config).unwrap(), 0);
        assert!(!config.cache_path().exists());

        let cache = EmbeddingCache::open(&config.cache_path()).unwrap();
        cache.put("hash-fnv1a", 4, "what is ibs?", &[0.5, 0.5, 0.5, 0.5]).unwrap();
        cache.put("hash-fnv1a", 4, "what are gallstones?", &[1.0, 0.0, 0.0, 0.0]).unwrap();

        assert_eq!(cmd_clear_cache(&config).unwrap(), 2);
        assert_eq!(cache.stats().unwrap().entry_count, 0);
        assert!(cache.get("hash-fnv1a", 4, "what is ibs?").unwrap().is_none());
    }

    #[test]
    fn test_clear_cache_command_parses() {
        let cli = Cli::try_parse_from(["symptom-checker", "clear-cache", "--no-cache"]).unwrap();
        assert!(matches!(cli.command, Commands::ClearCache));
        assert!(cli.global.no_cache);
    }

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("hello", 10), "hello");
        assert_eq!(truncate_text("hello world", 5), "hello...");
        assert_eq!(truncate_text("hello\nworld", 20), "hello world");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500), "500 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1048576), "1.00 MB");
    }
}
