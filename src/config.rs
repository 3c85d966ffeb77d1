//! 설정 - 환경변수 기반 (.env 지원)
//!
//! CLI 플래그가 주어지면 여기서 읽은 값을 덮어씁니다.

use std::path::PathBuf;

use anyhow::{Context, Result};
use url::Url;

use crate::embedding::{DEFAULT_GEMINI_API_BASE, MIN_HASH_DIMENSION};

/// 기본 유사도 임계값
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.6;

/// 기본 임베딩 차원
pub const DEFAULT_DIMENSION: usize = 768;

/// `GREETING_PATTERNS` 구분자
pub const GREETING_PATTERN_SEPARATOR: char = ';';

/// 데이터 디렉토리 경로 (~/.symptom-checker/)
pub fn get_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".symptom-checker")
}

// ============================================================================
// Types
// ============================================================================

/// 임베딩 백엔드 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingBackend {
    Gemini,
    /// 로컬 문장 임베딩 모델 디렉토리
    Local,
    Hash,
}

impl std::str::FromStr for EmbeddingBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "gemini" => Ok(Self::Gemini),
            "local" | "model" => Ok(Self::Local),
            "hash" | "offline" => Ok(Self::Hash),
            other => anyhow::bail!(
                "Unknown embedding provider: {} (expected gemini, local or hash)",
                other
            ),
        }
    }
}

/// 임베딩 설정
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub backend: EmbeddingBackend,
    pub dimension: usize,
    /// 지정하지 않으면 GEMINI_API_KEY / GOOGLE_AI_API_KEY
    pub api_key: Option<String>,
    pub api_base: Url,
    /// 로컬 모델 디렉토리 (model.safetensors, tokenizer.json)
    pub model_dir: PathBuf,
}

/// 전체 애플리케이션 설정
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub similarity_threshold: f32,
    /// None이면 내장 데이터셋 사용
    pub knowledge_base_path: Option<PathBuf>,
    pub embedding: EmbeddingConfig,
    /// 비어 있으면 기본 인사말 패턴
    pub greeting_patterns: Vec<String>,
    pub cache_enabled: bool,
    pub data_dir: PathBuf,
}

impl AppConfig {
    /// 환경변수에서 설정 로드
    ///
    /// `.env` 파일이 있으면 먼저 읽습니다.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 키 조회 함수로부터 설정 구성
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_key = get("GEMINI_API_KEY").or_else(|| get("GOOGLE_AI_API_KEY"));
        let model_dir = get("EMBEDDING_MODEL_DIR").map(PathBuf::from);

        // 명시적 지정 > API 키 > 모델 디렉토리 > 해시
        let backend = match get("EMBEDDING_PROVIDER") {
            Some(value) => value.parse()?,
            None if api_key.is_some() => EmbeddingBackend::Gemini,
            None if model_dir.is_some() => EmbeddingBackend::Local,
            None => EmbeddingBackend::Hash,
        };

        let data_dir = get("SYMPTOM_CHECKER_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(get_data_dir);

        let api_base = Url::parse(
            &get("GEMINI_API_BASE").unwrap_or_else(|| DEFAULT_GEMINI_API_BASE.to_string()),
        )
        .context("GEMINI_API_BASE is not a valid URL")?;

        let config = Self {
            host: get("SYMPTOM_CHECKER_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: get("SYMPTOM_CHECKER_PORT")
                .unwrap_or_else(|| "5000".to_string())
                .parse()
                .context("SYMPTOM_CHECKER_PORT must be a port number")?,
            similarity_threshold: get("SIMILARITY_THRESHOLD")
                .map(|v| v.parse::<f32>())
                .transpose()
                .context("SIMILARITY_THRESHOLD must be a number")?
                .unwrap_or(DEFAULT_SIMILARITY_THRESHOLD),
            knowledge_base_path: get("KNOWLEDGE_BASE_PATH").map(PathBuf::from),
            embedding: EmbeddingConfig {
                backend,
                dimension: get("EMBEDDING_DIMENSION")
                    .map(|v| v.parse::<usize>())
                    .transpose()
                    .context("EMBEDDING_DIMENSION must be a positive integer")?
                    .unwrap_or(DEFAULT_DIMENSION),
                api_key,
                api_base,
                model_dir: model_dir.unwrap_or_else(|| default_model_dir(&data_dir)),
            },
            greeting_patterns: get("GREETING_PATTERNS")
                .map(|v| parse_patterns(&v))
                .unwrap_or_default(),
            cache_enabled: get("EMBEDDING_CACHE")
                .map(|v| parse_bool(&v))
                .transpose()?
                .unwrap_or(true),
            data_dir,
        };

        config.validate()?;
        Ok(config)
    }

    /// 값 범위 검증
    pub fn validate(&self) -> Result<()> {
        if !(-1.0..=1.0).contains(&self.similarity_threshold) {
            anyhow::bail!(
                "Similarity threshold {} is outside [-1, 1]",
                self.similarity_threshold
            );
        }
        match self.embedding.backend {
            EmbeddingBackend::Gemini if self.embedding.api_key.is_none() => {
                anyhow::bail!(
                    "EMBEDDING_PROVIDER=gemini requires GEMINI_API_KEY or GOOGLE_AI_API_KEY"
                );
            }
            EmbeddingBackend::Hash if self.embedding.dimension < MIN_HASH_DIMENSION => {
                anyhow::bail!(
                    "Embedding dimension {} is below the minimum of {} for the hash embedder",
                    self.embedding.dimension,
                    MIN_HASH_DIMENSION
                );
            }
            // 로컬 모델은 config.json의 hidden_size를 따름
            _ => {}
        }
        Ok(())
    }

    /// 임베딩 캐시 DB 경로
    pub fn cache_path(&self) -> PathBuf {
        self.data_dir.join("embeddings.db")
    }

    /// 바인딩 주소 (host:port)
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// 기본 로컬 모델 위치 (<data_dir>/models/fine_tuned_symptom_checker)
fn default_model_dir(data_dir: &std::path::Path) -> PathBuf {
    data_dir.join("models").join("fine_tuned_symptom_checker")
}

fn parse_patterns(value: &str) -> Vec<String> {
    value
        .split(GREETING_PATTERN_SEPARATOR)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => anyhow::bail!("Invalid boolean value: {}", other),
    }
}

// ============================================================================
// Tests
// ============================================================================
