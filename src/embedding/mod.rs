//! 임베딩 모듈 - 텍스트 벡터화
//!
//! 사용자 메시지와 지식베이스 항목을 같은 벡터 공간으로 변환합니다.
//! 응답 매처는 어떤 모델이 쓰이는지 모르고 `EmbeddingProvider`만 봅니다.
//!
//! - `GeminiEmbedding`: Gemini 임베딩 API (원격, rate limit 적용)
//! - `LocalModelEmbedding`: 로컬 문장 임베딩 모델 (candle, CPU)
//! - `HashEmbedding`: 토큰 해싱 기반 오프라인 임베딩 (API 키 불필요)
//!
//! ## 사용법
//! ```rust,ignore
//! let embedder = create_embedder(&config.embedding)?;
//! let embedding = embedder.embed("stomach cramps after eating").await?;
//! ```

mod gemini;
mod hashing;
mod local;

use anyhow::Result;
use async_trait::async_trait;

pub use gemini::{GeminiEmbedding, RateLimit, DEFAULT_GEMINI_API_BASE, GEMINI_DIMENSIONS};
pub use hashing::{HashEmbedding, MIN_DIMENSION as MIN_HASH_DIMENSION};
pub use local::{BertConfig, LocalModelEmbedding};

use crate::config::{EmbeddingBackend, EmbeddingConfig};

// ============================================================================
// EmbeddingProvider Trait
// ============================================================================

/// 임베딩 프로바이더 트레이트
///
/// 텍스트를 벡터로 변환하는 인터페이스입니다.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 단일 텍스트 임베딩
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// 배치 임베딩 (기본 구현: 순차 호출)
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// 임베딩 차원 수
    fn dimension(&self) -> usize;

    /// 프로바이더 이름 (캐시 키에 포함됨)
    fn name(&self) -> &str;
}

#[async_trait]
impl EmbeddingProvider for Box<dyn EmbeddingProvider> {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        (**self).embed(text).await
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        (**self).embed_batch(texts).await
    }

    fn dimension(&self) -> usize {
        (**self).dimension()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

// ============================================================================
// API Key Management
// ============================================================================

/// API 키 로드 (환경변수에서)
///
/// 우선순위:
/// 1. `GEMINI_API_KEY` 환경변수
/// 2. `GOOGLE_AI_API_KEY` 환경변수
pub fn get_api_key() -> Result<String> {
    for var in ["GEMINI_API_KEY", "GOOGLE_AI_API_KEY"] {
        if let Ok(key) = std::env::var(var) {
            if !key.is_empty() {
                tracing::debug!("Using API key from {}", var);
                return Ok(key);
            }
        }
    }

    anyhow::bail!(
        "API key not found. Set GEMINI_API_KEY or GOOGLE_AI_API_KEY environment variable.\n\
         Get your API key at: https://aistudio.google.com/app/apikey"
    )
}

// ============================================================================
// Factory Function
// ============================================================================

/// 설정에 맞는 임베딩 프로바이더 생성
///
/// 모델을 만들 수 없으면 에러를 반환합니다. 서버 시작 단계에서 호출되므로
/// 여기서의 실패는 프로세스 종료로 이어집니다.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingProvider>> {
    match config.backend {
        EmbeddingBackend::Gemini => {
            let api_key = match &config.api_key {
                Some(key) => key.clone(),
                None => get_api_key()?,
            };
            let embedder =
                GeminiEmbedding::with_base_url(api_key, config.dimension, config.api_base.clone())?;
            tracing::info!(
                "Using Gemini API embedding (dimension: {})",
                embedder.dimension()
            );
            Ok(Box::new(embedder))
        }
        EmbeddingBackend::Local => {
            let embedder = LocalModelEmbedding::load(&config.model_dir)?;
            Ok(Box::new(embedder))
        }
        EmbeddingBackend::Hash => {
            let embedder = HashEmbedding::new(config.dimension);
            tracing::info!(
                "Using offline hash embedding (dimension: {})",
                embedder.dimension()
            );
            Ok(Box::new(embedder))
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
