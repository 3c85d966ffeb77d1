//! Google Gemini 임베딩
//!
//! source: https://ai.google.dev/gemini-api/docs/embeddings
//!
//! 무료 티어 한도(60 RPM)를 넘지 않도록 호출 간 최소 간격과 슬라이딩 윈도우
//! 한도를 두고, 429 응답과 전송 실패는 지수 백오프로 재시도합니다.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use url::Url;

use super::EmbeddingProvider;

/// Gemini API 기본 주소
pub const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com";

const MODEL: &str = "models/gemini-embedding-001";
const EMBED_PATH: &str = "v1beta/models/gemini-embedding-001:embedContent";

/// 지원하는 출력 차원 (MRL)
pub const GEMINI_DIMENSIONS: [usize; 3] = [768, 1536, 3072];

// ============================================================================
// Rate limiting
// ============================================================================

/// 호출 한도 및 재시도 정책
#[derive(Debug, Clone, Copy)]
pub struct RateLimit {
    /// 윈도우당 최대 요청 수
    pub max_requests: usize,
    pub window: Duration,
    /// 연속 호출 간 최소 간격
    pub min_interval: Duration,
    pub max_retries: u32,
    /// 첫 재시도 대기 시간, 이후 두 배씩 증가
    pub initial_backoff: Duration,
}

impl Default for RateLimit {
    /// 무료 티어 기준: 60 RPM, 1초 간격, 3회 재시도
    fn default() -> Self {
        Self {
            max_requests: 60,
            window: Duration::from_secs(60),
            min_interval: Duration::from_millis(1000),
            max_retries: 3,
            initial_backoff: Duration::from_millis(2000),
        }
    }
}

impl RateLimit {
    fn backoff(&self, attempt: u32) -> Duration {
        self.initial_backoff.saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// 슬라이딩 윈도우 limiter
#[derive(Debug)]
struct Throttle {
    sent: VecDeque<Instant>,
    limit: RateLimit,
}

impl Throttle {
    fn new(limit: RateLimit) -> Self {
        Self {
            sent: VecDeque::with_capacity(limit.max_requests),
            limit,
        }
    }

    /// 다음 요청이 허용될 때까지 대기 후 기록
    async fn wait_turn(&mut self) {
        if let Some(&last) = self.sent.back() {
            let since = last.elapsed();
            if since < self.limit.min_interval {
                tokio::time::sleep(self.limit.min_interval - since).await;
            }
        }

        self.evict(Instant::now());
        if self.limit.max_requests > 0 && self.sent.len() >= self.limit.max_requests {
            if let Some(&oldest) = self.sent.front() {
                let wait = self.limit.window.saturating_sub(oldest.elapsed());
                tracing::debug!("Embedding rate limit reached, waiting {:?}", wait);
                tokio::time::sleep(wait).await;
                self.evict(Instant::now());
            }
        }

        self.sent.push_back(Instant::now());
    }

    fn evict(&mut self, now: Instant) {
        while let Some(&t) = self.sent.front() {
            if now.duration_since(t) < self.limit.window {
                break;
            }
            self.sent.pop_front();
        }
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedRequest<'a> {
    model: &'static str,
    content: Content<'a>,
    task_type: &'static str,
    output_dimensionality: usize,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: [Part<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: Values,
}

#[derive(Debug, Deserialize)]
struct Values {
    values: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
    #[serde(default)]
    status: String,
}

/// 단일 시도 결과
enum Attempt {
    Done(Vec<f32>),
    /// 재시도 가능한 실패 (429, 전송 오류)
    Retry(anyhow::Error),
}

// ============================================================================
// GeminiEmbedding
// ============================================================================

/// Google Gemini 임베딩 구현체
#[derive(Debug)]
pub struct GeminiEmbedding {
    api_key: String,
    endpoint: String,
    client: reqwest::Client,
    dimension: usize,
    limit: RateLimit,
    throttle: Mutex<Throttle>,
}

impl GeminiEmbedding {
    /// 기본 API 주소로 생성
    ///
    /// # Arguments
    /// * `api_key` - Google AI API 키
    /// * `dimension` - 출력 차원 (768, 1536, 3072)
    pub fn new(api_key: String, dimension: usize) -> Result<Self> {
        let base = Url::parse(DEFAULT_GEMINI_API_BASE).context("Invalid default API base")?;
        Self::with_base_url(api_key, dimension, base)
    }

    /// API 주소를 지정하여 생성 (프록시, 테스트 서버)
    pub fn with_base_url(api_key: String, dimension: usize, base: Url) -> Result<Self> {
        if !GEMINI_DIMENSIONS.contains(&dimension) {
            anyhow::bail!(
                "Invalid dimension: {} (supported: {:?})",
                dimension,
                GEMINI_DIMENSIONS
            );
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build Gemini HTTP client")?;

        let limit = RateLimit::default();
        Ok(Self {
            api_key,
            endpoint: format!("{}/{}", base.as_str().trim_end_matches('/'), EMBED_PATH),
            client,
            dimension,
            limit,
            throttle: Mutex::new(Throttle::new(limit)),
        })
    }

    /// 환경변수 키로 생성
    pub fn from_env(dimension: usize) -> Result<Self> {
        Self::new(super::get_api_key()?, dimension)
    }

    /// 호출 한도 교체
    pub fn with_rate_limit(mut self, limit: RateLimit) -> Self {
        self.limit = limit;
        self.throttle = Mutex::new(Throttle::new(limit));
        self
    }

    async fn attempt(&self, request: &EmbedRequest<'_>) -> Result<Attempt> {
        self.throttle.lock().await.wait_turn().await;

        // API 키는 쿼리 문자열이 아닌 헤더로
        let response = match self
            .client
            .post(&self.endpoint)
            .header("x-goog-api-key", &self.api_key)
            .json(request)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                return Ok(Attempt::Retry(
                    anyhow::Error::new(e).context("Failed to send embedding request"),
                ))
            }
        };

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read embedding response")?;

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Ok(Attempt::Retry(anyhow::anyhow!("Rate limit exceeded (429)")));
        }

        if !status.is_success() {
            match serde_json::from_str::<ErrorEnvelope>(&body) {
                Ok(envelope) => anyhow::bail!(
                    "Gemini API error ({}): {}",
                    envelope.error.status,
                    envelope.error.message
                ),
                Err(_) => anyhow::bail!("Gemini API error ({}): {}", status, body),
            }
        }

        let parsed: EmbedResponse =
            serde_json::from_str(&body).context("Failed to parse embedding response")?;
        let values = parsed.embedding.values;
        if values.len() != self.dimension {
            anyhow::bail!(
                "Gemini returned {} dimensions, expected {}",
                values.len(),
                self.dimension
            );
        }
        Ok(Attempt::Done(values))
    }
}

#[async_trait]
impl EmbeddingProvider for GeminiEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Ok(vec![0.0; self.dimension]);
        }

        // 질문과 지식베이스 항목을 같은 공간에서 비교
        let request = EmbedRequest {
            model: MODEL,
            content: Content {
                parts: [Part { text }],
            },
            task_type: "SEMANTIC_SIMILARITY",
            output_dimensionality: self.dimension,
        };

        let mut attempt = 0;
        loop {
            match self.attempt(&request).await? {
                Attempt::Done(values) => return Ok(values),
                Attempt::Retry(err) if attempt < self.limit.max_retries => {
                    let backoff = self.limit.backoff(attempt);
                    attempt += 1;
                    tracing::warn!(
                        "{:#}; retrying in {:?} ({}/{})",
                        err,
                        backoff,
                        attempt,
                        self.limit.max_retries
                    );
                    tokio::time::sleep(backoff).await;
                }
                Attempt::Retry(err) => {
                    return Err(err.context(format!(
                        "Embedding failed after {} retries",
                        self.limit.max_retries
                    )))
                }
            }
        }
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "gemini-embedding-001"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::post, Json, Router};
    use tokio::net::TcpListener;

    async fn spawn_mock(status: StatusCode, body: serde_json::Value) -> Url {
        let app = Router::new().route(
            "/v1beta/models/{model}",
            post(move || {
                let body = body.clone();
                async move { (status, Json(body)) }
            }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Url::parse(&format!("http://{}", addr)).unwrap()
    }

    #[test]
    fn test_dimension_must_be_supported() {
        let err = GeminiEmbedding::new("k".to_string(), 999).err().unwrap();
        assert!(err.to_string().contains("Invalid dimension: 999"));

        for dim in GEMINI_DIMENSIONS {
            assert!(GeminiEmbedding::new("k".to_string(), dim).is_ok());
        }
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let base = Url::parse("http://localhost:8080/").unwrap();
        let embedder = GeminiEmbedding::with_base_url("k".to_string(), 768, base).unwrap();
        assert_eq!(
            embedder.endpoint,
            "http://localhost:8080/v1beta/models/gemini-embedding-001:embedContent"
        );
    }

    #[tokio::test]
    async fn test_empty_text_returns_zero_vector() {
        let embedder = GeminiEmbedding::new("k".to_string(), 768).unwrap();
        let v = embedder.embed("   ").await.unwrap();
        assert_eq!(v.len(), 768);
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[tokio::test]
    async fn test_embed_parses_values() {
        let values: Vec<f32> = (0..768).map(|i| i as f32 / 768.0).collect();
        let base = spawn_mock(
            StatusCode::OK,
            serde_json::json!({ "embedding": { "values": values } }),
        )
        .await;

        let embedder = GeminiEmbedding::with_base_url("k".to_string(), 768, base).unwrap();
        let v = embedder.embed("stomach ache").await.unwrap();
        assert_eq!(v.len(), 768);
        assert!((v[384] - 0.5).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_embed_surfaces_api_error() {
        let base = spawn_mock(
            StatusCode::BAD_REQUEST,
            serde_json::json!({ "error": { "message": "API key not valid", "status": "INVALID_ARGUMENT" } }),
        )
        .await;

        let embedder = GeminiEmbedding::with_base_url("bad".to_string(), 768, base).unwrap();
        let err = embedder.embed("stomach ache").await.err().unwrap();
        assert!(err.to_string().contains("INVALID_ARGUMENT"));
        assert!(err.to_string().contains("API key not valid"));
    }

    #[tokio::test]
    async fn test_rate_limited_requests_give_up_after_retries() {
        let base = spawn_mock(
            StatusCode::TOO_MANY_REQUESTS,
            serde_json::json!({ "error": { "message": "quota", "status": "RESOURCE_EXHAUSTED" } }),
        )
        .await;

        let embedder = GeminiEmbedding::with_base_url("k".to_string(), 768, base)
            .unwrap()
            .with_rate_limit(RateLimit {
                min_interval: Duration::ZERO,
                initial_backoff: Duration::from_millis(1),
                max_retries: 2,
                ..RateLimit::default()
            });

        let err = embedder.embed("cramps").await.err().unwrap();
        let message = format!("{:#}", err);
        assert!(message.contains("after 2 retries"));
        assert!(message.contains("429"));
    }

    #[test]
    fn test_backoff_doubles() {
        let limit = RateLimit::default();
        assert_eq!(limit.backoff(0), Duration::from_millis(2000));
        assert_eq!(limit.backoff(2), Duration::from_millis(8000));
    }

    #[tokio::test]
    async fn test_embed_rejects_wrong_dimension() {
        let base = spawn_mock(
            StatusCode::OK,
            serde_json::json!({ "embedding": { "values": [0.1, 0.2, 0.3] } }),
        )
        .await;

        let embedder = GeminiEmbedding::with_base_url("k".to_string(), 768, base).unwrap();
        let err = embedder.embed("cramps").await.err().unwrap();
        assert!(err.to_string().contains("expected 768"));
    }
}
