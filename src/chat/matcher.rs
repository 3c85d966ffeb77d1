//! 응답 매처 - 메시지를 지식베이스 답변, 인사, 범위 밖 안내 중 하나로 결정
//!
//! 결정 순서:
//! 1. 정규화 (trim, 소문자)
//! 2. 빈 메시지 -> 범위 밖
//! 3. 인사말 패턴 -> 고정 인사
//! 4. 임베딩 후 모든 항목과 코사인 유사도 비교
//! 5. 최고 점수 > 임계값 -> 해당 항목 답변, 아니면 범위 밖 (같으면 범위 밖)
//!
//! 모델과 지식베이스는 생성 시 한 번 로드되고 이후 읽기 전용입니다.

use anyhow::{Context, Result};
use serde::Serialize;

use crate::config::AppConfig;
use crate::embedding::{create_embedder, EmbeddingProvider};
use crate::knowledge::{load_pairs, normalize_text, EmbeddingCache, KnowledgeBase};

use super::greeting::GreetingDetector;

/// 범위 밖 고정 응답
pub const OUT_OF_SCOPE_RESPONSE: &str = "I apologize, but I'm specifically trained to help with abdominal pain in adults. \
I can provide information about causes, symptoms, when to seek medical attention, \
and home remedies related to abdominal pain. Please ask me about abdominal pain or related symptoms.";

// ============================================================================
// Types
// ============================================================================

/// 매칭 결정
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MatchKind {
    Greeting,
    Answer { entry_id: String, score: f32 },
    /// 빈 메시지면 점수 없음
    OutOfScope { best_score: Option<f32> },
}

/// 매칭 결과
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchOutcome {
    #[serde(flatten)]
    pub kind: MatchKind,
    pub response: String,
}

impl MatchOutcome {
    fn out_of_scope(best_score: Option<f32>) -> Self {
        Self {
            kind: MatchKind::OutOfScope { best_score },
            response: OUT_OF_SCOPE_RESPONSE.to_string(),
        }
    }

    pub fn is_out_of_scope(&self) -> bool {
        matches!(self.kind, MatchKind::OutOfScope { .. })
    }
}

// ============================================================================
// ResponseMatcher
// ============================================================================

/// 응답 매처
pub struct ResponseMatcher {
    embedder: Box<dyn EmbeddingProvider>,
    knowledge: KnowledgeBase,
    greetings: GreetingDetector,
    threshold: f32,
}

impl ResponseMatcher {
    /// 임베더와 지식베이스로 생성
    ///
    /// 지식베이스 차원이 임베더 차원과 다르면 에러입니다.
    pub fn new(
        embedder: Box<dyn EmbeddingProvider>,
        knowledge: KnowledgeBase,
        threshold: f32,
    ) -> Result<Self> {
        if knowledge.dimension() != embedder.dimension() {
            anyhow::bail!(
                "Knowledge base dimension {} does not match embedder dimension {}",
                knowledge.dimension(),
                embedder.dimension()
            );
        }
        if !(-1.0..=1.0).contains(&threshold) {
            anyhow::bail!("Similarity threshold {} is outside [-1, 1]", threshold);
        }

        Ok(Self {
            embedder,
            knowledge,
            greetings: GreetingDetector::default(),
            threshold,
        })
    }

    /// 인사말 감지기 교체
    pub fn with_greetings(mut self, greetings: GreetingDetector) -> Self {
        self.greetings = greetings;
        self
    }

    /// 설정으로부터 모델과 지식베이스를 로드
    ///
    /// 실패는 시작 단계의 치명적 오류로 취급됩니다.
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let embedder = create_embedder(&config.embedding).context("Failed to load embedding model")?;
        let pairs = load_pairs(config.knowledge_base_path.as_deref())?;

        let cache = if config.cache_enabled {
            Some(EmbeddingCache::open(&config.cache_path()).context("Failed to open embedding cache")?)
        } else {
            None
        };

        let knowledge = KnowledgeBase::build(pairs, embedder.as_ref(), cache.as_ref())
            .await
            .context("Failed to build knowledge base")?;

        tracing::info!(
            "Response matcher ready: {} entries, dimension {}, threshold {}",
            knowledge.len(),
            knowledge.dimension(),
            config.similarity_threshold
        );

        let matcher = Self::new(embedder, knowledge, config.similarity_threshold)?;
        if config.greeting_patterns.is_empty() {
            return Ok(matcher);
        }

        let greetings = GreetingDetector::new(&config.greeting_patterns)
            .context("Invalid greeting pattern")?;
        Ok(matcher.with_greetings(greetings))
    }

    /// 메시지에 대한 응답 텍스트
    pub async fn respond(&self, message: &str) -> Result<String> {
        Ok(self.match_message(message).await?.response)
    }

    /// 메시지 매칭 (결정 정보 포함)
    pub async fn match_message(&self, message: &str) -> Result<MatchOutcome> {
        let normalized = normalize_text(message);

        if normalized.is_empty() {
            return Ok(MatchOutcome::out_of_scope(None));
        }

        if self.greetings.is_greeting(&normalized) {
            tracing::debug!("Greeting detected");
            return Ok(MatchOutcome {
                kind: MatchKind::Greeting,
                response: self.greetings.reply(&normalized).to_string(),
            });
        }

        let query = self
            .embedder
            .embed(&normalized)
            .await
            .context("Failed to embed message")?;

        if query.len() != self.knowledge.dimension() {
            anyhow::bail!(
                "Query embedding has dimension {}, expected {}",
                query.len(),
                self.knowledge.dimension()
            );
        }

        let outcome = match self.knowledge.best_match(&query) {
            Some((entry, score)) if score > self.threshold => MatchOutcome {
                kind: MatchKind::Answer {
                    entry_id: entry.id.clone(),
                    score,
                },
                response: entry.answer.clone(),
            },
            Some((_, score)) => MatchOutcome::out_of_scope(Some(score)),
            None => MatchOutcome::out_of_scope(None),
        };

        tracing::debug!(kind = ?outcome.kind, "Matched message");
        Ok(outcome)
    }

    pub fn knowledge(&self) -> &KnowledgeBase {
        &self.knowledge
    }

    pub fn embedder(&self) -> &dyn EmbeddingProvider {
        self.embedder.as_ref()
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }
}

// ============================================================================
// Tests
// ============================================================================
