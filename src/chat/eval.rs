//! 매처 평가 - 질문별 기대 결정과 실제 결정을 비교
//!
//! 기대값은 `"greeting"`, `"out_of_scope"`, 또는 지식베이스 항목 ID입니다.
//! 항목 ID를 기대하는 케이스는 질문과 해당 답변 간 코사인 유사도도 함께 집계합니다.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::knowledge::{cosine_similarity, normalize_text};

use super::matcher::{MatchKind, ResponseMatcher};

pub const EXPECT_GREETING: &str = "greeting";
pub const EXPECT_OUT_OF_SCOPE: &str = "out_of_scope";

/// 평가 케이스
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalCase {
    pub question: String,
    pub expect: String,
}

impl EvalCase {
    pub fn new(question: &str, expect: &str) -> Self {
        Self {
            question: question.to_string(),
            expect: expect.to_string(),
        }
    }
}

/// 케이스별 결과
#[derive(Debug, Clone, Serialize)]
pub struct EvalOutcome {
    pub question: String,
    pub expect: String,
    pub actual: String,
    pub score: Option<f32>,
    pub passed: bool,
}

/// 평가 요약
#[derive(Debug, Clone, Serialize)]
pub struct EvalSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub pass_rate: f32,
    /// 질문-기대 답변 평균 유사도 (항목 ID 케이스가 없으면 None)
    pub mean_answer_similarity: Option<f32>,
    pub outcomes: Vec<EvalOutcome>,
}

/// JSON 파일에서 케이스 로드 (`[{question, expect}]`)
pub fn load_cases(path: &Path) -> Result<Vec<EvalCase>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read eval cases {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Failed to parse eval cases {}", path.display()))
}

/// 지식베이스에서 기본 케이스 생성
///
/// 항목 질문 그대로, 짧은 변형 질문, 인사, 범위 밖 질문을 포함합니다.
pub fn default_cases(matcher: &ResponseMatcher) -> Vec<EvalCase> {
    let knowledge = matcher.knowledge();
    let mut cases: Vec<EvalCase> = knowledge
        .entries()
        .iter()
        .map(|e| EvalCase::new(&e.text, &e.id))
        .collect();

    for (question, id) in [
        ("What causes abdominal pain?", "causes"),
        ("What home remedies help?", "home-remedies"),
        ("When should I see a doctor?", "see-doctor"),
    ] {
        if knowledge.get(id).is_some() {
            cases.push(EvalCase::new(question, id));
        }
    }

    cases.push(EvalCase::new("Hello", EXPECT_GREETING));
    cases.push(EvalCase::new("How are you?", EXPECT_GREETING));
    cases.push(EvalCase::new("What's the weather?", EXPECT_OUT_OF_SCOPE));
    cases.push(EvalCase::new("", EXPECT_OUT_OF_SCOPE));
    cases
}

/// 케이스 실행
pub async fn evaluate(matcher: &ResponseMatcher, cases: &[EvalCase]) -> Result<EvalSummary> {
    let mut outcomes = Vec::with_capacity(cases.len());
    let mut similarities = Vec::new();

    for case in cases {
        let outcome = matcher.match_message(&case.question).await?;

        let (actual, score) = match &outcome.kind {
            MatchKind::Greeting => (EXPECT_GREETING.to_string(), None),
            MatchKind::Answer { entry_id, score } => (entry_id.clone(), Some(*score)),
            MatchKind::OutOfScope { best_score } => (EXPECT_OUT_OF_SCOPE.to_string(), *best_score),
        };

        if let Some(entry) = matcher.knowledge().get(&case.expect) {
            let question = normalize_text(&case.question);
            if !question.is_empty() {
                let q = matcher.embedder().embed(&question).await?;
                let a = matcher.embedder().embed(&normalize_text(&entry.answer)).await?;
                similarities.push(cosine_similarity(&q, &a));
            }
        }

        outcomes.push(EvalOutcome {
            question: case.question.clone(),
            expect: case.expect.clone(),
            passed: actual == case.expect,
            actual,
            score,
        });
    }

    let total = outcomes.len();
    let passed = outcomes.iter().filter(|o| o.passed).count();
    let mean_answer_similarity = if similarities.is_empty() {
        None
    } else {
        Some(similarities.iter().sum::<f32>() / similarities.len() as f32)
    };

    Ok(EvalSummary {
        total,
        passed,
        failed: total - passed,
        pass_rate: if total == 0 { 0.0 } else { passed as f32 / total as f32 },
        mean_answer_similarity,
        outcomes,
    })
}
