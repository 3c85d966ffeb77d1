//! Chat 모듈 - 범위 인식 응답 매칭
//!
//! - Greeting: 인사말 패턴 및 고정 인사 응답
//! - Matcher: 임베딩 유사도 기반 응답 결정
//! - Eval: 기대 결정 대비 매처 평가

mod eval;
mod greeting;
mod matcher;

// Re-exports
pub use eval::{
    default_cases, evaluate, load_cases, EvalCase, EvalOutcome, EvalSummary, EXPECT_GREETING,
    EXPECT_OUT_OF_SCOPE,
};
pub use greeting::{GreetingDetector, DEFAULT_GREETING_PATTERNS, GREETING_RESPONSES};
pub use matcher::{MatchKind, MatchOutcome, ResponseMatcher, OUT_OF_SCOPE_RESPONSE};
