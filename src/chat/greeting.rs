//! 인사말 감지 및 고정 인사 응답

use anyhow::{Context, Result};
use regex::Regex;

/// 기본 인사말 패턴 (정규화된 소문자 메시지 기준)
pub const DEFAULT_GREETING_PATTERNS: &[&str] = &[
    r"\b(hi|hello|hey|good morning|good afternoon|good evening)\b",
    r"\bhow are you\b",
    r"\bwhat's up\b",
    r"\bhow's it going\b",
];

/// 고정 인사 응답
pub const GREETING_RESPONSES: &[&str] = &[
    "Hello! I'm your symptom checker assistant. I'm here to help you understand abdominal pain and related symptoms. How can I assist you today?",
    "Hi there! I'm a medical information assistant specializing in abdominal pain. I can help answer your questions about symptoms, causes, and when to seek medical attention. What would you like to know?",
    "Hello! I'm here to help you with questions about abdominal pain in adults. I can provide information about causes, symptoms, and treatment options. How may I help you?",
];

/// 인사말 감지기
#[derive(Debug, Clone)]
pub struct GreetingDetector {
    patterns: Vec<Regex>,
}

impl GreetingDetector {
    /// 패턴 목록으로 생성
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| {
                Regex::new(p.as_ref())
                    .with_context(|| format!("Invalid greeting pattern: {}", p.as_ref()))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    /// 정규화된 메시지가 인사말인지 확인
    pub fn is_greeting(&self, normalized: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(normalized))
    }

    /// 메시지에 대한 인사 응답 (같은 메시지면 항상 같은 응답)
    pub fn reply(&self, normalized: &str) -> &'static str {
        let index = normalized.bytes().map(usize::from).sum::<usize>() % GREETING_RESPONSES.len();
        GREETING_RESPONSES[index]
    }
}

impl Default for GreetingDetector {
    fn default() -> Self {
        let patterns = DEFAULT_GREETING_PATTERNS
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect();
        Self { patterns }
    }
}
