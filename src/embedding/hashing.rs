//! 토큰 해싱 임베딩 (오프라인)
//!
//! FNV-1a로 토큰을 차원 인덱스에 해싱한 bag-of-words 벡터를 만들고
//! L2 정규화합니다. API 키 없이 동작하며 같은 텍스트는 항상 같은 벡터가 됩니다.

use anyhow::Result;
use async_trait::async_trait;

use super::EmbeddingProvider;

/// 최소 차원 (너무 작으면 충돌이 잦음)
pub const MIN_DIMENSION: usize = 8;

const FNV_OFFSET: u64 = 1469598103934665603;
const FNV_PRIME: u64 = 1099511628211;

/// 의미 없는 영어 불용어
const STOP_WORDS: &[&str] = &[
    "a", "about", "am", "an", "and", "are", "as", "at", "be", "been", "but", "by", "can",
    "could", "do", "does", "for", "from", "had", "has", "have", "how", "i", "if", "in", "is",
    "it", "its", "me", "my", "of", "on", "or", "should", "so", "than", "that", "the", "their",
    "them", "there", "these", "they", "this", "to", "was", "we", "were", "what", "when",
    "where", "which", "who", "why", "will", "with", "would", "you", "your",
];

/// 해싱 기반 임베딩 프로바이더
#[derive(Debug, Clone)]
pub struct HashEmbedding {
    dimension: usize,
}

impl HashEmbedding {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(MIN_DIMENSION),
        }
    }

    /// 텍스트를 해싱 대상 토큰으로 분해
    ///
    /// 소문자화, 영숫자 경계 분리, 불용어/한 글자 제거, 단순 복수형 축약.
    pub fn tokens(text: &str) -> Vec<String> {
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.chars().count() > 1)
            .filter(|t| !STOP_WORDS.contains(t))
            .map(fold_plural)
            .collect()
    }

    fn bucket(&self, token: &str) -> usize {
        let mut h = FNV_OFFSET;
        for b in token.as_bytes() {
            h ^= *b as u64;
            h = h.wrapping_mul(FNV_PRIME);
        }
        (h % self.dimension as u64) as usize
    }
}

impl Default for HashEmbedding {
    fn default() -> Self {
        Self::new(768)
    }
}

fn fold_plural(token: &str) -> String {
    if token.len() > 3 && token.ends_with('s') && !token.ends_with("ss") {
        token[..token.len() - 1].to_string()
    } else {
        token.to_string()
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut v = vec![0.0f32; self.dimension];

        for token in Self::tokens(text) {
            v[self.bucket(&token)] += 1.0;
        }

        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }

        Ok(v)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "hash-fnv1a"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::cosine_similarity;

    #[test]
    fn test_tokens_drop_stop_words() {
        let tokens = HashEmbedding::tokens("What's the weather like?");
        assert_eq!(tokens, vec!["weather", "like"]);
    }

    #[test]
    fn test_tokens_fold_plurals() {
        let tokens = HashEmbedding::tokens("Causes of cramps and gas, no stress");
        assert_eq!(tokens, vec!["cause", "cramp", "gas", "no", "stress"]);
    }

    #[test]
    fn test_minimum_dimension() {
        assert_eq!(HashEmbedding::new(2).dimension(), MIN_DIMENSION);
    }

    #[tokio::test]
    async fn test_embedding_is_normalized() {
        let embedder = HashEmbedding::new(128);
        let v = embedder.embed("sharp pain lower right abdomen").await.unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_stop_words_only_is_zero_vector() {
        let embedder = HashEmbedding::new(128);
        let v = embedder.embed("what is the").await.unwrap();
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[tokio::test]
    async fn test_identical_text_is_maximally_similar() {
        let embedder = HashEmbedding::default();
        let a = embedder.embed("What causes abdominal pain?").await.unwrap();
        let b = embedder.embed("what causes abdominal pain").await.unwrap();
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-5);
    }
}
