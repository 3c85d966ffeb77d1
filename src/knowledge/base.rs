//! Knowledge Base - 시작 시 한 번 임베딩되는 읽기 전용 항목 집합

use anyhow::{Context, Result};

use crate::embedding::EmbeddingProvider;

use super::cache::EmbeddingCache;
use super::dataset::QaPair;
use super::vector::best_match;

// ============================================================================
// Types
// ============================================================================

/// 지식베이스 항목 (로드 후 불변)
#[derive(Debug, Clone)]
pub struct KnowledgeEntry {
    pub id: String,
    /// 임베딩 대상 텍스트 (질문)
    pub text: String,
    /// 매칭 시 반환할 답변
    pub answer: String,
    pub embedding: Vec<f32>,
}

/// 지식베이스
///
/// 모든 항목의 임베딩 차원은 `dimension`과 같습니다.
#[derive(Debug, Clone)]
pub struct KnowledgeBase {
    entries: Vec<KnowledgeEntry>,
    dimension: usize,
    provider: String,
}

/// 메시지/항목 공통 정규화 (trim, 소문자, 공백 축약, 둥근 따옴표 치환)
pub fn normalize_text(text: &str) -> String {
    text.replace(['\u{2018}', '\u{2019}'], "'")
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

impl KnowledgeBase {
    /// 시드를 임베딩하여 지식베이스 구성
    ///
    /// 캐시가 주어지면 캐시에 없는 텍스트만 임베딩합니다.
    /// 시드가 비어 있거나, 임베딩 차원이 맞지 않거나, 영벡터로 임베딩된
    /// 질문이 있으면 에러입니다. 영벡터 항목은 어떤 메시지와도 유사도가 0이라
    /// 같은 질문으로도 매칭되지 않습니다.
    pub async fn build(
        pairs: Vec<QaPair>,
        embedder: &dyn EmbeddingProvider,
        cache: Option<&EmbeddingCache>,
    ) -> Result<Self> {
        if pairs.is_empty() {
            anyhow::bail!("Knowledge base is empty");
        }

        let provider = embedder.name().to_string();
        let dimension = embedder.dimension();
        let texts: Vec<String> = pairs.iter().map(|p| normalize_text(&p.question)).collect();

        if let Some(index) = texts.iter().position(|t| t.is_empty()) {
            anyhow::bail!("Knowledge entry #{} has an empty question", index);
        }

        // 캐시 조회
        let mut embeddings: Vec<Option<Vec<f32>>> = Vec::with_capacity(texts.len());
        for text in &texts {
            let cached = match cache {
                Some(cache) => cache.get(&provider, dimension, text)?,
                None => None,
            };
            embeddings.push(cached);
        }

        let missing: Vec<usize> = embeddings
            .iter()
            .enumerate()
            .filter(|(_, e)| e.is_none())
            .map(|(i, _)| i)
            .collect();

        tracing::info!(
            "Embedding knowledge base: {} entries ({} cached, {} to embed) with {}",
            texts.len(),
            texts.len() - missing.len(),
            missing.len(),
            provider
        );

        if !missing.is_empty() {
            let batch: Vec<String> = missing.iter().map(|&i| texts[i].clone()).collect();
            let vectors = embedder
                .embed_batch(&batch)
                .await
                .context("Failed to embed knowledge base")?;

            if vectors.len() != batch.len() {
                anyhow::bail!(
                    "Embedder returned {} vectors for {} texts",
                    vectors.len(),
                    batch.len()
                );
            }

            for (&index, vector) in missing.iter().zip(vectors) {
                if let Some(cache) = cache {
                    if vector.len() == dimension {
                        cache.put(&provider, dimension, &texts[index], &vector)?;
                    }
                }
                embeddings[index] = Some(vector);
            }
        }

        let mut entries = Vec::with_capacity(pairs.len());
        for (index, ((pair, text), embedding)) in
            pairs.into_iter().zip(texts).zip(embeddings).enumerate()
        {
            let embedding = embedding.unwrap_or_default();
            if embedding.len() != dimension {
                anyhow::bail!(
                    "Knowledge entry #{} has dimension {}, expected {}",
                    index,
                    embedding.len(),
                    dimension
                );
            }

            let id = pair.id.unwrap_or_else(|| format!("entry-{}", index));
            if embedding.iter().all(|x| *x == 0.0) {
                anyhow::bail!(
                    "Knowledge entry '{}' ({:?}) has a zero embedding with {}; rephrase the question",
                    id,
                    text,
                    provider
                );
            }

            entries.push(KnowledgeEntry {
                id,
                text,
                answer: pair.answer,
                embedding,
            });
        }

        Ok(Self {
            entries,
            dimension,
            provider,
        })
    }

    /// 가장 유사한 항목 (동점이면 앞선 항목)
    pub fn best_match(&self, query: &[f32]) -> Option<(&KnowledgeEntry, f32)> {
        best_match(query, self.entries.iter().map(|e| e.embedding.as_slice()))
            .map(|(index, score)| (&self.entries[index], score))
    }

    /// ID로 항목 조회
    pub fn get(&self, id: &str) -> Option<&KnowledgeEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn entries(&self) -> &[KnowledgeEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// 임베딩에 사용된 프로바이더 이름
    pub fn provider(&self) -> &str {
        &self.provider
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedding;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn pair(id: Option<&str>, question: &str, answer: &str) -> QaPair {
        QaPair {
            id: id.map(str::to_string),
            question: question.to_string(),
            answer: answer.to_string(),
        }
    }

    /// 호출 횟수를 세는 임베더
    struct CountingEmbedder {
        inner: HashEmbedding,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for CountingEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.embed(text).await
        }

        fn dimension(&self) -> usize {
            self.inner.dimension()
        }

        fn name(&self) -> &str {
            "counting"
        }
    }

    /// 선언한 차원과 다른 벡터를 돌려주는 임베더
    struct BrokenEmbedder;

    #[async_trait]
    impl EmbeddingProvider for BrokenEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![1.0, 0.0])
        }

        fn dimension(&self) -> usize {
            4
        }

        fn name(&self) -> &str {
            "broken"
        }
    }

    #[test]
    fn test_normalize_text() {
        assert_eq!(normalize_text("  What's   UP\n"), "what's up");
        assert_eq!(normalize_text("How\u{2019}s it going"), "how's it going");
        assert_eq!(normalize_text("   "), "");
    }

    #[tokio::test]
    async fn test_build_assigns_ids() {
        let embedder = HashEmbedding::new(64);
        let kb = KnowledgeBase::build(
            vec![
                pair(Some("ibs"), "What is IBS?", "A bowel condition."),
                pair(None, "What are gallstones?", "Deposits in the gallbladder."),
            ],
            &embedder,
            None,
        )
        .await
        .unwrap();

        assert_eq!(kb.len(), 2);
        assert_eq!(kb.dimension(), 64);
        assert_eq!(kb.provider(), "hash-fnv1a");
        assert_eq!(kb.entries()[0].id, "ibs");
        assert_eq!(kb.entries()[0].text, "what is ibs?");
        assert_eq!(kb.entries()[1].id, "entry-1");
        assert!(kb.get("entry-1").is_some());
        assert!(kb.get("missing").is_none());
    }

    #[tokio::test]
    async fn test_build_rejects_empty() {
        let embedder = HashEmbedding::new(64);
        let err = KnowledgeBase::build(vec![], &embedder, None).await.err().unwrap();
        assert!(err.to_string().contains("empty"));
    }

    #[tokio::test]
    async fn test_build_rejects_blank_question() {
        let embedder = HashEmbedding::new(64);
        let err = KnowledgeBase::build(vec![pair(None, "  ", "answer")], &embedder, None)
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("empty question"));
    }

    #[tokio::test]
    async fn test_build_rejects_zero_embedding() {
        // 불용어만 있는 질문은 해시 임베딩이 영벡터
        let embedder = HashEmbedding::default();
        let err = KnowledgeBase::build(
            vec![
                pair(Some("ibs"), "What is IBS?", "a"),
                pair(Some("vague"), "What is it?", "it answer"),
            ],
            &embedder,
            None,
        )
        .await
        .err()
        .unwrap();

        let message = err.to_string();
        assert!(message.contains("'vague'"), "{}", message);
        assert!(message.contains("zero embedding"));
    }

    #[tokio::test]
    async fn test_build_rejects_dimension_mismatch() {
        let err = KnowledgeBase::build(vec![pair(None, "What is IBS?", "x")], &BrokenEmbedder, None)
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("expected 4"));
    }

    #[tokio::test]
    async fn test_build_uses_cache() {
        let dir = TempDir::new().unwrap();
        let cache = EmbeddingCache::open(&dir.path().join("cache.db")).unwrap();
        let embedder = CountingEmbedder {
            inner: HashEmbedding::new(64),
            calls: AtomicUsize::new(0),
        };
        let pairs = vec![
            pair(None, "What is IBS?", "a"),
            pair(None, "What are gallstones?", "b"),
        ];

        let first = KnowledgeBase::build(pairs.clone(), &embedder, Some(&cache)).await.unwrap();
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 2);

        let second = KnowledgeBase::build(pairs, &embedder, Some(&cache)).await.unwrap();
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 2);
        assert_eq!(first.entries()[1].embedding, second.entries()[1].embedding);
        assert_eq!(cache.stats().unwrap().entry_count, 2);
    }

    #[tokio::test]
    async fn test_best_match_exact_question() {
        let embedder = HashEmbedding::default();
        let kb = KnowledgeBase::build(
            vec![
                pair(Some("ibs"), "What is IBS?", "a"),
                pair(Some("gallstones"), "What are gallstones?", "b"),
            ],
            &embedder,
            None,
        )
        .await
        .unwrap();

        let query = embedder.embed("what are gallstones?").await.unwrap();
        let (entry, score) = kb.best_match(&query).unwrap();
        assert_eq!(entry.id, "gallstones");
        assert!((score - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_best_match_tie_prefers_first() {
        let embedder = HashEmbedding::default();
        let kb = KnowledgeBase::build(
            vec![
                pair(Some("first"), "stomach cramps", "a"),
                pair(Some("second"), "Stomach   cramps", "b"),
            ],
            &embedder,
            None,
        )
        .await
        .unwrap();

        let query = embedder.embed("stomach cramps").await.unwrap();
        let (entry, _) = kb.best_match(&query).unwrap();
        assert_eq!(entry.id, "first");
    }
}
