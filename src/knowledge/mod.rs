//! Knowledge 모듈 - 복부 통증 지식베이스
//!
//! - Dataset: 구조화된 의료 데이터 및 질문/답변 시드
//! - Base: 시작 시 임베딩되는 읽기 전용 항목 집합
//! - Cache: SQLite 임베딩 캐시
//! - Vector: 코사인 유사도

mod base;
mod cache;
mod dataset;
mod vector;

// Re-exports
pub use base::{normalize_text, KnowledgeBase, KnowledgeEntry};
pub use cache::{CacheStats, EmbeddingCache};
pub use dataset::{load_pairs, Cause, HomeRemedy, KnowledgeSource, MedicalDataset, QaPair};
pub use vector::{best_match, cosine_similarity};
