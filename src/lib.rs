//! symptom-checker - 복부 통증 증상 안내 챗봇
//!
//! 사용자 메시지를 임베딩해 고정된 질문/답변 지식베이스와 코사인 유사도로 비교하고,
//! 임계값 이상이면 가장 가까운 답변을, 아니면 범위 밖 안내를 반환합니다.
//! 인사말은 패턴으로 먼저 걸러냅니다.

pub mod chat;
pub mod cli;
pub mod config;
pub mod embedding;
pub mod knowledge;
pub mod server;

// Re-exports
pub use chat::{MatchKind, MatchOutcome, ResponseMatcher, OUT_OF_SCOPE_RESPONSE};
pub use config::{get_data_dir, AppConfig, EmbeddingBackend, EmbeddingConfig};
pub use embedding::{
    create_embedder, get_api_key, EmbeddingProvider, GeminiEmbedding, HashEmbedding,
    LocalModelEmbedding,
};
pub use knowledge::{
    cosine_similarity, load_pairs, EmbeddingCache, KnowledgeBase, KnowledgeEntry, MedicalDataset,
    QaPair,
};
pub use server::{build_router, ApiError, AppState};
