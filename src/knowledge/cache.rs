//! Embedding Cache - rusqlite 기반 임베딩 캐시
//!
//! 지식베이스 항목의 임베딩을 저장해 재시작 시 원격 API를 다시 호출하지 않도록 합니다.
//! 키: SHA-256(provider, dimension, text)
//! 저장 위치: ~/.symptom-checker/embeddings.db

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde::Serialize;
use sha2::{Digest, Sha256};

/// 캐시 통계
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub entry_count: usize,
    pub total_vector_bytes: usize,
    pub db_path: PathBuf,
}

/// 임베딩 캐시
pub struct EmbeddingCache {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl EmbeddingCache {
    /// 캐시 열기 (없으면 생성)
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)
                    .context("Failed to create cache directory")?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .context("Failed to open SQLite database")?;

        let cache = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: path.to_path_buf(),
        };

        cache.initialize()?;
        Ok(cache)
    }

    /// DB 경로 반환
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn initialize(&self) -> Result<()> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS embeddings (
                key TEXT PRIMARY KEY,
                provider TEXT NOT NULL,
                dimension INTEGER NOT NULL,
                vector BLOB NOT NULL,
                created_at TEXT NOT NULL
            )",
            [],
        )
        .context("Failed to create embeddings table")?;

        tracing::debug!("Embedding cache initialized at {:?}", self.db_path);
        Ok(())
    }

    /// 캐시 조회
    ///
    /// 저장된 벡터의 길이가 차원과 다르면 미스로 취급합니다.
    pub fn get(&self, provider: &str, dimension: usize, text: &str) -> Result<Option<Vec<f32>>> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        let key = cache_key(provider, dimension, text);

        let blob: Option<Vec<u8>> = conn
            .query_row(
                "SELECT vector FROM embeddings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to query embedding cache")?;

        Ok(blob
            .map(|bytes| decode_vector(&bytes))
            .filter(|v| v.len() == dimension))
    }

    /// 캐시 저장 (같은 키는 덮어씀)
    pub fn put(&self, provider: &str, dimension: usize, text: &str, vector: &[f32]) -> Result<()> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        conn.execute(
            "INSERT OR REPLACE INTO embeddings (key, provider, dimension, vector, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                cache_key(provider, dimension, text),
                provider,
                dimension as i64,
                encode_vector(vector),
                Utc::now().to_rfc3339()
            ],
        )
        .context("Failed to insert embedding")?;

        Ok(())
    }

    /// 캐시 통계
    pub fn stats(&self) -> Result<CacheStats> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let (count, total): (i64, i64) = conn
            .query_row(
                "SELECT COUNT(*), COALESCE(SUM(LENGTH(vector)), 0) FROM embeddings",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .context("Failed to read cache stats")?;

        Ok(CacheStats {
            entry_count: count as usize,
            total_vector_bytes: total as usize,
            db_path: self.db_path.clone(),
        })
    }

    /// 전체 삭제
    pub fn clear(&self) -> Result<usize> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        let rows = conn.execute("DELETE FROM embeddings", [])?;
        tracing::info!("Cleared {} cached embeddings", rows);
        Ok(rows)
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn cache_key(provider: &str, dimension: usize, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(provider.as_bytes());
    hasher.update([0u8]);
    hasher.update(dimension.to_le_bytes());
    hasher.update([0u8]);
    hasher.update(text.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// f32 little-endian 직렬화
fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|x| x.to_le_bytes()).collect()
}

fn decode_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

// ============================================================================
// Tests
// ============================================================================
