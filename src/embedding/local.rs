//! 로컬 문장 임베딩 모델 (BERT 계열, candle CPU 추론)
//!
//! sentence-transformers가 저장한 모델 디렉토리를 그대로 읽습니다.
//! - `model.safetensors`: 가중치
//! - `tokenizer.json`: 토크나이저
//! - `config.json`: 모델 하이퍼파라미터 (없으면 all-MiniLM-L6-v2 값)
//!
//! 출력은 마지막 hidden state의 mean pooling을 L2 정규화한 벡터입니다.
//! 디렉토리가 없거나 로드에 실패하면 생성 단계에서 에러를 반환합니다.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{Embedding, LayerNorm, Linear, VarBuilder};
use serde::Deserialize;
use tokenizers::Tokenizer;

use super::EmbeddingProvider;

pub const MODEL_FILE: &str = "model.safetensors";
pub const TOKENIZER_FILE: &str = "tokenizer.json";
pub const CONFIG_FILE: &str = "config.json";

// ============================================================================
// Config
// ============================================================================

/// BERT 하이퍼파라미터 (`config.json`의 필요한 필드만)
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BertConfig {
    pub hidden_size: usize,
    pub intermediate_size: usize,
    pub num_attention_heads: usize,
    pub num_hidden_layers: usize,
    pub vocab_size: usize,
    pub max_position_embeddings: usize,
    pub type_vocab_size: usize,
    pub layer_norm_eps: f64,
}

impl Default for BertConfig {
    /// all-MiniLM-L6-v2
    fn default() -> Self {
        Self {
            hidden_size: 384,
            intermediate_size: 1536,
            num_attention_heads: 12,
            num_hidden_layers: 6,
            vocab_size: 30522,
            max_position_embeddings: 512,
            type_vocab_size: 2,
            layer_norm_eps: 1e-12,
        }
    }
}

impl BertConfig {
    /// 모델 디렉토리의 `config.json` 로드 (없으면 기본값)
    pub fn load(model_dir: &Path) -> Result<Self> {
        let path = model_dir.join(CONFIG_FILE);
        let config = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("Failed to parse {}", path.display()))?
        } else {
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.num_attention_heads == 0 || self.hidden_size % self.num_attention_heads != 0 {
            anyhow::bail!(
                "hidden_size {} is not divisible by num_attention_heads {}",
                self.hidden_size,
                self.num_attention_heads
            );
        }
        if self.max_position_embeddings < 2 {
            anyhow::bail!("max_position_embeddings must be at least 2");
        }
        Ok(())
    }

    fn head_dim(&self) -> usize {
        self.hidden_size / self.num_attention_heads
    }
}

// ============================================================================
// Encoder
// ============================================================================

struct SelfAttention {
    query: Linear,
    key: Linear,
    value: Linear,
    dense: Linear,
    norm: LayerNorm,
    heads: usize,
    head_dim: usize,
}

impl SelfAttention {
    fn load(vb: VarBuilder, config: &BertConfig) -> Result<Self> {
        let h = config.hidden_size;
        let inner = vb.pp("self");
        let output = vb.pp("output");
        Ok(Self {
            query: candle_nn::linear(h, h, inner.pp("query"))?,
            key: candle_nn::linear(h, h, inner.pp("key"))?,
            value: candle_nn::linear(h, h, inner.pp("value"))?,
            dense: candle_nn::linear(h, h, output.pp("dense"))?,
            norm: candle_nn::layer_norm(h, config.layer_norm_eps, output.pp("LayerNorm"))?,
            heads: config.num_attention_heads,
            head_dim: config.head_dim(),
        })
    }

    /// (1, seq, hidden) -> (1, heads, seq, head_dim)
    fn split_heads(&self, x: Tensor, seq: usize) -> Result<Tensor> {
        Ok(x.reshape((1, seq, self.heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()?)
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let (_, seq, _) = x.dims3()?;
        let q = self.split_heads(self.query.forward(x)?, seq)?;
        let k = self.split_heads(self.key.forward(x)?, seq)?;
        let v = self.split_heads(self.value.forward(x)?, seq)?;

        let scores = (q.matmul(&k.t()?.contiguous()?)? / (self.head_dim as f64).sqrt())?;
        let weights = candle_nn::ops::softmax_last_dim(&scores)?;
        let context = weights
            .matmul(&v)?
            .transpose(1, 2)?
            .contiguous()?
            .reshape((1, seq, self.heads * self.head_dim))?;

        let out = self.dense.forward(&context)?;
        Ok(self.norm.forward(&(x + out)?)?)
    }
}

struct FeedForward {
    intermediate: Linear,
    output: Linear,
    norm: LayerNorm,
}

impl FeedForward {
    fn load(vb: VarBuilder, config: &BertConfig) -> Result<Self> {
        let (h, i) = (config.hidden_size, config.intermediate_size);
        Ok(Self {
            intermediate: candle_nn::linear(h, i, vb.pp("intermediate").pp("dense"))?,
            output: candle_nn::linear(i, h, vb.pp("output").pp("dense"))?,
            norm: candle_nn::layer_norm(h, config.layer_norm_eps, vb.pp("output").pp("LayerNorm"))?,
        })
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let h = self.intermediate.forward(x)?.gelu_erf()?;
        let h = self.output.forward(&h)?;
        Ok(self.norm.forward(&(x + h)?)?)
    }
}

struct EncoderLayer {
    attention: SelfAttention,
    ffn: FeedForward,
}

impl EncoderLayer {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        self.ffn.forward(&self.attention.forward(x)?)
    }
}

struct BertEncoder {
    words: Embedding,
    positions: Embedding,
    token_types: Embedding,
    norm: LayerNorm,
    layers: Vec<EncoderLayer>,
    max_positions: usize,
    device: Device,
}

impl BertEncoder {
    fn load(vb: VarBuilder, config: &BertConfig, device: Device) -> Result<Self> {
        // 분류 헤드와 함께 저장된 모델은 `bert.` 접두사를 가짐
        let vb = if vb.contains_tensor("embeddings.word_embeddings.weight") {
            vb
        } else {
            vb.pp("bert")
        };

        let h = config.hidden_size;
        let emb = vb.pp("embeddings");

        let mut layers = Vec::with_capacity(config.num_hidden_layers);
        for i in 0..config.num_hidden_layers {
            let layer_vb = vb.pp("encoder").pp("layer").pp(i.to_string());
            layers.push(EncoderLayer {
                attention: SelfAttention::load(layer_vb.pp("attention"), config)?,
                ffn: FeedForward::load(layer_vb, config)?,
            });
        }

        Ok(Self {
            words: candle_nn::embedding(config.vocab_size, h, emb.pp("word_embeddings"))?,
            positions: candle_nn::embedding(
                config.max_position_embeddings,
                h,
                emb.pp("position_embeddings"),
            )?,
            token_types: candle_nn::embedding(config.type_vocab_size, h, emb.pp("token_type_embeddings"))?,
            norm: candle_nn::layer_norm(h, config.layer_norm_eps, emb.pp("LayerNorm"))?,
            layers,
            max_positions: config.max_position_embeddings,
            device,
        })
    }

    /// 토큰 ID -> mean pooling + L2 정규화 벡터
    fn encode(&self, ids: &[u32]) -> Result<Vec<f32>> {
        let seq = ids.len();
        let input = Tensor::new(ids, &self.device)?.unsqueeze(0)?;
        let positions = Tensor::arange(0u32, seq as u32, &self.device)?.unsqueeze(0)?;
        let types = input.zeros_like()?;

        let embedded = ((self.words.forward(&input)? + self.positions.forward(&positions)?)?
            + self.token_types.forward(&types)?)?;
        let mut hidden = self.norm.forward(&embedded)?;
        for layer in &self.layers {
            hidden = layer.forward(&hidden)?;
        }

        let mut pooled = hidden.mean(1)?.squeeze(0)?.to_vec1::<f32>()?;
        let norm = pooled.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            pooled.iter_mut().for_each(|x| *x /= norm);
        }
        Ok(pooled)
    }
}

// ============================================================================
// LocalModelEmbedding
// ============================================================================

struct LoadedModel {
    encoder: BertEncoder,
    tokenizer: Tokenizer,
}

impl LoadedModel {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| anyhow::anyhow!("Tokenization failed: {}", e))?;

        // 최대 길이를 넘으면 자르되 마지막 [SEP] 유지
        let mut ids = encoding.get_ids().to_vec();
        let max = self.encoder.max_positions;
        if ids.len() > max {
            if let Some(&last) = ids.last() {
                ids.truncate(max - 1);
                ids.push(last);
            }
        }
        if ids.is_empty() {
            anyhow::bail!("Tokenizer produced no tokens");
        }

        self.encoder.encode(&ids)
    }
}

/// 로컬 모델 임베딩 프로바이더
pub struct LocalModelEmbedding {
    model: Arc<LoadedModel>,
    dimension: usize,
    name: String,
    model_dir: PathBuf,
}

impl LocalModelEmbedding {
    /// 모델 디렉토리에서 로드
    pub fn load(model_dir: &Path) -> Result<Self> {
        if !model_dir.is_dir() {
            anyhow::bail!("Embedding model directory not found: {}", model_dir.display());
        }

        let weights = model_dir.join(MODEL_FILE);
        let tokenizer_path = model_dir.join(TOKENIZER_FILE);
        for required in [&weights, &tokenizer_path] {
            if !required.is_file() {
                anyhow::bail!("Embedding model file missing: {}", required.display());
            }
        }

        let config = BertConfig::load(model_dir)?;
        let device = Device::Cpu;

        // SAFETY: 가중치 파일은 프로세스가 사용하는 동안 수정되지 않아야 함
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[&weights], DType::F32, &device) }
            .with_context(|| format!("Failed to map {}", weights.display()))?;
        let encoder = BertEncoder::load(vb, &config, device)
            .with_context(|| format!("Failed to load model weights from {}", weights.display()))?;

        let tokenizer = Tokenizer::from_file(&tokenizer_path).map_err(|e| {
            anyhow::anyhow!("Failed to load tokenizer {}: {}", tokenizer_path.display(), e)
        })?;

        // 캐시 키가 모델마다 달라지도록 디렉토리 이름과 가중치 크기를 포함
        let dir_name = model_dir
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("model");
        let weights_len = std::fs::metadata(&weights).map(|m| m.len()).unwrap_or(0);

        tracing::info!(
            "Loaded local embedding model {} (dimension: {}, layers: {})",
            model_dir.display(),
            config.hidden_size,
            config.num_hidden_layers
        );

        Ok(Self {
            model: Arc::new(LoadedModel { encoder, tokenizer }),
            dimension: config.hidden_size,
            name: format!("local:{}:{}", dir_name, weights_len),
            model_dir: model_dir.to_path_buf(),
        })
    }

    pub fn model_dir(&self) -> &Path {
        &self.model_dir
    }
}

#[async_trait]
impl EmbeddingProvider for LocalModelEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let model = Arc::clone(&self.model);
        let text = text.to_string();
        // CPU 추론은 블로킹 풀에서
        tokio::task::spawn_blocking(move || model.embed(&text))
            .await
            .context("Embedding task failed")?
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::cosine_similarity;
    use tempfile::TempDir;

    #[test]
    fn test_missing_directory_is_error() {
        let dir = TempDir::new().unwrap();
        let err = LocalModelEmbedding::load(&dir.path().join("fine_tuned_symptom_checker"))
            .err()
            .unwrap();
        assert!(err.to_string().contains("directory not found"));
    }

    #[test]
    fn test_missing_files_are_named() {
        let dir = TempDir::new().unwrap();
        let err = LocalModelEmbedding::load(dir.path()).err().unwrap();
        assert!(err.to_string().contains(MODEL_FILE));

        std::fs::write(dir.path().join(MODEL_FILE), b"").unwrap();
        let err = LocalModelEmbedding::load(dir.path()).err().unwrap();
        assert!(err.to_string().contains(TOKENIZER_FILE));
    }

    #[test]
    fn test_corrupt_weights_fail_to_load() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(MODEL_FILE), b"not a safetensors file").unwrap();
        std::fs::write(dir.path().join(TOKENIZER_FILE), b"{}").unwrap();
        assert!(LocalModelEmbedding::load(dir.path()).is_err());
    }

    #[test]
    fn test_config_defaults_and_partial_file() {
        let dir = TempDir::new().unwrap();
        assert_eq!(BertConfig::load(dir.path()).unwrap(), BertConfig::default());

        std::fs::write(
            dir.path().join(CONFIG_FILE),
            r#"{"hidden_size": 768, "num_attention_heads": 12, "model_type": "bert"}"#,
        )
        .unwrap();
        let config = BertConfig::load(dir.path()).unwrap();
        assert_eq!(config.hidden_size, 768);
        assert_eq!(config.head_dim(), 64);
        assert_eq!(config.num_hidden_layers, 6);
    }

    #[test]
    fn test_config_rejects_uneven_heads() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            r#"{"hidden_size": 100, "num_attention_heads": 12}"#,
        )
        .unwrap();
        assert!(BertConfig::load(dir.path()).is_err());
    }

    /// `SYMPTOM_CHECKER_TEST_MODEL_DIR`에 all-MiniLM-L6-v2 등이 있을 때만 실행
    #[tokio::test]
    async fn test_real_model_similarity() {
        let Some(dir) = std::env::var_os("SYMPTOM_CHECKER_TEST_MODEL_DIR") else {
            eprintln!("Skipping: SYMPTOM_CHECKER_TEST_MODEL_DIR not set");
            return;
        };

        let model = LocalModelEmbedding::load(Path::new(&dir)).unwrap();
        let cramps = model.embed("what causes stomach cramps").await.unwrap();
        let pain = model.embed("why does my abdomen hurt").await.unwrap();
        let weather = model.embed("what's the weather like in tokyo").await.unwrap();

        assert_eq!(cramps.len(), model.dimension());
        let norm = cramps.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 0.01);
        assert!(cosine_similarity(&cramps, &pain) > cosine_similarity(&cramps, &weather));
    }
}
