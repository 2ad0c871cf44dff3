use anyhow::Result;
use async_trait::async_trait;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{
    BertModel, Config as BertConfig, HiddenAct, PositionEmbeddingType,
};
use std::path::Path;
use tokenizers::Tokenizer;
use tokio::fs;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::vector::TARGET_VECTOR;

pub const MODEL_URL: &str =
    "https://huggingface.co/intfloat/e5-large-v2/resolve/main/model.safetensors";
pub const TOKENIZER_URL: &str =
    "https://huggingface.co/intfloat/e5-large-v2/resolve/main/tokenizer.json";

/// Converts text to a fixed-dimension dense vector. Dimensionality must be
/// consistent across calls for similarity comparison to be meaningful.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn dimensions(&self) -> usize;
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Configuration for the E5 embedding model
pub struct E5Config {
    pub model_path: String,
    pub tokenizer_path: String,
    pub dimensions: usize,
    pub max_length: usize,
    pub device: Device,
}

impl Default for E5Config {
    fn default() -> Self {
        Self {
            model_path: "models/e5-large-v2.safetensors".to_string(),
            tokenizer_path: "models/e5-tokenizer.json".to_string(),
            dimensions: 1024,
            max_length: 512,
            device: Device::Cpu,
        }
    }
}

impl E5Config {
    /// Download model and tokenizer files on first use.
    pub async fn ensure_models_exist(&self) -> Result<()> {
        if !Path::new("models").exists() {
            fs::create_dir("models").await?;
        }

        if !Path::new(&self.model_path).exists() {
            info!(target: TARGET_VECTOR, "Downloading E5 model from {}", MODEL_URL);
            let response = reqwest::get(MODEL_URL).await?;
            let bytes = response.bytes().await?;
            fs::write(&self.model_path, bytes).await?;
            info!(target: TARGET_VECTOR, "Downloaded E5 model to {}", self.model_path);
        }

        if !Path::new(&self.tokenizer_path).exists() {
            info!(target: TARGET_VECTOR, "Downloading E5 tokenizer from {}", TOKENIZER_URL);
            let response = reqwest::get(TOKENIZER_URL).await?;
            let bytes = response.bytes().await?;
            fs::write(&self.tokenizer_path, bytes).await?;
            info!(target: TARGET_VECTOR, "Downloaded E5 tokenizer to {}", self.tokenizer_path);
        }

        Ok(())
    }

    fn bert_config(&self) -> BertConfig {
        BertConfig {
            hidden_size: self.dimensions,
            intermediate_size: 4096,
            max_position_embeddings: self.max_length,
            num_attention_heads: 16,
            num_hidden_layers: 24,
            vocab_size: 30522,
            layer_norm_eps: 1e-12,
            pad_token_id: 0,
            hidden_act: HiddenAct::Gelu,
            hidden_dropout_prob: 0.0,
            type_vocab_size: 2,
            initializer_range: 0.02,
            position_embedding_type: PositionEmbeddingType::Absolute,
            use_cache: false,
            classifier_dropout: None,
            model_type: None,
        }
    }
}

/// E5 embedding provider backed by candle. Constructed once at startup and
/// injected wherever embeddings are needed; holds no global state.
pub struct E5Embedder {
    model: BertModel,
    tokenizer: Tokenizer,
    config: E5Config,
}

impl E5Embedder {
    pub async fn load(config: E5Config) -> Result<Self> {
        config.ensure_models_exist().await?;

        info!(target: TARGET_VECTOR, "Loading E5 model from {}", config.model_path);
        let tensors = candle_core::safetensors::load_buffer(
            &std::fs::read(&config.model_path)?,
            &config.device,
        )
        .map_err(|e| anyhow::anyhow!("Failed to load model tensors: {}", e))?;
        let vb = VarBuilder::from_tensors(tensors, DType::F32, &config.device);
        let model = BertModel::load(vb, &config.bert_config())
            .map_err(|e| anyhow::anyhow!("Failed to load BERT model: {}", e))?;

        let tokenizer = Tokenizer::from_file(&config.tokenizer_path)
            .map_err(|e| anyhow::anyhow!("Failed to load tokenizer: {}", e))?;

        info!(target: TARGET_VECTOR, "E5 model and tokenizer loaded");
        Ok(Self {
            model,
            tokenizer,
            config,
        })
    }

    fn embed_sync(&self, text: &str) -> Result<Vec<f32>> {
        let start_time = Instant::now();

        // E5 expects a task prefix; one consistent prefix keeps documents
        // and queries in the same embedding space.
        let prefixed = format!("passage: {}", text);
        let encoding = self
            .tokenizer
            .encode(prefixed.as_str(), true)
            .map_err(|e| anyhow::anyhow!("Tokenization failed: {}", e))?;

        // Truncate to max_length - 1 to avoid index boundary issues
        let max_len = self.config.max_length - 1;
        let input_ids: Vec<i64> = encoding
            .get_ids()
            .iter()
            .take(max_len)
            .map(|&x| x as i64)
            .collect();
        let attention_mask: Vec<i64> = encoding
            .get_attention_mask()
            .iter()
            .take(max_len)
            .map(|&x| x as i64)
            .collect();
        let token_count = input_ids.len();

        let input_ids = Tensor::new(input_ids, &self.config.device)?.unsqueeze(0)?;
        let attention_mask = Tensor::new(attention_mask, &self.config.device)?.unsqueeze(0)?;
        let token_type_ids = input_ids.zeros_like()?;

        let hidden_state = self
            .model
            .forward(&input_ids, &token_type_ids, Some(&attention_mask))?;

        // Mask-weighted mean pooling over the sequence dimension.
        let mask_float = attention_mask.to_dtype(DType::F32)?;
        let mask_expanded = mask_float.unsqueeze(2)?.expand(hidden_state.shape())?;
        let summed = hidden_state.mul(&mask_expanded)?.sum(1)?;
        let counts = mask_float.sum(1)?.unsqueeze(1)?.clamp(1.0, f32::MAX)?;
        let mean_pooled = summed.div(&counts.expand(summed.shape())?)?;

        // L2 normalize so cosine similarity reduces to a dot product.
        let norm = mean_pooled.sqr()?.sum(1)?.sqrt()?.unsqueeze(1)?;
        let normalized = mean_pooled.div(&norm.expand(mean_pooled.shape())?)?;
        let vector = normalized.squeeze(0)?.to_vec1::<f32>()?;

        if vector.len() != self.config.dimensions {
            return Err(anyhow::anyhow!(
                "Unexpected embedding dimensions: got {}, expected {}",
                vector.len(),
                self.config.dimensions
            ));
        }

        let magnitude: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if magnitude < 0.001 {
            warn!(target: TARGET_VECTOR, "Near-zero magnitude embedding generated");
            return Err(anyhow::anyhow!("Near-zero magnitude embedding"));
        }

        info!(
            target: TARGET_VECTOR,
            tokens = token_count,
            elapsed_ms = start_time.elapsed().as_millis() as u64,
            "embedding generated"
        );

        Ok(vector)
    }
}

#[async_trait]
impl EmbeddingProvider for E5Embedder {
    fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_sync(text)
    }
}
