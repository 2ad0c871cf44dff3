use anyhow::Result;
use async_trait::async_trait;
use candle_core::{DType, Device, Tensor};
use candle_nn::{Linear, Module, VarBuilder};
use candle_transformers::models::bert::{
    BertModel, Config as BertConfig, HiddenAct, PositionEmbeddingType,
};
use std::path::Path;
use tokenizers::Tokenizer;
use tokio::fs;
use tracing::info;

use crate::sentiment::{SentimentModel, SentimentScores, TARGET_SENTIMENT};

pub const MODEL_URL: &str =
    "https://huggingface.co/ProsusAI/finbert/resolve/main/model.safetensors";
pub const TOKENIZER_URL: &str =
    "https://huggingface.co/ProsusAI/finbert/resolve/main/tokenizer.json";

/// Configuration for the FinBERT sentiment model
pub struct FinBertConfig {
    pub model_path: String,
    pub tokenizer_path: String,
    pub hidden_size: usize,
    pub max_length: usize,
    pub device: Device,
}

impl Default for FinBertConfig {
    fn default() -> Self {
        Self {
            model_path: "models/finbert.safetensors".to_string(),
            tokenizer_path: "models/finbert-tokenizer.json".to_string(),
            hidden_size: 768,
            max_length: 512,
            device: Device::Cpu,
        }
    }
}

impl FinBertConfig {
    pub async fn ensure_models_exist(&self) -> Result<()> {
        if !Path::new("models").exists() {
            fs::create_dir("models").await?;
        }

        if !Path::new(&self.model_path).exists() {
            info!(target: TARGET_SENTIMENT, "Downloading FinBERT model from {}", MODEL_URL);
            let response = reqwest::get(MODEL_URL).await?;
            let bytes = response.bytes().await?;
            fs::write(&self.model_path, bytes).await?;
        }

        if !Path::new(&self.tokenizer_path).exists() {
            info!(target: TARGET_SENTIMENT, "Downloading FinBERT tokenizer from {}", TOKENIZER_URL);
            let response = reqwest::get(TOKENIZER_URL).await?;
            let bytes = response.bytes().await?;
            fs::write(&self.tokenizer_path, bytes).await?;
        }

        Ok(())
    }

    fn bert_config(&self) -> BertConfig {
        BertConfig {
            hidden_size: self.hidden_size,
            intermediate_size: 3072,
            max_position_embeddings: self.max_length,
            num_attention_heads: 12,
            num_hidden_layers: 12,
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

/// FinBERT sequence classifier: BERT encoder, tanh pooler over the [CLS]
/// token, and a three-way classification head. Label order in the
/// published checkpoint is positive, negative, neutral.
pub struct FinBertModel {
    model: BertModel,
    pooler: Linear,
    classifier: Linear,
    tokenizer: Tokenizer,
    config: FinBertConfig,
}

impl FinBertModel {
    pub async fn load(config: FinBertConfig) -> Result<Self> {
        config.ensure_models_exist().await?;

        info!(target: TARGET_SENTIMENT, "Loading FinBERT model from {}", config.model_path);
        let tensors = candle_core::safetensors::load_buffer(
            &std::fs::read(&config.model_path)?,
            &config.device,
        )
        .map_err(|e| anyhow::anyhow!("Failed to load model tensors: {}", e))?;
        let vb = VarBuilder::from_tensors(tensors, DType::F32, &config.device);

        let model = BertModel::load(vb.pp("bert"), &config.bert_config())
            .map_err(|e| anyhow::anyhow!("Failed to load BERT encoder: {}", e))?;
        let pooler = candle_nn::linear(
            config.hidden_size,
            config.hidden_size,
            vb.pp("bert.pooler.dense"),
        )?;
        let classifier = candle_nn::linear(config.hidden_size, 3, vb.pp("classifier"))?;

        let tokenizer = Tokenizer::from_file(&config.tokenizer_path)
            .map_err(|e| anyhow::anyhow!("Failed to load tokenizer: {}", e))?;

        info!(target: TARGET_SENTIMENT, "FinBERT model loaded");
        Ok(Self {
            model,
            pooler,
            classifier,
            tokenizer,
            config,
        })
    }

    fn predict_sync(&self, text: &str) -> Result<SentimentScores> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| anyhow::anyhow!("Tokenization failed: {}", e))?;

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

        let input_ids = Tensor::new(input_ids, &self.config.device)?.unsqueeze(0)?;
        let attention_mask = Tensor::new(attention_mask, &self.config.device)?.unsqueeze(0)?;
        let token_type_ids = input_ids.zeros_like()?;

        let hidden_state = self
            .model
            .forward(&input_ids, &token_type_ids, Some(&attention_mask))?;

        // [CLS] token representation -> pooler -> classification head.
        let cls = hidden_state.narrow(1, 0, 1)?.squeeze(1)?;
        let pooled = self.pooler.forward(&cls)?.tanh()?;
        let logits = self.classifier.forward(&pooled)?;
        let probabilities = candle_nn::ops::softmax(&logits, 1)?
            .squeeze(0)?
            .to_vec1::<f32>()?;

        if probabilities.len() != 3 {
            return Err(anyhow::anyhow!(
                "Unexpected class count from classifier: {}",
                probabilities.len()
            ));
        }

        Ok(SentimentScores {
            positive: probabilities[0],
            negative: probabilities[1],
            neutral: probabilities[2],
        })
    }
}

#[async_trait]
impl SentimentModel for FinBertModel {
    fn name(&self) -> &'static str {
        "finbert"
    }

    async fn predict(&self, text: &str) -> Result<SentimentScores> {
        self.predict_sync(text)
    }
}
