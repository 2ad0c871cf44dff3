use async_openai::config::OpenAIConfig;
use async_openai::types::{ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs};
use async_openai::Client as OpenAIClient;
use ollama_rs::generation::completion::request::GenerationRequest;
use ollama_rs::Ollama;
use serde::Serialize;
use std::time::Instant;
use tracing::{info, warn};

use crate::article::Article;
use crate::TARGET_LLM_REQUEST;

/// Characters of each document included in the synthesis prompt.
const DOC_SNIPPET_CHARS: usize = 500;

#[derive(Clone)]
pub enum LLMClient {
    Ollama(Ollama),
    OpenAI(OpenAIClient<OpenAIConfig>),
}

/// A natural-language summary produced from the top retrieved documents.
#[derive(Debug, Clone, Serialize)]
pub struct SynthesizedAnswer {
    pub answer: String,
    pub sources_used: Vec<String>,
    pub latency_ms: u64,
}

/// Optional external collaborator that turns top query hits into a
/// synthesized answer. Its absence or failure is "no synthesized answer",
/// never an error.
pub struct AnswerSynthesizer {
    client: LLMClient,
    model: String,
}

impl AnswerSynthesizer {
    pub fn new(client: LLMClient, model: &str) -> Self {
        Self {
            client,
            model: model.to_string(),
        }
    }

    pub async fn synthesize(&self, query: &str, documents: &[&Article]) -> Option<SynthesizedAnswer> {
        if documents.is_empty() {
            return None;
        }

        let prompt = build_prompt(query, documents);
        let started = Instant::now();

        match self.generate(&prompt).await {
            Ok(answer) if !answer.trim().is_empty() => {
                let latency_ms = started.elapsed().as_millis() as u64;
                info!(
                    target: TARGET_LLM_REQUEST,
                    latency_ms,
                    documents = documents.len(),
                    "answer synthesis complete"
                );
                Some(SynthesizedAnswer {
                    answer: answer.trim().to_string(),
                    sources_used: documents.iter().map(|d| d.id.clone()).collect(),
                    latency_ms,
                })
            }
            Ok(_) => {
                warn!(target: TARGET_LLM_REQUEST, "synthesis returned empty answer");
                None
            }
            Err(e) => {
                warn!(target: TARGET_LLM_REQUEST, error = %e, "answer synthesis failed");
                None
            }
        }
    }

    async fn generate(&self, prompt: &str) -> anyhow::Result<String> {
        match &self.client {
            LLMClient::Ollama(ollama) => {
                let request = GenerationRequest::new(self.model.clone(), prompt.to_string());
                let response = ollama
                    .generate(request)
                    .await
                    .map_err(|e| anyhow::anyhow!("ollama generation failed: {e}"))?;
                Ok(response.response)
            }
            LLMClient::OpenAI(client) => {
                let request = CreateChatCompletionRequestArgs::default()
                    .model(&self.model)
                    .messages([ChatCompletionRequestUserMessageArgs::default()
                        .content(prompt)
                        .build()?
                        .into()])
                    .build()?;
                let response = client.chat().create(request).await?;
                Ok(response
                    .choices
                    .first()
                    .and_then(|choice| choice.message.content.clone())
                    .unwrap_or_default())
            }
        }
    }
}

fn build_prompt(query: &str, documents: &[&Article]) -> String {
    let mut prompt = String::from(
        "You are a financial news assistant. Answer the question using only the \
         numbered context articles below. Cite article numbers in brackets. If the \
         articles do not contain the answer, say so.\n\n",
    );
    for (i, doc) in documents.iter().enumerate() {
        let snippet: String = doc.normalized_content.chars().take(DOC_SNIPPET_CHARS).collect();
        prompt.push_str(&format!(
            "[{}] {} ({}): {}\n",
            i + 1,
            doc.title,
            doc.source,
            snippet
        ));
    }
    prompt.push_str(&format!("\nQuestion: {}\nAnswer:", query));
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::sample_article;

    #[test]
    fn prompt_numbers_documents_and_carries_the_question() {
        let a = sample_article("a1");
        let b = sample_article("a2");
        let prompt = build_prompt("What moved bank stocks?", &[&a, &b]);
        assert!(prompt.contains("[1] Article a1"));
        assert!(prompt.contains("[2] Article a2"));
        assert!(prompt.contains("Question: What moved bank stocks?"));
    }

    #[tokio::test]
    async fn no_documents_means_no_answer() {
        let synthesizer = AnswerSynthesizer::new(
            LLMClient::Ollama(Ollama::new("http://localhost".to_string(), 1)),
            "test-model",
        );
        assert!(synthesizer.synthesize("anything", &[]).await.is_none());
    }

    #[tokio::test]
    async fn unreachable_backend_means_no_answer_not_an_error() {
        // Port 1 refuses connections; the synthesizer must swallow it.
        let synthesizer = AnswerSynthesizer::new(
            LLMClient::Ollama(Ollama::new("http://localhost".to_string(), 1)),
            "test-model",
        );
        let article = sample_article("a1");
        assert!(synthesizer
            .synthesize("anything", &[&article])
            .await
            .is_none());
    }
}
