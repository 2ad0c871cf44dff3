use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::warn;

use crate::article::{SentimentAssessment, SentimentDistribution, SentimentLabel};
use crate::normalize::MIN_CONTENT_CHARS;

pub mod finbert;
pub mod lexicon;

pub use finbert::{FinBertConfig, FinBertModel};
pub use lexicon::LexiconModel;

// Module-level constants
pub const TARGET_SENTIMENT: &str = "sentiment";

/// Leading window handed to the model. Titles and opening paragraphs carry
/// the most signal, so truncation keeps the front of the text.
pub const SENTIMENT_MAX_CHARS: usize = 2000;

/// Raw three-way probability distribution from the underlying model.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SentimentScores {
    pub positive: f32,
    pub negative: f32,
    pub neutral: f32,
}

/// The model behind the classifier: anything that maps text to a
/// {positive, negative, neutral} distribution.
#[async_trait]
pub trait SentimentModel: Send + Sync {
    fn name(&self) -> &'static str;
    async fn predict(&self, text: &str) -> Result<SentimentScores>;
}

/// Maps article text to a bullish/bearish/neutral call.
///
/// Skips (returns `None`) below the minimum-length floor rather than
/// fabricating a label. A model failure yields a neutral, low-confidence
/// default so storage is never blocked by an optional enrichment.
pub struct SentimentClassifier {
    model: Arc<dyn SentimentModel>,
}

impl SentimentClassifier {
    pub fn new(model: Arc<dyn SentimentModel>) -> Self {
        Self { model }
    }

    pub async fn classify(&self, text: &str) -> Option<SentimentAssessment> {
        if text.chars().count() < MIN_CONTENT_CHARS {
            return None;
        }

        let window = leading_window(text, SENTIMENT_MAX_CHARS);
        match self.model.predict(window).await {
            Ok(scores) => Some(assessment_from(scores)),
            Err(e) => {
                warn!(
                    target: TARGET_SENTIMENT,
                    model = self.model.name(),
                    error = %e,
                    "sentiment model failed, substituting neutral default"
                );
                Some(neutral_fallback())
            }
        }
    }
}

/// Neutral, low-confidence default substituted when the model fails or
/// times out, so storage is never blocked by an optional enrichment.
pub fn neutral_fallback() -> SentimentAssessment {
    SentimentAssessment {
        label: SentimentLabel::Neutral,
        score: 0.5,
        distribution: SentimentDistribution {
            bullish: 0.25,
            bearish: 0.25,
            neutral: 0.5,
        },
        low_confidence: true,
    }
}

/// Argmax over the distribution: positive maps to bullish, negative to
/// bearish. The chosen label's probability becomes the score.
fn assessment_from(scores: SentimentScores) -> SentimentAssessment {
    let (label, score) = if scores.positive >= scores.negative && scores.positive >= scores.neutral
    {
        (SentimentLabel::Bullish, scores.positive)
    } else if scores.negative >= scores.neutral {
        (SentimentLabel::Bearish, scores.negative)
    } else {
        (SentimentLabel::Neutral, scores.neutral)
    };

    SentimentAssessment {
        label,
        score: score.clamp(0.0, 1.0),
        distribution: SentimentDistribution {
            bullish: scores.positive,
            bearish: scores.negative,
            neutral: scores.neutral,
        },
        low_confidence: false,
    }
}

/// First `max_chars` characters of the text, on a char boundary.
fn leading_window(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(SentimentScores);

    #[async_trait]
    impl SentimentModel for Fixed {
        fn name(&self) -> &'static str {
            "fixed"
        }
        async fn predict(&self, _text: &str) -> Result<SentimentScores> {
            Ok(self.0)
        }
    }

    struct Failing;

    #[async_trait]
    impl SentimentModel for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }
        async fn predict(&self, _text: &str) -> Result<SentimentScores> {
            Err(anyhow::anyhow!("inference backend gone"))
        }
    }

    fn long_text() -> String {
        "The lender reported a sharp rise in quarterly profit and raised its guidance."
            .to_string()
    }

    #[tokio::test]
    async fn argmax_maps_positive_to_bullish() {
        let classifier = SentimentClassifier::new(Arc::new(Fixed(SentimentScores {
            positive: 0.8,
            negative: 0.1,
            neutral: 0.1,
        })));
        let assessment = classifier.classify(&long_text()).await.unwrap();
        assert_eq!(assessment.label, SentimentLabel::Bullish);
        assert!((assessment.score - 0.8).abs() < 1e-6);
        assert!(!assessment.low_confidence);
    }

    #[tokio::test]
    async fn argmax_maps_negative_to_bearish() {
        let classifier = SentimentClassifier::new(Arc::new(Fixed(SentimentScores {
            positive: 0.05,
            negative: 0.9,
            neutral: 0.05,
        })));
        let assessment = classifier.classify(&long_text()).await.unwrap();
        assert_eq!(assessment.label, SentimentLabel::Bearish);
    }

    #[tokio::test]
    async fn short_text_is_skipped_not_labeled() {
        let classifier = SentimentClassifier::new(Arc::new(Fixed(SentimentScores {
            positive: 0.9,
            negative: 0.05,
            neutral: 0.05,
        })));
        assert!(classifier.classify("too short").await.is_none());
    }

    #[tokio::test]
    async fn model_failure_degrades_to_neutral_low_confidence() {
        let classifier = SentimentClassifier::new(Arc::new(Failing));
        let assessment = classifier.classify(&long_text()).await.unwrap();
        assert_eq!(assessment.label, SentimentLabel::Neutral);
        assert!((assessment.score - 0.5).abs() < 1e-6);
        assert!(assessment.low_confidence);
    }

    #[tokio::test]
    async fn score_is_always_within_bounds() {
        let classifier = SentimentClassifier::new(Arc::new(Fixed(SentimentScores {
            positive: 1.4,
            negative: 0.0,
            neutral: 0.0,
        })));
        let assessment = classifier.classify(&long_text()).await.unwrap();
        assert!(assessment.score >= 0.0 && assessment.score <= 1.0);
    }

    #[test]
    fn leading_window_respects_char_boundaries() {
        let text = "régulateur ".repeat(300);
        let window = leading_window(&text, SENTIMENT_MAX_CHARS);
        assert_eq!(window.chars().count(), SENTIMENT_MAX_CHARS);
    }

    #[test]
    fn leading_window_returns_short_text_whole() {
        assert_eq!(leading_window("short", 2000), "short");
    }
}
