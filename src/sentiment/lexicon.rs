use anyhow::Result;
use async_trait::async_trait;

use crate::sentiment::{SentimentModel, SentimentScores};

/// Finance-domain word weights. Keys are lowercase single words; positive
/// weights are bullish signals, negative weights bearish.
const LEXICON: &[(&str, f32)] = &[
    // Bullish signals
    ("profit", 0.5),
    ("profits", 0.5),
    ("record", 0.4),
    ("surge", 0.5),
    ("surges", 0.5),
    ("surged", 0.5),
    ("gains", 0.4),
    ("gained", 0.4),
    ("rally", 0.5),
    ("rallied", 0.5),
    ("dividend", 0.3),
    ("buyback", 0.3),
    ("beat", 0.4),
    ("beats", 0.4),
    ("beating", 0.4),
    ("upgrade", 0.5),
    ("upgraded", 0.5),
    ("growth", 0.3),
    ("strong", 0.3),
    ("higher", 0.3),
    ("jumps", 0.4),
    ("jumped", 0.4),
    ("rose", 0.3),
    ("wins", 0.4),
    ("outperform", 0.4),
    // Bearish signals
    ("loss", -0.5),
    ("losses", -0.5),
    ("plunge", -0.6),
    ("plunges", -0.6),
    ("plunged", -0.6),
    ("falls", -0.4),
    ("fell", -0.4),
    ("slump", -0.5),
    ("slumps", -0.5),
    ("downgrade", -0.5),
    ("downgraded", -0.5),
    ("weak", -0.3),
    ("cuts", -0.3),
    ("fraud", -0.7),
    ("probe", -0.4),
    ("penalty", -0.4),
    ("default", -0.6),
    ("lower", -0.3),
    ("decline", -0.3),
    ("declined", -0.3),
    ("slowdown", -0.4),
    ("miss", -0.4),
    ("missed", -0.4),
    ("crash", -0.7),
    ("selloff", -0.5),
];

/// Prior mass kept on the neutral label so a lone weak signal does not
/// flip the call.
const NEUTRAL_PRIOR: f32 = 0.6;

/// Lexicon-based sentiment model. Used as the startup fallback when the
/// FinBERT weights are unavailable; deterministic and dependency-free.
pub struct LexiconModel;

impl LexiconModel {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LexiconModel {
    fn default() -> Self {
        Self::new()
    }
}

fn score_text(text: &str) -> SentimentScores {
    let mut positive = 0.0_f32;
    let mut negative = 0.0_f32;

    for word in text.split_whitespace() {
        let w = word
            .trim_matches(|c: char| !c.is_alphabetic())
            .to_lowercase();
        for &(lex_word, weight) in LEXICON {
            if w == lex_word {
                if weight > 0.0 {
                    positive += weight;
                } else {
                    negative += -weight;
                }
                break;
            }
        }
    }

    let total = positive + negative + NEUTRAL_PRIOR;
    SentimentScores {
        positive: positive / total,
        negative: negative / total,
        neutral: NEUTRAL_PRIOR / total,
    }
}

#[async_trait]
impl SentimentModel for LexiconModel {
    fn name(&self) -> &'static str {
        "lexicon"
    }

    async fn predict(&self, text: &str) -> Result<SentimentScores> {
        Ok(score_text(text))
    }
}
