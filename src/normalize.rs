use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

use crate::error::PipelineError;

/// Cleaned content shorter than this is rejected before the pipeline runs.
pub const MIN_CONTENT_CHARS: usize = 50;

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").unwrap());
static WS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static DEC_ENTITY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"&#(\d+);").unwrap());
static HEX_ENTITY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"&#x([0-9a-fA-F]+);").unwrap());

/// Named HTML entities that show up in news feeds. Anything else is left
/// alone rather than guessed at.
const NAMED_ENTITIES: &[(&str, &str)] = &[
    ("&amp;", "&"),
    ("&lt;", "<"),
    ("&gt;", ">"),
    ("&quot;", "\""),
    ("&apos;", "'"),
    ("&nbsp;", " "),
    ("&rsquo;", "\u{2019}"),
    ("&lsquo;", "\u{2018}"),
    ("&rdquo;", "\u{201d}"),
    ("&ldquo;", "\u{201c}"),
    ("&ndash;", "\u{2013}"),
    ("&mdash;", "\u{2014}"),
    ("&hellip;", "\u{2026}"),
];

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedArticle {
    pub title: String,
    pub content: String,
}

impl NormalizedArticle {
    /// Title and body joined the way every downstream stage consumes them.
    pub fn combined(&self) -> String {
        format!("{}\n\n{}", self.title, self.content)
    }
}

/// Cleans raw article text or rejects it.
///
/// Pure transform, no side effects. Fails with
/// [`PipelineError::InvalidInput`] when the title is empty or the cleaned
/// content is under [`MIN_CONTENT_CHARS`] characters — the caller must not
/// proceed to dedup on failure.
pub fn normalize(title: &str, content: &str) -> Result<NormalizedArticle, PipelineError> {
    let title = clean_text(title);
    let content = clean_text(content);

    if title.is_empty() {
        return Err(PipelineError::InvalidInput("article title is empty".into()));
    }
    let chars = content.chars().count();
    if chars < MIN_CONTENT_CHARS {
        return Err(PipelineError::InvalidInput(format!(
            "content too short after cleaning: {} chars (minimum {})",
            chars, MIN_CONTENT_CHARS
        )));
    }

    Ok(NormalizedArticle { title, content })
}

/// Strip markup, decode entities, repair mojibake, collapse whitespace.
pub fn clean_text(raw: &str) -> String {
    let text = TAG_RE.replace_all(raw, " ");
    let text = decode_entities(&text);
    let text = repair_mojibake(&text);
    let text: String = text.nfc().collect();
    WS_RE.replace_all(text.trim(), " ").into_owned()
}

fn decode_entities(text: &str) -> String {
    let mut decoded = text.to_string();
    for (entity, replacement) in NAMED_ENTITIES {
        if decoded.contains(entity) {
            decoded = decoded.replace(entity, replacement);
        }
    }
    let decoded = DEC_ENTITY_RE.replace_all(&decoded, |caps: &regex::Captures| {
        caps[1]
            .parse::<u32>()
            .ok()
            .and_then(char::from_u32)
            .map(String::from)
            .unwrap_or_default()
    });
    HEX_ENTITY_RE
        .replace_all(&decoded, |caps: &regex::Captures| {
            u32::from_str_radix(&caps[1], 16)
                .ok()
                .and_then(char::from_u32)
                .map(String::from)
                .unwrap_or_default()
        })
        .into_owned()
}

/// Repairs the common UTF-8-decoded-as-Windows-1252 mojibake ("â€™" for a
/// right quote, "Ã©" for é). Only attempted when marker sequences are
/// present; any lossy round trip leaves the text untouched.
fn repair_mojibake(text: &str) -> String {
    if !text.contains("â€") && !text.contains('Ã') {
        return text.to_string();
    }
    let (bytes, _, had_errors) = encoding_rs::WINDOWS_1252.encode(text);
    if had_errors {
        return text.to_string();
    }
    match String::from_utf8(bytes.into_owned()) {
        Ok(repaired) => repaired,
        Err(_) => text.to_string(),
    }
}
