use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::sync::Arc;
use strsim::jaro_winkler;

use crate::catalog::EntityCatalog;
use crate::entity::types::{Entity, EntityType};

/// Minimum Jaro-Winkler similarity for snapping a near-miss mention onto a
/// catalog alias.
const SNAP_THRESHOLD: f64 = 0.92;

/// Confidence assigned to catalog-derived event pattern matches.
const EVENT_CONFIDENCE: f32 = 0.9;

/// One extraction strategy. The extractor runs every recognizer and
/// reconciles their output; a failing recognizer is logged and skipped, so
/// extraction itself never fails the pipeline.
pub trait EntityRecognizer: Send + Sync {
    fn name(&self) -> &'static str;
    fn recognize(&self, text: &str) -> Result<Vec<Entity>>;
}

/// Financial event patterns, matched case-insensitively.
static EVENT_PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    [
        ("dividend", r"\b(?:interim |final )?dividend\b"),
        ("buyback", r"\b(?:buyback|buy\s*back|share repurchase)\b"),
        ("merger", r"\b(?:merger|acquisition|takeover|amalgamation)\b"),
        ("ipo", r"\b(?:ipo|initial public offering|public issue)\b"),
        (
            "earnings",
            r"\b(?:earnings|quarterly results|q[1-4] results|annual results)\b",
        ),
        (
            "rate_change",
            r"\b(?:repo rate|interest rate|rate hike|rate cut|basis points|bps)\b",
        ),
        ("board_meeting", r"\bboard (?:meeting|of directors)\b"),
        ("stock_split", r"\b(?:stock split|share split|bonus issue)\b"),
        (
            "rights_issue",
            r"\b(?:rights issue|preferential issue|qip)\b",
        ),
    ]
    .into_iter()
    .map(|(name, pattern)| {
        let re = Regex::new(&format!("(?i){}", pattern)).expect("static event pattern");
        (name, re)
    })
    .collect()
});

/// Deterministic catalog lookup: company aliases, exchange-prefixed
/// tickers, regulator acronyms, and sector keyword sets. Exact alias hits
/// carry confidence 1.0.
pub struct CatalogMatcher {
    catalog: Arc<EntityCatalog>,
    company_pattern: Regex,
    regulator_pattern: Regex,
    ticker_pattern: Regex,
}

impl CatalogMatcher {
    pub fn new(catalog: Arc<EntityCatalog>) -> Result<Self> {
        let company_pattern = alias_pattern(&catalog.company_aliases())?;
        let regulator_pattern = alias_pattern(&catalog.regulator_aliases())?;
        let ticker_pattern = Regex::new(r"\b(?:NSE|BSE)\s*:\s*([A-Z0-9]{2,15})\b")?;
        Ok(Self {
            catalog,
            company_pattern,
            regulator_pattern,
            ticker_pattern,
        })
    }
}

/// Builds `(?i)\b(alias1|alias2|...)\b` with aliases already sorted longest
/// first so the alternation prefers the most specific match.
fn alias_pattern(aliases: &[&str]) -> Result<Regex> {
    if aliases.is_empty() {
        // Never matches; an empty alternation would match everywhere.
        return Ok(Regex::new("$^")?);
    }
    let joined = aliases
        .iter()
        .map(|a| regex::escape(a))
        .collect::<Vec<_>>()
        .join("|");
    Ok(Regex::new(&format!(r"(?i)\b(?:{})\b", joined))?)
}

impl EntityRecognizer for CatalogMatcher {
    fn name(&self) -> &'static str {
        "catalog"
    }

    fn recognize(&self, text: &str) -> Result<Vec<Entity>> {
        let mut entities = Vec::new();
        let mut seen_companies = HashSet::new();
        let mut seen_regulators = HashSet::new();

        for m in self.company_pattern.find_iter(text) {
            if let Some(company) = self.catalog.company_by_alias(m.as_str()) {
                if seen_companies.insert(company.name.clone()) {
                    entities.push(
                        Entity::new(EntityType::Company, &company.name, 1.0)
                            .with_span(m.start(), m.end()),
                    );
                }
            }
        }

        for caps in self.ticker_pattern.captures_iter(text) {
            let ticker = &caps[1];
            if let Some(company) = self.catalog.company_by_ticker(ticker) {
                if seen_companies.insert(company.name.clone()) {
                    let m = caps.get(0).expect("whole-match group always present");
                    entities.push(
                        Entity::new(EntityType::Company, &company.name, 1.0)
                            .with_span(m.start(), m.end()),
                    );
                }
            }
        }

        for m in self.regulator_pattern.find_iter(text) {
            if let Some(regulator) = self.catalog.regulator_by_alias(m.as_str()) {
                if seen_regulators.insert(regulator.name.clone()) {
                    entities.push(
                        Entity::new(EntityType::Regulator, &regulator.name, 1.0)
                            .with_span(m.start(), m.end()),
                    );
                }
            }
        }

        let text_lower = text.to_lowercase();
        for (sector, keywords) in self.catalog.sector_keywords() {
            for keyword in keywords {
                if let Some(pos) = text_lower.find(keyword.as_str()) {
                    entities.push(
                        Entity::new(EntityType::Sector, sector, 1.0)
                            .with_span(pos, pos + keyword.len()),
                    );
                    break;
                }
            }
        }

        for (event, pattern) in EVENT_PATTERNS.iter() {
            if let Some(m) = pattern.find(text) {
                entities.push(
                    Entity::new(EntityType::Event, event, EVENT_CONFIDENCE)
                        .with_span(m.start(), m.end()),
                );
            }
        }

        Ok(entities)
    }
}

/// Heuristic recognizer for organization mentions the catalog regex missed:
/// capitalized spans ending in an organization cue word, snapped onto the
/// nearest catalog alias when close enough.
pub struct StatisticalRecognizer {
    catalog: Arc<EntityCatalog>,
    candidate_pattern: Regex,
}

/// Cue words that mark a capitalized span as an organization name.
const ORG_SUFFIXES: &[&str] = &[
    "bank",
    "industries",
    "ltd",
    "limited",
    "corp",
    "corporation",
    "technologies",
    "motors",
    "steel",
    "pharma",
    "pharmaceutical",
    "finance",
    "financial",
    "insurance",
    "energy",
    "power",
    "paints",
    "capital",
    "holdings",
    "enterprises",
    "ports",
    "laboratories",
];

impl StatisticalRecognizer {
    pub fn new(catalog: Arc<EntityCatalog>) -> Self {
        let candidate_pattern =
            Regex::new(r"\b[A-Z][A-Za-z&'.\-]*(?:\s+[A-Z][A-Za-z&'.\-]*){0,4}\b")
                .expect("static candidate pattern");
        Self {
            catalog,
            candidate_pattern,
        }
    }

    fn score_candidate(&self, candidate: &str) -> Option<Entity> {
        // Sentence-initial articles capitalize into the span; strip them
        // before lookups so "The Reserve Bank" resolves like "Reserve Bank".
        let candidate = candidate.strip_prefix("The ").unwrap_or(candidate);
        let lower = candidate.to_lowercase();

        // Sectors and regulators are not companies; the catalog matcher
        // already covers them.
        if self.catalog.is_sector(candidate) || self.catalog.regulator_by_alias(candidate).is_some()
        {
            return None;
        }

        // Exact catalog hit: the catalog matcher owns these at 1.0, but
        // reporting it here too keeps the strategies independently testable.
        if let Some(company) = self.catalog.company_by_alias(candidate) {
            return Some(Entity::new(EntityType::Company, &company.name, 0.85));
        }

        // Near-miss: snap onto the closest alias.
        let mut best: Option<(&str, f64)> = None;
        for alias in self.catalog.company_aliases() {
            let similarity = jaro_winkler(&lower, alias);
            if similarity >= SNAP_THRESHOLD
                && best.map_or(true, |(_, existing)| similarity > existing)
            {
                best = Some((alias, similarity));
            }
        }
        if let Some((alias, similarity)) = best {
            let company = self.catalog.company_by_alias(alias)?;
            return Some(Entity::new(
                EntityType::Company,
                &company.name,
                (similarity * 0.9) as f32,
            ));
        }

        // Unknown organization: kept only when a cue word marks the span as
        // an organization, with the recognizer's base score.
        let last_word = lower.split_whitespace().last()?;
        if !ORG_SUFFIXES.contains(&last_word) {
            return None;
        }
        Some(Entity::new(EntityType::Company, candidate, 0.7))
    }
}

impl EntityRecognizer for StatisticalRecognizer {
    fn name(&self) -> &'static str {
        "statistical"
    }

    fn recognize(&self, text: &str) -> Result<Vec<Entity>> {
        let mut entities = Vec::new();
        let mut seen = HashSet::new();
        for m in self.candidate_pattern.find_iter(text) {
            let candidate = m.as_str().trim_matches(|c: char| c == '.' || c == '-');
            if candidate.split_whitespace().count() == 0 {
                continue;
            }
            if let Some(entity) = self.score_candidate(candidate) {
                if seen.insert(entity.value.to_lowercase()) {
                    entities.push(entity.with_span(m.start(), m.end()));
                }
            }
        }
        Ok(entities)
    }
}
