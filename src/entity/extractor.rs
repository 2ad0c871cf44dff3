use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, warn};

use crate::catalog::EntityCatalog;
use crate::entity::recognizer::{CatalogMatcher, EntityRecognizer, StatisticalRecognizer};
use crate::entity::types::{Entity, EntityExtractionResult, EntityType};
use crate::entity::TARGET_ENTITY;

/// Confidence decay applied when inferring a sector from a company mention
/// rather than an explicit sector reference.
const IMPLIED_SECTOR_FACTOR: f32 = 0.9;

/// Hybrid entity extractor: deterministic catalog lookups plus a
/// statistical recognizer, reconciled into one result.
///
/// The same extractor runs on articles at ingestion and on query text, so
/// query terms map to the same canonical values as stored articles.
pub struct EntityExtractor {
    recognizers: Vec<Box<dyn EntityRecognizer>>,
    catalog: Arc<EntityCatalog>,
}

impl EntityExtractor {
    pub fn new(catalog: Arc<EntityCatalog>) -> Result<Self> {
        let recognizers: Vec<Box<dyn EntityRecognizer>> = vec![
            Box::new(CatalogMatcher::new(Arc::clone(&catalog))?),
            Box::new(StatisticalRecognizer::new(Arc::clone(&catalog))),
        ];
        Ok(Self {
            recognizers,
            catalog,
        })
    }

    /// Test seam: run with a custom recognizer set.
    pub fn with_recognizers(
        catalog: Arc<EntityCatalog>,
        recognizers: Vec<Box<dyn EntityRecognizer>>,
    ) -> Self {
        Self {
            recognizers,
            catalog,
        }
    }

    /// Extract all entities from text. Never fails: a recognizer error is
    /// logged and that strategy's output skipped, in the worst case
    /// yielding an empty result that downstream stages handle gracefully.
    pub fn extract(&self, text: &str) -> EntityExtractionResult {
        let mut raw = Vec::new();
        for recognizer in &self.recognizers {
            match recognizer.recognize(text) {
                Ok(entities) => raw.extend(entities),
                Err(e) => {
                    warn!(
                        target: TARGET_ENTITY,
                        recognizer = recognizer.name(),
                        error = %e,
                        "recognizer failed, continuing without it"
                    );
                }
            }
        }

        let mut result = reconcile(raw);
        self.infer_sectors(&mut result);

        debug!(
            target: TARGET_ENTITY,
            companies = result.companies.len(),
            sectors = result.sectors.len(),
            regulators = result.regulators.len(),
            events = result.events.len(),
            "extraction complete"
        );

        result
    }

    /// If a company was found and its sector is not explicitly mentioned,
    /// add an implicit sector entity inheriting the company's catalog
    /// sector at reduced confidence.
    fn infer_sectors(&self, result: &mut EntityExtractionResult) {
        let mut inferred: Vec<Entity> = Vec::new();
        for company in &result.companies {
            let Some(entry) = self.catalog.company_by_alias(&company.value) else {
                continue;
            };
            let already_present = result
                .sectors
                .iter()
                .chain(inferred.iter())
                .any(|s| s.value == entry.sector);
            if !already_present {
                inferred.push(Entity::new(
                    EntityType::Sector,
                    &entry.sector,
                    company.confidence * IMPLIED_SECTOR_FACTOR,
                ));
            }
        }
        result.sectors.extend(inferred);
    }
}

/// Merge step: when multiple strategies identify the same canonical value,
/// keep the higher-confidence entry and drop the duplicate. First-seen
/// order is preserved so output is deterministic.
fn reconcile(entities: Vec<Entity>) -> EntityExtractionResult {
    let mut order: Vec<(EntityType, String)> = Vec::new();
    let mut best: HashMap<(EntityType, String), Entity> = HashMap::new();

    for entity in entities {
        let key = (entity.entity_type, entity.value.to_lowercase());
        match best.get(&key) {
            Some(existing) if existing.confidence >= entity.confidence => {}
            Some(_) => {
                best.insert(key, entity);
            }
            None => {
                order.push(key.clone());
                best.insert(key, entity);
            }
        }
    }

    let mut result = EntityExtractionResult::default();
    for key in order {
        if let Some(entity) = best.remove(&key) {
            result.push(entity);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::DEFAULT_CATALOG_JSON;

    fn extractor() -> EntityExtractor {
        let catalog = Arc::new(EntityCatalog::from_json(DEFAULT_CATALOG_JSON).unwrap());
        EntityExtractor::new(catalog).unwrap()
    }

    #[test]
    fn merges_duplicate_mentions_keeping_higher_confidence() {
        // The catalog matcher reports HDFC Bank at 1.0 and the statistical
        // recognizer reports the same span at 0.85; exactly one survives.
        let result = extractor().extract("HDFC Bank reported record quarterly profit");
        let hdfc: Vec<_> = result
            .companies
            .iter()
            .filter(|e| e.value == "HDFC Bank")
            .collect();
        assert_eq!(hdfc.len(), 1);
        assert_eq!(hdfc[0].confidence, 1.0);
    }

    #[test]
    fn infers_sector_from_company_at_reduced_confidence() {
        let result = extractor().extract("Maruti Suzuki announced its quarterly results");
        let auto = result
            .sectors
            .iter()
            .find(|s| s.value == "Auto")
            .expect("implicit sector inferred from company");
        assert!((auto.confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn explicit_sector_mention_wins_over_inference() {
        // "bank" keyword makes Banking explicit at 1.0, so no extra
        // inferred entry may appear.
        let result = extractor().extract("HDFC Bank leads bank stocks higher");
        let banking: Vec<_> = result
            .sectors
            .iter()
            .filter(|s| s.value == "Banking")
            .collect();
        assert_eq!(banking.len(), 1);
        assert_eq!(banking[0].confidence, 1.0);
    }

    #[test]
    fn empty_text_yields_empty_result() {
        let result = extractor().extract("");
        assert!(result.is_empty());
    }

    #[test]
    fn nonsense_query_yields_no_entities() {
        let result = extractor().extract("xyzabc123");
        assert!(result.is_empty());
    }

    #[test]
    fn regulator_only_text_has_no_companies() {
        let result = extractor().extract("RBI tightened its supervision norms this quarter");
        assert!(result.companies.is_empty());
        assert_eq!(result.regulators.len(), 1);
        assert_eq!(result.regulators[0].value, "RBI");
    }

    #[test]
    fn query_text_maps_to_same_canonical_values_as_articles() {
        let from_article = extractor().extract("Infosys posted strong quarterly results today");
        let from_query = extractor().extract("INFY");
        assert_eq!(from_article.companies[0].value, "Infosys");
        assert_eq!(from_query.companies[0].value, "Infosys");
    }

    #[test]
    fn failing_recognizer_degrades_to_empty_not_error() {
        struct Broken;
        impl EntityRecognizer for Broken {
            fn name(&self) -> &'static str {
                "broken"
            }
            fn recognize(&self, _text: &str) -> Result<Vec<Entity>> {
                Err(anyhow::anyhow!("recognizer exploded"))
            }
        }
        let catalog = Arc::new(EntityCatalog::from_json(DEFAULT_CATALOG_JSON).unwrap());
        let extractor = EntityExtractor::with_recognizers(catalog, vec![Box::new(Broken)]);
        let result = extractor.extract("HDFC Bank reported record profit");
        assert!(result.is_empty(), "extraction fails open, never fails the pipeline");
    }
}
