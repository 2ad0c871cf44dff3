use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::debug;

use crate::article::{ImpactType, StockImpact};
use crate::catalog::EntityCatalog;
use crate::entity::EntityExtractionResult;
use crate::TARGET_PIPELINE;

/// Decay applied when propagating impact one hop along the supply chain.
const SUPPLY_CHAIN_DECAY: f32 = 0.5;

/// Maps extracted entities to a ranked list of affected securities.
/// Deterministic given the same entities and catalog.
///
/// Confidence bands, highest to lowest:
/// - direct: company named in the article
/// - sector: 0.6-0.8, scaled by in-sector corroboration
/// - regulatory: 0.3-0.7, scaled by regulator specificity
/// - supply_chain: source-sector confidence halved, one hop only
pub struct ImpactScorer {
    catalog: Arc<EntityCatalog>,
}

impl ImpactScorer {
    pub fn new(catalog: Arc<EntityCatalog>) -> Self {
        Self { catalog }
    }

    pub fn score(&self, entities: &EntityExtractionResult) -> Vec<StockImpact> {
        let mut impacts: Vec<StockImpact> = Vec::new();

        // Direct impacts, plus bookkeeping for the later bands.
        let mut direct_symbols: HashSet<String> = HashSet::new();
        let mut direct_mentions_per_sector: HashMap<String, u32> = HashMap::new();
        for company_entity in &entities.companies {
            let Some(company) = self.catalog.company_by_alias(&company_entity.value) else {
                // Unknown organizations have no ticker to impact.
                continue;
            };
            if !direct_symbols.insert(company.ticker_nse.clone()) {
                continue;
            }
            *direct_mentions_per_sector
                .entry(company.sector.clone())
                .or_default() += 1;
            impacts.push(StockImpact {
                stock_symbol: company.ticker_nse.clone(),
                company_name: company.name.clone(),
                impact_type: ImpactType::Direct,
                confidence: company_entity.confidence.min(1.0),
                reasoning: format!("{} directly mentioned in article", company.name),
            });
        }

        // Sectors implicated either by an explicit sector entity or by a
        // directly-impacted company's sector.
        let mut implicated_sectors: Vec<String> = Vec::new();
        for sector_entity in &entities.sectors {
            if self.catalog.is_sector(&sector_entity.value)
                && !implicated_sectors.contains(&sector_entity.value)
            {
                implicated_sectors.push(sector_entity.value.clone());
            }
        }
        for sector in direct_mentions_per_sector.keys() {
            if !implicated_sectors.contains(sector) {
                implicated_sectors.push(sector.clone());
            }
        }

        // Sector impacts for every other company in an implicated sector.
        // More directly-mentioned companies in the sector means more
        // corroboration, so higher within-band confidence.
        let mut sector_strength: HashMap<String, f32> = HashMap::new();
        for sector in &implicated_sectors {
            let direct_mentions = direct_mentions_per_sector.get(sector).copied().unwrap_or(0);
            let confidence = 0.6 + 0.2 * (direct_mentions as f32 / 3.0).min(1.0);
            sector_strength.insert(sector.clone(), confidence);
            for company in self.catalog.companies_in_sector(sector) {
                if direct_symbols.contains(&company.ticker_nse) {
                    continue;
                }
                impacts.push(StockImpact {
                    stock_symbol: company.ticker_nse.clone(),
                    company_name: company.name.clone(),
                    impact_type: ImpactType::Sector,
                    confidence,
                    reasoning: format!("{} operates in the {} sector covered by this article", company.name, sector),
                });
            }
        }

        // Direct mentions corroborate their own sector more strongly than
        // the in-band sector formula; supply-chain propagation should see
        // the stronger signal.
        for impact in &impacts {
            if impact.impact_type == ImpactType::Direct {
                if let Some(company) = self.catalog.company_by_alias(&impact.company_name) {
                    let strength = sector_strength.entry(company.sector.clone()).or_default();
                    *strength = strength.max(impact.confidence);
                }
            }
        }

        // Regulatory impacts: every company in a sector under the named
        // regulator's jurisdiction. A narrow regulator (one sector) scores
        // at the top of the band, broad ones at the bottom.
        for regulator_entity in &entities.regulators {
            let Some(regulator) = self.catalog.regulator_by_alias(&regulator_entity.value) else {
                continue;
            };
            if regulator.sectors.is_empty() {
                continue;
            }
            let confidence = (0.3 + 0.4 / regulator.sectors.len() as f32).clamp(0.3, 0.7);
            for sector in &regulator.sectors {
                for company in self.catalog.companies_in_sector(sector) {
                    impacts.push(StockImpact {
                        stock_symbol: company.ticker_nse.clone(),
                        company_name: company.name.clone(),
                        impact_type: ImpactType::Regulatory,
                        confidence,
                        reasoning: format!("{} falls under {} jurisdiction", company.name, regulator.name),
                    });
                }
            }
        }

        // Supply-chain impacts: one hop from directly- or sector-impacted
        // sectors along the configured adjacency, at half the source
        // sector's confidence. Never propagated further.
        for source_sector in &implicated_sectors {
            let strength = sector_strength.get(source_sector).copied().unwrap_or(0.0);
            if strength <= 0.0 {
                continue;
            }
            for downstream in self.catalog.downstream_sectors(source_sector) {
                for company in self.catalog.companies_in_sector(downstream) {
                    impacts.push(StockImpact {
                        stock_symbol: company.ticker_nse.clone(),
                        company_name: company.name.clone(),
                        impact_type: ImpactType::SupplyChain,
                        confidence: strength * SUPPLY_CHAIN_DECAY,
                        reasoning: format!("supply chain exposure: {} -> {}", source_sector, downstream),
                    });
                }
            }
        }

        let deduplicated = deduplicate_impacts(impacts);
        debug!(
            target: TARGET_PIPELINE,
            impacts = deduplicated.len(),
            "impact scoring complete"
        );
        deduplicated
    }
}

/// Collapse duplicate (symbol, impact type) pairs: keep the max confidence
/// and concatenate the reasoning strings. Then rank: confidence descending,
/// impact-type priority breaking ties (direct before sector before
/// regulatory before supply chain), symbol as a final stable key.
fn deduplicate_impacts(impacts: Vec<StockImpact>) -> Vec<StockImpact> {
    let mut order: Vec<(String, ImpactType)> = Vec::new();
    let mut best: HashMap<(String, ImpactType), StockImpact> = HashMap::new();

    for impact in impacts {
        let key = (impact.stock_symbol.clone(), impact.impact_type);
        match best.get_mut(&key) {
            Some(existing) => {
                if !existing.reasoning.contains(&impact.reasoning) {
                    existing.reasoning = format!("{}; {}", existing.reasoning, impact.reasoning);
                }
                existing.confidence = existing.confidence.max(impact.confidence);
            }
            None => {
                order.push(key.clone());
                best.insert(key, impact);
            }
        }
    }

    let mut result: Vec<StockImpact> = order
        .into_iter()
        .filter_map(|key| best.remove(&key))
        .collect();

    result.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.impact_type.priority().cmp(&b.impact_type.priority()))
            .then_with(|| a.stock_symbol.cmp(&b.stock_symbol))
    });
    result
}
