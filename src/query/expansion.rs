use crate::catalog::EntityCatalog;
use crate::entity::EntityExtractionResult;

/// Query-time broadening of detected entities into related terms, used to
/// widen retrieval recall.
#[derive(Debug, Clone, Default)]
pub struct ExpandedContext {
    /// Canonical values of detected companies and regulators, for exact
    /// filter search.
    pub entity_values: Vec<String>,
    /// Detected sectors plus sectors reached through expansion (a
    /// company's own sector, a regulator's regulated sectors).
    pub sectors: Vec<String>,
    /// Related terms surfaced for the caller: tickers, in-sector peers,
    /// responsible regulators.
    pub related_terms: Vec<String>,
}

/// Expand detected entities against the catalog:
/// - company -> its ticker, its sector, its sector's regulators, in-sector peers
/// - regulator -> the sectors it regulates
/// - bare theme/keyword -> nothing extra (pure semantic path)
pub fn expand(detected: &EntityExtractionResult, catalog: &EntityCatalog) -> ExpandedContext {
    let mut context = ExpandedContext::default();

    for sector in &detected.sectors {
        push_unique(&mut context.sectors, &sector.value);
    }

    for company in &detected.companies {
        push_unique(&mut context.entity_values, &company.value);
        let Some(entry) = catalog.company_by_alias(&company.value) else {
            continue;
        };
        push_unique(&mut context.related_terms, &entry.ticker_nse);
        push_unique(&mut context.sectors, &entry.sector);
        for regulator in catalog.regulators_for_sector(&entry.sector) {
            push_unique(&mut context.related_terms, &regulator.name);
        }
        for peer in catalog.companies_in_sector(&entry.sector) {
            if peer.name != entry.name {
                push_unique(&mut context.related_terms, &peer.name);
            }
        }
    }

    for regulator in &detected.regulators {
        push_unique(&mut context.entity_values, &regulator.value);
        let Some(entry) = catalog.regulator_by_alias(&regulator.value) else {
            continue;
        };
        for sector in &entry.sectors {
            push_unique(&mut context.sectors, sector);
        }
    }

    context
}

fn push_unique(list: &mut Vec<String>, value: &str) {
    if !list.iter().any(|existing| existing == value) {
        list.push(value.to_string());
    }
}
