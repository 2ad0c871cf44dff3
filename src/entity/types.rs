use serde::{Deserialize, Serialize};
use std::fmt;

/// Entity type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Company,
    Sector,
    Regulator,
    Event,
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityType::Company => write!(f, "company"),
            EntityType::Sector => write!(f, "sector"),
            EntityType::Regulator => write!(f, "regulator"),
            EntityType::Event => write!(f, "event"),
        }
    }
}

impl From<&str> for EntityType {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "company" => EntityType::Company,
            "sector" => EntityType::Sector,
            "regulator" => EntityType::Regulator,
            _ => EntityType::Event,
        }
    }
}

/// Byte offsets of a mention within the normalized content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Span { start, end }
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// A typed mention extracted from an article, owned by that article.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub entity_type: EntityType,
    /// Canonical value from the catalog (or the recognizer's best guess
    /// for entities the catalog doesn't know).
    pub value: String,
    pub confidence: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span: Option<Span>,
}

impl Entity {
    pub fn new(entity_type: EntityType, value: &str, confidence: f32) -> Self {
        Entity {
            entity_type,
            value: value.to_string(),
            confidence,
            span: None,
        }
    }

    pub fn with_span(mut self, start: usize, end: usize) -> Self {
        self.span = Some(Span::new(start, end));
        self
    }
}

/// Entities extracted from one article, grouped by type.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityExtractionResult {
    pub companies: Vec<Entity>,
    pub sectors: Vec<Entity>,
    pub regulators: Vec<Entity>,
    pub events: Vec<Entity>,
}

impl EntityExtractionResult {
    pub fn is_empty(&self) -> bool {
        self.companies.is_empty()
            && self.sectors.is_empty()
            && self.regulators.is_empty()
            && self.events.is_empty()
    }

    pub fn push(&mut self, entity: Entity) {
        match entity.entity_type {
            EntityType::Company => self.companies.push(entity),
            EntityType::Sector => self.sectors.push(entity),
            EntityType::Regulator => self.regulators.push(entity),
            EntityType::Event => self.events.push(entity),
        }
    }

    pub fn all(&self) -> impl Iterator<Item = &Entity> {
        self.companies
            .iter()
            .chain(self.sectors.iter())
            .chain(self.regulators.iter())
            .chain(self.events.iter())
    }

    pub fn sector_values(&self) -> Vec<String> {
        self.sectors.iter().map(|e| e.value.clone()).collect()
    }

    /// Flattens into a single ordered list: companies, sectors, regulators,
    /// events.
    pub fn into_entities(self) -> Vec<Entity> {
        let mut entities = self.companies;
        entities.extend(self.sectors);
        entities.extend(self.regulators);
        entities.extend(self.events);
        entities
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spans_overlap_when_ranges_intersect() {
        let a = Span::new(0, 9);
        let b = Span::new(5, 12);
        let c = Span::new(9, 15);
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&c));
        assert!(!a.overlaps(&c), "adjacent spans do not overlap");
    }

    #[test]
    fn push_routes_by_type() {
        let mut result = EntityExtractionResult::default();
        result.push(Entity::new(EntityType::Company, "HDFC Bank", 1.0));
        result.push(Entity::new(EntityType::Sector, "Banking", 0.9));
        result.push(Entity::new(EntityType::Event, "dividend", 0.9));
        assert_eq!(result.companies.len(), 1);
        assert_eq!(result.sectors.len(), 1);
        assert_eq!(result.events.len(), 1);
        assert!(result.regulators.is_empty());
    }

    #[test]
    fn into_entities_preserves_type_order() {
        let mut result = EntityExtractionResult::default();
        result.push(Entity::new(EntityType::Event, "ipo", 0.9));
        result.push(Entity::new(EntityType::Company, "TCS", 1.0));
        let flat = result.into_entities();
        assert_eq!(flat[0].entity_type, EntityType::Company);
        assert_eq!(flat[1].entity_type, EntityType::Event);
    }
}
