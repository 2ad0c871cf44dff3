pub mod extractor;
pub mod recognizer;
pub mod types;

pub use extractor::EntityExtractor;
pub use recognizer::{CatalogMatcher, EntityRecognizer, StatisticalRecognizer};
pub use types::*;

// Module-level constants
pub const TARGET_ENTITY: &str = "entity";
