//! Query understanding: intent classification, thematic subtype detection,
//! and keyword expansion over the theme taxonomy.

pub mod classifier;
pub mod expansion;
pub mod subtype;
pub mod taxonomy;

pub use classifier::{Classification, Intent, IntentClassifier, IntentError};
pub use expansion::{Expansion, ExpansionMethod, ExpanderConfig, KeywordExpander};
pub use subtype::{SubtypeDetection, ThematicSubtype, detect_subtype};
pub use taxonomy::{TaxonomyError, Theme, ThemeTaxonomy};
