//! Scan title-template projects for the fonts they use and install the
//! missing ones from Google Fonts and fallback font sites.

pub use font_acquisition as acquisition;
pub use font_core as model;
pub use font_extractor as extractor;
pub use font_installer as installer;
pub use font_normalizer as normalizer;
pub use font_parser as parser;
pub use font_resolver_engine as resolver;
pub use font_scanner as scanner;
pub use font_setup as setup;

pub use font_core::{FontError, FontIdentity, FontResult, OutcomeStatus, PipelineReport, RunOptions, ScanScope};
pub use font_resolver_engine::PipelineOrchestrator;
