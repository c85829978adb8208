//! Resolution engine: turns project files into installed fonts.

pub mod chain;
pub mod pipeline;

pub use chain::{ChainState, ResolutionChain};
pub use pipeline::PipelineOrchestrator;
