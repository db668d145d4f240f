pub mod config;
pub mod errors;
pub mod llm;
pub mod perception;
pub mod tool;

pub use crate::config::{load_config, AppConfig, EngineConfig};
pub use crate::errors::{GroundingError, GroundingResult};
pub use crate::llm::provider::VisionBackend;
pub use crate::perception::pipeline::{normalize, Normalizer};
pub use crate::perception::types::{
    BoundingBox, Element, ElementSource, ElementType, NormalizeResult, NormalizeStats,
    ProviderFamily,
};
pub use crate::tool::GroundingTool;

/// Install the `tracing` subscriber. `RUST_LOG` selects the filter, `info`
/// otherwise. Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();
}
