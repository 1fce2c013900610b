pub mod provider;
pub mod registry;

pub use provider::{AnalysisRequest, ProviderError, VisionProvider};
pub use registry::ModelRegistry;
