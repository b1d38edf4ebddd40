pub mod analysis;
pub mod batch;
pub mod config;
pub mod contour;
pub mod dataset;
pub mod errors;
pub mod legacy;
pub mod lifecycle;
pub mod mask;
pub mod model;
pub mod polygon;
pub mod preprocess;
pub mod risk;
pub mod traits;

pub mod mocks;

pub use analysis::{
    AnalysisReport, AnalysisResult, Analyzer, Detection, FailureReport, PipelineOptions,
    Provenance,
};
pub use config::Config;
pub use errors::{PipelineError, Result};
pub use lifecycle::{ModelHandle, ModelLifecycleManager, ModelStateKind};
pub use mask::{ClassLabel, LabelMask};
pub use model::{OnnxModel, OnnxModelLoader};
pub use risk::{RiskAssessment, RiskEvaluator};
pub use traits::*;
