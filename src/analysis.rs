use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::contour::extract_contours;
use crate::dataset;
use crate::errors::{PipelineError, Result};
use crate::legacy;
use crate::lifecycle::{ModelHandle, ModelLifecycleManager};
use crate::mask::{resize_mask, ClassLabel, LabelMask};
use crate::polygon::{simplify_contour, Geometry};
use crate::preprocess::{ChannelOrder, Preprocessor, DEFAULT_INPUT_SIZE};
use crate::risk::{RiskAssessment, RiskEvaluator, DEFAULT_DETAIL};
use crate::traits::{ModelLoader, SegmentationModel};

/// Which path produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Provenance {
    #[serde(rename = "Model Inference (U-Net)")]
    ModelInference,
    #[serde(rename = "legacy")]
    Legacy,
}

impl Provenance {
    pub const fn as_str(self) -> &'static str {
        match self {
            Provenance::ModelInference => "Model Inference (U-Net)",
            Provenance::Legacy => "legacy",
        }
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShapeType {
    #[default]
    Polygon,
}

/// One labeled outline in original-image pixel coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Detection {
    pub label: ClassLabel,
    pub points: Vec<[i32; 2]>,
    #[serde(rename = "type")]
    pub shape_type: ShapeType,
}

/// Payload of one completed analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub image_id: String,
    pub risk_detected: bool,
    pub details: String,
    pub detections: Vec<Detection>,
    pub source: Provenance,
}

impl AnalysisResult {
    /// A result with no detections and no risk.
    pub fn clear(image_id: impl Into<String>, source: Provenance) -> Self {
        Self::assemble(image_id, RiskAssessment::clear(), Vec::new(), source)
    }

    fn assemble(
        image_id: impl Into<String>,
        assessment: RiskAssessment,
        detections: Vec<Detection>,
        source: Provenance,
    ) -> Self {
        Self {
            image_id: image_id.into(),
            risk_detected: assessment.risk_detected,
            details: assessment.details.to_string(),
            detections,
            source,
        }
    }
}

/// Payload of a request that ended in an error.
///
/// Carries the same risk fields as a result so clients can treat it as
/// "nothing detected".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReport {
    pub image_id: String,
    pub error: String,
    pub risk_detected: bool,
    pub details: String,
    pub detections: Vec<Detection>,
    pub source: Provenance,
}

impl FailureReport {
    pub fn new(image_id: impl Into<String>, error: &PipelineError) -> Self {
        Self {
            image_id: image_id.into(),
            error: error.to_string(),
            risk_detected: false,
            details: DEFAULT_DETAIL.to_string(),
            detections: Vec::new(),
            source: error.provenance(),
        }
    }
}

/// Exactly one of these is emitted per request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnalysisReport {
    Failed(FailureReport),
    Completed(AnalysisResult),
}

impl AnalysisReport {
    pub fn from_outcome(image_id: &str, outcome: Result<AnalysisResult>) -> Self {
        match outcome {
            Ok(result) => AnalysisReport::Completed(result),
            Err(e) => {
                warn!(image_id, error = %e, "analysis failed");
                AnalysisReport::Failed(FailureReport::new(image_id, &e))
            }
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, AnalysisReport::Failed(_))
    }

    pub fn image_id(&self) -> &str {
        match self {
            AnalysisReport::Completed(result) => &result.image_id,
            AnalysisReport::Failed(failure) => &failure.image_id,
        }
    }

    pub fn risk_detected(&self) -> bool {
        match self {
            AnalysisReport::Completed(result) => result.risk_detected,
            AnalysisReport::Failed(_) => false,
        }
    }
}

/// Library-side knobs of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
    pub input_size: u32,
    pub channel_order: ChannelOrder,
    pub include_towers: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            input_size: DEFAULT_INPUT_SIZE,
            channel_order: ChannelOrder::Rgb,
            include_towers: false,
        }
    }
}

/// Why a request was sent to the legacy path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackReason {
    ModelUnavailable,
    ImageMissing,
}

/// First transition of every request.
pub enum Route<M> {
    LiveInference { model: Arc<M>, image: PathBuf },
    LegacyFallback(FallbackReason),
}

/// Runs the encroachment pipeline for dataset images.
pub struct Analyzer<L: ModelLoader> {
    models: Arc<ModelLifecycleManager<L>>,
    preprocessor: Preprocessor,
    evaluator: RiskEvaluator,
}

impl<L: ModelLoader> Analyzer<L> {
    pub fn new(models: Arc<ModelLifecycleManager<L>>, options: PipelineOptions) -> Self {
        Self {
            models,
            preprocessor: Preprocessor::new(options.input_size, options.channel_order),
            evaluator: RiskEvaluator::new(options.include_towers),
        }
    }

    pub fn models(&self) -> &ModelLifecycleManager<L> {
        &self.models
    }

    /// Decides between live inference and the legacy path.
    pub fn route(&self, dataset_root: &Path, image_id: &str) -> Route<L::Model> {
        let ModelHandle::Loaded(model) = self.models.acquire() else {
            return Route::LegacyFallback(FallbackReason::ModelUnavailable);
        };
        match dataset::find_image(dataset_root, image_id) {
            Some(image) => Route::LiveInference { model, image },
            None => Route::LegacyFallback(FallbackReason::ImageMissing),
        }
    }

    pub fn analyze(&self, dataset_root: &Path, image_id: &str) -> Result<AnalysisResult> {
        match self.route(dataset_root, image_id) {
            Route::LiveInference { model, image } => {
                debug!(image_id, image = %image.display(), "running live inference");
                let mask = self.segment(model.as_ref(), &image)?;
                Ok(self.analyze_mask(image_id, &mask))
            }
            Route::LegacyFallback(reason) => {
                warn!(image_id, ?reason, "falling back to legacy annotations");
                legacy::analyze_legacy(dataset_root, image_id)
            }
        }
    }

    /// Like [`Analyzer::analyze`], folding errors into a failure payload.
    pub fn report(&self, dataset_root: &Path, image_id: &str) -> AnalysisReport {
        AnalysisReport::from_outcome(image_id, self.analyze(dataset_root, image_id))
    }

    /// Produces the label mask of `image` at its original resolution.
    pub fn segment(&self, model: &L::Model, image: &Path) -> Result<LabelMask> {
        if model.input_size() != self.preprocessor.input_size() {
            return Err(PipelineError::Validation {
                field: "input size".to_string(),
                reason: format!(
                    "is {} but the model expects {}",
                    self.preprocessor.input_size(),
                    model.input_size()
                ),
            });
        }

        let prepared = self.preprocessor.load(image)?;
        let class_map = model.predict(prepared.tensor.view())?;
        resize_mask(
            class_map.view(),
            prepared.original_width,
            prepared.original_height,
        )
    }

    /// Turns a label mask into detections and a risk verdict.
    pub fn analyze_mask(&self, image_id: &str, mask: &LabelMask) -> AnalysisResult {
        let mut detections = Vec::new();
        let mut cables = Vec::new();
        let mut towers = Vec::new();
        let mut vegetation = Vec::new();

        for label in ClassLabel::FOREGROUND {
            let geometries: &mut Vec<Geometry> = match label {
                ClassLabel::Cable => &mut cables,
                ClassLabel::Tower => &mut towers,
                _ => &mut vegetation,
            };
            for contour in extract_contours(mask, label) {
                let Some(polygon) = simplify_contour(&contour) else {
                    continue;
                };
                detections.push(Detection {
                    label,
                    points: polygon.points,
                    shape_type: ShapeType::Polygon,
                });
                geometries.push(polygon.geometry);
            }
        }

        let assessment = self.evaluator.evaluate_all(&vegetation, &cables, &towers);
        info!(
            image_id,
            detections = detections.len(),
            risk = assessment.risk_detected,
            "analysis complete"
        );
        AnalysisResult::assemble(image_id, assessment, detections, Provenance::ModelInference)
    }
}
