use std::path::Path;

use ndarray::prelude::*;

use crate::errors::Result;

/// Inference backend producing a per-pixel class map.
///
/// The orchestrator depends on this trait rather than on ONNX Runtime so the
/// pipeline can be driven by mock models in tests.
pub trait SegmentationModel: Send + Sync {
    /// Side length of the square input the model expects.
    fn input_size(&self) -> u32;

    /// Human-readable name of the device or runtime serving predictions.
    fn backend(&self) -> &str;

    /// Takes a `[1, 3, S, S]` tensor in `[0, 1]` and returns the `(S, S)`
    /// class map; softmax/argmax collapse is the model's job.
    fn predict(&self, tensor: ArrayView4<f32>) -> Result<Array2<u8>>;
}

/// Builds a model from a weights file.
pub trait ModelLoader: Send + Sync {
    type Model: SegmentationModel;

    fn load(&self, weights: &Path) -> Result<Self::Model>;
}
