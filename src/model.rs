use std::path::Path;

use clap::ValueEnum;
use ndarray::prelude::*;
use ort::execution_providers::{
    CPUExecutionProvider, CUDAExecutionProvider, ExecutionProviderDispatch,
    TensorRTExecutionProvider,
};
use ort::session::{builder::SessionBuilder, Session};
use ort::value::TensorRef;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::errors::{PipelineError, Result};
use crate::preprocess::DEFAULT_INPUT_SIZE;
use crate::traits::{ModelLoader, SegmentationModel};

/// Execution device requested for ONNX Runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ExecutionDevice {
    /// CUDA when it registers, CPU otherwise.
    #[default]
    Auto,
    Cpu,
    Cuda,
    #[value(name = "tensorrt")]
    TensorRt,
}

impl ExecutionDevice {
    fn providers(self, device_id: i32) -> Vec<ExecutionProviderDispatch> {
        let cpu = CPUExecutionProvider::default().build();
        let cuda = || {
            CUDAExecutionProvider::default()
                .with_device_id(device_id)
                .build()
        };
        match self {
            ExecutionDevice::Auto => vec![cuda(), cpu],
            ExecutionDevice::Cpu => vec![cpu],
            ExecutionDevice::Cuda => vec![cuda(), cpu],
            ExecutionDevice::TensorRt => vec![
                TensorRTExecutionProvider::default()
                    .with_device_id(device_id)
                    .build(),
                cuda(),
                cpu,
            ],
        }
    }

    fn describe(self, device_id: i32) -> String {
        match self {
            ExecutionDevice::Auto => format!("auto (cuda:{} with cpu fallback)", device_id),
            ExecutionDevice::Cpu => "cpu".to_string(),
            ExecutionDevice::Cuda => format!("cuda:{}", device_id),
            ExecutionDevice::TensorRt => format!("tensorrt:{}", device_id),
        }
    }
}

/// U-Net segmentation model served by ONNX Runtime.
pub struct OnnxModel {
    input_size: u32,
    input_name: String,
    output_name: String,
    backend: String,
    session: Mutex<Session>,
}

impl OnnxModel {
    /// Builds a session for `model_path`. `fallback_input_size` is used when
    /// the graph declares a dynamic spatial size.
    pub fn new(
        model_path: &Path,
        device: ExecutionDevice,
        device_id: i32,
        num_threads: usize,
        fallback_input_size: u32,
    ) -> Result<Self> {
        let mut builder = SessionBuilder::new()
            .map_err(|e| PipelineError::model("session builder initialization", e))?
            .with_execution_providers(device.providers(device_id))
            .map_err(|e| PipelineError::model("execution provider registration", e))?
            .with_memory_pattern(true)
            .map_err(|e| PipelineError::model("memory pattern configuration", e))?;
        if num_threads > 0 {
            builder = builder
                .with_intra_threads(num_threads)
                .map_err(|e| PipelineError::model("thread configuration", e))?;
        }
        let mut session = builder.commit_from_file(model_path).map_err(|e| {
            PipelineError::model(format!("loading weights from {}", model_path.display()), e)
        })?;

        let input = session.inputs.first().ok_or_else(|| missing_io("input"))?;
        let input_name = input.name.clone();
        let input_size = input
            .input_type
            .tensor_shape()
            .and_then(|shape| shape.get(2).copied())
            .filter(|&side| side > 0)
            .map_or(fallback_input_size, |side| side as u32);
        let output_name = session
            .outputs
            .first()
            .ok_or_else(|| missing_io("output"))?
            .name
            .clone();

        // warm-up run so the first request does not pay for graph allocation
        let data = Array4::<f32>::zeros((1, 3, input_size as usize, input_size as usize));
        session
            .run(ort::inputs![input_name.as_str() => TensorRef::from_array_view(&data)?])
            .map_err(|e| PipelineError::model("warm-up inference", e))?;
        debug!(input = %input_name, output = %output_name, input_size, "model session ready");

        Ok(Self {
            input_size,
            input_name,
            output_name,
            backend: device.describe(device_id),
            session: Mutex::new(session),
        })
    }
}

impl SegmentationModel for OnnxModel {
    fn input_size(&self) -> u32 {
        self.input_size
    }

    fn backend(&self) -> &str {
        &self.backend
    }

    fn predict(&self, tensor: ArrayView4<f32>) -> Result<Array2<u8>> {
        let mut session = self.session.lock();
        let outputs = session.run(ort::inputs![
            self.input_name.as_str() => TensorRef::from_array_view(&tensor.as_standard_layout())?
        ])?;
        let logits = outputs[self.output_name.as_str()]
            .try_extract_array::<f32>()?
            .into_dimensionality::<Ix4>()?;
        let classes = argmax_classes(logits.index_axis(Axis(0), 0));
        Ok(classes)
    }
}

/// Collapses `(C, H, W)` scores into an `(H, W)` map of winning class indices.
///
/// Softmax preserves ordering, so the argmax of the raw logits is the same as
/// the argmax of the probabilities. Ties go to the lowest class index.
pub fn argmax_classes(scores: ArrayView3<f32>) -> Array2<u8> {
    scores.map_axis(Axis(0), |lane| {
        lane.iter()
            .enumerate()
            .fold((0usize, f32::NEG_INFINITY), |best, (class, &score)| {
                if score > best.1 {
                    (class, score)
                } else {
                    best
                }
            })
            .0 as u8
    })
}

fn missing_io(kind: &str) -> PipelineError {
    PipelineError::model(
        "reading model metadata",
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("model declares no {}", kind),
        ),
    )
}

/// Loads [`OnnxModel`]s with a fixed device selection.
#[derive(Debug, Clone)]
pub struct OnnxModelLoader {
    pub device: ExecutionDevice,
    pub device_id: i32,
    pub num_threads: usize,
    pub fallback_input_size: u32,
}

impl Default for OnnxModelLoader {
    fn default() -> Self {
        Self {
            device: ExecutionDevice::Auto,
            device_id: 0,
            num_threads: 0,
            fallback_input_size: DEFAULT_INPUT_SIZE,
        }
    }
}

impl ModelLoader for OnnxModelLoader {
    type Model = OnnxModel;

    fn load(&self, weights: &Path) -> Result<OnnxModel> {
        info!(
            weights = %weights.display(),
            device = %self.device.describe(self.device_id),
            "loading segmentation model"
        );
        OnnxModel::new(
            weights,
            self.device,
            self.device_id,
            self.num_threads,
            self.fallback_input_size,
        )
    }
}
