//! Test doubles for the inference backend.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use image::{GrayImage, Luma};
use ndarray::prelude::*;

use crate::errors::{PipelineError, Result};
use crate::mask::{ClassLabel, LabelMask};
use crate::preprocess::DEFAULT_INPUT_SIZE;
use crate::traits::{ModelLoader, SegmentationModel};

/// Model that always predicts the same class map.
#[derive(Debug)]
pub struct MockSegmentationModel {
    class_map: Array2<u8>,
    predictions: AtomicUsize,
}

impl MockSegmentationModel {
    /// `class_map` must be square; its side is the model input size.
    pub fn from_class_map(class_map: Array2<u8>) -> Self {
        Self {
            class_map,
            predictions: AtomicUsize::new(0),
        }
    }

    pub fn uniform(input_size: u32, label: ClassLabel) -> Self {
        let side = input_size as usize;
        Self::from_class_map(Array2::from_elem((side, side), label.id()))
    }

    pub fn prediction_count(&self) -> usize {
        self.predictions.load(Ordering::SeqCst)
    }
}

impl Clone for MockSegmentationModel {
    fn clone(&self) -> Self {
        Self::from_class_map(self.class_map.clone())
    }
}

impl SegmentationModel for MockSegmentationModel {
    fn input_size(&self) -> u32 {
        self.class_map.nrows() as u32
    }

    fn backend(&self) -> &str {
        "mock"
    }

    fn predict(&self, _tensor: ArrayView4<f32>) -> Result<Array2<u8>> {
        self.predictions.fetch_add(1, Ordering::SeqCst);
        Ok(self.class_map.clone())
    }
}

/// Model that segments by dominant colour: red is cable, blue is tower,
/// green is vegetation, anything else is background.
#[derive(Debug, Clone, Copy)]
pub struct ColorThresholdModel {
    input_size: u32,
}

impl ColorThresholdModel {
    pub const fn new(input_size: u32) -> Self {
        Self { input_size }
    }
}

impl Default for ColorThresholdModel {
    fn default() -> Self {
        Self::new(DEFAULT_INPUT_SIZE)
    }
}

impl SegmentationModel for ColorThresholdModel {
    fn input_size(&self) -> u32 {
        self.input_size
    }

    fn backend(&self) -> &str {
        "color-threshold"
    }

    fn predict(&self, tensor: ArrayView4<f32>) -> Result<Array2<u8>> {
        let planes = tensor.index_axis(Axis(0), 0);
        let classes = planes.map_axis(Axis(0), |rgb| {
            let label = match (rgb[0] > 0.5, rgb[1] > 0.5, rgb[2] > 0.5) {
                (true, false, false) => ClassLabel::Cable,
                (false, true, false) => ClassLabel::Vegetation,
                (false, false, true) => ClassLabel::Tower,
                _ => ClassLabel::Background,
            };
            label.id()
        });
        Ok(classes)
    }
}

/// Loader that hands out clones of a prototype model and counts load calls.
/// Without a prototype every load fails.
pub struct CountingLoader<M> {
    prototype: Option<M>,
    loads: Arc<AtomicUsize>,
}

impl<M> CountingLoader<M> {
    pub fn new(prototype: M) -> Self {
        Self {
            prototype: Some(prototype),
            loads: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Shared counter of `load` calls, readable after the loader is moved.
    pub fn load_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.loads)
    }
}

impl CountingLoader<MockSegmentationModel> {
    pub fn uniform(label: ClassLabel) -> Self {
        Self::new(MockSegmentationModel::uniform(DEFAULT_INPUT_SIZE, label))
    }

    pub fn failing() -> Self {
        Self {
            prototype: None,
            loads: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl<M> ModelLoader for CountingLoader<M>
where
    M: SegmentationModel + Clone,
{
    type Model = M;

    fn load(&self, weights: &Path) -> Result<M> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.prototype.clone().ok_or_else(|| {
            PipelineError::model(
                format!("loading weights from {}", weights.display()),
                std::io::Error::new(std::io::ErrorKind::InvalidData, "corrupt weights"),
            )
        })
    }
}

/// Builds a mask by painting `[x0, y0, x1, y1)` rectangles over background,
/// later rectangles on top.
pub fn mask_from_rects(
    width: u32,
    height: u32,
    rects: &[(ClassLabel, [u32; 4])],
) -> Result<LabelMask> {
    let mut image = GrayImage::new(width, height);
    for &(label, [x0, y0, x1, y1]) in rects {
        for y in y0..y1.min(height) {
            for x in x0..x1.min(width) {
                image.put_pixel(x, y, Luma([label.id()]));
            }
        }
    }
    LabelMask::from_image(image)
}
