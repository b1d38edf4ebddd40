use std::fmt;

use image::{imageops, imageops::FilterType, GrayImage, Luma};
use ndarray::prelude::*;
use serde::{Deserialize, Serialize};

use crate::errors::{PipelineError, Result};

/// Semantic classes produced by the segmentation model.
///
/// The ordinals are a stable contract: they are the pixel intensities of a
/// [`LabelMask`] and the indices of the model's output channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassLabel {
    Background = 0,
    Cable = 1,
    Tower = 2,
    Vegetation = 3,
}

impl ClassLabel {
    pub const ALL: [ClassLabel; 4] = [
        ClassLabel::Background,
        ClassLabel::Cable,
        ClassLabel::Tower,
        ClassLabel::Vegetation,
    ];

    /// Classes that are turned into detections, in payload order.
    pub const FOREGROUND: [ClassLabel; 3] =
        [ClassLabel::Cable, ClassLabel::Tower, ClassLabel::Vegetation];

    pub const fn id(self) -> u8 {
        self as u8
    }

    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.get(id as usize).copied()
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            ClassLabel::Background => "background",
            ClassLabel::Cable => "cable",
            ClassLabel::Tower => "tower",
            ClassLabel::Vegetation => "vegetation",
        }
    }
}

impl fmt::Display for ClassLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-pixel class grid at the original image resolution.
///
/// Every value is a valid [`ClassLabel`] ordinal; this is checked once on
/// construction and the mask is immutable afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelMask {
    pixels: GrayImage,
}

impl LabelMask {
    pub fn from_image(pixels: GrayImage) -> Result<Self> {
        if let Some(Luma([id])) = pixels
            .pixels()
            .find(|Luma([id])| ClassLabel::from_id(*id).is_none())
        {
            return Err(PipelineError::Validation {
                field: "label mask".to_string(),
                reason: format!("contains unknown class id {}", id),
            });
        }
        Ok(Self { pixels })
    }

    /// Builds a mask from a `(height, width)` class map.
    pub fn from_class_map(class_map: ArrayView2<u8>) -> Result<Self> {
        let (height, width) = class_map.dim();
        let raw = class_map.iter().copied().collect::<Vec<_>>();
        let pixels = GrayImage::from_raw(width as u32, height as u32, raw).ok_or_else(|| {
            PipelineError::Validation {
                field: "class map".to_string(),
                reason: format!("cannot hold a {}x{} buffer", width, height),
            }
        })?;
        Self::from_image(pixels)
    }

    pub fn filled(width: u32, height: u32, label: ClassLabel) -> Self {
        Self {
            pixels: GrayImage::from_pixel(width, height, Luma([label.id()])),
        }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    pub fn get(&self, x: u32, y: u32) -> ClassLabel {
        let Luma([id]) = *self.pixels.get_pixel(x, y);
        ClassLabel::from_id(id).unwrap_or(ClassLabel::Background)
    }

    pub fn as_image(&self) -> &GrayImage {
        &self.pixels
    }

    pub fn count(&self, label: ClassLabel) -> usize {
        self.pixels
            .pixels()
            .filter(|Luma([id])| *id == label.id())
            .count()
    }
}

/// Maps the model's fixed-size class map back to the original resolution.
///
/// Nearest-neighbour sampling only: any interpolating filter would blend
/// neighbouring ordinals into classes the model never produced.
pub fn resize_mask(class_map: ArrayView2<u8>, width: u32, height: u32) -> Result<LabelMask> {
    let fixed = LabelMask::from_class_map(class_map)?;
    if fixed.dimensions() == (width, height) {
        return Ok(fixed);
    }
    let resized = imageops::resize(fixed.as_image(), width, height, FilterType::Nearest);
    Ok(LabelMask { pixels: resized })
}
