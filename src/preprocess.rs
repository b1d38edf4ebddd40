use std::path::Path;

use clap::ValueEnum;
use image::{imageops, imageops::FilterType, Primitive, RgbImage};
use ndarray::prelude::*;
use nshare::AsNdarray3;
use num_traits::AsPrimitive;

use crate::errors::{PipelineError, Result};

/// Default square input resolution of the segmentation model.
pub const DEFAULT_INPUT_SIZE: u32 = 512;

/// Channel order the model was trained with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ChannelOrder {
    #[default]
    Rgb,
    Bgr,
}

/// Model-ready tensor plus the resolution it was derived from.
#[derive(Debug, Clone)]
pub struct PreparedInput {
    /// `[1, 3, S, S]`, values in `[0, 1]`.
    pub tensor: Array4<f32>,
    pub original_width: u32,
    pub original_height: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct Preprocessor {
    input_size: u32,
    channel_order: ChannelOrder,
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self::new(DEFAULT_INPUT_SIZE, ChannelOrder::Rgb)
    }
}

impl Preprocessor {
    pub const fn new(input_size: u32, channel_order: ChannelOrder) -> Self {
        Self {
            input_size,
            channel_order,
        }
    }

    pub const fn input_size(&self) -> u32 {
        self.input_size
    }

    /// Decodes `path` and prepares it for inference.
    pub fn load(&self, path: &Path) -> Result<PreparedInput> {
        let image = image::open(path)
            .map_err(|source| PipelineError::ImageLoad {
                path: path.to_path_buf(),
                source,
            })?
            .into_rgb8();
        Ok(self.prepare(&image))
    }

    /// Resizes to the square model resolution with bilinear filtering,
    /// reorders channels and scales into `[0, 1]`.
    pub fn prepare(&self, image: &RgbImage) -> PreparedInput {
        let (original_width, original_height) = image.dimensions();
        let resized = imageops::resize(
            image,
            self.input_size,
            self.input_size,
            FilterType::Triangle,
        );

        let planes = resized.as_ndarray3();
        let planes = match self.channel_order {
            ChannelOrder::Rgb => planes,
            ChannelOrder::Bgr => planes.slice_move(s![..;-1, .., ..]),
        };
        let tensor = planes.insert_axis(Axis(0)).mapv(normalize::<u8>);

        PreparedInput {
            tensor,
            original_width,
            original_height,
        }
    }
}

fn normalize<S>(value: S) -> f32
where
    S: Primitive + AsPrimitive<f32>,
{
    value.as_() / S::DEFAULT_MAX_VALUE.as_()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_output_shape_and_original_size() {
        let preprocessor = Preprocessor::default();
        for (width, height) in [(800, 600), (1920, 1080)] {
            let image = RgbImage::from_pixel(width, height, Rgb([10, 20, 30]));
            let prepared = preprocessor.prepare(&image);
            assert_eq!(prepared.tensor.shape(), &[1, 3, 512, 512]);
            assert_eq!(
                (prepared.original_width, prepared.original_height),
                (width, height)
            );
        }
    }

    #[test]
    fn test_values_are_normalized() {
        let image = RgbImage::from_pixel(64, 32, Rgb([255, 0, 51]));
        let prepared = Preprocessor::new(16, ChannelOrder::Rgb).prepare(&image);
        let tensor = &prepared.tensor;
        assert!(tensor.iter().all(|v| (0.0..=1.0).contains(v)));
        assert!((tensor[[0, 0, 3, 3]] - 1.0).abs() < 1e-6);
        assert!(tensor[[0, 1, 3, 3]].abs() < 1e-6);
        assert!((tensor[[0, 2, 3, 3]] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_bgr_reverses_channels() {
        let image = RgbImage::from_pixel(8, 8, Rgb([255, 0, 0]));
        let prepared = Preprocessor::new(8, ChannelOrder::Bgr).prepare(&image);
        assert!(prepared.tensor[[0, 0, 0, 0]].abs() < 1e-6);
        assert!((prepared.tensor[[0, 2, 0, 0]] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_preparation_is_deterministic() {
        let image = RgbImage::from_fn(300, 200, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 7]));
        let preprocessor = Preprocessor::default();
        assert_eq!(
            preprocessor.prepare(&image).tensor,
            preprocessor.prepare(&image).tensor
        );
    }

    #[test]
    fn test_undecodable_file_is_image_load_error() -> std::io::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("broken.jpg");
        std::fs::write(&path, b"definitely not a jpeg")?;

        let err = Preprocessor::default().load(&path).unwrap_err();
        assert!(matches!(err, PipelineError::ImageLoad { .. }));
        Ok(())
    }
}
