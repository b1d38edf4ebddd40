use std::path::PathBuf;
use thiserror::Error;

use crate::analysis::Provenance;

/// Structured error types for the encroachment pipeline.
///
/// Request-level failures (undecodable image, no fallback data) surface as one
/// of these variants. Failures scoped to a single contour never reach this
/// type; they are dropped where they happen.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Filesystem error: {operation} failed for {path:?}")]
    FileSystem {
        path: PathBuf,
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Image load failed: {path:?}")]
    ImageLoad {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("No annotations found for image {image_id} (expected {path:?})")]
    AnnotationsMissing { image_id: String, path: PathBuf },

    #[error("Annotation file could not be parsed: {path:?}")]
    Annotation {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("No images found in {path:?}")]
    NoImages { path: PathBuf },

    #[error("Model error: {operation} failed")]
    Model {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Validation error: {field} {reason}")]
    Validation { field: String, reason: String },
}

pub type Result<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    /// Which analysis path produced this error.
    pub fn provenance(&self) -> Provenance {
        match self {
            Self::AnnotationsMissing { .. } | Self::Annotation { .. } => Provenance::Legacy,
            _ => Provenance::ModelInference,
        }
    }

    pub(crate) fn model<E>(operation: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Model {
            operation: operation.into(),
            source: Box::new(source),
        }
    }
}

/// Convert anyhow errors to configuration errors.
///
/// Only the binary deals in `anyhow`; anything crossing back into the library
/// is treated as a configuration problem.
impl From<anyhow::Error> for PipelineError {
    fn from(err: anyhow::Error) -> Self {
        PipelineError::Configuration {
            message: err.to_string(),
        }
    }
}

/// Convert I/O errors to filesystem errors.
///
/// Code that knows the path and operation should build
/// `PipelineError::FileSystem` directly instead of relying on this fallback.
impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        Self::FileSystem {
            path: PathBuf::from("unknown"),
            operation: "unknown".to_string(),
            source: err,
        }
    }
}

/// Convert image crate errors raised outside of decoding (encoding, buffer
/// construction) to model errors; decoding failures use `ImageLoad`.
impl From<image::ImageError> for PipelineError {
    fn from(err: image::ImageError) -> Self {
        Self::model("image buffer operation", err)
    }
}

/// Convert ONNX Runtime errors to model errors.
impl From<ort::Error> for PipelineError {
    fn from(err: ort::Error) -> Self {
        Self::model("ort operation", err)
    }
}

/// Shape errors come out of tensor handling around inference, so they are
/// reported as model errors.
impl From<ndarray::ShapeError> for PipelineError {
    fn from(err: ndarray::ShapeError) -> Self {
        Self::model("tensor shape conversion", err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provenance_of_errors() {
        let missing = PipelineError::AnnotationsMissing {
            image_id: "X".to_string(),
            path: PathBuf::from("X.json"),
        };
        assert_eq!(missing.provenance(), Provenance::Legacy);

        let io = std::io::Error::new(std::io::ErrorKind::InvalidData, "corrupt");
        let load = PipelineError::ImageLoad {
            path: PathBuf::from("X.jpg"),
            source: image::ImageError::IoError(io),
        };
        assert_eq!(load.provenance(), Provenance::ModelInference);
    }

    #[test]
    fn test_display_carries_context() {
        let err = PipelineError::Validation {
            field: "mask".to_string(),
            reason: "contains unknown class id 9".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Validation error: mask contains unknown class id 9"
        );
    }
}
