use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use tracing::{debug, info};

use crate::analysis::{AnalysisResult, Provenance};
use crate::dataset;
use crate::errors::{PipelineError, Result};
use crate::mask::ClassLabel;

/// One substring rule of the annotation label mapping.
#[derive(Debug, Clone, Copy)]
pub struct LabelRule {
    pub pattern: &'static str,
    pub label: ClassLabel,
}

/// Ordered label rules; the first pattern contained in the lowercased label
/// wins. Labels matching nothing are background.
pub const LABEL_RULES: &[LabelRule] = &[
    LabelRule {
        pattern: "cable",
        label: ClassLabel::Cable,
    },
    LabelRule {
        pattern: "wire",
        label: ClassLabel::Cable,
    },
    LabelRule {
        pattern: "tower",
        label: ClassLabel::Tower,
    },
    LabelRule {
        pattern: "tree",
        label: ClassLabel::Vegetation,
    },
    LabelRule {
        pattern: "vegetation",
        label: ClassLabel::Vegetation,
    },
];

/// Maps a free-text annotation label onto a class.
pub fn classify_label(label: &str) -> ClassLabel {
    let label = label.to_lowercase();
    LABEL_RULES
        .iter()
        .find(|rule| label.contains(rule.pattern))
        .map_or(ClassLabel::Background, |rule| rule.label)
}

/// Ground-truth annotation record (LabelMe layout).
#[derive(Debug, Clone, Deserialize)]
pub struct Annotation {
    #[serde(default)]
    pub shapes: Vec<AnnotationShape>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnnotationShape {
    pub label: String,
    #[serde(default)]
    pub points: Vec<[f64; 2]>,
    #[serde(default)]
    pub shape_type: Option<String>,
}

impl Annotation {
    pub fn read(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|source| PipelineError::FileSystem {
            path: path.to_path_buf(),
            operation: "reading annotation".to_string(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| PipelineError::Annotation {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Number of shapes per class.
    pub fn class_counts(&self) -> BTreeMap<ClassLabel, usize> {
        let mut counts = BTreeMap::new();
        for shape in &self.shapes {
            *counts.entry(classify_label(&shape.label)).or_default() += 1;
        }
        counts
    }
}

/// Produces the fallback result for `image_id` from stored annotations.
///
/// The annotation must exist and parse. The result itself is deliberately
/// minimal: no detections and no risk, tagged as legacy.
pub fn analyze_legacy(dataset_root: &Path, image_id: &str) -> Result<AnalysisResult> {
    let path = dataset::annotation_path(dataset_root, image_id);
    if !path.is_file() {
        info!(image_id, path = %path.display(), "no annotations for fallback");
        return Err(PipelineError::AnnotationsMissing {
            image_id: image_id.to_string(),
            path,
        });
    }

    let annotation = Annotation::read(&path)?;
    debug!(
        image_id,
        shapes = annotation.shapes.len(),
        counts = ?annotation.class_counts(),
        "read legacy annotation"
    );

    Ok(AnalysisResult::clear(image_id, Provenance::Legacy))
}
