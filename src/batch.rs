use std::path::Path;

use indicatif::{ParallelProgressIterator, ProgressBar, ProgressStyle};
use rayon::prelude::*;
use tracing::info;

use crate::analysis::{AnalysisReport, Analyzer};
use crate::dataset;
use crate::errors::{PipelineError, Result};
use crate::traits::ModelLoader;

const PROGRESS_TEMPLATE: &str =
    "{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec} {eta})";

/// Counts over one batch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchSummary {
    pub total: usize,
    pub risky: usize,
    pub failed: usize,
}

impl BatchSummary {
    pub fn from_reports(reports: &[AnalysisReport]) -> Self {
        Self {
            total: reports.len(),
            risky: reports.iter().filter(|r| r.risk_detected()).count(),
            failed: reports.iter().filter(|r| r.is_failure()).count(),
        }
    }
}

/// Analyzes every image of the dataset in parallel.
///
/// Reports come back in listing order. A failing image yields a failure
/// report and does not stop the run.
pub fn analyze_dataset<L: ModelLoader>(
    analyzer: &Analyzer<L>,
    dataset_root: &Path,
    show_progress: bool,
) -> Result<Vec<AnalysisReport>> {
    let images = dataset::list_images(dataset_root)?;
    if images.is_empty() {
        return Err(PipelineError::NoImages {
            path: dataset_root.to_path_buf(),
        });
    }

    let progress_bar = if show_progress {
        let bar = ProgressBar::new(images.len() as u64);
        bar.set_style(
            ProgressStyle::with_template(PROGRESS_TEMPLATE)
                .map_err(|e| PipelineError::Configuration {
                    message: format!("invalid progress template: {}", e),
                })?
                .progress_chars("#>-"),
        );
        bar
    } else {
        ProgressBar::hidden()
    };

    let reports = images
        .par_iter()
        .progress_with(progress_bar.clone())
        .filter_map(|path| dataset::image_id(path))
        .map(|image_id| analyzer.report(dataset_root, image_id))
        .collect::<Vec<_>>();
    progress_bar.finish();

    let summary = BatchSummary::from_reports(&reports);
    info!(
        total = summary.total,
        risky = summary.risky,
        failed = summary.failed,
        "batch analysis finished"
    );
    Ok(reports)
}
