use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::{Rgb, RgbImage};
use ndarray::Array2;
use tempfile::TempDir;

use powerline_risk::mocks::{
    mask_from_rects, ColorThresholdModel, CountingLoader, MockSegmentationModel,
};
use powerline_risk::risk::{CABLE_CONTACT_DETAIL, DEFAULT_DETAIL};
use powerline_risk::{
    AnalysisReport, AnalysisResult, Analyzer, ClassLabel, ModelLoader, ModelStateKind,
    PipelineError, PipelineOptions, Provenance,
};

fn write_weights(dir: &Path) -> PathBuf {
    let weights = dir.join("model.onnx");
    fs::write(&weights, b"weights").unwrap();
    weights
}

fn analyzer_with<L: ModelLoader>(loader: L, weights: PathBuf) -> Analyzer<L> {
    let manager = powerline_risk::ModelLifecycleManager::new(loader, weights);
    Analyzer::new(Arc::new(manager), PipelineOptions::default())
}

/// Cable band along row 100..120 with a vegetation block directly below it.
fn touching_class_map() -> Array2<u8> {
    Array2::from_shape_fn((512, 512), |(y, x)| {
        if (100..120).contains(&y) && (50..450).contains(&x) {
            ClassLabel::Cable.id()
        } else if (120..300).contains(&y) && (200..300).contains(&x) {
            ClassLabel::Vegetation.id()
        } else {
            ClassLabel::Background.id()
        }
    })
}

fn assert_risk_invariant(result: &AnalysisResult) {
    if result.risk_detected {
        assert_ne!(result.details, DEFAULT_DETAIL);
    } else {
        assert_eq!(result.details, DEFAULT_DETAIL);
    }
}

#[test]
fn test_overlapping_blobs_report_risk() {
    let temp_dir = TempDir::new().unwrap();
    let analyzer = analyzer_with(
        CountingLoader::uniform(ClassLabel::Background),
        temp_dir.path().join("absent.onnx"),
    );
    let mask = mask_from_rects(
        200,
        200,
        &[
            (ClassLabel::Cable, [10, 50, 190, 60]),
            (ClassLabel::Vegetation, [80, 60, 120, 150]),
        ],
    )
    .unwrap();

    let result = analyzer.analyze_mask("scenario-1", &mask);
    assert!(result.risk_detected);
    assert_eq!(result.details, CABLE_CONTACT_DETAIL);
}

#[test]
fn test_separated_blobs_report_no_risk() {
    let temp_dir = TempDir::new().unwrap();
    let analyzer = analyzer_with(
        CountingLoader::uniform(ClassLabel::Background),
        temp_dir.path().join("absent.onnx"),
    );
    let mask = mask_from_rects(
        200,
        200,
        &[
            (ClassLabel::Cable, [10, 50, 190, 60]),
            (ClassLabel::Vegetation, [80, 65, 120, 150]),
        ],
    )
    .unwrap();

    let result = analyzer.analyze_mask("scenario-2", &mask);
    assert!(!result.risk_detected);
    assert_eq!(result.details, DEFAULT_DETAIL);
    assert_eq!(result.detections.len(), 2);
}

#[test]
fn test_regions_one_pixel_apart_are_separate_detections() {
    let temp_dir = TempDir::new().unwrap();
    let analyzer = analyzer_with(
        CountingLoader::uniform(ClassLabel::Background),
        temp_dir.path().join("absent.onnx"),
    );
    let mask = mask_from_rects(
        40,
        20,
        &[
            (ClassLabel::Cable, [1, 5, 39, 7]),
            (ClassLabel::Cable, [1, 8, 39, 10]),
            (ClassLabel::Vegetation, [2, 12, 10, 19]),
            (ClassLabel::Vegetation, [11, 12, 20, 19]),
        ],
    )
    .unwrap();

    let result = analyzer.analyze_mask("strands", &mask);
    let count = |label: ClassLabel| result.detections.iter().filter(|d| d.label == label).count();
    assert_eq!(count(ClassLabel::Cable), 2);
    assert_eq!(count(ClassLabel::Vegetation), 2);
    assert!(!result.risk_detected);
}

#[test]
fn test_background_only_mask_is_empty() {
    let temp_dir = TempDir::new().unwrap();
    let analyzer = analyzer_with(
        CountingLoader::uniform(ClassLabel::Background),
        temp_dir.path().join("absent.onnx"),
    );
    let mask = powerline_risk::LabelMask::filled(640, 480, ClassLabel::Background);

    let result = analyzer.analyze_mask("empty", &mask);
    assert!(result.detections.is_empty());
    assert!(!result.risk_detected);
    assert_eq!(result.details, DEFAULT_DETAIL);
}

#[test]
fn test_detections_have_three_vertices_and_invariant_holds() {
    let temp_dir = TempDir::new().unwrap();
    let analyzer = analyzer_with(
        CountingLoader::uniform(ClassLabel::Background),
        temp_dir.path().join("absent.onnx"),
    );
    let masks = [
        mask_from_rects(
            100,
            100,
            &[
                (ClassLabel::Cable, [0, 0, 100, 1]),
                (ClassLabel::Tower, [40, 1, 42, 90]),
                (ClassLabel::Vegetation, [5, 5, 6, 6]),
            ],
        ),
        mask_from_rects(
            100,
            100,
            &[
                (ClassLabel::Vegetation, [0, 0, 100, 100]),
                (ClassLabel::Cable, [20, 20, 80, 22]),
                (ClassLabel::Background, [30, 40, 60, 70]),
            ],
        ),
        mask_from_rects(
            100,
            100,
            &[
                (ClassLabel::Cable, [0, 10, 100, 12]),
                (ClassLabel::Cable, [0, 30, 100, 32]),
                (ClassLabel::Vegetation, [10, 60, 30, 80]),
                (ClassLabel::Vegetation, [60, 60, 62, 62]),
            ],
        ),
    ];

    for mask in masks {
        let result = analyzer.analyze_mask("invariants", &mask.unwrap());
        assert!(!result.detections.is_empty());
        for detection in &result.detections {
            assert!(detection.points.len() >= 3, "{:?}", detection);
        }
        assert_risk_invariant(&result);
    }
}

#[test]
fn test_live_inference_end_to_end() {
    let temp_dir = TempDir::new().unwrap();
    let weights = write_weights(temp_dir.path());
    RgbImage::new(800, 600)
        .save(temp_dir.path().join("1001.png"))
        .unwrap();

    let loader = CountingLoader::new(MockSegmentationModel::from_class_map(touching_class_map()));
    let loads = loader.load_counter();
    let analyzer = analyzer_with(loader, weights);

    let result = analyzer.analyze(temp_dir.path(), "1001").unwrap();
    assert_eq!(result.image_id, "1001");
    assert_eq!(result.source, Provenance::ModelInference);
    assert!(result.risk_detected);
    assert_eq!(result.details, CABLE_CONTACT_DETAIL);

    let labels = result
        .detections
        .iter()
        .map(|d| d.label)
        .collect::<Vec<_>>();
    assert_eq!(labels, vec![ClassLabel::Cable, ClassLabel::Vegetation]);
    for detection in &result.detections {
        for [x, y] in &detection.points {
            assert!((0..=800).contains(x) && (0..=600).contains(y));
        }
    }

    analyzer.analyze(temp_dir.path(), "1001").unwrap();
    assert_eq!(loads.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(analyzer.models().state(), ModelStateKind::Loaded);
}

#[test]
fn test_analysis_is_idempotent() {
    let temp_dir = TempDir::new().unwrap();
    let weights = write_weights(temp_dir.path());
    let image = RgbImage::from_fn(800, 600, |x, y| match (x, y) {
        (40..=760, 100..=140) => Rgb([255, 0, 0]),
        (300..=500, 300..=500) => Rgb([0, 255, 0]),
        _ => Rgb([0, 0, 0]),
    });
    image.save(temp_dir.path().join("7.png")).unwrap();

    let analyzer = analyzer_with(CountingLoader::new(ColorThresholdModel::default()), weights);
    let first = analyzer.analyze(temp_dir.path(), "7").unwrap();
    let second = analyzer.analyze(temp_dir.path(), "7").unwrap();
    assert_eq!(first, second);

    assert!(!first.risk_detected);
    let mut labels = first.detections.iter().map(|d| d.label).collect::<Vec<_>>();
    labels.dedup();
    assert_eq!(labels, vec![ClassLabel::Cable, ClassLabel::Vegetation]);
}

#[test]
fn test_mask_matches_original_resolution() {
    let temp_dir = TempDir::new().unwrap();
    let analyzer = analyzer_with(
        CountingLoader::uniform(ClassLabel::Background),
        temp_dir.path().join("absent.onnx"),
    );
    let model = MockSegmentationModel::from_class_map(touching_class_map());

    for (width, height) in [(800, 600), (1920, 1080)] {
        let path = temp_dir.path().join(format!("{}x{}.png", width, height));
        RgbImage::new(width, height).save(&path).unwrap();

        let mask = analyzer.segment(&model, &path).unwrap();
        assert_eq!(mask.dimensions(), (width, height));
        assert_eq!(mask.count(ClassLabel::Tower), 0);
    }
}

#[test]
fn test_unavailable_model_without_annotations() {
    let temp_dir = TempDir::new().unwrap();
    let analyzer = analyzer_with(
        CountingLoader::uniform(ClassLabel::Cable),
        temp_dir.path().join("absent.onnx"),
    );

    let err = analyzer.analyze(temp_dir.path(), "X").unwrap_err();
    assert!(matches!(err, PipelineError::AnnotationsMissing { .. }));

    match analyzer.report(temp_dir.path(), "X") {
        AnalysisReport::Failed(failure) => {
            assert_eq!(failure.image_id, "X");
            assert!(!failure.risk_detected);
            assert!(failure.detections.is_empty());
            assert_eq!(failure.source, Provenance::Legacy);
        }
        other => panic!("expected a failure report, got {:?}", other),
    }
    assert_eq!(analyzer.models().state(), ModelStateKind::Unavailable);
}

#[test]
fn test_unavailable_model_with_annotations() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(
        temp_dir.path().join("55.json"),
        r#"{"shapes": [{"label": "Tree", "points": [[1, 1], [4, 1], [4, 4]]}]}"#,
    )
    .unwrap();
    let analyzer = analyzer_with(
        CountingLoader::uniform(ClassLabel::Cable),
        temp_dir.path().join("absent.onnx"),
    );

    let result = analyzer.analyze(temp_dir.path(), "55").unwrap();
    assert_eq!(result.source, Provenance::Legacy);
    assert!(result.detections.is_empty());
    assert_risk_invariant(&result);
}

#[test]
fn test_missing_image_uses_annotations() {
    let temp_dir = TempDir::new().unwrap();
    let weights = write_weights(temp_dir.path());
    fs::write(temp_dir.path().join("88.json"), r#"{"shapes": []}"#).unwrap();
    let analyzer = analyzer_with(CountingLoader::uniform(ClassLabel::Cable), weights);

    let result = analyzer.analyze(temp_dir.path(), "88").unwrap();
    assert_eq!(result.source, Provenance::Legacy);
    assert_eq!(analyzer.models().state(), ModelStateKind::Loaded);
}

#[test]
fn test_undecodable_image_fails_request() {
    let temp_dir = TempDir::new().unwrap();
    let weights = write_weights(temp_dir.path());
    fs::write(temp_dir.path().join("broken.jpg"), b"not an image").unwrap();
    let analyzer = analyzer_with(CountingLoader::uniform(ClassLabel::Cable), weights);

    let err = analyzer.analyze(temp_dir.path(), "broken").unwrap_err();
    assert!(matches!(err, PipelineError::ImageLoad { .. }));

    let report = analyzer.report(temp_dir.path(), "broken");
    assert!(report.is_failure());
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["source"], "Model Inference (U-Net)");
    assert_eq!(json["risk_detected"], false);
}
