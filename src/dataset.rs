use std::path::{Path, PathBuf};

use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use walkdir::WalkDir;

use crate::errors::{PipelineError, Result};

/// Extensions probed when resolving an image id, in priority order.
pub const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "webp"];

/// Resolves `<root>/<id>.<ext>` for the first supported extension present.
pub fn find_image(dataset_root: &Path, image_id: &str) -> Option<PathBuf> {
    IMAGE_EXTENSIONS
        .iter()
        .map(|ext| dataset_root.join(format!("{}.{}", image_id, ext)))
        .find(|path| path.is_file())
}

pub fn annotation_path(dataset_root: &Path, image_id: &str) -> PathBuf {
    dataset_root.join(format!("{}.json", image_id))
}

pub fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

/// Supported images directly under `dataset_root`, sorted by path.
pub fn list_images(dataset_root: &Path) -> Result<Vec<PathBuf>> {
    if !dataset_root.is_dir() {
        return Err(PipelineError::FileSystem {
            path: dataset_root.to_path_buf(),
            operation: "listing dataset".to_string(),
            source: std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "dataset directory does not exist",
            ),
        });
    }

    let mut images = WalkDir::new(dataset_root)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|entry| entry.into_path())
        .filter(|path| path.is_file() && is_supported_image(path))
        .collect::<Vec<_>>();
    images.sort();
    Ok(images)
}

/// Image id of a dataset file: its file stem.
pub fn image_id(path: &Path) -> Option<&str> {
    path.file_stem().and_then(|stem| stem.to_str())
}

/// Record returned to clients that browse the dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageInfo {
    pub image_id: String,
    pub filename: String,
    pub url: String,
}

impl ImageInfo {
    pub fn from_path(path: &Path) -> Option<Self> {
        let filename = path.file_name()?.to_str()?.to_string();
        Some(Self {
            image_id: image_id(path)?.to_string(),
            url: format!("/data/images/{}", filename),
            filename,
        })
    }
}

/// Picks one dataset image uniformly at random.
pub fn random_image<R: Rng + ?Sized>(dataset_root: &Path, rng: &mut R) -> Result<ImageInfo> {
    let images = list_images(dataset_root)?;
    images
        .choose(rng)
        .and_then(|path| ImageInfo::from_path(path))
        .ok_or_else(|| PipelineError::NoImages {
            path: dataset_root.to_path_buf(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::fs;

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), b"").unwrap();
    }

    #[test]
    fn test_find_image_probes_in_order() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(find_image(dir.path(), "7"), None);

        touch(dir.path(), "7.png");
        assert_eq!(find_image(dir.path(), "7"), Some(dir.path().join("7.png")));

        touch(dir.path(), "7.jpg");
        assert_eq!(find_image(dir.path(), "7"), Some(dir.path().join("7.jpg")));
    }

    #[test]
    fn test_list_images_is_sorted_and_flat() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "b.jpg");
        touch(dir.path(), "a.PNG");
        touch(dir.path(), "a.json");
        touch(dir.path(), "notes.txt");
        fs::create_dir(dir.path().join("nested")).unwrap();
        touch(&dir.path().join("nested"), "c.jpg");

        let images = list_images(dir.path()).unwrap();
        assert_eq!(
            images,
            vec![dir.path().join("a.PNG"), dir.path().join("b.jpg")]
        );
    }

    #[test]
    fn test_list_images_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let err = list_images(&dir.path().join("absent")).unwrap_err();
        assert!(matches!(err, PipelineError::FileSystem { .. }));
    }

    #[test]
    fn test_random_image_record() -> Result<()> {
        let dir = tempfile::tempdir()?;
        touch(dir.path(), "1001.jpg");

        let mut rng = StdRng::seed_from_u64(7);
        let info = random_image(dir.path(), &mut rng)?;
        assert_eq!(
            info,
            ImageInfo {
                image_id: "1001".to_string(),
                filename: "1001.jpg".to_string(),
                url: "/data/images/1001.jpg".to_string(),
            }
        );
        Ok(())
    }

    #[test]
    fn test_random_image_empty_dataset() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "only.json");
        let mut rng = StdRng::seed_from_u64(1);
        let err = random_image(dir.path(), &mut rng).unwrap_err();
        assert!(matches!(err, PipelineError::NoImages { .. }));
    }
}
