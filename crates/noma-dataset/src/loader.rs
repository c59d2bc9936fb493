//! Image folder discovery.
//!
//! The expected layout is one sub-directory per class:
//!
//! ```text
//! root/
//! ├── noma/
//! │   ├── img_001.jpg
//! │   └── ...
//! └── normal/
//!     └── ...
//! ```
//!
//! Class indices follow the lexicographic order of the directory names.
//! Images are collected recursively and sorted by path.

use std::fs;
use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageReader};
use noma_core::{ClassCatalog, Error, ImageSample, Result};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Extensions accepted as images (compared case-insensitively).
pub const IMAGE_EXTENSIONS: [&str; 9] = [
    "jpg", "jpeg", "png", "ppm", "bmp", "pgm", "tif", "tiff", "webp",
];

/// Labeled images discovered under one root directory.
#[derive(Debug, Clone)]
pub struct ImageFolder {
    root: PathBuf,
    catalog: ClassCatalog,
    samples: Vec<ImageSample>,
}

impl ImageFolder {
    pub fn discover<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        info!("Discovering classes in {}", root.display());

        if !root.is_dir() {
            return Err(Error::DataDiscovery(format!(
                "dataset directory does not exist: {}",
                root.display()
            )));
        }

        let mut class_dirs: Vec<String> = Vec::new();
        for entry in fs::read_dir(&root)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if entry.path().is_dir() && !name.starts_with('.') {
                class_dirs.push(name);
            }
        }
        class_dirs.sort();

        if class_dirs.is_empty() {
            return Err(Error::DataDiscovery(format!(
                "no class directories found in {}",
                root.display()
            )));
        }

        let catalog = ClassCatalog::new(class_dirs)
            .map_err(|e| Error::DataDiscovery(format!("{}: {e}", root.display())))?;

        let mut samples = Vec::new();
        for (label, class_name) in catalog.names().iter().enumerate() {
            let before = samples.len();
            for entry in WalkDir::new(root.join(class_name))
                .min_depth(1)
                .follow_links(true)
                .sort_by_file_name()
            {
                let entry = entry.map_err(|e| {
                    Error::DataDiscovery(format!("cannot walk class '{class_name}': {e}"))
                })?;
                if entry.file_type().is_file() && is_image_file(entry.path()) {
                    samples.push(ImageSample::new(entry.into_path(), label));
                }
            }

            let found = samples.len() - before;
            if found == 0 {
                warn!("Class '{class_name}' (label {label}) has no images");
            }
            debug!("Class '{class_name}' (label {label}): {found} images");
        }

        if samples.is_empty() {
            return Err(Error::DataDiscovery(format!(
                "no images found under {}",
                root.display()
            )));
        }

        info!(
            "Found {} images in {} classes under {}",
            samples.len(),
            catalog.len(),
            root.display()
        );

        Ok(Self {
            root,
            catalog,
            samples,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn catalog(&self) -> &ClassCatalog {
        &self.catalog
    }

    pub fn samples(&self) -> &[ImageSample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn labels(&self) -> Vec<usize> {
        self.samples.iter().map(|s| s.label).collect()
    }

    /// Images per class, indexed like the catalog.
    pub fn class_counts(&self) -> Vec<usize> {
        let mut counts = vec![0usize; self.catalog.len()];
        for sample in &self.samples {
            counts[sample.label] += 1;
        }
        counts
    }
}

pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

/// Decode an image from disk. Failures carry the offending path.
pub fn load_image(path: &Path) -> Result<DynamicImage> {
    ImageReader::open(path)
        .map_err(|e| Error::Image(format!("failed to open {}: {e}", path.display())))?
        .with_guessed_format()
        .map_err(|e| Error::Image(format!("failed to read {}: {e}", path.display())))?
        .decode()
        .map_err(|e| Error::Image(format!("failed to decode {}: {e}", path.display())))
}
