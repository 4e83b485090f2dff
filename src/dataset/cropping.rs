//! Cuts every annotated region out of its image and stores it under
//! `<output_dir>/<category name>/<annotation id>.jpg`.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use image::imageops;
use rayon::prelude::*;

use crate::dataset::coco_dataset::{Annotation, CocoDataset, Image};
use crate::dataset::common_structs::CropRect;
use crate::error::{DatasetError, DatasetResult};

#[derive(Debug, Clone)]
pub struct CropOptions {
    pub images_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Number of images cropped at the same time
    pub parallelism: usize,
    /// Only crop annotations of these category names; all of them if None
    pub categories: Option<HashSet<String>>,
}

impl CropOptions {
    pub fn new(images_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> CropOptions {
        CropOptions {
            images_dir: images_dir.into(),
            output_dir: output_dir.into(),
            parallelism: 1,
            categories: None,
        }
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> CropOptions {
        self.parallelism = parallelism;
        self
    }

    /// Restricts cropping to the given category names. An empty list means no
    /// restriction.
    pub fn with_categories<I, S>(mut self, names: I) -> CropOptions
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: HashSet<String> = names.into_iter().map(Into::into).collect();
        self.categories = if names.is_empty() { None } else { Some(names) };
        self
    }
}

/// An image whose crops could not all be written.
#[derive(Debug)]
pub struct CropFailure {
    pub file_name: String,
    pub error: DatasetError,
}

#[derive(Debug, Default)]
pub struct CropReport {
    pub images_processed: usize,
    /// Images without annotations to crop
    pub images_skipped: usize,
    pub crops_written: usize,
    pub failures: Vec<CropFailure>,
}

impl CropReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Crops all annotations of `dataset` on a pool of `options.parallelism` threads.
///
/// A failing image does not stop the others; its error ends up in the report.
/// Only problems setting the run up (output directory, thread pool) are returned
/// as `Err`.
pub fn crop(dataset: &CocoDataset, options: &CropOptions) -> DatasetResult<CropReport> {
    create_dir(&options.output_dir)?;
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.parallelism.max(1))
        .build()?;

    let selected_categories = selected_category_ids(dataset, options.categories.as_ref());
    let is_selected = |ann: &Annotation| {
        selected_categories
            .as_ref()
            .map_or(true, |ids| ids.contains(&ann.category_id))
    };

    let start = Instant::now();
    let mut skipped = 0;
    let mut jobs: Vec<(&Image, Vec<&Annotation>)> = vec![];
    for img in dataset.images() {
        let anns: Vec<&Annotation> = dataset
            .annotations_for_image(img.id)
            .into_iter()
            .filter(|&ann| is_selected(ann))
            .collect();
        if anns.is_empty() {
            skipped += 1;
        } else {
            jobs.push((img, anns));
        }
    }

    let results: Vec<(&Image, DatasetResult<usize>)> = pool.install(|| {
        jobs.par_iter()
            .map(|(img, anns)| (*img, crop_one_image(dataset, img, anns, options)))
            .collect()
    });

    let mut report = CropReport {
        images_skipped: skipped,
        ..CropReport::default()
    };
    for (img, result) in results {
        match result {
            Ok(written) => {
                report.images_processed += 1;
                report.crops_written += written;
            }
            Err(error) => {
                tracing::error!("error cropping {}: {}", img.file_name, error);
                report.failures.push(CropFailure {
                    file_name: img.file_name.clone(),
                    error,
                });
            }
        }
    }
    tracing::info!(
        "completed cropping dataset in {:.2} seconds: {} crops from {} images, {} failed",
        start.elapsed().as_secs_f64(),
        report.crops_written,
        report.images_processed,
        report.failures.len()
    );
    Ok(report)
}

fn selected_category_ids(
    dataset: &CocoDataset,
    names: Option<&HashSet<String>>,
) -> Option<HashSet<u64>> {
    let names = names?;
    let ids = names
        .iter()
        .filter_map(|name| {
            let id = dataset.category_id(name);
            if id.is_none() {
                tracing::warn!("category '{}' is not in the dataset, nothing to crop", name);
            }
            id
        })
        .collect();
    Some(ids)
}

fn crop_one_image(
    dataset: &CocoDataset,
    img: &Image,
    anns: &[&Annotation],
    options: &CropOptions,
) -> DatasetResult<usize> {
    let img_path = options.images_dir.join(&img.file_name);
    let rgb = image::open(&img_path)
        .map_err(|source| DatasetError::Image {
            path: img_path.clone(),
            source,
        })?
        .to_rgb8();

    let mut written = 0;
    for ann in anns {
        let category_name = dataset
            .category_name(ann.category_id)
            .ok_or(DatasetError::UnknownReference {
                annotation_id: ann.id,
                entity: "category",
                id: ann.category_id,
            })?;
        let rect = CropRect::from_bbox(&ann.bbox, rgb.width(), rgb.height()).ok_or_else(|| {
            DatasetError::EmptyCrop {
                annotation_id: ann.id,
                file_name: img.file_name.clone(),
            }
        })?;
        let category_dir = options.output_dir.join(category_name);
        create_dir(&category_dir)?;
        let out_path = category_dir.join(format!("{}.jpg", ann.id));
        imageops::crop_imm(&rgb, rect.left, rect.top, rect.width, rect.height)
            .to_image()
            .save(&out_path)
            .map_err(|source| DatasetError::Image {
                path: out_path.clone(),
                source,
            })?;
        written += 1;
    }
    Ok(written)
}

// create_dir_all tolerates another worker creating the same directory first
fn create_dir(dir: &Path) -> DatasetResult<()> {
    fs::create_dir_all(dir).map_err(|source| DatasetError::Io {
        path: dir.to_path_buf(),
        source,
    })
}
