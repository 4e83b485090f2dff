//! Read-only aggregates over a dataset, used by dashboards and the `stats` command.

use std::collections::BTreeMap;

use itertools::{Itertools, MinMaxResult};
use serde::Serialize;

use crate::dataset::coco_dataset::CocoDataset;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetStats {
    /// Mean over images with at least one object, truncated
    pub avg_obj_per_image: usize,
    pub min_obj_per_image: usize,
    pub max_obj_per_image: usize,
    pub count_objs_per_image: BTreeMap<u64, usize>,
    pub count_objs_per_category: BTreeMap<String, usize>,
    /// Average annotation score per category
    pub class_scores: BTreeMap<String, f64>,
    pub ann_relative_sizes: Vec<RelativeSize>,
    /// `(width, height)` per image id
    pub img_sizes: BTreeMap<u64, (u32, u32)>,
}

/// Bbox extents relative to the image they are on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelativeSize {
    pub width: f64,
    pub height: f64,
    pub category_id: u64,
}

pub fn compute_stats(dataset: &CocoDataset) -> DatasetStats {
    let img_sizes: BTreeMap<u64, (u32, u32)> = dataset
        .images()
        .iter()
        .map(|img| (img.id, (img.width, img.height)))
        .collect();

    let mut count_objs_per_image: BTreeMap<u64, usize> = BTreeMap::new();
    let mut count_per_category_id: BTreeMap<u64, usize> = BTreeMap::new();
    let mut score_sums: BTreeMap<u64, f64> = BTreeMap::new();
    let mut ann_relative_sizes = Vec::with_capacity(dataset.annotations().len());
    for ann in dataset.annotations() {
        *count_objs_per_image.entry(ann.image_id).or_default() += 1;
        *count_per_category_id.entry(ann.category_id).or_default() += 1;
        *score_sums.entry(ann.category_id).or_default() += ann.score;
        if let Some(&(width, height)) = img_sizes.get(&ann.image_id) {
            ann_relative_sizes.push(RelativeSize {
                width: ann.bbox[2] / width as f64,
                height: ann.bbox[3] / height as f64,
                category_id: ann.category_id,
            });
        }
    }

    let (min_obj_per_image, max_obj_per_image) = match count_objs_per_image.values().minmax() {
        MinMaxResult::NoElements => (0, 0),
        MinMaxResult::OneElement(&count) => (count, count),
        MinMaxResult::MinMax(&min, &max) => (min, max),
    };
    let avg_obj_per_image = if count_objs_per_image.is_empty() {
        0
    } else {
        count_objs_per_image.values().sum::<usize>() / count_objs_per_image.len()
    };

    let category_name = |category_id: &u64| {
        dataset
            .category_name(*category_id)
            .map(str::to_string)
            .unwrap_or_else(|| category_id.to_string())
    };
    let class_scores = score_sums
        .iter()
        .map(|(category_id, sum)| {
            let count = count_per_category_id[category_id] as f64;
            (category_name(category_id), sum / count)
        })
        .collect();
    let count_objs_per_category = count_per_category_id
        .iter()
        .map(|(category_id, &count)| (category_name(category_id), count))
        .collect();

    DatasetStats {
        avg_obj_per_image,
        min_obj_per_image,
        max_obj_per_image,
        count_objs_per_image,
        count_objs_per_category,
        class_scores,
        ann_relative_sizes,
        img_sizes,
    }
}
