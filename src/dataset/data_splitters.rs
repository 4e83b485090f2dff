//! Train/test splitting of a `CocoDataset`.
//!
//! Every strategy decides which images go to which partition; annotations then
//! follow their image. Both partitions keep the full category list of the
//! source so class indices stay the same across partitions.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::dataset::coco_dataset::CocoDataset;
use crate::error::{DatasetError, DatasetResult};

mod multi_object_split;
mod random_split;
mod single_object_split;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitMode {
    /// Shuffle images, cut at the ratio
    Random,
    /// Stratified per category, assuming one object per image
    StratifiedSingleObject,
    /// Stratified over images carrying several categories
    StratifiedMultiObject,
}

impl SplitMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SplitMode::Random => "random",
            SplitMode::StratifiedSingleObject => "strat_single_obj",
            SplitMode::StratifiedMultiObject => "strat_multi_obj",
        }
    }
}

impl FromStr for SplitMode {
    type Err = DatasetError;

    fn from_str(mode: &str) -> Result<Self, Self::Err> {
        match mode {
            "random" => Ok(SplitMode::Random),
            "strat_single_obj" => Ok(SplitMode::StratifiedSingleObject),
            "strat_multi_obj" | "strat" => Ok(SplitMode::StratifiedMultiObject),
            other => Err(DatasetError::UnsupportedMode(other.to_string())),
        }
    }
}

impl fmt::Display for SplitMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct SplitOptions {
    /// Share of the data going to the second (test) partition, within `[0, 1]`
    pub ratio: f64,
    pub mode: SplitMode,
    /// Categories that never drive the stratified multi-object allocation
    pub skip_categories: Vec<String>,
    /// Fixed seed for a reproducible split
    pub seed: Option<u64>,
}

impl Default for SplitOptions {
    fn default() -> Self {
        SplitOptions {
            ratio: 0.2,
            mode: SplitMode::Random,
            skip_categories: vec![],
            seed: None,
        }
    }
}

impl SplitOptions {
    fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }
}

/// Partition side an image was assigned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Train,
    Test,
}

#[derive(Debug, Default)]
struct ImageAssignment {
    train: HashSet<u64>,
    test: HashSet<u64>,
}

impl ImageAssignment {
    fn assign(&mut self, image_id: u64, side: Side) {
        match side {
            Side::Train => self.train.insert(image_id),
            Side::Test => self.test.insert(image_id),
        };
    }

    fn contains(&self, image_id: u64) -> bool {
        self.train.contains(&image_id) || self.test.contains(&image_id)
    }
}

/// Splits `dataset` into `(train, test)` partitions.
pub fn split(
    dataset: &CocoDataset,
    options: &SplitOptions,
) -> DatasetResult<(CocoDataset, CocoDataset)> {
    let mut rng = options.rng();
    split_with_rng(
        dataset,
        options.ratio,
        options.mode,
        &options.skip_categories,
        &mut rng,
    )
}

pub fn split_with_rng<R: Rng + ?Sized>(
    dataset: &CocoDataset,
    ratio: f64,
    mode: SplitMode,
    skip_categories: &[String],
    rng: &mut R,
) -> DatasetResult<(CocoDataset, CocoDataset)> {
    if !(0.0..=1.0).contains(&ratio) {
        return Err(DatasetError::InvalidRatio(ratio));
    }
    if ratio == 0. {
        return Ok((dataset.clone(), CocoDataset::new()));
    }

    let assignment = match mode {
        SplitMode::Random => random_split::random_split(dataset, ratio, rng),
        SplitMode::StratifiedSingleObject => {
            single_object_split::single_object_split(dataset, ratio, rng)
        }
        SplitMode::StratifiedMultiObject => {
            let skip = skip_category_ids(dataset, skip_categories);
            multi_object_split::multi_object_split(dataset, ratio, &skip, rng)
        }
    };
    debug_assert!(assignment.train.is_disjoint(&assignment.test));

    let (train, test) = partition(dataset, &assignment);
    tracing::info!(
        "{} split of {} images: {} train / {} test",
        mode,
        dataset.images().len(),
        train.images().len(),
        test.images().len()
    );
    Ok((train, test))
}

/// Splits off a test partition and then a validation partition from what is
/// left, returning `(train, val, test)`.
pub fn split_three_way(
    dataset: &CocoDataset,
    options: &SplitOptions,
    val_ratio: f64,
) -> DatasetResult<(CocoDataset, CocoDataset, CocoDataset)> {
    let mut rng = options.rng();
    let (train, test) = split_with_rng(
        dataset,
        options.ratio,
        options.mode,
        &options.skip_categories,
        &mut rng,
    )?;
    let (train, val) = split_with_rng(
        &train,
        val_ratio,
        options.mode,
        &options.skip_categories,
        &mut rng,
    )?;
    Ok((train, val, test))
}

fn skip_category_ids(dataset: &CocoDataset, names: &[String]) -> HashSet<u64> {
    names
        .iter()
        .filter_map(|name| {
            let id = dataset.category_id(name);
            if id.is_none() {
                tracing::warn!("skip category '{}' is not in the dataset, ignoring", name);
            }
            id
        })
        .collect()
}

fn partition(dataset: &CocoDataset, assignment: &ImageAssignment) -> (CocoDataset, CocoDataset) {
    let pick = |image_ids: &HashSet<u64>| {
        let images = dataset
            .images()
            .iter()
            .filter(|img| image_ids.contains(&img.id))
            .cloned()
            .collect();
        let annotations = dataset
            .annotations()
            .iter()
            .filter(|ann| image_ids.contains(&ann.image_id))
            .cloned()
            .collect();
        CocoDataset::assemble(images, annotations, dataset.categories().to_vec())
    };
    (pick(&assignment.train), pick(&assignment.test))
}
