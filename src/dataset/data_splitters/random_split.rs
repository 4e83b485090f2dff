use rand::seq::SliceRandom;
use rand::Rng;

use super::ImageAssignment;
use crate::dataset::coco_dataset::CocoDataset;

/// Shuffles the images and sends the first `round(ratio * n)` of them to test.
/// Images without annotations are split like any other.
pub(super) fn random_split<R: Rng + ?Sized>(
    dataset: &CocoDataset,
    ratio: f64,
    rng: &mut R,
) -> ImageAssignment {
    let mut image_ids: Vec<u64> = dataset.images().iter().map(|img| img.id).collect();
    image_ids.shuffle(rng);
    let split_index = ((ratio * image_ids.len() as f64).round() as usize).min(image_ids.len());
    let (test, train) = image_ids.split_at(split_index);
    ImageAssignment {
        train: train.iter().copied().collect(),
        test: test.iter().copied().collect(),
    }
}
