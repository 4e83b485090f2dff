use std::collections::HashSet;

use itertools::Itertools;
use rand::seq::SliceRandom;
use rand::Rng;

use super::ImageAssignment;
use crate::dataset::coco_dataset::CocoDataset;

/// Stratified split for datasets with one object per image.
///
/// Annotations are grouped per category and every group is split on its own:
/// `ceil(ratio * n)` annotations go to test, never all of them, and a category
/// with a single annotation goes entirely to train. The partitions are made of
/// the images those annotations sit on. Should an image still end up on both
/// sides (it shows more than one object), it stays in train.
pub(super) fn single_object_split<R: Rng + ?Sized>(
    dataset: &CocoDataset,
    ratio: f64,
    rng: &mut R,
) -> ImageAssignment {
    let mut by_category = dataset
        .annotations()
        .iter()
        .map(|ann| (ann.category_id, ann.image_id))
        .into_group_map();

    let mut train = HashSet::new();
    let mut test = HashSet::new();
    // category order keeps a seeded split reproducible
    for category in dataset.categories() {
        let mut image_ids = match by_category.remove(&category.id) {
            Some(ids) => ids,
            None => continue,
        };
        if image_ids.len() == 1 {
            train.extend(image_ids);
            continue;
        }
        image_ids.shuffle(rng);
        let test_count = test_share(ratio, image_ids.len());
        let (test_ids, train_ids) = image_ids.split_at(test_count);
        test.extend(test_ids.iter().copied());
        train.extend(train_ids.iter().copied());
    }

    let shared = test.intersection(&train).count();
    if shared > 0 {
        tracing::warn!(
            "{} images carry annotations on both sides of the split, keeping them in train",
            shared
        );
        test.retain(|id| !train.contains(id));
    }
    ImageAssignment { train, test }
}

/// Number of items out of `n` (n >= 2) going to test: at least one, at most `n - 1`.
fn test_share(ratio: f64, n: usize) -> usize {
    // the epsilon keeps 0.2 * 5 from rounding up to 2
    let wanted = (ratio * n as f64 - 1e-9).ceil() as usize;
    wanted.clamp(1, n - 1)
}
