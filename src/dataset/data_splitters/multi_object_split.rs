//! Stratified split for images that show several categories at once.
//!
//! Splitting per category would put an image with a cat and a dog on both
//! sides. Instead images are allocated whole, category by category, starting
//! with the category that is on the most images. The ranking lives in a max-heap
//! whose entries go stale as images get assigned; a stale entry is re-ranked
//! when it reaches the top instead of rebuilding the heap after every image.

use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap, HashSet};

use rand::seq::SliceRandom;
use rand::Rng;

use super::{ImageAssignment, Side};
use crate::dataset::coco_dataset::CocoDataset;

/// Remaining, unassigned part of a category.
#[derive(Debug, Default)]
struct CategoryStats {
    images: BTreeSet<u64>,
    instances: usize,
    /// How many more of its images each side should still receive
    desired_train: f64,
    desired_test: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Rank {
    images: usize,
    instances: usize,
    // lower id wins a tie
    category: Reverse<u64>,
}

impl Rank {
    fn of(category_id: u64, stats: &CategoryStats) -> Rank {
        Rank {
            images: stats.images.len(),
            instances: stats.instances,
            category: Reverse(category_id),
        }
    }
}

/// Images each side should still receive overall.
#[derive(Debug)]
struct Desire {
    train: f64,
    test: f64,
}

impl Desire {
    fn preferred_side(&self) -> Option<Side> {
        if self.test > self.train {
            Some(Side::Test)
        } else if self.train > self.test {
            Some(Side::Train)
        } else {
            None
        }
    }
}

struct Allocator<'a> {
    /// Per annotated image, instance count per category
    image_categories: &'a HashMap<u64, HashMap<u64, usize>>,
    stats: HashMap<u64, CategoryStats>,
    desire: Desire,
    assignment: ImageAssignment,
}

impl<'a> Allocator<'a> {
    fn new(image_categories: &'a HashMap<u64, HashMap<u64, usize>>, ratio: f64) -> Allocator<'a> {
        let mut stats: HashMap<u64, CategoryStats> = HashMap::new();
        for (&image_id, counts) in image_categories {
            for (&category_id, &instances) in counts {
                let entry = stats.entry(category_id).or_default();
                entry.images.insert(image_id);
                entry.instances += instances;
            }
        }
        for entry in stats.values_mut() {
            let total = entry.images.len() as f64;
            entry.desired_test = ratio * total;
            entry.desired_train = (1. - ratio) * total;
        }
        let total = image_categories.len() as f64;
        Allocator {
            image_categories,
            stats,
            desire: Desire {
                train: (1. - ratio) * total,
                test: ratio * total,
            },
            assignment: ImageAssignment::default(),
        }
    }

    /// Side for the next image of `category_id`: whichever side the category
    /// needs more, then whichever side the split as a whole needs more, then a
    /// coin flip.
    fn side_for<R: Rng + ?Sized>(&self, category_id: u64, rng: &mut R) -> Side {
        if let Some(stats) = self.stats.get(&category_id) {
            if stats.desired_test > stats.desired_train {
                return Side::Test;
            }
            if stats.desired_train > stats.desired_test {
                return Side::Train;
            }
        }
        self.desire.preferred_side().unwrap_or_else(|| {
            if rng.gen_bool(0.5) {
                Side::Test
            } else {
                Side::Train
            }
        })
    }

    /// Assigns an image and takes it out of every category it shows. Categories
    /// left without images are dropped.
    fn assign(&mut self, image_id: u64, side: Side) {
        let image_categories = self.image_categories;
        if let Some(counts) = image_categories.get(&image_id) {
            for (category_id, &instances) in counts {
                let exhausted = match self.stats.get_mut(category_id) {
                    Some(stats) => {
                        stats.images.remove(&image_id);
                        stats.instances -= instances;
                        match side {
                            Side::Train => stats.desired_train -= 1.,
                            Side::Test => stats.desired_test -= 1.,
                        }
                        stats.images.is_empty()
                    }
                    None => false,
                };
                if exhausted {
                    self.stats.remove(category_id);
                }
            }
        }
        match side {
            Side::Train => self.desire.train -= 1.,
            Side::Test => self.desire.test -= 1.,
        }
        self.assignment.assign(image_id, side);
    }
}

pub(super) fn multi_object_split<R: Rng + ?Sized>(
    dataset: &CocoDataset,
    ratio: f64,
    skip_categories: &HashSet<u64>,
    rng: &mut R,
) -> ImageAssignment {
    let mut image_categories: HashMap<u64, HashMap<u64, usize>> = HashMap::new();
    for ann in dataset.annotations() {
        *image_categories
            .entry(ann.image_id)
            .or_default()
            .entry(ann.category_id)
            .or_default() += 1;
    }
    let mut allocator = Allocator::new(&image_categories, ratio);
    let order = allocate_by_rank(&mut allocator, skip_categories, rng);
    tracing::debug!("categories allocated in order {:?}", order);

    // images showing only skipped categories
    let mut leftover: Vec<u64> = image_categories
        .keys()
        .copied()
        .filter(|&image_id| !allocator.assignment.contains(image_id))
        .collect();
    leftover.sort_unstable();
    leftover.shuffle(rng);
    for image_id in leftover {
        let side = allocator.desire.preferred_side().unwrap_or(Side::Train);
        allocator.assign(image_id, side);
    }

    allocator.assignment
}

/// Allocates the images of every category not in `skip_categories`, the
/// category on the most unassigned images first. Returns the order in which
/// categories were allocated; categories emptied by earlier ones are absent.
fn allocate_by_rank<R: Rng + ?Sized>(
    allocator: &mut Allocator<'_>,
    skip_categories: &HashSet<u64>,
    rng: &mut R,
) -> Vec<u64> {
    let mut queue: BinaryHeap<Rank> = allocator
        .stats
        .iter()
        .filter(|(category_id, _)| !skip_categories.contains(*category_id))
        .map(|(&category_id, stats)| Rank::of(category_id, stats))
        .collect();

    let mut order = vec![];
    while let Some(top) = queue.pop() {
        let category_id = top.category.0;
        let current = match allocator.stats.get(&category_id) {
            Some(stats) => Rank::of(category_id, stats),
            // every image of the category was taken by earlier ones
            None => continue,
        };
        if current != top {
            queue.push(current);
            continue;
        }

        let mut images: Vec<u64> = allocator.stats[&category_id]
            .images
            .iter()
            .copied()
            .collect();
        images.shuffle(rng);
        tracing::trace!(
            "allocating {} images of category {} ({} instances)",
            images.len(),
            category_id,
            top.instances
        );
        for image_id in images {
            let side = allocator.side_for(category_id, rng);
            allocator.assign(image_id, side);
        }
        order.push(category_id);
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use crate::dataset::coco_dataset::{Annotation, Category, Image};
    use crate::dataset::data_splitters::tests::synthetic;
    use crate::dataset::data_splitters::{split, SplitMode, SplitOptions};

    fn options(ratio: f64, seed: u64) -> SplitOptions {
        SplitOptions {
            ratio,
            mode: SplitMode::StratifiedMultiObject,
            skip_categories: vec![],
            seed: Some(seed),
        }
    }

    fn images_with(coco: &CocoDataset, name: &str) -> usize {
        let id = coco.category_id(name).unwrap();
        coco.images()
            .iter()
            .filter(|img| coco.annotations_for_image(img.id).iter().any(|a| a.category_id == id))
            .count()
    }

    #[test]
    fn rank_orders_by_images_then_instances() {
        let mut heap = BinaryHeap::new();
        heap.push(Rank {
            images: 3,
            instances: 9,
            category: Reverse(1),
        });
        heap.push(Rank {
            images: 5,
            instances: 5,
            category: Reverse(2),
        });
        heap.push(Rank {
            images: 5,
            instances: 7,
            category: Reverse(3),
        });
        heap.push(Rank {
            images: 5,
            instances: 7,
            category: Reverse(4),
        });
        let order: Vec<u64> = std::iter::from_fn(|| heap.pop()).map(|r| r.category.0).collect();
        assert_eq!(order, vec![3, 4, 2, 1]);
    }

    #[test]
    fn assignment_updates_every_category_of_the_image() {
        let mut image_categories: HashMap<u64, HashMap<u64, usize>> = HashMap::new();
        image_categories.insert(1, [(10, 2), (20, 1)].into_iter().collect());
        image_categories.insert(2, [(10, 1)].into_iter().collect());
        let mut allocator = Allocator::new(&image_categories, 0.5);
        assert_eq!(allocator.stats[&10].instances, 3);

        allocator.assign(1, Side::Test);
        assert_eq!(allocator.stats[&10].images.len(), 1);
        assert_eq!(allocator.stats[&10].instances, 1);
        assert_eq!(allocator.stats[&10].desired_test, 0.);
        // category 20 had only image 1
        assert!(!allocator.stats.contains_key(&20));
        assert_eq!(allocator.desire.test, 0.);
        assert_eq!(allocator.side_for(10, &mut rand::thread_rng()), Side::Train);
    }

    #[test]
    fn stale_ranks_are_reordered_and_emptied_categories_dropped() {
        // 1 on images 1..=5, 2 on 1, 2, 3 and 6, 3 on 7..=9, 4 on 4 and 5.
        // Once 1 is allocated, 2 has a single image left and falls behind 3,
        // and 4 has nothing left.
        let mut image_categories: HashMap<u64, HashMap<u64, usize>> = HashMap::new();
        let mut show = |image_id: u64, category_id: u64| {
            image_categories
                .entry(image_id)
                .or_default()
                .insert(category_id, 1);
        };
        for image_id in 1..=5 {
            show(image_id, 1);
        }
        for image_id in [1, 2, 3, 6] {
            show(image_id, 2);
        }
        for image_id in 7..=9 {
            show(image_id, 3);
        }
        for image_id in [4, 5] {
            show(image_id, 4);
        }

        let mut allocator = Allocator::new(&image_categories, 0.3);
        let mut rng = StdRng::seed_from_u64(5);
        let order = allocate_by_rank(&mut allocator, &HashSet::new(), &mut rng);
        assert_eq!(order, vec![1, 3, 2]);
        assert!(allocator.stats.is_empty());
        let assigned = allocator.assignment.train.len() + allocator.assignment.test.len();
        assert_eq!(assigned, 9);
    }

    #[test]
    fn skipped_categories_are_never_ranked() {
        let mut image_categories: HashMap<u64, HashMap<u64, usize>> = HashMap::new();
        image_categories.insert(1, [(1, 1), (2, 3)].into_iter().collect());
        image_categories.insert(2, [(2, 1)].into_iter().collect());
        image_categories.insert(3, [(3, 1)].into_iter().collect());

        let mut allocator = Allocator::new(&image_categories, 0.5);
        let skip: HashSet<u64> = [2].into_iter().collect();
        let mut rng = StdRng::seed_from_u64(9);
        let order = allocate_by_rank(&mut allocator, &skip, &mut rng);
        assert_eq!(order, vec![1, 3]);
        // image 2 only shows the skipped category
        assert!(!allocator.assignment.contains(2));
    }

    #[test]
    fn images_never_land_on_both_sides() {
        let coco = synthetic(90);
        let (train, test) = split(&coco, &options(0.25, 17)).unwrap();
        let train_ids: HashSet<u64> = train.images().iter().map(|i| i.id).collect();
        assert!(test.images().iter().all(|i| !train_ids.contains(&i.id)));
        assert_eq!(train.images().len() + test.images().len(), 90);
        assert_eq!(
            train.annotations().len() + test.annotations().len(),
            coco.annotations().len()
        );
    }

    #[test]
    fn categories_keep_their_proportion() {
        let coco = synthetic(120);
        let ratio = 0.2;
        let (train, test) = split(&coco, &options(ratio, 23)).unwrap();
        let overall = test.images().len() as f64 / coco.images().len() as f64;
        assert!((overall - ratio).abs() < 0.1, "overall test share {}", overall);
        for category in coco.categories() {
            let total = images_with(&coco, &category.name) as f64;
            let in_test = images_with(&test, &category.name) as f64;
            assert!(in_test > 0.);
            assert!(images_with(&train, &category.name) > 0);
            assert!(
                (in_test / total - ratio).abs() < 0.15,
                "category {} test share {}",
                category.name,
                in_test / total
            );
        }
    }

    #[test]
    fn skipped_categories_follow_their_images() {
        let mut coco = synthetic(40);
        // a category only ever seen on its own images
        let lonely = coco.add_category(Category::new("lonely"));
        for i in 0..5 {
            let image_id = coco.add_image(Image::new(format!("lonely{}.jpg", i), 16, 16));
            coco.add_annotation(Annotation::new([0., 0., 2., 2.]), image_id, lonely)
                .unwrap();
        }
        let mut skip = options(0.2, 31);
        skip.skip_categories = vec!["c0".to_string(), "lonely".to_string(), "unknown".to_string()];
        let (train, test) = split(&coco, &skip).unwrap();
        assert_eq!(train.images().len() + test.images().len(), 45);
        assert_eq!(
            train.annotations().len() + test.annotations().len(),
            coco.annotations().len()
        );
        assert_eq!(images_with(&train, "lonely") + images_with(&test, "lonely"), 5);
    }

    #[test]
    fn images_without_annotations_are_left_out() {
        let mut coco = synthetic(12);
        coco.add_image(Image::new("background.jpg", 16, 16));
        let (train, test) = split(&coco, &options(0.5, 2)).unwrap();
        assert_eq!(train.images().len() + test.images().len(), 12);
        assert_eq!(train.image_id("background.jpg"), None);
        assert_eq!(test.image_id("background.jpg"), None);
    }
}
