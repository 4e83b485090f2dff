//! Tools for COCO object detection datasets: load and save, merge, split
//! (random or stratified), prune categories and images, crop annotated regions
//! and compute statistics.

pub mod dataset;
pub mod error;

pub use dataset::coco_dataset::{
    merge, merge_files, Annotation, Category, CocoDataset, FilterOutcome, Image, RemovalOutcome,
};
pub use dataset::cropping::{crop, CropOptions, CropReport};
pub use dataset::data_splitters::{split, split_three_way, SplitMode, SplitOptions};
pub use dataset::stats::{compute_stats, DatasetStats};
pub use error::{DatasetError, DatasetResult};
