pub mod common_structs;

pub mod coco_dataset;
pub mod cropping;
pub mod data_splitters;
pub mod stats;
