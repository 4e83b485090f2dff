//! The in-memory COCO dataset and its identity-preserving mutations.
//!
//! A `CocoDataset` owns its images, annotations and categories and keeps a set
//! of derived indices in sync with them: file name <-> image id, category name
//! <-> category id, image id -> annotations and the highest id handed out per
//! entity type. Every mutation goes through `&mut self`, so a dataset has a
//! single writer at any time.

use std::collections::{HashMap, HashSet};

use crate::error::{DatasetError, DatasetResult};

pub mod coco_dataset_struct;
mod io;
mod merging;
mod pruning;

pub use coco_dataset_struct::{Annotation, Category, CocoDatasetJson, Image, Segmentation};
pub use merging::{merge, merge_files};
pub use pruning::{FilterOutcome, RemovalOutcome};

#[derive(Default, Debug, Clone)]
pub struct CocoDataset {
    images: Vec<Image>,
    annotations: Vec<Annotation>,
    categories: Vec<Category>,

    image_names_to_ids: HashMap<String, u64>,
    image_ids_to_names: HashMap<u64, String>,
    cat_names_to_ids: HashMap<String, u64>,
    cat_ids_to_names: HashMap<u64, String>,
    /// Positions into `annotations`, grouped by image id
    image_ids_to_anns: HashMap<u64, Vec<usize>>,

    max_image_id: u64,
    max_annotation_id: u64,
    max_category_id: u64,
}

impl CocoDataset {
    pub fn new() -> CocoDataset {
        CocoDataset::default()
    }

    /// Builds a dataset from explicit entity lists, keeping their ids.
    ///
    /// The lists are validated the same way a stored file is: ids must be positive
    /// and unique per type, file names and category names unique, image sizes
    /// positive, bounding boxes finite and non-negative, and every annotation must
    /// reference an image and a category of the same lists.
    pub fn from_parts(
        images: Vec<Image>,
        annotations: Vec<Annotation>,
        categories: Vec<Category>,
    ) -> DatasetResult<CocoDataset> {
        validate_images(&images)?;
        validate_categories(&categories)?;
        validate_annotations(&annotations, &images, &categories)?;
        Ok(CocoDataset::assemble(images, annotations, categories))
    }

    /// Builds the indices over lists already known to be consistent, such as
    /// subsets of an existing dataset.
    pub(crate) fn assemble(
        images: Vec<Image>,
        annotations: Vec<Annotation>,
        categories: Vec<Category>,
    ) -> CocoDataset {
        let mut dataset = CocoDataset {
            images,
            annotations,
            categories,
            ..CocoDataset::default()
        };
        dataset.rebuild_indices();
        dataset
    }

    fn rebuild_indices(&mut self) {
        self.image_names_to_ids = self
            .images
            .iter()
            .map(|img| (img.file_name.clone(), img.id))
            .collect();
        self.image_ids_to_names = self
            .images
            .iter()
            .map(|img| (img.id, img.file_name.clone()))
            .collect();
        self.cat_names_to_ids = self
            .categories
            .iter()
            .map(|cat| (cat.name.clone(), cat.id))
            .collect();
        self.cat_ids_to_names = self
            .categories
            .iter()
            .map(|cat| (cat.id, cat.name.clone()))
            .collect();
        self.rebuild_annotation_index();
        // Removals never lower the counters, so fresh ids are never reused.
        self.max_image_id = self
            .max_image_id
            .max(self.images.iter().map(|e| e.id).max().unwrap_or(0));
        self.max_annotation_id = self
            .max_annotation_id
            .max(self.annotations.iter().map(|e| e.id).max().unwrap_or(0));
        self.max_category_id = self
            .max_category_id
            .max(self.categories.iter().map(|e| e.id).max().unwrap_or(0));
    }

    fn rebuild_annotation_index(&mut self) {
        self.image_ids_to_anns.clear();
        for (position, ann) in self.annotations.iter().enumerate() {
            self.image_ids_to_anns
                .entry(ann.image_id)
                .or_default()
                .push(position);
        }
    }

    /// Adds an image unless one with the same file name exists.
    /// Returns the id the image has in this dataset.
    pub fn add_image(&mut self, mut image: Image) -> u64 {
        if let Some(&existing) = self.image_names_to_ids.get(&image.file_name) {
            return existing;
        }
        let new_id = self.max_image_id + 1;
        image.id = new_id;
        self.image_names_to_ids.insert(image.file_name.clone(), new_id);
        self.image_ids_to_names.insert(new_id, image.file_name.clone());
        self.images.push(image);
        self.max_image_id = new_id;
        new_id
    }

    /// Adds a category unless one with the same name exists.
    /// Returns the id the category has in this dataset.
    pub fn add_category(&mut self, mut category: Category) -> u64 {
        if let Some(&existing) = self.cat_names_to_ids.get(&category.name) {
            return existing;
        }
        let new_id = self.max_category_id + 1;
        category.id = new_id;
        self.cat_names_to_ids.insert(category.name.clone(), new_id);
        self.cat_ids_to_names.insert(new_id, category.name.clone());
        self.categories.push(category);
        self.max_category_id = new_id;
        new_id
    }

    /// Appends an annotation under a fresh id, attached to `image_id` and
    /// `category_id` regardless of the references it carried before.
    /// Annotations are never deduplicated.
    pub fn add_annotation(
        &mut self,
        mut annotation: Annotation,
        image_id: u64,
        category_id: u64,
    ) -> DatasetResult<u64> {
        let new_id = self.max_annotation_id + 1;
        if !self.image_ids_to_names.contains_key(&image_id) {
            return Err(DatasetError::UnknownReference {
                annotation_id: new_id,
                entity: "image",
                id: image_id,
            });
        }
        if !self.cat_ids_to_names.contains_key(&category_id) {
            return Err(DatasetError::UnknownReference {
                annotation_id: new_id,
                entity: "category",
                id: category_id,
            });
        }
        annotation.id = new_id;
        annotation.image_id = image_id;
        annotation.category_id = category_id;
        self.image_ids_to_anns
            .entry(image_id)
            .or_default()
            .push(self.annotations.len());
        self.annotations.push(annotation);
        self.max_annotation_id = new_id;
        Ok(new_id)
    }

    pub fn images(&self) -> &[Image] {
        &self.images
    }

    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty() && self.annotations.is_empty() && self.categories.is_empty()
    }

    pub fn image_id(&self, file_name: &str) -> Option<u64> {
        self.image_names_to_ids.get(file_name).copied()
    }

    pub fn image_name(&self, image_id: u64) -> Option<&str> {
        self.image_ids_to_names.get(&image_id).map(String::as_str)
    }

    pub fn category_id(&self, name: &str) -> Option<u64> {
        self.cat_names_to_ids.get(name).copied()
    }

    pub fn category_name(&self, category_id: u64) -> Option<&str> {
        self.cat_ids_to_names.get(&category_id).map(String::as_str)
    }

    pub fn annotations_for_image(&self, image_id: u64) -> Vec<&Annotation> {
        self.image_ids_to_anns
            .get(&image_id)
            .map(|positions| positions.iter().map(|&p| &self.annotations[p]).collect())
            .unwrap_or_default()
    }

    pub fn annotations_for_image_name(&self, file_name: &str) -> Vec<&Annotation> {
        match self.image_id(file_name) {
            Some(image_id) => self.annotations_for_image(image_id),
            None => {
                tracing::warn!("cannot find image by name {}", file_name);
                vec![]
            }
        }
    }

    pub fn annotation_count_for_image(&self, image_id: u64) -> usize {
        self.image_ids_to_anns.get(&image_id).map_or(0, Vec::len)
    }

    pub fn max_image_id(&self) -> u64 {
        self.max_image_id
    }

    pub fn max_annotation_id(&self) -> u64 {
        self.max_annotation_id
    }

    pub fn max_category_id(&self) -> u64 {
        self.max_category_id
    }

    /// Consumes the dataset into its storage representation.
    pub fn into_json(self) -> CocoDatasetJson {
        CocoDatasetJson {
            images: self.images,
            annotations: self.annotations,
            categories: self.categories,
        }
    }
}

impl TryFrom<CocoDatasetJson> for CocoDataset {
    type Error = DatasetError;

    fn try_from(coco: CocoDatasetJson) -> DatasetResult<CocoDataset> {
        CocoDataset::from_parts(coco.images, coco.annotations, coco.categories)
    }
}

fn validate_images(images: &[Image]) -> DatasetResult<()> {
    let mut ids = HashSet::new();
    let mut names = HashSet::new();
    for img in images {
        if img.id == 0 {
            return Err(DatasetError::Malformed(format!(
                "image '{}' has a non-positive id",
                img.file_name
            )));
        }
        if !ids.insert(img.id) {
            return Err(DatasetError::Malformed(format!(
                "duplicate image id {}",
                img.id
            )));
        }
        if !names.insert(img.file_name.as_str()) {
            return Err(DatasetError::Malformed(format!(
                "duplicate image file name '{}'",
                img.file_name
            )));
        }
        if img.width == 0 || img.height == 0 {
            return Err(DatasetError::Malformed(format!(
                "image {} has an empty size {}x{}",
                img.id, img.width, img.height
            )));
        }
    }
    Ok(())
}

fn validate_categories(categories: &[Category]) -> DatasetResult<()> {
    let mut ids = HashSet::new();
    let mut names = HashSet::new();
    for cat in categories {
        if cat.id == 0 {
            return Err(DatasetError::Malformed(format!(
                "category '{}' has a non-positive id",
                cat.name
            )));
        }
        if !ids.insert(cat.id) {
            return Err(DatasetError::Malformed(format!(
                "duplicate category id {}",
                cat.id
            )));
        }
        if !names.insert(cat.name.as_str()) {
            return Err(DatasetError::Malformed(format!(
                "duplicate category name '{}'",
                cat.name
            )));
        }
    }
    Ok(())
}

fn validate_annotations(
    annotations: &[Annotation],
    images: &[Image],
    categories: &[Category],
) -> DatasetResult<()> {
    let image_ids: HashSet<u64> = images.iter().map(|e| e.id).collect();
    let category_ids: HashSet<u64> = categories.iter().map(|e| e.id).collect();
    let mut ids = HashSet::new();
    for ann in annotations {
        if ann.id == 0 {
            return Err(DatasetError::Malformed(
                "annotation with a non-positive id".to_string(),
            ));
        }
        if !ids.insert(ann.id) {
            return Err(DatasetError::Malformed(format!(
                "duplicate annotation id {}",
                ann.id
            )));
        }
        if ann.bbox.iter().any(|v| !v.is_finite() || *v < 0.) {
            return Err(DatasetError::Malformed(format!(
                "annotation {} has an invalid bbox {:?}",
                ann.id, ann.bbox
            )));
        }
        if !image_ids.contains(&ann.image_id) {
            return Err(DatasetError::UnknownReference {
                annotation_id: ann.id,
                entity: "image",
                id: ann.image_id,
            });
        }
        if !category_ids.contains(&ann.category_id) {
            return Err(DatasetError::UnknownReference {
                annotation_id: ann.id,
                entity: "category",
                id: ann.category_id,
            });
        }
    }
    Ok(())
}
