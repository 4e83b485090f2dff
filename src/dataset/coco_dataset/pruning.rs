//! Removal of categories and images with cascading cleanup, and read-only
//! filtering of annotations by category.

use std::collections::HashSet;

use super::CocoDataset;

/// What a single removal did. Asking to remove a name the dataset does not
/// know is not an error, but it is reported apart from a removal that took
/// nothing else with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemovalOutcome {
    Removed {
        images: usize,
        annotations: usize,
    },
    UnknownName(String),
}

impl RemovalOutcome {
    pub fn is_unknown(&self) -> bool {
        matches!(self, RemovalOutcome::UnknownName(_))
    }
}

/// Result of `CocoDataset::filter_categories`.
#[derive(Debug, Clone)]
pub struct FilterOutcome {
    pub dataset: CocoDataset,
    /// Requested names that are not categories of the source dataset. When this
    /// is not empty nothing was filtered and `dataset` is empty.
    pub missing: Vec<String>,
    pub removed_annotations: usize,
}

impl FilterOutcome {
    pub fn is_applied(&self) -> bool {
        self.missing.is_empty()
    }
}

impl CocoDataset {
    /// Removes a category and all of its annotations. Images that are left
    /// without annotations because of it are removed too.
    pub fn remove_category(&mut self, name: &str) -> RemovalOutcome {
        let category_id = match self.category_id(name) {
            Some(id) => id,
            None => {
                tracing::warn!("category '{}' is not in the dataset, nothing removed", name);
                return RemovalOutcome::UnknownName(name.to_string());
            }
        };

        let touched_images: HashSet<u64> = self
            .annotations
            .iter()
            .filter(|ann| ann.category_id == category_id)
            .map(|ann| ann.image_id)
            .collect();

        self.categories.retain(|cat| cat.id != category_id);
        self.cat_ids_to_names.remove(&category_id);
        self.cat_names_to_ids.remove(name);

        let before = self.annotations.len();
        self.annotations.retain(|ann| ann.category_id != category_id);
        let removed_annotations = before - self.annotations.len();
        self.rebuild_annotation_index();

        let orphaned: HashSet<u64> = touched_images
            .into_iter()
            .filter(|&image_id| self.annotation_count_for_image(image_id) == 0)
            .collect();
        self.drop_images(&orphaned);

        tracing::info!(
            "removed category '{}' with {} annotations and {} emptied images",
            name,
            removed_annotations,
            orphaned.len()
        );
        RemovalOutcome::Removed {
            images: orphaned.len(),
            annotations: removed_annotations,
        }
    }

    /// Removes an image and every annotation on it.
    pub fn remove_image(&mut self, file_name: &str) -> RemovalOutcome {
        let image_id = match self.image_id(file_name) {
            Some(id) => id,
            None => {
                tracing::warn!("image '{}' is not in the dataset, nothing removed", file_name);
                return RemovalOutcome::UnknownName(file_name.to_string());
            }
        };

        let before = self.annotations.len();
        self.annotations.retain(|ann| ann.image_id != image_id);
        let removed_annotations = before - self.annotations.len();
        self.rebuild_annotation_index();
        self.drop_images(&std::iter::once(image_id).collect());

        tracing::debug!(
            "removed image '{}' with {} annotations",
            file_name,
            removed_annotations
        );
        RemovalOutcome::Removed {
            images: 1,
            annotations: removed_annotations,
        }
    }

    pub fn remove_categories<S: AsRef<str>>(&mut self, names: &[S]) -> Vec<RemovalOutcome> {
        names
            .iter()
            .map(|name| self.remove_category(name.as_ref()))
            .collect()
    }

    pub fn remove_images<S: AsRef<str>>(&mut self, file_names: &[S]) -> Vec<RemovalOutcome> {
        file_names
            .iter()
            .map(|name| self.remove_image(name.as_ref()))
            .collect()
    }

    /// Returns a copy of the dataset without the annotations of the given
    /// categories. Images and categories are kept as they are.
    ///
    /// If any of the names is not a category of this dataset nothing is filtered:
    /// the outcome carries an empty dataset and the missing names.
    pub fn filter_categories<S: AsRef<str>>(&self, names: &[S]) -> FilterOutcome {
        let missing: Vec<String> = names
            .iter()
            .map(|name| name.as_ref())
            .filter(|name| self.category_id(name).is_none())
            .map(str::to_string)
            .collect();
        if !missing.is_empty() {
            tracing::warn!(
                "categories {:?} are not in the dataset, skip filtering",
                missing
            );
            return FilterOutcome {
                dataset: CocoDataset::new(),
                missing,
                removed_annotations: 0,
            };
        }

        let excluded: HashSet<u64> = names
            .iter()
            .filter_map(|name| self.category_id(name.as_ref()))
            .collect();
        let annotations: Vec<_> = self
            .annotations
            .iter()
            .filter(|ann| !excluded.contains(&ann.category_id))
            .cloned()
            .collect();
        let removed_annotations = self.annotations.len() - annotations.len();
        FilterOutcome {
            dataset: CocoDataset::assemble(
                self.images.clone(),
                annotations,
                self.categories.clone(),
            ),
            missing,
            removed_annotations,
        }
    }

    fn drop_images(&mut self, image_ids: &HashSet<u64>) {
        if image_ids.is_empty() {
            return;
        }
        self.images.retain(|img| !image_ids.contains(&img.id));
        for image_id in image_ids {
            if let Some(name) = self.image_ids_to_names.remove(image_id) {
                self.image_names_to_ids.remove(&name);
            }
            self.image_ids_to_anns.remove(image_id);
        }
    }
}
