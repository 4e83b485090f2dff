use std::path::Path;

use super::CocoDataset;
use crate::error::{DatasetError, DatasetResult};

impl CocoDataset {
    /// Merges `other` into this dataset.
    ///
    /// Images and categories are matched on file name and category name, so an
    /// image present in both datasets ends up once, under the id it already had
    /// here. Every annotation of `other` is added under a fresh id, pointing at the
    /// images and categories it resolves to in this dataset.
    pub fn extend(&mut self, other: &CocoDataset) -> DatasetResult<()> {
        for image in other.images() {
            self.add_image(image.clone());
        }
        for category in other.categories() {
            self.add_category(category.clone());
        }
        for ann in other.annotations() {
            let image_id = other
                .image_name(ann.image_id)
                .and_then(|name| self.image_id(name))
                .ok_or(DatasetError::UnknownReference {
                    annotation_id: ann.id,
                    entity: "image",
                    id: ann.image_id,
                })?;
            let category_id = other
                .category_name(ann.category_id)
                .and_then(|name| self.category_id(name))
                .ok_or(DatasetError::UnknownReference {
                    annotation_id: ann.id,
                    entity: "category",
                    id: ann.category_id,
                })?;
            self.add_annotation(ann.clone(), image_id, category_id)?;
        }
        Ok(())
    }
}

/// Folds the datasets left to right into the first one.
pub fn merge<I>(datasets: I) -> DatasetResult<CocoDataset>
where
    I: IntoIterator<Item = CocoDataset>,
{
    let mut datasets = datasets.into_iter();
    let mut merged = datasets.next().ok_or(DatasetError::EmptyMerge)?;
    for dataset in datasets {
        merged.extend(&dataset)?;
    }
    Ok(merged)
}

/// Loads and merges COCO files in the given order. Every path must be an
/// existing `.json` file; this is checked before anything is loaded.
pub fn merge_files<P: AsRef<Path>>(paths: &[P]) -> DatasetResult<CocoDataset> {
    if paths.is_empty() {
        return Err(DatasetError::EmptyMerge);
    }
    if let Some(bad) = paths.iter().map(|p| p.as_ref()).find(|p| !is_json_file(p)) {
        return Err(DatasetError::NotJson(bad.to_path_buf()));
    }
    let mut merged = CocoDataset::load(&paths[0])?;
    for path in &paths[1..] {
        let coco = CocoDataset::load(path)?;
        merged.extend(&coco)?;
        tracing::info!(
            "merged {}, now {} images and {} annotations",
            path.as_ref().display(),
            merged.images().len(),
            merged.annotations().len()
        );
    }
    Ok(merged)
}

fn is_json_file(path: &Path) -> bool {
    path.is_file() && path.extension().map_or(false, |ext| ext == "json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::coco_dataset::tests::small_dataset;
    use crate::dataset::coco_dataset::{Annotation, Category, Image};
    use std::collections::HashSet;

    fn dataset(
        images: &[(u64, &str)],
        categories: &[(u64, &str)],
        anns: &[(u64, u64, u64, [f64; 4])],
    ) -> CocoDataset {
        let images = images
            .iter()
            .map(|&(id, name)| Image {
                id,
                file_name: name.to_string(),
                width: 100,
                height: 100,
            })
            .collect();
        let categories = categories
            .iter()
            .map(|&(id, name)| Category {
                id,
                name: name.to_string(),
            })
            .collect();
        let annotations = anns
            .iter()
            .map(|&(id, image_id, category_id, bbox)| {
                let mut ann = Annotation::new(bbox);
                ann.id = id;
                ann.image_id = image_id;
                ann.category_id = category_id;
                ann
            })
            .collect();
        CocoDataset::from_parts(images, annotations, categories).unwrap()
    }

    fn triples(coco: &CocoDataset) -> HashSet<(String, String, String)> {
        coco.annotations()
            .iter()
            .map(|ann| {
                (
                    coco.image_name(ann.image_id).unwrap().to_string(),
                    coco.category_name(ann.category_id).unwrap().to_string(),
                    format!("{:?}", ann.bbox),
                )
            })
            .collect()
    }

    #[test]
    fn colliding_file_name_is_deduplicated() {
        let mut a = dataset(
            &[(1, "a.jpg"), (2, "b.jpg")],
            &[(1, "cat")],
            &[(1, 1, 1, [0., 0., 10., 10.])],
        );
        let b = dataset(
            &[(1, "b.jpg"), (2, "c.jpg")],
            &[(1, "cat")],
            &[(1, 1, 1, [5., 5., 5., 5.])],
        );
        a.extend(&b).unwrap();

        let names: Vec<_> = a.images().iter().map(|i| i.file_name.as_str()).collect();
        assert_eq!(names, vec!["a.jpg", "b.jpg", "c.jpg"]);
        assert_eq!(a.categories().len(), 1);
        assert_eq!(a.annotations().len(), 2);
        let remapped = &a.annotations()[1];
        assert_eq!(remapped.id, 2);
        assert_eq!(remapped.image_id, a.image_id("b.jpg").unwrap());
        assert_eq!(remapped.image_id, 2);
        assert_eq!(remapped.bbox, [5., 5., 5., 5.]);
    }

    #[test]
    fn merging_with_itself_doubles_annotations_only() {
        let mut coco = small_dataset();
        let copy = coco.clone();
        coco.extend(&copy).unwrap();
        assert_eq!(coco.images().len(), copy.images().len());
        assert_eq!(coco.categories().len(), copy.categories().len());
        assert_eq!(coco.annotations().len(), 2 * copy.annotations().len());
        let ids: HashSet<u64> = coco.annotations().iter().map(|a| a.id).collect();
        assert_eq!(ids.len(), coco.annotations().len());
    }

    #[test]
    fn category_ids_are_remapped_by_name() {
        let mut a = dataset(&[(1, "a.jpg")], &[(1, "cat"), (2, "dog")], &[]);
        let b = dataset(
            &[(5, "z.jpg")],
            &[(3, "bus"), (9, "dog")],
            &[(1, 5, 3, [0., 0., 1., 1.]), (2, 5, 9, [0., 0., 2., 2.])],
        );
        a.extend(&b).unwrap();
        let names: Vec<_> = a
            .annotations()
            .iter()
            .map(|ann| a.category_name(ann.category_id).unwrap())
            .collect();
        assert_eq!(names, vec!["bus", "dog"]);
        assert_eq!(a.category_id("bus"), Some(3));
        assert_eq!(a.category_id("dog"), Some(2));
        assert_eq!(a.image_id("z.jpg"), Some(2));
    }

    #[test]
    fn merge_is_associative_on_natural_keys() {
        let a = dataset(
            &[(1, "a.jpg"), (2, "b.jpg")],
            &[(1, "cat")],
            &[(1, 1, 1, [0., 0., 1., 1.])],
        );
        let b = dataset(
            &[(1, "b.jpg"), (2, "c.jpg")],
            &[(1, "dog"), (2, "cat")],
            &[(1, 1, 1, [1., 1., 1., 1.]), (2, 2, 2, [2., 2., 2., 2.])],
        );
        let c = dataset(&[(3, "c.jpg")], &[(4, "dog")], &[(8, 3, 4, [3., 3., 3., 3.])]);

        let left = merge(vec![merge(vec![a.clone(), b.clone()]).unwrap(), c.clone()]).unwrap();
        let right = merge(vec![a, merge(vec![b, c]).unwrap()]).unwrap();
        assert_eq!(triples(&left), triples(&right));
        assert_eq!(left.images().len(), 3);
        assert_eq!(right.images().len(), 3);
    }

    #[test]
    fn merge_of_nothing_is_an_error() {
        assert!(matches!(merge(Vec::new()), Err(DatasetError::EmptyMerge)));
        let no_paths: Vec<&str> = vec![];
        assert!(matches!(merge_files(&no_paths), Err(DatasetError::EmptyMerge)));
    }

    #[test]
    fn merge_files_checks_every_input_first() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("a.json");
        small_dataset().save(&good).unwrap();
        let txt = dir.path().join("b.txt");
        std::fs::write(&txt, "{}").unwrap();

        let err = merge_files(&[good.clone(), txt.clone()]).unwrap_err();
        assert!(matches!(err, DatasetError::NotJson(p) if p == txt));

        let merged = merge_files(&[good.clone(), good]).unwrap();
        assert_eq!(merged.images().len(), 2);
        assert_eq!(merged.annotations().len(), 6);
    }
}
