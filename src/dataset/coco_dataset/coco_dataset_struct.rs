use serde::{Deserialize, Serialize};

/// The on-disk COCO document. Keys other than these three (`info`, `licenses`, ...)
/// are accepted on read and dropped on write.
#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CocoDatasetJson {
    #[serde(default)]
    pub images: Vec<Image>,
    #[serde(default)]
    pub annotations: Vec<Annotation>,
    #[serde(default)]
    pub categories: Vec<Category>,
}

#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub id: u64,
    pub file_name: String,
    pub width: u32,
    pub height: u32,
}

impl Image {
    /// A new image record. The id is assigned when it is added to a dataset.
    pub fn new(file_name: impl Into<String>, width: u32, height: u32) -> Image {
        Image {
            id: 0,
            file_name: file_name.into(),
            width,
            height,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub id: u64,
    pub image_id: u64,
    pub category_id: u64,
    #[serde(default = "default_score")]
    pub score: f64,
    /// `[x, y, width, height]`, top-left corner plus extents
    pub bbox: [f64; 4],
    #[serde(default)]
    pub segmentation: Segmentation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area: Option<f64>,
    #[serde(default)]
    pub iscrowd: u8,
}

fn default_score() -> f64 {
    1.0
}

impl Annotation {
    /// A plain bounding box annotation. Ids and references are filled in by
    /// `CocoDataset::add_annotation`.
    pub fn new(bbox: [f64; 4]) -> Annotation {
        Annotation {
            id: 0,
            image_id: 0,
            category_id: 0,
            score: default_score(),
            bbox,
            segmentation: Segmentation::default(),
            area: Some(bbox[2] * bbox[3]),
            iscrowd: 0,
        }
    }

    pub fn with_score(mut self, score: f64) -> Annotation {
        self.score = score;
        self
    }
}

/// Either a single flat polygon or a list of polygons. An empty list is the default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Segmentation {
    Polygons(Vec<Vec<f64>>),
    Polygon(Vec<f64>),
}

impl Default for Segmentation {
    fn default() -> Self {
        Segmentation::Polygons(vec![])
    }
}

#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: u64,
    pub name: String,
}

impl Category {
    pub fn new(name: impl Into<String>) -> Category {
        Category {
            id: 0,
            name: name.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extra_keys_are_dropped_and_defaults_applied() {
        let raw = r#"{
            "info": {"year": 2024},
            "licenses": [{"id": 1, "name": "cc", "url": "http://example.com"}],
            "images": [{"id": 1, "file_name": "a.jpg", "width": 640, "height": 480, "license": 1}],
            "annotations": [{"id": 7, "image_id": 1, "category_id": 2, "bbox": [1, 2, 3, 4]}],
            "categories": [{"id": 2, "name": "cat", "supercategory": "animal"}]
        }"#;
        let coco: CocoDatasetJson = serde_json::from_str(raw).unwrap();
        let ann = &coco.annotations[0];
        assert_eq!(ann.score, 1.0);
        assert_eq!(ann.iscrowd, 0);
        assert_eq!(ann.area, None);
        assert_eq!(ann.segmentation, Segmentation::Polygons(vec![]));

        let written = serde_json::to_value(&coco).unwrap();
        assert!(written.get("info").is_none());
        assert!(written["images"][0].get("license").is_none());
        assert!(written["categories"][0].get("supercategory").is_none());
    }

    #[test]
    fn both_segmentation_shapes_parse() {
        let nested: Segmentation = serde_json::from_str("[[1.0, 2.0, 3.0, 4.0]]").unwrap();
        assert_eq!(nested, Segmentation::Polygons(vec![vec![1.0, 2.0, 3.0, 4.0]]));
        let flat: Segmentation = serde_json::from_str("[1.0, 2.0, 3.0]").unwrap();
        assert_eq!(flat, Segmentation::Polygon(vec![1.0, 2.0, 3.0]));
    }

    #[test]
    fn short_bbox_is_rejected() {
        let raw = r#"{"id": 1, "image_id": 1, "category_id": 1, "bbox": [1, 2, 3]}"#;
        assert!(serde_json::from_str::<Annotation>(raw).is_err());
    }
}
