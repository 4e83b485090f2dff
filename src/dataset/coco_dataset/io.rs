use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use serde::Serialize;
use serde_json::ser::PrettyFormatter;

use super::{CocoDataset, CocoDatasetJson};
use crate::error::{DatasetError, DatasetResult};

impl CocoDataset {
    /// Reads and validates a COCO json file. Any malformed record fails the whole load.
    pub fn load(path: impl AsRef<Path>) -> DatasetResult<CocoDataset> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| DatasetError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let coco: CocoDatasetJson = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| parse_error(Some(path), e))?;
        let dataset = CocoDataset::try_from(coco)?;
        tracing::debug!(
            "loaded {} with {} images, {} annotations, {} categories",
            path.display(),
            dataset.images().len(),
            dataset.annotations().len(),
            dataset.categories().len()
        );
        Ok(dataset)
    }

    pub fn from_reader<R: Read>(reader: R) -> DatasetResult<CocoDataset> {
        let coco: CocoDatasetJson =
            serde_json::from_reader(reader).map_err(|e| parse_error(None, e))?;
        CocoDataset::try_from(coco)
    }

    pub fn from_json_str(raw: &str) -> DatasetResult<CocoDataset> {
        let coco: CocoDatasetJson = serde_json::from_str(raw).map_err(|e| parse_error(None, e))?;
        CocoDataset::try_from(coco)
    }

    /// Writes `images`, `annotations` and `categories` with a four space indent.
    pub fn save(&self, path: impl AsRef<Path>) -> DatasetResult<()> {
        let path = path.as_ref();
        let io_err = |source| DatasetError::Io {
            path: path.to_path_buf(),
            source,
        };
        let mut writer = BufWriter::new(File::create(path).map_err(io_err)?);
        self.write_pretty(&mut writer).map_err(|source| DatasetError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        writer.flush().map_err(io_err)?;
        tracing::info!("saved {}", path.display());
        Ok(())
    }

    pub fn to_json_string(&self) -> DatasetResult<String> {
        let mut buffer = Vec::new();
        self.write_pretty(&mut buffer)
            .map_err(|e| DatasetError::Malformed(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| DatasetError::Malformed(e.to_string()))
    }

    fn write_pretty<W: Write>(&self, writer: W) -> Result<(), serde_json::Error> {
        let mut serializer =
            serde_json::Serializer::with_formatter(writer, PrettyFormatter::with_indent(b"    "));
        StoredCoco {
            images: self.images(),
            annotations: self.annotations(),
            categories: self.categories(),
        }
        .serialize(&mut serializer)
    }
}

/// A document that does not parse is `Malformed` whatever it was read from;
/// only failing to read it is an `Io` error.
fn parse_error(path: Option<&Path>, e: serde_json::Error) -> DatasetError {
    match path {
        Some(path) if e.is_io() => DatasetError::Io {
            path: path.to_path_buf(),
            source: e.into(),
        },
        Some(path) => DatasetError::Malformed(format!("{}: {}", path.display(), e)),
        None => DatasetError::Malformed(e.to_string()),
    }
}

/// Borrowed view of `CocoDatasetJson`, so saving does not clone the dataset.
#[derive(Serialize)]
struct StoredCoco<'a> {
    images: &'a [super::Image],
    annotations: &'a [super::Annotation],
    categories: &'a [super::Category],
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::coco_dataset::tests::small_dataset;

    #[test]
    fn saved_file_loads_back_with_same_entities() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coco.json");
        let coco = small_dataset();
        coco.save(&path).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.starts_with("{\n    \"images\": ["));

        let loaded = CocoDataset::load(&path).unwrap();
        assert_eq!(loaded.images(), coco.images());
        assert_eq!(loaded.annotations(), coco.annotations());
        assert_eq!(loaded.categories(), coco.categories());
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = CocoDataset::load("does/not/exist.json").unwrap_err();
        assert!(matches!(err, DatasetError::Io { .. }));
    }

    #[test]
    fn malformed_document_is_reported_alike_for_every_source() {
        let raw = r#"{"images": [{"id": "one", "file_name": "a.jpg"}]}"#;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, raw).unwrap();

        assert!(matches!(CocoDataset::load(&path), Err(DatasetError::Malformed(_))));
        assert!(matches!(
            CocoDataset::from_reader(raw.as_bytes()),
            Err(DatasetError::Malformed(_))
        ));
        assert!(matches!(
            CocoDataset::from_json_str(raw),
            Err(DatasetError::Malformed(_))
        ));
    }

    #[test]
    fn missing_required_field_fails_the_load() {
        let raw = r#"{"images": [{"id": 1, "width": 10, "height": 10}]}"#;
        assert!(matches!(
            CocoDataset::from_json_str(raw),
            Err(DatasetError::Malformed(_))
        ));
    }

    #[test]
    fn unknown_reference_fails_the_load() {
        let raw = r#"{
            "images": [{"id": 1, "file_name": "a.jpg", "width": 10, "height": 10}],
            "categories": [{"id": 1, "name": "cat"}],
            "annotations": [{"id": 1, "image_id": 1, "category_id": 3, "bbox": [0, 0, 1, 1]}]
        }"#;
        assert!(matches!(
            CocoDataset::from_json_str(raw),
            Err(DatasetError::UnknownReference { entity: "category", id: 3, .. })
        ));
    }

    #[test]
    fn missing_sections_read_as_empty() {
        let coco = CocoDataset::from_json_str("{}").unwrap();
        assert!(coco.is_empty());
    }
}
