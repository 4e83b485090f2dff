use std::path::PathBuf;
use thiserror::Error;

pub type DatasetResult<T> = Result<T, DatasetError>;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Writing a dataset out failed; unreadable input is `Malformed`
    #[error("json error at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("malformed coco data: {0}")]
    Malformed(String),
    #[error("annotation {annotation_id} references unknown {entity} id {id}")]
    UnknownReference {
        annotation_id: u64,
        entity: &'static str,
        id: u64,
    },
    #[error("unsupported split mode '{0}', expected random, strat_single_obj or strat_multi_obj")]
    UnsupportedMode(String),
    #[error("split ratio must be within [0, 1], got {0}")]
    InvalidRatio(f64),
    #[error("not a json file: {0}")]
    NotJson(PathBuf),
    #[error("nothing to merge")]
    EmptyMerge,
    #[error("annotation {annotation_id} covers no pixels of {file_name}")]
    EmptyCrop {
        annotation_id: u64,
        file_name: String,
    },
    #[error("image error at {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("could not build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}
