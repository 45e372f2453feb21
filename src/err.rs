use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum OsrError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("XML error: {0}")]
    Xml(#[from] roxmltree::Error),

    #[error("Protobuf decode error: {0}")]
    ProtoDecode(#[from] prost::DecodeError),

    #[error("Array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("No usable frames in video {0}")]
    NoUsableFrames(PathBuf),

    #[error("Couldn't decode video {path}: {reason}")]
    VideoDecode { path: PathBuf, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid dataset file: {0}")]
    InvalidDataset(String),

    #[error("Invalid validation ratio {0}, expected a value in [0, 1)")]
    InvalidSplitRatio(f32),

    #[error("Index set is empty")]
    EmptyIndexSet,

    #[error("Invalid batch size {0}")]
    InvalidBatchSize(usize),

    #[error("Invalid cascade: {0}")]
    InvalidCascade(String),

    #[error("Model doesn't match data: {0}")]
    ModelMismatch(String),

    #[error("Wrong arguments")]
    WrongArg,
}

/// Reasons a single frame is dropped from a sequence. Never surfaced past
/// the sequence builder.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionMiss {
    #[error("expected exactly one face, found {count}")]
    AmbiguousOrNoFace { count: usize },

    #[error("no mouth detected inside the face region")]
    NoMouthDetected,
}

pub type OsrResult<T> = Result<T, OsrError>;
