/// Folder
pub mod util;
pub mod vision;
pub mod video;
pub mod sequence;
pub mod dataset;
pub mod dataloader;
pub mod models;
pub mod optimizers;

/// Files
pub mod err;
pub mod config;
pub mod orchestra;
pub mod progress;
pub mod pipeline;

pub mod prelude {
    pub use crate::config::PipelineConfig;
    pub use crate::err::{OsrError, OsrResult};
    pub use crate::pipeline::OpticalSpeechRecognizer;
    pub use crate::progress::{ProgressDisplay, ProgressObserver};
}
