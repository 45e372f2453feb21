use std::fs::{self, File};
use std::path::{Path, PathBuf};

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::err::{OsrError, OsrResult};
use crate::models::FramePoolConfig;
use crate::optimizers::OptimizerConfig;
use crate::sequence::AugmentParams;

/// Every tunable of a pipeline instance. Missing keys fall back to defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub samples_generated_per_sample: usize,
    pub frames_per_sequence: usize,
    pub rows: usize,
    pub columns: usize,

    /// JSON object mapping class labels to video directories
    pub training_config: PathBuf,
    pub dataset_path: PathBuf,
    pub model_path: PathBuf,
    pub face_cascade: PathBuf,
    pub mouth_cascade: PathBuf,

    pub augmentation: AugmentParams,

    pub validation_ratio: f32,
    pub batch_size: usize,
    pub epochs: usize,
    /// Random when unset
    pub seed: Option<u64>,

    pub model: FramePoolConfig,
    pub optimizer: OptimizerConfig,

    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            samples_generated_per_sample: 10,
            frames_per_sequence: 30,
            rows: 100,
            columns: 150,
            training_config: PathBuf::from("training_config.json"),
            dataset_path: PathBuf::from("training_data.osr"),
            model_path: PathBuf::from("osr_model.state"),
            face_cascade: PathBuf::from("cascades/haarcascade_frontalface_default.xml"),
            mouth_cascade: PathBuf::from("cascades/haarcascade_mcs_mouth.xml"),
            augmentation: AugmentParams::default(),
            validation_ratio: 0.3,
            batch_size: 32,
            epochs: 10,
            seed: None,
            model: FramePoolConfig::default(),
            optimizer: OptimizerConfig::default(),
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
        }
    }
}

impl PipelineConfig {
    /// Reads a YAML config, a missing file yields the defaults
    pub fn from_file(path: &Path) -> OsrResult<Self> {
        if !path.exists() {
            warn!("Config {} not found, using defaults", path.display());
            return Ok(Self::default());
        }

        let cfg_file = File::open(path)?;
        let cfg: PipelineConfig = serde_yaml::from_reader(cfg_file)?;
        cfg.validate()?;

        info!("Loaded pipeline config from {}", path.display());

        Ok(cfg)
    }

    pub fn to_file(&self, path: &Path) -> OsrResult<()> {
        let yaml_str = serde_yaml::to_string(self)?;
        fs::write(path, yaml_str)?;
        Ok(())
    }

    pub fn validate(&self) -> OsrResult<()> {
        let positive = [
            ("samples_generated_per_sample", self.samples_generated_per_sample),
            ("frames_per_sequence", self.frames_per_sequence),
            ("rows", self.rows),
            ("columns", self.columns),
            ("batch_size", self.batch_size),
        ];

        for (name, val) in positive.iter() {
            if *val == 0 {
                return Err(OsrError::InvalidConfig(format!("{} must be positive", name)));
            }
        }

        if !(0.0..1.0).contains(&self.validation_ratio) {
            return Err(OsrError::InvalidSplitRatio(self.validation_ratio));
        }

        let (z_lo, z_hi) = self.augmentation.zoom_range;
        if !(z_lo > 0.0 && z_lo <= z_hi) {
            return Err(OsrError::InvalidConfig(format!(
                "zoom range ({}, {}) must be positive and ordered",
                z_lo, z_hi
            )));
        }

        if self.model.pool_rows == 0
            || self.model.pool_rows > self.rows
            || self.model.pool_cols == 0
            || self.model.pool_cols > self.columns
            || self.model.hidden == 0
        {
            return Err(OsrError::InvalidConfig(format!(
                "model {:?} doesn't fit frames of {}x{}",
                self.model, self.rows, self.columns
            )));
        }

        Ok(())
    }

    pub fn seed_or_random(&self) -> u64 {
        self.seed.unwrap_or_else(rand::random)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("osr_cfg_{}_{}.yaml", name, std::process::id()))
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let path = scratch("partial");
        fs::write(
            &path,
            "frames_per_sequence: 12\nseed: 7\noptimizer:\n  type: sgd\naugmentation:\n  rotation_range: 10.0\n",
        )
        .unwrap();

        let cfg = PipelineConfig::from_file(&path).unwrap();

        assert_eq!(cfg.frames_per_sequence, 12);
        assert_eq!(cfg.seed, Some(7));
        assert_eq!(cfg.seed_or_random(), 7);
        assert_eq!(cfg.optimizer.optim_type, "sgd");
        assert_eq!(cfg.augmentation.rotation_range, 10.0);
        assert_eq!(cfg.augmentation.zoom_range, (1.25, 1.25));
        assert_eq!(cfg.samples_generated_per_sample, 10);
        assert_eq!((cfg.rows, cfg.columns), (100, 150));
        assert_eq!(cfg.batch_size, 32);

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let cfg = PipelineConfig::from_file(Path::new("/nonexistent/osr/pipeline.yaml")).unwrap();
        assert_eq!(cfg, PipelineConfig::default());
    }

    #[test]
    fn test_round_trip_through_yaml() {
        let path = scratch("round_trip");
        let cfg = PipelineConfig {
            epochs: 3,
            seed: Some(42),
            ..PipelineConfig::default()
        };

        cfg.to_file(&path).unwrap();
        assert_eq!(PipelineConfig::from_file(&path).unwrap(), cfg);

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_validation() {
        let mut cfg = PipelineConfig::default();
        assert!(cfg.validate().is_ok());

        cfg.frames_per_sequence = 0;
        assert!(matches!(cfg.validate(), Err(OsrError::InvalidConfig(_))));

        let cfg = PipelineConfig {
            validation_ratio: 1.5,
            ..PipelineConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(OsrError::InvalidSplitRatio(_))));

        let cfg = PipelineConfig {
            rows: 2,
            ..PipelineConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
