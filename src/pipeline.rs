use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use log::info;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::config::PipelineConfig;
use crate::dataloader::{BatchGenerator, DatasetSplit, IndexPartition};
use crate::dataset::{load_training_classes, DatasetSummary, DatasetWriter, TableReader};
use crate::err::{OsrError, OsrResult};
use crate::models::{FramePoolClassifier, Model};
use crate::optimizers::optimizer_from_config;
use crate::orchestra::{Orchestra, TrainingHistory};
use crate::progress::{ProgressDisplay, ProgressObserver};
use crate::sequence::SequenceBuilder;
use crate::video::{FfmpegDecoder, VideoDecoder};
use crate::vision::{CascadeDetector, RegionLocalizer};

// offsets of the per-stage seeds from the base seed
const MODEL_SEED: u64 = 0x6d6f_64656c;
const SPLIT_SEED: u64 = 0x7370_6c6974;

/// Lip-reading pipeline: dataset preparation, model creation, training
/// and model persistence, all driven by one [`PipelineConfig`]
pub struct OpticalSpeechRecognizer {
    cfg: PipelineConfig,
    seed: u64,
    model: Option<Box<dyn Model>>,
    stop_flag: Arc<AtomicBool>,
}

impl OpticalSpeechRecognizer {
    pub fn new(cfg: PipelineConfig) -> OsrResult<Self> {
        cfg.validate()?;

        let seed = cfg.seed_or_random();
        info!("Setting random seed : {}", seed);

        Ok(Self {
            cfg,
            seed,
            model: None,
            stop_flag: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Shared flag that interrupts training between batches once set
    pub fn stop_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.stop_flag = flag;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.cfg
    }

    pub fn model(&self) -> Option<&dyn Model> {
        self.model.as_deref()
    }

    fn model_ref(&self) -> OsrResult<&dyn Model> {
        self.model
            .as_deref()
            .ok_or_else(|| OsrError::InvalidConfig("no model generated or loaded".to_owned()))
    }

    /// Face and mouth cascades from the configured files
    pub fn cascade_localizer(&self) -> OsrResult<RegionLocalizer> {
        let face = CascadeDetector::from_file(&self.cfg.face_cascade)?;
        let mouth = CascadeDetector::from_file(&self.cfg.mouth_cascade)?;

        Ok(RegionLocalizer::new(
            Box::new(face),
            Box::new(mouth),
            self.cfg.rows as u32,
            self.cfg.columns as u32,
        ))
    }

    pub fn sequence_builder(&self, decoder: Box<dyn VideoDecoder>, localizer: RegionLocalizer) -> SequenceBuilder {
        SequenceBuilder::new(
            decoder,
            localizer,
            self.cfg.frames_per_sequence,
            self.cfg.samples_generated_per_sample,
        )
        .augment(self.cfg.augmentation.clone())
    }

    /// Builds the dataset file with ffmpeg decoding and the configured cascades
    pub fn process_training_data(&self) -> OsrResult<DatasetSummary> {
        let decoder = FfmpegDecoder::new(&self.cfg.ffmpeg, &self.cfg.ffprobe);
        let builder = self.sequence_builder(Box::new(decoder), self.cascade_localizer()?);

        self.process_training_data_with(builder)
    }

    pub fn process_training_data_with(&self, builder: SequenceBuilder) -> OsrResult<DatasetSummary> {
        let classes = load_training_classes(&self.cfg.training_config)?;

        info!(
            "Generating {} samples per video into {}",
            self.cfg.samples_generated_per_sample,
            self.cfg.dataset_path.display()
        );

        DatasetWriter::new(builder)
            .seed(self.seed)
            .process(&classes, &self.cfg.dataset_path)
    }

    /// Creates a fresh classifier shaped after the dataset file
    pub fn generate_model(&mut self) -> OsrResult<()> {
        let table = TableReader::open(&self.cfg.dataset_path)?;
        let header = table.header();

        info!("Generating model for classes {:?}", header.training_classes);

        let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(MODEL_SEED));
        let mdl = FramePoolClassifier::new(
            header.sample_shape(),
            header.num_classes(),
            self.cfg.model,
            optimizer_from_config(&self.cfg.optimizer)?,
            &mut rng,
        )?;

        self.model = Some(Box::new(mdl));

        Ok(())
    }

    pub fn model_summary(&self) -> OsrResult<String> {
        let summary = self.model_ref()?.summary();
        info!("*** MODEL SUMMARY ***\n{}", summary);
        Ok(summary)
    }

    pub fn train_model(&mut self) -> OsrResult<TrainingHistory> {
        self.train_model_with(vec![Box::new(ProgressDisplay)])
    }

    pub fn train_model_with(&mut self, observers: Vec<Box<dyn ProgressObserver>>) -> OsrResult<TrainingHistory> {
        let table = Arc::new(TableReader::open(&self.cfg.dataset_path)?);
        let header = table.header().clone();
        let sample_count = table.sample_count();

        {
            let mdl = self.model_ref()?;

            if mdl.input_shape() != header.sample_shape() || mdl.num_classes() != header.num_classes() {
                return Err(OsrError::ModelMismatch(format!(
                    "model takes {:?} with {} classes, dataset holds {:?} with {} classes",
                    mdl.input_shape(),
                    mdl.num_classes(),
                    header.sample_shape(),
                    header.num_classes()
                )));
            }
        }

        let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(SPLIT_SEED));
        let partition = IndexPartition::shuffled(sample_count, self.cfg.validation_ratio, &mut rng)?;

        let train_gen = BatchGenerator::from_partition(
            table.clone(),
            &partition,
            DatasetSplit::Training,
            self.cfg.batch_size,
        )?;

        let validation_samples = (self.cfg.validation_ratio as f64 * sample_count as f64).round() as usize;

        let model = self
            .model
            .take()
            .ok_or_else(|| OsrError::InvalidConfig("no model generated or loaded".to_owned()))?;

        let mut orchestra = Orchestra::new(model)
            .epochs(self.cfg.epochs)
            .samples_per_epoch(sample_count)
            .train_dataloader(Box::new(train_gen))
            .stop_flag(self.stop_flag.clone());

        if !partition.validation.is_empty() && validation_samples > 0 {
            let valid_gen = BatchGenerator::from_partition(
                table,
                &partition,
                DatasetSplit::Validation,
                self.cfg.batch_size,
            );

            match valid_gen {
                Ok(valid_gen) => {
                    orchestra = orchestra
                        .test_dataloader(Box::new(valid_gen))
                        .validation_samples(validation_samples);
                }
                Err(e) => {
                    self.model = Some(orchestra.into_model());
                    return Err(e);
                }
            }
        }

        for o in observers {
            orchestra.add_observer(o);
        }

        info!("Training OSR on {} samples", sample_count);

        let history = orchestra.fit();
        self.model = Some(orchestra.into_model());

        history
    }

    pub fn save_model(&self) -> OsrResult<()> {
        info!("Saving OSR model to {}", self.cfg.model_path.display());
        self.model_ref()?.save_state(&self.cfg.model_path)
    }

    pub fn load_model(&mut self) -> OsrResult<()> {
        info!("Loading OSR model from {}", self.cfg.model_path.display());

        let mdl = FramePoolClassifier::from_state_file(
            &self.cfg.model_path,
            optimizer_from_config(&self.cfg.optimizer)?,
        )?;
        self.model = Some(Box::new(mdl));

        Ok(())
    }
}
