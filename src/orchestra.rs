use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use log::{debug, info, warn};
use ndarray::{Array2, Zip};
use ndarray_stats::QuantileExt;
use serde::Serialize;

use crate::dataloader::DataLoader;
use crate::err::{OsrError, OsrResult};
use crate::models::Model;
use crate::progress::{BatchMetrics, EpochMetrics, ProgressObserver};

/// Lower bound applied to probabilities before taking their log
pub const PROB_EPSILON: f32 = 1e-7;

/// Mean categorical cross-entropy of a batch
pub fn categorical_crossentropy(output: &Array2<f32>, expected: &Array2<f32>) -> f32 {
    if output.nrows() == 0 {
        return 0.0;
    }

    let total = Zip::from(output).and(expected).fold(0.0f32, |acc, o, e| {
        acc - e * o.max(PROB_EPSILON).min(1.0).ln()
    });

    total / output.nrows() as f32
}

/// Fraction of rows whose most probable class is the expected one
pub fn categorical_accuracy(output: &Array2<f32>, expected: &Array2<f32>) -> f32 {
    if output.nrows() == 0 {
        return 0.0;
    }

    let mut matched = 0usize;

    Zip::from(output.rows())
        .and(expected.rows())
        .for_each(|out_r, exp_r| {
            if let (Ok(o), Ok(e)) = (out_r.argmax(), exp_r.argmax()) {
                if o == e {
                    matched += 1;
                }
            }
        });

    matched as f32 / output.nrows() as f32
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrainingHistory {
    pub epochs: Vec<EpochMetrics>,
    /// Set when the stop flag ended training early
    pub stopped: bool,
}

impl TrainingHistory {
    pub fn last(&self) -> Option<&EpochMetrics> {
        self.epochs.last()
    }
}

/// Model training orchestrator: drives epochs over the training loader,
/// evaluates on the validation loader and reports to observers
pub struct Orchestra {
    model: Box<dyn Model>,
    train_dl: Option<Box<dyn DataLoader>>,
    test_dl: Option<Box<dyn DataLoader>>,
    epochs: usize,
    samples_per_epoch: usize,
    validation_samples: usize,
    observers: Vec<Box<dyn ProgressObserver>>,
    stop_flag: Arc<AtomicBool>,
}

impl Orchestra {
    pub fn new(model: Box<dyn Model>) -> Self {
        Self {
            model,
            train_dl: None,
            test_dl: None,
            epochs: 10,
            samples_per_epoch: 0,
            validation_samples: 0,
            observers: Vec::new(),
            stop_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    /// 0 means one pass over the training loader
    pub fn samples_per_epoch(mut self, samples: usize) -> Self {
        self.samples_per_epoch = samples;
        self
    }

    /// 0 means one pass over the validation loader
    pub fn validation_samples(mut self, samples: usize) -> Self {
        self.validation_samples = samples;
        self
    }

    pub fn train_dataloader(mut self, dl: Box<dyn DataLoader>) -> Self {
        self.train_dl = Some(dl);
        self
    }

    pub fn test_dataloader(mut self, dl: Box<dyn DataLoader>) -> Self {
        self.test_dl = Some(dl);
        self
    }

    pub fn stop_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.stop_flag = flag;
        self
    }

    pub fn add_observer(&mut self, observer: Box<dyn ProgressObserver>) {
        self.observers.push(observer);
    }

    pub fn model(&self) -> &dyn Model {
        self.model.as_ref()
    }

    pub fn model_mut(&mut self) -> &mut dyn Model {
        self.model.as_mut()
    }

    pub fn into_model(self) -> Box<dyn Model> {
        self.model
    }

    fn should_stop(&self) -> bool {
        self.stop_flag.load(Ordering::Relaxed)
    }

    pub fn fit(&mut self) -> OsrResult<TrainingHistory> {
        let mut history = TrainingHistory::default();

        let samples_per_epoch = match self.train_dl.as_ref() {
            None => {
                return Err(OsrError::InvalidConfig(
                    "training data loader isn't set".to_owned(),
                ))
            }
            Some(dl) if self.samples_per_epoch == 0 => dl.len().unwrap_or(0),
            Some(_) => self.samples_per_epoch,
        };

        if samples_per_epoch == 0 {
            return Err(OsrError::EmptyIndexSet);
        }

        let validation_samples = match self.test_dl.as_ref() {
            Some(dl) if self.validation_samples == 0 => dl.len().unwrap_or(0),
            Some(_) => self.validation_samples,
            None => 0,
        };

        info!(
            "Training for {} epochs : {} samples per epoch, {} validation samples",
            self.epochs, samples_per_epoch, validation_samples
        );

        for epoch in 1..=self.epochs {
            let bench_time = Instant::now();

            let (loss, accuracy, samples) = match self.train_epoch(epoch, samples_per_epoch)? {
                Some(m) => m,
                None => {
                    info!("Stopping training loop on epoch {}...", epoch);
                    history.stopped = true;
                    return Ok(history);
                }
            };

            let (val_loss, val_accuracy) = if validation_samples > 0 {
                match self.validate(validation_samples)? {
                    Some((l, a)) => (Some(l), Some(a)),
                    None => {
                        info!("Stopping training loop on epoch {}...", epoch);
                        history.stopped = true;
                        return Ok(history);
                    }
                }
            } else {
                (None, None)
            };

            let metrics = EpochMetrics {
                epoch,
                loss,
                accuracy,
                samples,
                val_loss,
                val_accuracy,
            };

            for o in self.observers.iter_mut() {
                o.on_epoch_end(&metrics);
            }

            debug!("Epoch {} took {} milliseconds", epoch, bench_time.elapsed().as_millis());

            history.epochs.push(metrics);
        }

        info!("Training finished !");

        Ok(history)
    }

    /// Sample-weighted (loss, accuracy, samples) of one epoch, None when stopped
    fn train_epoch(&mut self, epoch: usize, samples_per_epoch: usize) -> OsrResult<Option<(f32, f32, usize)>> {
        let mut seen = 0;
        let mut batch_index = 0;
        let (mut loss_sum, mut acc_sum) = (0.0f32, 0.0f32);

        while seen < samples_per_epoch {
            if self.should_stop() {
                return Ok(None);
            }

            let batch = match self.train_dl.as_mut() {
                Some(dl) => dl.next_batch()?,
                None => return Err(OsrError::InvalidConfig("training data loader isn't set".to_owned())),
            };

            if batch.is_empty() {
                warn!("Training data loader returned an empty batch");
                break;
            }

            self.model.feedforward(batch.input.view())?;

            let loss = categorical_crossentropy(self.model.output(), &batch.output);
            let accuracy = categorical_accuracy(self.model.output(), &batch.output);

            self.model.backpropagate(batch.output.view())?;
            self.model.optimize();

            let batch_size = batch.len();
            seen += batch_size;
            batch_index += 1;
            loss_sum += loss * batch_size as f32;
            acc_sum += accuracy * batch_size as f32;

            let metrics = BatchMetrics {
                epoch,
                batch_index,
                accuracy,
                loss,
                batch_size,
            };

            for o in self.observers.iter_mut() {
                o.on_batch_complete(&metrics);
            }
        }

        if seen == 0 {
            return Ok(Some((0.0, 0.0, 0)));
        }

        Ok(Some((loss_sum / seen as f32, acc_sum / seen as f32, seen)))
    }

    /// Sample-weighted (loss, accuracy) on the validation loader, None when stopped
    fn validate(&mut self, validation_samples: usize) -> OsrResult<Option<(f32, f32)>> {
        let mut seen = 0;
        let (mut loss_sum, mut acc_sum) = (0.0f32, 0.0f32);

        while seen < validation_samples {
            if self.should_stop() {
                return Ok(None);
            }

            let batch = match self.test_dl.as_mut() {
                Some(dl) => dl.next_batch()?,
                None => break,
            };

            if batch.is_empty() {
                break;
            }

            self.model.feedforward(batch.input.view())?;

            let n = batch.len() as f32;
            loss_sum += categorical_crossentropy(self.model.output(), &batch.output) * n;
            acc_sum += categorical_accuracy(self.model.output(), &batch.output) * n;
            seen += batch.len();
        }

        if seen == 0 {
            return Ok(Some((0.0, 0.0)));
        }

        Ok(Some((loss_sum / seen as f32, acc_sum / seen as f32)))
    }
}
