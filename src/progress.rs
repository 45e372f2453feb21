use log::info;
use serde::Serialize;

/// Metrics of one training batch
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BatchMetrics {
    pub epoch: usize,
    pub batch_index: usize,
    pub accuracy: f32,
    pub loss: f32,
    pub batch_size: usize,
}

/// Sample-weighted metrics of a finished epoch
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub loss: f32,
    pub accuracy: f32,
    pub samples: usize,
    pub val_loss: Option<f32>,
    pub val_accuracy: Option<f32>,
}

/// Receives training progress. Observers can't influence the training loop.
pub trait ProgressObserver: Send {
    fn on_batch_complete(&mut self, metrics: &BatchMetrics);

    fn on_epoch_end(&mut self, _metrics: &EpochMetrics) {}
}

/// Logs every batch and epoch at info level
#[derive(Default)]
pub struct ProgressDisplay;

impl ProgressDisplay {
    /// Fixed-width batch line, so consecutive lines stay aligned
    pub fn batch_line(m: &BatchMetrics) -> String {
        format!(
            "Batch {:<4} => Accuracy: {:>8.4} | Loss: {:>8.4} | Size: {:>4}",
            m.batch_index, m.accuracy, m.loss, m.batch_size
        )
    }
}

impl ProgressObserver for ProgressDisplay {
    fn on_batch_complete(&mut self, m: &BatchMetrics) {
        info!("{}", Self::batch_line(m));
    }

    fn on_epoch_end(&mut self, m: &EpochMetrics) {
        match (m.val_loss, m.val_accuracy) {
            (Some(val_loss), Some(val_acc)) => info!(
                "Epoch {} => Accuracy: {} | Loss: {} | Val accuracy: {} | Val loss: {}",
                m.epoch, m.accuracy, m.loss, val_acc, val_loss
            ),
            _ => info!("Epoch {} => Accuracy: {} | Loss: {}", m.epoch, m.accuracy, m.loss),
        }
    }
}
