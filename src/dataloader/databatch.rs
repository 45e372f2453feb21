use ndarray::{Array2, Array5};

use crate::util::{LabelBatch, SequenceBatch};

/// Samples of one batch and their one-hot expectations
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MiniBatch {
    /// `(batch, frames, channels, rows, columns)`
    pub input: SequenceBatch,
    /// `(batch, num_classes)`
    pub output: Array2<f32>,
}

impl MiniBatch {
    pub fn new(input: Array5<f32>, labels: LabelBatch) -> Self {
        Self {
            input,
            output: labels.mapv(|v| v as f32),
        }
    }

    pub fn len(&self) -> usize {
        self.input.shape()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
