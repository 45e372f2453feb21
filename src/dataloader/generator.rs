use std::ops::Range;
use std::sync::Arc;

use log::debug;

use crate::dataloader::{DataLoader, IndexPartition, MiniBatch};
use crate::dataset::TableReader;
use crate::err::{OsrError, OsrResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetSplit {
    Training,
    Validation,
}

/// `floor(n / batch_size)` full ranges, then one remainder range iff `n % batch_size != 0`
pub fn batch_ranges(n: usize, batch_size: usize) -> Vec<Range<usize>> {
    if batch_size == 0 {
        return Vec::new();
    }

    (0..n)
        .step_by(batch_size)
        .map(|start| start..(start + batch_size).min(n))
        .collect()
}

/// Endless batches over a fixed index set of a dataset table. Each batch
/// reads only its own rows; passes repeat in the same order.
pub struct BatchGenerator {
    table: Arc<TableReader>,
    indices: Vec<usize>,
    ranges: Vec<Range<usize>>,
    batch_size: usize,
    cursor: usize,
}

impl BatchGenerator {
    pub fn new(table: Arc<TableReader>, indices: Vec<usize>, batch_size: usize) -> OsrResult<Self> {
        if batch_size == 0 {
            return Err(OsrError::InvalidBatchSize(batch_size));
        }

        if indices.is_empty() {
            return Err(OsrError::EmptyIndexSet);
        }

        if let Some(bad) = indices.iter().find(|i| **i >= table.sample_count()) {
            return Err(OsrError::InvalidDataset(format!(
                "index {} out of range, dataset holds {} samples",
                bad,
                table.sample_count()
            )));
        }

        let ranges = batch_ranges(indices.len(), batch_size);

        debug!(
            "Batch generator : {} samples, batch size {}, {} batches per pass",
            indices.len(),
            batch_size,
            ranges.len()
        );

        Ok(Self {
            table,
            indices,
            ranges,
            batch_size,
            cursor: 0,
        })
    }

    pub fn from_partition(
        table: Arc<TableReader>,
        partition: &IndexPartition,
        split: DatasetSplit,
        batch_size: usize,
    ) -> OsrResult<Self> {
        let indices = match split {
            DatasetSplit::Training => partition.training.clone(),
            DatasetSplit::Validation => partition.validation.clone(),
        };

        Self::new(table, indices, batch_size)
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }
}

impl DataLoader for BatchGenerator {
    fn next_batch(&mut self) -> OsrResult<MiniBatch> {
        let range = self.ranges[self.cursor].clone();
        self.cursor = (self.cursor + 1) % self.ranges.len();

        let (x, y) = self.table.read_rows(&self.indices[range])?;

        Ok(MiniBatch::new(x, y))
    }

    fn reset(&mut self) {
        self.cursor = 0;
    }

    fn len(&self) -> Option<usize> {
        Some(self.indices.len())
    }

    fn pos(&self) -> Option<usize> {
        Some(self.ranges[self.cursor].start)
    }

    fn batches_per_pass(&self) -> Option<usize> {
        Some(self.ranges.len())
    }
}

impl Iterator for BatchGenerator {
    type Item = OsrResult<MiniBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.next_batch())
    }
}
