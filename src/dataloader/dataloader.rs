use crate::dataloader::databatch::MiniBatch;
use crate::err::OsrResult;

/// Pull-based source of mini batches cycling over a fixed index set
pub trait DataLoader {
    fn next_batch(&mut self) -> OsrResult<MiniBatch>;

    fn reset(&mut self) {}
    /// Samples in one pass
    fn len(&self) -> Option<usize> {
        None
    }
    /// Samples already served in the current pass
    fn pos(&self) -> Option<usize> {
        None
    }
    fn batches_per_pass(&self) -> Option<usize> {
        None
    }
}
