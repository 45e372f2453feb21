mod frame_pool;
mod model_helper;

use std::path::Path;

use ndarray::{Array2, ArrayView2, ArrayView5};

use crate::err::OsrResult;

pub use frame_pool::*;
pub use model_helper::*;

/// Sequence classifier trained by [`crate::orchestra::Orchestra`]
pub trait Model: Send {
    /// Input is `(batch, frames, channels, rows, columns)`
    fn feedforward(&mut self, input: ArrayView5<f32>) -> OsrResult<()>;
    /// Gradients of the last feedforward against one-hot `expected`
    fn backpropagate(&mut self, expected: ArrayView2<f32>) -> OsrResult<()>;
    fn optimize(&mut self);

    /// Class probabilities of the last feedforward, `(batch, num_classes)`
    fn output(&self) -> &Array2<f32>;
    fn num_classes(&self) -> usize;
    /// `(frames, channels, rows, columns)` of one sample
    fn input_shape(&self) -> (usize, usize, usize, usize);

    fn model_type(&self) -> &str;
    fn summary(&self) -> String;

    fn save_state(&self, path: &Path) -> OsrResult<()>;
    fn load_state(&mut self, path: &Path) -> OsrResult<()>;
}

pub mod pb {
    use prost::Message;

    #[derive(Clone, PartialEq, Message)]
    pub struct PbBuf {
        #[prost(int32, tag = "1")]
        pub buf_id: i32,
        #[prost(int32, repeated, tag = "2")]
        pub shape: Vec<i32>,
        #[prost(float, repeated, tag = "3")]
        pub vals: Vec<f32>,
    }

    #[derive(Clone, PartialEq, Message)]
    pub struct PbFramePoolModel {
        #[prost(string, tag = "1")]
        pub model_type: String,
        #[prost(uint64, repeated, tag = "2")]
        pub input_shape: Vec<u64>,
        #[prost(uint64, tag = "3")]
        pub num_classes: u64,
        #[prost(uint64, tag = "4")]
        pub pool_rows: u64,
        #[prost(uint64, tag = "5")]
        pub pool_cols: u64,
        #[prost(uint64, tag = "6")]
        pub hidden: u64,
        #[prost(message, repeated, tag = "7")]
        pub bufs: Vec<PbBuf>,
    }
}
