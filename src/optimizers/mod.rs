mod optim_adam;
mod optim_sgd;

mod optim_creator;

use ndarray::{ArrayViewD, ArrayViewMutD};

pub use optim_adam::*;
pub use optim_sgd::*;
pub use optim_creator::*;

/// Updates trainable buffers from their loss gradients. Per-buffer state
/// (moments, velocity) is keyed by `buf_id`.
pub trait Optimizer: Send {
    fn optimize_params(&mut self, buf_id: i32, params: ArrayViewMutD<f32>, grad: ArrayViewD<f32>);

    fn optimizer_type(&self) -> &str;
    fn learn_rate(&self) -> f32;
    fn set_learn_rate(&mut self, learn_rate: f32);
}
