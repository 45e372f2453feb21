use std::collections::HashMap;

use ndarray::{ArrayD, ArrayViewD, ArrayViewMutD, Zip};

use crate::optimizers::Optimizer;

/// Gradient descent with momentum
pub struct OptimizerSGD {
    pub learn_rate: f32,
    pub momentum: f32,
    delta: HashMap<i32, ArrayD<f32>>,
}

impl OptimizerSGD {
    pub fn new(learn_rate: f32, momentum: f32) -> Self {
        Self {
            learn_rate,
            momentum,
            delta: HashMap::new(),
        }
    }
}

impl Default for OptimizerSGD {
    fn default() -> Self {
        Self::new(1e-2, 0.8)
    }
}

impl Optimizer for OptimizerSGD {
    fn optimize_params(&mut self, buf_id: i32, params: ArrayViewMutD<f32>, grad: ArrayViewD<f32>) {
        let shape = params.raw_dim();
        let delta = self.delta.entry(buf_id).or_insert_with(|| ArrayD::zeros(shape.clone()));

        if delta.raw_dim() != shape {
            *delta = ArrayD::zeros(shape);
        }

        let (lr, momentum) = (self.learn_rate, self.momentum);

        Zip::from(params).and(&grad).and(delta).for_each(|p, g, d| {
            *d = momentum * *d - lr * g;
            *p += *d;
        });
    }

    fn optimizer_type(&self) -> &str {
        "sgd"
    }

    fn learn_rate(&self) -> f32 {
        self.learn_rate
    }

    fn set_learn_rate(&mut self, learn_rate: f32) {
        self.learn_rate = learn_rate;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;

    #[test]
    fn test_momentum_accumulates() {
        let mut sgd = OptimizerSGD::new(0.1, 0.5);
        let mut w = arr1(&[1.0f32]).into_dyn();
        let g = arr1(&[1.0f32]).into_dyn();

        sgd.optimize_params(0, w.view_mut(), g.view());
        assert!((w[[0]] - 0.9).abs() < 1e-6);

        sgd.optimize_params(0, w.view_mut(), g.view());
        // delta = 0.5 * -0.1 - 0.1
        assert!((w[[0]] - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_buffers_keep_separate_state() {
        let mut sgd = OptimizerSGD::new(0.1, 0.9);
        let mut a = arr1(&[0.0f32]).into_dyn();
        let mut b = arr1(&[0.0f32]).into_dyn();
        let g = arr1(&[1.0f32]).into_dyn();

        sgd.optimize_params(0, a.view_mut(), g.view());
        sgd.optimize_params(0, a.view_mut(), g.view());
        sgd.optimize_params(1, b.view_mut(), g.view());

        assert!((b[[0]] + 0.1).abs() < 1e-6);
        assert!(a[[0]] < b[[0]] - 0.1);
    }
}
