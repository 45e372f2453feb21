use std::collections::HashMap;

use ndarray::{ArrayD, ArrayViewD, ArrayViewMutD, Zip};

use crate::optimizers::Optimizer;

pub struct OptimizerAdam {
    pub learn_rate: f32,
    pub theta: f32,
    pub b1: f32,
    pub b2: f32,
    m: HashMap<i32, ArrayD<f32>>,
    v: HashMap<i32, ArrayD<f32>>,
    steps: HashMap<i32, i32>,
}

impl OptimizerAdam {
    pub fn new(learn_rate: f32) -> Self {
        Self {
            learn_rate,
            ..Self::default()
        }
    }
}

impl Default for OptimizerAdam {
    fn default() -> Self {
        Self {
            learn_rate: 2e-3,
            theta: 1e-8,
            b1: 0.9,
            b2: 0.999,
            m: HashMap::new(),
            v: HashMap::new(),
            steps: HashMap::new(),
        }
    }
}

impl Optimizer for OptimizerAdam {
    fn optimize_params(&mut self, buf_id: i32, params: ArrayViewMutD<f32>, grad: ArrayViewD<f32>) {
        let shape = params.raw_dim();

        let m = self.m.entry(buf_id).or_insert_with(|| ArrayD::zeros(shape.clone()));
        let v = self.v.entry(buf_id).or_insert_with(|| ArrayD::zeros(shape.clone()));
        let step = self.steps.entry(buf_id).or_insert(0);

        // buffer was reshaped, restart its moments
        if m.raw_dim() != shape {
            *m = ArrayD::zeros(shape.clone());
            *v = ArrayD::zeros(shape);
            *step = 0;
        }

        *step += 1;

        let (b1, b2, lr, theta) = (self.b1, self.b2, self.learn_rate, self.theta);
        let corr1 = 1.0 - b1.powi(*step);
        let corr2 = 1.0 - b2.powi(*step);

        Zip::from(params)
            .and(&grad)
            .and(m)
            .and(v)
            .for_each(|p, g, m, v| {
                *m = b1 * *m + (1.0 - b1) * g;
                *v = b2 * *v + (1.0 - b2) * g * g;

                let m_hat = *m / corr1;
                let v_hat = *v / corr2;

                *p -= lr * m_hat / (v_hat.sqrt() + theta);
            });
    }

    fn optimizer_type(&self) -> &str {
        "adam"
    }

    fn learn_rate(&self) -> f32 {
        self.learn_rate
    }

    fn set_learn_rate(&mut self, learn_rate: f32) {
        self.learn_rate = learn_rate;
    }
}
