use std::fs;
use std::path::Path;

use log::{debug, info};
use ndarray::{s, Array1, Array2, ArrayView2, ArrayView5, Axis, Zip};
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use prost::Message;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::err::{OsrError, OsrResult};
use crate::models::model_helper::*;
use crate::models::pb::PbFramePoolModel;
use crate::models::Model;
use crate::optimizers::Optimizer;
use crate::util::{array_helpers, Array1D, Array2D};

pub const FRAME_POOL_TYPE: &str = "frame_pool";

const BUF_W_HIDDEN: i32 = 0;
const BUF_B_HIDDEN: i32 = 1;
const BUF_W_OUT: i32 = 2;
const BUF_B_OUT: i32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FramePoolConfig {
    pub pool_rows: usize,
    pub pool_cols: usize,
    pub hidden: usize,
}

impl Default for FramePoolConfig {
    fn default() -> Self {
        Self {
            pool_rows: 4,
            pool_cols: 6,
            hidden: 64,
        }
    }
}

/// Average-pools every frame to a small grid, then classifies the
/// concatenated grids with one ReLU hidden layer and a softmax output.
pub struct FramePoolClassifier {
    cfg: FramePoolConfig,
    input_shape: (usize, usize, usize, usize),
    num_classes: usize,

    w_hidden: Array2D,
    b_hidden: Array1D,
    w_out: Array2D,
    b_out: Array1D,

    // last feedforward
    features: Array2D,
    hidden_out: Array2D,
    output: Array2D,

    g_w_hidden: Array2D,
    g_b_hidden: Array1D,
    g_w_out: Array2D,
    g_b_out: Array1D,

    optimizer: Box<dyn Optimizer>,
}

impl FramePoolClassifier {
    pub fn new<R: Rng + ?Sized>(
        input_shape: (usize, usize, usize, usize),
        num_classes: usize,
        cfg: FramePoolConfig,
        optimizer: Box<dyn Optimizer>,
        rng: &mut R,
    ) -> OsrResult<Self> {
        let mut mdl = Self::zeroed(input_shape, num_classes, cfg, optimizer)?;

        let init = Uniform::new(-0.1f32, 0.1);
        mdl.w_hidden = Array2::random_using(mdl.w_hidden.raw_dim(), init, rng);
        mdl.w_out = Array2::random_using(mdl.w_out.raw_dim(), init, rng);

        info!(
            "Created {} model : input {:?}, {} classes, {} parameters",
            FRAME_POOL_TYPE,
            input_shape,
            num_classes,
            mdl.param_count()
        );

        Ok(mdl)
    }

    fn zeroed(
        input_shape: (usize, usize, usize, usize),
        num_classes: usize,
        cfg: FramePoolConfig,
        optimizer: Box<dyn Optimizer>,
    ) -> OsrResult<Self> {
        let (frames, channels, rows, columns) = input_shape;

        if frames == 0 || channels == 0 || num_classes == 0 || cfg.hidden == 0 {
            return Err(OsrError::InvalidConfig(format!(
                "can't build a model for input {:?}, {} classes, {} hidden units",
                input_shape, num_classes, cfg.hidden
            )));
        }

        if !(1..=rows).contains(&cfg.pool_rows) || !(1..=columns).contains(&cfg.pool_cols) {
            return Err(OsrError::InvalidConfig(format!(
                "pool grid {}x{} doesn't fit frames of {}x{}",
                cfg.pool_rows, cfg.pool_cols, rows, columns
            )));
        }

        let feat_len = frames * cfg.pool_rows * cfg.pool_cols;

        Ok(Self {
            cfg,
            input_shape,
            num_classes,
            w_hidden: Array2::zeros((cfg.hidden, feat_len)),
            b_hidden: Array1::zeros(cfg.hidden),
            w_out: Array2::zeros((num_classes, cfg.hidden)),
            b_out: Array1::zeros(num_classes),
            features: Array2::zeros((0, feat_len)),
            hidden_out: Array2::zeros((0, cfg.hidden)),
            output: Array2::zeros((0, num_classes)),
            g_w_hidden: Array2::zeros((cfg.hidden, feat_len)),
            g_b_hidden: Array1::zeros(cfg.hidden),
            g_w_out: Array2::zeros((num_classes, cfg.hidden)),
            g_b_out: Array1::zeros(num_classes),
            optimizer,
        })
    }

    /// Restores a model with the shape and weights stored in `path`
    pub fn from_state_file(path: &Path, optimizer: Box<dyn Optimizer>) -> OsrResult<Self> {
        let pb_model = Self::read_state(path)?;

        if pb_model.input_shape.len() != 4 {
            return Err(OsrError::ModelMismatch(format!(
                "stored input shape {:?} isn't 4-dimensional",
                pb_model.input_shape
            )));
        }

        let s = &pb_model.input_shape;
        let cfg = FramePoolConfig {
            pool_rows: pb_model.pool_rows as usize,
            pool_cols: pb_model.pool_cols as usize,
            hidden: pb_model.hidden as usize,
        };

        let mut mdl = Self::zeroed(
            (s[0] as usize, s[1] as usize, s[2] as usize, s[3] as usize),
            pb_model.num_classes as usize,
            cfg,
            optimizer,
        )?;
        mdl.apply_state(&pb_model)?;

        Ok(mdl)
    }

    pub fn config(&self) -> &FramePoolConfig {
        &self.cfg
    }

    pub fn param_count(&self) -> usize {
        self.w_hidden.len() + self.b_hidden.len() + self.w_out.len() + self.b_out.len()
    }

    /// Mean of channel 0 over each cell of the pool grid, frames concatenated
    pub fn pool_features(&self, input: ArrayView5<f32>) -> Array2D {
        let (frames, _, rows, columns) = self.input_shape;
        let (pr, pc) = (self.cfg.pool_rows, self.cfg.pool_cols);

        let mut features = Array2::zeros((input.len_of(Axis(0)), frames * pr * pc));

        Zip::from(features.rows_mut())
            .and(input.outer_iter())
            .par_for_each(|mut feat, sample| {
                for f in 0..frames {
                    let frame = sample.slice(s![f, 0, .., ..]);

                    for i in 0..pr {
                        for j in 0..pc {
                            let cell = frame.slice(s![
                                i * rows / pr..(i + 1) * rows / pr,
                                j * columns / pc..(j + 1) * columns / pc
                            ]);
                            feat[(f * pr + i) * pc + j] = cell.mean().unwrap_or(0.0);
                        }
                    }
                }
            });

        features
    }

    fn read_state(path: &Path) -> OsrResult<PbFramePoolModel> {
        let buf = fs::read(path)?;
        let pb_model = PbFramePoolModel::decode(buf.as_slice())?;

        if pb_model.model_type != FRAME_POOL_TYPE {
            return Err(OsrError::ModelMismatch(format!(
                "{} holds a {} model",
                path.display(),
                pb_model.model_type
            )));
        }

        Ok(pb_model)
    }

    fn to_pb(&self) -> PbFramePoolModel {
        let (f, c, r, col) = self.input_shape;

        PbFramePoolModel {
            model_type: FRAME_POOL_TYPE.to_owned(),
            input_shape: vec![f as u64, c as u64, r as u64, col as u64],
            num_classes: self.num_classes as u64,
            pool_rows: self.cfg.pool_rows as u64,
            pool_cols: self.cfg.pool_cols as u64,
            hidden: self.cfg.hidden as u64,
            bufs: vec![
                convert_buf_2d_to_pb(&self.w_hidden, BUF_W_HIDDEN),
                convert_buf_1d_to_pb(&self.b_hidden, BUF_B_HIDDEN),
                convert_buf_2d_to_pb(&self.w_out, BUF_W_OUT),
                convert_buf_1d_to_pb(&self.b_out, BUF_B_OUT),
            ],
        }
    }

    fn apply_state(&mut self, pb_model: &PbFramePoolModel) -> OsrResult<()> {
        let own = self.to_pb();

        if own.input_shape != pb_model.input_shape
            || own.num_classes != pb_model.num_classes
            || own.pool_rows != pb_model.pool_rows
            || own.pool_cols != pb_model.pool_cols
            || own.hidden != pb_model.hidden
        {
            return Err(OsrError::ModelMismatch(format!(
                "stored model has input {:?}, {} classes, pool {}x{}, {} hidden; expected input {:?}, {} classes, pool {}x{}, {} hidden",
                pb_model.input_shape,
                pb_model.num_classes,
                pb_model.pool_rows,
                pb_model.pool_cols,
                pb_model.hidden,
                own.input_shape,
                own.num_classes,
                own.pool_rows,
                own.pool_cols,
                own.hidden
            )));
        }

        let bufs = &pb_model.bufs;

        self.w_hidden = convert_pb_to_buf_2d(bufs, BUF_W_HIDDEN, self.w_hidden.dim())?;
        self.b_hidden = convert_pb_to_buf_1d(bufs, BUF_B_HIDDEN, self.b_hidden.len())?;
        self.w_out = convert_pb_to_buf_2d(bufs, BUF_W_OUT, self.w_out.dim())?;
        self.b_out = convert_pb_to_buf_1d(bufs, BUF_B_OUT, self.b_out.len())?;

        Ok(())
    }
}

impl Model for FramePoolClassifier {
    fn feedforward(&mut self, input: ArrayView5<f32>) -> OsrResult<()> {
        let (_, f, c, r, col) = input.dim();

        if (f, c, r, col) != self.input_shape {
            return Err(OsrError::ModelMismatch(format!(
                "input samples of {:?}, model expects {:?}",
                (f, c, r, col),
                self.input_shape
            )));
        }

        self.features = self.pool_features(input);

        let mut hidden = self.features.dot(&self.w_hidden.t());
        hidden += &self.b_hidden;
        self.hidden_out = hidden.mapv_into(|v| v.max(0.0));

        let mut out = self.hidden_out.dot(&self.w_out.t());
        out += &self.b_out;

        for mut row in out.rows_mut() {
            let row_max = array_helpers::max(&row);
            row.mapv_inplace(|v| (v - row_max).exp());
            let sum = row.sum();
            row /= sum;
        }

        self.output = out;

        debug!("[ok] {} feedforward()", FRAME_POOL_TYPE);

        Ok(())
    }

    fn backpropagate(&mut self, expected: ArrayView2<f32>) -> OsrResult<()> {
        if expected.dim() != self.output.dim() || self.output.is_empty() {
            return Err(OsrError::ModelMismatch(format!(
                "expected labels of {:?}, last output is {:?}",
                expected.dim(),
                self.output.dim()
            )));
        }

        let batch_len = self.output.nrows() as f32;

        // softmax + cross-entropy
        let d_out = (&self.output - &expected) / batch_len;

        self.g_w_out = d_out.t().dot(&self.hidden_out);
        self.g_b_out = d_out.sum_axis(Axis(0));

        let mut d_hidden = d_out.dot(&self.w_out);
        Zip::from(&mut d_hidden)
            .and(&self.hidden_out)
            .for_each(|d, h| {
                if *h <= 0.0 {
                    *d = 0.0;
                }
            });

        self.g_w_hidden = d_hidden.t().dot(&self.features);
        self.g_b_hidden = d_hidden.sum_axis(Axis(0));

        debug!("[ok] {} backpropagate()", FRAME_POOL_TYPE);

        Ok(())
    }

    fn optimize(&mut self) {
        let optim = &mut self.optimizer;

        optim.optimize_params(BUF_W_HIDDEN, self.w_hidden.view_mut().into_dyn(), self.g_w_hidden.view().into_dyn());
        optim.optimize_params(BUF_B_HIDDEN, self.b_hidden.view_mut().into_dyn(), self.g_b_hidden.view().into_dyn());
        optim.optimize_params(BUF_W_OUT, self.w_out.view_mut().into_dyn(), self.g_w_out.view().into_dyn());
        optim.optimize_params(BUF_B_OUT, self.b_out.view_mut().into_dyn(), self.g_b_out.view().into_dyn());
    }

    fn output(&self) -> &Array2<f32> {
        &self.output
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn input_shape(&self) -> (usize, usize, usize, usize) {
        self.input_shape
    }

    fn model_type(&self) -> &str {
        FRAME_POOL_TYPE
    }

    fn summary(&self) -> String {
        let (frames, channels, rows, columns) = self.input_shape;
        let (pr, pc, hidden) = (self.cfg.pool_rows, self.cfg.pool_cols, self.cfg.hidden);
        let feat_len = frames * pr * pc;

        let layers = [
            ("input", format!("({}, {}, {}, {})", frames, channels, rows, columns), 0),
            ("avg_pool", format!("({}, {}, {})", frames, pr, pc), 0),
            ("flatten", format!("({})", feat_len), 0),
            ("dense_relu", format!("({})", hidden), self.w_hidden.len() + self.b_hidden.len()),
            ("dense_softmax", format!("({})", self.num_classes), self.w_out.len() + self.b_out.len()),
        ];

        let mut out = format!("Model : {}\n", FRAME_POOL_TYPE);
        out += &format!("{:<16}{:<24}{:>10}\n", "Layer", "Output shape", "Params");

        for (name, shape, params) in layers.iter() {
            out += &format!("{:<16}{:<24}{:>10}\n", name, shape, params);
        }

        out += &format!("Total params : {}\n", self.param_count());
        out += &format!(
            "Optimizer : {} (learning rate {})",
            self.optimizer.optimizer_type(),
            self.optimizer.learn_rate()
        );

        out
    }

    fn save_state(&self, path: &Path) -> OsrResult<()> {
        write_message(&self.to_pb(), path)?;

        info!("Saved {} model to {}", FRAME_POOL_TYPE, path.display());

        Ok(())
    }

    fn load_state(&mut self, path: &Path) -> OsrResult<()> {
        let pb_model = Self::read_state(path)?;
        self.apply_state(&pb_model)?;

        info!("Loaded {} model from {}", FRAME_POOL_TYPE, path.display());

        Ok(())
    }
}
