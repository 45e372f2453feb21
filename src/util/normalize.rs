use ndarray::{Array4, Axis, Zip};

use crate::util::{FrameSequence, GraySequence, CHANNELS};

pub const PIXEL_MAX: f32 = 255.0;

pub fn minmax_normalize_val(val: f32, min: f32, max: f32) -> f32 {
    (val - min) / (max - min)
}

/// Scales a `[0, 255]` grayscale sequence to `[0, 1]` and replicates it into
/// three identical channels: `(frames, rows, cols) -> (frames, 3, rows, cols)`
pub fn expand_channels(seq: &GraySequence) -> FrameSequence {
    let (frames, rows, cols) = seq.dim();
    let mut out = Array4::zeros((frames, CHANNELS, rows, cols));

    for ch in out.axis_iter_mut(Axis(1)) {
        Zip::from(ch).and(seq).for_each(|o, v| {
            *o = minmax_normalize_val(*v, 0.0, PIXEL_MAX);
        });
    }

    out
}
