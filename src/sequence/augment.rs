//! Random geometric augmentation of whole frame sequences.
//!
//! Transforms map output pixel coordinates `(row, col)` to input coordinates,
//! so composing them multiplies the matrices in the order the operations are
//! applied to the image. Resampling is nearest-neighbour; samples falling
//! outside the frame take the value of the closest edge pixel.

use ndarray::{Array3, Axis, Zip};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::util::GraySequence;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineTransform {
    m: [[f32; 3]; 2],
}

impl AffineTransform {
    pub fn identity() -> Self {
        Self {
            m: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
        }
    }

    pub fn rotation(theta: f32) -> Self {
        let (s, c) = theta.sin_cos();
        Self {
            m: [[c, -s, 0.0], [s, c, 0.0]],
        }
    }

    pub fn translation(t_row: f32, t_col: f32) -> Self {
        Self {
            m: [[1.0, 0.0, t_row], [0.0, 1.0, t_col]],
        }
    }

    pub fn shear(shear: f32) -> Self {
        Self {
            m: [[1.0, -shear.sin(), 0.0], [0.0, shear.cos(), 0.0]],
        }
    }

    pub fn zoom(z_row: f32, z_col: f32) -> Self {
        Self {
            m: [[z_row, 0.0, 0.0], [0.0, z_col, 0.0]],
        }
    }

    /// `self * other`: apply `other` to the coordinates first
    pub fn compose(&self, other: &AffineTransform) -> Self {
        let a = &self.m;
        let b = &other.m;
        let mut m = [[0.0; 3]; 2];

        for r in 0..2 {
            m[r][0] = a[r][0] * b[0][0] + a[r][1] * b[1][0];
            m[r][1] = a[r][0] * b[0][1] + a[r][1] * b[1][1];
            m[r][2] = a[r][0] * b[0][2] + a[r][1] * b[1][2] + a[r][2];
        }

        Self { m }
    }

    /// Re-anchors the transform on the center of a `rows x cols` frame
    pub fn centered(&self, rows: usize, cols: usize) -> Self {
        let o_r = rows as f32 / 2.0 + 0.5;
        let o_c = cols as f32 / 2.0 + 0.5;

        AffineTransform::translation(o_r, o_c)
            .compose(self)
            .compose(&AffineTransform::translation(-o_r, -o_c))
    }

    pub fn map(&self, row: f32, col: f32) -> (f32, f32) {
        let m = &self.m;
        (
            m[0][0] * row + m[0][1] * col + m[0][2],
            m[1][0] * row + m[1][1] * col + m[1][2],
        )
    }
}

/// Ranges the random transforms are drawn from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AugmentParams {
    /// degrees, drawn from `[-rotation_range, rotation_range]`
    pub rotation_range: f32,
    /// fraction of the frame width
    pub width_shift_range: f32,
    /// fraction of the frame height
    pub height_shift_range: f32,
    /// radians
    pub shear_intensity: f32,
    pub zoom_range: (f32, f32),
}

impl Default for AugmentParams {
    fn default() -> Self {
        Self {
            rotation_range: 45.0,
            width_shift_range: 0.25,
            height_shift_range: 0.25,
            shear_intensity: 0.79,
            zoom_range: (1.25, 1.25),
        }
    }
}

/// One draw of random transform parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AugmentDraw {
    pub theta: f32,
    pub t_row: f32,
    pub t_col: f32,
    pub shear: f32,
    pub z_row: f32,
    pub z_col: f32,
}

fn uniform<R: Rng + ?Sized>(rng: &mut R, lo: f32, hi: f32) -> f32 {
    if lo < hi {
        rng.gen_range(lo..hi)
    } else {
        lo
    }
}

impl AugmentParams {
    pub fn draw<R: Rng + ?Sized>(&self, rows: usize, cols: usize, rng: &mut R) -> AugmentDraw {
        let rot = self.rotation_range.abs();
        let h_shift = self.height_shift_range.abs();
        let w_shift = self.width_shift_range.abs();
        let shear = self.shear_intensity.abs();
        let (z_lo, z_hi) = self.zoom_range;

        AugmentDraw {
            theta: uniform(rng, -rot, rot).to_radians(),
            t_row: uniform(rng, -h_shift, h_shift) * rows as f32,
            t_col: uniform(rng, -w_shift, w_shift) * cols as f32,
            shear: uniform(rng, -shear, shear),
            z_row: uniform(rng, z_lo, z_hi),
            z_col: uniform(rng, z_lo, z_hi),
        }
    }

    pub fn sample_transform<R: Rng + ?Sized>(&self, rows: usize, cols: usize, rng: &mut R) -> AffineTransform {
        self.draw(rows, cols, rng).transform(rows, cols)
    }
}

impl AugmentDraw {
    /// rotation, then shift, then shear, then zoom
    pub fn transform(&self, rows: usize, cols: usize) -> AffineTransform {
        AffineTransform::rotation(self.theta)
            .centered(rows, cols)
            .compose(&AffineTransform::translation(self.t_row, self.t_col))
            .compose(&AffineTransform::shear(self.shear).centered(rows, cols))
            .compose(&AffineTransform::zoom(self.z_row, self.z_col).centered(rows, cols))
    }
}

/// Applies one transform to every frame of `seq`
pub fn apply_to_sequence(seq: &GraySequence, t: &AffineTransform) -> GraySequence {
    let (frames, rows, cols) = seq.dim();

    // source pixel of every output pixel, shared by all frames
    let src: Vec<(usize, usize)> = (0..rows * cols)
        .map(|i| {
            let (r, c) = t.map((i / cols) as f32, (i % cols) as f32);
            (
                (r.round().max(0.0) as usize).min(rows - 1),
                (c.round().max(0.0) as usize).min(cols - 1),
            )
        })
        .collect();

    let mut out = Array3::zeros((frames, rows, cols));

    Zip::from(out.axis_iter_mut(Axis(0)))
        .and(seq.axis_iter(Axis(0)))
        .for_each(|mut out_f, in_f| {
            for (i, (r, c)) in src.iter().enumerate() {
                out_f[[i / cols, i % cols]] = in_f[[*r, *c]];
            }
        });

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn ramp(frames: usize, rows: usize, cols: usize) -> GraySequence {
        Array3::from_shape_fn((frames, rows, cols), |(f, r, c)| (f * 1000 + r * 10 + c) as f32)
    }

    #[test]
    fn test_identity_keeps_sequence() {
        let seq = ramp(3, 4, 5);
        assert_eq!(apply_to_sequence(&seq, &AffineTransform::identity()), seq);
    }

    #[test]
    fn test_translation_reads_shifted_pixels_with_edge_fill() {
        let seq = ramp(1, 4, 5);
        let out = apply_to_sequence(&seq, &AffineTransform::translation(1.0, 0.0));

        assert_eq!(out[[0, 0, 2]], seq[[0, 1, 2]]);
        assert_eq!(out[[0, 2, 4]], seq[[0, 3, 4]]);
        // last row samples past the edge and repeats it
        assert_eq!(out[[0, 3, 1]], seq[[0, 3, 1]]);
    }

    #[test]
    fn test_same_transform_on_every_frame() {
        let seq = ramp(3, 6, 6);
        let t = AffineTransform::rotation(0.3).centered(6, 6);
        let out = apply_to_sequence(&seq, &t);

        for f in 1..3 {
            let diff = &out.index_axis(Axis(0), f) - &out.index_axis(Axis(0), 0);
            assert!(diff.iter().all(|d| (*d - 1000.0 * f as f32).abs() < 1e-3));
        }
    }

    #[test]
    fn test_centered_zoom_keeps_anchor_fixed() {
        let t = AffineTransform::zoom(1.25, 1.25).centered(10, 20);
        let (r, c) = t.map(5.5, 10.5);

        assert!((r - 5.5).abs() < 1e-5);
        assert!((c - 10.5).abs() < 1e-5);

        let (r, _) = t.map(9.5, 10.5);
        assert!((r - 10.5).abs() < 1e-5);
    }

    #[test]
    fn test_compose_applies_right_operand_first() {
        let a = AffineTransform::translation(2.0, 0.0);
        let b = AffineTransform::zoom(3.0, 3.0);

        assert_eq!(a.compose(&b).map(1.0, 1.0), (5.0, 3.0));
        assert_eq!(b.compose(&a).map(1.0, 1.0), (9.0, 3.0));
    }

    #[test]
    fn test_draws_respect_ranges() {
        let params = AugmentParams::default();
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..200 {
            let d = params.draw(100, 150, &mut rng);

            assert!(d.theta.abs() <= 45f32.to_radians() + 1e-6);
            assert!(d.t_row.abs() <= 25.0 + 1e-4);
            assert!(d.t_col.abs() <= 37.5 + 1e-4);
            assert!(d.shear.abs() <= 0.79 + 1e-6);
            assert_eq!((d.z_row, d.z_col), (1.25, 1.25));
        }
    }

    #[test]
    fn test_zero_ranges_give_identity_like_draw() {
        let params = AugmentParams {
            rotation_range: 0.0,
            width_shift_range: 0.0,
            height_shift_range: 0.0,
            shear_intensity: 0.0,
            zoom_range: (1.0, 1.0),
        };
        let mut rng = StdRng::seed_from_u64(1);
        let seq = ramp(2, 5, 7);
        let t = params.sample_transform(5, 7, &mut rng);

        assert_eq!(apply_to_sequence(&seq, &t), seq);
    }
}
