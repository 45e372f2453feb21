//! Viola-Jones Haar cascade evaluated on an integral image.
//!
//! The model layout follows OpenCV's stump-based cascades: every stage is a
//! list of weak classifiers, each thresholding one rectangle feature, and a
//! window is accepted when it passes all stages. Cascades are read from
//! OpenCV's own `haarcascade_*.xml` files or from YAML (or JSON, which the
//! YAML reader accepts as well).

use std::fs;
use std::path::Path;

use image::GrayImage;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::err::{OsrError, OsrResult};
use crate::vision::{opencv_xml, BoundingBox, IntegralImage, RegionDetector};

/// Relative edge tolerance used to merge raw detections
pub const GROUP_EPS: f32 = 0.2;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightedRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub weight: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HaarFeature {
    pub rects: Vec<WeightedRect>,
    #[serde(default)]
    pub tilted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeakClassifier {
    pub feature: usize,
    pub threshold: f32,
    pub left: f32,
    pub right: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stage {
    pub threshold: f32,
    pub weak_classifiers: Vec<WeakClassifier>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CascadeModel {
    pub window_width: u32,
    pub window_height: u32,
    pub stages: Vec<Stage>,
    pub features: Vec<HaarFeature>,
}

impl CascadeModel {
    /// Loads an OpenCV XML cascade, or a YAML one when the file isn't XML
    pub fn from_file<P: AsRef<Path>>(filepath: P) -> OsrResult<Self> {
        let text = fs::read_to_string(filepath.as_ref())?;
        let model = Self::from_text(&text)?;

        debug!(
            "Loaded cascade {} : {} stages, {} features, window {}x{}",
            filepath.as_ref().display(),
            model.stages.len(),
            model.features.len(),
            model.window_width,
            model.window_height
        );

        Ok(model)
    }

    pub fn from_text(text: &str) -> OsrResult<Self> {
        let model: CascadeModel = if text.trim_start().starts_with('<') {
            opencv_xml::parse_cascade(text)?
        } else {
            serde_yaml::from_str(text)?
        };

        model.validate()?;
        Ok(model)
    }

    pub fn validate(&self) -> OsrResult<()> {
        if self.window_width < 3 || self.window_height < 3 {
            return Err(OsrError::InvalidCascade(format!(
                "window {}x{} is too small",
                self.window_width, self.window_height
            )));
        }

        if self.stages.is_empty() {
            return Err(OsrError::InvalidCascade("no stages".to_owned()));
        }

        for (idx, f) in self.features.iter().enumerate() {
            if f.tilted {
                return Err(OsrError::InvalidCascade(format!(
                    "feature {} is tilted, only upright features are supported",
                    idx
                )));
            }

            if f.rects.is_empty() {
                return Err(OsrError::InvalidCascade(format!("feature {} has no rects", idx)));
            }

            for r in f.rects.iter() {
                if r.width == 0
                    || r.height == 0
                    || r.x + r.width > self.window_width
                    || r.y + r.height > self.window_height
                {
                    return Err(OsrError::InvalidCascade(format!(
                        "feature {} has a rect outside the window",
                        idx
                    )));
                }
            }
        }

        for s in self.stages.iter() {
            for wc in s.weak_classifiers.iter() {
                if wc.feature >= self.features.len() {
                    return Err(OsrError::InvalidCascade(format!(
                        "weak classifier references missing feature {}",
                        wc.feature
                    )));
                }
            }
        }

        Ok(())
    }
}

struct ScaledRect {
    x: u32,
    y: u32,
    width: u32,
    height: u32,
    weight: f64,
}

/// Cascade features resized to one detection scale
struct ScaledCascade {
    win_w: u32,
    win_h: u32,
    norm: (u32, u32, u32, u32),
    features: Vec<Vec<ScaledRect>>,
}

fn scale_dim(v: u32, scale: f32) -> u32 {
    (v as f32 * scale).round() as u32
}

impl ScaledCascade {
    fn new(model: &CascadeModel, scale: f32) -> Self {
        let win_w = scale_dim(model.window_width, scale);
        let win_h = scale_dim(model.window_height, scale);

        // variance is taken over the window without its one pixel border
        let nx = scale_dim(1, scale).min(win_w - 1);
        let ny = scale_dim(1, scale).min(win_h - 1);
        let nw = scale_dim(model.window_width - 2, scale).clamp(1, win_w - nx);
        let nh = scale_dim(model.window_height - 2, scale).clamp(1, win_h - ny);
        let weight_scale = 1.0 / (nw as f64 * nh as f64);

        let features = model
            .features
            .iter()
            .map(|f| {
                let mut rects: Vec<ScaledRect> = f
                    .rects
                    .iter()
                    .map(|r| {
                        let x = scale_dim(r.x, scale).min(win_w - 1);
                        let y = scale_dim(r.y, scale).min(win_h - 1);
                        ScaledRect {
                            x,
                            y,
                            width: scale_dim(r.width, scale).clamp(1, win_w - x),
                            height: scale_dim(r.height, scale).clamp(1, win_h - y),
                            weight: r.weight as f64 * weight_scale,
                        }
                    })
                    .collect();

                // keep the feature zero-sum after rounding
                if rects.len() > 1 {
                    let area0 = (rects[0].width * rects[0].height) as f64;
                    let sum0: f64 = rects
                        .iter()
                        .skip(1)
                        .map(|r| r.weight * (r.width * r.height) as f64)
                        .sum();
                    rects[0].weight = -sum0 / area0;
                }

                rects
            })
            .collect();

        Self {
            win_w,
            win_h,
            norm: (nx, ny, nw, nh),
            features,
        }
    }

    fn feature_value(&self, ii: &IntegralImage, feature: usize, wx: u32, wy: u32) -> f64 {
        self.features[feature].iter().fold(0.0, |acc, r| {
            acc + r.weight * ii.rect_sum(wx + r.x, wy + r.y, r.width, r.height) as f64
        })
    }

    fn passes(&self, model: &CascadeModel, ii: &IntegralImage, wx: u32, wy: u32) -> bool {
        let (nx, ny, nw, nh) = self.norm;
        let std = ii.std_dev(wx + nx, wy + ny, nw, nh);

        for stage in model.stages.iter() {
            let stage_sum = stage.weak_classifiers.iter().fold(0.0f64, |acc, wc| {
                let val = self.feature_value(ii, wc.feature, wx, wy);
                if val < wc.threshold as f64 * std {
                    acc + wc.left as f64
                } else {
                    acc + wc.right as f64
                }
            });

            if stage_sum < stage.threshold as f64 {
                return false;
            }
        }

        true
    }
}

/// Multi-scale sliding-window detector over a cascade model
pub struct CascadeDetector {
    model: CascadeModel,
    scale_factor: f32,
    min_neighbors: usize,
}

impl CascadeDetector {
    pub fn new(model: CascadeModel) -> Self {
        Self {
            model,
            scale_factor: 1.3,
            min_neighbors: 5,
        }
    }

    pub fn from_file<P: AsRef<Path>>(filepath: P) -> OsrResult<Self> {
        Ok(Self::new(CascadeModel::from_file(filepath)?))
    }

    pub fn scale_factor(mut self, scale_factor: f32) -> Self {
        self.scale_factor = scale_factor;
        self
    }

    pub fn min_neighbors(mut self, min_neighbors: usize) -> Self {
        self.min_neighbors = min_neighbors;
        self
    }

    /// Every window accepted by the cascade, before grouping
    pub fn raw_detections(&self, img: &GrayImage) -> Vec<BoundingBox> {
        let ii = IntegralImage::new(img);
        let mut out = Vec::new();
        let mut scale = 1.0f32;

        loop {
            let sc = ScaledCascade::new(&self.model, scale);

            if sc.win_w > ii.width() || sc.win_h > ii.height() {
                break;
            }

            let step = if scale > 2.0 { scale } else { 2.0 * scale };
            let step = (step.round() as u32).max(1);

            let mut wy = 0;
            while wy + sc.win_h <= ii.height() {
                let mut wx = 0;
                while wx + sc.win_w <= ii.width() {
                    if sc.passes(&self.model, &ii, wx, wy) {
                        out.push(BoundingBox::new(wx, wy, sc.win_w, sc.win_h));
                    }
                    wx += step;
                }
                wy += step;
            }

            if self.scale_factor <= 1.0 {
                break;
            }
            scale *= self.scale_factor;
        }

        out
    }
}

impl RegionDetector for CascadeDetector {
    fn detect(&self, img: &GrayImage) -> Vec<BoundingBox> {
        let raw = self.raw_detections(img);
        let grouped = group_rectangles(&raw, self.min_neighbors, GROUP_EPS);

        debug!("Cascade : {} raw windows, {} grouped", raw.len(), grouped.len());

        grouped
    }
}

fn find_root(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}

/// Clusters similar boxes, averages every cluster with more than
/// `min_neighbors` members and drops clusters nested inside stronger ones.
/// `min_neighbors == 0` returns the input untouched.
pub fn group_rectangles(rects: &[BoundingBox], min_neighbors: usize, eps: f32) -> Vec<BoundingBox> {
    if min_neighbors == 0 || rects.is_empty() {
        return rects.to_vec();
    }

    let mut parent: Vec<usize> = (0..rects.len()).collect();

    for i in 0..rects.len() {
        for j in (i + 1)..rects.len() {
            if rects[i].is_similar(&rects[j], eps) {
                let (ri, rj) = (find_root(&mut parent, i), find_root(&mut parent, j));
                if ri != rj {
                    parent[rj] = ri;
                }
            }
        }
    }

    // cluster root -> (x, y, w, h sums, member count), in first-seen order
    let mut clusters: Vec<(usize, [u64; 4], usize)> = Vec::new();

    for (i, r) in rects.iter().enumerate() {
        let root = find_root(&mut parent, i);
        let pos = match clusters.iter().position(|c| c.0 == root) {
            Some(pos) => pos,
            None => {
                clusters.push((root, [0; 4], 0));
                clusters.len() - 1
            }
        };

        let entry = &mut clusters[pos];
        entry.1[0] += r.x as u64;
        entry.1[1] += r.y as u64;
        entry.1[2] += r.width as u64;
        entry.1[3] += r.height as u64;
        entry.2 += 1;
    }

    let averaged: Vec<(BoundingBox, usize)> = clusters
        .iter()
        .filter(|c| c.2 > min_neighbors)
        .map(|(_, s, n)| {
            let avg = |v: u64| ((v as f64) / (*n as f64)).round() as u32;
            (BoundingBox::new(avg(s[0]), avg(s[1]), avg(s[2]), avg(s[3])), *n)
        })
        .collect();

    averaged
        .iter()
        .enumerate()
        .filter(|(i, (r1, n1))| {
            !averaged.iter().enumerate().any(|(j, (r2, n2))| {
                j != *i && r1.is_nested_in(r2) && (*n2 > (*n1).max(3) || *n1 < 3)
            })
        })
        .map(|(_, (r, _))| *r)
        .collect()
}
