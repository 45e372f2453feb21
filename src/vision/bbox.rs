use image::{imageops, GrayImage};

use serde::{Deserialize, Serialize};

/// Axis-aligned detection box in pixel coordinates of the image it was found in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    /// Clips the box to an image of `img_w x img_h`. Returns None when nothing is left
    pub fn clamp_to(&self, img_w: u32, img_h: u32) -> Option<BoundingBox> {
        if self.x >= img_w || self.y >= img_h {
            return None;
        }

        let width = self.width.min(img_w - self.x);
        let height = self.height.min(img_h - self.y);

        if width == 0 || height == 0 {
            return None;
        }

        Some(BoundingBox::new(self.x, self.y, width, height))
    }

    /// Copies the boxed region out of `img`
    pub fn crop(&self, img: &GrayImage) -> Option<GrayImage> {
        let b = self.clamp_to(img.width(), img.height())?;
        Some(imageops::crop_imm(img, b.x, b.y, b.width, b.height).to_image())
    }

    /// Same-object test used when grouping raw detections,
    /// `eps` is the relative tolerance on every edge
    pub fn is_similar(&self, other: &BoundingBox, eps: f32) -> bool {
        let delta = eps
            * (self.width.min(other.width) + self.height.min(other.height)) as f32
            * 0.5;

        let close = |a: u32, b: u32| (a as f32 - b as f32).abs() <= delta;

        close(self.x, other.x)
            && close(self.y, other.y)
            && close(self.right(), other.right())
            && close(self.bottom(), other.bottom())
    }

    /// True when `self` lies inside `outer` grown by 20% of its size on each side
    pub fn is_nested_in(&self, outer: &BoundingBox) -> bool {
        let dx = (outer.width as f32 * 0.2).round() as i64;
        let dy = (outer.height as f32 * 0.2).round() as i64;

        self.x as i64 >= outer.x as i64 - dx
            && self.y as i64 >= outer.y as i64 - dy
            && self.right() as i64 <= outer.right() as i64 + dx
            && self.bottom() as i64 <= outer.bottom() as i64 + dy
    }
}
