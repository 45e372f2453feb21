use image::imageops::{self, FilterType};
use image::GrayImage;

use log::debug;

use crate::err::RegionMiss;
use crate::util::GrayFrame;
use crate::vision::{BoundingBox, RegionDetector};

/// Finds the oral region of a grayscale frame: one face, then the lowest
/// mouth candidate inside it, resized to `rows x columns`.
pub struct RegionLocalizer {
    face: Box<dyn RegionDetector>,
    mouth: Box<dyn RegionDetector>,
    rows: u32,
    columns: u32,
}

impl RegionLocalizer {
    pub fn new(
        face: Box<dyn RegionDetector>,
        mouth: Box<dyn RegionDetector>,
        rows: u32,
        columns: u32,
    ) -> Self {
        Self {
            face,
            mouth,
            rows,
            columns,
        }
    }

    pub fn rows(&self) -> u32 {
        self.rows
    }

    pub fn columns(&self) -> u32 {
        self.columns
    }

    pub fn locate_oral_region(&self, frame: &GrayImage) -> Result<GrayFrame, RegionMiss> {
        let faces = self.face.detect(frame);

        if faces.len() != 1 {
            return Err(RegionMiss::AmbiguousOrNoFace { count: faces.len() });
        }

        let face = faces[0]
            .crop(frame)
            .ok_or(RegionMiss::AmbiguousOrNoFace { count: 0 })?;

        let mouth_box = select_lowest(&self.mouth.detect(&face)).ok_or(RegionMiss::NoMouthDetected)?;
        let mouth = mouth_box.crop(&face).ok_or(RegionMiss::NoMouthDetected)?;

        debug!("Face {:?}, mouth {:?}", faces[0], mouth_box);

        let resized = imageops::resize(&mouth, self.columns, self.rows, FilterType::Triangle);

        Ok(to_frame(&resized))
    }
}

/// Candidate with the largest `y`, the first one wins on ties
pub fn select_lowest(candidates: &[BoundingBox]) -> Option<BoundingBox> {
    candidates
        .iter()
        .fold(None, |best: Option<BoundingBox>, c| match best {
            Some(b) if b.y >= c.y => Some(b),
            _ => Some(*c),
        })
}

pub fn to_frame(img: &GrayImage) -> GrayFrame {
    let (w, h) = img.dimensions();
    GrayFrame::from_shape_fn((h as usize, w as usize), |(r, c)| {
        img.get_pixel(c as u32, r as u32)[0] as f32
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn fixed(boxes: Vec<BoundingBox>) -> Box<dyn RegionDetector> {
        Box::new(move |_: &GrayImage| boxes.clone())
    }

    fn gradient(w: u32, h: u32) -> GrayImage {
        GrayImage::from_fn(w, h, |x, y| Luma([((x + y) % 256) as u8]))
    }

    #[test]
    fn test_select_lowest_prefers_largest_y() {
        let c = vec![
            BoundingBox::new(0, 5, 10, 10),
            BoundingBox::new(3, 30, 10, 10),
            BoundingBox::new(9, 30, 10, 10),
            BoundingBox::new(1, 12, 10, 10),
        ];

        assert_eq!(select_lowest(&c), Some(BoundingBox::new(3, 30, 10, 10)));
        assert_eq!(select_lowest(&[]), None);
    }

    #[test]
    fn test_zero_y_mouth_is_selectable() {
        let c = vec![BoundingBox::new(4, 0, 10, 10)];
        assert_eq!(select_lowest(&c), Some(BoundingBox::new(4, 0, 10, 10)));
    }

    #[test]
    fn test_rejects_missing_or_multiple_faces() {
        let none = RegionLocalizer::new(fixed(vec![]), fixed(vec![]), 4, 6);
        assert_eq!(
            none.locate_oral_region(&gradient(64, 64)),
            Err(RegionMiss::AmbiguousOrNoFace { count: 0 })
        );

        let two = RegionLocalizer::new(
            fixed(vec![BoundingBox::new(0, 0, 10, 10), BoundingBox::new(20, 20, 10, 10)]),
            fixed(vec![BoundingBox::new(0, 0, 5, 5)]),
            4,
            6,
        );
        assert_eq!(
            two.locate_oral_region(&gradient(64, 64)),
            Err(RegionMiss::AmbiguousOrNoFace { count: 2 })
        );
    }

    #[test]
    fn test_rejects_face_without_mouth() {
        let loc = RegionLocalizer::new(fixed(vec![BoundingBox::new(5, 5, 40, 40)]), fixed(vec![]), 4, 6);

        assert_eq!(
            loc.locate_oral_region(&gradient(64, 64)),
            Err(RegionMiss::NoMouthDetected)
        );
    }

    #[test]
    fn test_crops_lowest_mouth_and_resizes() {
        // face at (8, 8), mouth box relative to the face crop
        let img = GrayImage::from_fn(64, 64, |x, y| {
            if (8 + 4..8 + 24).contains(&x) && (8 + 28..8 + 38).contains(&y) {
                Luma([200])
            } else {
                Luma([10])
            }
        });

        let loc = RegionLocalizer::new(
            fixed(vec![BoundingBox::new(8, 8, 40, 40)]),
            fixed(vec![BoundingBox::new(4, 2, 20, 10), BoundingBox::new(4, 28, 20, 10)]),
            5,
            10,
        );

        let frame = loc.locate_oral_region(&img).unwrap();

        assert_eq!(frame.dim(), (5, 10));
        assert!(frame.iter().all(|v| (*v - 200.0).abs() < 1e-3));
    }
}
