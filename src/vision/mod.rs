mod bbox;
mod integral;
mod opencv_xml;
pub mod cascade;
pub mod localizer;

use image::GrayImage;

pub use bbox::*;
pub use integral::*;
pub use cascade::{CascadeDetector, CascadeModel};
pub use localizer::RegionLocalizer;

/// Object detector returning candidate boxes in the coordinates of `img`
pub trait RegionDetector: Send + Sync {
    fn detect(&self, img: &GrayImage) -> Vec<BoundingBox>;
}

impl<F> RegionDetector for F
where
    F: Fn(&GrayImage) -> Vec<BoundingBox> + Send + Sync,
{
    fn detect(&self, img: &GrayImage) -> Vec<BoundingBox> {
        self(img)
    }
}
