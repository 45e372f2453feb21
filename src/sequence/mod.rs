pub mod augment;
pub mod builder;

pub use augment::{AffineTransform, AugmentParams};
pub use builder::{equalize_length, SequenceBuilder};
