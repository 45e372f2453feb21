mod util;
mod normalize;
pub mod array_helpers;

pub use util::*;
pub use normalize::*;
