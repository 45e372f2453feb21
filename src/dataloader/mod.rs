pub mod databatch;
pub mod dataloader;
pub mod generator;
pub mod split;

pub use databatch::*;
pub use dataloader::*;
pub use generator::*;
pub use split::*;
