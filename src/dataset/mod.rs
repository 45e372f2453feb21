pub mod classes;
pub mod table;
pub mod writer;

pub use classes::*;
pub use table::{DatasetHeader, TableReader, TableWriter};
pub use writer::*;
