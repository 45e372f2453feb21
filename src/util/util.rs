use ndarray::{Array1, Array2, Array3, Array4, Array5};

pub type Float = f32;
pub type Array1D = Array1< Float >;
pub type Array2D = Array2< Float >;

/// Single grayscale frame, `rows x columns`, values in `[0, 255]`
pub type GrayFrame = Array2< Float >;
/// Grayscale sequence before normalization, `frames x rows x columns`
pub type GraySequence = Array3< Float >;
/// Normalized sequence, `frames x 3 x rows x columns`
pub type FrameSequence = Array4< Float >;
/// Batch of normalized sequences, `batch x frames x 3 x rows x columns`
pub type SequenceBatch = Array5< Float >;
/// One-hot labels, `batch x classes`
pub type LabelBatch = Array2< i32 >;

pub const CHANNELS: usize = 3;
