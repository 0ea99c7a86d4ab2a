pub mod mask;
pub mod segmenter;
pub mod transforms;

pub use mask::SegmentationMask;
pub use segmenter::{Device, ModelConfig, OnnxSegmenter, Segmenter};
