use std::fmt;
use std::path::{Path, PathBuf};

use image::DynamicImage;
use log::{debug, info};
use ndarray::ArrayViewD;
use ort::execution_providers::{CPUExecutionProvider, CUDAExecutionProvider};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::TensorRef;

use crate::config::{InputLayout, Settings};
use crate::error::{inference_error, model_error, Error, Result};
use crate::model::mask::SegmentationMask;
use crate::model::transforms::{logits_to_class_map, prepare_input, resize_mask};

/// Compute device, fixed for the lifetime of a loaded model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Cpu,
    Gpu(i32),
}

impl Device {
    /// Negative indices select the CPU.
    pub fn from_index(index: i32) -> Self {
        if index < 0 {
            Device::Cpu
        } else {
            Device::Gpu(index)
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "CPU"),
            Device::Gpu(index) => write!(f, "GPU:{index}"),
        }
    }
}

/// Anything that turns an image into a class mask of the same size.
pub trait Segmenter {
    fn segment(&mut self, image: &DynamicImage) -> Result<SegmentationMask>;
}

#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub model_path: PathBuf,
    pub device: Device,
    pub input_width: u32,
    pub input_height: u32,
    pub input_layout: InputLayout,
    pub intra_threads: usize,
}

impl ModelConfig {
    pub fn from_settings(settings: &Settings, device: Device) -> Self {
        Self {
            model_path: settings.model_path.clone(),
            device,
            input_width: settings.input_width,
            input_height: settings.input_height,
            input_layout: settings.input_layout,
            intra_threads: settings.intra_threads,
        }
    }
}

/// Segmentation network executed with ONNX Runtime.
pub struct OnnxSegmenter {
    session: Session,
    input_name: String,
    config: ModelConfig,
}

impl OnnxSegmenter {
    pub fn load(config: ModelConfig) -> Result<Self> {
        if config.input_width == 0 || config.input_height == 0 {
            return Err(Error::ArgumentError("model input size must be non-zero".to_string()));
        }
        let session = load_model(&config.model_path, config.device, config.intra_threads)?;
        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .ok_or_else(|| Error::ModelError(format!("{:?} declares no inputs", config.model_path)))?;
        info!("Loaded model {:?} on {} (input '{}')", config.model_path, config.device, input_name);

        Ok(Self { session, input_name, config })
    }

    pub fn device(&self) -> Device {
        self.config.device
    }
}

impl Segmenter for OnnxSegmenter {
    fn segment(&mut self, image: &DynamicImage) -> Result<SegmentationMask> {
        let (orig_w, orig_h) = (image.width(), image.height());
        if orig_w == 0 || orig_h == 0 {
            return Err(Error::InferenceError("image has no pixels".to_string()));
        }

        let input = prepare_input(image, self.config.input_width, self.config.input_height, self.config.input_layout);
        debug!("Input tensor {:?} for {}x{} image", input.shape(), orig_w, orig_h);

        let input_tensor = TensorRef::from_array_view(&input).map_err(inference_error)?;
        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => input_tensor])
            .map_err(inference_error)?;
        let (_, output) = outputs
            .iter()
            .next()
            .ok_or_else(|| Error::InferenceError("model produced no outputs".to_string()))?;
        let (shape, data) = output.try_extract_tensor::<f32>().map_err(inference_error)?;
        let dims: Vec<usize> = shape.iter().map(|&d| d as usize).collect();
        let logits = ArrayViewD::from_shape(dims, data).map_err(inference_error)?;
        debug!("Output logits {:?}", logits.shape());

        let class_map = logits_to_class_map(logits)?;
        let mask = resize_mask(&SegmentationMask::new(class_map), orig_w, orig_h);
        mask.check_dimensions(orig_w as usize, orig_h as usize)?;

        Ok(mask)
    }
}

fn load_model(model_path: &Path, device: Device, intra_threads: usize) -> Result<Session> {
    if !model_path.is_file() {
        return Err(Error::ModelError(format!("model file {:?} not found", model_path)));
    }

    let provider = match device {
        Device::Cpu => CPUExecutionProvider::default().build(),
        Device::Gpu(index) => CUDAExecutionProvider::default().with_device_id(index).build().error_on_failure(),
    };

    let model = Session::builder()
        .map_err(model_error)?
        .with_execution_providers([provider])
        .map_err(|e| Error::DeviceError(format!("{device}: {e}")))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(model_error)?
        .with_intra_threads(intra_threads)
        .map_err(model_error)?
        .commit_from_file(model_path)
        .map_err(model_error)?;

    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negative_gpu_index_selects_cpu() {
        assert_eq!(Device::from_index(-1), Device::Cpu);
        assert_eq!(Device::from_index(-7), Device::Cpu);
        assert_eq!(Device::from_index(0), Device::Gpu(0));
        assert_eq!(Device::from_index(2).to_string(), "GPU:2");
    }

    #[test]
    fn test_missing_model_is_fatal() {
        let config = ModelConfig {
            model_path: PathBuf::from("/nonexistent/model.onnx"),
            device: Device::Cpu,
            input_width: 64,
            input_height: 64,
            input_layout: InputLayout::Nhwc,
            intra_threads: 1,
        };
        match OnnxSegmenter::load(config) {
            Err(Error::ModelError(msg)) => assert!(msg.contains("not found")),
            Err(other) => panic!("unexpected error {other}"),
            Ok(_) => panic!("loading a missing model must fail"),
        }
    }
}
