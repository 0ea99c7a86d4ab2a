use std::path::PathBuf;

/// Annotator error enum.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO Error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Image Error: {0}")]
    ImageError(#[from] image::ImageError),

    #[error("Model Error: {0}")]
    ModelError(String),

    #[error("Inference Error: {0}")]
    InferenceError(String),

    #[error("Invalid Device: {0}")]
    DeviceError(String),

    #[error("Mask is {mask_width}x{mask_height} but image is {image_width}x{image_height}")]
    DimensionMismatch {
        mask_width: usize,
        mask_height: usize,
        image_width: usize,
        image_height: usize,
    },

    #[error("JSON Error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Settings Error: {0}")]
    SettingsError(#[from] serde_yaml::Error),

    #[error("Annotation write to {path:?} failed: {source}")]
    WriteError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Argument Error: {0}")]
    ArgumentError(String),

    #[error("Logger Error: {0}")]
    LoggerError(#[from] log::SetLoggerError),
}

pub type Result<T> = std::result::Result<T, Error>;

// ONNX Runtime errors are kept as text.
pub(crate) fn model_error<E: std::fmt::Display>(e: E) -> Error {
    Error::ModelError(e.to_string())
}

pub(crate) fn inference_error<E: std::fmt::Display>(e: E) -> Error {
    Error::InferenceError(e.to_string())
}
