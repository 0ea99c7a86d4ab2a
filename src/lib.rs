//! Segments AgNOR-stained slide images with a pre-trained network and writes
//! the predicted nuclei and AgNORs as labelme polygon annotations.

pub mod cli;
pub mod config;
pub mod contours;
pub mod error;
pub mod labelme;
pub mod logging;
pub mod measurements;
pub mod model;
pub mod overlay;
pub mod pipeline;
pub mod shell;

pub use error::{Error, Result};
