use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::Result;

// Default values for configuration
pub const DEFAULT_MODEL_PATH: &str = "models/agnor_densenet169_linknet.onnx";
pub const DEFAULT_INPUT_WIDTH: u32 = 640;
pub const DEFAULT_INPUT_HEIGHT: u32 = 480;
pub const DEFAULT_MIN_AREA: u32 = 1;
pub const DEFAULT_SIMPLIFY_EPSILON: f64 = 1.0;
pub const DEFAULT_WRITE_RETRIES: u32 = 2;
pub const DEFAULT_INTRA_THREADS: usize = 4;

pub const MAX_NUCLEUS_PIXEL_COUNT: u32 = 67_000;
pub const MIN_NUCLEUS_PERCENT_PIXEL_COUNT: f64 = 0.02;
pub const MAX_NOR_PIXEL_COUNT: u32 = 3_521;
pub const MIN_NOR_PERCENT_PIXEL_COUNT: f64 = 0.0017;
pub const MAX_CONTOUR_PERCENT_DIFF: f64 = 5.0;

pub const NUCLEUS_LABEL: &str = "nucleus";
pub const NOR_LABEL: &str = "cluster";
pub const DISCARDED_PREFIX: &str = "discarded_";

/// Raster formats picked up when a directory is given as input.
pub const IMAGE_EXTENSIONS: [&str; 7] = ["jpg", "jpeg", "png", "tif", "tiff", "bmp", "webp"];

/// How holes inside a foreground region are represented in the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum HolePolicy {
    /// Only the outer boundary is written; the polygon covers its holes.
    #[default]
    Ignore,
    /// Each hole becomes an extra shape sharing the outer shape's group id.
    Inner,
}

/// Memory layout of the model input tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputLayout {
    #[default]
    Nhwc,
    Nchw,
}

/// A named output class made of one or more mask values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassSpec {
    pub label: String,
    pub values: Vec<u8>,
    #[serde(default)]
    pub min_area: Option<u32>,
}

impl ClassSpec {
    pub fn new(label: &str, values: &[u8]) -> Self {
        Self {
            label: label.to_string(),
            values: values.to_vec(),
            min_area: None,
        }
    }

    pub fn with_min_area(mut self, min_area: u32) -> Self {
        self.min_area = Some(min_area);
        self
    }

    pub fn contains(&self, value: u8) -> bool {
        self.values.contains(&value)
    }

    /// Class id used for ordering and overlays: the smallest mask value of the class.
    pub fn class_id(&self) -> u8 {
        self.values.iter().copied().min().unwrap_or(0)
    }
}

/// Nucleus and AgNOR filters applied after polygon extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisSettings {
    pub enabled: bool,
    pub nucleus_label: String,
    pub nor_label: String,
    pub max_nucleus_pixels: u32,
    pub min_nucleus_percent: f64,
    pub max_nor_pixels: u32,
    pub min_nor_percent: f64,
    pub max_convex_diff_percent: f64,
    /// Resample kept nuclei to this many contour points before the shape checks.
    pub smooth_nucleus_points: Option<usize>,
    pub keep_discarded: bool,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            nucleus_label: NUCLEUS_LABEL.to_string(),
            nor_label: NOR_LABEL.to_string(),
            max_nucleus_pixels: MAX_NUCLEUS_PIXEL_COUNT,
            min_nucleus_percent: MIN_NUCLEUS_PERCENT_PIXEL_COUNT,
            max_nor_pixels: MAX_NOR_PIXEL_COUNT,
            min_nor_percent: MIN_NOR_PERCENT_PIXEL_COUNT,
            max_convex_diff_percent: MAX_CONTOUR_PERCENT_DIFF,
            smooth_nucleus_points: None,
            keep_discarded: false,
        }
    }
}

/// Settings that can be stored in a YAML file and overridden from the command line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub model_path: PathBuf,
    pub input_width: u32,
    pub input_height: u32,
    pub input_layout: InputLayout,
    pub intra_threads: usize,
    pub classes: Vec<ClassSpec>,
    pub default_min_area: u32,
    pub simplify_epsilon: f64,
    pub hole_policy: HolePolicy,
    pub write_retries: u32,
    pub analysis: AnalysisSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from(DEFAULT_MODEL_PATH),
            input_width: DEFAULT_INPUT_WIDTH,
            input_height: DEFAULT_INPUT_HEIGHT,
            input_layout: InputLayout::default(),
            intra_threads: DEFAULT_INTRA_THREADS,
            classes: default_classes(),
            default_min_area: DEFAULT_MIN_AREA,
            simplify_epsilon: DEFAULT_SIMPLIFY_EPSILON,
            hole_policy: HolePolicy::default(),
            write_retries: DEFAULT_WRITE_RETRIES,
            analysis: AnalysisSettings::default(),
        }
    }
}

/// Mask values: 0 background, 1 nucleus, 2 AgNOR. AgNORs sit inside nuclei,
/// so the nucleus class covers both values.
pub fn default_classes() -> Vec<ClassSpec> {
    vec![
        ClassSpec::new(NUCLEUS_LABEL, &[1, 2]),
        ClassSpec::new(NOR_LABEL, &[2]),
    ]
}

impl Settings {
    /// Load settings from a YAML file. A missing file yields the defaults; a
    /// malformed one is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            debug!("No settings file given, using defaults");
            return Ok(Self::default());
        };

        if !path.exists() {
            warn!("Settings file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)?;
        let settings: Settings = serde_yaml::from_str(&contents)?;
        info!("Loaded settings from {:?}", path);
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_classes_cover_agnor_inside_nucleus() {
        let classes = default_classes();
        assert!(classes[0].contains(1));
        assert!(classes[0].contains(2));
        assert!(!classes[1].contains(1));
        assert_eq!(classes[1].class_id(), 2);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = "input_width: 1024\nhole_policy: inner\nanalysis:\n  enabled: false\n";
        let settings: Settings = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(settings.input_width, 1024);
        assert_eq!(settings.input_height, DEFAULT_INPUT_HEIGHT);
        assert_eq!(settings.hole_policy, HolePolicy::Inner);
        assert!(!settings.analysis.enabled);
        assert_eq!(settings.analysis.max_nor_pixels, MAX_NOR_PIXEL_COUNT);
        assert_eq!(settings.classes, default_classes());
    }

    #[test]
    fn test_missing_settings_file_uses_defaults() {
        let settings = Settings::load(Some(Path::new("/nonexistent/settings.yaml"))).unwrap();
        assert_eq!(settings, Settings::default());
    }
}
