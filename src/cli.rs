use std::path::PathBuf;

use clap::Parser;

use crate::config::{HolePolicy, Settings};
use crate::contours::smoothing::SMOOTHED_NUCLEUS_POINTS;
use crate::error::{Error, Result};
use crate::measurements::{PatientGroup, RecordInfo};
use crate::pipeline::RunOptions;

#[derive(Parser, Debug, Clone)]
#[command(name = "agnor-annotator")]
#[command(about = "Segment AgNOR slide images and write labelme annotations", long_about = None)]
pub struct Args {
    /// Image files or directories; a folder picker opens when none are given
    pub inputs: Vec<PathBuf>,

    /// Also write a debug log file
    #[arg(short, long)]
    pub debug: bool,

    /// CUDA device index, any negative value selects the CPU
    #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
    pub gpu: i32,

    /// ONNX model file
    #[arg(long)]
    pub model: Option<PathBuf>,

    /// YAML settings file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// How holes inside regions are written
    #[arg(long, value_enum)]
    pub holes: Option<HolePolicy>,

    /// Smallest region kept, in pixels
    #[arg(long)]
    pub min_area: Option<u32>,

    /// Polygon simplification tolerance in pixels, 0 keeps every boundary pixel
    #[arg(long, allow_negative_numbers = true)]
    pub epsilon: Option<f64>,

    /// Write every polygon without nucleus/AgNOR filtering
    #[arg(long)]
    pub no_analysis: bool,

    /// Resample nucleus contours to evenly spaced points before the shape checks
    #[arg(long)]
    pub smooth: bool,

    /// Write filtered-out polygons with a `discarded_` label
    #[arg(long)]
    pub keep_discarded: bool,

    /// Restrict nuclei to the rectangles of the existing annotation file
    #[arg(long)]
    pub bbox: bool,

    /// Write `<stem>_overlay.png` next to each image
    #[arg(long)]
    pub overlay: bool,

    /// Append measurements to CSV files in this directory
    #[arg(long)]
    pub measurements: Option<PathBuf>,

    /// Patient record identifier written to the measurement files
    #[arg(long, default_value = "unknown")]
    pub record: String,

    /// Patient name written to the measurement files
    #[arg(long, default_value = "")]
    pub patient: String,

    /// Study group of the patient
    #[arg(long, value_enum, default_value_t = PatientGroup::Unknown)]
    pub group: PatientGroup,

    /// Exam date written to the measurement files
    #[arg(long, default_value = "")]
    pub exam_date: String,

    /// Exam instance (e.g. T0, T1) written to the measurement files
    #[arg(long, default_value = "")]
    pub exam_instance: String,

    /// Anatomical site of the sample
    #[arg(long, default_value = "")]
    pub site: String,

    /// Never open dialogs
    #[arg(long)]
    pub no_dialogs: bool,
}

impl Args {
    pub fn validate(&self) -> Result<()> {
        if let Some(epsilon) = self.epsilon {
            if !epsilon.is_finite() || epsilon < 0.0 {
                return Err(Error::ArgumentError(format!("--epsilon must be >= 0, got {epsilon}")));
            }
        }
        Ok(())
    }

    /// Override the loaded settings with the options given on the command line.
    pub fn apply(&self, settings: &mut Settings) {
        if let Some(model) = &self.model {
            settings.model_path = model.clone();
        }
        if let Some(holes) = self.holes {
            settings.hole_policy = holes;
        }
        if let Some(min_area) = self.min_area {
            settings.default_min_area = min_area;
        }
        if let Some(epsilon) = self.epsilon {
            settings.simplify_epsilon = epsilon;
        }
        if self.no_analysis {
            settings.analysis.enabled = false;
        }
        if self.keep_discarded {
            settings.analysis.keep_discarded = true;
        }
        if self.smooth {
            settings.analysis.smooth_nucleus_points = Some(SMOOTHED_NUCLEUS_POINTS);
        }
    }

    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            use_bounding_boxes: self.bbox,
            write_overlay: self.overlay,
            measurements_dir: self.measurements.clone(),
            record: RecordInfo {
                record: self.record.clone(),
                patient_name: self.patient.clone(),
                group: self.group,
                exam_date: self.exam_date.clone(),
                exam_instance: self.exam_instance.clone(),
                anatomical_site: self.site.clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Device;

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["agnor-annotator"]);
        assert_eq!(args.gpu, -1);
        assert!(args.inputs.is_empty());
        assert!(!args.debug);
        assert_eq!(args.record, "unknown");
        args.validate().unwrap();
    }

    #[test]
    fn test_negative_gpu_index() {
        let args = Args::parse_from(["agnor-annotator", "--gpu", "-1", "slide.jpg"]);
        assert_eq!(args.gpu, -1);
        assert_eq!(args.inputs, vec![PathBuf::from("slide.jpg")]);

        let args = Args::parse_from(["agnor-annotator", "-d", "--gpu", "0"]);
        assert_eq!(args.gpu, 0);
        assert!(args.debug);
    }

    #[test]
    fn test_any_negative_gpu_index_means_cpu() {
        let args = Args::parse_from(["agnor-annotator", "--gpu", "-3"]);
        args.validate().unwrap();
        assert_eq!(Device::from_index(args.gpu), Device::Cpu);
    }

    #[test]
    fn test_apply_overrides() {
        let args = Args::parse_from([
            "agnor-annotator",
            "--holes",
            "inner",
            "--epsilon",
            "0",
            "--min-area",
            "5",
            "--no-analysis",
            "--smooth",
            "--model",
            "other.onnx",
        ]);
        let mut settings = Settings::default();
        args.apply(&mut settings);
        assert_eq!(settings.hole_policy, HolePolicy::Inner);
        assert_eq!(settings.simplify_epsilon, 0.0);
        assert_eq!(settings.default_min_area, 5);
        assert!(!settings.analysis.enabled);
        assert_eq!(settings.analysis.smooth_nucleus_points, Some(SMOOTHED_NUCLEUS_POINTS));
        assert_eq!(settings.model_path, PathBuf::from("other.onnx"));
    }

    #[test]
    fn test_record_details() {
        let args = Args::parse_from([
            "agnor-annotator",
            "--record",
            "R-17",
            "--patient",
            "Jane Roe",
            "--group",
            "carcinoma",
            "--exam-date",
            "2023-05-02",
            "--exam-instance",
            "T1",
            "--site",
            "tongue",
        ]);
        let record = args.run_options().record;
        assert_eq!(record.record, "R-17");
        assert_eq!(record.patient_name, "Jane Roe");
        assert_eq!(record.group, PatientGroup::Carcinoma);
        assert_eq!(record.exam_instance, "T1");
        assert_eq!(record.anatomical_site, "tongue");
        assert_eq!(Args::parse_from(["agnor-annotator"]).run_options().record, RecordInfo::default());
    }

    #[test]
    fn test_negative_epsilon_rejected() {
        let args = Args::parse_from(["agnor-annotator", "--epsilon", "-2"]);
        assert!(args.validate().is_err());
    }
}
