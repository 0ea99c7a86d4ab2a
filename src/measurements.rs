//! Pixel-count measurements of nuclei and their AgNORs.
//!
//! Rows are appended to `nucleus_measurements.csv` and `agnor_measurements.csv`
//! in the chosen directory, so several runs over the same record accumulate in
//! one pair of files. Kept nuclei are flagged `valid`; nuclei dropped as
//! overlapping or deformed are measured too and flagged `discarded`.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use itertools::Itertools;
use log::debug;

use crate::contours::geometry::point_in_polygon;
use crate::contours::{AnalysisOutcome, DiscardReason, PolygonAnnotation};
use crate::error::Result;

pub const NUCLEUS_FILE: &str = "nucleus_measurements.csv";
pub const AGNOR_FILE: &str = "agnor_measurements.csv";
pub const VALID_FLAG: &str = "valid";
pub const DISCARDED_FLAG: &str = "discarded";

const RECORD_COLUMNS: &str =
    "patient_record,patient_name,source_image,flag,group,exam_date,exam_instance,anatomical_site";

/// Study group of the patient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum PatientGroup {
    Control,
    Leukoplakia,
    Carcinoma,
    #[default]
    Unknown,
}

impl PatientGroup {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatientGroup::Control => "control",
            PatientGroup::Leukoplakia => "leukoplakia",
            PatientGroup::Carcinoma => "carcinoma",
            PatientGroup::Unknown => "unknown",
        }
    }
}

impl fmt::Display for PatientGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Patient and exam details repeated on every measurement row.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordInfo {
    pub record: String,
    pub patient_name: String,
    pub group: PatientGroup,
    pub exam_date: String,
    pub exam_instance: String,
    pub anatomical_site: String,
}

impl Default for RecordInfo {
    fn default() -> Self {
        Self {
            record: "unknown".to_string(),
            patient_name: String::new(),
            group: PatientGroup::default(),
            exam_date: String::new(),
            exam_instance: String::new(),
            anatomical_site: String::new(),
        }
    }
}

impl RecordInfo {
    fn csv_fields(&self, source_image: &str, flag: &str) -> String {
        format!(
            "{},{},{},{},{},{},{},{}",
            csv_field(&self.record),
            csv_field(&self.patient_name),
            csv_field(source_image),
            csv_field(flag),
            self.group,
            csv_field(&self.exam_date),
            csv_field(&self.exam_instance),
            csv_field(&self.anatomical_site),
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NucleusRecord {
    pub info: RecordInfo,
    pub source_image: String,
    pub flag: String,
    pub nucleus: usize,
    pub pixel_count: u32,
    pub kind: String,
    pub datetime: String,
}

impl NucleusRecord {
    pub fn csv_header() -> String {
        format!("{RECORD_COLUMNS},nucleus,nucleus_pixel_count,type,datetime")
    }

    pub fn to_csv_row(&self) -> String {
        format!(
            "{},{},{},{},{}",
            self.info.csv_fields(&self.source_image, &self.flag),
            self.nucleus,
            self.pixel_count,
            csv_field(&self.kind),
            self.datetime,
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AgnorRecord {
    pub info: RecordInfo,
    pub source_image: String,
    pub flag: String,
    pub nucleus: usize,
    pub agnor: usize,
    pub pixel_count: u32,
    pub kind: String,
    /// AgNOR pixels over nucleus pixels.
    pub nucleus_ratio: f64,
    /// AgNOR pixels over the largest AgNOR of the same nucleus.
    pub greatest_agnor_ratio: f64,
    /// AgNOR pixels over the smallest AgNOR of the same nucleus.
    pub smallest_agnor_ratio: f64,
    pub datetime: String,
}

impl AgnorRecord {
    pub fn csv_header() -> String {
        format!(
            "{RECORD_COLUMNS},nucleus,agnor,agnor_pixel_count,type,nucleus_ratio,greatest_agnor_ratio,smallest_agnor_ratio,datetime"
        )
    }

    pub fn to_csv_row(&self) -> String {
        format!(
            "{},{},{},{},{},{:.6},{:.6},{:.6},{}",
            self.info.csv_fields(&self.source_image, &self.flag),
            self.nucleus,
            self.agnor,
            self.pixel_count,
            csv_field(&self.kind),
            self.nucleus_ratio,
            self.greatest_agnor_ratio,
            self.smallest_agnor_ratio,
            self.datetime,
        )
    }
}

/// Columns shared by every row of one image.
struct RowContext<'a> {
    info: &'a RecordInfo,
    source_image: &'a str,
    datetime: &'a str,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Measurements {
    pub nuclei: Vec<NucleusRecord>,
    pub agnors: Vec<AgnorRecord>,
}

impl Measurements {
    /// Rows for the kept nuclei, then for the nuclei discarded as overlapping
    /// or deformed together with the stray AgNORs inside them. Discarded
    /// nuclei are numbered after the kept ones.
    pub fn from_outcome(outcome: &AnalysisOutcome, info: &RecordInfo, source_image: &str, datetime: &str) -> Self {
        let ctx = RowContext { info, source_image, datetime };
        let mut measurements = Self::default();

        for (nucleus_id, group) in outcome.nuclei.iter().enumerate() {
            let nors: Vec<&PolygonAnnotation> = group.nors.iter().collect();
            measurements.push_nucleus(&ctx, VALID_FLAG, nucleus_id, &group.nucleus, &nors);
        }

        let stray_nors: Vec<&PolygonAnnotation> = outcome
            .discarded
            .iter()
            .filter(|(_, reason)| *reason == DiscardReason::OutsideNucleus)
            .map(|(nor, _)| nor)
            .collect();
        let deformed = outcome
            .discarded
            .iter()
            .filter(|(_, reason)| *reason == DiscardReason::Deformed)
            .map(|(nucleus, _)| nucleus);
        for (offset, nucleus) in deformed.enumerate() {
            let nors: Vec<&PolygonAnnotation> = stray_nors
                .iter()
                .copied()
                .filter(|nor| nor.points.iter().any(|p| point_in_polygon(p, &nucleus.points)))
                .collect();
            measurements.push_nucleus(&ctx, DISCARDED_FLAG, outcome.nuclei.len() + offset, nucleus, &nors);
        }
        measurements
    }

    fn push_nucleus(
        &mut self,
        ctx: &RowContext,
        flag: &str,
        nucleus_id: usize,
        nucleus: &PolygonAnnotation,
        nors: &[&PolygonAnnotation],
    ) {
        let nucleus_pixels = nucleus.filled_pixel_count();
        self.nuclei.push(NucleusRecord {
            info: ctx.info.clone(),
            source_image: ctx.source_image.to_string(),
            flag: flag.to_string(),
            nucleus: nucleus_id,
            pixel_count: nucleus_pixels,
            kind: nucleus.label.clone(),
            datetime: ctx.datetime.to_string(),
        });

        let counts: Vec<u32> = nors.iter().map(|nor| nor.filled_pixel_count()).collect();
        let Some((smallest, greatest)) = counts.iter().map(|&c| c.max(1)).minmax().into_option() else {
            return;
        };
        for (agnor_id, (nor, &pixels)) in nors.iter().zip(&counts).enumerate() {
            let pixels_f = pixels as f64;
            self.agnors.push(AgnorRecord {
                info: ctx.info.clone(),
                source_image: ctx.source_image.to_string(),
                flag: flag.to_string(),
                nucleus: nucleus_id,
                agnor: agnor_id,
                pixel_count: pixels,
                kind: nor.label.clone(),
                nucleus_ratio: pixels_f / nucleus_pixels.max(1) as f64,
                greatest_agnor_ratio: pixels_f / greatest as f64,
                smallest_agnor_ratio: pixels_f / smallest as f64,
                datetime: ctx.datetime.to_string(),
            });
        }
    }

    /// Append to the two CSV files in `dir`, creating the directory and
    /// writing the headers when needed.
    pub fn append_to(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        append_rows(
            &dir.join(NUCLEUS_FILE),
            &NucleusRecord::csv_header(),
            self.nuclei.iter().map(NucleusRecord::to_csv_row),
        )?;
        append_rows(
            &dir.join(AGNOR_FILE),
            &AgnorRecord::csv_header(),
            self.agnors.iter().map(AgnorRecord::to_csv_row),
        )?;
        debug!(
            "Appended {} nucleus and {} AgNOR measurement(s) to {:?}",
            self.nuclei.len(),
            self.agnors.len(),
            dir
        );
        Ok(())
    }
}

fn append_rows(path: &Path, header: &str, rows: impl Iterator<Item = String>) -> Result<()> {
    let exists = path.is_file();
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut writer = BufWriter::new(file);
    if !exists {
        writeln!(writer, "{header}")?;
    }
    for row in rows {
        writeln!(writer, "{row}")?;
    }
    writer.flush()?;
    Ok(())
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contours::{ContourRole, NucleusGroup};
    use imageproc::point::Point;

    fn square(label: &str, x: i32, y: i32, size: i32) -> PolygonAnnotation {
        PolygonAnnotation {
            label: label.to_string(),
            class_id: if label == "nucleus" { 1 } else { 2 },
            points: vec![
                Point::new(x, y),
                Point::new(x + size - 1, y),
                Point::new(x + size - 1, y + size - 1),
                Point::new(x, y + size - 1),
            ],
            area: (size * size) as u32,
            role: ContourRole::Outer,
            group_id: None,
        }
    }

    fn info() -> RecordInfo {
        RecordInfo {
            record: "r1".to_string(),
            patient_name: "Doe, J".to_string(),
            group: PatientGroup::Leukoplakia,
            exam_date: "2023-05-02".to_string(),
            exam_instance: "T0".to_string(),
            anatomical_site: "tongue".to_string(),
        }
    }

    fn outcome() -> AnalysisOutcome {
        AnalysisOutcome {
            nuclei: vec![NucleusGroup {
                nucleus: square("nucleus", 0, 0, 20),
                nors: vec![square("cluster", 2, 2, 2), square("cluster", 8, 8, 4)],
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_ratios() {
        let m = Measurements::from_outcome(&outcome(), &info(), "slide.jpg", "202401011200");
        assert_eq!(m.nuclei.len(), 1);
        assert_eq!(m.nuclei[0].pixel_count, 400);
        assert_eq!(m.agnors.len(), 2);
        let small = &m.agnors[0];
        assert!((small.nucleus_ratio - 0.01).abs() < 1e-9);
        assert!((small.greatest_agnor_ratio - 0.25).abs() < 1e-9);
        assert!((small.smallest_agnor_ratio - 1.0).abs() < 1e-9);
        assert!((m.agnors[1].smallest_agnor_ratio - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_record_columns() {
        let m = Measurements::from_outcome(&outcome(), &info(), "slide.jpg", "202401011200");
        assert_eq!(
            m.nuclei[0].to_csv_row(),
            "r1,\"Doe, J\",slide.jpg,valid,leukoplakia,2023-05-02,T0,tongue,0,400,nucleus,202401011200"
        );
        assert!(NucleusRecord::csv_header().starts_with("patient_record,patient_name,source_image,flag,group,"));
        assert!(AgnorRecord::csv_header().contains(",anatomical_site,nucleus,agnor,agnor_pixel_count,"));
        assert_eq!(RecordInfo::default().group.to_string(), "unknown");
    }

    #[test]
    fn test_deformed_nuclei_are_measured_as_discarded() {
        let mut outcome = outcome();
        outcome.discarded = vec![
            (square("nucleus", 100, 100, 20), DiscardReason::Deformed),
            (square("nucleus", 300, 300, 20), DiscardReason::NoAgnor),
            (square("cluster", 105, 105, 3), DiscardReason::OutsideNucleus),
            (square("cluster", 500, 500, 3), DiscardReason::OutsideNucleus),
        ];
        let m = Measurements::from_outcome(&outcome, &info(), "slide.jpg", "202401011200");

        assert_eq!(m.nuclei.len(), 2);
        assert_eq!(m.nuclei[1].flag, DISCARDED_FLAG);
        assert_eq!(m.nuclei[1].nucleus, 1);
        assert_eq!(m.agnors.len(), 3);
        let stray = &m.agnors[2];
        assert_eq!(stray.flag, DISCARDED_FLAG);
        assert_eq!((stray.nucleus, stray.agnor, stray.pixel_count), (1, 0, 9));
    }

    #[test]
    fn test_headers_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let m = Measurements::from_outcome(&outcome(), &info(), "slide.jpg", "202401011200");
        m.append_to(dir.path()).unwrap();
        m.append_to(dir.path()).unwrap();

        let nuclei = fs::read_to_string(dir.path().join(NUCLEUS_FILE)).unwrap();
        let lines: Vec<_> = nuclei.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], NucleusRecord::csv_header());
        assert_eq!(lines.iter().filter(|l| l.starts_with("patient_record,")).count(), 1);

        let agnors = fs::read_to_string(dir.path().join(AGNOR_FILE)).unwrap();
        assert_eq!(agnors.lines().count(), 5);
    }

    #[test]
    fn test_fields_with_commas_are_quoted() {
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(csv_field("plain"), "plain");
    }
}
