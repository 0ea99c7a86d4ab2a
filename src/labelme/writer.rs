use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::error::{Error, Result};
use crate::labelme::AnnotationDocument;

fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "annotation.json".to_string());
    path.with_file_name(format!(".{name}.tmp"))
}

fn write_to(doc: &AnnotationDocument, tmp: &Path, target: &Path) -> io::Result<()> {
    let file = File::create(tmp)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, doc)?;
    writer.flush()?;
    writer.get_ref().sync_all()?;
    drop(writer);
    fs::rename(tmp, target)
}

/// Write `doc` to `path` so that readers see either the previous file or the
/// complete new one. The document is only borrowed, a failed write can be
/// retried with the same value.
pub fn write_atomic(doc: &AnnotationDocument, path: &Path) -> Result<()> {
    let tmp = temp_path_for(path);
    match write_to(doc, &tmp, path) {
        Ok(()) => {
            debug!("Wrote {} shape(s) to {:?}", doc.shapes.len(), path);
            Ok(())
        }
        Err(source) => {
            if tmp.exists() {
                if let Err(e) = fs::remove_file(&tmp) {
                    warn!("Could not remove temporary file {:?}: {}", tmp, e);
                }
            }
            Err(Error::WriteError { path: path.to_path_buf(), source })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HolePolicy;

    fn doc() -> AnnotationDocument {
        AnnotationDocument::new(Path::new("img.png"), 4, 4, vec![0, 1], &[], HolePolicy::Ignore)
    }

    #[test]
    fn test_write_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("img.json");
        write_atomic(&doc(), &target).unwrap();

        assert!(target.is_file());
        let names: Vec<_> = fs::read_dir(dir.path()).unwrap().map(|e| e.unwrap().file_name()).collect();
        assert_eq!(names.len(), 1);
    }

    #[test]
    fn test_overwrite_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("img.json");
        fs::write(&target, "old").unwrap();
        write_atomic(&doc(), &target).unwrap();
        let content = fs::read_to_string(&target).unwrap();
        assert!(content.contains("\"imagePath\": \"img.png\""));
    }

    #[test]
    fn test_failed_write_reports_path_and_keeps_document() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("missing").join("img.json");
        let document = doc();
        match write_atomic(&document, &target) {
            Err(Error::WriteError { path, .. }) => assert_eq!(path, target),
            other => panic!("unexpected {other:?}"),
        }
        assert!(!target.exists());

        fs::create_dir(dir.path().join("missing")).unwrap();
        write_atomic(&document, &target).unwrap();
        assert!(target.is_file());
    }
}
