//! Native dialogs around the batch run.
//!
//! Everything shown in a dialog is also logged, so a headless run with
//! `--no-dialogs` loses nothing.

use std::fmt::Display;
use std::path::PathBuf;

use log::{error, info, warn};
use rfd::{FileDialog, MessageButtons, MessageDialog, MessageLevel};

use crate::logging::APP_NAME;
use crate::pipeline::BatchReport;

#[derive(Debug, Clone, Copy)]
pub struct Shell {
    dialogs: bool,
}

impl Shell {
    pub fn new(dialogs: bool) -> Self {
        Self { dialogs }
    }

    /// Ask for a folder of slide images. `None` when dialogs are disabled or
    /// the picker was closed.
    pub fn pick_input_folder(&self) -> Option<PathBuf> {
        if !self.dialogs {
            return None;
        }
        let folder = FileDialog::new().set_title("Open folder with slide images").pick_folder();
        match &folder {
            Some(path) => info!("Selected folder {:?}", path),
            None => info!("Folder picker closed"),
        }
        folder
    }

    pub fn report_fatal(&self, context: &str, err: &dyn Display) {
        error!("{}: {}", context, err);
        self.show(MessageLevel::Error, context, &err.to_string());
    }

    pub fn report_summary(&self, report: &BatchReport) {
        let summary = report.summary();
        if report.is_success() {
            info!("{}", summary);
            self.show(MessageLevel::Info, "Annotation finished", &summary);
        } else {
            warn!("{}", summary);
            self.show(MessageLevel::Warning, "Annotation finished with problems", &summary);
        }
    }

    fn show(&self, level: MessageLevel, title: &str, description: &str) {
        if !self.dialogs {
            return;
        }
        MessageDialog::new()
            .set_level(level)
            .set_title(&format!("{APP_NAME}: {title}"))
            .set_description(description)
            .set_buttons(MessageButtons::Ok)
            .show();
    }
}
