//! Console logger plus an optional debug log file.
//!
//! The console honours `RUST_LOG`; without it the crate logs at `info` and
//! other crates at `warn`. With `-d` every record of the crate down to `debug`
//! is also written to a timestamped file in the platform data directory.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Local;
use env_logger::fmt::{Color, Formatter};
use env_logger::{Target, WriteStyle};
use log::{Level, LevelFilter, Log, Metadata, Record};

use crate::error::Result;

pub const APP_NAME: &str = "agnor-annotator";
const CRATE_TARGET: &str = "agnor_annotator";

struct CompositeLogger {
    console_logger: env_logger::Logger,
    file_logger: Option<env_logger::Logger>,
}

impl Log for CompositeLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.console_logger.enabled(metadata) || self.file_logger.as_ref().is_some_and(|l| l.enabled(metadata))
    }

    fn log(&self, record: &Record) {
        if self.console_logger.enabled(record.metadata()) {
            self.console_logger.log(record);
        }
        if let Some(file_logger) = &self.file_logger {
            if file_logger.enabled(record.metadata()) {
                file_logger.log(record);
            }
        }
    }

    fn flush(&self) {
        self.console_logger.flush();
        if let Some(file_logger) = &self.file_logger {
            file_logger.flush();
        }
    }
}

pub fn log_directory() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
        .join("logs")
}

fn log_file_name() -> String {
    format!("{}_{}.log", APP_NAME, Local::now().format("%Y%m%d_%H%M%S"))
}

fn module_info(record: &Record) -> String {
    match (record.module_path(), record.line()) {
        (Some(module), Some(line)) => format!("{module}:{line}"),
        (Some(module), None) => module.to_string(),
        _ => "unknown".to_string(),
    }
}

fn console_logger() -> env_logger::Logger {
    let mut builder = env_logger::Builder::new();
    if std::env::var("RUST_LOG").is_ok() {
        builder.parse_env("RUST_LOG");
    } else {
        builder.filter(None, LevelFilter::Warn);
        builder.filter(Some(CRATE_TARGET), LevelFilter::Info);
    }

    builder.format(|buf: &mut Formatter, record: &Record| {
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S%.3f");

        let mut level_style = buf.style();
        match record.level() {
            Level::Error => level_style.set_color(Color::Red).set_bold(true),
            Level::Warn => level_style.set_color(Color::Yellow).set_bold(true),
            Level::Info => level_style.set_color(Color::Green).set_bold(true),
            Level::Debug => level_style.set_color(Color::Blue).set_bold(true),
            Level::Trace => level_style.set_color(Color::White),
        };
        let mut meta_style = buf.style();
        meta_style.set_color(Color::Rgb(120, 120, 120));

        writeln!(
            buf,
            "{} {} {} {}",
            meta_style.value(timestamp),
            level_style.value(record.level()),
            meta_style.value(module_info(record)),
            record.args()
        )
    });
    builder.build()
}

fn open_log_file(dir: &Path) -> std::io::Result<(File, PathBuf)> {
    fs::create_dir_all(dir)?;
    let path = dir.join(log_file_name());
    Ok((File::create(&path)?, path))
}

fn file_logger(file: File) -> env_logger::Logger {
    let mut builder = env_logger::Builder::new();
    builder
        .filter(None, LevelFilter::Warn)
        .filter(Some(CRATE_TARGET), LevelFilter::Debug)
        .write_style(WriteStyle::Never)
        .target(Target::Pipe(Box::new(file)))
        .format(|buf: &mut Formatter, record: &Record| {
            writeln!(
                buf,
                "{} {:<5} {} {}",
                Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                module_info(record),
                record.args()
            )
        });
    builder.build()
}

/// Install the process logger. Returns the log file path when `debug` is set.
///
/// The log file goes to [`log_directory`], or to the working directory when
/// that cannot be created.
pub fn setup_logger(debug: bool) -> Result<Option<PathBuf>> {
    let (file_logger, log_path) = if debug {
        let (file, path) = match open_log_file(&log_directory()) {
            Ok(opened) => opened,
            Err(_) => open_log_file(Path::new("."))?,
        };
        (Some(file_logger(file)), Some(path))
    } else {
        (None, None)
    };

    let composite_logger = CompositeLogger {
        console_logger: console_logger(),
        file_logger,
    };
    log::set_boxed_logger(Box::new(composite_logger))?;
    log::set_max_level(LevelFilter::Trace);

    Ok(log_path)
}
