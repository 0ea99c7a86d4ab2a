use anyhow::{bail, Context, Result};
use clap::Parser;
use log::info;

use agnor_annotator::cli::Args;
use agnor_annotator::config::Settings;
use agnor_annotator::logging::setup_logger;
use agnor_annotator::model::{Device, ModelConfig, OnnxSegmenter};
use agnor_annotator::pipeline::{collect_inputs, Annotator};
use agnor_annotator::shell::Shell;

fn main() -> Result<()> {
    let args = Args::parse();
    let shell = Shell::new(!args.no_dialogs);

    if let Some(log_path) = setup_logger(args.debug).context("Failed to set up logging")? {
        info!("Debug log at {:?}", log_path);
    }

    if let Err(e) = args.validate() {
        shell.report_fatal("Invalid arguments", &e);
        return Err(e.into());
    }

    let mut settings = match Settings::load(args.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            shell.report_fatal("Could not read settings", &e);
            return Err(e.into());
        }
    };
    args.apply(&mut settings);

    let inputs = if args.inputs.is_empty() {
        match shell.pick_input_folder() {
            Some(folder) => vec![folder],
            None => bail!("No input images given"),
        }
    } else {
        args.inputs.clone()
    };
    let images = collect_inputs(&inputs);
    if images.is_empty() {
        shell.report_fatal("No images found", &format!("{:?}", inputs));
        bail!("No supported images in {:?}", inputs);
    }

    let device = Device::from_index(args.gpu);
    let segmenter = match OnnxSegmenter::load(ModelConfig::from_settings(&settings, device)) {
        Ok(segmenter) => segmenter,
        Err(e) => {
            shell.report_fatal("Could not load the model", &e);
            return Err(e.into());
        }
    };

    info!("Annotating {} image(s) on {}", images.len(), segmenter.device());
    let mut annotator = Annotator::new(segmenter, settings, args.run_options());
    let report = annotator.run(&images);
    shell.report_summary(&report);

    if !report.pending.is_empty() {
        bail!("{} annotation(s) could not be written", report.pending.len());
    }
    Ok(())
}
