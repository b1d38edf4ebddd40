use std::{
    fs::File,
    io::{self, BufWriter, Write},
    sync::Arc,
};

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use powerline_risk::{
    batch, config::Command, dataset, Analyzer, Config, ModelLifecycleManager, OnnxModelLoader,
};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let config = Config::parse();

    match &config.command {
        Command::Random => {
            let info = dataset::random_image(&config.dataset_root, &mut rand::thread_rng())
                .context("Failed to pick a random image")?;
            print_json(&mut io::stdout().lock(), &info, false)?;
        }
        Command::Analyze { image_ids, pretty } => {
            let analyzer = build_analyzer(&config);
            let mut stdout = io::stdout().lock();
            for image_id in image_ids {
                let report = analyzer.report(&config.dataset_root, image_id);
                print_json(&mut stdout, &report, *pretty)?;
            }
        }
        Command::Batch { output } => {
            let analyzer = build_analyzer(&config);
            let reports = batch::analyze_dataset(&analyzer, &config.dataset_root, true)
                .with_context(|| {
                    format!("Failed to analyze {}", config.dataset_root.display())
                })?;

            let mut writer: Box<dyn Write> = match output {
                Some(path) => Box::new(BufWriter::new(File::create(path).with_context(
                    || format!("Failed to create output file: {}", path.display()),
                )?)),
                None => Box::new(io::stdout().lock()),
            };
            for report in &reports {
                print_json(&mut writer, report, false)?;
            }
            writer.flush()?;
        }
    }

    Ok(())
}

fn build_analyzer(config: &Config) -> Analyzer<OnnxModelLoader> {
    let models = ModelLifecycleManager::new(config.model_loader(), &config.model_path);
    Analyzer::new(Arc::new(models), config.pipeline_options())
}

fn print_json<W: Write + ?Sized, T: Serialize>(out: &mut W, value: &T, pretty: bool) -> Result<()> {
    let line = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    writeln!(out, "{}", line).context("Failed to write output")
}
