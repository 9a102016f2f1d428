use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use find_faces::{config, extract_faces, load_image, to_json, DetectorModel, Pipeline};
use log::info;

#[derive(Parser)]
#[command(name = "find_faces")]
#[command(
    version,
    about = "Detect faces in an image and print their boxes and embeddings as JSON"
)]
struct Cli {
    /// Image to scan
    file: PathBuf,

    /// Face detection model, "hog" or "cnn"
    #[arg(long, default_value_t = DetectorModel::Cnn)]
    model: DetectorModel,

    /// Config file (defaults to the installed config)
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Warn)
        .format_target(false)
        .format_timestamp(None)
        .parse_default_env()
        .init();

    let cli = Cli::parse();

    let img = load_image(&cli.file)?;
    let cfg = config::load_config(cli.config.as_deref())?;

    info!(
        "Scanning {} with the {} detector",
        cli.file.display(),
        cli.model
    );

    let mut pipeline = Pipeline::new(cfg.model_paths(), cfg.detect_options());
    let faces = extract_faces(&mut pipeline, &img, cli.model)
        .with_context(|| format!("finding faces in {}", cli.file.display()))?;

    println!("{}", to_json(&faces)?);
    Ok(())
}
