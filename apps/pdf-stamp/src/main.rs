//! pdf-stamp
//!
//! Opens a PDF, replays a pixel-space field layout through the placement
//! editor and writes the stamped document plus the field configuration.

mod layout;

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use placement_core::{DocumentSource, EditorConfig, EditorEvent, EventEmitter, PlacementEditor};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::layout::{replay, Layout};

#[derive(Parser, Debug)]
#[command(name = "pdf-stamp")]
#[command(version, about = "Stamp text fields onto a PDF page from a pixel-space layout")]
struct Args {
    /// Input PDF
    input: PathBuf,

    /// Layout JSON with pixel positions of each field
    #[arg(short, long)]
    layout: PathBuf,

    /// Editor configuration (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output PDF; defaults to the configured download name
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Write the field configuration JSON here instead of stdout
    #[arg(long)]
    config_out: Option<PathBuf>,

    /// Fail when any field could not be drawn
    #[arg(long)]
    strict: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // stdout carries the field configuration; logs go to stderr
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = match &args.config {
        Some(path) => EditorConfig::from_file(path)?,
        None => EditorConfig::default(),
    };
    config.validate().context("Invalid editor configuration")?;
    let layout = Layout::from_file(&args.layout)?;

    let (events, mut event_rx) = EventEmitter::channel();
    let mut editor = PlacementEditor::open(config, DocumentSource::Path(args.input.clone()), events)
        .await
        .with_context(|| format!("Failed to open {}", args.input.display()))?;

    let viewport = match layout.page {
        Some(page) => editor.render_page(page).await?,
        None => editor.wait_for_render().await?,
    };
    tracing::info!(
        page = viewport.page_number,
        width = viewport.width_px,
        height = viewport.height_px,
        "Page ready"
    );

    let committed = replay(&mut editor, &layout)?;
    tracing::info!(committed, "Replayed layout");

    let report = editor.export_document().await?;
    if args.strict && !report.is_complete() {
        bail!("{} field mark(s) could not be drawn", report.failures.len());
    }
    let fields = editor.export_configuration();

    let output = args
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from(&editor.config().download_name));
    std::fs::write(&output, &report.bytes)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    tracing::info!(path = %output.display(), marks = report.marks_drawn, "Wrote stamped PDF");

    let json = serde_json::to_string_pretty(&fields)?;
    match &args.config_out {
        Some(path) => std::fs::write(path, json)
            .with_context(|| format!("Failed to write {}", path.display()))?,
        None => println!("{}", json),
    }

    drop(editor);
    while let Ok(event) = event_rx.try_recv() {
        if let EditorEvent::RenderFailed { page, reason } = event {
            tracing::warn!(page, %reason, "Render failed during session");
        }
    }

    Ok(())
}
