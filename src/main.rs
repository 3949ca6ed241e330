use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use indoor_nav_rs::config::NavConfig;
use indoor_nav_rs::fingerprint::{MagneticMatcher, RadioMatcher};
use indoor_nav_rs::replay::{read_session, ReplayPipeline};
use indoor_nav_rs::types::PositionEstimate;

#[derive(Parser, Debug)]
#[command(name = "indoor_nav")]
#[command(about = "Replay a recorded session through the indoor navigation pipeline", long_about = None)]
struct Args {
    /// Session file (JSON Lines, optionally .gz)
    #[arg(long)]
    session: PathBuf,

    /// Magnetic fingerprint map (TSV: X, Y, MX, MY, MZ)
    #[arg(long)]
    magnetic_db: Option<PathBuf>,

    /// Radio fingerprint map (TSV: X, Y, one RSSI column per access point)
    #[arg(long)]
    radio_db: Option<PathBuf>,

    /// Floor the session was recorded on
    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    floor: i32,

    /// Start position X (m)
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    start_x: f64,

    /// Start position Y (m)
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    start_y: f64,

    /// JSON configuration overriding the defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output file for fused positions (JSON Lines); stdout if omitted
    #[arg(long)]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = match args.config.as_ref() {
        Some(path) => NavConfig::from_json_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => NavConfig::default(),
    };

    // A locator that fails to load is left out; the replay still runs.
    let magnetic = args.magnetic_db.as_ref().and_then(|path| {
        MagneticMatcher::from_tsv(path, args.floor, config.magnetic.matcher)
            .map_err(|e| log::error!("magnetic locator disabled: {}", e))
            .ok()
    });
    let radio = args.radio_db.as_ref().and_then(|path| {
        RadioMatcher::from_tsv(path, args.floor, config.radio.matcher)
            .map_err(|e| log::error!("radio locator disabled: {}", e))
            .ok()
    });

    let events = read_session(&args.session)
        .with_context(|| format!("reading session {}", args.session.display()))?;

    let start = PositionEstimate::new(args.start_x, args.start_y, args.floor, 0);
    let mut pipeline = ReplayPipeline::new(&config, start, magnetic, radio)
        .context("starting replay pipeline")?;

    let mut out: Box<dyn Write> = match args.output.as_ref() {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("creating {}", path.display()))?,
        )),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };

    let mut last_timestamp = 0;
    for event in &events {
        pipeline.feed(event);
        for position in pipeline.drain_positions() {
            last_timestamp = position.timestamp;
            serde_json::to_writer(&mut out, &position)?;
            writeln!(out)?;
        }
    }
    out.flush()?;

    if let Some(end) = pipeline.current_position(last_timestamp) {
        log::info!("final position: ({:.2}, {:.2}) on floor {}", end.x, end.y, end.floor);
    }
    log::info!(
        "replay summary: {}",
        serde_json::to_string(pipeline.stats()).unwrap_or_default()
    );
    Ok(())
}
