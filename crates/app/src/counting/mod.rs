//! Background counting pipeline: captures frames, runs the external
//! detect-and-track engine, counts line crossings exactly once per object,
//! and hands annotated frames plus running totals to a polling consumer
//! without ever blocking on it.
//!
//! The module is split into focused submodules:
//! - `config`: CLI configuration parsing.
//! - `pipeline`: the capture → track → count → publish loop and its lifecycle.
//! - `annotation`: counting line, per-object markers, and the totals HUD.
//! - `serial`: byte-framed event link to the downstream microcontroller.
//! - `preview`: file-backed consumer polling the bounded channel.
//! - `data`: structs exchanged between the pipeline and its consumer.
//! - `telemetry`: tracing/metrics bootstrap shared by the threads.

use std::{
    sync::{
        Arc, Once,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use anyhow::{Context, Result};
use count_core::{LineCounter, Tracker};
use tracing::{debug, info, warn};
use video_ingest::VideoSource;

pub use config::CountConfig;
pub use pipeline::{CountPipeline, PipelineHandle, PipelineOptions, PipelineState};

use crate::counting::serial::EventEmitter;

mod annotation;
mod config;
mod data;
mod pipeline;
mod preview;
mod serial;
pub(crate) mod telemetry;

pub(crate) fn run_from_args(args: &[String]) -> Result<()> {
    let config = CountConfig::from_args(args)?;
    run(config)
}

/// Wire up the sources, run the pipeline until the stream ends or Ctrl+C,
/// then drain and stop it.
pub(crate) fn run(config: CountConfig) -> Result<()> {
    telemetry::init_metrics_recorder();

    let source = VideoSource::open(&config.source_uri, (config.width, config.height))
        .with_context(|| format!("failed to open video source {}", config.source_uri))?;
    let tracker = build_tracker(&config)?;
    let counter = LineCounter::new(config.line);
    let emitter = match config.serial_port.as_deref() {
        Some(port) => EventEmitter::open(port, config.baud),
        None => EventEmitter::disabled(),
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        static CTRL_HANDLER: Once = Once::new();
        let handler_shutdown = shutdown.clone();
        CTRL_HANDLER.call_once(move || {
            if let Err(err) =
                ctrlc::set_handler(move || handler_shutdown.store(true, Ordering::SeqCst))
            {
                warn!("failed to install Ctrl+C handler: {err}");
            }
        });
    }

    let options = PipelineOptions {
        loop_video: config.loop_video,
        verbose: config.verbose,
    };
    let (mut handle, items) =
        CountPipeline::new(source, tracker, counter, emitter, options).start()?;

    info!(
        "counting pipeline running (source: {}, line y={} ±{}px)",
        config.source_uri, config.line.y1, config.line.band
    );

    let final_counts = preview::run_consumer(&items, &config.preview_dir, &shutdown)?;

    handle.stop();
    if !handle.join(Duration::from_secs(5)) {
        warn!(
            "pipeline thread did not exit within 5s (state: {:?}); leaving it to finish in-flight work",
            handle.state()
        );
    }

    if let Some(counts) = final_counts {
        info!(
            "final tally: {} objects ({} bottles, {} cans)",
            counts.total, counts.bottles, counts.cans
        );
    }
    if let Some(snapshot) = telemetry::render_metrics() {
        debug!("metrics at shutdown:\n{snapshot}");
    }
    Ok(())
}

#[cfg(feature = "with-tch")]
fn build_tracker(config: &CountConfig) -> Result<Box<dyn Tracker + Send>> {
    let tracker = count_core::TorchscriptTracker::load(&config.model_path, config.confidence)
        .with_context(|| {
            format!(
                "failed to load tracking model {}",
                config.model_path.display()
            )
        })?;
    Ok(Box::new(tracker))
}

#[cfg(not(feature = "with-tch"))]
fn build_tracker(config: &CountConfig) -> Result<Box<dyn Tracker + Send>> {
    anyhow::bail!(
        "no tracking engine in this build to load {} (conf {}); rebuild with `--features with-tch`",
        config.model_path.display(),
        config.confidence
    )
}
