//! File-backed display consumer.
//!
//! Polls the bounded channel on the dashboard's 20 ms cadence and keeps the
//! latest annotated frame and counts on disk. The consumer never blocks the
//! pipeline: an empty poll just sleeps until the next tick, and upstream
//! failures are only ever visible here as "no new item".

use std::{
    fs,
    path::Path,
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::Duration,
};

use anyhow::{Context, Result};
use count_core::CountsSnapshot;
use crossbeam_channel::{Receiver, TryRecvError};
use image::{DynamicImage, codecs::jpeg::JpegEncoder};
use tracing::{debug, info};

use crate::counting::data::{CountsReport, PipelineItem};

/// Poll cadence; matches the dashboard's refresh interval.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

const JPEG_QUALITY: u8 = 85;

/// Drain the channel until the pipeline hangs up or `shutdown` is set,
/// keeping `<dir>/latest.jpg` and `<dir>/counts.json` current. Returns the
/// last counts observed.
pub(crate) fn run_consumer(
    items: &Receiver<PipelineItem>,
    dir: &Path,
    shutdown: &AtomicBool,
) -> Result<Option<CountsSnapshot>> {
    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create preview directory {}", dir.display()))?;
    let mut last: Option<CountsSnapshot> = None;

    loop {
        if shutdown.load(Ordering::Relaxed) {
            break;
        }
        match items.try_recv() {
            Ok(item) => {
                if item.counts.total != last.map_or(0, |counts| counts.total) {
                    info!(
                        "counted {} objects ({} bottles, {} cans)",
                        item.counts.total, item.counts.bottles, item.counts.cans
                    );
                }
                last = Some(item.counts);
                if let Err(err) = write_preview(dir, item) {
                    debug!("preview write failed: {err:?}");
                }
            }
            Err(TryRecvError::Empty) => thread::sleep(POLL_INTERVAL),
            Err(TryRecvError::Disconnected) => break,
        }
    }

    Ok(last)
}

fn write_preview(dir: &Path, item: PipelineItem) -> Result<()> {
    let rgb = DynamicImage::ImageRgba8(item.image).to_rgb8();
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY)
        .encode_image(&rgb)
        .context("JPEG encode failed")?;
    write_atomic(&dir.join("latest.jpg"), &jpeg)?;

    let report = CountsReport {
        timestamp_ms: item.timestamp_ms,
        frame_number: item.frame_number,
        bottles: item.counts.bottles,
        cans: item.counts.cans,
        total: item.counts.total,
    };
    let json = serde_json::to_vec_pretty(&report)?;
    write_atomic(&dir.join("counts.json"), &json)
}

/// Replace `path` without readers ever seeing a half-written file.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes).with_context(|| format!("failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use crossbeam_channel::bounded;
    use image::RgbaImage;

    use super::*;

    #[test]
    fn persists_the_latest_item_and_returns_final_counts() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (tx, rx) = bounded(2);
        tx.send(PipelineItem {
            image: RgbaImage::new(8, 8),
            counts: CountsSnapshot {
                bottles: 2,
                cans: 1,
                total: 3,
            },
            frame_number: 7,
            timestamp_ms: 1_000,
        })
        .unwrap();
        drop(tx);

        let shutdown = AtomicBool::new(false);
        let last = run_consumer(&rx, dir.path(), &shutdown).expect("consumer failed");

        assert_eq!(last.map(|counts| counts.total), Some(3));
        assert!(dir.path().join("latest.jpg").exists());
        let json = fs::read_to_string(dir.path().join("counts.json")).unwrap();
        assert!(json.contains("\"total\": 3"));
        assert!(json.contains("\"frame_number\": 7"));
    }

    #[test]
    fn shutdown_flag_ends_an_idle_consumer() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (_tx, rx) = bounded::<PipelineItem>(2);
        let shutdown = AtomicBool::new(true);

        let last = run_consumer(&rx, dir.path(), &shutdown).expect("consumer failed");
        assert!(last.is_none());
    }
}
