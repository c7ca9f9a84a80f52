use count_core::CountsSnapshot;
use image::RgbaImage;
use serde::Serialize;

/// Capacity of the pipeline → consumer channel. Two items bound end-to-end
/// latency and memory; a full channel rejects the newest item.
pub(crate) const CHANNEL_CAPACITY: usize = 2;

/// Unit published by the pipeline: one annotated frame plus the totals at
/// the moment it was produced. Consumed once and discarded.
pub struct PipelineItem {
    pub image: RgbaImage,
    pub counts: CountsSnapshot,
    pub frame_number: u64,
    pub timestamp_ms: i64,
}

/// JSON document the preview sink writes next to the latest frame.
#[derive(Serialize)]
pub(crate) struct CountsReport {
    pub(crate) timestamp_ms: i64,
    pub(crate) frame_number: u64,
    pub(crate) bottles: u64,
    pub(crate) cans: u64,
    pub(crate) total: u64,
}
