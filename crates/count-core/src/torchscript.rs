//! TorchScript binding for the external detect-and-track engine.
//!
//! The exported module owns detection and identity assignment end to end;
//! this type only feeds it frames and types its output rows.

use std::{convert::TryFrom, path::Path};

use tch::{CModule, Device, Kind, Tensor};
use tracing::debug;

use crate::tracker::{ObjectClass, TrackedDetection, Tracker, TrackerError};

/// Expected engine output: one row per live track,
/// `(track_id, class_id, center_x, center_y, score)`.
const ROW_LEN: usize = 5;

pub struct TorchscriptTracker {
    module: CModule,
    device: Device,
    confidence_threshold: f32,
}

impl TorchscriptTracker {
    /// Load the exported module, preferring CUDA when available.
    pub fn load<P: AsRef<Path>>(path: P, confidence_threshold: f32) -> Result<Self, TrackerError> {
        let device = Device::cuda_if_available();
        let module = CModule::load_on_device(path.as_ref(), device).map_err(|_| {
            TrackerError::ModelLoad {
                path: path.as_ref().display().to_string(),
            }
        })?;
        Ok(Self {
            module,
            device,
            confidence_threshold,
        })
    }
}

impl Tracker for TorchscriptTracker {
    fn track(
        &mut self,
        bgr: &[u8],
        width: i32,
        height: i32,
    ) -> Result<Vec<TrackedDetection>, TrackerError> {
        let expected = (width as usize) * (height as usize) * 3;
        if bgr.len() != expected {
            return Err(anyhow::anyhow!(
                "unexpected frame buffer size: got {} bytes, expected {expected}",
                bgr.len()
            )
            .into());
        }

        let input = Tensor::from_slice(bgr)
            .to_device(self.device)
            .to_kind(Kind::Float)
            .view([1, height as i64, width as i64, 3])
            .permute([0, 3, 1, 2])
            / 255.0;

        let output = self
            .module
            .forward_ts(&[input])
            .map_err(anyhow::Error::from)?;
        let shape = output.size();
        if shape.len() != 2 || shape[1] != ROW_LEN as i64 {
            return Err(anyhow::anyhow!("unexpected tracker output shape: {shape:?}").into());
        }

        let rows: Vec<Vec<f32>> =
            Vec::<Vec<f32>>::try_from(&output.to_device(Device::Cpu)).map_err(anyhow::Error::from)?;

        let mut detections = Vec::with_capacity(rows.len());
        for row in rows {
            if row.len() < ROW_LEN {
                continue;
            }
            let score = row[4];
            if score < self.confidence_threshold {
                continue;
            }
            let Some(class) = ObjectClass::from_class_id(row[1] as i64) else {
                debug!("skipping detection with unknown class id {}", row[1]);
                continue;
            };
            detections.push(TrackedDetection {
                track_id: row[0] as i64,
                class,
                center: (row[2], row[3]),
            });
        }
        Ok(detections)
    }
}
