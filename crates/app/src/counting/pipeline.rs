//! Capture pipeline task.
//!
//! The pipeline owns the video source and the tracker, drives each frame
//! through track → count → annotate on one dedicated thread, and publishes
//! to the bounded consumer channel with a non-blocking send. A full channel
//! rejects the newest item: freshness is bounded by keeping the channel
//! small, not by replacing queued items.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU8, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::Result;
use count_core::{LineCounter, Tracker};
use crossbeam_channel::{Receiver, RecvTimeoutError, TrySendError, bounded};
use tracing::{debug, error, info, warn};
use video_ingest::{FrameSource, SourceKind};

use crate::counting::{
    annotation,
    data::{CHANNEL_CAPACITY, PipelineItem},
    serial::EventEmitter,
    telemetry,
};

/// Knobs the hosting binary passes through to the loop.
#[derive(Clone, Copy, Debug, Default)]
pub struct PipelineOptions {
    /// Rewind a file source at end-of-stream (resetting the counter) instead
    /// of stopping.
    pub loop_video: bool,
    pub verbose: bool,
}

/// Observable lifecycle of the pipeline thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Running,
    StopRequested,
    Stopped,
}

const STATE_RUNNING: u8 = 0;
const STATE_STOP_REQUESTED: u8 = 1;
const STATE_STOPPED: u8 = 2;

/// A fully wired but not yet started pipeline.
///
/// `start` consumes the value, so starting the same pipeline twice cannot be
/// expressed.
pub struct CountPipeline<S, T> {
    source: S,
    tracker: T,
    counter: LineCounter,
    emitter: EventEmitter,
    options: PipelineOptions,
}

impl<S, T> CountPipeline<S, T>
where
    S: FrameSource + Send + 'static,
    T: Tracker + Send + 'static,
{
    pub(crate) fn new(
        source: S,
        tracker: T,
        counter: LineCounter,
        emitter: EventEmitter,
        options: PipelineOptions,
    ) -> Self {
        Self {
            source,
            tracker,
            counter,
            emitter,
            options,
        }
    }

    /// Spawn the dedicated pipeline thread and hand back its control surface
    /// plus the consumer end of the bounded item channel.
    pub fn start(self) -> Result<(PipelineHandle, Receiver<PipelineItem>)> {
        let (tx, rx) = bounded::<PipelineItem>(CHANNEL_CAPACITY);
        let (done_tx, done_rx) = bounded::<()>(0);
        let stop = Arc::new(AtomicBool::new(false));
        let state = Arc::new(AtomicU8::new(STATE_RUNNING));

        let worker = PipelineWorker {
            source: self.source,
            tracker: self.tracker,
            counter: self.counter,
            emitter: self.emitter,
            options: self.options,
            stop: stop.clone(),
            state: state.clone(),
            tx,
        };

        let thread = telemetry::spawn_thread("count-pipeline", move || {
            // held for the thread's lifetime; dropping it wakes joiners
            let _done = done_tx;
            worker.run();
        })?;

        Ok((
            PipelineHandle {
                stop,
                state,
                done: done_rx,
                thread: Some(thread),
            },
            rx,
        ))
    }
}

/// Control surface for a running pipeline thread.
pub struct PipelineHandle {
    stop: Arc<AtomicBool>,
    state: Arc<AtomicU8>,
    done: Receiver<()>,
    thread: Option<thread::JoinHandle<()>>,
}

impl PipelineHandle {
    /// Request a cooperative stop; observed at the next loop iteration.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Lifecycle state as last reported by the pipeline thread.
    pub fn state(&self) -> PipelineState {
        match self.state.load(Ordering::SeqCst) {
            STATE_RUNNING => PipelineState::Running,
            STATE_STOP_REQUESTED => PipelineState::StopRequested,
            _ => PipelineState::Stopped,
        }
    }

    /// Wait up to `timeout` for the pipeline thread to exit.
    ///
    /// Returns `true` once the thread has been joined. `false` leaves the
    /// thread running: an in-flight tracker call is never interrupted, and
    /// the video source handle may not be released yet.
    pub fn join(&mut self, timeout: Duration) -> bool {
        match self.done.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if let Some(thread) = self.thread.take() {
                    let _ = thread.join();
                }
                true
            }
            Err(RecvTimeoutError::Timeout) => false,
        }
    }
}

struct PipelineWorker<S, T> {
    source: S,
    tracker: T,
    counter: LineCounter,
    emitter: EventEmitter,
    options: PipelineOptions,
    stop: Arc<AtomicBool>,
    state: Arc<AtomicU8>,
    tx: crossbeam_channel::Sender<PipelineItem>,
}

impl<S: FrameSource, T: Tracker> PipelineWorker<S, T> {
    fn run(mut self) {
        let mut frame_number: u64 = 0;
        let mut dropped: u64 = 0;
        let mut smoothed_fps: f32 = 0.0;
        let mut last_instant = Instant::now();

        loop {
            if self.stop.load(Ordering::Relaxed) {
                self.state.store(STATE_STOP_REQUESTED, Ordering::SeqCst);
                debug!("stop requested; exiting pipeline loop");
                break;
            }

            let frame = match self.source.read() {
                Ok(Some(frame)) => frame,
                Ok(None) => match self.source.kind() {
                    // a live source may simply have nothing yet
                    SourceKind::Device => continue,
                    SourceKind::File if self.options.loop_video => {
                        match self.source.rewind() {
                            Ok(()) => {
                                info!(
                                    "video looped after {} counted objects; resetting counter",
                                    self.counter.counts().total
                                );
                                self.counter.reset();
                                continue;
                            }
                            Err(err) => {
                                error!("failed to rewind looping source: {err}");
                                break;
                            }
                        }
                    }
                    SourceKind::File => {
                        info!("end of stream after {frame_number} frames");
                        break;
                    }
                },
                Err(err) => {
                    error!("capture error: {err}");
                    break;
                }
            };

            frame_number = frame_number.wrapping_add(1);

            let now = Instant::now();
            let elapsed = now.duration_since(last_instant).as_secs_f32();
            last_instant = now;
            if elapsed > 0.0 {
                let instant = 1.0 / elapsed;
                smoothed_fps = if smoothed_fps == 0.0 {
                    instant
                } else {
                    0.9 * smoothed_fps + 0.1 * instant
                };
            }
            metrics::gauge!("count_pipeline_fps").set(smoothed_fps as f64);

            let detections = match self.tracker.track(&frame.data, frame.width, frame.height) {
                Ok(detections) => detections,
                Err(err) => {
                    error!("tracker failed on frame #{frame_number}: {err}");
                    break;
                }
            };

            let events = self.counter.observe(&detections);
            for event in &events {
                self.emitter.send_event(event.class.event_code());
                metrics::counter!("count_objects_total", "class" => event.class.label())
                    .increment(1);
            }
            let counts = self.counter.counts();

            let image = match annotation::annotate_frame(
                &frame,
                &detections,
                self.counter.line(),
                counts,
                !events.is_empty(),
                frame_number,
                smoothed_fps,
            ) {
                Ok(image) => image,
                Err(err) => {
                    error!("annotation failed on frame #{frame_number}: {err}");
                    break;
                }
            };

            metrics::counter!("count_frames_processed_total").increment(1);
            if self.options.verbose && !detections.is_empty() {
                debug!(
                    "frame #{frame_number}: {} tracked detection(s), total {}",
                    detections.len(),
                    counts.total
                );
            }

            let item = PipelineItem {
                image,
                counts,
                frame_number,
                timestamp_ms: frame.timestamp_ms,
            };
            match self.tx.try_send(item) {
                Ok(()) => {
                    metrics::gauge!("count_queue_depth").set(self.tx.len() as f64);
                }
                Err(TrySendError::Full(_)) => {
                    // deliberate backpressure: never block, never retry
                    dropped = dropped.wrapping_add(1);
                    metrics::counter!("count_dropped_frames_total").increment(1);
                    if self.options.verbose {
                        warn!(
                            "dropping frame #{frame_number} (consumer backlog, dropped total: {dropped})"
                        );
                    }
                }
                Err(TrySendError::Disconnected(_)) => {
                    debug!("consumer disconnected; exiting pipeline loop");
                    break;
                }
            }
        }

        self.state.store(STATE_STOPPED, Ordering::SeqCst);
        info!(
            "counting pipeline stopped (processed {frame_number} frames, dropped {dropped}, counted {})",
            self.counter.counts().total
        );
    }
}

#[cfg(test)]
mod tests {
    use count_core::{CountingLine, ObjectClass, TrackedDetection, TrackerError};
    use crossbeam_channel::unbounded;
    use video_ingest::{CaptureError, Frame, FrameFormat};

    use super::*;
    use crate::counting::serial::testing::SharedBuf;

    const W: i32 = 64;
    const H: i32 = 48;

    fn test_line() -> CountingLine {
        CountingLine::horizontal(0, W - 1, 24, 5)
    }

    fn frame() -> Frame {
        Frame {
            data: vec![0; (W * H * 3) as usize],
            width: W,
            height: H,
            timestamp_ms: 0,
            format: FrameFormat::Bgr8,
        }
    }

    fn det(track_id: i64, class: ObjectClass, y: f32) -> TrackedDetection {
        TrackedDetection {
            track_id,
            class,
            center: (32.0, y),
        }
    }

    /// Yields `remaining` synthetic frames, then reports end-of-stream.
    struct FiniteSource {
        remaining: usize,
    }

    impl FrameSource for FiniteSource {
        fn kind(&self) -> SourceKind {
            SourceKind::File
        }

        fn read(&mut self) -> Result<Option<Frame>, CaptureError> {
            if self.remaining == 0 {
                return Ok(None);
            }
            self.remaining -= 1;
            Ok(Some(frame()))
        }

        fn rewind(&mut self) -> Result<(), CaptureError> {
            Ok(())
        }
    }

    /// Live-source stand-in that never yields a frame.
    struct IdleDevice;

    impl FrameSource for IdleDevice {
        fn kind(&self) -> SourceKind {
            SourceKind::Device
        }

        fn read(&mut self) -> Result<Option<Frame>, CaptureError> {
            Ok(None)
        }

        fn rewind(&mut self) -> Result<(), CaptureError> {
            Ok(())
        }
    }

    enum Step {
        Frame,
        EndOfStream,
    }

    /// File source driven one read at a time by the test. Reads block until
    /// the test sends the next step and fail once the script is dropped.
    struct SteppedSource {
        steps: crossbeam_channel::Receiver<Step>,
    }

    impl FrameSource for SteppedSource {
        fn kind(&self) -> SourceKind {
            SourceKind::File
        }

        fn read(&mut self) -> Result<Option<Frame>, CaptureError> {
            match self.steps.recv() {
                Ok(Step::Frame) => Ok(Some(frame())),
                Ok(Step::EndOfStream) => Ok(None),
                Err(_) => Err(CaptureError::Other(anyhow::anyhow!("script exhausted"))),
            }
        }

        fn rewind(&mut self) -> Result<(), CaptureError> {
            Ok(())
        }
    }

    /// Returns one scripted detection set per frame, then empty sets.
    struct ScriptedTracker {
        frames: Vec<Vec<TrackedDetection>>,
        cursor: usize,
    }

    impl ScriptedTracker {
        fn new(frames: Vec<Vec<TrackedDetection>>) -> Self {
            Self { frames, cursor: 0 }
        }
    }

    impl Tracker for ScriptedTracker {
        fn track(
            &mut self,
            _bgr: &[u8],
            _width: i32,
            _height: i32,
        ) -> Result<Vec<TrackedDetection>, TrackerError> {
            let detections = self.frames.get(self.cursor).cloned().unwrap_or_default();
            self.cursor += 1;
            Ok(detections)
        }
    }

    fn start_pipeline<S, T>(
        source: S,
        tracker: T,
        emitter: EventEmitter,
        options: PipelineOptions,
    ) -> (PipelineHandle, Receiver<PipelineItem>)
    where
        S: FrameSource + Send + 'static,
        T: Tracker + Send + 'static,
    {
        CountPipeline::new(source, tracker, LineCounter::new(test_line()), emitter, options)
            .start()
            .expect("pipeline failed to start")
    }

    #[test]
    fn a_full_channel_keeps_the_oldest_items() {
        let (mut handle, items) = start_pipeline(
            FiniteSource { remaining: 5 },
            ScriptedTracker::new(Vec::new()),
            EventEmitter::disabled(),
            PipelineOptions::default(),
        );

        assert!(
            handle.join(Duration::from_secs(5)),
            "pipeline should stop at end of stream"
        );
        assert_eq!(handle.state(), PipelineState::Stopped);

        // nobody consumed while the pipeline ran: only the first two of five
        // published items fit the channel, in production order
        let received: Vec<u64> = items.try_iter().map(|item| item.frame_number).collect();
        assert_eq!(received, vec![1, 2]);
    }

    #[test]
    fn counted_objects_reach_the_serial_link_in_order() {
        let buf = SharedBuf::default();
        let script = vec![
            vec![det(5, ObjectClass::Bottle, 22.0)],
            // same track, still inside the band: must not recount
            vec![det(5, ObjectClass::Bottle, 23.0)],
            vec![det(7, ObjectClass::Can, 26.0)],
        ];
        let (mut handle, items) = start_pipeline(
            FiniteSource { remaining: 3 },
            ScriptedTracker::new(script),
            EventEmitter::from_writer(Box::new(buf.clone())),
            PipelineOptions::default(),
        );

        assert!(handle.join(Duration::from_secs(5)));

        // the third item was dropped by backpressure, but its serial event
        // was still emitted from inside the counting step
        let totals: Vec<u64> = items.try_iter().map(|item| item.counts.total).collect();
        assert_eq!(totals, vec![1, 1]);
        assert_eq!(buf.bytes(), vec![0x02, 0x01, 0x03, 0x02, 0x02, 0x03]);
    }

    #[test]
    fn stop_and_join_return_promptly_on_an_idle_device() {
        let (mut handle, _items) = start_pipeline(
            IdleDevice,
            ScriptedTracker::new(Vec::new()),
            EventEmitter::disabled(),
            PipelineOptions::default(),
        );

        assert_eq!(handle.state(), PipelineState::Running);
        handle.stop();
        assert!(handle.join(Duration::from_secs(1)));
        assert_eq!(handle.state(), PipelineState::Stopped);
    }

    #[test]
    fn looping_file_source_resets_the_counter_between_passes() {
        let (steps_tx, steps_rx) = unbounded();
        let script = vec![
            vec![det(1, ObjectClass::Bottle, 24.0)],
            vec![det(2, ObjectClass::Can, 24.0)],
            // same track id as the first pass, seen after the rewind
            vec![det(1, ObjectClass::Bottle, 24.0)],
        ];
        let (mut handle, items) = start_pipeline(
            SteppedSource { steps: steps_rx },
            ScriptedTracker::new(script),
            EventEmitter::disabled(),
            PipelineOptions {
                loop_video: true,
                verbose: false,
            },
        );

        steps_tx.send(Step::Frame).unwrap();
        let first = items.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(first.counts.total, 1);

        steps_tx.send(Step::Frame).unwrap();
        let second = items.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(second.counts.total, 2);

        steps_tx.send(Step::EndOfStream).unwrap();
        steps_tx.send(Step::Frame).unwrap();
        let third = items.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(
            third.counts.total, 1,
            "rewinding a looped source must reset the counter"
        );

        // ending the script surfaces a capture error and stops the run
        drop(steps_tx);
        assert!(handle.join(Duration::from_secs(5)));
        assert_eq!(handle.state(), PipelineState::Stopped);
    }
}
