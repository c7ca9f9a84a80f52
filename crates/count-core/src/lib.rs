//! Counting domain for the line-crossing pipeline: the typed port to the
//! external detect-and-track engine plus the per-run counting state machine.
//!
//! Enable the `with-tch` feature to pull in the TorchScript engine binding.

pub mod counter;
pub mod tracker;

#[cfg(feature = "with-tch")]
pub mod torchscript;

pub use counter::{CountedEvent, CountingLine, CountsSnapshot, LineCounter};
pub use tracker::{ObjectClass, TrackedDetection, Tracker, TrackerError};

#[cfg(feature = "with-tch")]
pub use torchscript::TorchscriptTracker;
