use thiserror::Error;

/// Object categories the counting line distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectClass {
    Bottle,
    Can,
}

impl ObjectClass {
    /// Map an engine class id onto the known label set.
    pub fn from_class_id(id: i64) -> Option<Self> {
        match id {
            0 => Some(ObjectClass::Bottle),
            1 => Some(ObjectClass::Can),
            _ => None,
        }
    }

    /// One-byte payload carried on the serial event link for this class.
    pub fn event_code(self) -> u8 {
        match self {
            ObjectClass::Bottle => 0x01,
            ObjectClass::Can => 0x02,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ObjectClass::Bottle => "bottle",
            ObjectClass::Can => "can",
        }
    }
}

/// Single tracked detection returned by the engine for one frame.
///
/// `track_id` is stable for as long as the object stays visible to the
/// engine; an id that reappears after the object left the frame is treated
/// as a new object downstream.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedDetection {
    pub track_id: i64,
    pub class: ObjectClass,
    pub center: (f32, f32),
}

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("failed to load tracking module {path:?}")]
    ModelLoad { path: String },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Narrow capability the pipeline consumes: one BGR8 frame in, the engine's
/// current set of tracked detections out. Called once per processed frame;
/// any error is fatal to the pipeline run.
pub trait Tracker {
    fn track(
        &mut self,
        bgr: &[u8],
        width: i32,
        height: i32,
    ) -> Result<Vec<TrackedDetection>, TrackerError>;
}

impl<T: Tracker + ?Sized> Tracker for Box<T> {
    fn track(
        &mut self,
        bgr: &[u8],
        width: i32,
        height: i32,
    ) -> Result<Vec<TrackedDetection>, TrackerError> {
        (**self).track(bgr, width, height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_ids_map_onto_the_label_set() {
        assert_eq!(ObjectClass::from_class_id(0), Some(ObjectClass::Bottle));
        assert_eq!(ObjectClass::from_class_id(1), Some(ObjectClass::Can));
        assert_eq!(ObjectClass::from_class_id(2), None);
        assert_eq!(ObjectClass::from_class_id(-1), None);
    }

    #[test]
    fn event_codes_match_the_wire_alphabet() {
        assert_eq!(ObjectClass::Bottle.event_code(), 0x01);
        assert_eq!(ObjectClass::Can.event_code(), 0x02);
    }
}
