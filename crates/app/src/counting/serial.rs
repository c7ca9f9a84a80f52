//! Byte-framed event link to the downstream microcontroller.
//!
//! One three-byte frame per counted object: STX, a single class code, ETX.
//! No length field, checksum, ack, or retry; the link is fire-and-forget
//! telemetry and a corrupted byte desynchronises the receiver until the
//! next STX.

use std::io::Write;
use std::time::Duration;

use tracing::{debug, warn};

const FRAME_START: u8 = 0x02;
const FRAME_END: u8 = 0x03;

const PORT_TIMEOUT: Duration = Duration::from_millis(100);

/// Best-effort serial emitter. When the device cannot be opened the emitter
/// stays usable and every `send_event` is a no-op for the run's lifetime.
pub(crate) struct EventEmitter {
    link: Option<Box<dyn Write + Send>>,
}

impl EventEmitter {
    /// Open `path` at `baud`. Open failure degrades to a no-op emitter.
    pub(crate) fn open(path: &str, baud: u32) -> Self {
        match serialport::new(path, baud).timeout(PORT_TIMEOUT).open() {
            Ok(port) => {
                debug!("serial event link open on {path} at {baud} baud");
                Self {
                    link: Some(Box::new(port)),
                }
            }
            Err(err) => {
                warn!("failed to open serial port {path}: {err}; events will be discarded");
                Self { link: None }
            }
        }
    }

    /// An emitter with no device attached.
    pub(crate) fn disabled() -> Self {
        Self { link: None }
    }

    /// Emitter over an arbitrary writer.
    #[cfg(test)]
    pub(crate) fn from_writer(writer: Box<dyn Write + Send>) -> Self {
        Self { link: Some(writer) }
    }

    /// Emit one event frame. Never fails: a write error is logged and the
    /// event is dropped.
    pub(crate) fn send_event(&mut self, code: u8) {
        let Some(link) = self.link.as_mut() else {
            return;
        };
        let packet = frame_packet(code);
        if let Err(err) = link.write_all(&packet).and_then(|()| link.flush()) {
            debug!("serial write failed: {err}; event 0x{code:02x} dropped");
        }
    }
}

/// Wire frame for one event byte.
fn frame_packet(code: u8) -> [u8; 3] {
    [FRAME_START, code, FRAME_END]
}

#[cfg(test)]
pub(crate) mod testing {
    use std::{
        io::{self, Write},
        sync::{Arc, Mutex},
    };

    /// Cloneable in-memory writer standing in for the serial device.
    #[derive(Clone, Default)]
    pub(crate) struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl SharedBuf {
        pub(crate) fn bytes(&self) -> Vec<u8> {
            self.0.lock().unwrap().clone()
        }
    }

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::SharedBuf;
    use super::*;

    #[test]
    fn frames_are_stx_payload_etx() {
        assert_eq!(frame_packet(0x01), [0x02, 0x01, 0x03]);
        assert_eq!(frame_packet(0xFF), [0x02, 0xFF, 0x03]);
    }

    #[test]
    fn events_are_written_in_order() {
        let buf = SharedBuf::default();
        let mut emitter = EventEmitter::from_writer(Box::new(buf.clone()));
        emitter.send_event(0x01);
        emitter.send_event(0x02);
        assert_eq!(buf.bytes(), vec![0x02, 0x01, 0x03, 0x02, 0x02, 0x03]);
    }

    #[test]
    fn disabled_emitter_discards_events() {
        let mut emitter = EventEmitter::disabled();
        emitter.send_event(0x01);
        emitter.send_event(0xFF);
    }
}
