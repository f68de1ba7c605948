//! Device lifecycle events for external controllers

use crate::audio::{StreamDirection, StreamState};
use crossbeam_channel::Sender;

/// Events the engine emits as streams come and go
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    /// A stream controller was created
    StreamCreated { direction: StreamDirection },
    /// A stream changed state
    StreamStateChanged {
        direction: StreamDirection,
        state: StreamState,
    },
    /// A stream acquired backing memory
    BufferAllocated {
        direction: StreamDirection,
        bytes: usize,
        shared: bool,
    },
}

/// Best-effort event emitter.
///
/// Sends never block the control path; a full or disconnected channel drops
/// the event.
#[derive(Clone, Default)]
pub struct EventSink {
    tx: Option<Sender<DeviceEvent>>,
}

impl EventSink {
    pub fn new(tx: Sender<DeviceEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A sink that discards everything
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: DeviceEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.try_send(event);
        }
    }
}
