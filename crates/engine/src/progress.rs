//! Bounded live progress stream
//!
//! A small in-memory buffer between the controller and whatever forwards
//! events to the outside (typically an SSE boundary). Emission never blocks:
//! when no consumer keeps up, the oldest events fall off the head and the
//! consumer sees a counted drop marker instead. Terminal events close the
//! stream; the consumer drains what is buffered and then sees the end.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tracing::{debug, warn};

use sim_optimizer_types::ProgressEvent;

/// Default buffer capacity
pub const DEFAULT_BUFFER: usize = 256;

#[derive(Debug)]
struct StreamState {
    buffer: VecDeque<ProgressEvent>,
    dropped: u64,
    closed: bool,
}

/// Producer half, held by the controller
#[derive(Debug, Clone)]
pub struct ProgressStream {
    state: Arc<Mutex<StreamState>>,
    notify: Arc<Notify>,
    capacity: usize,
}

/// Consumer half; exactly one is assumed
#[derive(Debug)]
pub struct ProgressReceiver {
    state: Arc<Mutex<StreamState>>,
    notify: Arc<Notify>,
}

impl ProgressStream {
    pub fn new(capacity: usize) -> (Self, ProgressReceiver) {
        let state = Arc::new(Mutex::new(StreamState {
            buffer: VecDeque::new(),
            dropped: 0,
            closed: false,
        }));
        let notify = Arc::new(Notify::new());
        (
            Self {
                state: state.clone(),
                notify: notify.clone(),
                capacity,
            },
            ProgressReceiver { state, notify },
        )
    }

    pub fn with_default_capacity() -> (Self, ProgressReceiver) {
        Self::new(DEFAULT_BUFFER)
    }

    /// Enqueue an event; returns false if the stream is already closed
    ///
    /// A full buffer sheds its oldest event and counts the drop. Terminal
    /// events (`complete`, `error`) close the stream.
    pub fn emit(&self, event: ProgressEvent) -> bool {
        let mut state = self.state.lock().expect("progress stream lock poisoned");

        if state.closed {
            warn!("progress event emitted after stream close, discarding");
            return false;
        }

        if state.buffer.len() >= self.capacity {
            state.buffer.pop_front();
            state.dropped += 1;
            debug!(dropped = state.dropped, "progress buffer full, dropped oldest event");
        }

        if event.is_terminal() {
            state.closed = true;
        }
        state.buffer.push_back(event);
        drop(state);

        self.notify.notify_one();
        true
    }

    /// Total events dropped so far
    pub fn dropped(&self) -> u64 {
        self.state.lock().expect("progress stream lock poisoned").dropped
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().expect("progress stream lock poisoned").closed
    }
}

impl ProgressReceiver {
    /// Next event, or None once the stream is closed and drained
    ///
    /// Pending drops are reported first as a `Dropped` marker so the
    /// consumer can account for the gap before reading newer events.
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        loop {
            {
                let mut state = self.state.lock().expect("progress stream lock poisoned");
                if state.dropped > 0 {
                    let count = state.dropped;
                    state.dropped = 0;
                    return Some(ProgressEvent::Dropped { count });
                }
                if let Some(event) = state.buffer.pop_front() {
                    return Some(event);
                }
                if state.closed {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Non-blocking variant of `recv`
    pub fn try_recv(&mut self) -> Option<ProgressEvent> {
        let mut state = self.state.lock().expect("progress stream lock poisoned");
        if state.dropped > 0 {
            let count = state.dropped;
            state.dropped = 0;
            return Some(ProgressEvent::Dropped { count });
        }
        state.buffer.pop_front()
    }
}
