//! Periodic heartbeat events.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::event::{Event, EventPayload, SourceId};
use crate::manager::EventManager;

/// Configuration for a [`Heartbeat`] service.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Target interval between beats.
    pub interval: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(20),
        }
    }
}

/// Service which emits a [`EventKind::Heartbeat`](crate::EventKind::Heartbeat)
/// event at a fixed interval on its own thread.
///
/// Listeners run on the heartbeat thread, so a listener slower than the
/// interval slows the beat. Timing is approximate by contract; this is not a
/// precision timer.
pub struct Heartbeat {
    events: Arc<EventManager>,
    source: SourceId,
    config: HeartbeatConfig,
}

impl Heartbeat {
    pub fn new(events: Arc<EventManager>, config: HeartbeatConfig) -> Self {
        Self {
            events,
            source: SourceId::new("heartbeat"),
            config,
        }
    }

    /// Spawn the beat thread. The service runs until the returned handle is
    /// stopped or dropped.
    pub fn start(self) -> HeartbeatHandle {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let thread = thread::spawn(move || self.run(&stop_flag));
        HeartbeatHandle {
            stop,
            thread: Some(thread),
        }
    }

    fn run(self, stop: &AtomicBool) {
        let mut frame: u64 = 0;
        debug!(source = %self.source, interval = ?self.config.interval, "heartbeat started");
        while !stop.load(Ordering::Relaxed) {
            let beat_started = Instant::now();
            let mut event = Event::new(
                self.source.clone(),
                EventPayload::Heartbeat {
                    frame,
                    interval: self.config.interval,
                },
            );
            if let Err(error) = self.events.emit(&mut event) {
                // The beat goes on; a faulty listener must not kill the service.
                warn!(source = %self.source, %error, "heartbeat listener failed");
            }
            frame += 1;
            // Aim for a regular beat, but always sleep at least 1ms.
            let wait = self
                .config
                .interval
                .saturating_sub(beat_started.elapsed())
                .max(Duration::from_millis(1));
            thread::sleep(wait);
        }
        debug!(source = %self.source, frames = frame, "heartbeat stopped");
    }
}

/// Handle controlling a running [`Heartbeat`]. Stops the service on drop.
pub struct HeartbeatHandle {
    stop: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl HeartbeatHandle {
    /// Signal the beat thread to stop and wait for it to finish.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("heartbeat thread panicked");
            }
        }
    }
}

impl Drop for HeartbeatHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
