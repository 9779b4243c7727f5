//! Background worker broadcasting the user count on a fixed interval.

use crate::error::Result;
use crossbeam_channel::{bounded, select, tick, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::manager::BroadcastRegistry;

/// Running heartbeat thread. Stops when [`Heartbeat::stop`] is called or
/// the value is dropped.
pub struct Heartbeat {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Heartbeat {
    /// Start ticking every `interval`.
    pub fn spawn(registry: Arc<BroadcastRegistry>, interval: Duration) -> Result<Self> {
        let (stop_tx, stop_rx) = bounded::<()>(0);

        let handle = thread::Builder::new()
            .name("relay-heartbeat".into())
            .spawn(move || {
                let ticker = tick(interval);
                loop {
                    // The stop arm fires when the sender is dropped
                    let stopped = select! {
                        recv(ticker) -> _ => false,
                        recv(stop_rx) -> _ => true,
                    };
                    if stopped {
                        break;
                    }
                    registry.heartbeat();
                }
                tracing::debug!("Heartbeat stopped");
            })?;

        Ok(Self {
            stop: Some(stop_tx),
            handle: Some(handle),
        })
    }

    /// Stop the worker and wait for it to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.shutdown();
    }
}
