//! Recurring, cancellable interval timer.
//!
//! Heartbeats must stop the moment their owning process tears down; a timer
//! that fires after its identity has been unregistered would resurrect the
//! entry. The worker exits on explicit [`RepeatingTimer::cancel`] or when
//! the handle is dropped.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

pub struct RepeatingTimer {
    tx: mpsc::Sender<()>,
}

impl RepeatingTimer {
    /// Spawns a worker invoking `tick` every `interval` until cancelled.
    pub fn spawn<F>(interval: Duration, mut tick: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || loop {
            match rx.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => tick(),
                Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
            }
        });
        Self { tx }
    }

    /// Stops the timer. Dropping the handle has the same effect.
    pub fn cancel(&self) {
        let _ = self.tx.send(());
    }
}
