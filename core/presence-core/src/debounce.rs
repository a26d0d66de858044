//! Trailing debounce with an equality guard.
//!
//! Change notifications arrive in bursts (several fields of the same record
//! change together; the store and the event log often change back-to-back).
//! The debouncer collapses any burst into a single evaluation after a quiet
//! window, then re-reads the watched value *at fire time* and forwards it
//! only if it differs from the last value forwarded. Idempotent consumers
//! therefore never observe duplicate no-op updates.
//!
//! The utility is generic: callers supply the fetch, the equality predicate
//! over the fields that matter, and the sink.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

enum Command {
    Poke,
    Cancel,
}

/// A cancellable trailing-edge debouncer running on its own worker thread.
///
/// Dropping the handle stops the worker.
pub struct Debouncer {
    tx: mpsc::Sender<Command>,
}

impl Debouncer {
    /// Spawns the worker.
    ///
    /// `fetch` is called once up front to seed the comparison baseline, and
    /// again on every trailing edge; `same` compares the fields that matter;
    /// `sink` receives each value that survives the guard.
    pub fn new<T, F, E, S>(window: Duration, fetch: F, same: E, sink: S) -> Self
    where
        T: Clone + Send + 'static,
        F: Fn() -> T + Send + 'static,
        E: Fn(&T, &T) -> bool + Send + 'static,
        S: Fn(T) + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let mut last = fetch();
            loop {
                match rx.recv() {
                    Ok(Command::Poke) => {}
                    Ok(Command::Cancel) | Err(_) => return,
                }
                // Absorb the rest of the burst; fire after a quiet window.
                loop {
                    match rx.recv_timeout(window) {
                        Ok(Command::Poke) => continue,
                        Ok(Command::Cancel) => return,
                        Err(RecvTimeoutError::Timeout) => break,
                        Err(RecvTimeoutError::Disconnected) => return,
                    }
                }
                let current = fetch();
                if !same(&last, &current) {
                    sink(current.clone());
                    last = current;
                }
            }
        });
        Self { tx }
    }

    /// Signals that the watched value may have changed.
    pub fn poke(&self) {
        let _ = self.tx.send(Command::Poke);
    }

    /// Stops the worker; pending pokes are discarded.
    pub fn cancel(&self) {
        let _ = self.tx.send(Command::Cancel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    const WINDOW: Duration = Duration::from_millis(20);
    const SETTLE: Duration = Duration::from_millis(200);

    fn harness() -> (Debouncer, Arc<AtomicUsize>, Arc<Mutex<Vec<usize>>>) {
        let state = Arc::new(AtomicUsize::new(0));
        let forwarded = Arc::new(Mutex::new(Vec::new()));

        let fetch_state = Arc::clone(&state);
        let sink_log = Arc::clone(&forwarded);
        let debouncer = Debouncer::new(
            WINDOW,
            move || fetch_state.load(Ordering::SeqCst),
            |a: &usize, b: &usize| a == b,
            move |value| sink_log.lock().unwrap().push(value),
        );
        (debouncer, state, forwarded)
    }

    #[test]
    fn test_burst_collapses_to_one_forward() {
        let (debouncer, state, forwarded) = harness();
        state.store(1, Ordering::SeqCst);
        for _ in 0..10 {
            debouncer.poke();
        }
        thread::sleep(SETTLE);
        assert_eq!(*forwarded.lock().unwrap(), vec![1]);
    }

    #[test]
    fn test_unchanged_value_is_suppressed() {
        let (debouncer, state, forwarded) = harness();
        state.store(1, Ordering::SeqCst);
        debouncer.poke();
        thread::sleep(SETTLE);
        // Same value again: guard must suppress the duplicate.
        debouncer.poke();
        thread::sleep(SETTLE);
        assert_eq!(*forwarded.lock().unwrap(), vec![1]);
    }

    #[test]
    fn test_changed_value_forwards_again() {
        let (debouncer, state, forwarded) = harness();
        state.store(1, Ordering::SeqCst);
        debouncer.poke();
        thread::sleep(SETTLE);
        state.store(2, Ordering::SeqCst);
        debouncer.poke();
        thread::sleep(SETTLE);
        assert_eq!(*forwarded.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_fetch_happens_at_fire_time() {
        let (debouncer, state, forwarded) = harness();
        // Value at poke time is 0 (the seed), so forwarding would be a
        // no-op; the value set during the quiet window is what fires.
        debouncer.poke();
        state.store(7, Ordering::SeqCst);
        thread::sleep(SETTLE);
        assert_eq!(*forwarded.lock().unwrap(), vec![7]);
    }

    #[test]
    fn test_cancel_discards_pending() {
        let (debouncer, state, forwarded) = harness();
        state.store(1, Ordering::SeqCst);
        debouncer.poke();
        debouncer.cancel();
        thread::sleep(SETTLE);
        assert!(forwarded.lock().unwrap().is_empty());
    }
}
