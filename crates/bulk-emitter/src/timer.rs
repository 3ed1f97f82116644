//! Fixed-rate background timer owned by a single emitter.

use std::io;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error};

/// What the tick callback wants the timer to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TickControl {
    Continue,
    Stop,
}

/// Dedicated thread invoking a callback every `interval` until cancelled.
///
/// Ticks are scheduled at fixed rate from the spawn instant: a slow tick does
/// not push later ticks back, and ticks that were missed entirely are skipped
/// rather than fired in a burst.
pub(crate) struct FlushTimer {
    /// Dropping this sender wakes and stops the timer thread.
    stop_tx: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl FlushTimer {
    /// Spawns the timer thread. The first tick fires one `interval` after spawn.
    pub(crate) fn spawn<F>(name: &str, interval: Duration, mut tick: F) -> io::Result<Self>
    where
        F: FnMut() -> TickControl + Send + 'static,
    {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let thread_name = name.to_owned();

        let handle = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                debug!(thread = %thread_name, ?interval, "flush timer started");
                // `None` when the next deadline is past what `Instant` can hold.
                let mut next = Instant::now().checked_add(interval);
                loop {
                    let Some(deadline) = next else {
                        // Never ticks; wait for the stop signal only.
                        let _ = stop_rx.recv();
                        break;
                    };
                    let wait = deadline.saturating_duration_since(Instant::now());
                    match stop_rx.recv_timeout(wait) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }

                    if tick() == TickControl::Stop {
                        break;
                    }

                    next = deadline.checked_add(interval);
                    let now = Instant::now();
                    if let Some(late_deadline) = next.filter(|n| *n < now) {
                        // Skip ticks lost to a slow delivery, keeping the phase.
                        let late = now.duration_since(late_deadline).as_nanos()
                            % interval.as_nanos();
                        next = u64::try_from(late)
                            .ok()
                            .and_then(|late| interval.checked_sub(Duration::from_nanos(late)))
                            .and_then(|rest| now.checked_add(rest))
                            .or_else(|| now.checked_add(interval));
                    }
                }
                debug!(thread = %thread_name, "flush timer stopped");
            })?;

        Ok(Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    /// Stops the timer and waits for its thread to exit.
    ///
    /// A tick already in progress is allowed to finish. Calling this from the
    /// timer thread itself (a listener shutting its own emitter down) only
    /// signals the stop.
    pub(crate) fn cancel(&mut self) {
        drop(self.stop_tx.take());
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() != thread::current().id() {
                let name = handle.thread().name().unwrap_or("flush-timer").to_owned();
                if handle.join().is_err() {
                    error!(thread = %name, "flush timer thread panicked");
                }
            }
        }
    }
}

#[cfg(test)]
impl FlushTimer {
    /// Whether the timer thread is still alive.
    pub(crate) fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for FlushTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_timer_ticks_repeatedly() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let mut timer = FlushTimer::spawn("test-timer", Duration::from_millis(10), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            TickControl::Continue
        })
        .unwrap();

        thread::sleep(Duration::from_millis(100));
        timer.cancel();

        let observed = ticks.load(Ordering::SeqCst);
        assert!(observed >= 3, "expected several ticks, got {}", observed);
    }

    #[test]
    fn test_cancel_stops_ticks() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let mut timer = FlushTimer::spawn("test-timer", Duration::from_millis(5), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            TickControl::Continue
        })
        .unwrap();

        thread::sleep(Duration::from_millis(30));
        timer.cancel();
        let after_cancel = ticks.load(Ordering::SeqCst);

        thread::sleep(Duration::from_millis(30));
        assert_eq!(ticks.load(Ordering::SeqCst), after_cancel);
    }

    #[test]
    fn test_cancel_before_first_tick() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let mut timer = FlushTimer::spawn("test-timer", Duration::from_secs(60), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            TickControl::Continue
        })
        .unwrap();

        let started = Instant::now();
        timer.cancel();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(ticks.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unrepresentable_interval_never_ticks() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let mut timer = FlushTimer::spawn("test-timer", Duration::MAX, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            TickControl::Continue
        })
        .unwrap();

        thread::sleep(Duration::from_millis(30));
        let handle = timer.handle.take().unwrap();
        assert!(!handle.is_finished(), "timer thread exited early");

        drop(timer.stop_tx.take());
        assert!(handle.join().is_ok());
        assert_eq!(ticks.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_tick_can_stop_timer() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let _timer = FlushTimer::spawn("test-timer", Duration::from_millis(5), move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 1 {
                TickControl::Stop
            } else {
                TickControl::Continue
            }
        })
        .unwrap();

        thread::sleep(Duration::from_millis(60));
        assert_eq!(ticks.load(Ordering::SeqCst), 2);
    }
}
