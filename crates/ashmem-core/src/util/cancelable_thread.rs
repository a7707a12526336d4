use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

/// A thread handle that can be signaled to stop.
///
/// Wraps a join handle with a cancellation flag that the thread
/// can check to determine when to exit.
pub struct CancelableJoinHandle<T> {
    handle: thread::JoinHandle<T>,
    running: Arc<AtomicBool>,
}

/// Spawns a named, cancelable thread that can be joined later.
///
/// The thread is passed an `Arc<AtomicBool>` that stays `true` until
/// [`CancelableJoinHandle::join`] is called.
///
/// # Errors
///
/// Returns an I/O error if the OS refuses to create the thread.
pub fn spawn_cancelable<T: Send + 'static>(
    name: &str,
    func: impl FnOnce(Arc<AtomicBool>) -> T + Send + 'static,
) -> std::io::Result<CancelableJoinHandle<T>> {
    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    let handle = thread::Builder::new()
        .name(name.to_owned())
        .spawn(move || func(r))?;
    Ok(CancelableJoinHandle { handle, running })
}

/// Sleeps for `duration` in short slices, returning early once `running`
/// drops to `false`.
///
/// Returns whether the thread should keep running.
pub fn sleep_while_running(running: &AtomicBool, duration: Duration) -> bool {
    const SLICE: Duration = Duration::from_millis(10);
    let deadline = Instant::now() + duration;
    while running.load(Ordering::Relaxed) {
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep(SLICE.min(deadline - now));
    }
    false
}

impl<T> CancelableJoinHandle<T> {
    /// Checks if the thread should continue running.
    ///
    /// # Returns
    ///
    /// `true` if thread has not been signaled to stop
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Checks if the thread body has returned.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Signals the thread to stop and waits for it to finish.
    ///
    /// # Errors
    ///
    /// Returns error if thread panicked
    pub fn join(self) -> thread::Result<T> {
        self.running.store(false, Ordering::Relaxed);
        self.handle.join()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_stops_loop() {
        let handle = spawn_cancelable("test-loop", |running| {
            let mut rounds = 0u64;
            while sleep_while_running(&running, Duration::from_millis(1)) {
                rounds += 1;
            }
            rounds
        })
        .expect("spawn");
        assert!(handle.is_running());
        thread::sleep(Duration::from_millis(20));
        let rounds = handle.join().expect("join");
        assert!(rounds > 0);
    }

    #[test]
    fn test_is_finished_after_body_returns() {
        let handle = spawn_cancelable("test-once", |_| 7).expect("spawn");
        while !handle.is_finished() {
            thread::yield_now();
        }
        assert_eq!(handle.join().expect("join"), 7);
    }

    #[test]
    fn test_sleep_returns_early_when_stopped() {
        let running = AtomicBool::new(false);
        let start = Instant::now();
        assert!(!sleep_while_running(&running, Duration::from_secs(10)));
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
