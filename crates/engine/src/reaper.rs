//! Background reaper thread
//!
//! Runs a task on a fixed period until stopped. The database uses it to roll
//! back transactions whose keep-alive has gone stale and to run compaction.

use parking_lot::{Condvar, Mutex};
use snapkv_core::SiResult;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::debug;

struct Signal {
    stopped: Mutex<bool>,
    wake: Condvar,
}

/// Handle to a periodic background thread
pub(crate) struct Reaper {
    signal: Arc<Signal>,
    handle: Option<JoinHandle<()>>,
}

impl Reaper {
    /// Spawn `snapkv-reaper`, calling `task` every `interval`
    ///
    /// The thread exits when stopped or when `task` returns `false`.
    pub(crate) fn spawn<F>(interval: Duration, mut task: F) -> SiResult<Self>
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let signal = Arc::new(Signal {
            stopped: Mutex::new(false),
            wake: Condvar::new(),
        });
        let thread_signal = Arc::clone(&signal);
        let handle = std::thread::Builder::new()
            .name("snapkv-reaper".to_string())
            .spawn(move || loop {
                {
                    let mut stopped = thread_signal.stopped.lock();
                    if !*stopped {
                        thread_signal.wake.wait_for(&mut stopped, interval);
                    }
                    if *stopped {
                        break;
                    }
                }
                if !task() {
                    break;
                }
            })?;
        debug!(target: "snapkv::reaper", interval_ms = interval.as_millis() as u64, "Reaper started");
        Ok(Reaper {
            signal,
            handle: Some(handle),
        })
    }

    /// Signal the thread and wait for it to exit
    pub(crate) fn stop(&mut self) {
        {
            let mut stopped = self.signal.stopped.lock();
            *stopped = true;
            self.signal.wake.notify_all();
        }
        if let Some(handle) = self.handle.take() {
            // The last database handle can be dropped on the reaper itself
            if handle.thread().id() != std::thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for Reaper {
    fn drop(&mut self) {
        self.stop();
    }
}
