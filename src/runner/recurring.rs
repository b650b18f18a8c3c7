// Recurring task runner
//
// Drives one callback at a fixed cadence from a spawned ticker task.
// Start/stop toggle firing without touching the underlying schedule;
// dispose releases it permanently.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::shutdown::{self, HookId};

/// Errors surfaced at runner construction.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// A zero interval would fire at an unbounded rate.
    #[error("interval must be positive, got {0:?}")]
    InvalidInterval(Duration),
}

/// Recurring task runner: invokes one callback every `interval` until
/// stopped or disposed.
///
/// The ticker task is spawned at construction but does not fire until
/// [`start`](Self::start) is called. Fires are serialized: the callback
/// runs to completion before the next tick is considered, and ticks missed
/// while an invocation overruns the interval are skipped, not stacked.
///
/// Teardown happens exactly once, through whichever of [`dispose`](Self::dispose),
/// a process-exit signal, or `Drop` comes first.
pub struct RecurringRunner {
    inner: Arc<RunnerInner>,
}

struct RunnerInner {
    running: AtomicBool,
    disposed: AtomicBool,
    ticker: Mutex<Option<JoinHandle<()>>>,
    exit_hook: Mutex<Option<HookId>>,
}

impl RecurringRunner {
    /// Create a runner that will invoke `callback` every `interval` once
    /// started.
    ///
    /// A callback returning `Err` is logged and does not affect future
    /// fires. Must be called from within a tokio runtime; the other
    /// methods have no runtime requirement.
    pub fn new<F>(callback: F, interval: Duration) -> Result<Self, RunnerError>
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        if interval.is_zero() {
            return Err(RunnerError::InvalidInterval(interval));
        }

        let inner = Arc::new(RunnerInner {
            running: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            ticker: Mutex::new(None),
            exit_hook: Mutex::new(None),
        });

        let handle = {
            let inner = Arc::clone(&inner);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                // The interval's first tick resolves immediately; consume it
                // so fires land one full interval apart
                ticker.tick().await;

                loop {
                    ticker.tick().await;
                    if !inner.running.load(Ordering::SeqCst) {
                        continue;
                    }
                    match panic::catch_unwind(AssertUnwindSafe(&callback)) {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => error!("Task tick failed: {:#}", e),
                        Err(_) => error!("Task tick panicked"),
                    }
                }
            })
        };
        *inner
            .ticker
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);

        let hook = {
            let inner = Arc::clone(&inner);
            shutdown::register(move || inner.dispose())
        };
        *inner
            .exit_hook
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(hook);

        Ok(Self { inner })
    }

    /// Enable firing. No-op if already running or disposed.
    pub fn start(&self) {
        self.inner.start();
    }

    /// Disable future fires. Does not wait for an in-flight invocation.
    /// No-op if already stopped or disposed.
    pub fn stop(&self) {
        self.inner.stop();
    }

    /// Release the ticker task and deregister the exit hook.
    ///
    /// Idempotent and safe to call concurrently from any thread, including
    /// the signal-handler thread; exactly one caller performs the release.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    /// Whether the runner is currently firing.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Whether the runner has been torn down.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }
}

impl Drop for RecurringRunner {
    fn drop(&mut self) {
        self.inner.dispose();
    }
}

impl RunnerInner {
    fn start(&self) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        // A dispose may have landed between the two flag operations; roll
        // back so a disposed runner is never left marked running
        if self.disposed.load(Ordering::SeqCst) {
            self.running.store(false, Ordering::SeqCst);
            return;
        }
        info!("Task started");
    }

    fn stop(&self) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("Task stopped");
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.running.store(false, Ordering::SeqCst);

        // The callback is synchronous, so an abort only lands at the next
        // tick await; an in-flight invocation runs to completion
        if let Some(handle) = self
            .ticker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }

        if let Some(hook) = self
            .exit_hook
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            shutdown::unregister(hook);
        }

        info!("Task disposed");
    }
}
