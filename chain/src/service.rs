//! Service Threads - Lifecycle and Cancellation
//!
//! Every generator, miner and the validator run on a dedicated OS thread.
//! The supervisor gets a [`ServiceHandle`] back from each `spawn`, which it can
//! signal to stop and then join.
//!
//! Blocking waits inside a service never sleep unbounded: they wait in slices
//! of at most [`WAIT_SLICE`] and re-check the stop signal between slices.

use std::{
    any::Any,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use slog::Logger;

use crate::error::StartupError;

/// Longest uninterrupted wait performed by any blocking call.
pub const WAIT_SLICE: Duration = Duration::from_millis(20);

/// Shared stop flag for a service.
#[derive(Clone, Debug, Default)]
pub struct ShutdownSignal(Arc<AtomicBool>);

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests the service to stop.
    pub fn trigger(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Returns true once a stop was requested.
    #[inline]
    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Sleeps for `duration` unless a stop is requested first.
    ///
    /// Returns `true` if the full duration elapsed, `false` if interrupted.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_triggered() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep(WAIT_SLICE.min(deadline - now));
        }
    }
}

/// Progressive backoff for polling lock-free queues: spin, then yield, then
/// sleep for short periods.
#[derive(Debug, Default)]
pub(crate) struct Backoff {
    idle_count: u32,
}

impl Backoff {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn reset(&mut self) {
        self.idle_count = 0;
    }

    pub(crate) fn snooze(&mut self) {
        self.idle_count = self.idle_count.saturating_add(1);
        if self.idle_count < 10 {
            std::hint::spin_loop();
        } else if self.idle_count < 100 {
            thread::yield_now();
        } else {
            thread::sleep(Duration::from_millis(1));
        }
    }
}

/// Handle to a service running on its own OS thread.
///
/// `T` is whatever the service hands back when it exits (the validator
/// returns its ledger). Dropping the handle stops and joins the thread.
pub struct ServiceHandle<T = ()> {
    name: String,
    handle: Option<JoinHandle<T>>,
    shutdown: ShutdownSignal,
}

impl<T: Send + 'static> ServiceHandle<T> {
    /// Spawns `body` on a named thread, passing it the service's stop signal.
    pub fn spawn<F>(name: impl Into<String>, body: F) -> Result<Self, StartupError>
    where
        F: FnOnce(ShutdownSignal) -> T + Send + 'static,
    {
        let name = name.into();
        let shutdown = ShutdownSignal::new();
        let signal = shutdown.clone();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || body(signal))
            .map_err(|source| StartupError::Spawn {
                name: name.clone(),
                source,
            })?;
        Ok(Self {
            name,
            handle: Some(handle),
            shutdown,
        })
    }
}

impl<T> ServiceHandle<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Signals the service to stop without waiting for it.
    pub fn stop(&self) {
        self.shutdown.trigger();
    }

    /// Returns true if the service thread has not exited yet.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Waits for the thread to finish and returns its result.
    ///
    /// Returns `None` if the thread panicked or was already joined.
    pub fn join(&mut self) -> Option<T> {
        self.handle.take().and_then(|h| h.join().ok())
    }

    /// Like [`Self::join`], but logs the panic message if the thread
    /// panicked.
    pub fn join_logged(&mut self, logger: &Logger) -> Option<T> {
        match self.handle.take()?.join() {
            Ok(value) => Some(value),
            Err(payload) => {
                slog::error!(
                    logger,
                    "Service thread panicked";
                    "service" => self.name.as_str(),
                    "panic" => panic_message(payload.as_ref()),
                );
                None
            }
        }
    }

    /// Signals shutdown and waits for the thread to terminate.
    pub fn shutdown(&mut self) -> Option<T> {
        self.stop();
        self.join()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-text panic payload")
}

impl<T> Drop for ServiceHandle<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
