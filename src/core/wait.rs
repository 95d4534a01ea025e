// Blocking waits that always race the cancellation signal, which wins ties.
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, warn};

use crate::core::error::Error;
use crate::core::sync::{CancelSignal, NamedSemaphore, SyncBackend, WaitOutcome};

/// Longest single OS wait between two cancellation checks.
pub const WAIT_SLICE: Duration = Duration::from_millis(10);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WaitResult {
    Acquired,
    Cancelled,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DelayResult {
    TimedOut,
    Cancelled,
}

pub struct Waiter<'a, B: SyncBackend> {
    cancel: &'a CancelSignal<B>,
    local_stop: Option<Arc<AtomicBool>>,
    observed: bool,
}

impl<'a, B: SyncBackend> Waiter<'a, B> {
    pub fn new(cancel: &'a CancelSignal<B>) -> Self {
        Self {
            cancel,
            local_stop: None,
            observed: false,
        }
    }

    /// Also treat `flag` as cancellation; it is never propagated to other processes.
    pub fn with_local_stop(mut self, flag: Arc<AtomicBool>) -> Self {
        self.local_stop = Some(flag);
        self
    }

    pub fn cancelled(&self) -> bool {
        self.observed
    }

    fn check(&mut self) -> Result<bool, Error> {
        if self.observed {
            return Ok(true);
        }
        let local = self
            .local_stop
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst));
        if local || self.cancel.is_set()? {
            self.observe();
        }
        Ok(self.observed)
    }

    fn observe(&mut self) {
        if !self.observed {
            debug!(signal = self.cancel.name(), "cancellation observed");
        }
        self.observed = true;
    }

    /// Takes one unit of `target` unless cancellation is or becomes visible first.
    pub fn wait_cancellable(&mut self, target: &NamedSemaphore<B>) -> Result<WaitResult, Error> {
        loop {
            if self.check()? {
                return Ok(WaitResult::Cancelled);
            }
            match target.wait(WAIT_SLICE)? {
                WaitOutcome::Signaled => {
                    // Goes back to `target` if the check below fails.
                    let unit = TakenUnit::new(target);
                    if self.check()? {
                        unit.hand_back()?;
                        return Ok(WaitResult::Cancelled);
                    }
                    unit.keep();
                    return Ok(WaitResult::Acquired);
                }
                WaitOutcome::TimedOut => {}
            }
        }
    }

    /// Sleeps up to `duration`, polling the signal between slices. The signal
    /// is only read, never waited on, so its unit stays put for other processes.
    pub fn wait_cancellable_timeout(&mut self, duration: Duration) -> Result<DelayResult, Error> {
        let deadline = Instant::now() + duration;
        loop {
            if self.check()? {
                return Ok(DelayResult::Cancelled);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(DelayResult::TimedOut);
            }
            thread::sleep((deadline - now).min(WAIT_SLICE));
        }
    }
}

/// One unit taken from a semaphore that is posted back unless kept.
struct TakenUnit<'t, B: SyncBackend> {
    target: &'t NamedSemaphore<B>,
    pending: bool,
}

impl<'t, B: SyncBackend> TakenUnit<'t, B> {
    fn new(target: &'t NamedSemaphore<B>) -> Self {
        Self {
            target,
            pending: true,
        }
    }

    fn keep(mut self) {
        self.pending = false;
    }

    fn hand_back(mut self) -> Result<(), Error> {
        self.pending = false;
        self.target.post()
    }
}

impl<B: SyncBackend> Drop for TakenUnit<'_, B> {
    fn drop(&mut self) {
        if !self.pending {
            return;
        }
        match self.target.post() {
            Ok(()) => warn!(object = self.target.name(), "handed back unit after failed check"),
            Err(err) => error!(object = self.target.name(), %err, "failed to hand back unit"),
        }
    }
}
