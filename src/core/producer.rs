//! Purpose: Run the producer side of the circular-log write protocol.
//! Exports: `ProducerConfig`, `Producer`, `ProducerState`, `Stopped`, `exit_code`.
//! Role: Drives permit, mutex, commit, signal and delay until cancelled or failed.
//! Invariants: The control and log files are only touched while the mutex is held.
//! Invariants: A read permit is posted strictly after the mutex is released.
//! Invariants: Leaving an iteration early returns its pending permit before releasing the mutex.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::core::error::Error;
use crate::core::guard::{CriticalSection, MutexGuard, PermitGuard};
use crate::core::record::{LogRecord, MAX_LOG_RECORDS, slot_for_index};
use crate::core::store::{ControlFile, LogFile};
use crate::core::sync::{SyncBackend, SyncNames, SyncSet};
use crate::core::wait::{DelayResult, WaitResult, Waiter};

pub const FAILURE_EXIT_CODE: i32 = 255;
const MAX_SUCCESS_EXIT_CODE: u32 = 254;

#[derive(Clone, Debug)]
pub struct ProducerConfig {
    pub log_path: PathBuf,
    pub control_path: PathBuf,
    pub delay: Duration,
    pub capacity: u32,
    pub names: SyncNames,
}

impl ProducerConfig {
    pub fn new(
        log_path: impl Into<PathBuf>,
        control_path: impl Into<PathBuf>,
        delay: Duration,
    ) -> Self {
        Self {
            log_path: log_path.into(),
            control_path: control_path.into(),
            delay,
            capacity: MAX_LOG_RECORDS,
            names: SyncNames::default(),
        }
    }

    pub fn with_capacity(mut self, capacity: u32) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_names(mut self, names: SyncNames) -> Self {
        self.names = names;
        self
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProducerState {
    AcquireWritePermit,
    AcquireMutex,
    Commit,
    Signal,
    Delay,
    ShuttingDown,
    Failed,
}

/// Clean, cancellation-driven end of the loop.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Stopped {
    pub committed: u32,
}

pub struct Producer<B: SyncBackend> {
    sync: SyncSet<B>,
    log: LogFile,
    control: ControlFile,
    delay: Duration,
    producer_id: u32,
    sequence: u32,
    state: ProducerState,
    local_stop: Option<Arc<AtomicBool>>,
}

impl<B: SyncBackend> Producer<B> {
    /// Attaches to the named objects, then opens both files. Nothing is created.
    pub fn open(config: &ProducerConfig, backend: B) -> Result<Self, Error> {
        let sync = SyncSet::attach(&config.names, backend)?;
        let log = LogFile::open(&config.log_path, config.capacity)?;
        let control = ControlFile::open(&config.control_path)?;
        debug!(
            log = %config.log_path.display(),
            control = %config.control_path.display(),
            capacity = config.capacity,
            "producer attached"
        );
        Ok(Self {
            sync,
            log,
            control,
            delay: config.delay,
            producer_id: std::process::id(),
            sequence: 0,
            state: ProducerState::AcquireWritePermit,
            local_stop: None,
        })
    }

    pub fn with_local_stop(mut self, flag: Arc<AtomicBool>) -> Self {
        self.local_stop = Some(flag);
        self
    }

    pub fn state(&self) -> ProducerState {
        self.state
    }

    pub fn committed(&self) -> u32 {
        self.sequence
    }

    pub fn run(&mut self) -> Result<Stopped, Error> {
        match self.run_loop() {
            Ok(stopped) => {
                self.state = ProducerState::ShuttingDown;
                info!(committed = stopped.committed, "producer stopped");
                Ok(stopped)
            }
            Err(err) => {
                let failed_in = self.state;
                self.state = ProducerState::Failed;
                error!(?failed_in, committed = self.sequence, %err, "producer failed");
                Err(err)
            }
        }
    }

    fn run_loop(&mut self) -> Result<Stopped, Error> {
        let mut waiter = Waiter::new(&self.sync.cancel);
        if let Some(flag) = &self.local_stop {
            waiter = waiter.with_local_stop(flag.clone());
        }

        loop {
            self.state = ProducerState::AcquireWritePermit;
            let permit = match waiter.wait_cancellable(&self.sync.write_permits)? {
                WaitResult::Acquired => PermitGuard::new(&self.sync.write_permits),
                WaitResult::Cancelled => break,
            };

            self.state = ProducerState::AcquireMutex;
            let lock = match waiter.wait_cancellable(&self.sync.mutex)? {
                WaitResult::Acquired => MutexGuard::new(&self.sync.mutex),
                WaitResult::Cancelled => break,
            };
            let section = CriticalSection::new(permit, lock);

            self.state = ProducerState::Commit;
            let record = LogRecord::new(self.producer_id, tick_count(), self.sequence);
            let write_index = commit_record(&mut self.control, &mut self.log, &record)?;
            section.complete()?;
            self.sequence = self.sequence.wrapping_add(1);
            debug!(
                write_index,
                slot = slot_for_index(write_index, self.log.capacity()),
                sequence = record.sequence,
                "record committed"
            );

            self.state = ProducerState::Signal;
            self.sync.read_permits.post()?;

            self.state = ProducerState::Delay;
            if waiter.wait_cancellable_timeout(self.delay)? == DelayResult::Cancelled {
                break;
            }
        }

        Ok(Stopped {
            committed: self.sequence,
        })
    }
}

/// Reads the index, writes the record into its slot, advances the index.
/// Returns the index the record was written under.
fn commit_record(
    control: &mut ControlFile,
    log: &mut LogFile,
    record: &LogRecord,
) -> Result<u32, Error> {
    let write_index = control.read_index()?;
    let slot = slot_for_index(write_index, log.capacity());
    log.write_record(slot, record)?;
    control.write_index(write_index.wrapping_add(1))?;
    Ok(write_index)
}

/// Exit status for a finished run: the committed count on a clean stop,
/// `FAILURE_EXIT_CODE` otherwise.
pub fn exit_code(result: &Result<Stopped, Error>) -> i32 {
    match result {
        Ok(stopped) => stopped.committed.min(MAX_SUCCESS_EXIT_CODE) as i32,
        Err(_) => FAILURE_EXIT_CODE,
    }
}

/// Milliseconds on the monotonic clock, truncated to 32 bits.
#[cfg(unix)]
pub fn tick_count() -> u32 {
    let mut now: libc::timespec = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut now) };
    if rc != 0 {
        return 0;
    }
    let millis = (now.tv_sec as u64)
        .wrapping_mul(1000)
        .wrapping_add(now.tv_nsec as u64 / 1_000_000);
    millis as u32
}

#[cfg(not(unix))]
pub fn tick_count() -> u32 {
    use std::sync::OnceLock;
    use std::time::Instant;
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    EPOCH.get_or_init(Instant::now).elapsed().as_millis() as u32
}
