//! Purpose: Define the public Rust API boundary for logwriter.
//! Exports: Producer, operator and inspection types needed by the binaries and tests.
//! Role: Additive-only surface over `core`; binaries import from here.
//! Invariants: Producers only attach to named objects; `initialize` is the sole creator.

use std::path::Path;

use tracing::warn;

pub use crate::core::error::{Error, ErrorKind, to_exit_code};
pub use crate::core::producer::{
    FAILURE_EXIT_CODE, Producer, ProducerConfig, ProducerState, Stopped, exit_code, tick_count,
};
pub use crate::core::record::{LogRecord, MAX_LOG_RECORDS, RECORD_LEN};
pub use crate::core::store::{ControlFile, LogFile};
pub use crate::core::sync::{
    DEFAULT_NAMESPACE, OsBackend, SyncBackend, SyncNames, SyncSet, WaitOutcome,
};

/// Creates the four named objects, then zeroed log and control files.
/// Existing objects fail the call before any file is truncated; a file that
/// cannot be created unlinks the objects again so a retry starts clean.
/// The returned set keeps the objects open; they outlive it until `destroy`.
pub fn initialize(
    names: &SyncNames,
    capacity: u32,
    log_path: &Path,
    control_path: &Path,
) -> Result<SyncSet<OsBackend>, Error> {
    initialize_with(names, capacity, log_path, control_path, OsBackend)
}

fn initialize_with<B: SyncBackend>(
    names: &SyncNames,
    capacity: u32,
    log_path: &Path,
    control_path: &Path,
    backend: B,
) -> Result<SyncSet<B>, Error> {
    let set = SyncSet::create(names, capacity, backend.clone())?;
    let files = LogFile::create(log_path, capacity).and_then(|_| ControlFile::create(control_path));
    if let Err(err) = files {
        if let Err(unlink_err) = SyncSet::unlink(names, &backend) {
            warn!(%unlink_err, "failed to unlink objects after file error");
        }
        return Err(err);
    }
    Ok(set)
}

/// Sets the shared cancellation signal; a no-op when it is already set.
pub fn request_cancel(names: &SyncNames) -> Result<(), Error> {
    let set = SyncSet::attach(names, OsBackend)?;
    set.cancel.set()
}

pub fn destroy(names: &SyncNames) -> Result<(), Error> {
    SyncSet::unlink(names, &OsBackend)
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LogSnapshot {
    pub write_index: u32,
    pub records: Vec<LogRecord>,
}

/// Reads every slot without taking the mutex; concurrent writers may tear records.
pub fn snapshot(
    log_path: &Path,
    control_path: &Path,
    capacity: u32,
) -> Result<LogSnapshot, Error> {
    let mut control = ControlFile::open(control_path)?;
    let mut log = LogFile::open(log_path, capacity)?;
    let write_index = control.read_index()?;
    let records = (0..capacity)
        .map(|slot| log.read_record(slot))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(LogSnapshot {
        write_index,
        records,
    })
}
