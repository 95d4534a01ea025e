//! Purpose: Attach to the named semaphores shared by producers, the consumer and the initializer.
//! Exports: `SyncBackend`, `OsBackend`, `NamedSemaphore`, `CancelSignal`, `SyncNames`, `SyncSet`.
//! Role: The only place that touches process-wide synchronization objects.
//! Invariants: Producers attach; only the initializer path (`SyncSet::create`) creates objects.
//! Invariants: Every attached handle is closed exactly once, when it is dropped.
//! Invariants: The cancellation signal is never cleared by observing it.

use std::io;
use std::time::Duration;

#[cfg(unix)]
use std::ffi::CString;

use tracing::{debug, trace};

use crate::core::error::{Error, ErrorKind, open_error_kind};

pub const DEFAULT_NAMESPACE: &str = "logwriter";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WaitOutcome {
    Signaled,
    TimedOut,
}

/// A family of counting semaphores addressed by name.
///
/// `wait` takes one unit when it returns `Signaled`. `value` is a snapshot and
/// may be stale by the time the caller looks at it.
pub trait SyncBackend: Clone {
    type Handle;

    fn attach(&self, name: &str) -> Result<Self::Handle, Error>;
    fn create(&self, name: &str, initial: u32) -> Result<Self::Handle, Error>;
    fn unlink(&self, name: &str) -> Result<(), Error>;
    fn post(&self, handle: &Self::Handle) -> Result<(), Error>;
    fn wait(&self, handle: &Self::Handle, timeout: Duration) -> Result<WaitOutcome, Error>;
    fn value(&self, handle: &Self::Handle) -> Result<u32, Error>;
    fn close(&self, handle: &Self::Handle);
}

pub struct NamedSemaphore<B: SyncBackend> {
    name: String,
    handle: B::Handle,
    backend: B,
}

impl<B: SyncBackend> NamedSemaphore<B> {
    pub fn attach(name: &str, backend: B) -> Result<Self, Error> {
        let handle = backend.attach(name)?;
        debug!(object = name, "attached");
        Ok(Self {
            name: name.to_string(),
            handle,
            backend,
        })
    }

    pub fn create(name: &str, initial: u32, backend: B) -> Result<Self, Error> {
        let handle = backend.create(name, initial)?;
        debug!(object = name, initial, "created");
        Ok(Self {
            name: name.to_string(),
            handle,
            backend,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn post(&self) -> Result<(), Error> {
        self.backend.post(&self.handle)
    }

    pub fn wait(&self, timeout: Duration) -> Result<WaitOutcome, Error> {
        self.backend.wait(&self.handle, timeout)
    }

    pub fn value(&self) -> Result<u32, Error> {
        self.backend.value(&self.handle)
    }
}

impl<B: SyncBackend> Drop for NamedSemaphore<B> {
    fn drop(&mut self) {
        self.backend.close(&self.handle);
        trace!(object = %self.name, "closed");
    }
}

/// Sticky broadcast flag: set while the semaphore value is non-zero.
///
/// Observers only read the value. Taking the unit to observe it would leave a
/// window where other processes see the flag cleared, and a crash inside that
/// window would clear it for good.
pub struct CancelSignal<B: SyncBackend> {
    inner: NamedSemaphore<B>,
}

impl<B: SyncBackend> CancelSignal<B> {
    pub fn new(inner: NamedSemaphore<B>) -> Self {
        Self { inner }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn is_set(&self) -> Result<bool, Error> {
        Ok(self.inner.value()? > 0)
    }

    pub fn set(&self) -> Result<(), Error> {
        if self.is_set()? {
            return Ok(());
        }
        self.inner.post()
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SyncNames {
    pub write_permits: String,
    pub read_permits: String,
    pub cancel: String,
    pub mutex: String,
}

impl SyncNames {
    pub fn for_namespace(namespace: &str) -> Result<Self, Error> {
        if namespace.is_empty() || namespace.contains('/') || namespace.contains('\0') {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("namespace must be non-empty and contain no '/' or NUL"));
        }
        Ok(Self::derive(namespace))
    }

    fn derive(namespace: &str) -> Self {
        Self {
            write_permits: format!("/{namespace}.write"),
            read_permits: format!("/{namespace}.read"),
            cancel: format!("/{namespace}.cancel"),
            mutex: format!("/{namespace}.mutex"),
        }
    }

    fn all(&self) -> [&str; 4] {
        [
            &self.write_permits,
            &self.read_permits,
            &self.cancel,
            &self.mutex,
        ]
    }
}

impl Default for SyncNames {
    fn default() -> Self {
        Self::derive(DEFAULT_NAMESPACE)
    }
}

/// The four objects of the write protocol, threaded explicitly through the producer.
pub struct SyncSet<B: SyncBackend> {
    pub write_permits: NamedSemaphore<B>,
    pub read_permits: NamedSemaphore<B>,
    pub cancel: CancelSignal<B>,
    pub mutex: NamedSemaphore<B>,
}

impl<B: SyncBackend> SyncSet<B> {
    /// Attaches in protocol order and stops at the first missing object;
    /// whatever was already attached is closed when it goes out of scope.
    pub fn attach(names: &SyncNames, backend: B) -> Result<Self, Error> {
        let write_permits = NamedSemaphore::attach(&names.write_permits, backend.clone())?;
        let read_permits = NamedSemaphore::attach(&names.read_permits, backend.clone())?;
        let cancel = CancelSignal::new(NamedSemaphore::attach(&names.cancel, backend.clone())?);
        let mutex = NamedSemaphore::attach(&names.mutex, backend)?;
        Ok(Self {
            write_permits,
            read_permits,
            cancel,
            mutex,
        })
    }

    /// Initializer side: creates every object exclusively with its starting count.
    pub fn create(names: &SyncNames, capacity: u32, backend: B) -> Result<Self, Error> {
        let write_permits =
            NamedSemaphore::create(&names.write_permits, capacity, backend.clone())?;
        let read_permits = NamedSemaphore::create(&names.read_permits, 0, backend.clone())?;
        let cancel =
            CancelSignal::new(NamedSemaphore::create(&names.cancel, 0, backend.clone())?);
        let mutex = NamedSemaphore::create(&names.mutex, 1, backend)?;
        Ok(Self {
            write_permits,
            read_permits,
            cancel,
            mutex,
        })
    }

    /// Removes every name; objects stay alive until their last handle closes.
    /// Missing names are skipped, the first other failure is reported.
    pub fn unlink(names: &SyncNames, backend: &B) -> Result<(), Error> {
        let mut first_err = None;
        for name in names.all() {
            match backend.unlink(name) {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => {
                    first_err.get_or_insert(err);
                }
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct OsBackend;

#[cfg(unix)]
impl SyncBackend for OsBackend {
    type Handle = *mut libc::sem_t;

    fn attach(&self, name: &str) -> Result<Self::Handle, Error> {
        let c_name = c_name(name)?;
        let handle = unsafe { libc::sem_open(c_name.as_ptr(), 0) };
        if handle == libc::SEM_FAILED {
            return Err(sem_error(name, io::Error::last_os_error()));
        }
        Ok(handle)
    }

    fn create(&self, name: &str, initial: u32) -> Result<Self::Handle, Error> {
        let c_name = c_name(name)?;
        let mode = (libc::S_IRUSR | libc::S_IWUSR) as libc::mode_t;
        let handle = unsafe {
            libc::sem_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_EXCL,
                mode as libc::c_uint,
                initial as libc::c_uint,
            )
        };
        if handle == libc::SEM_FAILED {
            return Err(sem_error(name, io::Error::last_os_error()));
        }
        Ok(handle)
    }

    fn unlink(&self, name: &str) -> Result<(), Error> {
        let c_name = c_name(name)?;
        let rc = unsafe { libc::sem_unlink(c_name.as_ptr()) };
        if rc != 0 {
            return Err(sem_error(name, io::Error::last_os_error()));
        }
        Ok(())
    }

    fn post(&self, handle: &Self::Handle) -> Result<(), Error> {
        let rc = unsafe { libc::sem_post(*handle) };
        if rc != 0 {
            return Err(Error::new(ErrorKind::Io)
                .with_message("sem_post failed")
                .with_source(io::Error::last_os_error()));
        }
        Ok(())
    }

    #[cfg(target_os = "linux")]
    fn wait(&self, handle: &Self::Handle, timeout: Duration) -> Result<WaitOutcome, Error> {
        let deadline = realtime_deadline(timeout)?;
        loop {
            let rc = unsafe { libc::sem_timedwait(*handle, &deadline) };
            if rc == 0 {
                return Ok(WaitOutcome::Signaled);
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(code) if code == libc::ETIMEDOUT => return Ok(WaitOutcome::TimedOut),
                Some(code) if code == libc::EINTR => continue,
                _ => {
                    return Err(Error::new(ErrorKind::Io)
                        .with_message("sem_timedwait failed")
                        .with_source(err));
                }
            }
        }
    }

    // No sem_timedwait outside Linux; fall back to short sleeps between try-waits.
    #[cfg(not(target_os = "linux"))]
    fn wait(&self, handle: &Self::Handle, timeout: Duration) -> Result<WaitOutcome, Error> {
        let start = std::time::Instant::now();
        let poll = Duration::from_millis(1);
        loop {
            let rc = unsafe { libc::sem_trywait(*handle) };
            if rc == 0 {
                return Ok(WaitOutcome::Signaled);
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(code) if code == libc::EAGAIN => {
                    if start.elapsed() >= timeout {
                        return Ok(WaitOutcome::TimedOut);
                    }
                    std::thread::sleep(poll);
                }
                Some(code) if code == libc::EINTR => continue,
                _ => {
                    return Err(Error::new(ErrorKind::Io)
                        .with_message("sem_trywait failed")
                        .with_source(err));
                }
            }
        }
    }

    fn value(&self, handle: &Self::Handle) -> Result<u32, Error> {
        let mut value: libc::c_int = 0;
        let rc = unsafe { libc::sem_getvalue(*handle, &mut value) };
        if rc != 0 {
            return Err(Error::new(ErrorKind::Io)
                .with_message("sem_getvalue failed")
                .with_source(io::Error::last_os_error()));
        }
        // Some platforms report the number of waiters as a negative value.
        Ok(u32::try_from(value).unwrap_or(0))
    }

    fn close(&self, handle: &Self::Handle) {
        unsafe {
            libc::sem_close(*handle);
        }
    }
}

#[cfg(not(unix))]
impl SyncBackend for OsBackend {
    type Handle = ();

    fn attach(&self, name: &str) -> Result<Self::Handle, Error> {
        Err(unsupported(name))
    }

    fn create(&self, name: &str, _initial: u32) -> Result<Self::Handle, Error> {
        Err(unsupported(name))
    }

    fn unlink(&self, name: &str) -> Result<(), Error> {
        Err(unsupported(name))
    }

    fn post(&self, _handle: &Self::Handle) -> Result<(), Error> {
        Err(unsupported(""))
    }

    fn wait(&self, _handle: &Self::Handle, _timeout: Duration) -> Result<WaitOutcome, Error> {
        Err(unsupported(""))
    }

    fn value(&self, _handle: &Self::Handle) -> Result<u32, Error> {
        Err(unsupported(""))
    }

    fn close(&self, _handle: &Self::Handle) {}
}

#[cfg(not(unix))]
fn unsupported(name: &str) -> Error {
    Error::new(ErrorKind::Internal)
        .with_message("named semaphores are not supported on this platform")
        .with_name(name)
}

#[cfg(unix)]
fn c_name(name: &str) -> Result<CString, Error> {
    CString::new(name).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message("object name contains NUL")
            .with_name(name)
            .with_source(err)
    })
}

#[cfg(unix)]
fn sem_error(name: &str, err: io::Error) -> Error {
    Error::new(open_error_kind(&err))
        .with_message("named semaphore unavailable")
        .with_name(name)
        .with_source(err)
}

#[cfg(target_os = "linux")]
fn realtime_deadline(timeout: Duration) -> Result<libc::timespec, Error> {
    let mut now: libc::timespec = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut now) };
    if rc != 0 {
        return Err(Error::new(ErrorKind::Io)
            .with_message("clock_gettime failed")
            .with_source(io::Error::last_os_error()));
    }
    let mut secs = now.tv_sec as i64 + timeout.as_secs() as i64;
    let mut nanos = now.tv_nsec as i64 + i64::from(timeout.subsec_nanos());
    if nanos >= 1_000_000_000 {
        secs += 1;
        nanos -= 1_000_000_000;
    }
    let mut deadline: libc::timespec = unsafe { std::mem::zeroed() };
    deadline.tv_sec = secs as _;
    deadline.tv_nsec = nanos as _;
    Ok(deadline)
}
