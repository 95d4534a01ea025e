// Process-level checks of the producer binary against real named semaphores.
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use logwriter::api::{
    ControlFile, FAILURE_EXIT_CODE, LogFile, OsBackend, SyncNames, SyncSet, WaitOutcome, destroy,
    initialize, snapshot,
};

fn cmd() -> Command {
    let exe = env!("CARGO_BIN_EXE_logwriter");
    Command::new(exe)
}

/// Unique namespace per test; the objects are unlinked when this drops.
struct Namespace {
    name: String,
    names: SyncNames,
}

impl Namespace {
    fn new() -> Self {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        let name = format!(
            "lwtest-{}-{}",
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::SeqCst)
        );
        let names = SyncNames::for_namespace(&name).expect("names");
        Self { name, names }
    }
}

impl Drop for Namespace {
    fn drop(&mut self) {
        let _ = destroy(&self.names);
    }
}

struct Paths {
    _dir: tempfile::TempDir,
    log: PathBuf,
    ctrl: PathBuf,
}

fn paths() -> Paths {
    let dir = tempfile::tempdir().expect("tempdir");
    let log = dir.path().join("log.bin");
    let ctrl = dir.path().join("ctrl.bin");
    Paths {
        _dir: dir,
        log,
        ctrl,
    }
}

fn spawn_producer(ns: &Namespace, paths: &Paths, capacity: u32, delay_ms: u32) -> Child {
    cmd()
        .arg(&paths.log)
        .arg(&paths.ctrl)
        .arg(delay_ms.to_string())
        .env("LOGWRITER_NAMESPACE", &ns.name)
        .env("LOGWRITER_CAPACITY", capacity.to_string())
        .env_remove("LOGWRITER_LOG")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn")
}

fn await_read_permit(set: &SyncSet<OsBackend>) {
    let outcome = set
        .read_permits
        .wait(Duration::from_secs(10))
        .expect("wait");
    assert_eq!(outcome, WaitOutcome::Signaled);
}

fn wait_with_deadline(mut child: Child, limit: Duration) -> i32 {
    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait().expect("try_wait") {
            return status.code().expect("exit code");
        }
        if start.elapsed() > limit {
            let _ = child.kill();
            panic!("producer did not exit within {limit:?}");
        }
        thread::sleep(Duration::from_millis(5));
    }
}

fn all_zero(path: &Path) -> bool {
    std::fs::read(path).expect("read").iter().all(|byte| *byte == 0)
}

#[test]
fn cancel_after_third_commit_exits_with_three() {
    let ns = Namespace::new();
    let paths = paths();
    let set = initialize(&ns.names, 16, &paths.log, &paths.ctrl).expect("init");

    let child = spawn_producer(&ns, &paths, 16, 50);
    for _ in 0..3 {
        await_read_permit(&set);
    }
    // Inside the third delay, with permits still available.
    thread::sleep(Duration::from_millis(10));
    set.cancel.set().expect("cancel");

    assert_eq!(wait_with_deadline(child, Duration::from_secs(5)), 3);
    assert_eq!(set.write_permits.value().expect("permits"), 13);
    let snap = snapshot(&paths.log, &paths.ctrl, 16).expect("snapshot");
    assert_eq!(snap.write_index, 3);
    for (slot, record) in snap.records.iter().enumerate().take(3) {
        assert!(record.is_intact());
        assert_eq!(record.sequence, slot as u32);
    }
    assert!(snap.records[3..].iter().all(|record| record.producer_id == 0));
    assert_eq!(set.mutex.value().expect("mutex"), 1);
}

#[test]
fn six_commits_wrap_a_four_slot_log() {
    let ns = Namespace::new();
    let paths = paths();
    let set = initialize(&ns.names, 4, &paths.log, &paths.ctrl).expect("init");

    let child = spawn_producer(&ns, &paths, 4, 50);
    for read in 0..6 {
        await_read_permit(&set);
        // Drain only the first two slots so exactly six permits ever exist.
        if read < 2 {
            set.write_permits.post().expect("return permit");
        }
    }
    set.cancel.set().expect("cancel");

    assert_eq!(wait_with_deadline(child, Duration::from_secs(5)), 6);
    let mut ctrl = ControlFile::open(&paths.ctrl).expect("ctrl");
    assert_eq!(ctrl.read_index().expect("index"), 6);
    let mut log = LogFile::open(&paths.log, 4).expect("log");
    let first = log.read_record(0).expect("slot 0");
    let second = log.read_record(1).expect("slot 1");
    assert_eq!(first.sequence, 4);
    assert_eq!(second.sequence, 5);
    assert!(first.is_intact() && second.is_intact());
    assert_eq!(set.write_permits.value().expect("permits"), 0);
}

#[test]
fn missing_objects_fail_without_writes() {
    let ns = Namespace::new();
    let paths = paths();
    LogFile::create(&paths.log, 4).expect("log");
    ControlFile::create(&paths.ctrl).expect("ctrl");

    let output = cmd()
        .arg(&paths.log)
        .arg(&paths.ctrl)
        .arg("10")
        .env("LOGWRITER_NAMESPACE", &ns.name)
        .env("LOGWRITER_CAPACITY", "4")
        .env_remove("LOGWRITER_LOG")
        .output()
        .expect("run");

    assert_eq!(output.status.code(), Some(FAILURE_EXIT_CODE));
    assert!(output.stdout.is_empty());
    assert!(output.stderr.is_empty());
    assert!(all_zero(&paths.log));
    assert!(all_zero(&paths.ctrl));
}

#[test]
fn bad_arguments_fail_silently() {
    let cases: [&[&str]; 5] = [
        &[],
        &["log.bin", "ctrl.bin"],
        &["log.bin", "ctrl.bin", "0"],
        &["log.bin", "ctrl.bin", "-5"],
        &["log.bin", "ctrl.bin", "soon"],
    ];
    for args in cases {
        let output = cmd()
            .args(args)
            .env_remove("LOGWRITER_LOG")
            .output()
            .expect("run");
        assert_eq!(output.status.code(), Some(FAILURE_EXIT_CODE), "args: {args:?}");
        assert!(output.stdout.is_empty(), "args: {args:?}");
        assert!(output.stderr.is_empty(), "args: {args:?}");
    }
}

#[cfg(unix)]
#[test]
fn sigterm_returns_the_pending_permit() {
    let ns = Namespace::new();
    let paths = paths();
    let set = initialize(&ns.names, 2, &paths.log, &paths.ctrl).expect("init");
    // Hold the mutex so the producer parks with a permit pending.
    let taken = set.mutex.wait(Duration::from_secs(1)).expect("mutex");
    assert_eq!(taken, WaitOutcome::Signaled);

    let child = spawn_producer(&ns, &paths, 2, 10);
    let start = Instant::now();
    while set.write_permits.value().expect("permits") != 1 {
        assert!(start.elapsed() < Duration::from_secs(5), "producer never took a permit");
        thread::sleep(Duration::from_millis(5));
    }
    let rc = unsafe { libc::kill(child.id() as libc::pid_t, libc::SIGTERM) };
    assert_eq!(rc, 0);

    assert_eq!(wait_with_deadline(child, Duration::from_secs(5)), 0);
    assert_eq!(set.write_permits.value().expect("permits"), 2);
    assert!(!set.cancel.is_set().expect("cancel"));
    assert!(all_zero(&paths.ctrl));
}
