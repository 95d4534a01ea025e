//! Purpose: `logwriter` producer entry point.
//! Role: Binary crate root; parses args, attaches, runs the write loop, reports via exit status.
//! Invariants: Nothing is written to stdout/stderr unless `LOGWRITER_LOG` is set.
//! Invariants: Exit status is the committed count on a clean stop, `FAILURE_EXIT_CODE` otherwise.
//! Invariants: Argument errors fail before any file or named object is touched.
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use clap::Parser;
use signal_hook::consts::{SIGINT, SIGTERM};
use tracing::error;
use tracing_subscriber::EnvFilter;

use logwriter::api::{
    DEFAULT_NAMESPACE, Error, ErrorKind, FAILURE_EXIT_CODE, MAX_LOG_RECORDS, OsBackend,
    Producer, ProducerConfig, Stopped, SyncNames, exit_code,
};

const LOG_ENV: &str = "LOGWRITER_LOG";

#[derive(Parser, Debug)]
#[command(
    name = "logwriter",
    version,
    about = "Append checksummed records to a shared circular log until cancelled",
    long_about = None
)]
struct Cli {
    #[arg(value_name = "LOG_FILE")]
    log_file: PathBuf,
    #[arg(value_name = "CONTROL_FILE")]
    control_file: PathBuf,
    #[arg(
        value_name = "DELAY_MS",
        allow_negative_numbers = true,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    delay_ms: u64,
    #[arg(long, env = "LOGWRITER_NAMESPACE", default_value = DEFAULT_NAMESPACE)]
    namespace: String,
    #[arg(
        long,
        env = "LOGWRITER_CAPACITY",
        default_value_t = MAX_LOG_RECORDS,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    capacity: u32,
}

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    // No console is assumed: usage errors, help and version requests all fail silently.
    let Ok(cli) = Cli::try_parse() else {
        return FAILURE_EXIT_CODE;
    };
    init_tracing();

    let result = produce(&cli);
    exit_code(&result)
}

fn produce(cli: &Cli) -> Result<Stopped, Error> {
    let names = SyncNames::for_namespace(&cli.namespace)
        .inspect_err(|err| error!(%err, "invalid namespace"))?;
    let config = ProducerConfig::new(
        &cli.log_file,
        &cli.control_file,
        Duration::from_millis(cli.delay_ms),
    )
    .with_capacity(cli.capacity)
    .with_names(names);

    let stop = Arc::new(AtomicBool::new(false));
    for signal in [SIGINT, SIGTERM] {
        signal_hook::flag::register(signal, stop.clone()).map_err(|err| {
            error!(%err, signal, "failed to install signal handler");
            Error::new(ErrorKind::Internal)
                .with_message("failed to install signal handler")
                .with_source(err)
        })?;
    }

    let mut producer = Producer::open(&config, OsBackend)
        .inspect_err(|err| error!(%err, "initialization failed"))?
        .with_local_stop(stop);
    producer.run()
}

fn init_tracing() {
    let Ok(env_filter) = EnvFilter::try_from_env(LOG_ENV) else {
        return;
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
