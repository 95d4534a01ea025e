//! Purpose: Operator tool that sets up, inspects and tears down a logwriter deployment.
//! Role: Stands in for the external initializer; the producer itself never creates objects.
//! Invariants: `init` creates objects exclusively and fails if any name already exists.
//! Invariants: Errors print one plain stderr line; exit code comes from `to_exit_code`.
use std::path::PathBuf;

use clap::{Parser, Subcommand};

use logwriter::api::{
    DEFAULT_NAMESPACE, Error, MAX_LOG_RECORDS, SyncNames, destroy, initialize, request_cancel,
    snapshot, to_exit_code,
};

#[derive(Parser)]
#[command(
    name = "logwriter-ctl",
    version,
    about = "Create, cancel, inspect and remove a shared logwriter log"
)]
struct Cli {
    #[arg(long, global = true, env = "LOGWRITER_NAMESPACE", default_value = DEFAULT_NAMESPACE)]
    namespace: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create zeroed files and the four named objects.
    Init {
        #[arg(
            long,
            env = "LOGWRITER_CAPACITY",
            default_value_t = MAX_LOG_RECORDS,
            value_parser = clap::value_parser!(u32).range(1..)
        )]
        capacity: u32,
        log_file: PathBuf,
        control_file: PathBuf,
    },
    /// Set the shared cancellation signal.
    Cancel,
    /// Print the write index and every slot.
    Dump {
        #[arg(
            long,
            env = "LOGWRITER_CAPACITY",
            default_value_t = MAX_LOG_RECORDS,
            value_parser = clap::value_parser!(u32).range(1..)
        )]
        capacity: u32,
        log_file: PathBuf,
        control_file: PathBuf,
    },
    /// Unlink the named objects.
    Destroy,
}

fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        eprintln!("logwriter-ctl: {err}");
        std::process::exit(to_exit_code(err.kind()));
    }
}

fn run(cli: Cli) -> Result<(), Error> {
    let names = SyncNames::for_namespace(&cli.namespace)?;
    match cli.command {
        Command::Init {
            capacity,
            log_file,
            control_file,
        } => {
            initialize(&names, capacity, &log_file, &control_file)?;
            println!("initialized {} slots under {}", capacity, cli.namespace);
        }
        Command::Cancel => request_cancel(&names)?,
        Command::Dump {
            capacity,
            log_file,
            control_file,
        } => {
            let snapshot = snapshot(&log_file, &control_file, capacity)?;
            println!("write_index {}", snapshot.write_index);
            for (slot, record) in snapshot.records.iter().enumerate() {
                let status = if record.is_intact() { "ok" } else { "torn" };
                println!(
                    "slot {slot}: producer={} timestamp={} sequence={} checksum={:#010x} {status}",
                    record.producer_id, record.timestamp, record.sequence, record.checksum
                );
            }
        }
        Command::Destroy => destroy(&names)?,
    }
    Ok(())
}
