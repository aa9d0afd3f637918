//! Verify an exported audit bundle offline.
//!
//! Prints a JSON summary. Exit codes: 0 valid, 2 integrity failure,
//! 1 usage or I/O failure.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use stampguard_lib::audit::verify::{verify_bundle_dir, EXIT_IO};

#[derive(Parser, Debug)]
#[command(name = "audit-verify", version, about = "Verify a signed audit export bundle")]
struct Args {
    /// Directory holding events.ndjson, meta.json and meta.sig
    #[arg(long)]
    dir: PathBuf,

    /// Ed25519 public key (SPKI PEM or base64 raw key)
    #[arg(long = "pub")]
    public_key: PathBuf,
}

fn main() -> ExitCode {
    stampguard_lib::init_tracing();
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            // --help and --version are not failures.
            let code = if e.use_stderr() { EXIT_IO } else { 0 };
            let _ = e.print();
            return ExitCode::from(code as u8);
        }
    };

    let outcome = verify_bundle_dir(&args.dir, &args.public_key);
    match serde_json::to_string_pretty(&outcome.summary) {
        Ok(json) => println!("{json}"),
        Err(e) => tracing::error!(error = %e, "Failed to render verification summary"),
    }
    if !outcome.summary.ok {
        tracing::error!(reason = ?outcome.summary.reason, dir = %args.dir.display(), "Bundle verification failed");
    }
    ExitCode::from(outcome.exit_code as u8)
}
