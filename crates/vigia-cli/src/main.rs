//! Vigia CLI
//!
//! ## Usage
//!
//! ```bash
//! vigia config --format json          # Effective harness configuration
//! vigia doubles --username bob        # Run SSO + OAuth doubles until Ctrl-C
//! vigia probe /latest --ready .topic-list   # Needs --features browser
//! ```

use clap::Parser;
use std::process::ExitCode;
use vigia_cli::Cli;

fn main() -> ExitCode {
    match vigia_cli::run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
