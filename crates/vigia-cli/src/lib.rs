//! Vigia CLI library
//!
//! Command-line companion to the `vigia` harness: prints the effective
//! configuration, runs the SSO and OAuth doubles for manual work against a
//! local application, and probes a page in a real browser.

#![warn(missing_docs)]
#![allow(clippy::missing_errors_doc)]

mod commands;
mod config;
mod error;
pub mod handlers;
mod output;

pub use commands::{Cli, ColorArg, Commands, ConfigArgs, ConfigFormat, DoublesArgs, ProbeArgs};
pub use config::{CliConfig, ColorChoice, Verbosity};
pub use error::{CliError, CliResult};
pub use output::Output;

/// Install the tracing subscriber for `verbosity`, honouring `VIGIA_LOG`
pub fn init_logging(verbosity: Verbosity) -> bool {
    let log = vigia::LogConfig {
        filter: verbosity.log_filter().to_string(),
        ..vigia::LogConfig::default()
    };
    vigia::logging::init(&log)
}

/// Dispatch a parsed command line
pub fn run(cli: Cli) -> CliResult<()> {
    let config = CliConfig::new()
        .with_verbosity(Verbosity::from_flags(cli.quiet, cli.verbose))
        .with_color(cli.color.into());
    init_logging(config.verbosity);
    let out = Output::new(config.color.should_color(), config.verbosity.is_quiet());

    match cli.command {
        Commands::Config(args) => handlers::execute_config(&out, &args),
        Commands::Doubles(args) => handlers::execute_doubles(&out, &args),
        Commands::Probe(args) => handlers::execute_probe(&out, &args),
    }
}
