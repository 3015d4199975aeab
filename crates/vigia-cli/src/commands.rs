//! CLI command definitions using clap

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Vigia: page objects, polling assertions and service doubles for browser tests
#[derive(Parser, Debug)]
#[command(name = "vigia")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (suppress non-error output)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Color output (auto, always, never)
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorArg,

    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show the effective harness configuration
    Config(ConfigArgs),

    /// Run the SSO and OAuth provider doubles until interrupted
    Doubles(DoublesArgs),

    /// Visit a page in a real browser and wait for its ready signal
    Probe(ProbeArgs),
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// YAML configuration file (defaults plus `VIGIA_*` variables when omitted)
    #[arg(short, long, env = "VIGIA_CONFIG")]
    pub file: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value = "yaml")]
    pub format: ConfigFormat,
}

/// Config output format
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConfigFormat {
    /// YAML, loadable with `--file`
    #[default]
    Yaml,
    /// JSON
    Json,
}

/// Arguments for the doubles command
#[derive(Parser, Debug)]
pub struct DoublesArgs {
    /// Secret shared between the SSO double and the application
    #[arg(long, env = "VIGIA_SSO_SECRET", default_value = "vigia-sso-secret")]
    pub secret: String,

    /// Username both providers assert
    #[arg(long, default_value = "vigia")]
    pub username: String,

    /// Email both providers assert
    #[arg(long, default_value = "vigia@example.com")]
    pub email: String,

    /// Print the listening URLs and exit without waiting
    #[arg(long)]
    pub once: bool,
}

/// Arguments for the probe command
#[derive(Parser, Debug)]
pub struct ProbeArgs {
    /// Path (or absolute URL) to visit
    pub path: String,

    /// Selector that signals the page is ready
    #[arg(long, default_value = "body")]
    pub ready: String,

    /// How long to wait for the ready selector, in milliseconds
    #[arg(long, default_value = "30000")]
    pub timeout_ms: u64,

    /// YAML configuration file
    #[arg(short, long, env = "VIGIA_CONFIG")]
    pub file: Option<PathBuf>,

    /// Save a PNG screenshot once ready
    #[arg(long)]
    pub screenshot: Option<PathBuf>,
}

/// Color argument
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorArg {
    /// Color when stdout is a terminal
    #[default]
    Auto,
    /// Always color
    Always,
    /// Never color
    Never,
}

impl From<ColorArg> for crate::config::ColorChoice {
    fn from(arg: ColorArg) -> Self {
        match arg {
            ColorArg::Auto => Self::Auto,
            ColorArg::Always => Self::Always,
            ColorArg::Never => Self::Never,
        }
    }
}
