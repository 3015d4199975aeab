//! Command handlers, one module per subcommand

pub mod config;
pub mod doubles;
pub mod probe;

pub use config::{execute_config, load_harness_config, render_config};
pub use doubles::{execute_doubles, RunningDoubles};
pub use probe::{execute_probe, probe_page};
