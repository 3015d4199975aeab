//! Terminal output

use console::{style, Term};

/// Writes status lines to stderr and data to stdout
#[derive(Debug)]
pub struct Output {
    term: Term,
    /// Whether to use colors
    pub use_color: bool,
    /// Quiet mode
    pub quiet: bool,
}

impl Default for Output {
    fn default() -> Self {
        Self::new(false, false)
    }
}

impl Output {
    /// Create a new output writer
    #[must_use]
    pub fn new(use_color: bool, quiet: bool) -> Self {
        Self {
            term: Term::stderr(),
            use_color,
            quiet,
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        if self.quiet {
            return;
        }
        let prefix = if self.use_color {
            style("✓").green().bold().to_string()
        } else {
            "OK".to_string()
        };
        let _ = self.term.write_line(&format!("{prefix} {message}"));
    }

    /// Print a failure message, even in quiet mode
    pub fn failure(&self, message: &str) {
        let prefix = if self.use_color {
            style("✗").red().bold().to_string()
        } else {
            "FAIL".to_string()
        };
        let _ = self.term.write_line(&format!("{prefix} {message}"));
    }

    /// Print an aligned `label: value` line
    pub fn field(&self, label: &str, value: &str) {
        if self.quiet {
            return;
        }
        let label = format!("{label:>10}");
        let label = if self.use_color {
            style(label).cyan().to_string()
        } else {
            label
        };
        let _ = self.term.write_line(&format!("{label}  {value}"));
    }

    /// Print command output to stdout; never suppressed
    pub fn data(&self, text: &str) {
        let _ = Term::stdout().write_str(text);
        if !text.ends_with('\n') {
            let _ = Term::stdout().write_line("");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_plain() {
        let out = Output::default();
        assert!(!out.use_color);
        assert!(!out.quiet);
    }

    #[test]
    fn test_quiet_writer_still_constructs() {
        let out = Output::new(true, true);
        out.success("suppressed");
        out.field("sso", "suppressed");
        assert!(out.quiet);
    }
}
