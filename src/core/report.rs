//! Verbosity-gated progress reporting for the CLI.
//!
//! Errors and warnings always print; `detail` needs -v, `trace` needs -vv.
//! One-line messages at low verbosity, full command echo at higher levels.

use colored::Colorize;

/// Cheaply-cloneable reporter carried by every component that talks to the
/// user.
#[derive(Debug, Clone)]
pub struct Reporter {
    verbosity: u8,
    color: bool,
}

impl Reporter {
    #[must_use]
    pub fn new(verbosity: u8, color: bool) -> Self {
        Self { verbosity, color }
    }

    /// Reporter that prints nothing below the error level. Used by tests.
    #[must_use]
    pub fn quiet() -> Self {
        Self {
            verbosity: 0,
            color: false,
        }
    }

    #[must_use]
    pub fn verbosity(&self) -> u8 {
        self.verbosity
    }

    pub fn error(&self, msg: &str) {
        if self.color {
            eprintln!("{} {msg}", "error:".red().bold());
        } else {
            eprintln!("error: {msg}");
        }
    }

    pub fn warn(&self, msg: &str) {
        if self.color {
            eprintln!("{} {msg}", "warning:".yellow().bold());
        } else {
            eprintln!("warning: {msg}");
        }
    }

    /// Normal progress output.
    pub fn info(&self, msg: &str) {
        println!("{msg}");
    }

    /// Printed at -v and above.
    pub fn detail(&self, msg: &str) {
        if self.verbosity >= 1 {
            println!("{msg}");
        }
    }

    /// Printed at -vv and above.
    pub fn trace(&self, msg: &str) {
        if self.verbosity >= 2 {
            println!("{msg}");
        }
    }
}
