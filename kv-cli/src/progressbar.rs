//! User-facing status output: a single global sink so every command prints
//! through the same quiet-mode gate instead of calling `println!` directly.

use std::sync::atomic::{AtomicBool, Ordering};

use console::style;
use indicatif::{ProgressBar, ProgressStyle};

pub struct ProgressOutput {
    quiet: AtomicBool,
}

impl ProgressOutput {
    pub const fn new() -> Self {
        ProgressOutput { quiet: AtomicBool::new(false) }
    }

    pub fn set_quiet(&self, quiet: bool) {
        self.quiet.store(quiet, Ordering::SeqCst);
    }

    pub fn is_quiet(&self) -> bool {
        self.quiet.load(Ordering::SeqCst)
    }

    pub fn info(&self, message: &str) {
        if !self.is_quiet() {
            eprintln!("{}", style(message).bold());
        }
    }

    pub fn warn(&self, message: &str) {
        if !self.is_quiet() {
            eprintln!("{} {}", style("warning:").yellow().bold(), message);
        }
    }

    pub fn error(&self, message: &str) {
        eprintln!("{} {}", style("error:").red().bold(), message);
    }

    /// Spinner for an operation whose length isn't known up front. Returns
    /// `None` in quiet mode so callers don't need their own branch.
    pub fn spinner(&self, message: &str) -> Option<ProgressBar> {
        if self.is_quiet() {
            return None;
        }
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_message(message.to_string());
        bar.enable_steady_tick(std::time::Duration::from_millis(80));
        Some(bar)
    }
}
