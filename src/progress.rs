//! Terminal progress display for the CLI, driven by polled `ProgressView`s.

use crate::monitor::{DisplayStatus, ProgressView};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {pos:>7} tasks  {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

/// Open-ended spinner: the total is unknown until the job completes.
pub struct JobSpinner {
    pb: ProgressBar,
    hidden: bool,
}

impl JobSpinner {
    pub fn new(label: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        pb.set_style(spinner_style());
        pb.set_message(label.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        Self { pb, hidden: false }
    }

    /// No terminal output; used when progress display is turned off.
    pub fn hidden() -> Self {
        Self { pb: ProgressBar::hidden(), hidden: true }
    }

    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    pub fn update(&self, view: &ProgressView) {
        self.pb.set_position(view.progress);
        if view.message.is_empty() {
            self.pb.set_message(view.status.to_string());
        } else {
            self.pb.set_message(format!("{}: {}", view.status, view.message));
        }
    }

    pub fn finish(&self, view: &ProgressView) {
        self.pb.set_position(view.progress);
        let msg = match (&view.status, &view.error_message, &view.detail) {
            (DisplayStatus::Job(_), Some(err), _) => format!("{}: {err}", view.status),
            (DisplayStatus::Job(_), None, _) => format!("{}: {}", view.status, view.message),
            (flag, _, Some(detail)) => format!("{flag} ({detail})"),
            (flag, _, None) => flag.to_string(),
        };
        self.pb.finish_with_message(msg);
    }
}
