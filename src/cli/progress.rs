//! CLI-specific progress handling for valhalla-layers
//!
//! Drives an indicatif progress bar from batch feedback and turns Ctrl-C
//! into a cancellation request polled between units.

use indicatif::{ProgressBar, ProgressStyle};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use valhalla_layers::Feedback;

/// Creates a percentage progress bar for CLI display
pub fn create_progress_bar() -> ProgressBar {
    let pb = ProgressBar::new(100);
    match ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}% {msg}")
    {
        Ok(style) => pb.set_style(style.progress_chars("#>-")),
        Err(e) => log::debug!("Keeping default progress style: {e}"),
    }
    pb
}

/// Progress bar feedback for one batch
pub struct ProgressFeedback {
    pub pb: ProgressBar,
    cancelled: Arc<AtomicBool>,
}

impl ProgressFeedback {
    /// Create a progress bar and print the batch message
    pub fn new(message: &str) -> Self {
        Self::with_bar(create_progress_bar(), message)
    }

    /// Same as `new` on an existing bar, e.g. a hidden one
    pub fn with_bar(pb: ProgressBar, message: &str) -> Self {
        eprintln!("{message}");
        Self {
            pb,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag shared with the Ctrl-C watcher
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    /// Set the cancel flag on the first Ctrl-C
    pub fn watch_ctrl_c(&self) {
        let flag = self.cancel_flag();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("⏹️  Cancelling after the current request...");
                flag.store(true, Ordering::SeqCst);
            }
        });
    }

    pub fn finish(&self, message: &str) {
        self.pb.finish_with_message(message.to_string());
    }
}

impl Feedback for ProgressFeedback {
    fn set_progress(&self, percent: f64) {
        self.pb.set_position(percent.clamp(0.0, 100.0).round() as u64);
    }

    fn report_error(&self, message: &str) {
        self.pb.println(format!("⚠️  {message}"));
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
