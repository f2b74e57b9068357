//! Terminal rendering of progress events with indicatif

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::installer::{BatchReport, ProgressEvent, ProgressKind, ProgressObserver};

/// Bar resolution; fractions are scaled to this many steps
const BAR_STEPS: u64 = 1000;

fn bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("  {spinner:.blue} [{bar:30.cyan/blue}] {percent:>3}% {wide_msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-")
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("  {spinner:.blue} [{elapsed_precise}] {wide_msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

/// One bar per job, plus one for untagged events
pub struct ConsoleObserver {
    multi: MultiProgress,
    bars: HashMap<Option<Arc<str>>, ProgressBar>,
    quiet: bool,
}

impl ConsoleObserver {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            bars: HashMap::new(),
            quiet: false,
        }
    }

    /// Draw nothing, e.g. when the output is JSON
    pub fn hidden() -> Self {
        Self {
            multi: MultiProgress::with_draw_target(ProgressDrawTarget::hidden()),
            bars: HashMap::new(),
            quiet: true,
        }
    }

    fn bar(&mut self, job: Option<Arc<str>>) -> &ProgressBar {
        let multi = &self.multi;
        self.bars.entry(job).or_insert_with(|| {
            let pb = multi.add(ProgressBar::new(BAR_STEPS));
            pb.set_style(bar_style());
            pb
        })
    }

    /// Finish every bar; used for single-item flows that never batch
    pub fn finish(&mut self) {
        for (_, pb) in self.bars.drain() {
            pb.finish_and_clear();
        }
    }
}

impl Default for ConsoleObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressObserver for ConsoleObserver {
    fn on_event(&mut self, event: ProgressEvent) {
        let label = event.job.clone();
        let pb = self.bar(event.job);
        match event.kind {
            ProgressKind::Status(message) => match label {
                Some(job) => pb.set_message(format!("{}: {}", job, message)),
                None => pb.set_message(message),
            },
            ProgressKind::Fraction(value) => {
                pb.set_style(bar_style());
                pb.disable_steady_tick();
                pb.set_position((value * BAR_STEPS as f64).round() as u64);
            }
            ProgressKind::Indeterminate => {
                pb.set_style(spinner_style());
                pb.enable_steady_tick(Duration::from_millis(100));
            }
        }
    }

    fn on_complete(&mut self, report: &BatchReport) {
        self.finish();
        if self.quiet {
            return;
        }
        println!(
            "Done: {} succeeded, {} failed, {} duplicate(s) skipped",
            report.succeeded, report.failed, report.duplicates_skipped
        );
        for failure in &report.failures {
            println!("  FAILED {}: {}", failure.id, failure.error);
        }
    }
}
