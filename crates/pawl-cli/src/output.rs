//! Output formatting and progress reporting

use console::{style, Style, Term};
use indicatif::{ProgressBar, ProgressStyle};
use pawl::{RunSummary, StoryReport};
use std::time::Duration;

/// Progress reporter for story runs and generation
#[derive(Debug)]
pub struct ProgressReporter {
    term: Term,
    progress_bar: Option<ProgressBar>,
    /// Whether to use colors
    pub use_color: bool,
    /// Quiet mode
    pub quiet: bool,
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new(true, false)
    }
}

impl ProgressReporter {
    /// Create a new progress reporter
    #[must_use]
    pub fn new(use_color: bool, quiet: bool) -> Self {
        Self {
            term: Term::stderr(),
            progress_bar: None,
            use_color,
            quiet,
        }
    }

    /// Start a spinner while `total` stories run
    pub fn start_progress(&mut self, total: u64, message: &str) {
        if self.quiet {
            return;
        }

        let pb = ProgressBar::new(total);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        pb.enable_steady_tick(Duration::from_millis(120));
        pb.set_message(message.to_string());
        self.progress_bar = Some(pb);
    }

    /// Increment progress
    pub fn increment(&self, delta: u64) {
        if let Some(ref pb) = self.progress_bar {
            pb.inc(delta);
        }
    }

    /// Finish and clear the progress bar
    pub fn finish(&self) {
        if let Some(ref pb) = self.progress_bar {
            pb.finish_and_clear();
        }
    }

    fn line(&self, prefix: &str, message: &str) {
        let _ = self.term.write_line(&format!("{prefix} {message}"));
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        if self.quiet {
            return;
        }
        let prefix = if self.use_color {
            style("✓").green().bold().to_string()
        } else {
            "PASS".to_string()
        };
        self.line(&prefix, message);
    }

    /// Print a failure message, even in quiet mode
    pub fn failure(&self, message: &str) {
        let prefix = if self.use_color {
            style("✗").red().bold().to_string()
        } else {
            "FAIL".to_string()
        };
        self.line(&prefix, message);
    }

    /// Print a warning message
    pub fn warning(&self, message: &str) {
        if self.quiet {
            return;
        }
        let prefix = if self.use_color {
            style("⚠").yellow().bold().to_string()
        } else {
            "WARN".to_string()
        };
        self.line(&prefix, message);
    }

    /// Print an info message
    pub fn info(&self, message: &str) {
        if self.quiet {
            return;
        }
        let prefix = if self.use_color {
            style("ℹ").blue().bold().to_string()
        } else {
            "INFO".to_string()
        };
        self.line(&prefix, message);
    }

    /// Print a section header
    pub fn header(&self, title: &str) {
        if self.quiet {
            return;
        }
        let styled = if self.use_color {
            style(title).bold().underlined().to_string()
        } else {
            format!("=== {title} ===")
        };
        let _ = self.term.write_line("");
        let _ = self.term.write_line(&styled);
    }

    /// Print one story's outcome
    pub fn story(&self, report: &StoryReport) {
        let name = report.story.display();
        if report.is_success() {
            self.success(&format!("{name} ({} steps passed)", report.passed));
        } else {
            self.failure(&story_failure_line(report));
        }
    }

    /// Print every story and the run summary
    pub fn report(&self, summary: &RunSummary) {
        for report in &summary.reports {
            self.story(report);
        }
        let passed = summary.passed_count();
        let failed = summary.reports.len() - passed;
        self.summary(passed, failed, summary.duration);
    }

    /// Print the run summary
    pub fn summary(&self, passed: usize, failed: usize, duration: Duration) {
        if self.quiet && failed == 0 {
            return;
        }

        let _ = self.term.write_line("");
        let total = passed + failed;
        let duration_secs = duration.as_secs_f64();

        if self.use_color {
            let passed_style = Style::new().green().bold();
            let failed_style = Style::new().red().bold();
            let status = if failed > 0 {
                failed_style.apply_to("FAILED")
            } else {
                passed_style.apply_to("PASSED")
            };
            let _ = self.term.write_line(&format!(
                "{status} {total} stories in {duration_secs:.2}s ({} passed, {} failed)",
                passed_style.apply_to(passed),
                if failed > 0 {
                    failed_style.apply_to(failed).to_string()
                } else {
                    failed.to_string()
                },
            ));
        } else {
            let _ = self.term.write_line(&summary_line(passed, failed, duration));
        }
    }
}

/// Plain summary line for a run
#[must_use]
pub fn summary_line(passed: usize, failed: usize, duration: Duration) -> String {
    let status = if failed > 0 { "FAILED" } else { "PASSED" };
    format!(
        "{status} {} stories in {:.2}s ({passed} passed, {failed} failed)",
        passed + failed,
        duration.as_secs_f64()
    )
}

/// Plain failure line for a story
#[must_use]
pub fn story_failure_line(report: &StoryReport) -> String {
    let name = report.story.display();
    match &report.error {
        Some(error) => format!("{name}: {error}"),
        None => format!(
            "{name}: {} failed, {} skipped, {} parsing errors, {} hook errors",
            report.failed, report.skipped, report.parsing_errors, report.hook_errors
        ),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    mod reporter_tests {
        use super::*;

        #[test]
        fn test_default() {
            let reporter = ProgressReporter::default();
            assert!(reporter.use_color);
            assert!(!reporter.quiet);
        }

        #[test]
        fn test_quiet_reporter_skips_progress() {
            let mut reporter = ProgressReporter::new(false, true);
            reporter.start_progress(3, "running");
            assert!(reporter.progress_bar.is_none());
            reporter.increment(1);
            reporter.finish();
        }

        #[test]
        fn test_progress_lifecycle() {
            let mut reporter = ProgressReporter::new(false, false);
            reporter.start_progress(2, "running");
            reporter.increment(2);
            reporter.finish();
            assert!(reporter.progress_bar.is_some());
        }

        #[test]
        fn test_messages_do_not_panic() {
            let reporter = ProgressReporter::new(false, false);
            reporter.header("Stories");
            reporter.info("info");
            reporter.warning("warning");
            reporter.success("ok");
            reporter.failure("failed");
            reporter.summary(1, 1, Duration::from_millis(10));
        }
    }

    mod line_tests {
        use super::*;

        #[test]
        fn test_summary_line() {
            assert_eq!(
                summary_line(3, 0, Duration::from_millis(1500)),
                "PASSED 3 stories in 1.50s (3 passed, 0 failed)"
            );
            assert!(summary_line(1, 2, Duration::ZERO).starts_with("FAILED 3 stories"));
        }

        #[test]
        fn test_aborted_story_line() {
            let report = StoryReport::aborted("checkout.story", "story timed out");
            assert_eq!(story_failure_line(&report), "checkout.story: story timed out");
        }

        #[test]
        fn test_failed_steps_line() {
            let mut report = StoryReport::aborted("login.story", "x");
            report.error = None;
            report.failed = 2;
            report.skipped = 1;
            assert_eq!(
                story_failure_line(&report),
                "login.story: 2 failed, 1 skipped, 0 parsing errors, 0 hook errors"
            );
        }
    }
}
