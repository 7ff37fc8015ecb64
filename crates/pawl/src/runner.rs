//! Story execution.
//!
//! [`StoryRunner`] runs one story file with cucumber, or every story matching
//! a glob with bounded concurrency. Each story gets its own browser, shared
//! by its scenarios, which therefore run one at a time. A failed step saves a
//! screenshot of the page before the browser is closed.
//!
//! The test mail server is shared by every story of a runner (and its
//! clones): the first `Given an email test server` starts it, later ones
//! reuse it, and it is stopped when a bulk run ends or on
//! [`StoryRunner::stop_mail`].
//!
//! Generated runners implement [`WebStory`] through [`web_story!`]:
//!
//! ```rust,ignore
//! pawl::web_story!(LongLoadedDemoIT, "checkout/long_loaded_demo.story");
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use cucumber::writer::Stats as _;
use cucumber::World as _;
use futures::{FutureExt as _, StreamExt as _};

use crate::driver::{BrowserConfig, DriverProvider, LocalizedDriverProvider, WebDriver};
use crate::mail::MailSlot;
use crate::pages::Pages;
use crate::resources::{keys, Resources};
use crate::result::{PawlError, PawlResult};
use crate::steps::WebStoryWorld;

/// Stories run when `user.web.stories.to.run` is unset
pub const DEFAULT_STORIES_GLOB: &str = "**/*.user.web.story";

const DEFAULT_TIMEOUT_SECONDS: u64 = 300;

/// Builds the browser provider of one story
pub type ProviderFactory = Arc<dyn Fn(&Resources) -> Arc<dyn DriverProvider> + Send + Sync>;

/// Outcome of one story file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoryReport {
    /// Story file
    pub story: PathBuf,
    /// Passed steps
    pub passed: usize,
    /// Skipped steps
    pub skipped: usize,
    /// Failed steps
    pub failed: usize,
    /// Files that could not be parsed
    pub parsing_errors: usize,
    /// Failed before/after hooks
    pub hook_errors: usize,
    /// Error that stopped the story (timeout, missing file)
    pub error: Option<String>,
}

impl StoryReport {
    /// Report of a story that did not run to completion
    #[must_use]
    pub fn aborted(story: impl Into<PathBuf>, error: impl Into<String>) -> Self {
        Self {
            story: story.into(),
            passed: 0,
            skipped: 0,
            failed: 0,
            parsing_errors: 0,
            hook_errors: 0,
            error: Some(error.into()),
        }
    }

    /// True if every step passed
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.error.is_none()
            && self.failed == 0
            && self.skipped == 0
            && self.parsing_errors == 0
            && self.hook_errors == 0
    }

    /// `Ok(self)` on success, otherwise a `StoryFailed` error
    pub fn into_result(self) -> PawlResult<Self> {
        if self.is_success() {
            return Ok(self);
        }
        let message = match &self.error {
            Some(error) => format!("{}: {error}", self.story.display()),
            None => format!(
                "{}: {} step(s) failed, {} skipped, {} parsing error(s), {} hook error(s)",
                self.story.display(),
                self.failed,
                self.skipped,
                self.parsing_errors,
                self.hook_errors
            ),
        };
        Err(PawlError::StoryFailed { message })
    }
}

/// Reports of a bulk run
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// One report per story, in discovery order
    pub reports: Vec<StoryReport>,
    /// Wall-clock time of the run
    pub duration: Duration,
}

impl RunSummary {
    /// True if every story passed
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.reports.iter().all(StoryReport::is_success)
    }

    /// Number of passed stories
    #[must_use]
    pub fn passed_count(&self) -> usize {
        self.reports.iter().filter(|r| r.is_success()).count()
    }

    /// Failed stories
    #[must_use]
    pub fn failures(&self) -> Vec<&StoryReport> {
        self.reports.iter().filter(|r| !r.is_success()).collect()
    }
}

/// Runs story files against a fresh browser per story
#[derive(Clone)]
pub struct StoryRunner {
    resources: Arc<Resources>,
    stories_dir: PathBuf,
    screenshots_dir: PathBuf,
    threads: usize,
    timeout: Duration,
    providers: ProviderFactory,
    mail: MailSlot,
}

impl fmt::Debug for StoryRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoryRunner")
            .field("stories_dir", &self.stories_dir)
            .field("screenshots_dir", &self.screenshots_dir)
            .field("threads", &self.threads)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl StoryRunner {
    /// Runner configured by `resources`, driving Chromium
    #[must_use]
    pub fn new(resources: Resources) -> Self {
        let stories_dir = PathBuf::from(resources.string_or(keys::STORIES_DIRECTORY, "stories"));
        let screenshots_dir = PathBuf::from(
            resources.string_or(keys::SCREENSHOTS_DIRECTORY, "target/pawl/screenshots"),
        );
        let threads = usize::try_from(resources.u64_or(keys::STORY_THREADS, 1))
            .unwrap_or(1)
            .max(1);
        let timeout = Duration::from_secs(
            resources.u64_or(keys::STORY_TIMEOUT_SECONDS, DEFAULT_TIMEOUT_SECONDS),
        );
        Self {
            resources: Arc::new(resources),
            stories_dir,
            screenshots_dir,
            threads,
            timeout,
            providers: Arc::new(|resources: &Resources| {
                Arc::new(LocalizedDriverProvider::new(BrowserConfig::from_resources(
                    resources,
                ))) as Arc<dyn DriverProvider>
            }),
            mail: MailSlot::new(),
        }
    }

    /// Runner configured from `PAWL_RESOURCES_DIR` and the environment
    pub fn from_env() -> PawlResult<Self> {
        Ok(Self::new(Resources::from_env()?))
    }

    /// Use `factory` to build each story's browser provider
    #[must_use]
    pub fn with_provider(
        mut self,
        factory: impl Fn(&Resources) -> Arc<dyn DriverProvider> + Send + Sync + 'static,
    ) -> Self {
        self.providers = Arc::new(factory);
        self
    }

    /// Resolve relative story paths against `dir`
    #[must_use]
    pub fn with_stories_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.stories_dir = dir.into();
        self
    }

    /// Save failure screenshots into `dir`
    #[must_use]
    pub fn with_screenshots_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.screenshots_dir = dir.into();
        self
    }

    /// Run at most `threads` stories at once (at least one)
    #[must_use]
    pub const fn with_threads(mut self, threads: usize) -> Self {
        self.threads = if threads == 0 { 1 } else { threads };
        self
    }

    /// Abort a story running longer than `timeout`
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Configuration
    #[must_use]
    pub fn resources(&self) -> &Resources {
        &self.resources
    }

    /// Stories root
    #[must_use]
    pub fn stories_dir(&self) -> &Path {
        &self.stories_dir
    }

    /// Story concurrency of bulk runs
    #[must_use]
    pub const fn threads(&self) -> usize {
        self.threads
    }

    /// Per-story timeout
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Mail server shared by the runner's stories
    #[must_use]
    pub const fn mail(&self) -> &MailSlot {
        &self.mail
    }

    /// Stop the shared mail server, if running
    pub async fn stop_mail(&self) {
        self.mail.stop().await;
    }

    /// `story` resolved against the stories root
    #[must_use]
    pub fn story_path(&self, story: &Path) -> PathBuf {
        if story.is_absolute() {
            story.to_path_buf()
        } else {
            self.stories_dir.join(story)
        }
    }

    /// Story files matching `pattern` (default `user.web.stories.to.run`)
    /// under the stories root, sorted
    pub fn discover(&self, pattern: Option<&str>) -> PawlResult<Vec<PathBuf>> {
        let pattern = pattern.map_or_else(
            || {
                self.resources
                    .string_or(keys::USER_WEB_STORIES_TO_RUN, DEFAULT_STORIES_GLOB)
            },
            ToString::to_string,
        );
        let full = self.stories_dir.join(&pattern);
        let entries = glob::glob(&full.to_string_lossy())
            .map_err(|e| PawlError::config(format!("bad story pattern '{pattern}': {e}")))?;
        let mut stories = Vec::new();
        for entry in entries {
            match entry {
                Ok(path) if path.is_file() => stories.push(path),
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "unreadable story path"),
            }
        }
        stories.sort();
        Ok(stories)
    }

    /// Run one story file
    pub async fn run_story(&self, story: impl AsRef<Path>) -> PawlResult<StoryReport> {
        let path = self.story_path(story.as_ref());
        if !path.is_file() {
            return Err(PawlError::StoryFailed {
                message: format!("story file {} does not exist", path.display()),
            });
        }
        tracing::info!(story = %path.display(), "running story");

        let provider = (self.providers)(&self.resources);
        let pages = Pages::new(provider.clone(), self.resources.clone());
        let hook_mail = self.mail.clone();
        let shots = self.screenshots_dir.clone();

        let cucumber = WebStoryWorld::cucumber()
            .with_default_cli()
            .max_concurrent_scenarios(1)
            .fail_on_skipped()
            .before(move |_, _, scenario, world| {
                let pages = pages.clone();
                let mail = hook_mail.clone();
                async move {
                    tracing::info!(scenario = %scenario.name, "scenario started");
                    world.attach(pages, mail);
                }
                .boxed_local()
            })
            .after(move |_, _, scenario, finished, world| {
                let shots = shots.clone();
                async move {
                    let failed = matches!(
                        finished,
                        cucumber::event::ScenarioFinished::StepFailed(..)
                    );
                    if let (true, Some(world)) = (failed, world) {
                        capture_failure(world, &shots, &scenario.name).await;
                    }
                    tracing::info!(scenario = %scenario.name, failed, "scenario finished");
                }
                .boxed_local()
            });

        let outcome = tokio::time::timeout(self.timeout, cucumber.run(path.clone())).await;

        let report = match outcome {
            Ok(writer) => StoryReport {
                story: path.clone(),
                passed: writer.passed_steps(),
                skipped: writer.skipped_steps(),
                failed: writer.failed_steps(),
                parsing_errors: writer.parsing_errors(),
                hook_errors: writer.hook_errors(),
                error: None,
            },
            Err(_) => {
                tracing::error!(story = %path.display(), timeout = ?self.timeout, "story timed out");
                StoryReport::aborted(
                    &path,
                    format!("timed out after {}s", self.timeout.as_secs()),
                )
            }
        };

        finish_story(provider.as_ref(), &path).await;
        Ok(report)
    }

    /// Run every story matching `pattern`, `threads` at a time
    pub async fn run_stories(&self, pattern: Option<&str>) -> PawlResult<RunSummary> {
        self.run_stories_with(pattern, |_| {}).await
    }

    /// Like [`StoryRunner::run_stories`], calling `on_finished` as each
    /// story completes (in completion order)
    pub async fn run_stories_with(
        &self,
        pattern: Option<&str>,
        mut on_finished: impl FnMut(&StoryReport),
    ) -> PawlResult<RunSummary> {
        let started = Instant::now();
        let stories = self.discover(pattern)?;
        tracing::info!(
            count = stories.len(),
            threads = self.threads,
            "running stories"
        );

        let mut reports: Vec<(usize, StoryReport)> = futures::stream::iter(stories.into_iter().enumerate())
            .map(|(index, story)| async move {
                let report = match self.run_story(&story).await {
                    Ok(report) => report,
                    Err(e) => StoryReport::aborted(story, e.to_string()),
                };
                (index, report)
            })
            .buffer_unordered(self.threads)
            .inspect(|(_, report)| on_finished(report))
            .collect()
            .await;
        reports.sort_by_key(|(index, _)| *index);
        self.stop_mail().await;

        Ok(RunSummary {
            reports: reports.into_iter().map(|(_, r)| r).collect(),
            duration: started.elapsed(),
        })
    }
}

async fn finish_story(provider: &dyn DriverProvider, path: &Path) {
    if let Err(e) = provider.end().await {
        tracing::warn!(story = %path.display(), error = %e, "failed to close browser");
    }
}

async fn capture_failure(world: &WebStoryWorld, dir: &Path, scenario: &str) {
    let Some(driver) = world.pages().provider().running().await else {
        tracing::debug!(scenario, "no browser to screenshot");
        return;
    };
    match save_screenshot(driver.as_ref(), dir, scenario).await {
        Ok(path) => tracing::info!(path = %path.display(), "Screenshot of page saved"),
        Err(e) => tracing::warn!(error = %e, "Screenshot of page has failed"),
    }
}

/// Save a PNG of the current page as `<dir>/<scenario>-<timestamp>.png`
pub async fn save_screenshot(
    driver: &dyn WebDriver,
    dir: &Path,
    scenario: &str,
) -> PawlResult<PathBuf> {
    let png = driver
        .screenshot()
        .await
        .map_err(|e| PawlError::ScreenshotError {
            message: e.to_string(),
        })?;
    tokio::fs::create_dir_all(dir).await?;
    let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S%.3f");
    let path = dir.join(format!("{}-{stamp}.png", file_stem(scenario)));
    tokio::fs::write(&path, png).await?;
    Ok(path)
}

fn file_stem(scenario: &str) -> String {
    let stem: String = scenario
        .chars()
        .map(|c| if c.is_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect();
    let stem = stem.trim_matches('-');
    if stem.is_empty() {
        "scenario".to_string()
    } else {
        stem.to_string()
    }
}

/// A story file with its own runner
pub trait WebStory {
    /// Story path, relative to the stories root
    const STORY: &'static str;

    /// Runner for this story
    fn runner() -> PawlResult<StoryRunner> {
        StoryRunner::from_env()
    }

    /// Run the story on a fresh runtime; fails unless every step passed
    fn run() -> PawlResult<StoryReport> {
        crate::logging::init();
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;
        runtime.block_on(async {
            let runner = Self::runner()?;
            let report = runner.run_story(Self::STORY).await;
            runner.stop_mail().await;
            report?.into_result()
        })
    }
}

/// Declare a [`WebStory`] unit type and a `#[test]` running it.
///
/// Use once per module: the generated test is always named `story`.
#[macro_export]
macro_rules! web_story {
    ($name:ident, $story:expr) => {
        /// Runner of a single story file
        #[derive(Debug, Clone, Copy, Default)]
        pub struct $name;

        impl $crate::WebStory for $name {
            const STORY: &'static str = $story;
        }

        #[test]
        fn story() -> $crate::PawlResult<()> {
            <$name as $crate::WebStory>::run().map(|_| ())
        }
    };
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::driver::mock::{MockDriver, MockDriverProvider, MockElement, MockPage};
    use std::fs;
    use tempfile::TempDir;

    const SHOP_STORY: &str = "Feature: Shop\n\
        \n  Scenario: Open the shop\n\
        \x20   Given an 'shop.url' link\n\
        \x20   When I open the link\n\
        \x20   Then I get title 'Shop'\n";

    const BROKEN_STORY: &str = "Feature: Broken shop\n\
        \n  Scenario: Wrong title\n\
        \x20   Given an 'shop.url' link\n\
        \x20   When I open the link\n\
        \x20   Then I get title 'Cart'\n";

    fn shop_driver() -> MockDriver {
        let driver = MockDriver::new();
        driver.add_page(
            "http://shop.test/",
            MockPage::new("Shop").with_element(MockElement::new("h1").with_text("Shop")),
        );
        driver.set_screenshot(vec![0x89, b'P', b'N', b'G']);
        driver
    }

    fn runner(dir: &TempDir) -> StoryRunner {
        let resources = Resources::new()
            .with_override("shop.url", "http://shop.test/")
            .with_override(keys::EXPLICIT_WAIT_SECONDS, "1")
            .with_override(keys::POLLING_INTERVAL_MS, "10");
        StoryRunner::new(resources)
            .with_stories_dir(dir.path().join("stories"))
            .with_screenshots_dir(dir.path().join("shots"))
            .with_provider(|_: &Resources| {
                Arc::new(MockDriverProvider::new(shop_driver)) as Arc<dyn DriverProvider>
            })
    }

    const MAIL_STORY: &str = "Feature: Signup mail\n\
        \n  Scenario: Mail server is up\n\
        \x20   Given an email test server\n\
        \x20   When I wait '0.3' seconds\n";

    fn free_port() -> u16 {
        std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    fn mail_runner(dir: &TempDir, port: &str) -> StoryRunner {
        let resources = runner(dir)
            .resources()
            .clone()
            .with_override(keys::MAIL_SMTP_PORT, port);
        StoryRunner::new(resources)
            .with_stories_dir(dir.path().join("stories"))
            .with_provider(|_: &Resources| {
                Arc::new(MockDriverProvider::new(shop_driver)) as Arc<dyn DriverProvider>
            })
    }

    fn write_story(dir: &TempDir, relative: &str, text: &str) -> PathBuf {
        let path = dir.path().join("stories").join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, text).unwrap();
        path
    }

    mod report_tests {
        use super::*;

        #[test]
        fn test_aborted_report_fails() {
            let report = StoryReport::aborted("a.story", "timed out after 1s");
            assert!(!report.is_success());
            let err = report.into_result().unwrap_err();
            assert!(err.to_string().contains("a.story: timed out after 1s"));
        }

        #[test]
        fn test_summary_counts() {
            let ok = StoryReport {
                story: "ok.story".into(),
                passed: 3,
                skipped: 0,
                failed: 0,
                parsing_errors: 0,
                hook_errors: 0,
                error: None,
            };
            let summary = RunSummary {
                reports: vec![ok, StoryReport::aborted("bad.story", "x")],
                duration: Duration::ZERO,
            };
            assert!(!summary.all_passed());
            assert_eq!(summary.passed_count(), 1);
            assert_eq!(summary.failures()[0].story, PathBuf::from("bad.story"));
        }

        #[test]
        fn test_file_stem() {
            assert_eq!(file_stem("Open the shop!"), "open-the-shop");
            assert_eq!(file_stem("???"), "scenario");
        }
    }

    mod config_tests {
        use super::*;

        #[test]
        fn test_defaults_from_resources() {
            let runner = StoryRunner::new(
                Resources::new()
                    .with_override(keys::STORY_THREADS, "4")
                    .with_override(keys::STORY_TIMEOUT_SECONDS, "30"),
            );
            assert_eq!(runner.threads(), 4);
            assert_eq!(runner.timeout(), Duration::from_secs(30));
            assert_eq!(runner.stories_dir(), Path::new("stories"));
        }

        #[test]
        fn test_zero_threads_means_one() {
            let runner = StoryRunner::new(Resources::new()).with_threads(0);
            assert_eq!(runner.threads(), 1);
        }

        #[test]
        fn test_story_path() {
            let runner = StoryRunner::new(Resources::new()).with_stories_dir("/srv/stories");
            assert_eq!(
                runner.story_path(Path::new("a/b.story")),
                PathBuf::from("/srv/stories/a/b.story")
            );
            assert_eq!(runner.story_path(Path::new("/x.story")), PathBuf::from("/x.story"));
        }

        #[test]
        fn test_discover_default_glob() {
            let dir = TempDir::new().unwrap();
            let _ = write_story(&dir, "b/second.user.web.story", SHOP_STORY);
            let _ = write_story(&dir, "a/first.user.web.story", SHOP_STORY);
            let _ = write_story(&dir, "a/other.story", SHOP_STORY);
            let found = runner(&dir).discover(None).unwrap();
            let names: Vec<_> = found
                .iter()
                .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
                .collect();
            assert_eq!(names, vec!["first.user.web.story", "second.user.web.story"]);
        }

        #[test]
        fn test_discover_bad_pattern() {
            let dir = TempDir::new().unwrap();
            assert!(runner(&dir).discover(Some("[")).is_err());
        }
    }

    mod run_tests {
        use super::*;

        #[tokio::test]
        async fn test_passing_story() {
            let dir = TempDir::new().unwrap();
            let _ = write_story(&dir, "shop.story", SHOP_STORY);
            let report = runner(&dir).run_story("shop.story").await.unwrap();
            assert!(report.is_success(), "{report:?}");
            assert_eq!(report.passed, 3);
            assert!(!dir.path().join("shots").exists());
        }

        #[tokio::test]
        async fn test_failed_step_saves_screenshot() {
            let dir = TempDir::new().unwrap();
            let _ = write_story(&dir, "broken.story", BROKEN_STORY);
            let report = runner(&dir).run_story("broken.story").await.unwrap();
            assert_eq!(report.failed, 1);
            assert!(report.clone().into_result().is_err());
            let shots: Vec<_> = fs::read_dir(dir.path().join("shots"))
                .unwrap()
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect();
            assert_eq!(shots.len(), 1);
            assert!(shots[0].starts_with("wrong-title-"));
            assert!(shots[0].ends_with(".png"));
        }

        #[tokio::test]
        async fn test_missing_story() {
            let dir = TempDir::new().unwrap();
            let err = runner(&dir).run_story("nope.story").await.unwrap_err();
            assert!(matches!(err, PawlError::StoryFailed { .. }));
        }

        #[tokio::test]
        async fn test_bulk_run_keeps_discovery_order() {
            let dir = TempDir::new().unwrap();
            let _ = write_story(&dir, "a.user.web.story", SHOP_STORY);
            let _ = write_story(&dir, "b.user.web.story", BROKEN_STORY);
            let _ = write_story(&dir, "c.user.web.story", SHOP_STORY);
            let summary = runner(&dir).with_threads(2).run_stories(None).await.unwrap();
            assert_eq!(summary.reports.len(), 3);
            assert_eq!(summary.passed_count(), 2);
            assert!(summary.reports[1].story.ends_with("b.user.web.story"));
            assert!(!summary.reports[1].is_success());
        }

        #[tokio::test]
        async fn test_bulk_run_reports_each_finished_story() {
            let dir = TempDir::new().unwrap();
            let _ = write_story(&dir, "a.user.web.story", SHOP_STORY);
            let _ = write_story(&dir, "b.user.web.story", BROKEN_STORY);
            let mut finished = Vec::new();
            let summary = runner(&dir)
                .with_threads(2)
                .run_stories_with(None, |report| finished.push(report.is_success()))
                .await
                .unwrap();
            assert_eq!(finished.len(), 2);
            assert_eq!(finished.iter().filter(|ok| **ok).count(), 1);
            assert_eq!(summary.reports.len(), 2);
        }

        #[tokio::test]
        async fn test_concurrent_stories_share_mail_server() {
            let dir = TempDir::new().unwrap();
            let _ = write_story(&dir, "a.user.web.story", MAIL_STORY);
            let _ = write_story(&dir, "b.user.web.story", MAIL_STORY);
            let runner = mail_runner(&dir, &free_port().to_string()).with_threads(2);

            let summary = runner.run_stories(None).await.unwrap();
            assert!(summary.all_passed(), "{:?}", summary.reports);
            assert!(!runner.mail().is_running().await);
        }

        #[tokio::test]
        async fn test_mail_server_outlives_single_story() {
            let dir = TempDir::new().unwrap();
            let _ = write_story(&dir, "mail.story", MAIL_STORY);
            let runner = mail_runner(&dir, "0");

            let report = runner.run_story("mail.story").await.unwrap();
            assert!(report.is_success(), "{report:?}");
            assert!(runner.mail().is_running().await);
            runner.stop_mail().await;
            assert!(!runner.mail().is_running().await);
        }
    }
}
