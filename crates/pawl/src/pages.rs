//! Page objects.
//!
//! [`Pages`] hands out a [`BasePage`] for every user action. Getting the
//! page applies the `wait.before.step.seconds` slow-down (demo mode), and
//! opening a URL applies `wait.after.page.open`.

use std::sync::Arc;
use std::time::Duration;

use crate::driver::{DriverProvider, ElementId, WebDriver};
use crate::element::LoadingElement;
use crate::locator::{resolve_visible, Locator};
use crate::resources::{keys, Resources};
use crate::result::PawlResult;
use crate::wait::{pause, Attempt, WaitOptions, Waiter};

/// Poll interval of the "counter reaches zero" condition
pub const COUNTER_POLL_INTERVAL_MS: u64 = 100;

/// JS function reporting outstanding AJAX requests
pub const ACTIVE_AJAX_REQUESTS: &str = "activeAjaxRequests()";

/// Default template for the identity XPath candidate
const DEFAULT_IDENTITY_XPATH: &str = "//*[@data-test='%s']";

/// Factory of page objects for the current browser
#[derive(Debug, Clone)]
pub struct Pages {
    provider: Arc<dyn DriverProvider>,
    resources: Arc<Resources>,
}

impl Pages {
    /// Pages backed by `provider`, configured by `resources`
    #[must_use]
    pub fn new(provider: Arc<dyn DriverProvider>, resources: Arc<Resources>) -> Self {
        Self {
            provider,
            resources,
        }
    }

    /// Browser lifecycle owner
    #[must_use]
    pub fn provider(&self) -> &Arc<dyn DriverProvider> {
        &self.provider
    }

    /// Configuration
    #[must_use]
    pub fn resources(&self) -> &Resources {
        &self.resources
    }

    /// Waiter with the configured explicit wait
    #[must_use]
    pub fn waiter(&self) -> Waiter {
        Waiter::new(self.resources.wait_options())
    }

    /// Page handle for the next user action
    pub async fn base(&self) -> PawlResult<BasePage> {
        pause(self.resources.seconds(keys::WAIT_BEFORE_STEP_SECONDS)).await;
        let driver = self.provider.get().await?;
        Ok(BasePage {
            driver,
            waiter: self.waiter(),
            identity_template: self
                .resources
                .string_or(keys::XPATH_IDENTITY, DEFAULT_IDENTITY_XPATH),
            after_open: self.resources.seconds(keys::WAIT_AFTER_PAGE_OPEN),
        })
    }
}

/// Current page with waiting lookups
#[derive(Debug, Clone)]
pub struct BasePage {
    driver: Arc<dyn WebDriver>,
    waiter: Waiter,
    identity_template: String,
    after_open: Duration,
}

impl BasePage {
    /// Page over `driver` without configured pauses
    #[must_use]
    pub fn new(driver: Arc<dyn WebDriver>, options: WaitOptions) -> Self {
        Self {
            driver,
            waiter: Waiter::new(options),
            identity_template: DEFAULT_IDENTITY_XPATH.to_string(),
            after_open: Duration::ZERO,
        }
    }

    /// Underlying driver
    #[must_use]
    pub fn driver(&self) -> &Arc<dyn WebDriver> {
        &self.driver
    }

    /// Waiter used for lookups
    #[must_use]
    pub const fn waiter(&self) -> &Waiter {
        &self.waiter
    }

    /// Open `url`, then pause `wait.after.page.open`
    pub async fn get(&self, url: &str) -> PawlResult<()> {
        tracing::debug!(url, "opening page");
        self.driver.navigate(url).await?;
        pause(self.after_open).await;
        Ok(())
    }

    /// Wait for the element named by an explicit identity (`/xpath`,
    /// `#css`, `.css` or an id) to be visible
    pub async fn find(&self, identity: &str) -> PawlResult<LoadingElement> {
        self.find_by(Locator::parse(identity)).await
    }

    /// Wait for the first element matching `locator` to be visible
    pub async fn find_by(&self, locator: Locator) -> PawlResult<LoadingElement> {
        let driver = self.driver.clone();
        let id = self
            .waiter
            .until(&format!("visibility of {locator}"), || {
                let driver = driver.clone();
                let locator = &locator;
                async move {
                    let found = driver.find_elements(locator).await?;
                    let Some(first) = found.into_iter().next() else {
                        return Err(Attempt::retry(format!("no element {locator}")));
                    };
                    if driver.is_displayed(&first).await? {
                        Ok(first)
                    } else {
                        Err(Attempt::retry(format!("{locator} is not displayed")))
                    }
                }
            })
            .await?;
        Ok(LoadingElement::new(self.driver.clone(), id, locator, self.waiter))
    }

    /// Locator of a free-form identity, preferring a visible match
    pub async fn locate(&self, identity: &str) -> Locator {
        resolve_visible(self.driver.as_ref(), identity, &self.identity_template).await
    }

    /// Visible element for a free-form identity
    pub async fn visible_element(&self, identity: &str) -> PawlResult<LoadingElement> {
        let locator = self.locate(identity).await;
        self.find_by(locator).await
    }

    /// Every element matching the resolved locator, without waiting
    pub async fn visible_elements(&self, identity: &str) -> PawlResult<Vec<ElementId>> {
        let locator = self.locate(identity).await;
        Ok(self.driver.find_elements(&locator).await?)
    }

    /// Wait for a window whose handle is not in `known`
    pub async fn any_window_other_than(&self, known: &[String]) -> PawlResult<String> {
        let driver = self.driver.clone();
        self.waiter
            .until("a new window", || {
                let driver = driver.clone();
                async move {
                    driver
                        .window_handles()
                        .await?
                        .into_iter()
                        .find(|h| !known.contains(h))
                        .ok_or_else(|| Attempt::retry("no new window yet"))
                }
            })
            .await
    }

    /// Poll `function` every 100ms until it reports zero.
    ///
    /// A page that does not define the function counts as complete.
    pub async fn wait_for_counter(&self, function: &str) -> PawlResult<()> {
        let waiter = Waiter::new(
            self.waiter
                .options()
                .with_poll_interval(COUNTER_POLL_INTERVAL_MS),
        );
        let driver = self.driver.clone();
        waiter
            .until_true(&format!("{function} to reach 0"), || {
                let driver = driver.clone();
                async move { counter_complete(driver.as_ref(), function).await }
            })
            .await
    }
}

/// True once the JS counter `function` returns zero. Script errors, `null`
/// and non-numeric results count as complete.
pub async fn counter_complete(driver: &dyn WebDriver, function: &str) -> bool {
    match driver.execute_script(&format!("return {function};")).await {
        Ok(value) => counter_value(&value) <= 0,
        Err(err) => {
            tracing::debug!(function, error = %err, "counter unavailable");
            true
        }
    }
}

fn counter_value(value: &serde_json::Value) -> i64 {
    match value {
        serde_json::Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        serde_json::Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::driver::mock::{MockDriver, MockDriverProvider, MockElement, MockPage};
    use crate::result::PawlError;
    use serde_json::json;

    fn page(driver: &Arc<MockDriver>, timeout_ms: u64) -> BasePage {
        BasePage::new(driver.clone(), WaitOptions::new(timeout_ms, 10))
    }

    mod pages_tests {
        use super::*;

        #[tokio::test]
        async fn test_base_launches_browser_once() {
            let provider = Arc::new(MockDriverProvider::new(MockDriver::new));
            let pages = Pages::new(provider.clone(), Arc::new(Resources::new()));
            let _ = pages.base().await.unwrap();
            let _ = pages.base().await.unwrap();
            assert_eq!(provider.launches(), 1);
        }

        #[tokio::test]
        async fn test_before_step_pause() {
            let provider = Arc::new(MockDriverProvider::new(MockDriver::new));
            let resources = Resources::new().with_override(keys::WAIT_BEFORE_STEP_SECONDS, "0.05");
            let pages = Pages::new(provider, Arc::new(resources));
            let started = std::time::Instant::now();
            let _ = pages.base().await.unwrap();
            assert!(started.elapsed() >= Duration::from_millis(50));
        }

        #[tokio::test]
        async fn test_get_pauses_after_open() {
            let driver = Arc::new(MockDriver::new());
            driver.add_page("http://app.test", MockPage::new("App"));
            let provider = Arc::new(MockDriverProvider::with_driver(driver.clone()));
            let resources = Resources::new().with_override(keys::WAIT_AFTER_PAGE_OPEN, "0.05");
            let pages = Pages::new(provider, Arc::new(resources));
            let base = pages.base().await.unwrap();
            let started = std::time::Instant::now();
            base.get("http://app.test").await.unwrap();
            assert!(started.elapsed() >= Duration::from_millis(50));
            assert_eq!(driver.title().await.unwrap(), "App");
        }
    }

    mod find_tests {
        use super::*;

        #[tokio::test]
        async fn test_find_waits_for_appearance() {
            let driver = Arc::new(MockDriver::new());
            driver.add_element(
                MockElement::new("div")
                    .with_id("toast")
                    .appearing_after(Duration::from_millis(60)),
            );
            let element = page(&driver, 1_000).find("toast").await.unwrap();
            assert_eq!(element.locator(), &Locator::Id("toast".into()));
        }

        #[tokio::test]
        async fn test_find_hidden_times_out() {
            let driver = Arc::new(MockDriver::new());
            driver.add_element(MockElement::new("div").with_id("secret").hidden());
            let err = page(&driver, 60).find("#secret").await.unwrap_err();
            assert!(matches!(err, PawlError::Timeout { .. }));
        }

        #[tokio::test]
        async fn test_find_invalid_selector_is_fatal() {
            let driver = Arc::new(MockDriver::new());
            let started = std::time::Instant::now();
            let err = page(&driver, 5_000).find("//[").await.unwrap_err();
            assert!(started.elapsed() < Duration::from_secs(1));
            assert!(matches!(err, PawlError::Driver(_)));
        }

        #[tokio::test]
        async fn test_visible_element_uses_identity_policy() {
            let driver = Arc::new(MockDriver::new());
            driver.add_element(MockElement::new("button").with_attribute("data-test", "buy"));
            let element = page(&driver, 200).visible_element("buy").await.unwrap();
            assert_eq!(element.locator(), &Locator::XPath("//*[@data-test='buy']".into()));
        }

        #[tokio::test]
        async fn test_visible_elements_empty() {
            let driver = Arc::new(MockDriver::new());
            assert!(page(&driver, 100).visible_elements("nothing").await.unwrap().is_empty());
        }
    }

    mod condition_tests {
        use super::*;

        #[tokio::test]
        async fn test_any_window_other_than() {
            let driver = Arc::new(MockDriver::new());
            let known = driver.window_handles().await.unwrap();
            let popup = driver.open_window_after("http://popup.test", Duration::from_millis(40));
            let found = page(&driver, 1_000).any_window_other_than(&known).await.unwrap();
            assert_eq!(found, popup);
        }

        #[tokio::test]
        async fn test_counter_reaches_zero() {
            let driver = Arc::new(MockDriver::new());
            driver.set_script_results("activeAjaxRequests", vec![json!(2), json!(1), json!(0)]);
            page(&driver, 2_000)
                .wait_for_counter(ACTIVE_AJAX_REQUESTS)
                .await
                .unwrap();
            let calls = driver
                .history()
                .iter()
                .filter(|c| c.contains("activeAjaxRequests"))
                .count();
            assert_eq!(calls, 3);
        }

        #[tokio::test]
        async fn test_counter_missing_is_complete() {
            let driver = MockDriver::new();
            assert!(counter_complete(&driver, ACTIVE_AJAX_REQUESTS).await);
        }

        #[test]
        fn test_counter_values() {
            assert_eq!(counter_value(&json!(3)), 3);
            assert_eq!(counter_value(&json!("2")), 2);
            assert_eq!(counter_value(&json!(null)), 0);
            assert_eq!(counter_value(&json!({"a": 1})), 0);
        }
    }
}
