//! Located elements that survive re-rendering.
//!
//! A [`LoadingElement`] remembers the locator that found it. When the
//! driver reports a stale reference the element is looked up again with
//! that locator and the operation is retried until the wait times out.

use std::future::Future;
use std::sync::Arc;

use crate::driver::{DriverResult, ElementId, WebDriver};
use crate::locator::Locator;
use crate::result::{PawlError, PawlResult};
use crate::wait::{Attempt, Poll, Waiter};

/// Element handle with stale-reference recovery
#[derive(Debug, Clone)]
pub struct LoadingElement {
    driver: Arc<dyn WebDriver>,
    id: ElementId,
    locator: Locator,
    waiter: Waiter,
}

impl LoadingElement {
    /// Wrap an element found with `locator`
    #[must_use]
    pub fn new(driver: Arc<dyn WebDriver>, id: ElementId, locator: Locator, waiter: Waiter) -> Self {
        Self {
            driver,
            id,
            locator,
            waiter,
        }
    }

    /// Locator the element was found with
    #[must_use]
    pub const fn locator(&self) -> &Locator {
        &self.locator
    }

    /// Current driver-side handle
    #[must_use]
    pub const fn id(&self) -> &ElementId {
        &self.id
    }

    /// Run `op` against the element, re-locating it after stale references.
    ///
    /// A timeout is reported as `Could not <description> element '<locator>'`;
    /// any other driver error ends the operation at once.
    pub async fn perform<T, F, Fut>(&mut self, description: &str, mut op: F) -> PawlResult<T>
    where
        F: FnMut(Arc<dyn WebDriver>, ElementId) -> Fut,
        Fut: Future<Output = DriverResult<T>>,
    {
        let mut poll = self.waiter.start(format!("{description} {}", self.locator));
        loop {
            match op(self.driver.clone(), self.id.clone()).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    self.recover(&mut poll, Attempt::from(err))
                        .await
                        .map_err(|source| self.operation_error(description, source))?;
                }
            }
        }
    }

    async fn recover(&mut self, poll: &mut Poll, attempt: Attempt) -> PawlResult<()> {
        poll.failed(attempt).await?;
        match self.driver.find_elements(&self.locator).await {
            Ok(found) => {
                if let Some(first) = found.into_iter().next() {
                    tracing::debug!(locator = %self.locator, "re-located stale element");
                    self.id = first;
                }
                Ok(())
            }
            // gone for now; the next attempt reports stale again
            Err(err) if err.is_stale() => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn operation_error(&self, description: &str, source: PawlError) -> PawlError {
        match source {
            PawlError::Timeout { .. } => PawlError::ElementOperation {
                action: description.to_string(),
                locator: self.locator.to_string(),
                source: Box::new(source),
            },
            other => other,
        }
    }

    /// Click the element
    pub async fn click(&mut self) -> PawlResult<()> {
        self.perform("click on", |d, id| async move { d.click(&id).await })
            .await
    }

    /// Click at an offset from the element's top-left corner
    pub async fn click_at_offset(&mut self, x: i64, y: i64) -> PawlResult<()> {
        self.perform("click on", |d, id| async move { d.click_at_offset(&id, x, y).await })
            .await
    }

    /// Submit the element's form
    pub async fn submit(&mut self) -> PawlResult<()> {
        self.perform("submit", |d, id| async move { d.submit(&id).await })
            .await
    }

    /// Clear the element
    pub async fn clear(&mut self) -> PawlResult<()> {
        self.perform("clear", |d, id| async move { d.clear(&id).await })
            .await
    }

    /// Type `text` into the element
    pub async fn send_keys(&mut self, text: &str) -> PawlResult<()> {
        let description = format!("fill value = '{text}' into");
        self.perform(&description, |d, id| async move { d.send_keys(&id, text).await })
            .await
    }

    /// Replace the element's content with `text`
    pub async fn fill_with(&mut self, text: &str) -> PawlResult<()> {
        self.clear().await?;
        self.send_keys(text).await
    }

    /// Choose the `<option>` with this visible text
    pub async fn select_by_visible_text(&mut self, text: &str) -> PawlResult<()> {
        let description = format!("select '{text}' in");
        self.perform(&description, |d, id| async move {
            d.select_by_visible_text(&id, text).await
        })
        .await
    }

    /// Visible text; the `value` of `input` and `textarea` elements
    pub async fn text(&mut self) -> PawlResult<String> {
        self.perform("read text of", |d, id| async move { text_of(d.as_ref(), &id).await })
            .await
    }

    /// Wait until the text contains `expected`; `false` on timeout
    pub async fn text_matches(&mut self, expected: &str) -> PawlResult<bool> {
        match self.wait_for_text(expected).await {
            Ok(()) => Ok(true),
            Err(PawlError::Timeout { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Wait until the text contains `expected`, failing the assertion on
    /// timeout
    pub async fn should_have_text(&mut self, expected: &str) -> PawlResult<()> {
        match self.wait_for_text(expected).await {
            Err(PawlError::Timeout { .. }) => Err(PawlError::assertion(format!(
                "Element '{}' should have text: '{expected}'",
                self.locator
            ))),
            other => other,
        }
    }

    async fn wait_for_text(&mut self, expected: &str) -> PawlResult<()> {
        let mut poll = self
            .waiter
            .start(format!("text '{expected}' in {}", self.locator));
        loop {
            let attempt = match text_of(self.driver.as_ref(), &self.id).await {
                Ok(text) if text.contains(expected) => return Ok(()),
                Ok(text) => Attempt::retry(format!("text was '{text}'")),
                Err(err) => Attempt::from(err),
            };
            self.recover(&mut poll, attempt).await?;
        }
    }

    /// Lower-case tag name
    pub async fn tag_name(&mut self) -> PawlResult<String> {
        self.perform("read tag of", |d, id| async move { d.tag_name(&id).await })
            .await
    }

    /// Attribute or live property value
    pub async fn attribute(&mut self, name: &str) -> PawlResult<Option<String>> {
        self.perform("read attribute of", |d, id| async move {
            d.attribute(&id, name).await
        })
        .await
    }

    /// Whether the element is displayed
    pub async fn is_displayed(&mut self) -> PawlResult<bool> {
        self.perform("check visibility of", |d, id| async move {
            d.is_displayed(&id).await
        })
        .await
    }

    /// Whether the element is enabled
    pub async fn is_enabled(&mut self) -> PawlResult<bool> {
        self.perform("check state of", |d, id| async move { d.is_enabled(&id).await })
            .await
    }

    /// Whether the element is selected
    pub async fn is_selected(&mut self) -> PawlResult<bool> {
        self.perform("check state of", |d, id| async move { d.is_selected(&id).await })
            .await
    }

    /// Descendants matching `locator`
    pub async fn find_all(&mut self, locator: &Locator) -> PawlResult<Vec<ElementId>> {
        self.perform("search in", |d, id| async move {
            d.find_elements_in(&id, locator).await
        })
        .await
    }
}

/// Text as a user reads it: form fields report their value
pub async fn text_of(driver: &dyn WebDriver, element: &ElementId) -> DriverResult<String> {
    let tag = driver.tag_name(element).await?;
    if tag == "input" || tag == "textarea" {
        Ok(driver.attribute(element, "value").await?.unwrap_or_default())
    } else {
        driver.text(element).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::driver::mock::{MockDriver, MockElement};
    use crate::driver::DriverError;
    use crate::wait::WaitOptions;
    use std::time::Duration;

    async fn located(driver: &Arc<MockDriver>, locator: Locator, timeout_ms: u64) -> LoadingElement {
        let found = driver.find_elements(&locator).await.unwrap();
        LoadingElement::new(
            driver.clone(),
            found[0].clone(),
            locator,
            Waiter::new(WaitOptions::new(timeout_ms, 10)),
        )
    }

    mod perform_tests {
        use super::*;

        #[tokio::test]
        async fn test_click_recovers_from_stale_budget() {
            let driver = Arc::new(MockDriver::new());
            driver.add_element(MockElement::new("button").with_id("save"));
            let mut save = located(&driver, Locator::Id("save".into()), 1_000).await;
            driver.fail_stale(3);
            save.click().await.unwrap();
            assert!(driver.was_called("click #save"));
        }

        #[tokio::test]
        async fn test_relocates_after_rerender() {
            let driver = Arc::new(MockDriver::new());
            driver.add_element(MockElement::new("input").with_id("q"));
            let mut q = located(&driver, Locator::Id("q".into()), 1_000).await;
            let before = q.id().clone();
            driver.mutate();
            q.fill_with("rust").await.unwrap();
            assert_ne!(q.id(), &before);
            assert_eq!(driver.value_of("q").as_deref(), Some("rust"));
        }

        #[tokio::test]
        async fn test_timeout_names_operation_and_locator() {
            let driver = Arc::new(MockDriver::new());
            driver.add_element(MockElement::new("button").with_id("gone"));
            let mut gone = located(&driver, Locator::Id("gone".into()), 100).await;
            driver.fail_stale(u32::MAX);
            let err = gone.click().await.unwrap_err();
            assert_eq!(err.to_string(), "Could not click on element 'By.id: gone'");
            assert!(matches!(err, PawlError::ElementOperation { .. }));
        }

        #[tokio::test]
        async fn test_non_stale_error_is_immediate() {
            let driver = Arc::new(MockDriver::new());
            driver.add_element(MockElement::new("button").with_id("hidden").hidden());
            let mut hidden = located(&driver, Locator::Id("hidden".into()), 5_000).await;
            let started = std::time::Instant::now();
            let err = hidden.click().await.unwrap_err();
            assert!(started.elapsed() < Duration::from_secs(1));
            assert!(matches!(
                err,
                PawlError::Driver(DriverError::Interaction { .. })
            ));
        }
    }

    mod text_tests {
        use super::*;

        #[tokio::test]
        async fn test_input_text_is_value() {
            let driver = Arc::new(MockDriver::new());
            driver.add_element(MockElement::new("input").with_id("name").with_value("Ann"));
            driver.add_element(MockElement::new("p").with_id("greeting").with_text("Hi Ann"));
            let mut name = located(&driver, Locator::Id("name".into()), 500).await;
            let mut greeting = located(&driver, Locator::Id("greeting".into()), 500).await;
            assert_eq!(name.text().await.unwrap(), "Ann");
            assert_eq!(greeting.text().await.unwrap(), "Hi Ann");
        }

        #[tokio::test]
        async fn test_text_matches_is_contains() {
            let driver = Arc::new(MockDriver::new());
            driver.add_element(MockElement::new("p").with_id("msg").with_text("Order 42 placed"));
            let mut msg = located(&driver, Locator::Id("msg".into()), 100).await;
            assert!(msg.text_matches("42").await.unwrap());
            assert!(!msg.text_matches("43").await.unwrap());
        }

        #[tokio::test]
        async fn test_late_text_after_rerender() {
            let driver = Arc::new(MockDriver::new());
            driver.add_element(MockElement::new("p").with_id("status").with_text("Saving"));
            let mut status = located(&driver, Locator::Id("status".into()), 1_000).await;
            let before = status.id().clone();
            let rerender = {
                let driver = driver.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    driver.rerender_text("status", "Order placed");
                })
            };
            status.should_have_text("placed").await.unwrap();
            rerender.await.unwrap();
            assert_ne!(status.id(), &before);
        }

        #[tokio::test]
        async fn test_text_matches_through_stale_references() {
            let driver = Arc::new(MockDriver::new());
            driver.add_element(MockElement::new("p").with_id("msg").with_text("Order 42 placed"));
            let mut msg = located(&driver, Locator::Id("msg".into()), 1_000).await;
            driver.fail_stale(3);
            assert!(msg.text_matches("42").await.unwrap());
        }

        #[tokio::test]
        async fn test_should_have_text_failure_message() {
            let driver = Arc::new(MockDriver::new());
            driver.add_element(MockElement::new("p").with_id("msg").with_text("draft"));
            let mut msg = located(&driver, Locator::Id("msg".into()), 80).await;
            let err = msg.should_have_text("final").await.unwrap_err();
            assert_eq!(
                err.to_string(),
                "Assertion failed: Element 'By.id: msg' should have text: 'final'"
            );
        }

        #[tokio::test]
        async fn test_accessors() {
            let driver = Arc::new(MockDriver::new());
            driver.add_element(
                MockElement::new("input")
                    .with_id("agree")
                    .with_attribute("checked", "")
                    .disabled(),
            );
            let mut agree = located(&driver, Locator::Id("agree".into()), 100).await;
            assert_eq!(agree.tag_name().await.unwrap(), "input");
            assert!(agree.is_displayed().await.unwrap());
            assert!(!agree.is_enabled().await.unwrap());
            assert!(agree.is_selected().await.unwrap());
            assert_eq!(agree.attribute("id").await.unwrap().as_deref(), Some("agree"));
        }
    }
}
