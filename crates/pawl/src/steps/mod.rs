//! Step definitions.
//!
//! Every scenario gets a fresh [`WebStoryWorld`]: its own
//! [`ScenarioContext`], plus handles to the story's browser and the run's
//! mail server, which the story runner attaches before the first step.
//!
//! Steps return [`PawlResult`]; an error fails the step with its message.
//! Arguments that name configuration keys (links, recipients, titles) are
//! looked up in [`Resources`] and used literally when no such key exists.

use std::fmt;
use std::sync::Arc;

use crate::context::ScenarioContext;
use crate::driver::{BrowserConfig, DriverProvider, LocalizedDriverProvider};
use crate::mail::MailSlot;
use crate::pages::Pages;
use crate::resources::Resources;
use crate::result::PawlResult;

pub mod browser;
pub mod mail;

/// Per-scenario state shared by all steps
#[derive(cucumber::World)]
#[world(init = Self::new)]
pub struct WebStoryWorld {
    pages: Pages,
    context: ScenarioContext,
    link: Option<String>,
    mail: MailSlot,
}

impl fmt::Debug for WebStoryWorld {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebStoryWorld")
            .field("provider", self.pages.provider())
            .field("context", &self.context)
            .field("link", &self.link)
            .field("mail", &"<mail slot>")
            .finish()
    }
}

impl Default for WebStoryWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl WebStoryWorld {
    /// World configured from the environment, with its own browser provider
    /// and mail slot
    #[must_use]
    pub fn new() -> Self {
        let resources = Resources::from_env().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "falling back to built-in resources");
            Resources::new()
        });
        let config = BrowserConfig::from_resources(&resources);
        let provider: Arc<dyn DriverProvider> = Arc::new(LocalizedDriverProvider::new(config));
        Self::with(Pages::new(provider, Arc::new(resources)), MailSlot::new())
    }

    /// World over existing pages and mail slot
    #[must_use]
    pub fn with(pages: Pages, mail: MailSlot) -> Self {
        Self {
            pages,
            context: ScenarioContext::new(),
            link: None,
            mail,
        }
    }

    /// Replace the browser and mail handles (story runner hook)
    pub fn attach(&mut self, pages: Pages, mail: MailSlot) {
        self.pages = pages;
        self.mail = mail;
    }

    /// Page factory
    #[must_use]
    pub const fn pages(&self) -> &Pages {
        &self.pages
    }

    /// Configuration
    #[must_use]
    pub fn resources(&self) -> &Resources {
        self.pages.resources()
    }

    /// Values remembered by earlier steps
    #[must_use]
    pub const fn context(&self) -> &ScenarioContext {
        &self.context
    }

    /// Mutable scenario context
    pub fn context_mut(&mut self) -> &mut ScenarioContext {
        &mut self.context
    }

    /// Mail server slot
    #[must_use]
    pub const fn mail(&self) -> &MailSlot {
        &self.mail
    }

    /// URL set by `Given an '<key>' link`
    #[must_use]
    pub fn link(&self) -> Option<&str> {
        self.link.as_deref()
    }

    pub(crate) fn set_link(&mut self, url: String) {
        self.link = Some(url);
    }

    /// Resource value for `key`, or `key` itself
    #[must_use]
    pub fn resource_or_literal(&self, key: &str) -> String {
        self.resources().string_or(key, key)
    }

    /// Remembered value for `literal`, or `literal` itself
    #[must_use]
    pub fn remembered_or_literal(&self, literal: &str) -> String {
        self.context.resolve(literal)
    }

    /// Close the browser
    pub async fn close_browser(&self) -> PawlResult<()> {
        self.pages.provider().end().await
    }
}


#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::driver::mock::MockDriver;

    mod world_tests {
        use super::*;

        #[test]
        fn test_literal_fallbacks() {
            let driver = Arc::new(MockDriver::new());
            let (mut world, _) = test_support::world_with(
                &driver,
                Resources::new().with_override("shop.url", "http://shop.test"),
            );
            assert_eq!(world.resource_or_literal("shop.url"), "http://shop.test");
            assert_eq!(world.resource_or_literal("plain text"), "plain text");
            world.context_mut().remember("code", "X1");
            assert_eq!(world.remembered_or_literal("code"), "X1");
            assert_eq!(world.remembered_or_literal("other"), "other");
        }

        #[test]
        fn test_fresh_world_has_empty_context() {
            let world = WebStoryWorld::new();
            assert!(world.context().is_empty());
            assert_eq!(world.link(), None);
        }

        #[test]
        fn test_debug_names_provider() {
            let driver = Arc::new(MockDriver::new());
            let (world, _) = test_support::world(&driver);
            assert!(format!("{world:?}").contains("MockDriverProvider"));
        }
    }
}
