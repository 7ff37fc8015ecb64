//! Browser automation driver abstraction.
//!
//! Steps talk to the browser through [`WebDriver`]. Implementations:
//!
//! - `ChromiumDriver` - real Chromium over CDP (`browser` feature)
//! - [`mock::MockDriver`] - in-memory page for unit tests
//!
//! A [`DriverProvider`] owns the driver's lifecycle: it creates the browser
//! on first use with the configured locale, hands out shared handles and
//! shuts the browser down at the end of a story.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::locator::Locator;
use crate::resources::{keys, Locale, Resources};
use crate::result::PawlResult;

#[cfg(feature = "browser")]
pub mod chromium;
pub mod mock;

#[cfg(feature = "browser")]
pub use chromium::{ChromiumDriver, LocalizedDriverProvider};

/// Result of a driver call
pub type DriverResult<T> = Result<T, DriverError>;

/// Errors reported by a driver
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DriverError {
    /// Element handle no longer attached to the page
    #[error("stale element reference: {message}")]
    Stale {
        /// Detail
        message: String,
    },

    /// Nothing matched a locator
    #[error("no such element: {locator}")]
    NoSuchElement {
        /// Locator display form
        locator: String,
    },

    /// Locator is not a valid selector
    #[error("invalid selector '{selector}': {message}")]
    InvalidSelector {
        /// Raw selector
        selector: String,
        /// Detail
        message: String,
    },

    /// Unknown window handle
    #[error("no such window: {handle}")]
    NoSuchWindow {
        /// Window handle
        handle: String,
    },

    /// Script threw or returned garbage
    #[error("script error: {message}")]
    Script {
        /// Detail
        message: String,
    },

    /// Element cannot take this interaction
    #[error("{operation} not possible: {message}")]
    Interaction {
        /// Operation attempted
        operation: String,
        /// Detail
        message: String,
    },

    /// Transport/protocol failure
    #[error("driver protocol error: {message}")]
    Protocol {
        /// Detail
        message: String,
    },
}

impl DriverError {
    /// True for stale element references, the one retryable failure
    #[must_use]
    pub const fn is_stale(&self) -> bool {
        matches!(self, Self::Stale { .. })
    }

    pub(crate) fn protocol(err: impl fmt::Display) -> Self {
        Self::Protocol {
            message: err.to_string(),
        }
    }
}

/// Opaque driver-side element handle
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementId(pub String);

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A browser cookie
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    /// Cookie name
    pub name: String,
    /// Cookie value
    pub value: String,
    /// Domain, if scoped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    /// Path, if scoped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl Cookie {
    /// Host-less cookie for the current page
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: None,
            path: None,
        }
    }

    /// Set domain
    #[must_use]
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Set path
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

/// Browser automation operations used by the step library
#[async_trait]
pub trait WebDriver: Send + Sync + fmt::Debug {
    /// Load a URL in the current window
    async fn navigate(&self, url: &str) -> DriverResult<()>;

    /// Reload the current page
    async fn refresh(&self) -> DriverResult<()>;

    /// URL of the current page
    async fn current_url(&self) -> DriverResult<String>;

    /// Title of the current page
    async fn title(&self) -> DriverResult<String>;

    /// Serialized DOM of the current page
    async fn page_source(&self) -> DriverResult<String>;

    /// All elements matching `locator`, in document order
    async fn find_elements(&self, locator: &Locator) -> DriverResult<Vec<ElementId>>;

    /// All descendants of `parent` matching `locator`
    async fn find_elements_in(
        &self,
        parent: &ElementId,
        locator: &Locator,
    ) -> DriverResult<Vec<ElementId>>;

    /// Click the element's centre
    async fn click(&self, element: &ElementId) -> DriverResult<()>;

    /// Click at an offset from the element's top-left corner
    async fn click_at_offset(&self, element: &ElementId, x: i64, y: i64) -> DriverResult<()>;

    /// Clear an editable element
    async fn clear(&self, element: &ElementId) -> DriverResult<()>;

    /// Type text into the element
    async fn send_keys(&self, element: &ElementId, text: &str) -> DriverResult<()>;

    /// Submit the form the element belongs to
    async fn submit(&self, element: &ElementId) -> DriverResult<()>;

    /// Rendered text of the element
    async fn text(&self, element: &ElementId) -> DriverResult<String>;

    /// Lower-case tag name
    async fn tag_name(&self, element: &ElementId) -> DriverResult<String>;

    /// Attribute or property value (`value` reads the live property)
    async fn attribute(&self, element: &ElementId, name: &str) -> DriverResult<Option<String>>;

    /// Whether the element is rendered and visible
    async fn is_displayed(&self, element: &ElementId) -> DriverResult<bool>;

    /// Whether the element is enabled
    async fn is_enabled(&self, element: &ElementId) -> DriverResult<bool>;

    /// Whether a checkbox/radio/option is selected
    async fn is_selected(&self, element: &ElementId) -> DriverResult<bool>;

    /// Select the `<option>` whose visible text equals `text`
    async fn select_by_visible_text(&self, element: &ElementId, text: &str) -> DriverResult<()>;

    /// Put a local file into a file input
    async fn upload_file(&self, element: &ElementId, path: &Path) -> DriverResult<()>;

    /// Run a script body (may `return` a value) in the page
    async fn execute_script(&self, script: &str) -> DriverResult<serde_json::Value>;

    /// Handles of all open windows
    async fn window_handles(&self) -> DriverResult<Vec<String>>;

    /// Handle of the current window
    async fn current_window(&self) -> DriverResult<String>;

    /// Make `handle` the current window
    async fn switch_to_window(&self, handle: &str) -> DriverResult<()>;

    /// Cookies visible to the current page
    async fn cookies(&self) -> DriverResult<Vec<Cookie>>;

    /// Set a cookie for the current page
    async fn add_cookie(&self, cookie: &Cookie) -> DriverResult<()>;

    /// Delete a cookie by name
    async fn delete_cookie(&self, name: &str) -> DriverResult<()>;

    /// PNG screenshot of the current window
    async fn screenshot(&self) -> DriverResult<Vec<u8>>;

    /// Close the browser
    async fn quit(&self) -> DriverResult<()>;
}

/// Browser launch settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserConfig {
    /// Run without a window
    pub headless: bool,
    /// Enable sandbox
    pub sandbox: bool,
    /// Explicit Chromium executable
    pub executable: Option<String>,
    /// Language the browser advertises
    pub locale: Option<Locale>,
    /// Window width
    pub window_width: u32,
    /// Window height
    pub window_height: u32,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            sandbox: true,
            executable: None,
            locale: None,
            window_width: 1280,
            window_height: 1024,
        }
    }
}

impl BrowserConfig {
    /// Settings from `browser.*` and `user.language`/`user.country` keys,
    /// falling back to the resolver's bundle locale
    #[must_use]
    pub fn from_resources(resources: &Resources) -> Self {
        let locale = resources
            .string(keys::USER_LANGUAGE)
            .map(|language| {
                let country = resources.string(keys::USER_COUNTRY);
                Locale::new(language, country.as_deref())
            })
            .or_else(|| resources.locale().cloned());
        Self {
            headless: resources.bool_or(keys::BROWSER_HEADLESS, true),
            executable: resources.string(keys::BROWSER_EXECUTABLE),
            locale,
            ..Self::default()
        }
    }

    /// Set headless mode
    #[must_use]
    pub const fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    /// Disable the sandbox (containers)
    #[must_use]
    pub const fn with_no_sandbox(mut self) -> Self {
        self.sandbox = false;
        self
    }

    /// Set locale
    #[must_use]
    pub fn with_locale(mut self, locale: Locale) -> Self {
        self.locale = Some(locale);
        self
    }
}

/// Creates and owns the browser for a story
#[async_trait]
pub trait DriverProvider: Send + Sync + fmt::Debug {
    /// Start a browser if none is running
    async fn initialize(&self) -> PawlResult<()>;

    /// The running browser, starting one if needed
    async fn get(&self) -> PawlResult<Arc<dyn WebDriver>>;

    /// Quit the running browser, if any
    async fn end(&self) -> PawlResult<()>;

    /// The running browser, without starting one
    async fn running(&self) -> Option<Arc<dyn WebDriver>>;

    /// Quit and start a fresh browser
    async fn restart(&self) -> PawlResult<Arc<dyn WebDriver>> {
        self.end().await?;
        self.initialize().await?;
        self.get().await
    }
}

/// Provider used when built without the `browser` feature
#[cfg(not(feature = "browser"))]
#[derive(Debug, Clone, Default)]
pub struct LocalizedDriverProvider {
    config: BrowserConfig,
}

#[cfg(not(feature = "browser"))]
impl LocalizedDriverProvider {
    /// Create a provider (every call fails with `BrowserUnavailable`)
    #[must_use]
    pub const fn new(config: BrowserConfig) -> Self {
        Self { config }
    }

    /// Launch settings
    #[must_use]
    pub const fn config(&self) -> &BrowserConfig {
        &self.config
    }
}

#[cfg(not(feature = "browser"))]
#[async_trait]
impl DriverProvider for LocalizedDriverProvider {
    async fn initialize(&self) -> PawlResult<()> {
        Err(crate::result::PawlError::BrowserUnavailable)
    }

    async fn get(&self) -> PawlResult<Arc<dyn WebDriver>> {
        Err(crate::result::PawlError::BrowserUnavailable)
    }

    async fn end(&self) -> PawlResult<()> {
        Ok(())
    }

    async fn running(&self) -> Option<Arc<dyn WebDriver>> {
        None
    }
}
