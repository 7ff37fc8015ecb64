//! Pawl: behaviour-driven web acceptance testing.
//!
//! Stories are cucumber feature files. Their steps drive a browser through
//! the [`WebDriver`] trait (Chromium over CDP by default) and check mail
//! delivered to an in-process SMTP server.
//!
//! # Architecture
//!
//! ```text
//! story file ──► StoryRunner ──► cucumber ──► WebStoryWorld steps
//!                    │                           │        │
//!                    │                           ▼        ▼
//!                    │                        Pages    MailSlot
//!                    │                           │
//!                    ▼                           ▼
//!             DriverProvider ──────────────► WebDriver
//! ```
//!
//! Every lookup and interaction polls through [`Waiter`], retrying stale
//! element references until `explicit.wait.seconds` elapse. Timing,
//! locators and test data come from layered [`Resources`].

#![warn(missing_docs)]

pub mod context;
pub mod driver;
pub mod element;
pub mod locator;
pub mod logging;
pub mod mail;
pub mod pages;
pub mod resources;
pub mod result;
pub mod runner;
pub mod steps;
pub mod wait;

pub use context::{ScenarioContext, FOUND_EMAIL_BODY};
pub use driver::{
    BrowserConfig, Cookie, DriverError, DriverProvider, DriverResult, ElementId,
    LocalizedDriverProvider, WebDriver,
};
pub use element::LoadingElement;
pub use locator::Locator;
pub use mail::{MailServer, MailServerConfig, MailSlot, ReceivedMessage};
pub use pages::{BasePage, Pages};
pub use resources::{Locale, Resources};
pub use result::{PawlError, PawlResult};
pub use runner::{RunSummary, StoryReport, StoryRunner, WebStory};
pub use steps::WebStoryWorld;
pub use wait::{Attempt, WaitOptions, Waiter};
