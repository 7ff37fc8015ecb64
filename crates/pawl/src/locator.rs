//! Element locators and the identity resolution policy.
//!
//! Steps refer to elements by a free-form identity (`login`, `#menu .item`,
//! `//button[2]`). [`resolve_visible`] turns it into a concrete [`Locator`]
//! by trying a fixed, ordered list of strategies and picking the first one
//! whose first match is displayed.

use std::fmt;

use crate::driver::WebDriver;

/// A concrete element lookup strategy
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Locator {
    /// `id` attribute
    Id(String),
    /// XPath expression
    XPath(String),
    /// `name` attribute
    Name(String),
    /// One entry of the `class` attribute
    ClassName(String),
    /// CSS selector
    Css(String),
}

impl Locator {
    /// Explicit form: leading `/` is XPath, leading `#` or `.` is CSS,
    /// anything else is an id.
    #[must_use]
    pub fn parse(identity: &str) -> Self {
        if identity.starts_with('/') {
            Self::XPath(identity.to_string())
        } else if identity.starts_with('#') || identity.starts_with('.') {
            Self::Css(identity.to_string())
        } else {
            Self::Id(identity.to_string())
        }
    }

    /// Strategy name as shown in messages
    #[must_use]
    pub const fn strategy(&self) -> &'static str {
        match self {
            Self::Id(_) => "id",
            Self::XPath(_) => "xpath",
            Self::Name(_) => "name",
            Self::ClassName(_) => "className",
            Self::Css(_) => "cssSelector",
        }
    }

    /// The raw selector value
    #[must_use]
    pub fn value(&self) -> &str {
        match self {
            Self::Id(v) | Self::XPath(v) | Self::Name(v) | Self::ClassName(v) | Self::Css(v) => v,
        }
    }

    /// Equivalent CSS selector; `None` for XPath
    #[must_use]
    pub fn to_css(&self) -> Option<String> {
        match self {
            Self::Id(v) => Some(format!("[id=\"{}\"]", css_string(v))),
            Self::Name(v) => Some(format!("[name=\"{}\"]", css_string(v))),
            Self::ClassName(v) => Some(format!("[class~=\"{}\"]", css_string(v))),
            Self::Css(v) => Some(v.clone()),
            Self::XPath(_) => None,
        }
    }

    /// Same strategy, scoped below an XPath-addressable parent. Only XPath
    /// locators can be scoped; other strategies are returned unchanged.
    #[must_use]
    pub fn xpath_child(parent: &Self, relative: &str) -> Self {
        match parent {
            Self::XPath(p) => Self::XPath(format!("{p}{}", relative.trim_start_matches('.'))),
            Self::Id(id) => Self::XPath(format!(
                "//*[@id={}]{}",
                xpath_literal(id),
                relative.trim_start_matches('.')
            )),
            other => other.clone(),
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "By.{}: {}", self.strategy(), self.value())
    }
}

/// Ordered candidate strategies for `identity`.
///
/// The order is id, identity XPath (`template` with `%s` replaced), name,
/// class name, CSS, raw XPath. Identities starting with a digit keep only id
/// and name: class and CSS selectors cannot start with a digit, and the
/// XPath forms are skipped with them.
#[must_use]
pub fn candidates(identity: &str, template: &str) -> Vec<Locator> {
    if identity.starts_with(|c: char| c.is_ascii_digit()) {
        return vec![
            Locator::Id(identity.to_string()),
            Locator::Name(identity.to_string()),
        ];
    }
    vec![
        Locator::Id(identity.to_string()),
        Locator::XPath(template.replacen("%s", identity, 1)),
        Locator::Name(identity.to_string()),
        Locator::ClassName(identity.to_string()),
        Locator::Css(identity.to_string()),
        Locator::XPath(identity.to_string()),
    ]
}

/// First candidate whose first match is displayed, else the id candidate.
///
/// Any driver error for a candidate (invalid selector included) counts as
/// "not displayed".
pub async fn resolve_visible(driver: &dyn WebDriver, identity: &str, template: &str) -> Locator {
    let candidates = candidates(identity, template);
    for candidate in &candidates {
        if first_displayed(driver, candidate).await {
            tracing::trace!(identity, locator = %candidate, "resolved identity");
            return candidate.clone();
        }
    }
    tracing::debug!(identity, "no visible element, falling back to id");
    Locator::Id(identity.to_string())
}

async fn first_displayed(driver: &dyn WebDriver, locator: &Locator) -> bool {
    let Ok(found) = driver.find_elements(locator).await else {
        return false;
    };
    match found.first() {
        Some(element) => driver.is_displayed(element).await.unwrap_or(false),
        None => false,
    }
}

fn css_string(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// XPath string literal for an arbitrary value
#[must_use]
pub fn xpath_literal(value: &str) -> String {
    if !value.contains('\'') {
        format!("'{value}'")
    } else if !value.contains('"') {
        format!("\"{value}\"")
    } else {
        let parts: Vec<String> = value.split('\'').map(|p| format!("'{p}'")).collect();
        format!("concat({})", parts.join(", \"'\", "))
    }
}
