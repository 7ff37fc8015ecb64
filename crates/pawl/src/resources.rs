//! Layered key/value configuration.
//!
//! A key is resolved through three tiers, first hit wins:
//!
//! 1. process overrides: the explicit override map, then an environment
//!    variable named `PAWL_` + the key upper-cased with every
//!    non-alphanumeric character mapped to `_`
//!    (`explicit.wait.seconds` -> `PAWL_EXPLICIT_WAIT_SECONDS`);
//! 2. the locale bundle chain in the resources directory:
//!    `base_<lang>_<COUNTRY>.yaml`, `base_<lang>.yaml`, `base.yaml`;
//! 3. the built-in default bundle.
//!
//! Keys containing spaces are looked up with the spaces replaced by
//! underscores. Lookups are never cached, so environment changes are seen
//! on the next access.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_yaml_ng::Value;

use crate::result::{PawlError, PawlResult};
use crate::wait::{seconds_to_duration, WaitOptions};

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "PAWL_";

/// Environment variable naming the resources directory
pub const RESOURCES_DIR_ENV: &str = "PAWL_RESOURCES_DIR";

/// Default bundle base name
pub const DEFAULT_BASE_NAME: &str = "base";

const DEFAULT_BUNDLE: &str = include_str!("../resources/base-default.yaml");

/// Well-known configuration keys
pub mod keys {
    /// Overall timeout of polling waits, in seconds
    pub const EXPLICIT_WAIT_SECONDS: &str = "explicit.wait.seconds";
    /// Delay between polling attempts, in milliseconds
    pub const POLLING_INTERVAL_MS: &str = "polling.interval.milliseconds";
    /// Pause before every page step, in (fractional) seconds
    pub const WAIT_BEFORE_STEP_SECONDS: &str = "wait.before.step.seconds";
    /// Pause after opening a page, in (fractional) seconds
    pub const WAIT_AFTER_PAGE_OPEN: &str = "wait.after.page.open";
    /// XPath template with a single `%s` placeholder for the identity
    pub const XPATH_IDENTITY: &str = "xpath.identity";
    /// Name of the cookie holding the user session
    pub const USER_SESSION_COOKIE_NAME: &str = "user.session.cookie.name";
    /// Glob of stories run by the bulk runner
    pub const USER_WEB_STORIES_TO_RUN: &str = "user.web.stories.to.run";
    /// Root directory of story files
    pub const STORIES_DIRECTORY: &str = "stories.directory";
    /// Story files executed concurrently by the bulk runner
    pub const STORY_THREADS: &str = "story.threads";
    /// Upper bound of a single story run, in seconds
    pub const STORY_TIMEOUT_SECONDS: &str = "story.timeout.seconds";
    /// Where failure screenshots go
    pub const SCREENSHOTS_DIRECTORY: &str = "screenshots.directory";
    /// Mail server bind host
    pub const MAIL_SMTP_HOST: &str = "mail.smtp.host";
    /// Mail server bind port
    pub const MAIL_SMTP_PORT: &str = "mail.smtp.port";
    /// Run Chromium without a window
    pub const BROWSER_HEADLESS: &str = "browser.headless";
    /// Explicit Chromium executable
    pub const BROWSER_EXECUTABLE: &str = "browser.executable";
    /// Browser language
    pub const USER_LANGUAGE: &str = "user.language";
    /// Browser country
    pub const USER_COUNTRY: &str = "user.country";
}

/// Language and optional country used to pick bundles and the browser's
/// accepted languages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locale {
    /// ISO 639 language code, lower case
    pub language: String,
    /// ISO 3166 country code, upper case
    pub country: Option<String>,
}

impl Locale {
    /// Create a locale
    pub fn new(language: impl Into<String>, country: Option<&str>) -> Self {
        Self {
            language: language.into().to_lowercase(),
            country: country.map(str::to_uppercase),
        }
    }

    /// Parse `en`, `en_US`, `en-US` or a POSIX `LANG` value like `en_US.UTF-8`
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.split(['.', '@']).next().unwrap_or_default();
        let mut parts = value.split(['_', '-']);
        let language = parts.next().filter(|l| {
            !l.is_empty() && l.chars().all(|c| c.is_ascii_alphabetic())
        })?;
        if language.eq_ignore_ascii_case("c") || language.eq_ignore_ascii_case("posix") {
            return None;
        }
        let country = parts.next().filter(|c| !c.is_empty());
        Some(Self::new(language, country))
    }

    /// Locale from `PAWL_USER_LANGUAGE`/`PAWL_USER_COUNTRY`, then `LANG`
    #[must_use]
    pub fn from_env() -> Option<Self> {
        if let Some(language) = env_override(keys::USER_LANGUAGE) {
            let country = env_override(keys::USER_COUNTRY);
            return Some(Self::new(language, country.as_deref()));
        }
        std::env::var("LANG").ok().as_deref().and_then(Self::parse)
    }

    /// BCP 47 tag, e.g. `en-US`
    #[must_use]
    pub fn tag(&self) -> String {
        match &self.country {
            Some(country) => format!("{}-{country}", self.language),
            None => self.language.clone(),
        }
    }

    /// `Accept-Language` header value, e.g. `en-US,en`
    #[must_use]
    pub fn accept_language(&self) -> String {
        match &self.country {
            Some(_) => format!("{},{}", self.tag(), self.language),
            None => self.language.clone(),
        }
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tag())
    }
}

/// Tier a value was resolved from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// Explicit override map
    Override,
    /// Environment variable (name)
    Environment(String),
    /// Bundle file
    Bundle(PathBuf),
    /// Built-in defaults
    Default,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Override => f.write_str("override"),
            Self::Environment(name) => write!(f, "env {name}"),
            Self::Bundle(path) => write!(f, "{}", path.display()),
            Self::Default => f.write_str("default"),
        }
    }
}

/// A resolved configuration entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    /// Value
    pub value: String,
    /// Where it came from
    pub source: Source,
}

#[derive(Debug, Clone)]
struct Bundle {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

/// Layered resource resolver
#[derive(Debug, Clone)]
pub struct Resources {
    overrides: BTreeMap<String, String>,
    bundles: Vec<Bundle>,
    defaults: BTreeMap<String, String>,
    locale: Option<Locale>,
}

impl Default for Resources {
    fn default() -> Self {
        Self {
            overrides: BTreeMap::new(),
            bundles: Vec::new(),
            defaults: parse_bundle(DEFAULT_BUNDLE).unwrap_or_default(),
            locale: None,
        }
    }
}

impl Resources {
    /// Resolver with only the built-in defaults (plus environment overrides)
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the `base` bundle chain for `locale` from `dir`.
    ///
    /// Missing bundle files are skipped; a malformed one is an error.
    pub fn load(dir: impl AsRef<Path>, locale: Option<Locale>) -> PawlResult<Self> {
        Self::load_named(dir, DEFAULT_BASE_NAME, locale)
    }

    /// Load a bundle chain with a custom base name
    pub fn load_named(
        dir: impl AsRef<Path>,
        base: &str,
        locale: Option<Locale>,
    ) -> PawlResult<Self> {
        let dir = dir.as_ref();
        let mut bundles = Vec::new();
        for path in bundle_chain(dir, base, locale.as_ref()) {
            if !path.is_file() {
                tracing::trace!(path = %path.display(), "bundle not present");
                continue;
            }
            let text = std::fs::read_to_string(&path)?;
            let entries = parse_bundle(&text).map_err(|e| {
                PawlError::config(format!("{}: {e}", path.display()))
            })?;
            tracing::debug!(path = %path.display(), entries = entries.len(), "loaded bundle");
            bundles.push(Bundle { path, entries });
        }
        Ok(Self {
            bundles,
            locale,
            ..Self::default()
        })
    }

    /// Load from `$PAWL_RESOURCES_DIR` (default `resources`) with the
    /// environment's locale
    pub fn from_env() -> PawlResult<Self> {
        let dir = std::env::var(RESOURCES_DIR_ENV).unwrap_or_else(|_| "resources".to_string());
        Self::load(dir, Locale::from_env())
    }

    /// Add an explicit override (highest precedence)
    #[must_use]
    pub fn with_override(mut self, key: &str, value: impl Into<String>) -> Self {
        let _ = self.overrides.insert(normalize_key(key), value.into());
        self
    }

    /// Set an override in place
    pub fn set_override(&mut self, key: &str, value: impl Into<String>) {
        let _ = self.overrides.insert(normalize_key(key), value.into());
    }

    /// Locale the bundle chain was loaded for
    #[must_use]
    pub fn locale(&self) -> Option<&Locale> {
        self.locale.as_ref()
    }

    /// Resolve a key, reporting the tier it came from
    #[must_use]
    pub fn resolve(&self, key: &str) -> Option<Resolved> {
        let key = normalize_key(key);
        if let Some(value) = self.overrides.get(&key) {
            return Some(Resolved {
                value: value.clone(),
                source: Source::Override,
            });
        }
        if let Some(value) = env_override(&key) {
            return Some(Resolved {
                value,
                source: Source::Environment(env_name(&key)),
            });
        }
        for bundle in &self.bundles {
            if let Some(value) = bundle.entries.get(&key) {
                return Some(Resolved {
                    value: value.clone(),
                    source: Source::Bundle(bundle.path.clone()),
                });
            }
        }
        if let Some(value) = self.defaults.get(&key) {
            return Some(Resolved {
                value: value.clone(),
                source: Source::Default,
            });
        }
        tracing::debug!(key = %key, "resource not found");
        None
    }

    /// String value of a key
    #[must_use]
    pub fn string(&self, key: &str) -> Option<String> {
        self.resolve(key).map(|r| r.value)
    }

    /// String value of a key, or `default`
    #[must_use]
    pub fn string_or(&self, key: &str, default: &str) -> String {
        self.string(key).unwrap_or_else(|| default.to_string())
    }

    /// Parsed value of a key; unparsable values are logged and ignored
    #[must_use]
    pub fn parsed<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        let raw = self.string(key)?;
        match raw.trim().parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(key = %key, value = %raw, "ignoring unparsable resource value");
                None
            }
        }
    }

    /// Unsigned value of a key, or `default`
    #[must_use]
    pub fn u64_or(&self, key: &str, default: u64) -> u64 {
        self.parsed(key).unwrap_or(default)
    }

    /// Boolean value of a key, or `default`
    #[must_use]
    pub fn bool_or(&self, key: &str, default: bool) -> bool {
        self.parsed(key).unwrap_or(default)
    }

    /// Fractional-seconds value of a key as a duration (zero when missing
    /// or not positive)
    #[must_use]
    pub fn seconds(&self, key: &str) -> Duration {
        self.parsed::<f64>(key)
            .map(seconds_to_duration)
            .unwrap_or(Duration::ZERO)
    }

    /// Polling timeout and interval from `explicit.wait.seconds` and
    /// `polling.interval.milliseconds`
    #[must_use]
    pub fn wait_options(&self) -> WaitOptions {
        let defaults = WaitOptions::default();
        WaitOptions::new(
            self.u64_or(keys::EXPLICIT_WAIT_SECONDS, defaults.timeout_ms / 1000)
                .saturating_mul(1000),
            self.u64_or(keys::POLLING_INTERVAL_MS, defaults.poll_interval_ms),
        )
    }

    /// Every key known to the bundles and defaults, resolved
    #[must_use]
    pub fn entries(&self) -> Vec<(String, Resolved)> {
        let mut names: Vec<&String> = self
            .defaults
            .keys()
            .chain(self.bundles.iter().flat_map(|b| b.entries.keys()))
            .chain(self.overrides.keys())
            .collect();
        names.sort();
        names.dedup();
        names
            .into_iter()
            .filter_map(|k| self.resolve(k).map(|r| (k.clone(), r)))
            .collect()
    }
}

/// Keys containing spaces are looked up with underscores instead
#[must_use]
pub fn normalize_key(key: &str) -> String {
    key.trim().replace(' ', "_")
}

/// Environment variable name for a key
#[must_use]
pub fn env_name(key: &str) -> String {
    let mapped: String = normalize_key(key)
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("{ENV_PREFIX}{mapped}")
}

fn env_override(key: &str) -> Option<String> {
    std::env::var(env_name(key)).ok()
}

fn bundle_chain(dir: &Path, base: &str, locale: Option<&Locale>) -> Vec<PathBuf> {
    let mut chain = Vec::with_capacity(3);
    if let Some(locale) = locale {
        if let Some(country) = &locale.country {
            chain.push(dir.join(format!("{base}_{}_{country}.yaml", locale.language)));
        }
        chain.push(dir.join(format!("{base}_{}.yaml", locale.language)));
    }
    chain.push(dir.join(format!("{base}.yaml")));
    chain
}

fn parse_bundle(text: &str) -> Result<BTreeMap<String, String>, serde_yaml_ng::Error> {
    let raw: Option<BTreeMap<String, Value>> = serde_yaml_ng::from_str(text)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(key, value)| {
            let value = match value {
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                Value::Null => String::new(),
                other => {
                    tracing::warn!(key = %key, ?other, "ignoring non-scalar resource value");
                    return None;
                }
            };
            Some((normalize_key(&key), value))
        })
        .collect())
}
