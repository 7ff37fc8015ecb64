//! In-memory [`WebDriver`] for tests.
//!
//! Pages are trees of [`MockElement`]s. Element handles carry the page
//! generation they were issued in; `refresh`, `navigate` and
//! [`MockDriver::mutate`] bump the generation, so old handles report stale
//! references exactly like a re-rendered page would.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::iter::Peekable;
use std::path::Path;
use std::str::Chars;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;

use super::{Cookie, DriverError, DriverProvider, DriverResult, ElementId, WebDriver};
use crate::locator::Locator;
use crate::result::PawlResult;

/// Fake PNG returned by [`MockDriver::screenshot`] unless overridden
pub const MOCK_PNG: &[u8] = b"\x89PNG\r\n\x1a\nmock";

/// Element blueprint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockElement {
    tag: String,
    id: Option<String>,
    name: Option<String>,
    classes: Vec<String>,
    text: String,
    value: Option<String>,
    visible: bool,
    enabled: bool,
    attributes: BTreeMap<String, String>,
    options: Vec<String>,
    children: Vec<MockElement>,
    appear_after: Option<Duration>,
}

impl MockElement {
    /// Visible element with a tag name
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into().to_lowercase(),
            id: None,
            name: None,
            classes: Vec::new(),
            text: String::new(),
            value: None,
            visible: true,
            enabled: true,
            attributes: BTreeMap::new(),
            options: Vec::new(),
            children: Vec::new(),
            appear_after: None,
        }
    }

    /// Set `id`
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set `name`
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Add a class
    #[must_use]
    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.classes.push(class.into());
        self
    }

    /// Set rendered text
    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    /// Set the `value` property
    #[must_use]
    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    /// Set any other attribute
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let _ = self.attributes.insert(name.into(), value.into());
        self
    }

    /// `<option>` texts of a select
    #[must_use]
    pub fn with_options(mut self, options: &[&str]) -> Self {
        self.options = options.iter().map(|o| (*o).to_string()).collect();
        self
    }

    /// Nest a child element
    #[must_use]
    pub fn with_child(mut self, child: Self) -> Self {
        self.children.push(child);
        self
    }

    /// Not displayed
    #[must_use]
    pub const fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    /// Disabled
    #[must_use]
    pub const fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Absent from the DOM until `delay` after it was added
    #[must_use]
    pub const fn appearing_after(mut self, delay: Duration) -> Self {
        self.appear_after = Some(delay);
        self
    }

    fn label(&self) -> String {
        if let Some(id) = &self.id {
            format!("#{id}")
        } else if let Some(name) = &self.name {
            format!("{}[name={name}]", self.tag)
        } else if let Some(class) = self.classes.first() {
            format!("{}.{class}", self.tag)
        } else {
            self.tag.clone()
        }
    }

    fn attribute(&self, name: &str) -> Option<String> {
        match name {
            "id" => self.id.clone(),
            "name" => self.name.clone(),
            "class" if !self.classes.is_empty() => Some(self.classes.join(" ")),
            "value" => self.value.clone().or_else(|| self.attributes.get("value").cloned()),
            _ => self.attributes.get(name).cloned(),
        }
    }
}

/// Page blueprint served for a URL
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockPage {
    title: String,
    source: Option<String>,
    elements: Vec<MockElement>,
}

impl MockPage {
    /// Page with a title
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    /// Add a top-level element
    #[must_use]
    pub fn with_element(mut self, element: MockElement) -> Self {
        self.elements.push(element);
        self
    }

    /// Explicit page source (generated from the elements otherwise)
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

#[derive(Debug, Clone)]
struct Node {
    element: MockElement,
    parent: Option<usize>,
    appears_at: Option<Instant>,
}

impl Node {
    fn present(&self) -> bool {
        self.appears_at.map_or(true, |at| Instant::now() >= at)
    }
}

#[derive(Debug, Clone)]
struct Window {
    handle: String,
    url: String,
    title: String,
    source: Option<String>,
    nodes: Vec<Node>,
    generation: u64,
}

impl Window {
    fn blank(handle: String) -> Self {
        Self {
            handle,
            url: "about:blank".to_string(),
            title: String::new(),
            source: None,
            nodes: Vec::new(),
            generation: 0,
        }
    }

    fn load(&mut self, url: &str, page: Option<&MockPage>) {
        self.url = url.to_string();
        self.nodes.clear();
        self.generation += 1;
        match page {
            Some(page) => {
                self.title = page.title.clone();
                self.source = page.source.clone();
                for element in &page.elements {
                    self.insert(element.clone(), None);
                }
            }
            None => {
                self.title = String::new();
                self.source = None;
            }
        }
    }

    fn insert(&mut self, mut element: MockElement, parent: Option<usize>) {
        let children = std::mem::take(&mut element.children);
        let appears_at = element.appear_after.map(|d| Instant::now() + d);
        self.nodes.push(Node {
            element,
            parent,
            appears_at,
        });
        let index = self.nodes.len() - 1;
        for child in children {
            self.insert(child, Some(index));
        }
    }

    fn ancestors(&self, index: usize) -> impl Iterator<Item = usize> + '_ {
        std::iter::successors(self.nodes[index].parent, move |&i| self.nodes[i].parent)
    }

    fn source(&self) -> String {
        if let Some(source) = &self.source {
            return source.clone();
        }
        let mut html = format!("<html><head><title>{}</title></head><body>", self.title);
        for node in self.nodes.iter().filter(|n| n.present()) {
            let e = &node.element;
            html.push_str(&format!("<{}", e.tag));
            if let Some(id) = &e.id {
                html.push_str(&format!(" id=\"{id}\""));
            }
            html.push_str(&format!(">{}</{}>", e.text, e.tag));
        }
        html.push_str("</body></html>");
        html
    }
}

#[derive(Debug)]
struct State {
    windows: Vec<Window>,
    current: usize,
    pending_windows: Vec<(Instant, Window)>,
    pages: HashMap<String, MockPage>,
    cookies: Vec<Cookie>,
    scripts: Vec<(String, VecDeque<Value>)>,
    stale_budget: u32,
    screenshot: Vec<u8>,
    history: Vec<String>,
    closed: bool,
    window_counter: usize,
}

impl State {
    fn window(&self) -> &Window {
        &self.windows[self.current]
    }

    fn window_mut(&mut self) -> &mut Window {
        &mut self.windows[self.current]
    }

    fn promote_pending(&mut self) {
        let now = Instant::now();
        let (ready, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending_windows)
            .into_iter()
            .partition(|(at, _)| *at <= now);
        self.pending_windows = waiting;
        self.windows.extend(ready.into_iter().map(|(_, w)| w));
    }

    fn next_handle(&mut self) -> String {
        let handle = format!("window-{}", self.window_counter);
        self.window_counter += 1;
        handle
    }

    fn resolve(&mut self, element: &ElementId) -> DriverResult<usize> {
        if self.closed {
            return Err(DriverError::protocol("browser is closed"));
        }
        if self.stale_budget > 0 {
            self.stale_budget -= 1;
            return Err(DriverError::Stale {
                message: format!("{element} was re-rendered"),
            });
        }
        let stale = || DriverError::Stale {
            message: format!("{element} is no longer attached to the page"),
        };
        let mut parts = element.0.split(':');
        let (Some(handle), Some(generation), Some(index)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(stale());
        };
        let window = self.window();
        if window.handle != handle || generation.parse::<u64>().ok() != Some(window.generation) {
            return Err(stale());
        }
        let index: usize = index.parse().map_err(|_| stale())?;
        match window.nodes.get(index) {
            Some(node) if node.present() => Ok(index),
            _ => Err(stale()),
        }
    }

    fn handle_for(&self, index: usize) -> ElementId {
        let window = self.window();
        ElementId(format!("{}:{}:{index}", window.handle, window.generation))
    }

    fn find(&self, locator: &Locator, scope: Option<usize>) -> DriverResult<Vec<ElementId>> {
        let matcher = Matcher::compile(locator)?;
        let window = self.window();
        Ok(window
            .nodes
            .iter()
            .enumerate()
            .filter(|(i, node)| {
                node.present()
                    && scope.map_or(true, |p| window.ancestors(*i).any(|a| a == p))
                    && matcher.matches(window, *i)
            })
            .map(|(i, _)| self.handle_for(i))
            .collect())
    }
}

/// In-memory browser
#[derive(Debug)]
pub struct MockDriver {
    state: Mutex<State>,
}

impl Default for MockDriver {
    fn default() -> Self {
        Self {
            state: Mutex::new(State {
                windows: vec![Window::blank("window-0".to_string())],
                current: 0,
                pending_windows: Vec::new(),
                pages: HashMap::new(),
                cookies: Vec::new(),
                scripts: Vec::new(),
                stale_budget: 0,
                screenshot: MOCK_PNG.to_vec(),
                history: Vec::new(),
                closed: false,
                window_counter: 1,
            }),
        }
    }
}

impl MockDriver {
    /// Blank browser with one window
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(state: &mut State, entry: String) {
        tracing::trace!(call = %entry, "mock driver call");
        state.history.push(entry);
    }

    /// Serve `page` whenever `url` is navigated to
    pub fn add_page(&self, url: impl Into<String>, page: MockPage) {
        let _ = self.lock().pages.insert(url.into(), page);
    }

    /// Add an element to the current page
    pub fn add_element(&self, element: MockElement) {
        self.lock().window_mut().insert(element, None);
    }

    /// Re-render the current page: all handles become stale
    pub fn mutate(&self) {
        self.lock().window_mut().generation += 1;
    }

    /// Re-render the current page with new text for the element with this
    /// id: all handles become stale
    pub fn rerender_text(&self, id: &str, text: impl Into<String>) {
        let mut state = self.lock();
        let window = state.window_mut();
        if let Some(node) = window
            .nodes
            .iter_mut()
            .find(|n| n.element.id.as_deref() == Some(id))
        {
            node.element.text = text.into();
        }
        window.generation += 1;
    }

    /// The next `count` element operations report a stale reference
    pub fn fail_stale(&self, count: u32) {
        self.lock().stale_budget = count;
    }

    /// Scripted result for scripts containing `fragment`. Results are
    /// consumed in order; the last one repeats.
    pub fn set_script_results(&self, fragment: impl Into<String>, results: Vec<Value>) {
        self.lock()
            .scripts
            .push((fragment.into(), results.into_iter().collect()));
    }

    /// Bytes returned by `screenshot`
    pub fn set_screenshot(&self, png: Vec<u8>) {
        self.lock().screenshot = png;
    }

    /// Open another window with `url` after `delay`
    pub fn open_window_after(&self, url: &str, delay: Duration) -> String {
        let mut state = self.lock();
        let handle = state.next_handle();
        let mut window = Window::blank(handle.clone());
        let page = state.pages.get(url).cloned();
        window.load(url, page.as_ref());
        state.pending_windows.push((Instant::now() + delay, window));
        handle
    }

    /// Current `value` of the first element with this id
    #[must_use]
    pub fn value_of(&self, id: &str) -> Option<String> {
        let state = self.lock();
        state
            .window()
            .nodes
            .iter()
            .find(|n| n.element.id.as_deref() == Some(id))
            .and_then(|n| n.element.attribute("value"))
    }

    /// Calls made so far, e.g. `click #save`, `navigate http://x`
    #[must_use]
    pub fn history(&self) -> Vec<String> {
        self.lock().history.clone()
    }

    /// True if a call starting with `prefix` was made
    #[must_use]
    pub fn was_called(&self, prefix: &str) -> bool {
        self.lock().history.iter().any(|c| c.starts_with(prefix))
    }

    /// True once `quit` has been called
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn with_element<T>(
        &self,
        element: &ElementId,
        call: &str,
        f: impl FnOnce(&mut MockElement) -> DriverResult<T>,
    ) -> DriverResult<T> {
        let mut state = self.lock();
        let index = state.resolve(element)?;
        let label = state.window().nodes[index].element.label();
        if !call.is_empty() {
            Self::record(&mut state, format!("{call} {label}"));
        }
        f(&mut state.window_mut().nodes[index].element)
    }

    fn interactable(element: &MockElement, operation: &str) -> DriverResult<()> {
        if !element.visible {
            return Err(DriverError::Interaction {
                operation: operation.to_string(),
                message: format!("element {} is not displayed", element.label()),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl WebDriver for MockDriver {
    async fn navigate(&self, url: &str) -> DriverResult<()> {
        let mut state = self.lock();
        Self::record(&mut state, format!("navigate {url}"));
        let page = state.pages.get(url).cloned();
        state.window_mut().load(url, page.as_ref());
        Ok(())
    }

    async fn refresh(&self) -> DriverResult<()> {
        let mut state = self.lock();
        Self::record(&mut state, "refresh".to_string());
        let url = state.window().url.clone();
        if let Some(page) = state.pages.get(&url).cloned() {
            state.window_mut().load(&url, Some(&page));
        } else {
            state.window_mut().generation += 1;
        }
        Ok(())
    }

    async fn current_url(&self) -> DriverResult<String> {
        Ok(self.lock().window().url.clone())
    }

    async fn title(&self) -> DriverResult<String> {
        Ok(self.lock().window().title.clone())
    }

    async fn page_source(&self) -> DriverResult<String> {
        Ok(self.lock().window().source())
    }

    async fn find_elements(&self, locator: &Locator) -> DriverResult<Vec<ElementId>> {
        self.lock().find(locator, None)
    }

    async fn find_elements_in(
        &self,
        parent: &ElementId,
        locator: &Locator,
    ) -> DriverResult<Vec<ElementId>> {
        let mut state = self.lock();
        let scope = state.resolve(parent)?;
        state.find(locator, Some(scope))
    }

    async fn click(&self, element: &ElementId) -> DriverResult<()> {
        self.with_element(element, "click", |e| Self::interactable(e, "click"))
    }

    async fn click_at_offset(&self, element: &ElementId, x: i64, y: i64) -> DriverResult<()> {
        self.with_element(element, &format!("click({x},{y})"), |e| {
            Self::interactable(e, "click")
        })
    }

    async fn clear(&self, element: &ElementId) -> DriverResult<()> {
        self.with_element(element, "clear", |e| {
            Self::interactable(e, "clear")?;
            e.value = Some(String::new());
            Ok(())
        })
    }

    async fn send_keys(&self, element: &ElementId, text: &str) -> DriverResult<()> {
        self.with_element(element, &format!("type '{text}' into"), |e| {
            Self::interactable(e, "type")?;
            e.value.get_or_insert_with(String::new).push_str(text);
            Ok(())
        })
    }

    async fn submit(&self, element: &ElementId) -> DriverResult<()> {
        self.with_element(element, "submit", |_| Ok(()))
    }

    async fn text(&self, element: &ElementId) -> DriverResult<String> {
        self.with_element(element, "", |e| {
            Ok(if e.visible { e.text.clone() } else { String::new() })
        })
    }

    async fn tag_name(&self, element: &ElementId) -> DriverResult<String> {
        self.with_element(element, "", |e| Ok(e.tag.clone()))
    }

    async fn attribute(&self, element: &ElementId, name: &str) -> DriverResult<Option<String>> {
        self.with_element(element, "", |e| Ok(e.attribute(name)))
    }

    async fn is_displayed(&self, element: &ElementId) -> DriverResult<bool> {
        self.with_element(element, "", |e| Ok(e.visible))
    }

    async fn is_enabled(&self, element: &ElementId) -> DriverResult<bool> {
        self.with_element(element, "", |e| Ok(e.enabled))
    }

    async fn is_selected(&self, element: &ElementId) -> DriverResult<bool> {
        self.with_element(element, "", |e| {
            Ok(e.attributes.contains_key("checked") || e.attributes.contains_key("selected"))
        })
    }

    async fn select_by_visible_text(&self, element: &ElementId, text: &str) -> DriverResult<()> {
        self.with_element(element, &format!("select '{text}' in"), |e| {
            if e.tag != "select" {
                return Err(DriverError::Interaction {
                    operation: "select".to_string(),
                    message: format!("element should have been \"select\" but was \"{}\"", e.tag),
                });
            }
            if !e.options.iter().any(|o| o == text) {
                return Err(DriverError::Interaction {
                    operation: "select".to_string(),
                    message: format!("Cannot locate option with text: {text}"),
                });
            }
            e.value = Some(text.to_string());
            Ok(())
        })
    }

    async fn upload_file(&self, element: &ElementId, path: &Path) -> DriverResult<()> {
        self.with_element(element, &format!("upload {} to", path.display()), |e| {
            e.value = Some(path.display().to_string());
            Ok(())
        })
    }

    async fn execute_script(&self, script: &str) -> DriverResult<Value> {
        let mut state = self.lock();
        if state.closed {
            return Err(DriverError::protocol("browser is closed"));
        }
        Self::record(&mut state, format!("script {script}"));
        for (fragment, results) in &mut state.scripts {
            if script.contains(fragment.as_str()) {
                let value = if results.len() > 1 {
                    results.pop_front()
                } else {
                    results.front().cloned()
                };
                return Ok(value.unwrap_or(Value::Null));
            }
        }
        Ok(Value::Null)
    }

    async fn window_handles(&self) -> DriverResult<Vec<String>> {
        let mut state = self.lock();
        state.promote_pending();
        Ok(state.windows.iter().map(|w| w.handle.clone()).collect())
    }

    async fn current_window(&self) -> DriverResult<String> {
        Ok(self.lock().window().handle.clone())
    }

    async fn switch_to_window(&self, handle: &str) -> DriverResult<()> {
        let mut state = self.lock();
        state.promote_pending();
        let index = state
            .windows
            .iter()
            .position(|w| w.handle == handle)
            .ok_or_else(|| DriverError::NoSuchWindow {
                handle: handle.to_string(),
            })?;
        state.current = index;
        Self::record(&mut state, format!("switch {handle}"));
        Ok(())
    }

    async fn cookies(&self) -> DriverResult<Vec<Cookie>> {
        Ok(self.lock().cookies.clone())
    }

    async fn add_cookie(&self, cookie: &Cookie) -> DriverResult<()> {
        let mut state = self.lock();
        Self::record(&mut state, format!("add cookie {}", cookie.name));
        state.cookies.retain(|c| c.name != cookie.name);
        state.cookies.push(cookie.clone());
        Ok(())
    }

    async fn delete_cookie(&self, name: &str) -> DriverResult<()> {
        let mut state = self.lock();
        Self::record(&mut state, format!("delete cookie {name}"));
        state.cookies.retain(|c| c.name != name);
        Ok(())
    }

    async fn screenshot(&self) -> DriverResult<Vec<u8>> {
        let mut state = self.lock();
        Self::record(&mut state, "screenshot".to_string());
        Ok(state.screenshot.clone())
    }

    async fn quit(&self) -> DriverResult<()> {
        let mut state = self.lock();
        Self::record(&mut state, "quit".to_string());
        state.closed = true;
        Ok(())
    }
}

/// Compiled selector for the mock DOM
enum Matcher {
    Id(String),
    Name(String),
    Class(String),
    Css(Vec<Compound>),
    XPath(XPathStep),
    Nothing,
}

impl Matcher {
    fn compile(locator: &Locator) -> DriverResult<Self> {
        Ok(match locator {
            Locator::Id(v) => Self::Id(v.clone()),
            Locator::Name(v) => Self::Name(v.clone()),
            Locator::ClassName(v) => {
                if v.trim().contains(char::is_whitespace) {
                    return Err(invalid(v, "compound class names are not permitted"));
                }
                Self::Class(v.clone())
            }
            Locator::Css(v) => Self::Css(parse_css(v)?),
            Locator::XPath(v) => match parse_xpath(v)? {
                Some(step) => Self::XPath(step),
                None => Self::Nothing,
            },
        })
    }

    fn matches(&self, window: &Window, index: usize) -> bool {
        let e = &window.nodes[index].element;
        match self {
            Self::Id(v) => e.id.as_deref() == Some(v.as_str()),
            Self::Name(v) => e.name.as_deref() == Some(v.as_str()),
            Self::Class(v) => e.classes.iter().any(|c| c == v),
            Self::Css(compounds) => match compounds.split_last() {
                Some((last, ancestors)) => {
                    last.matches(e) && {
                        let mut chain = window.ancestors(index);
                        ancestors
                            .iter()
                            .rev()
                            .all(|c| chain.any(|a| c.matches(&window.nodes[a].element)))
                    }
                }
                None => false,
            },
            Self::XPath(step) => step.matches(e),
            Self::Nothing => false,
        }
    }
}

fn invalid(selector: &str, message: &str) -> DriverError {
    DriverError::InvalidSelector {
        selector: selector.to_string(),
        message: message.to_string(),
    }
}

#[derive(Debug, Default)]
struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attributes: Vec<(String, AttrTest)>,
}

#[derive(Debug)]
enum AttrTest {
    Exists,
    Equals(String),
    Word(String),
}

impl Compound {
    fn matches(&self, e: &MockElement) -> bool {
        self.tag.as_ref().map_or(true, |t| t == "*" || *t == e.tag)
            && self.id.as_ref().map_or(true, |id| e.id.as_ref() == Some(id))
            && self.classes.iter().all(|c| e.classes.contains(c))
            && self.attributes.iter().all(|(name, test)| {
                let value = e.attribute(name);
                match test {
                    AttrTest::Exists => value.is_some(),
                    AttrTest::Equals(v) => value.as_ref() == Some(v),
                    AttrTest::Word(v) => value.is_some_and(|s| s.split_whitespace().any(|w| w == v)),
                }
            })
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

fn parse_css(selector: &str) -> DriverResult<Vec<Compound>> {
    let compounds = selector
        .split_whitespace()
        .map(|part| parse_compound(selector, part))
        .collect::<DriverResult<Vec<_>>>()?;
    if compounds.is_empty() {
        return Err(invalid(selector, "empty selector"));
    }
    Ok(compounds)
}

fn take_ident(selector: &str, chars: &mut Peekable<Chars<'_>>) -> DriverResult<String> {
    let mut out = String::new();
    while let Some(&c) = chars.peek() {
        if !is_ident_char(c) {
            break;
        }
        out.push(c);
        let _ = chars.next();
    }
    if out.is_empty() || out.starts_with(|c: char| c.is_ascii_digit()) {
        return Err(invalid(selector, "expected identifier"));
    }
    Ok(out)
}

fn parse_compound(selector: &str, part: &str) -> DriverResult<Compound> {
    let mut compound = Compound::default();
    let mut chars = part.chars().peekable();
    if chars.peek() == Some(&'*') {
        let _ = chars.next();
        compound.tag = Some("*".to_string());
    } else if chars.peek().is_some_and(|c| c.is_ascii_alphabetic()) {
        compound.tag = Some(take_ident(selector, &mut chars)?.to_lowercase());
    }
    while let Some(c) = chars.next() {
        match c {
            '#' => compound.id = Some(take_ident(selector, &mut chars)?),
            '.' => compound.classes.push(take_ident(selector, &mut chars)?),
            '[' => {
                let body: String = chars.by_ref().take_while(|&c| c != ']').collect();
                compound.attributes.push(parse_attr(selector, &body)?);
            }
            _ => return Err(invalid(selector, &format!("unexpected '{c}'"))),
        }
    }
    Ok(compound)
}

fn parse_attr(selector: &str, body: &str) -> DriverResult<(String, AttrTest)> {
    let unquote = |v: &str| -> DriverResult<String> {
        let v = v.trim();
        let quoted = v.len() >= 2
            && ((v.starts_with('"') && v.ends_with('"'))
                || (v.starts_with('\'') && v.ends_with('\'')));
        if quoted {
            Ok(v[1..v.len() - 1].replace("\\\"", "\"").replace("\\\\", "\\"))
        } else if !v.is_empty() && v.chars().all(is_ident_char) {
            Ok(v.to_string())
        } else {
            Err(invalid(selector, "bad attribute value"))
        }
    };
    let check_name = |n: &str| -> DriverResult<String> {
        let n = n.trim();
        if n.is_empty() || !n.chars().all(is_ident_char) {
            return Err(invalid(selector, "bad attribute name"));
        }
        Ok(n.to_string())
    };
    if let Some((name, value)) = body.split_once("~=") {
        Ok((check_name(name)?, AttrTest::Word(unquote(value)?)))
    } else if let Some((name, value)) = body.split_once('=') {
        Ok((check_name(name)?, AttrTest::Equals(unquote(value)?)))
    } else {
        Ok((check_name(body)?, AttrTest::Exists))
    }
}

#[derive(Debug)]
struct XPathStep {
    tag: String,
    predicate: Option<(String, String)>,
}

impl XPathStep {
    fn matches(&self, e: &MockElement) -> bool {
        (self.tag == "*" || self.tag == e.tag)
            && self
                .predicate
                .as_ref()
                .map_or(true, |(name, value)| e.attribute(name).as_ref() == Some(value))
    }
}

/// Supports `//tag`, `//*[@attr='v']`, `.//tag[@attr="v"]`. A bare name is a
/// valid relative path that matches nothing at the document level.
fn parse_xpath(selector: &str) -> DriverResult<Option<XPathStep>> {
    static STEP: OnceLock<Option<regex::Regex>> = OnceLock::new();
    let pattern = STEP
        .get_or_init(|| {
            regex::Regex::new(
                r#"^\.?//(\*|[A-Za-z][\w-]*)(?:\[@([\w-]+)\s*=\s*(?:'([^']*)'|"([^"]*)")\])?$"#,
            )
            .ok()
        })
        .as_ref()
        .ok_or_else(|| invalid(selector, "xpath support unavailable"))?;
    if let Some(caps) = pattern.captures(selector.trim()) {
        let predicate = caps.get(2).map(|name| {
            let value = caps.get(3).or_else(|| caps.get(4)).map_or("", |m| m.as_str());
            (name.as_str().to_string(), value.to_string())
        });
        return Ok(Some(XPathStep {
            tag: caps[1].to_lowercase(),
            predicate,
        }));
    }
    if selector.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
        && selector.chars().all(is_ident_char)
    {
        return Ok(None);
    }
    Err(invalid(selector, "not a valid XPath expression"))
}

/// Provider handing out [`MockDriver`]s
pub struct MockDriverProvider {
    factory: Box<dyn Fn() -> MockDriver + Send + Sync>,
    current: tokio::sync::Mutex<Option<Arc<MockDriver>>>,
    launches: AtomicUsize,
}

impl std::fmt::Debug for MockDriverProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockDriverProvider")
            .field("launches", &self.launches.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl MockDriverProvider {
    /// Provider building a fresh driver with `factory` on every launch
    pub fn new(factory: impl Fn() -> MockDriver + Send + Sync + 'static) -> Self {
        Self {
            factory: Box::new(factory),
            current: tokio::sync::Mutex::new(None),
            launches: AtomicUsize::new(0),
        }
    }

    /// Provider whose first launch uses `driver`; later launches get blank
    /// drivers
    #[must_use]
    pub fn with_driver(driver: Arc<MockDriver>) -> Self {
        let provider = Self::new(MockDriver::new);
        if let Ok(mut current) = provider.current.try_lock() {
            *current = Some(driver);
        }
        provider.launches.store(1, Ordering::SeqCst);
        provider
    }

    /// Number of browsers launched so far
    #[must_use]
    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    /// The concrete running driver
    pub async fn current(&self) -> Option<Arc<MockDriver>> {
        self.current.lock().await.clone()
    }
}

#[async_trait]
impl DriverProvider for MockDriverProvider {
    async fn initialize(&self) -> PawlResult<()> {
        let mut current = self.current.lock().await;
        if current.is_none() {
            *current = Some(Arc::new((self.factory)()));
            let _ = self.launches.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn get(&self) -> PawlResult<Arc<dyn WebDriver>> {
        self.initialize().await?;
        let current = self.current.lock().await;
        match current.as_ref() {
            Some(driver) => Ok(driver.clone() as Arc<dyn WebDriver>),
            None => Err(crate::result::PawlError::BrowserUnavailable),
        }
    }

    async fn end(&self) -> PawlResult<()> {
        if let Some(driver) = self.current.lock().await.take() {
            driver.quit().await?;
        }
        Ok(())
    }

    async fn running(&self) -> Option<Arc<dyn WebDriver>> {
        self.current
            .lock()
            .await
            .as_ref()
            .map(|d| d.clone() as Arc<dyn WebDriver>)
    }
}
