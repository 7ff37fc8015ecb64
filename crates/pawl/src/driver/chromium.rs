//! Chromium over CDP.
//!
//! Elements found by a locator are kept in a per-document registry
//! (`window.__pawl`) and addressed as `<token>:<n>`. A navigation drops the
//! registry and a new document gets a new token, so handles from an old
//! document, or for nodes that left the DOM, report stale references.
//! Native input (click, typing, file chooser) goes through chromiumoxide
//! elements located by the `data-pawl-id` marker the registry sets.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser as CdpBrowser, BrowserConfig as CdpConfig};
use chromiumoxide::cdp::browser_protocol::dom::SetFileInputFilesParams;
use chromiumoxide::cdp::browser_protocol::network::{CookieParam, DeleteCookiesParams};
use chromiumoxide::cdp::browser_protocol::page::{CaptureScreenshotFormat, CaptureScreenshotParams};
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::element::Element as CdpElement;
use chromiumoxide::layout::Point;
use chromiumoxide::page::Page as CdpPage;
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::Mutex;

use super::{BrowserConfig, Cookie, DriverError, DriverProvider, DriverResult, ElementId, WebDriver};
use crate::locator::Locator;
use crate::result::{PawlError, PawlResult};

const REGISTRY: &str = r#"
const R = window.__pawl || (window.__pawl = {
  token: Math.random().toString(36).slice(2, 10),
  seq: 0,
  els: new Map(),
});
const pawlGet = (h) => {
  const i = h.indexOf(':');
  if (h.slice(0, i) !== R.token) return null;
  const el = R.els.get(h.slice(i + 1));
  return el && el.isConnected ? el : null;
};
const pawlPut = (el) => {
  for (const [k, v] of R.els) if (v === el) return R.token + ':' + k;
  const k = String(++R.seq);
  R.els.set(k, el);
  el.setAttribute('data-pawl-id', R.token + '-' + k);
  return R.token + ':' + k;
};
const pawlFind = (root, strategy, value) => {
  if (strategy === 'xpath') {
    const r = document.evaluate(value, root, null, XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null);
    const out = [];
    for (let i = 0; i < r.snapshotLength; i++) {
      const n = r.snapshotItem(i);
      if (n.nodeType === 1) out.push(n);
    }
    return out;
  }
  return Array.from(root.querySelectorAll(value));
};
const pawlVisible = (el) => {
  const s = getComputedStyle(el);
  if (s.display === 'none' || s.visibility === 'hidden' || s.opacity === '0') return false;
  const r = el.getBoundingClientRect();
  return r.width > 0 && r.height > 0;
};
const pawlFail = (e) => ({
  error: String(e && e.message ? e.message : e),
  kind: e && e.name === 'SyntaxError' ? 'invalid' : 'script',
});
"#;

/// Chromium browser with one current window
#[derive(Debug)]
pub struct ChromiumDriver {
    browser: Arc<Mutex<CdpBrowser>>,
    page: Mutex<CdpPage>,
    handler: tokio::task::JoinHandle<()>,
}

impl ChromiumDriver {
    /// Launch Chromium with `config`
    ///
    /// # Errors
    ///
    /// Returns error if browser cannot be launched
    pub async fn launch(config: &BrowserConfig) -> PawlResult<Self> {
        let mut builder = CdpConfig::builder().window_size(config.window_width, config.window_height);

        if !config.headless {
            builder = builder.with_head();
        }

        if !config.sandbox {
            builder = builder.no_sandbox();
        }

        if let Some(ref path) = config.executable {
            builder = builder.chrome_executable(path);
        }

        if let Some(ref locale) = config.locale {
            builder = builder
                .arg(format!("--lang={}", locale.tag()))
                .arg(format!("--accept-lang={}", locale.accept_language()));
        }

        let cdp_config = builder
            .build()
            .map_err(|e| PawlError::BrowserLaunchError { message: e })?;

        let (browser, mut handler) =
            CdpBrowser::launch(cdp_config)
                .await
                .map_err(|e| PawlError::BrowserLaunchError {
                    message: e.to_string(),
                })?;

        let handler = tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    break;
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| PawlError::BrowserLaunchError {
                message: e.to_string(),
            })?;

        tracing::info!(
            headless = config.headless,
            locale = config.locale.as_ref().map(ToString::to_string).as_deref().unwrap_or("default"),
            "launched chromium"
        );

        Ok(Self {
            browser: Arc::new(Mutex::new(browser)),
            page: Mutex::new(page),
            handler,
        })
    }

    async fn current_page(&self) -> CdpPage {
        self.page.lock().await.clone()
    }

    async fn eval(&self, script: String) -> DriverResult<Value> {
        let page = self.current_page().await;
        let params = EvaluateParams::builder()
            .expression(script)
            .return_by_value(true)
            .await_promise(true)
            .build()
            .map_err(DriverError::protocol)?;
        page.evaluate_expression(params)
            .await
            .map_err(DriverError::protocol)?
            .into_value::<Value>()
            .map_err(DriverError::protocol)
    }

    /// Runs `body` with `el` bound to the element; `body` returns
    /// `{ok: ...}` or `{error, kind}`.
    async fn on_element(&self, element: &ElementId, body: &str) -> DriverResult<Value> {
        let handle = serde_json::to_string(&element.0).map_err(DriverError::protocol)?;
        let script = format!(
            "(() => {{ {REGISTRY} const el = pawlGet({handle}); if (!el) return {{ stale: true }}; \
             try {{ {body} }} catch (e) {{ return pawlFail(e); }} }})()"
        );
        decode(self.eval(script).await?, element)
    }

    async fn find(&self, scope: Option<&ElementId>, locator: &Locator) -> DriverResult<Vec<ElementId>> {
        let (strategy, value) = match locator.to_css() {
            Some(css) => ("css", css),
            None => ("xpath", locator.value().to_string()),
        };
        let value = serde_json::to_string(&value).map_err(DriverError::protocol)?;
        let found = match scope {
            Some(parent) => {
                self.on_element(
                    parent,
                    &format!("return {{ ok: pawlFind(el, '{strategy}', {value}).map(pawlPut) }};"),
                )
                .await
            }
            None => {
                let script = format!(
                    "(() => {{ {REGISTRY} try {{ return {{ ok: pawlFind(document, '{strategy}', {value}).map(pawlPut) }}; }} \
                     catch (e) {{ return pawlFail(e); }} }})()"
                );
                decode(self.eval(script).await?, &ElementId(String::new()))
            }
        }
        .map_err(|e| match e {
            DriverError::Script { message } if message.contains("valid") => DriverError::InvalidSelector {
                selector: locator.value().to_string(),
                message,
            },
            DriverError::InvalidSelector { message, .. } => DriverError::InvalidSelector {
                selector: locator.value().to_string(),
                message,
            },
            other => other,
        })?;
        Ok(found
            .as_array()
            .map(|handles| {
                handles
                    .iter()
                    .filter_map(Value::as_str)
                    .map(|h| ElementId(h.to_string()))
                    .collect()
            })
            .unwrap_or_default())
    }

    /// chromiumoxide element for a registry handle
    async fn native(&self, element: &ElementId) -> DriverResult<CdpElement> {
        let marker = self
            .on_element(element, "el.scrollIntoView({ block: 'center' }); return { ok: el.getAttribute('data-pawl-id') };")
            .await?;
        let marker = marker.as_str().ok_or_else(|| DriverError::Stale {
            message: format!("{element} lost its marker"),
        })?;
        self.current_page()
            .await
            .find_element(format!("[data-pawl-id=\"{marker}\"]"))
            .await
            .map_err(|e| DriverError::Stale {
                message: e.to_string(),
            })
    }
}

fn decode(value: Value, element: &ElementId) -> DriverResult<Value> {
    if value.get("stale").and_then(Value::as_bool) == Some(true) {
        return Err(DriverError::Stale {
            message: format!("{element} is no longer attached to the page"),
        });
    }
    if let Some(message) = value.get("error") {
        let message = message.as_str().unwrap_or_default().to_string();
        return Err(match value.get("kind").and_then(Value::as_str) {
            Some("invalid") => DriverError::InvalidSelector {
                selector: String::new(),
                message,
            },
            Some("interaction") => DriverError::Interaction {
                operation: "interaction".to_string(),
                message,
            },
            _ => DriverError::Script { message },
        });
    }
    Ok(value.get("ok").cloned().unwrap_or(Value::Null))
}

fn js_string(value: &str) -> DriverResult<String> {
    serde_json::to_string(value).map_err(DriverError::protocol)
}

#[async_trait]
impl WebDriver for ChromiumDriver {
    async fn navigate(&self, url: &str) -> DriverResult<()> {
        let page = self.current_page().await;
        let _ = page.goto(url).await.map_err(DriverError::protocol)?;
        Ok(())
    }

    async fn refresh(&self) -> DriverResult<()> {
        let page = self.current_page().await;
        let _ = page.reload().await.map_err(DriverError::protocol)?;
        Ok(())
    }

    async fn current_url(&self) -> DriverResult<String> {
        let page = self.current_page().await;
        Ok(page.url().await.map_err(DriverError::protocol)?.unwrap_or_default())
    }

    async fn title(&self) -> DriverResult<String> {
        let page = self.current_page().await;
        Ok(page
            .get_title()
            .await
            .map_err(DriverError::protocol)?
            .unwrap_or_default())
    }

    async fn page_source(&self) -> DriverResult<String> {
        let page = self.current_page().await;
        page.content().await.map_err(DriverError::protocol)
    }

    async fn find_elements(&self, locator: &Locator) -> DriverResult<Vec<ElementId>> {
        self.find(None, locator).await
    }

    async fn find_elements_in(
        &self,
        parent: &ElementId,
        locator: &Locator,
    ) -> DriverResult<Vec<ElementId>> {
        let locator = match locator {
            Locator::XPath(x) if x.starts_with('/') => Locator::XPath(format!(".{x}")),
            other => other.clone(),
        };
        self.find(Some(parent), &locator).await
    }

    async fn click(&self, element: &ElementId) -> DriverResult<()> {
        let native = self.native(element).await?;
        let _ = native.click().await.map_err(|e| DriverError::Interaction {
            operation: "click".to_string(),
            message: e.to_string(),
        })?;
        Ok(())
    }

    async fn click_at_offset(&self, element: &ElementId, x: i64, y: i64) -> DriverResult<()> {
        let native = self.native(element).await?;
        let bounds = native.bounding_box().await.map_err(DriverError::protocol)?;
        let point = Point::new(bounds.x + x as f64, bounds.y + y as f64);
        let _ = self
            .current_page()
            .await
            .click(point)
            .await
            .map_err(|e| DriverError::Interaction {
                operation: "click".to_string(),
                message: e.to_string(),
            })?;
        Ok(())
    }

    async fn clear(&self, element: &ElementId) -> DriverResult<()> {
        let _ = self
            .on_element(
                element,
                "if (el.isContentEditable) { el.textContent = ''; } else { el.value = ''; } \
                 el.dispatchEvent(new Event('input', { bubbles: true })); \
                 el.dispatchEvent(new Event('change', { bubbles: true })); return { ok: null };",
            )
            .await?;
        Ok(())
    }

    async fn send_keys(&self, element: &ElementId, text: &str) -> DriverResult<()> {
        let native = self.native(element).await?;
        let _ = native.focus().await.map_err(DriverError::protocol)?;
        let _ = native.type_str(text).await.map_err(|e| DriverError::Interaction {
            operation: "type".to_string(),
            message: e.to_string(),
        })?;
        Ok(())
    }

    async fn submit(&self, element: &ElementId) -> DriverResult<()> {
        let _ = self
            .on_element(
                element,
                "const f = el.form || el.closest('form'); \
                 if (!f) return { error: 'element is not in a form', kind: 'interaction' }; \
                 if (f.requestSubmit) { f.requestSubmit(); } else { f.submit(); } return { ok: null };",
            )
            .await?;
        Ok(())
    }

    async fn text(&self, element: &ElementId) -> DriverResult<String> {
        let value = self
            .on_element(element, "return { ok: pawlVisible(el) ? el.innerText : '' };")
            .await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn tag_name(&self, element: &ElementId) -> DriverResult<String> {
        let value = self
            .on_element(element, "return { ok: el.tagName.toLowerCase() };")
            .await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn attribute(&self, element: &ElementId, name: &str) -> DriverResult<Option<String>> {
        let name = js_string(name)?;
        let value = self
            .on_element(
                element,
                &format!(
                    "const n = {name}; const v = (n === 'value' && 'value' in el) ? el.value : el.getAttribute(n); \
                     return {{ ok: v === null || v === undefined ? null : String(v) }};"
                ),
            )
            .await?;
        Ok(value.as_str().map(ToString::to_string))
    }

    async fn is_displayed(&self, element: &ElementId) -> DriverResult<bool> {
        let value = self.on_element(element, "return { ok: pawlVisible(el) };").await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn is_enabled(&self, element: &ElementId) -> DriverResult<bool> {
        let value = self.on_element(element, "return { ok: !el.disabled };").await?;
        Ok(value.as_bool().unwrap_or(true))
    }

    async fn is_selected(&self, element: &ElementId) -> DriverResult<bool> {
        let value = self
            .on_element(element, "return { ok: !!(el.checked || el.selected) };")
            .await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn select_by_visible_text(&self, element: &ElementId, text: &str) -> DriverResult<()> {
        let text = js_string(text)?;
        let _ = self
            .on_element(
                element,
                &format!(
                    "if (el.tagName !== 'SELECT') return {{ error: 'element should have been \"select\" but was \"' + el.tagName.toLowerCase() + '\"', kind: 'interaction' }}; \
                     const t = {text}; const o = Array.from(el.options).find((o) => o.text.trim() === t.trim()); \
                     if (!o) return {{ error: 'Cannot locate option with text: ' + t, kind: 'interaction' }}; \
                     o.selected = true; el.dispatchEvent(new Event('change', {{ bubbles: true }})); return {{ ok: null }};"
                ),
            )
            .await?;
        Ok(())
    }

    async fn upload_file(&self, element: &ElementId, path: &Path) -> DriverResult<()> {
        let native = self.native(element).await?;
        let params = SetFileInputFilesParams::builder()
            .files(vec![path.display().to_string()])
            .backend_node_id(native.backend_node_id.clone())
            .build()
            .map_err(DriverError::protocol)?;
        let _ = self
            .current_page()
            .await
            .execute(params)
            .await
            .map_err(|e| DriverError::Interaction {
                operation: "upload".to_string(),
                message: e.to_string(),
            })?;
        Ok(())
    }

    async fn execute_script(&self, script: &str) -> DriverResult<Value> {
        let wrapped = format!(
            "(() => {{ try {{ const r = (() => {{ {script} \n}})(); return {{ ok: r === undefined ? null : r }}; }} \
             catch (e) {{ return {{ error: String(e && e.message ? e.message : e), kind: 'script' }}; }} }})()"
        );
        decode(self.eval(wrapped).await?, &ElementId(String::new()))
    }

    async fn window_handles(&self) -> DriverResult<Vec<String>> {
        let browser = self.browser.lock().await;
        let pages = browser.pages().await.map_err(DriverError::protocol)?;
        Ok(pages.iter().map(|p| p.target_id().inner().clone()).collect())
    }

    async fn current_window(&self) -> DriverResult<String> {
        Ok(self.current_page().await.target_id().inner().clone())
    }

    async fn switch_to_window(&self, handle: &str) -> DriverResult<()> {
        let pages = {
            let browser = self.browser.lock().await;
            browser.pages().await.map_err(DriverError::protocol)?
        };
        let page = pages
            .into_iter()
            .find(|p| p.target_id().inner() == handle)
            .ok_or_else(|| DriverError::NoSuchWindow {
                handle: handle.to_string(),
            })?;
        let _ = page.bring_to_front().await.map_err(DriverError::protocol)?;
        *self.page.lock().await = page;
        Ok(())
    }

    async fn cookies(&self) -> DriverResult<Vec<Cookie>> {
        let page = self.current_page().await;
        let cookies = page.get_cookies().await.map_err(DriverError::protocol)?;
        Ok(cookies
            .into_iter()
            .map(|c| Cookie {
                name: c.name,
                value: c.value,
                domain: Some(c.domain),
                path: Some(c.path),
            })
            .collect())
    }

    async fn add_cookie(&self, cookie: &Cookie) -> DriverResult<()> {
        let mut builder = CookieParam::builder()
            .name(cookie.name.clone())
            .value(cookie.value.clone());
        if let Some(ref domain) = cookie.domain {
            builder = builder.domain(domain.clone());
        }
        if let Some(ref path) = cookie.path {
            builder = builder.path(path.clone());
        }
        let param = builder.build().map_err(DriverError::protocol)?;
        let _ = self
            .current_page()
            .await
            .set_cookie(param)
            .await
            .map_err(DriverError::protocol)?;
        Ok(())
    }

    async fn delete_cookie(&self, name: &str) -> DriverResult<()> {
        let _ = self
            .current_page()
            .await
            .delete_cookie(DeleteCookiesParams::new(name))
            .await
            .map_err(DriverError::protocol)?;
        Ok(())
    }

    async fn screenshot(&self) -> DriverResult<Vec<u8>> {
        let page = self.current_page().await;
        let params = CaptureScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .build();

        let screenshot = page.execute(params).await.map_err(DriverError::protocol)?;

        use base64::Engine;
        base64::engine::general_purpose::STANDARD
            .decode(&screenshot.data)
            .map_err(DriverError::protocol)
    }

    async fn quit(&self) -> DriverResult<()> {
        let mut browser = self.browser.lock().await;
        let closed = browser.close().await.map_err(DriverError::protocol);
        self.handler.abort();
        let _ = closed?;
        Ok(())
    }
}

/// Launches Chromium with the configured locale on first use and keeps it
/// until [`DriverProvider::end`].
#[derive(Debug)]
pub struct LocalizedDriverProvider {
    config: BrowserConfig,
    current: Mutex<Option<Arc<ChromiumDriver>>>,
}

impl LocalizedDriverProvider {
    /// Provider for `config`
    #[must_use]
    pub fn new(config: BrowserConfig) -> Self {
        Self {
            config,
            current: Mutex::new(None),
        }
    }

    /// Launch settings
    #[must_use]
    pub const fn config(&self) -> &BrowserConfig {
        &self.config
    }
}

#[async_trait]
impl DriverProvider for LocalizedDriverProvider {
    async fn initialize(&self) -> PawlResult<()> {
        let mut current = self.current.lock().await;
        if current.is_none() {
            *current = Some(Arc::new(ChromiumDriver::launch(&self.config).await?));
        }
        Ok(())
    }

    async fn get(&self) -> PawlResult<Arc<dyn WebDriver>> {
        self.initialize().await?;
        let current = self.current.lock().await;
        current
            .as_ref()
            .map(|d| d.clone() as Arc<dyn WebDriver>)
            .ok_or(PawlError::BrowserUnavailable)
    }

    async fn end(&self) -> PawlResult<()> {
        if let Some(driver) = self.current.lock().await.take() {
            driver.quit().await?;
            tracing::debug!("closed chromium");
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
