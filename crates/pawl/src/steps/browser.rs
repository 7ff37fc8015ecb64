//! Browser steps: navigation, element actions and page assertions.

use std::path::Path;

use cucumber::{given, then, when};

use super::WebStoryWorld;
use crate::driver::{DriverError, WebDriver};
use crate::locator::{xpath_literal, Locator};
use crate::pages::ACTIVE_AJAX_REQUESTS;
use crate::resources::keys;
use crate::result::{PawlError, PawlResult};
use crate::wait::pause_seconds;

/// Session cookie name used when `user.session.cookie.name` is unset
const DEFAULT_SESSION_COOKIE: &str = "JSESSIONID";

#[given(regex = r"^an '([^']*)' link$")]
pub async fn setup_link(world: &mut WebStoryWorld, key: String) -> PawlResult<()> {
    let url = world
        .resources()
        .string(&key)
        .ok_or_else(|| PawlError::config(format!("no link configured for key '{key}'")))?;
    world.set_link(url);
    Ok(())
}

#[when(regex = r"^I open the link$")]
pub async fn open_link(world: &mut WebStoryWorld) -> PawlResult<()> {
    let url = world
        .link()
        .map(ToString::to_string)
        .ok_or_else(|| PawlError::config("no link set; use \"Given an '<key>' link\" first"))?;
    world.pages().base().await?.get(&url).await
}

#[when(regex = r"^(?:I )?refresh the page$")]
pub async fn refresh_page(world: &mut WebStoryWorld) -> PawlResult<()> {
    let page = world.pages().base().await?;
    Ok(page.driver().refresh().await?)
}

#[when(regex = r"^open context path '([^']*)'$")]
pub async fn open_context_path(world: &mut WebStoryWorld, path: String) -> PawlResult<()> {
    let page = world.pages().base().await?;
    let current = page.driver().current_url().await?;
    page.get(&format!("{current}{path}")).await
}

#[when(regex = r"^(?:I )?wait '([^']*)' seconds$")]
pub async fn wait_seconds(world: &mut WebStoryWorld, seconds: String) -> PawlResult<()> {
    pause_seconds(&seconds).await;
    let page = world.pages().base().await?;
    page.wait_for_counter(ACTIVE_AJAX_REQUESTS).await
}

#[when(regex = r"^(?:I )?click '([^']*)'$")]
pub async fn click(world: &mut WebStoryWorld, identity: String) -> PawlResult<()> {
    let page = world.pages().base().await?;
    page.visible_element(&identity).await?.click().await
}

#[when(regex = r"^(?:I )?click '([^']*)' with '([^']*)' and '([^']*)' offsets$")]
pub async fn click_with_offset(
    world: &mut WebStoryWorld,
    identity: String,
    x: String,
    y: String,
) -> PawlResult<()> {
    let (x, y) = (offset(&x)?, offset(&y)?);
    let page = world.pages().base().await?;
    page.visible_element(&identity)
        .await?
        .click_at_offset(x, y)
        .await
}

fn offset(value: &str) -> PawlResult<i64> {
    value
        .trim()
        .parse()
        .map_err(|_| PawlError::config(format!("'{value}' is not a whole number of pixels")))
}

#[when(regex = r"^(?:I )?choose '([^']*)' with '([^']*)' in '([^']*)'$")]
pub async fn choose(
    world: &mut WebStoryWorld,
    class_name: String,
    value: String,
    parent: String,
) -> PawlResult<()> {
    let page = world.pages().base().await?;
    let candidates = page
        .visible_element(&parent)
        .await?
        .find_all(&Locator::ClassName(class_name.clone()))
        .await?;
    if candidates.is_empty() {
        return Err(PawlError::assertion(format!(
            "Page elements should exists: class name '{class_name}'"
        )));
    }
    let driver = page.driver();
    for candidate in &candidates {
        if driver.text(candidate).await? == value {
            return Ok(driver.click(candidate).await?);
        }
    }
    Err(PawlError::assertion(format!(
        "Cannot find element with class name '{class_name}' and value '{value}'."
    )))
}

#[when(regex = r"^(?:I )?fill '([^']*)' with '([^']*)' file$")]
pub async fn fill_file(world: &mut WebStoryWorld, identity: String, file: String) -> PawlResult<()> {
    let path = std::env::current_dir()?.join(&file);
    if !path.is_file() {
        return Err(PawlError::assertion(format!(
            "File '{}' does not exist",
            path.display()
        )));
    }
    let page = world.pages().base().await?;
    let driver = page.driver();
    let locator = Locator::Id(identity.clone());
    let input = driver
        .find_elements(&locator)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| DriverError::NoSuchElement {
            locator: locator.to_string(),
        })?;

    if driver.is_displayed(&input).await? {
        driver.clear(&input).await?;
        return Ok(driver.upload_file(&input, &path).await?);
    }

    let script = hidden_file_script(&identity, &path)?;
    tracing::debug!(script = %script, "setting hidden file input");
    let _ = driver.execute_script(&script).await?;
    Ok(())
}

fn hidden_file_script(identity: &str, path: &Path) -> PawlResult<String> {
    let id = serde_json::to_string(identity)?;
    let value = serde_json::to_string(&path.display().to_string())?;
    Ok(format!(
        "const el = document.getElementById({id}); el.setAttribute(\"value\", {value}); \
         el.dispatchEvent(new Event(\"change\", {{ bubbles: false, cancelable: true }}));"
    ))
}

#[when(regex = r"^(?:I )?fill '([^']*)' with '([^']*)'$")]
pub async fn fill(world: &mut WebStoryWorld, identity: String, value: String) -> PawlResult<()> {
    let text = world.remembered_or_literal(&value);
    let page = world.pages().base().await?;
    page.visible_element(&identity).await?.fill_with(&text).await
}

#[when(regex = r"^(?:I )?select '([^']*)' with '([^']*)'$")]
pub async fn select(world: &mut WebStoryWorld, identity: String, value: String) -> PawlResult<()> {
    let page = world.pages().base().await?;
    page.visible_element(&identity)
        .await?
        .select_by_visible_text(&value)
        .await
}

#[when(regex = r"^I click on link '([^']*)'$")]
pub async fn click_on_link(world: &mut WebStoryWorld, href: String) -> PawlResult<()> {
    let page = world.pages().base().await?;
    let locator = Locator::XPath(format!(".//a[@href={}]", xpath_literal(&href)));
    page.find_by(locator).await?.click().await
}

#[when(regex = r"^I switch to new window$")]
pub async fn switch_to_new_window(world: &mut WebStoryWorld) -> PawlResult<()> {
    let page = world.pages().base().await?;
    let driver = page.driver();
    let current = driver.current_window().await?;
    let opened = driver.window_handles().await?;
    let other = opened.iter().find(|h| **h != current).cloned();
    let target = match other {
        Some(handle) if opened.len() > 1 => handle,
        _ => page.any_window_other_than(&opened).await?,
    };
    tracing::debug!(window = %target, "switching window");
    Ok(driver.switch_to_window(&target).await?)
}

#[when(regex = r"^I remember text from '([^']*)' to '([^']*)' variable$")]
pub async fn remember_text(world: &mut WebStoryWorld, identity: String, key: String) -> PawlResult<()> {
    let page = world.pages().base().await?;
    let text = page.visible_element(&identity).await?.text().await?;
    world.context_mut().remember(key, text);
    Ok(())
}

#[when(regex = r"^(?:I )?expire user session$")]
pub async fn expire_user_session(world: &mut WebStoryWorld) -> PawlResult<()> {
    let name = world
        .resources()
        .string_or(keys::USER_SESSION_COOKIE_NAME, DEFAULT_SESSION_COOKIE);
    let page = world.pages().base().await?;
    page.driver().delete_cookie(&name).await?;
    Ok(page.driver().refresh().await?)
}

#[when(regex = r"^(?:I )?reopen browser with cookies '([^']*)'$")]
pub async fn reopen_browser_with_cookies(world: &mut WebStoryWorld, names: String) -> PawlResult<()> {
    let names: Vec<&str> = names.split(',').map(str::trim).filter(|n| !n.is_empty()).collect();
    let page = world.pages().base().await?;
    let kept: Vec<_> = page
        .driver()
        .cookies()
        .await?
        .into_iter()
        .filter(|c| names.contains(&c.name.as_str()))
        .collect();

    let driver = world.pages().provider().restart().await?;
    for cookie in &kept {
        driver.add_cookie(cookie).await?;
    }
    tracing::info!(restored = kept.len(), "reopened browser");
    Ok(())
}

#[then(regex = r"^I get title '([^']*)'$")]
pub async fn verify_title(world: &mut WebStoryWorld, title: String) -> PawlResult<()> {
    let expected = world.resource_or_literal(&title);
    let page = world.pages().base().await?;
    let actual = page.driver().title().await?;
    if actual == expected {
        Ok(())
    } else {
        Err(PawlError::assertion(format!(
            "The page title should be as follow. Expected: '{expected}', but was: '{actual}'"
        )))
    }
}

#[then(regex = r"^(?:I get )?text '([^']*)'$")]
pub async fn verify_source(world: &mut WebStoryWorld, text: String) -> PawlResult<()> {
    let page = world.pages().base().await?;
    if page.driver().page_source().await?.contains(&text) {
        Ok(())
    } else {
        Err(PawlError::assertion(format!(
            "Page source should contains the text: '{text}'"
        )))
    }
}

#[then(regex = r"^(?:I get )?'([^']*)' element$")]
pub async fn verify_element(world: &mut WebStoryWorld, identity: String) -> PawlResult<()> {
    let page = world.pages().base().await?;
    page.visible_element(&identity)
        .await
        .map(|_| ())
        .map_err(|e| PawlError::assertion(format!("Page element should exists: '{identity}' ({e})")))
}

#[then(regex = r"^(?:I get )?no '([^']*)' element$")]
pub async fn verify_no_element(world: &mut WebStoryWorld, identity: String) -> PawlResult<()> {
    let page = world.pages().base().await?;
    let found = page.visible_elements(&identity).await?;
    if found.is_empty() {
        Ok(())
    } else {
        Err(PawlError::assertion(format!(
            "Page element should not exists: '{identity}' (found {})",
            found.len()
        )))
    }
}

#[then(regex = r"^(?:I get )?'([^']*)' link$")]
pub async fn verify_link(world: &mut WebStoryWorld, identity: String) -> PawlResult<()> {
    let page = world.pages().base().await?;
    let tag = page.visible_element(&identity).await?.tag_name().await?;
    if tag == "a" {
        Ok(())
    } else {
        Err(PawlError::assertion(format!(
            "Page element should exists: '{identity}' as a link, but was <{tag}>"
        )))
    }
}

#[then(regex = r"^(?:I get )?'([^']*)' with '([^']*)'$")]
pub async fn verify_element_text(
    world: &mut WebStoryWorld,
    identity: String,
    text: String,
) -> PawlResult<()> {
    let expected = world.remembered_or_literal(&text);
    let page = world.pages().base().await?;
    let actual = page.visible_element(&identity).await?.text().await?;
    if actual == expected {
        Ok(())
    } else {
        Err(PawlError::assertion(format!(
            "Page element '{identity}' should have text: '{expected}', but was: '{actual}'"
        )))
    }
}
