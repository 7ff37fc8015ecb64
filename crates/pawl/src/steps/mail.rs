//! Mail steps over the run's test SMTP server.

use cucumber::{given, then, when};

use super::WebStoryWorld;
use crate::context::FOUND_EMAIL_BODY;
use crate::mail::{extract_link, MailServerConfig};
use crate::result::{PawlError, PawlResult};

#[given(regex = r"^an email test server$")]
pub async fn start_email_test_server(world: &mut WebStoryWorld) -> PawlResult<()> {
    let config = MailServerConfig::from_resources(world.resources());
    let addr = world.mail().ensure_started(&config).await?;
    tracing::debug!(%addr, "email test server ready");
    Ok(())
}

#[then(regex = r"^(?:I get email|mail) with parameters '([^']*)' and '([^']*)'$")]
pub async fn verify_email(
    world: &mut WebStoryWorld,
    recipient: String,
    subject: String,
) -> PawlResult<()> {
    let recipient = world.resource_or_literal(&recipient);
    let subject = world.resource_or_literal(&subject);
    let options = world.resources().wait_options();
    let message = world
        .mail()
        .wait_for_message(&recipient, &subject, &options)
        .await?;
    world.context_mut().remember(FOUND_EMAIL_BODY, message.body);
    Ok(())
}

#[then(regex = r"^I get last email with subject '([^']*)'$")]
pub async fn verify_last_email_subject(world: &mut WebStoryWorld, subject: String) -> PawlResult<()> {
    let subject = world.resource_or_literal(&subject);
    let options = world.resources().wait_options();
    let _ = world.mail().wait_for_last_subject(&subject, &options).await?;
    Ok(())
}

#[when(regex = r"^I remember email link from '([^']*)' to '([^']*)' variable$")]
pub async fn remember_email_link(
    world: &mut WebStoryWorld,
    identity: String,
    key: String,
) -> PawlResult<()> {
    let body = world.context().get(FOUND_EMAIL_BODY).ok_or_else(|| {
        PawlError::assertion("no email found yet; check an email with parameters first")
    })?;
    let href = extract_link(body, &identity).ok_or_else(|| {
        PawlError::assertion(format!("Email should contain a link with id '{identity}'"))
    })?;
    world.context_mut().remember(key, href);
    Ok(())
}
