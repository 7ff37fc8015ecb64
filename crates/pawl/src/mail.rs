//! Test mail server.
//!
//! An in-process SMTP receiver that keeps every delivered message in
//! memory, plus the polling matchers the mail steps assert with. Only the
//! commands a mail client needs to deliver a message are understood
//! (`HELO`/`EHLO`, `MAIL`, `RCPT`, `DATA`, `RSET`, `NOOP`, `QUIT`); there is
//! no authentication, TLS or relaying.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use base64::Engine;
use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::resources::{keys, Resources};
use crate::result::{PawlError, PawlResult};
use crate::wait::{Attempt, WaitOptions, Waiter};

/// Conventional SMTP port of test mail servers
pub const DEFAULT_SMTP_PORT: u16 = 3025;

/// Default bind host
pub const DEFAULT_SMTP_HOST: &str = "127.0.0.1";

/// Where the server listens
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailServerConfig {
    /// Bind host
    pub host: String,
    /// Bind port; `0` picks a free one
    pub port: u16,
}

impl Default for MailServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_SMTP_HOST.to_string(),
            port: DEFAULT_SMTP_PORT,
        }
    }
}

impl MailServerConfig {
    /// Explicit host and port
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Loopback on a free port
    #[must_use]
    pub fn ephemeral() -> Self {
        Self::new(DEFAULT_SMTP_HOST, 0)
    }

    /// From `mail.smtp.host` and `mail.smtp.port`
    #[must_use]
    pub fn from_resources(resources: &Resources) -> Self {
        Self {
            host: resources.string_or(keys::MAIL_SMTP_HOST, DEFAULT_SMTP_HOST),
            port: resources
                .parsed(keys::MAIL_SMTP_PORT)
                .unwrap_or(DEFAULT_SMTP_PORT),
        }
    }

    /// `host:port`
    #[must_use]
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// A delivered message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    /// Envelope sender (`MAIL FROM`)
    pub from: String,
    /// Envelope recipients (`RCPT TO`)
    pub envelope_recipients: Vec<String>,
    /// Addresses of the `To` header
    pub to: Vec<String>,
    /// Decoded `Subject` header
    pub subject: String,
    /// Transfer-decoded body
    pub body: String,
    /// Message as received, dot-unstuffed
    pub raw: String,
}

impl ReceivedMessage {
    /// Parse the DATA section of a delivery
    #[must_use]
    pub fn parse(from: &str, envelope_recipients: Vec<String>, raw: String) -> Self {
        let (head, body) = split_head(&raw);
        let headers = parse_headers(head);
        let to = headers
            .get("to")
            .map(|value| split_addresses(value))
            .unwrap_or_default();
        let subject = headers
            .get("subject")
            .map(|s| decode_encoded_words(s))
            .unwrap_or_default();
        let encoding = headers
            .get("content-transfer-encoding")
            .map(|e| e.trim().to_ascii_lowercase())
            .unwrap_or_default();
        let multipart = headers
            .get("content-type")
            .is_some_and(|t| t.trim().to_ascii_lowercase().starts_with("multipart/"));
        let body = if multipart {
            body.to_string()
        } else {
            decode_body(body, &encoding)
        };
        Self {
            from: from.to_string(),
            envelope_recipients,
            to,
            subject,
            body,
            raw,
        }
    }

    /// True if `recipient` is one of the `To` addresses
    #[must_use]
    pub fn is_addressed_to(&self, recipient: &str) -> bool {
        let recipient = bare_address(recipient);
        self.to.iter().any(|a| a.eq_ignore_ascii_case(&recipient))
    }
}

/// Running SMTP receiver
#[derive(Debug)]
pub struct MailServer {
    addr: SocketAddr,
    messages: Arc<Mutex<Vec<ReceivedMessage>>>,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl MailServer {
    /// Bind and start accepting deliveries
    pub async fn start(config: &MailServerConfig) -> PawlResult<Self> {
        let listener = TcpListener::bind(config.addr())
            .await
            .map_err(|e| PawlError::MailServer {
                message: format!("cannot listen on {}: {e}", config.addr()),
            })?;
        let addr = listener.local_addr()?;
        let messages = Arc::new(Mutex::new(Vec::new()));
        let (shutdown, stop) = oneshot::channel();
        let task = tokio::spawn(accept_loop(listener, messages.clone(), stop));
        tracing::info!(%addr, "email test server started");
        Ok(Self {
            addr,
            messages,
            shutdown: Some(shutdown),
            task,
        })
    }

    /// Bound address
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Everything received so far, oldest first
    #[must_use]
    pub fn messages(&self) -> Vec<ReceivedMessage> {
        lock(&self.messages).clone()
    }

    /// Poll until a message to `recipient` with exactly `subject` arrives
    pub async fn wait_for_message(
        &self,
        recipient: &str,
        subject: &str,
        options: &WaitOptions,
    ) -> PawlResult<ReceivedMessage> {
        let waited_for = format!("email to '{recipient}' with subject '{subject}'");
        let found = Waiter::new(*options)
            .until(&waited_for, || {
                let found = lock(&self.messages)
                    .iter()
                    .find(|m| m.is_addressed_to(recipient) && m.subject == subject)
                    .cloned();
                async move { found.ok_or_else(|| Attempt::retry("no matching email")) }
            })
            .await;
        match found {
            Err(PawlError::Timeout { .. }) => Err(PawlError::MailNotFound {
                recipient: recipient.to_string(),
                subject: subject.to_string(),
                received: self.received_summary(),
            }),
            other => other,
        }
    }

    /// Poll until the most recent message has `subject`
    pub async fn wait_for_last_subject(
        &self,
        subject: &str,
        options: &WaitOptions,
    ) -> PawlResult<ReceivedMessage> {
        let found = Waiter::new(*options)
            .until(&format!("last email with subject '{subject}'"), || {
                let last = lock(&self.messages).last().cloned();
                async move {
                    match last {
                        Some(m) if m.subject == subject => Ok(m),
                        Some(m) => Err(Attempt::retry(format!("last subject was '{}'", m.subject))),
                        None => Err(Attempt::retry("no email received")),
                    }
                }
            })
            .await;
        match found {
            Err(PawlError::Timeout { .. }) => {
                let subjects: Vec<String> = self.messages().into_iter().map(|m| m.subject).collect();
                Err(PawlError::assertion(format!(
                    "Expected received message with subject - {subject}, but was [{}]",
                    subjects.join(", ")
                )))
            }
            other => other,
        }
    }

    fn received_summary(&self) -> String {
        let mut summary = String::new();
        for message in lock(&self.messages).iter() {
            for to in &message.to {
                summary.push_str(&format!("\nrecipient - {to}, subject - {}", message.subject));
            }
        }
        summary
    }

    /// Stop accepting connections
    pub async fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        let _ = (&mut self.task).await;
        tracing::info!(addr = %self.addr, "email test server stopped");
    }
}

impl Drop for MailServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn lock(messages: &Mutex<Vec<ReceivedMessage>>) -> MutexGuard<'_, Vec<ReceivedMessage>> {
    messages.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn accept_loop(
    listener: TcpListener,
    messages: Arc<Mutex<Vec<ReceivedMessage>>>,
    mut stop: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut stop => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let messages = messages.clone();
                    let _ = tokio::spawn(async move {
                        if let Err(e) = session(stream, messages).await {
                            tracing::debug!(%peer, error = %e, "smtp session ended with error");
                        }
                    });
                }
                Err(e) => tracing::warn!(error = %e, "smtp accept failed"),
            },
        }
    }
}

async fn session(
    stream: TcpStream,
    messages: Arc<Mutex<Vec<ReceivedMessage>>>,
) -> std::io::Result<()> {
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);
    write.write_all(b"220 pawl ESMTP test server\r\n").await?;

    let mut from = String::new();
    let mut recipients: Vec<String> = Vec::new();
    let mut line = Vec::new();
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            return Ok(());
        }
        let command = String::from_utf8_lossy(&line);
        let command = command.trim_end_matches(['\r', '\n']);
        let verb = command
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_ascii_uppercase();
        let reply = match verb.as_str() {
            "HELO" => "250 pawl\r\n",
            "EHLO" => "250-pawl\r\n250 8BITMIME\r\n",
            "MAIL" => {
                from = path_argument(command);
                recipients.clear();
                "250 OK\r\n"
            }
            "RCPT" => {
                recipients.push(path_argument(command));
                "250 OK\r\n"
            }
            "DATA" if recipients.is_empty() => "503 RCPT first\r\n",
            "DATA" => {
                write
                    .write_all(b"354 End data with <CR><LF>.<CR><LF>\r\n")
                    .await?;
                let raw = read_data(&mut reader).await?;
                let message = ReceivedMessage::parse(&from, std::mem::take(&mut recipients), raw);
                tracing::debug!(to = ?message.to, subject = %message.subject, "email received");
                lock(&messages).push(message);
                from.clear();
                "250 OK\r\n"
            }
            "RSET" => {
                from.clear();
                recipients.clear();
                "250 OK\r\n"
            }
            "NOOP" => "250 OK\r\n",
            "QUIT" => {
                write.write_all(b"221 Bye\r\n").await?;
                return Ok(());
            }
            _ => "502 Command not implemented\r\n",
        };
        write.write_all(reply.as_bytes()).await?;
    }
}

async fn read_data<R>(reader: &mut R) -> std::io::Result<String>
where
    R: AsyncBufReadExt + Unpin,
{
    let mut data = String::new();
    let mut line = Vec::new();
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed during DATA",
            ));
        }
        let text = String::from_utf8_lossy(&line);
        let text = text.trim_end_matches(['\r', '\n']);
        if text == "." {
            return Ok(data);
        }
        data.push_str(text.strip_prefix('.').unwrap_or(text));
        data.push('\n');
    }
}

/// `MAIL FROM:<a@x> SIZE=1` -> `a@x`
fn path_argument(command: &str) -> String {
    let Some((_, rest)) = command.split_once(':') else {
        return String::new();
    };
    let path = rest.trim().split_whitespace().next().unwrap_or_default();
    path.trim_start_matches('<').trim_end_matches('>').to_string()
}

fn split_head(raw: &str) -> (&str, &str) {
    if let Some(index) = raw.find("\n\n") {
        (&raw[..index], &raw[index + 2..])
    } else {
        (raw, "")
    }
}

fn parse_headers(head: &str) -> BTreeMap<String, String> {
    let mut headers: BTreeMap<String, String> = BTreeMap::new();
    let mut current: Option<String> = None;
    for line in head.lines() {
        if line.starts_with([' ', '\t']) {
            if let Some(value) = current.as_ref().and_then(|name| headers.get_mut(name)) {
                value.push(' ');
                value.push_str(line.trim());
            }
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            let name = name.trim().to_ascii_lowercase();
            let _ = headers.insert(name.clone(), value.trim().to_string());
            current = Some(name);
        }
    }
    headers
}

/// Addresses of an address-list header; commas inside quoted display names
/// and angle brackets do not separate
fn split_addresses(value: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    let mut escaped = false;
    let mut angle = false;
    for (i, c) in value.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if quoted => escaped = true,
            '"' => quoted = !quoted,
            '<' if !quoted => angle = true,
            '>' if !quoted => angle = false,
            ',' if !quoted && !angle => {
                parts.push(&value[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&value[start..]);
    parts
        .into_iter()
        .map(bare_address)
        .filter(|a| !a.is_empty())
        .collect()
}

/// `Ann <ann@x.test>` -> `ann@x.test`
fn bare_address(value: &str) -> String {
    let value = value.trim();
    match (value.rfind('<'), value.rfind('>')) {
        (Some(start), Some(end)) if start < end => value[start + 1..end].trim().to_string(),
        _ => value.to_string(),
    }
}

fn encoded_word() -> Option<&'static Regex> {
    static ENCODED_WORD: OnceLock<Option<Regex>> = OnceLock::new();
    ENCODED_WORD
        .get_or_init(|| Regex::new(r"=\?([^?]+)\?([BbQq])\?([^?]*)\?=").ok())
        .as_ref()
}

/// Decode RFC 2047 encoded words; whitespace between adjacent encoded
/// words is dropped.
#[must_use]
pub fn decode_encoded_words(value: &str) -> String {
    let Some(pattern) = encoded_word() else {
        return value.to_string();
    };
    let mut decoded = String::new();
    let mut last_end = 0;
    let mut previous_encoded = false;
    for captures in pattern.captures_iter(value) {
        let Some(whole) = captures.get(0) else {
            continue;
        };
        let gap = &value[last_end..whole.start()];
        if !(previous_encoded && gap.trim().is_empty()) {
            decoded.push_str(gap);
        }
        let text = &captures[3];
        let bytes = if captures[2].eq_ignore_ascii_case("b") {
            base64::engine::general_purpose::STANDARD
                .decode(text)
                .unwrap_or_else(|_| text.as_bytes().to_vec())
        } else {
            decode_quoted_printable(&text.replace('_', " "))
        };
        decoded.push_str(&String::from_utf8_lossy(&bytes));
        last_end = whole.end();
        previous_encoded = true;
    }
    decoded.push_str(&value[last_end..]);
    decoded
}

/// RFC 2047 `B` encoding for non-ASCII header values
#[must_use]
pub fn encode_header(value: &str) -> String {
    if value.is_ascii() {
        value.to_string()
    } else {
        format!(
            "=?UTF-8?B?{}?=",
            base64::engine::general_purpose::STANDARD.encode(value)
        )
    }
}

fn decode_body(body: &str, encoding: &str) -> String {
    match encoding {
        "base64" => {
            let compact: String = body.split_whitespace().collect();
            base64::engine::general_purpose::STANDARD
                .decode(compact)
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                .unwrap_or_else(|_| body.to_string())
        }
        "quoted-printable" => String::from_utf8_lossy(&decode_quoted_printable(body)).into_owned(),
        _ => body.to_string(),
    }
}

fn decode_quoted_printable(text: &str) -> Vec<u8> {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'=' {
            out.push(bytes[i]);
            i += 1;
            continue;
        }
        // soft line break
        if bytes.get(i + 1) == Some(&b'\n') {
            i += 2;
            continue;
        }
        if bytes.get(i + 1) == Some(&b'\r') && bytes.get(i + 2) == Some(&b'\n') {
            i += 3;
            continue;
        }
        let hex = bytes
            .get(i + 1..i + 3)
            .and_then(|h| std::str::from_utf8(h).ok())
            .and_then(|h| u8::from_str_radix(h, 16).ok());
        match hex {
            Some(byte) => {
                out.push(byte);
                i += 3;
            }
            None => {
                out.push(b'=');
                i += 1;
            }
        }
    }
    out
}

/// Deliver a plain text message over SMTP
pub async fn send_text_email(
    addr: &str,
    to: &str,
    from: &str,
    subject: &str,
    body: &str,
) -> PawlResult<()> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|e| PawlError::MailServer {
            message: format!("cannot connect to {addr}: {e}"),
        })?;
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);

    expect_reply(&mut reader, '2').await?;
    for (command, expected) in [
        ("HELO localhost".to_string(), '2'),
        (format!("MAIL FROM:<{}>", bare_address(from)), '2'),
        (format!("RCPT TO:<{}>", bare_address(to)), '2'),
        ("DATA".to_string(), '3'),
    ] {
        write.write_all(format!("{command}\r\n").as_bytes()).await?;
        expect_reply(&mut reader, expected).await?;
    }

    let mut data = format!(
        "From: {from}\r\nTo: {to}\r\nSubject: {}\r\nMIME-Version: 1.0\r\n\
         Content-Type: text/plain; charset=UTF-8\r\nContent-Transfer-Encoding: 8bit\r\n\r\n",
        encode_header(subject)
    );
    for line in body.lines() {
        if line.starts_with('.') {
            data.push('.');
        }
        data.push_str(line);
        data.push_str("\r\n");
    }
    data.push_str(".\r\n");
    write.write_all(data.as_bytes()).await?;
    expect_reply(&mut reader, '2').await?;

    write.write_all(b"QUIT\r\n").await?;
    let _ = expect_reply(&mut reader, '2').await;
    tracing::debug!(to, subject, "email sent");
    Ok(())
}

async fn expect_reply<R>(reader: &mut R, class: char) -> PawlResult<()>
where
    R: AsyncBufReadExt + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Err(PawlError::MailServer {
                message: "connection closed".to_string(),
            });
        }
        // `250-` continues a multi-line reply
        if line.as_bytes().get(3) != Some(&b'-') {
            break;
        }
    }
    if line.starts_with(class) {
        Ok(())
    } else {
        Err(PawlError::MailServer {
            message: format!("unexpected reply: {}", line.trim_end()),
        })
    }
}

fn html_tag() -> Option<&'static Regex> {
    static TAG: OnceLock<Option<Regex>> = OnceLock::new();
    TAG.get_or_init(|| Regex::new(r"<[A-Za-z][^>]*>").ok()).as_ref()
}

fn html_attribute() -> Option<&'static Regex> {
    static ATTRIBUTE: OnceLock<Option<Regex>> = OnceLock::new();
    ATTRIBUTE
        .get_or_init(|| {
            Regex::new(r#"([A-Za-z_:][-A-Za-z0-9_:.]*)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>]+))"#).ok()
        })
        .as_ref()
}

/// `href` of the element with `id` in an HTML body
#[must_use]
pub fn extract_link(html: &str, id: &str) -> Option<String> {
    let (tags, attributes) = (html_tag()?, html_attribute()?);
    tags.find_iter(html).find_map(|tag| {
        let mut element_id = None;
        let mut href = None;
        for captures in attributes.captures_iter(tag.as_str()) {
            let value = captures
                .get(2)
                .or_else(|| captures.get(3))
                .or_else(|| captures.get(4))
                .map(|m| unescape_html(m.as_str()));
            match captures[1].to_ascii_lowercase().as_str() {
                "id" => element_id = value,
                "href" => href = value,
                _ => {}
            }
        }
        if element_id.as_deref() == Some(id) {
            Some(href.unwrap_or_default())
        } else {
            None
        }
    })
}

fn unescape_html(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

/// Mail server shared by the scenarios of a run. Starting is idempotent.
#[derive(Debug, Clone, Default)]
pub struct MailSlot {
    server: Arc<tokio::sync::Mutex<Option<MailServer>>>,
}

impl MailSlot {
    /// Empty slot
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a server with `config` unless one is running
    pub async fn ensure_started(&self, config: &MailServerConfig) -> PawlResult<SocketAddr> {
        let mut server = self.server.lock().await;
        if let Some(running) = server.as_ref() {
            return Ok(running.local_addr());
        }
        let started = MailServer::start(config).await?;
        let addr = started.local_addr();
        *server = Some(started);
        Ok(addr)
    }

    /// True while a server is running
    pub async fn is_running(&self) -> bool {
        self.server.lock().await.is_some()
    }

    /// Address of the running server
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.server.lock().await.as_ref().map(MailServer::local_addr)
    }

    /// Messages received by the running server
    pub async fn messages(&self) -> PawlResult<Vec<ReceivedMessage>> {
        let server = self.server.lock().await;
        Ok(running(&server)?.messages())
    }

    /// See [`MailServer::wait_for_message`]
    pub async fn wait_for_message(
        &self,
        recipient: &str,
        subject: &str,
        options: &WaitOptions,
    ) -> PawlResult<ReceivedMessage> {
        let server = self.server.lock().await;
        running(&server)?
            .wait_for_message(recipient, subject, options)
            .await
    }

    /// See [`MailServer::wait_for_last_subject`]
    pub async fn wait_for_last_subject(
        &self,
        subject: &str,
        options: &WaitOptions,
    ) -> PawlResult<ReceivedMessage> {
        let server = self.server.lock().await;
        running(&server)?
            .wait_for_last_subject(subject, options)
            .await
    }

    /// Stop the running server, if any
    pub async fn stop(&self) {
        let server = self.server.lock().await.take();
        if let Some(server) = server {
            server.stop().await;
        }
    }
}

fn running(server: &Option<MailServer>) -> PawlResult<&MailServer> {
    server.as_ref().ok_or_else(|| PawlError::MailServer {
        message: "email test server is not started; add 'Given an email test server'".to_string(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    async fn server() -> MailServer {
        MailServer::start(&MailServerConfig::ephemeral()).await.unwrap()
    }

    mod server_tests {
        use super::*;

        #[tokio::test]
        async fn test_delayed_email_is_found() {
            let server = server().await;
            let addr = server.local_addr().to_string();
            let _ = tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(2)).await;
                send_text_email(&addr, "a@x.com", "shop@x.com", "hello", "Welcome aboard")
                    .await
                    .unwrap();
            });
            let started = Instant::now();
            let message = server
                .wait_for_message("a@x.com", "hello", &WaitOptions::new(5_000, 200))
                .await
                .unwrap();
            assert!(started.elapsed() >= Duration::from_secs(2));
            assert_eq!(message.body.trim_end(), "Welcome aboard");
            assert_eq!(message.from, "shop@x.com");
            server.stop().await;
        }

        #[tokio::test]
        async fn test_missing_email_lists_received() {
            let server = server().await;
            let addr = server.local_addr().to_string();
            send_text_email(&addr, "b@x.com", "shop@x.com", "bye", "-").await.unwrap();
            let err = server
                .wait_for_message("a@x.com", "hello", &WaitOptions::new(100, 20))
                .await
                .unwrap_err();
            let text = err.to_string();
            assert!(matches!(err, PawlError::MailNotFound { .. }));
            assert!(text.contains("recipient - b@x.com, subject - bye"), "{text}");
        }

        #[tokio::test]
        async fn test_last_subject() {
            let server = server().await;
            let addr = server.local_addr().to_string();
            send_text_email(&addr, "a@x.com", "s@x.com", "first", "1").await.unwrap();
            send_text_email(&addr, "a@x.com", "s@x.com", "second", "2").await.unwrap();
            let options = WaitOptions::new(200, 20);
            let last = server.wait_for_last_subject("second", &options).await.unwrap();
            assert_eq!(last.body.trim_end(), "2");
            let err = server.wait_for_last_subject("first", &options).await.unwrap_err();
            assert!(err.to_string().contains("[first, second]"));
        }

        #[tokio::test]
        async fn test_utf8_subject_and_dot_lines_survive() {
            let server = server().await;
            let addr = server.local_addr().to_string();
            send_text_email(&addr, "Ann <ann@x.com>", "s@x.com", "Привіт", "line\n.dot\nend")
                .await
                .unwrap();
            let message = server
                .wait_for_message("ann@x.com", "Привіт", &WaitOptions::new(1_000, 20))
                .await
                .unwrap();
            assert_eq!(message.body, "line\n.dot\nend\n");
            assert_eq!(message.envelope_recipients, vec!["ann@x.com".to_string()]);
        }

        #[tokio::test]
        async fn test_unknown_command_keeps_session() {
            let server = server().await;
            let stream = TcpStream::connect(server.local_addr()).await.unwrap();
            let (read, mut write) = stream.into_split();
            let mut reader = BufReader::new(read);
            expect_reply(&mut reader, '2').await.unwrap();
            write.write_all(b"VRFY someone\r\n").await.unwrap();
            assert!(expect_reply(&mut reader, '2').await.is_err());
            write.write_all(b"NOOP\r\n").await.unwrap();
            expect_reply(&mut reader, '2').await.unwrap();
        }
    }

    mod parse_tests {
        use super::*;

        #[test]
        fn test_headers_and_quoted_printable_body() {
            let raw = "To: Ann <ann@x.com>, bob@x.com\nSubject: =?UTF-8?Q?Caf=C3=A9_open?=\n\
                       Content-Transfer-Encoding: quoted-printable\n\nsoft=\nbreak =3D ok\n"
                .to_string();
            let message = ReceivedMessage::parse("s@x.com", vec![], raw);
            assert_eq!(message.to, vec!["ann@x.com", "bob@x.com"]);
            assert_eq!(message.subject, "Café open");
            assert_eq!(message.body, "softbreak = ok\n");
            assert!(message.is_addressed_to("BOB@x.com"));
        }

        #[test]
        fn test_quoted_display_name_with_comma() {
            let raw = "To: \"Doe, Jane\" <j@x.test>, \"O\\\"Neil, Pat\" <p@x.test>\n\nhi\n"
                .to_string();
            let message = ReceivedMessage::parse("s@x.com", vec![], raw);
            assert_eq!(message.to, vec!["j@x.test", "p@x.test"]);
            assert!(message.is_addressed_to("j@x.test"));
        }

        #[test]
        fn test_base64_body_and_folded_subject() {
            let raw = "Subject: =?UTF-8?B?SGVs?=\n =?UTF-8?B?bG8=?=\nContent-Transfer-Encoding: base64\n\naGk=\n"
                .to_string();
            let message = ReceivedMessage::parse("", vec![], raw);
            assert_eq!(message.subject, "Hello");
            assert_eq!(message.body, "hi");
        }

        #[test]
        fn test_plain_text_outside_encoded_words() {
            assert_eq!(decode_encoded_words("Re: =?utf-8?b?0KI=?= now"), "Re: Т now");
            assert_eq!(decode_encoded_words("plain"), "plain");
        }

        #[test]
        fn test_path_argument() {
            assert_eq!(path_argument("MAIL FROM:<a@x.com> SIZE=10"), "a@x.com");
            assert_eq!(path_argument("RCPT TO: <b@x.com>"), "b@x.com");
            assert_eq!(path_argument("MAIL"), "");
        }
    }

    mod link_tests {
        use super::*;

        #[test]
        fn test_extract_link_by_id() {
            let html = r#"<p>Hi</p><a class="btn" id="confirm" href="https://shop.test/c?t=1&amp;u=2">Confirm</a>
                          <a id='other' href='/x'>x</a>"#;
            assert_eq!(
                extract_link(html, "confirm").as_deref(),
                Some("https://shop.test/c?t=1&u=2")
            );
            assert_eq!(extract_link(html, "other").as_deref(), Some("/x"));
            assert_eq!(extract_link(html, "missing"), None);
        }
    }

    mod slot_tests {
        use super::*;

        #[tokio::test]
        async fn test_start_is_idempotent() {
            let slot = MailSlot::new();
            let first = slot.ensure_started(&MailServerConfig::ephemeral()).await.unwrap();
            let second = slot.ensure_started(&MailServerConfig::ephemeral()).await.unwrap();
            assert_eq!(first, second);
            assert!(slot.is_running().await);
            slot.stop().await;
            assert!(!slot.is_running().await);
        }

        #[tokio::test]
        async fn test_wait_without_server_fails() {
            let slot = MailSlot::new();
            let err = slot
                .wait_for_message("a@x.com", "s", &WaitOptions::new(10, 5))
                .await
                .unwrap_err();
            assert!(matches!(err, PawlError::MailServer { .. }));
        }

        #[test]
        fn test_config_from_resources() {
            let resources = Resources::new()
                .with_override(keys::MAIL_SMTP_HOST, "0.0.0.0")
                .with_override(keys::MAIL_SMTP_PORT, "2525");
            assert_eq!(MailServerConfig::from_resources(&resources).addr(), "0.0.0.0:2525");
        }
    }
}
