use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use mailparse::{parse_mail, MailHeaderMap, ParsedMail};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::MailSettings;

const IO_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct MailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub imap_host: String,
    pub imap_port: u16,
    pub username: String,
    pub password: String,
}

impl MailConfig {
    pub fn from_password_file(settings: &MailSettings) -> Result<Self> {
        let username = settings
            .username
            .clone()
            .ok_or_else(|| anyhow!("MAIL_USERNAME is not set"))?;
        let password_file = settings
            .password_file
            .as_ref()
            .ok_or_else(|| anyhow!("MAIL_PASSWORD_FILE is not set"))?;
        let password = fs::read_to_string(password_file)
            .with_context(|| format!("Failed to read password file: {:?}", password_file))?;
        Ok(Self {
            smtp_host: settings.smtp_host.clone(),
            smtp_port: settings.smtp_port,
            imap_host: settings.imap_host.clone(),
            imap_port: settings.imap_port,
            username,
            password: password.trim().to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileAttachment {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl FileAttachment {
    pub fn read(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).with_context(|| format!("Failed to read attachment {:?}", path))?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "attachment".to_string());
        Ok(Self { filename, bytes })
    }

    fn content_type(&self) -> &'static str {
        let lower = self.filename.to_lowercase();
        if lower.ends_with(".pdf") {
            "application/pdf"
        } else if lower.ends_with(".txt") || lower.ends_with(".md") {
            "text/plain"
        } else if lower.ends_with(".docx") {
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        } else {
            "application/octet-stream"
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMessage {
    pub to: String,
    pub from_name: String,
    pub from_address: String,
    pub subject: String,
    pub body: String,
    pub attachment: Option<FileAttachment>,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransportError {
    #[error("invalid address '{0}'")]
    InvalidAddress(String),

    #[error("could not build message: {0}")]
    Build(String),

    #[error("server rejected the message: {0}")]
    Rejected(String),

    #[error("connection failed: {0}")]
    Connection(String),
}

pub trait MailTransport {
    fn deliver(&self, message: &OutgoingMessage) -> Result<(), TransportError>;
}

pub struct SmtpMailer {
    transport: SmtpTransport,
}

impl SmtpMailer {
    /// Implicit TLS on 465; STARTTLS on any other port.
    pub fn new(config: &MailConfig) -> Result<Self> {
        let builder = if config.smtp_port == 465 {
            SmtpTransport::relay(&config.smtp_host)
        } else {
            SmtpTransport::starttls_relay(&config.smtp_host)
        }
        .with_context(|| format!("Invalid SMTP host {}", config.smtp_host))?;

        let transport = builder
            .port(config.smtp_port)
            .credentials(Credentials::new(config.username.clone(), config.password.clone()))
            .timeout(Some(IO_TIMEOUT))
            .build();
        Ok(Self { transport })
    }
}

impl MailTransport for SmtpMailer {
    fn deliver(&self, message: &OutgoingMessage) -> Result<(), TransportError> {
        let email = build_message(message)?;
        match self.transport.send(&email) {
            Ok(response) => {
                debug!(to = %message.to, code = %response.code(), "SMTP accepted message");
                Ok(())
            }
            Err(e) if e.is_permanent() => Err(TransportError::Rejected(e.to_string())),
            Err(e) => Err(TransportError::Connection(e.to_string())),
        }
    }
}

pub fn build_message(message: &OutgoingMessage) -> Result<Message, TransportError> {
    let from_address = message
        .from_address
        .parse()
        .map_err(|_| TransportError::InvalidAddress(message.from_address.clone()))?;
    let to_address = message
        .to
        .parse()
        .map_err(|_| TransportError::InvalidAddress(message.to.clone()))?;
    let from_name = Some(message.from_name.trim().to_string()).filter(|n| !n.is_empty());

    let builder = Message::builder()
        .from(Mailbox::new(from_name, from_address))
        .to(Mailbox::new(None, to_address))
        .subject(message.subject.clone());

    let text = SinglePart::plain(message.body.clone());
    let built = match &message.attachment {
        Some(file) => {
            let content_type = ContentType::parse(file.content_type())
                .map_err(|e| TransportError::Build(e.to_string()))?;
            let part = Attachment::new(file.filename.clone()).body(file.bytes.clone(), content_type);
            builder.multipart(MultiPart::mixed().singlepart(text).singlepart(part))
        }
        None => builder.singlepart(text),
    };
    built.map_err(|e| TransportError::Build(e.to_string()))
}

/// Reports addresses named in delivery failure notices.
pub trait BounceScanner {
    fn bounced_since(&self, since: DateTime<Utc>) -> Result<HashSet<String>>;
}

pub struct ImapBounceScanner {
    config: MailConfig,
}

impl ImapBounceScanner {
    pub fn new(config: MailConfig) -> Self {
        Self { config }
    }
}

impl BounceScanner for ImapBounceScanner {
    fn bounced_since(&self, since: DateTime<Utc>) -> Result<HashSet<String>> {
        let tls = native_tls::TlsConnector::builder().build()?;

        let addr = (self.config.imap_host.as_str(), self.config.imap_port);
        let tcp = std::net::TcpStream::connect(addr).context("Failed to connect to IMAP server")?;
        tcp.set_read_timeout(Some(IO_TIMEOUT))?;
        tcp.set_write_timeout(Some(IO_TIMEOUT))?;
        let tls_stream = tls.connect(&self.config.imap_host, tcp)?;

        let client = imap::Client::new(tls_stream);
        let mut session = client
            .login(&self.config.username, &self.config.password)
            .map_err(|e| anyhow!("Login failed: {}", e.0))?;

        session.select("INBOX")?;

        // SINCE only has day granularity; the Date header narrows it down.
        let date_str = since.format("%d-%b-%Y").to_string();
        let queries = [
            format!("FROM \"mailer-daemon\" SINCE {}", date_str),
            format!("FROM \"postmaster\" SINCE {}", date_str),
        ];

        let mut bounced = HashSet::new();
        let mut seen = HashSet::new();
        for query in &queries {
            let ids = match session.search(query) {
                Ok(ids) => ids,
                Err(e) => {
                    warn!(query = %query, error = %e, "IMAP search failed");
                    continue;
                }
            };

            for id in ids.into_iter().filter(|id| seen.insert(*id)) {
                let messages = session.fetch(id.to_string(), "RFC822")?;
                for message in messages.iter() {
                    let Some(raw) = message.body() else {
                        continue;
                    };
                    match bounce_recipients(raw, since) {
                        Ok(addresses) => bounced.extend(addresses),
                        Err(e) => warn!(error = %e, "Unreadable bounce notice"),
                    }
                }
            }
        }

        session.logout()?;
        info!(count = bounced.len(), since = %since, "Bounce scan complete");
        Ok(bounced)
    }
}

/// Failed recipients of one notice, or nothing if it predates `since`.
pub fn bounce_recipients(raw: &[u8], since: DateTime<Utc>) -> Result<Vec<String>> {
    let parsed = parse_mail(raw)?;
    if let Some(date) = parsed.headers.get_first_value("Date") {
        if let Ok(epoch) = mailparse::dateparse(&date) {
            if epoch < since.timestamp() {
                return Ok(Vec::new());
            }
        }
    }
    Ok(failed_recipients(&parsed))
}

/// X-Failed-Recipients first, then DSN recipient fields, then the To header of
/// the returned original message. The notice's own To header is the sender.
pub fn failed_recipients(parsed: &ParsedMail) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();

    if let Some(header) = parsed.headers.get_first_value("X-Failed-Recipients") {
        for addr in header.split(',').filter_map(normalize_address) {
            push_unique(&mut found, addr);
        }
    }

    let mut parts = Vec::new();
    collect_parts(parsed, &mut parts);
    if found.is_empty() {
        for part in &parts {
            let text = String::from_utf8_lossy(&part.get_body_raw().unwrap_or_default()).into_owned();
            for addr in dsn_recipients(&text) {
                push_unique(&mut found, addr);
            }
        }
    }
    if found.is_empty() {
        for part in parts.iter().filter(|p| is_returned_message(p)) {
            let body = part.get_body_raw().unwrap_or_default();
            let Ok(original) = parse_mail(&body) else { continue };
            if let Some(to) = original.headers.get_first_value("To") {
                for addr in to.split(',').filter_map(normalize_address) {
                    push_unique(&mut found, addr);
                }
            }
        }
    }
    found
}

fn push_unique(found: &mut Vec<String>, addr: String) {
    if !found.contains(&addr) {
        found.push(addr);
    }
}

fn is_returned_message(part: &ParsedMail) -> bool {
    matches!(
        part.ctype.mimetype.to_lowercase().as_str(),
        "message/rfc822" | "text/rfc822-headers"
    )
}

fn collect_parts<'m, 'a>(mail: &'m ParsedMail<'a>, out: &mut Vec<&'m ParsedMail<'a>>) {
    out.push(mail);
    for sub in &mail.subparts {
        collect_parts(sub, out);
    }
}

fn dsn_recipients(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| {
            let (field, value) = line.split_once(':')?;
            let field = field.trim().to_lowercase();
            if field != "final-recipient" && field != "original-recipient" {
                return None;
            }
            let value = value.split_once(';').map(|(_, v)| v).unwrap_or(value);
            normalize_address(value)
        })
        .collect()
}

fn normalize_address(value: &str) -> Option<String> {
    let value = value.trim();
    let inner = match (value.find('<'), value.rfind('>')) {
        (Some(start), Some(end)) if start < end => &value[start + 1..end],
        _ => value,
    };
    let addr = inner.trim().to_lowercase();
    (addr.contains('@') && !addr.contains(char::is_whitespace)).then_some(addr)
}
