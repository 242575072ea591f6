//! Ways to put a rendered message on the wire.

use std::time::Duration;

use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;

use crate::config::SmtpConfig;

const RESEND_API_URL: &str = "https://api.resend.com/emails";

/// Port that speaks TLS from the first byte; every other port upgrades with STARTTLS.
const IMPLICIT_TLS_PORT: u16 = 465;

const SMTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MailError {
    /// Worth retrying: network trouble, 4xx SMTP replies, HTTP 429/5xx
    #[error("transient mail failure: {0}")]
    Transient(String),

    /// Retrying will not help: bad address, rejected credentials, 5xx SMTP replies
    #[error("permanent mail failure: {0}")]
    Permanent(String),
}

impl MailError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, MailError::Transient(_))
    }
}

/// A fully rendered message ready for a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundEmail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub text: String,
    pub html: String,
}

#[async_trait]
pub trait MailTransport: Send + Sync {
    fn name(&self) -> &'static str;

    /// Attempt delivery once. Retrying is the caller's job.
    async fn send(&self, email: &OutboundEmail) -> Result<(), MailError>;
}

// ============ SMTP ============

/// Authenticated SMTP over TLS.
///
/// Each `send` builds a new transport, so every attempt gets a new connection
/// and a half-broken session from a failed attempt is never reused.
pub struct SmtpMailer {
    config: SmtpConfig,
}

impl SmtpMailer {
    pub fn new(config: SmtpConfig) -> Self {
        Self { config }
    }

    fn build_transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>, MailError> {
        let builder = (if self.config.port == IMPLICIT_TLS_PORT {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&self.config.host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.config.host)
        })
        .map_err(|e| MailError::Permanent(format!("invalid SMTP relay {}: {}", self.config.host, e)))?;

        Ok(builder
            .port(self.config.port)
            .credentials(Credentials::new(
                self.config.username.clone(),
                self.config.password.clone(),
            ))
            .timeout(Some(SMTP_TIMEOUT))
            .build())
    }

    fn build_message(email: &OutboundEmail) -> Result<Message, MailError> {
        let from: Mailbox = email
            .from
            .parse()
            .map_err(|e| MailError::Permanent(format!("invalid sender address: {}", e)))?;
        let to: Mailbox = email
            .to
            .parse()
            .map_err(|e| MailError::Permanent(format!("invalid recipient address: {}", e)))?;

        Message::builder()
            .from(from)
            .to(to)
            .subject(email.subject.as_str())
            .multipart(MultiPart::alternative_plain_html(
                email.text.clone(),
                email.html.clone(),
            ))
            .map_err(|e| MailError::Permanent(format!("failed to build message: {}", e)))
    }
}

#[async_trait]
impl MailTransport for SmtpMailer {
    fn name(&self) -> &'static str {
        "smtp"
    }

    async fn send(&self, email: &OutboundEmail) -> Result<(), MailError> {
        let message = Self::build_message(email)?;
        let transport = self.build_transport()?;

        tracing::debug!(
            host = %self.config.host,
            port = self.config.port,
            to = %email.to,
            "Sending email over SMTP"
        );

        transport.send(message).await.map(|_| ()).map_err(|e| {
            if e.is_permanent() {
                MailError::Permanent(e.to_string())
            } else {
                MailError::Transient(e.to_string())
            }
        })
    }
}

// ============ Resend ============

#[derive(Debug, Serialize)]
struct ResendEmailRequest<'a> {
    from: &'a str,
    to: Vec<&'a str>,
    subject: &'a str,
    text: &'a str,
    html: &'a str,
}

/// Resend HTTP API.
#[derive(Clone)]
pub struct ResendMailer {
    api_key: String,
    endpoint: String,
    http_client: Client,
}

impl ResendMailer {
    pub fn new(api_key: String) -> Self {
        Self::with_endpoint(api_key, RESEND_API_URL.to_string())
    }

    /// Point at a different API base (used by tests).
    pub fn with_endpoint(api_key: String, endpoint: String) -> Self {
        Self {
            api_key,
            endpoint,
            http_client: Client::new(),
        }
    }
}

#[async_trait]
impl MailTransport for ResendMailer {
    fn name(&self) -> &'static str {
        "resend"
    }

    async fn send(&self, email: &OutboundEmail) -> Result<(), MailError> {
        let request = ResendEmailRequest {
            from: &email.from,
            to: vec![&email.to],
            subject: &email.subject,
            text: &email.text,
            html: &email.html,
        };

        let response = self
            .http_client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                // Network errors are transient
                MailError::Transient(format!("Resend request failed: {}", e))
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        let message = format!("Resend API returned {}: {}", status, body);

        if status.as_u16() == 429 || status.is_server_error() {
            tracing::warn!(status = %status, body = %body, "Resend API returned transient error");
            Err(MailError::Transient(message))
        } else {
            tracing::error!(status = %status, body = %body, "Resend API returned non-transient error");
            Err(MailError::Permanent(message))
        }
    }
}

// ============ Log only ============

/// Logs messages instead of sending them (development).
#[derive(Debug, Clone, Copy, Default)]
pub struct LogMailer;

#[async_trait]
impl MailTransport for LogMailer {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn send(&self, email: &OutboundEmail) -> Result<(), MailError> {
        tracing::info!(
            to = %email.to,
            subject = %email.subject,
            "Email delivery disabled, logging message instead"
        );
        tracing::debug!(body = %email.text, "Unsent message body");
        Ok(())
    }
}
