//! Buyer notifications: license delivery and out-of-stock notices.
//!
//! Sending never fails from the caller's point of view. By the time a license
//! email goes out its keys are already gone from inventory, so when every
//! attempt fails the message is appended to a local JSON-lines file that holds
//! everything needed to resend it by hand.

mod templates;
mod transport;

pub use templates::{Rendered, render_license, render_out_of_stock};
pub use transport::{LogMailer, MailError, MailTransport, OutboundEmail, ResendMailer, SmtpMailer};

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::retry::RetryPolicy;

/// License delivery for one category group of an order.
#[derive(Debug, Clone)]
pub struct LicenseEmail {
    pub to: String,
    pub order_number: String,
    pub product_name: String,
    pub category: String,
    pub keys: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct OutOfStockEmail {
    pub to: String,
    pub order_number: String,
    pub product_name: String,
    pub category: String,
}

/// What happened to a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Sent { attempts: u32 },
    /// Every attempt failed; the message was written to the failed-send log
    RecordedForManualResend { attempts: u32 },
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    License,
    OutOfStock,
}

/// One line of the failed-send log.
#[derive(Debug, Serialize)]
pub struct FailedSend<'a> {
    pub kind: NotificationKind,
    pub to: &'a str,
    pub subject: &'a str,
    pub order_number: &'a str,
    pub product_name: &'a str,
    pub category: &'a str,
    pub keys: &'a [String],
    pub body_text: &'a str,
    pub attempts: u32,
    pub last_error: String,
    pub failed_at: String,
}

/// Append-only JSON-lines file of messages that could not be sent.
pub struct FailedSendLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FailedSendLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    async fn append(&self, entry: &FailedSend<'_>) -> std::io::Result<()> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.sync_data().await
    }
}

/// Renders and sends buyer notifications with retry and fallback recording.
pub struct Notifier {
    transport: Arc<dyn MailTransport>,
    from_email: String,
    shop_domain: Option<String>,
    retry: RetryPolicy,
    failed_log: FailedSendLog,
}

impl Notifier {
    pub fn new(
        transport: Arc<dyn MailTransport>,
        from_email: String,
        shop_domain: Option<String>,
        retry: RetryPolicy,
        failed_log: FailedSendLog,
    ) -> Self {
        Self {
            transport,
            from_email,
            shop_domain,
            retry,
            failed_log,
        }
    }

    pub async fn send_license(&self, msg: &LicenseEmail) -> DeliveryStatus {
        let rendered = render_license(msg, self.shop_domain.as_deref());
        let status = self
            .deliver(
                NotificationKind::License,
                &msg.to,
                &msg.order_number,
                &msg.product_name,
                &msg.category,
                &msg.keys,
                rendered,
            )
            .await;

        if let DeliveryStatus::Sent { attempts } = status {
            tracing::info!(
                order = %msg.order_number,
                category = %msg.category,
                keys = msg.keys.len(),
                attempts,
                "License email sent"
            );
        }
        status
    }

    pub async fn send_out_of_stock(&self, msg: &OutOfStockEmail) -> DeliveryStatus {
        let rendered = render_out_of_stock(msg, self.shop_domain.as_deref());
        let status = self
            .deliver(
                NotificationKind::OutOfStock,
                &msg.to,
                &msg.order_number,
                &msg.product_name,
                &msg.category,
                &[],
                rendered,
            )
            .await;

        if let DeliveryStatus::Sent { attempts } = status {
            tracing::info!(
                order = %msg.order_number,
                category = %msg.category,
                attempts,
                "Out-of-stock email sent"
            );
        }
        status
    }

    #[allow(clippy::too_many_arguments)]
    async fn deliver(
        &self,
        kind: NotificationKind,
        to: &str,
        order_number: &str,
        product_name: &str,
        category: &str,
        keys: &[String],
        rendered: Rendered,
    ) -> DeliveryStatus {
        let email = OutboundEmail {
            from: self.from_email.clone(),
            to: to.to_string(),
            subject: rendered.subject,
            text: rendered.text,
            html: rendered.html,
        };

        let result = self
            .retry
            .run(|_| self.transport.send(&email), MailError::is_retryable)
            .await;

        let failure = match result {
            Ok(((), attempts)) => return DeliveryStatus::Sent { attempts },
            Err(failure) => failure,
        };

        let entry = FailedSend {
            kind,
            to,
            subject: &email.subject,
            order_number,
            product_name,
            category,
            keys,
            body_text: &email.text,
            attempts: failure.attempts,
            last_error: failure.last_error.to_string(),
            failed_at: chrono::Utc::now().to_rfc3339(),
        };

        tracing::error!(
            transport = self.transport.name(),
            order = %order_number,
            category = %category,
            to = %to,
            keys = keys.len(),
            attempts = failure.attempts,
            error = %failure.last_error,
            log = %self.failed_log.path().display(),
            "Email delivery failed, recording message for manual resend"
        );

        if let Err(e) = self.failed_log.append(&entry).await {
            // Last resort: the tracing event carries the keys so they are not lost
            tracing::error!(
                error = %e,
                order = %order_number,
                keys = ?keys,
                "Failed to write failed-send log"
            );
        }

        DeliveryStatus::RecordedForManualResend {
            attempts: failure.attempts,
        }
    }
}
