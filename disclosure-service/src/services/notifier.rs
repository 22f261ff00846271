//! Outbound notifications: one-time codes and activation confirmations.

use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Attachment, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use reqwest::Client;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

use crate::config::{NotificationConfig, SmsGatewayConfig, SmtpConfig};
use crate::models::ContactChannel;
use crate::services::metrics::record_notification;
use crate::services::ServiceError;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Channel not configured: {0}")]
    NotConfigured(String),

    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),

    #[error("Send failed: {0}")]
    SendFailed(String),
}

impl From<DispatchError> for ServiceError {
    fn from(err: DispatchError) -> Self {
        ServiceError::DependencyFailure(err.to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Recipients {
    pub email: Option<String>,
    pub phone: Option<String>,
    /// Blind-copied on email only.
    pub cc: Vec<String>,
}

/// A durable document attached to an email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentAttachment {
    pub filename: String,
    pub content_type: String,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationPayload {
    pub subject: String,
    pub body: String,
    /// Short form used for SMS.
    pub sms_text: String,
    pub attachment: Option<DocumentAttachment>,
}

#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn send(
        &self,
        channel: ContactChannel,
        recipients: &Recipients,
        payload: &NotificationPayload,
    ) -> Result<(), DispatchError>;
}

/// SMTP for email and an HTTP gateway for SMS. Unconfigured channels fail.
pub struct ChannelDispatcher {
    email: Option<SmtpMailer>,
    sms: Option<SmsGateway>,
}

impl ChannelDispatcher {
    pub fn new(config: &NotificationConfig) -> Result<Self, DispatchError> {
        let email = config.smtp.clone().map(SmtpMailer::new).transpose()?;
        let sms = config.sms.clone().map(SmsGateway::new).transpose()?;
        Ok(Self { email, sms })
    }
}

#[async_trait]
impl NotificationDispatcher for ChannelDispatcher {
    async fn send(
        &self,
        channel: ContactChannel,
        recipients: &Recipients,
        payload: &NotificationPayload,
    ) -> Result<(), DispatchError> {
        if channel.includes_email() {
            let result = match &self.email {
                Some(mailer) => mailer.send(recipients, payload).await,
                None => Err(DispatchError::NotConfigured("email".to_string())),
            };
            record_notification("email", if result.is_ok() { "sent" } else { "failed" });
            result?;
        }

        if channel.includes_sms() {
            let result = match &self.sms {
                Some(gateway) => gateway.send(recipients, payload).await,
                None => Err(DispatchError::NotConfigured("sms".to_string())),
            };
            record_notification("sms", if result.is_ok() { "sent" } else { "failed" });
            result?;
        }

        Ok(())
    }
}

struct SmtpMailer {
    config: SmtpConfig,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
    fn new(config: SmtpConfig) -> Result<Self, DispatchError> {
        let creds = Credentials::new(config.user.clone(), config.password.clone());

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .map_err(|e| DispatchError::NotConfigured(format!("Failed to create SMTP relay: {}", e)))?
            .port(config.port)
            .credentials(creds)
            .timeout(Some(Duration::from_secs(10)))
            .build();

        Ok(Self { config, transport })
    }

    async fn send(
        &self,
        recipients: &Recipients,
        payload: &NotificationPayload,
    ) -> Result<(), DispatchError> {
        let to = recipients
            .email
            .as_deref()
            .ok_or_else(|| DispatchError::InvalidRecipient("no email address".to_string()))?;

        let from: Mailbox = format!("{} <{}>", self.config.from_name, self.config.from_email)
            .parse()
            .map_err(|e| DispatchError::NotConfigured(format!("Invalid from address: {}", e)))?;
        let to: Mailbox = to
            .parse()
            .map_err(|e| DispatchError::InvalidRecipient(format!("{}", e)))?;

        let mut builder = Message::builder().from(from).to(to).subject(&payload.subject);
        for cc in &recipients.cc {
            let cc: Mailbox = cc
                .parse()
                .map_err(|e| DispatchError::InvalidRecipient(format!("cc {}: {}", cc, e)))?;
            builder = builder.bcc(cc);
        }

        let text = SinglePart::builder()
            .header(ContentType::TEXT_PLAIN)
            .body(payload.body.clone());

        let message = match &payload.attachment {
            Some(doc) => {
                let content_type = ContentType::parse(&doc.content_type)
                    .map_err(|e| DispatchError::SendFailed(format!("Bad content type: {}", e)))?;
                builder.multipart(
                    MultiPart::mixed().singlepart(text).singlepart(
                        Attachment::new(doc.filename.clone()).body(doc.body.clone(), content_type),
                    ),
                )
            }
            None => builder.singlepart(text),
        }
        .map_err(|e| DispatchError::SendFailed(format!("Failed to build message: {}", e)))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| DispatchError::SendFailed(format!("Failed to send email: {}", e)))?;

        tracing::info!(subject = %payload.subject, "Email sent successfully");
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct SmsRequest<'a> {
    sender: &'a str,
    to: &'a str,
    message: &'a str,
}

struct SmsGateway {
    config: SmsGatewayConfig,
    client: Client,
}

impl SmsGateway {
    fn new(config: SmsGatewayConfig) -> Result<Self, DispatchError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| DispatchError::NotConfigured(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { config, client })
    }

    async fn send(
        &self,
        recipients: &Recipients,
        payload: &NotificationPayload,
    ) -> Result<(), DispatchError> {
        let phone = recipients
            .phone
            .as_deref()
            .ok_or_else(|| DispatchError::InvalidRecipient("no phone number".to_string()))?;

        // Keep digits and a leading plus only
        let normalized: String = phone
            .chars()
            .filter(|c| c.is_ascii_digit() || *c == '+')
            .collect();

        let request = SmsRequest {
            sender: &self.config.sender_id,
            to: &normalized,
            message: &payload.sms_text,
        };

        let response = self
            .client
            .post(&self.config.url)
            .header("authkey", &self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| DispatchError::SendFailed(format!("Failed to reach SMS gateway: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(DispatchError::SendFailed(format!(
                "SMS gateway returned {}: {}",
                status, body
            )));
        }

        tracing::info!("SMS sent successfully");
        Ok(())
    }
}

/// One captured dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentNotification {
    pub channel: ContactChannel,
    pub recipients: Recipients,
    pub payload: NotificationPayload,
}

/// Captures every message instead of sending it. Used in tests and local runs.
#[derive(Default)]
pub struct RecordingDispatcher {
    sent: Mutex<Vec<SentNotification>>,
    failing: AtomicBool,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every send fails and nothing is recorded.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<SentNotification> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }

    pub fn last(&self) -> Option<SentNotification> {
        self.sent().pop()
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingDispatcher {
    async fn send(
        &self,
        channel: ContactChannel,
        recipients: &Recipients,
        payload: &NotificationPayload,
    ) -> Result<(), DispatchError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(DispatchError::SendFailed("recording dispatcher set to fail".to_string()));
        }

        tracing::info!(channel = %channel, subject = %payload.subject, "[RECORDED] Notification");

        if let Ok(mut sent) = self.sent.lock() {
            sent.push(SentNotification {
                channel,
                recipients: recipients.clone(),
                payload: payload.clone(),
            });
        }
        Ok(())
    }
}
