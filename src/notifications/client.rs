use std::time::Duration;

use clap::ValueEnum;
use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{error, info};

use crate::util::env::{env_opt, env_parse};

pub const DEFAULT_BASE_URL: &str = "https://notifications.statex.cz";
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;
const EMAIL_PROVIDER: &str = "ses";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationConfig {
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl NotificationConfig {
    /// NOTIFICATION_SERVICE_URL and NOTIFICATION_SERVICE_TIMEOUT (seconds).
    pub fn from_env() -> Self {
        Self {
            base_url: env_opt("NOTIFICATION_SERVICE_URL")
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            timeout: Duration::from_secs(env_parse(
                "NOTIFICATION_SERVICE_TIMEOUT",
                DEFAULT_TIMEOUT_SECS,
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    Telegram,
    Whatsapp,
}

/// Body of `POST /notifications/send`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRequest {
    pub channel: Channel,
    #[serde(rename = "type")]
    pub notification_type: String,
    pub recipient: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<String>>,
}

fn non_empty(data: Option<Value>) -> Option<Value> {
    data.filter(|v| match v {
        Value::Null => false,
        Value::Object(m) => !m.is_empty(),
        _ => true,
    })
}

impl NotificationRequest {
    /// Custom email through SES; template data is always sent, `{}` when absent.
    pub fn email(
        to: &str,
        subject: &str,
        message: &str,
        template_data: Option<Value>,
        attachments: Vec<String>,
    ) -> Self {
        Self {
            channel: Channel::Email,
            notification_type: "custom".to_string(),
            recipient: to.to_string(),
            subject: Some(subject.to_string()),
            message: message.to_string(),
            template_data: Some(template_data.unwrap_or_else(|| json!({}))),
            email_provider: Some(EMAIL_PROVIDER.to_string()),
            attachments: (!attachments.is_empty()).then_some(attachments),
        }
    }

    pub fn notification(
        channel: Channel,
        recipient: &str,
        message: &str,
        subject: Option<&str>,
        notification_type: Option<&str>,
        template_data: Option<Value>,
    ) -> Self {
        Self {
            channel,
            notification_type: notification_type.unwrap_or("custom").to_string(),
            recipient: recipient.to_string(),
            subject: subject.filter(|s| !s.is_empty()).map(str::to_string),
            message: message.to_string(),
            template_data: non_empty(template_data),
            email_provider: (channel == Channel::Email).then(|| EMAIL_PROVIDER.to_string()),
            attachments: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("notification service request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("notification service returned {status}: {body}")]
    Status { status: u16, body: String },
}

/// Client for the notification microservice. Construct once and pass it where needed.
#[derive(Debug, Clone)]
pub struct NotificationClient {
    base_url: String,
    http: Client,
}

impl NotificationClient {
    pub fn new(config: NotificationConfig) -> Result<Self, NotificationError> {
        let http = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    pub async fn send(&self, request: &NotificationRequest) -> Result<Value, NotificationError> {
        let url = format!("{}/notifications/send", self.base_url);
        let resp = match self.http.post(&url).json(request).send().await {
            Ok(r) => r,
            Err(e) => {
                error!(recipient = %request.recipient, error = %e, "notification request failed");
                return Err(e.into());
            }
        };
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            error!(recipient = %request.recipient, status = status.as_u16(), "notification rejected");
            return Err(NotificationError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let payload = resp.json::<Value>().await?;
        info!(recipient = %request.recipient, channel = ?request.channel, "notification sent");
        Ok(payload)
    }

    pub async fn send_email(
        &self,
        to: &str,
        subject: &str,
        message: &str,
        template_data: Option<Value>,
        attachments: Vec<String>,
    ) -> Result<Value, NotificationError> {
        self.send(&NotificationRequest::email(
            to,
            subject,
            message,
            template_data,
            attachments,
        ))
        .await
    }

    pub async fn send_notification(
        &self,
        channel: Channel,
        recipient: &str,
        message: &str,
        subject: Option<&str>,
        notification_type: Option<&str>,
        template_data: Option<Value>,
    ) -> Result<Value, NotificationError> {
        self.send(&NotificationRequest::notification(
            channel,
            recipient,
            message,
            subject,
            notification_type,
            template_data,
        ))
        .await
    }
}
