//! Notification collaborator

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Mutex;
use tracing::info;

use crate::error::{Result, SigningError};
use crate::model::Contact;

/// Message templates the pipeline sends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateKey {
    SigningInvitation,
    SignerCompleted,
    RequestCompleted,
    RequestCancelled,
    RequestExpired,
}

impl TemplateKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateKey::SigningInvitation => "signing_invitation",
            TemplateKey::SignerCompleted => "signer_completed",
            TemplateKey::RequestCompleted => "request_completed",
            TemplateKey::RequestCancelled => "request_cancelled",
            TemplateKey::RequestExpired => "request_expired",
        }
    }
}

/// Delivers templated messages. Failures are logged by the caller and never
/// block a state transition.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(
        &self,
        template: TemplateKey,
        recipient: &Contact,
        context: &serde_json::Value,
    ) -> Result<()>;
}

/// Writes notifications to the log instead of delivering them
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn send(
        &self,
        template: TemplateKey,
        recipient: &Contact,
        context: &serde_json::Value,
    ) -> Result<()> {
        info!(
            template = template.as_str(),
            to = %recipient.email,
            context = %context,
            "Notification"
        );
        Ok(())
    }
}

/// A notification captured by [`RecordingNotifier`]
#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub template: TemplateKey,
    pub to: String,
    pub context: serde_json::Value,
}

/// Keeps every message in memory; can be told to fail
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<SentMessage>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn count(&self, template: TemplateKey, to: &str) -> usize {
        self.sent()
            .iter()
            .filter(|m| m.template == template && m.to == to)
            .count()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(
        &self,
        template: TemplateKey,
        recipient: &Contact,
        context: &serde_json::Value,
    ) -> Result<()> {
        if self.fail {
            return Err(SigningError::Notification(format!(
                "mailbox {} unavailable",
                recipient.email
            )));
        }
        let message = SentMessage {
            template,
            to: recipient.email.clone(),
            context: context.clone(),
        };
        match self.sent.lock() {
            Ok(mut sent) => sent.push(message),
            Err(poisoned) => poisoned.into_inner().push(message),
        }
        Ok(())
    }
}
