//! Outgoing mail. Deployments point `MAIL_WEBHOOK_URL` at a relay that accepts
//! `{from, to, subject, html}`; without one, mail is written to the log.
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

const TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum MailError {
    #[error("mail relay unreachable: {0}")]
    Http(#[from] reqwest::Error),

    #[error("mail relay returned {0}")]
    Rejected(u16),
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Mail {
    pub to: String,
    pub subject: String,
    pub html: String,
}

impl Mail {
    pub fn otp(to: &str, otp: &str, valid_minutes: u64) -> Self {
        Self {
            to: to.to_string(),
            subject: "Password Reset OTP - Smart Khaad Manager".to_string(),
            html: format!(
                r#"<div style="font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto;">
  <h2 style="color: #16a34a;">Smart Khaad Manager</h2>
  <p>You requested a password reset. Use the OTP below to reset your password:</p>
  <div style="background: #f3f4f6; padding: 20px; text-align: center; font-size: 32px; font-weight: bold; letter-spacing: 5px;">{otp}</div>
  <p style="color: #ef4444;">This OTP will expire in {valid_minutes} minutes.</p>
  <p>If you didn't request this, please ignore this email.</p>
</div>"#
            ),
        }
    }

    pub fn welcome(to: &str, name: &str) -> Self {
        Self {
            to: to.to_string(),
            subject: "Welcome to Smart Khaad Manager!".to_string(),
            html: format!(
                r#"<div style="font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto;">
  <h2 style="color: #16a34a;">Welcome {name}!</h2>
  <p>Your account has been created. You can now log in and start managing your shop.</p>
  <ul>
    <li>Voice billing</li>
    <li>Inventory</li>
    <li>Customer ledger with dues</li>
    <li>Day book and reports</li>
    <li>Staff accounts</li>
  </ul>
</div>"#
            ),
        }
    }
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, mail: Mail) -> Result<(), MailError>;
}

/// Writes mail to the log. Used when no relay is configured.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, mail: Mail) -> Result<(), MailError> {
        info!("Mail to {} ({}):\n{}", mail.to, mail.subject, mail.html);
        Ok(())
    }
}

pub struct WebhookMailer {
    client: Client,
    url: String,
    from: String,
}

#[derive(Serialize)]
struct Envelope<'a> {
    from: &'a str,
    #[serde(flatten)]
    mail: &'a Mail,
}

impl WebhookMailer {
    pub fn new(url: String, from: String) -> Result<Self, MailError> {
        Ok(Self {
            client: Client::builder().timeout(TIMEOUT).build()?,
            url,
            from,
        })
    }
}

#[async_trait]
impl Mailer for WebhookMailer {
    async fn send(&self, mail: Mail) -> Result<(), MailError> {
        let res = self
            .client
            .post(&self.url)
            .json(&Envelope {
                from: &self.from,
                mail: &mail,
            })
            .send()
            .await?;

        if !res.status().is_success() {
            warn!("Mail relay rejected mail to {}: {}", mail.to, res.status());
            return Err(MailError::Rejected(res.status().as_u16()));
        }

        info!("Sent '{}' to {}", mail.subject, mail.to);
        Ok(())
    }
}
