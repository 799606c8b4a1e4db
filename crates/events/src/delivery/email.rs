//! Email notification delivery via SMTP.
//!
//! [`EmailDelivery`] wraps the `lettre` async SMTP transport to send
//! plain-text notification emails: one message per immediate item, or the
//! rendered digest. Addresses come from a [`RecipientDirectory`].
//! Configuration is loaded from environment variables; if `SMTP_HOST` is
//! not set, [`EmailConfig::from_env`] returns `None` and no mailer should
//! be constructed.

use std::collections::HashMap;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use quill_core::channels::DeliveryChannel;
use quill_core::types::DbId;

use super::{DeliveryDispatcher, DeliveryPayload, DispatchError};

/// Prefix on every subject line.
const SUBJECT_PREFIX: &str = "[Quill]";

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Error type for email delivery failures.
#[derive(Debug, thiserror::Error)]
pub enum EmailError {
    /// SMTP transport-level failure (authentication, connection, etc.).
    #[error("SMTP transport error: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),

    /// The recipient or sender address could not be parsed.
    #[error("Email address parse error: {0}")]
    Address(#[from] lettre::address::AddressError),

    /// The MIME message could not be assembled.
    #[error("Email build error: {0}")]
    Build(String),

    /// The directory has no address for the user.
    #[error("No email address known for user {0}")]
    NoRecipient(DbId),
}

// ---------------------------------------------------------------------------
// EmailConfig
// ---------------------------------------------------------------------------

/// Default SMTP port (STARTTLS).
const DEFAULT_SMTP_PORT: u16 = 587;

/// Default sender address when `SMTP_FROM` is not set.
const DEFAULT_FROM_ADDRESS: &str = "noreply@quill.local";

/// Configuration for the SMTP email delivery service.
#[derive(Debug, Clone)]
pub struct EmailConfig {
    /// SMTP server hostname.
    pub smtp_host: String,
    /// SMTP server port (defaults to 587).
    pub smtp_port: u16,
    /// RFC 5322 "From" address.
    pub from_address: String,
    /// Optional SMTP username.
    pub smtp_user: Option<String>,
    /// Optional SMTP password.
    pub smtp_password: Option<String>,
}

impl EmailConfig {
    /// Load configuration from environment variables.
    ///
    /// Returns `None` if `SMTP_HOST` is not set, signalling that email
    /// delivery is not configured and should be skipped.
    ///
    /// | Variable         | Required | Default               |
    /// |------------------|----------|-----------------------|
    /// | `SMTP_HOST`      | yes      | none                  |
    /// | `SMTP_PORT`      | no       | `587`                 |
    /// | `SMTP_FROM`      | no       | `noreply@quill.local` |
    /// | `SMTP_USER`      | no       | none                  |
    /// | `SMTP_PASSWORD`  | no       | none                  |
    pub fn from_env() -> Option<Self> {
        let smtp_host = std::env::var("SMTP_HOST").ok()?;
        Some(Self {
            smtp_host,
            smtp_port: std::env::var("SMTP_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(DEFAULT_SMTP_PORT),
            from_address: std::env::var("SMTP_FROM")
                .unwrap_or_else(|_| DEFAULT_FROM_ADDRESS.to_string()),
            smtp_user: std::env::var("SMTP_USER").ok(),
            smtp_password: std::env::var("SMTP_PASSWORD").ok(),
        })
    }
}

// ---------------------------------------------------------------------------
// RecipientDirectory
// ---------------------------------------------------------------------------

/// Resolves a user's email address. Owned by the account service.
#[async_trait]
pub trait RecipientDirectory: Send + Sync {
    async fn email_for(&self, user_id: DbId) -> Option<String>;
}

/// Fixed user-to-address map.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    addresses: HashMap<DbId, String>,
}

impl StaticDirectory {
    pub fn new(addresses: HashMap<DbId, String>) -> Self {
        Self { addresses }
    }

    /// Parse `user_id=address` pairs separated by commas, as found in
    /// `SMTP_RECIPIENTS`. Malformed pairs are logged and skipped.
    pub fn parse(raw: &str) -> Self {
        let mut addresses = HashMap::new();
        for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            match pair.split_once('=') {
                Some((id, address)) if !address.trim().is_empty() => match id.trim().parse() {
                    Ok(id) => {
                        addresses.insert(id, address.trim().to_string());
                    }
                    Err(_) => tracing::warn!(pair, "Skipping recipient with non-numeric user id"),
                },
                _ => tracing::warn!(pair, "Skipping malformed recipient entry"),
            }
        }
        Self { addresses }
    }

    /// Directory from `SMTP_RECIPIENTS`; empty when unset.
    pub fn from_env() -> Self {
        std::env::var("SMTP_RECIPIENTS")
            .map(|raw| Self::parse(&raw))
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}

#[async_trait]
impl RecipientDirectory for StaticDirectory {
    async fn email_for(&self, user_id: DbId) -> Option<String> {
        self.addresses.get(&user_id).cloned()
    }
}

// ---------------------------------------------------------------------------
// EmailDelivery
// ---------------------------------------------------------------------------

/// Sends notification emails via SMTP.
pub struct EmailDelivery {
    config: EmailConfig,
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    directory: Box<dyn RecipientDirectory>,
}

impl EmailDelivery {
    /// Build the SMTP transport. No connection is made until the first send.
    pub fn new(
        config: EmailConfig,
        directory: Box<dyn RecipientDirectory>,
    ) -> Result<Self, EmailError> {
        let mut transport_builder =
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)?
                .port(config.smtp_port);

        if let (Some(user), Some(pass)) = (&config.smtp_user, &config.smtp_password) {
            transport_builder =
                transport_builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        Ok(Self {
            mailer: transport_builder.build(),
            config,
            directory,
        })
    }

    /// Send the payload to the user's address.
    pub async fn send(&self, user_id: DbId, payload: &DeliveryPayload) -> Result<(), EmailError> {
        let to = self
            .directory
            .email_for(user_id)
            .await
            .ok_or(EmailError::NoRecipient(user_id))?;

        let email = compose(&self.config.from_address, &to, payload)?;
        self.mailer.send(email).await?;

        tracing::info!(user_id, key = %payload.idempotency_key(), "Notification email sent");
        Ok(())
    }
}

#[async_trait]
impl DeliveryDispatcher for EmailDelivery {
    async fn deliver(
        &self,
        user_id: DbId,
        _channel: DeliveryChannel,
        payload: &DeliveryPayload,
    ) -> Result<(), DispatchError> {
        Ok(self.send(user_id, payload).await?)
    }
}

/// Assemble the plain-text message for a payload.
fn compose(from: &str, to: &str, payload: &DeliveryPayload) -> Result<Message, EmailError> {
    let subject = format!("{SUBJECT_PREFIX} {}", payload.subject());
    let body = match payload {
        DeliveryPayload::Item(item) => {
            let mut body = item.description.clone();
            if !item.action_url.is_empty() {
                if !body.is_empty() {
                    body.push_str("\n\n");
                }
                body.push_str(&item.action_url);
            }
            body
        }
        DeliveryPayload::Digest(digest) => digest.body.clone(),
    };

    Message::builder()
        .from(from.parse()?)
        .to(to.parse()?)
        .subject(subject)
        .header(ContentType::TEXT_PLAIN)
        .body(body)
        .map_err(|e| EmailError::Build(e.to_string()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::Utc;
    use quill_core::event_types::{EventType, Priority};

    use super::*;
    use crate::delivery::ItemPayload;

    fn item_payload() -> DeliveryPayload {
        DeliveryPayload::Item(ItemPayload {
            item_id: 11,
            event: EventType::CommentReceived,
            priority: Priority::High,
            source_type: "work".into(),
            source_id: 4,
            title: "New comment on Night Ferry".into(),
            description: "reader left a comment".into(),
            action_url: "/works/4#comments".into(),
            actor_name: "reader".into(),
            created_at: Utc::now(),
        })
    }

    #[test]
    fn from_env_returns_none_without_smtp_host() {
        // Ensure SMTP_HOST is not set in the test environment.
        std::env::remove_var("SMTP_HOST");
        assert!(EmailConfig::from_env().is_none());
    }

    #[test]
    fn email_error_display_build() {
        let err = EmailError::Build("missing body".to_string());
        assert_eq!(err.to_string(), "Email build error: missing body");
    }

    #[test]
    fn email_error_display_address() {
        let addr_err: Result<lettre::Address, _> = "not-an-email".parse();
        let err = EmailError::Address(addr_err.unwrap_err());
        assert!(err.to_string().contains("Email address parse error"));
    }

    #[test]
    fn compose_prefixes_subject_and_includes_link() {
        let message = compose("noreply@quill.local", "reader@example.com", &item_payload()).unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("Subject: [Quill] New comment on Night Ferry"));
        assert!(raw.contains("/works/4#comments"));
    }

    #[test]
    fn compose_rejects_bad_recipient() {
        let err = compose("noreply@quill.local", "nobody", &item_payload()).unwrap_err();
        assert_matches!(err, EmailError::Address(_));
    }

    #[tokio::test]
    async fn static_directory_parses_pairs() {
        let directory = StaticDirectory::parse("1=a@example.com, 2 = b@example.com,junk,x=c@example.com");
        assert_eq!(directory.len(), 2);
        assert_eq!(directory.email_for(2).await.as_deref(), Some("b@example.com"));
        assert_eq!(directory.email_for(3).await, None);
    }
}
