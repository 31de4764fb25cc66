//! Transactional email: rendering, the outbox, and SMTP delivery.
//!
//! Handlers never talk to SMTP. They render an [`OutgoingEmail`] and write it
//! to the jobs table with [`enqueue_email`], inside the same transaction as
//! the account change that triggered it. The worker picks the job up and
//! hands it to a [`Mailer`].

use std::time::Duration;

use async_trait::async_trait;
use diesel::PgConnection;
use lettre::{
    message::header::ContentType, transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    config::SmtpConfig,
    jobs::{enqueue_job, JobQueueResult, JOB_SEND_EMAIL},
    models::{Job, User},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Error)]
pub enum MailError {
    #[error("SMTP transport error: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),
    #[error("email address parse error: {0}")]
    Address(#[from] lettre::address::AddressError),
    #[error("email build error: {0}")]
    Build(String),
    #[error("SMTP relay did not answer within {0:?}")]
    Timeout(Duration),
}

impl MailError {
    /// Retrying cannot fix a bad address or an unbuildable message.
    pub fn is_permanent(&self) -> bool {
        matches!(self, MailError::Address(_) | MailError::Build(_))
    }
}

pub fn enqueue_email(conn: &mut PgConnection, email: &OutgoingEmail) -> JobQueueResult<Job> {
    let payload = serde_json::json!({
        "to": email.to,
        "subject": email.subject,
        "body": email.body,
    });
    enqueue_job(conn, JOB_SEND_EMAIL, payload, None)
}

pub fn activation_email(user: &User, activation_link: &str) -> OutgoingEmail {
    let body = format!(
        "Hello {name},\n\n\
         An account has been created for you with the username \"{username}\".\n\
         Please confirm your email address to activate it:\n\n\
         {activation_link}\n\n\
         The link can only be used once and expires after a few days.\n",
        name = user.display_name(),
        username = user.username,
    );
    OutgoingEmail {
        to: user.email.clone(),
        subject: "Activate your account".to_string(),
        body,
    }
}

pub fn password_reset_email(user: &User, reset_link: &str) -> OutgoingEmail {
    let body = format!(
        "Hello {name},\n\n\
         A password reset was requested for your account \"{username}\".\n\
         Use the link below to choose a new password:\n\n\
         {reset_link}\n\n\
         If you did not request this, you can ignore this email.\n",
        name = user.display_name(),
        username = user.username,
    );
    OutgoingEmail {
        to: user.email.clone(),
        subject: "Password Reset Requested".to_string(),
        body,
    }
}

/// Upper bound on one SMTP conversation; kept well under the job lease.
pub const SEND_TIMEOUT: Duration = Duration::from_secs(60);

#[async_trait]
pub trait Mailer: Send + Sync + 'static {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), MailError>;
}

pub struct SmtpMailer {
    config: SmtpConfig,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
    pub fn new(config: SmtpConfig) -> Result<Self, MailError> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)?
            .port(config.port);
        if let (Some(user), Some(password)) = (&config.user, &config.password) {
            builder = builder.credentials(Credentials::new(user.clone(), password.clone()));
        }
        let transport = builder.build();
        Ok(Self { config, transport })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), MailError> {
        let message = Message::builder()
            .from(self.config.from_address.parse()?)
            .to(email.to.parse()?)
            .subject(email.subject.clone())
            .header(ContentType::TEXT_PLAIN)
            .body(email.body.clone())
            .map_err(|err| MailError::Build(err.to_string()))?;

        tokio::time::timeout(SEND_TIMEOUT, self.transport.send(message))
            .await
            .map_err(|_| MailError::Timeout(SEND_TIMEOUT))??;
        tracing::info!(to = %email.to, subject = %email.subject, "email sent");
        Ok(())
    }
}
