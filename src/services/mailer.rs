use async_trait::async_trait;
use core::fmt;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("message build failed: {0}")]
    Build(String),
    #[error("send failed: {0}")]
    Send(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsMode {
    StartTls,
    Implicit,
}

impl TlsMode {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "implicit" | "implicit_tls" | "ssl" => TlsMode::Implicit,
            _ => TlsMode::StartTls,
        }
    }
}

impl fmt::Display for TlsMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TlsMode::StartTls => f.write_str("starttls"),
            TlsMode::Implicit => f.write_str("implicit_tls"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
    pub tls_mode: TlsMode,
}

#[derive(Debug, Clone)]
pub struct MailAttachment {
    pub filename: String,
    pub content: Vec<u8>,
    pub content_type: String,
}

#[derive(Debug, Clone, Default)]
pub struct OutgoingEmail {
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: String,
    pub body: String,
    pub attachments: Vec<MailAttachment>,
}

/// SMTP delivery collaborator. Returns the generated Message-ID on success.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_with_config(
        &self,
        config: &SmtpConfig,
        email: &OutgoingEmail,
    ) -> Result<String, MailError>;
}

#[derive(Default)]
pub struct SmtpMailer;

impl SmtpMailer {
    fn build_message(email: &OutgoingEmail, config: &SmtpConfig) -> Result<(Message, String), MailError> {
        let message_id = format!("<{}@flowmill>", Uuid::new_v4());

        let mut builder = Message::builder()
            .from(
                config
                    .from
                    .parse()
                    .map_err(|_| MailError::InvalidAddress(config.from.clone()))?,
            )
            .subject(email.subject.clone())
            .message_id(Some(message_id.clone()));

        for to in &email.to {
            builder = builder.to(to
                .parse()
                .map_err(|_| MailError::InvalidAddress(to.clone()))?);
        }
        for cc in &email.cc {
            builder = builder.cc(cc
                .parse()
                .map_err(|_| MailError::InvalidAddress(cc.clone()))?);
        }
        for bcc in &email.bcc {
            builder = builder.bcc(bcc
                .parse()
                .map_err(|_| MailError::InvalidAddress(bcc.clone()))?);
        }

        let message = if email.attachments.is_empty() {
            builder
                .body(email.body.clone())
                .map_err(|e| MailError::Build(e.to_string()))?
        } else {
            let mut multipart = MultiPart::mixed().singlepart(SinglePart::plain(email.body.clone()));
            for attachment in &email.attachments {
                let content_type = ContentType::parse(&attachment.content_type)
                    .unwrap_or(ContentType::TEXT_PLAIN);
                multipart = multipart.singlepart(
                    Attachment::new(attachment.filename.clone())
                        .body(attachment.content.clone(), content_type),
                );
            }
            builder
                .multipart(multipart)
                .map_err(|e| MailError::Build(e.to_string()))?
        };

        Ok((message, message_id))
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send_with_config(
        &self,
        config: &SmtpConfig,
        email: &OutgoingEmail,
    ) -> Result<String, MailError> {
        let (message, message_id) = Self::build_message(email, config)?;

        let builder = match config.tls_mode {
            TlsMode::StartTls => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
                .map_err(|e| MailError::Send(e.to_string()))?,
            TlsMode::Implicit => AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
                .map_err(|e| MailError::Send(e.to_string()))?,
        };

        let transport = builder
            .port(config.port)
            .credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ))
            .build();

        transport
            .send(message)
            .await
            .map_err(|e| MailError::Send(e.to_string()))?;

        Ok(message_id)
    }
}
