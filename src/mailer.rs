use std::path::PathBuf;

use anyhow::Context;
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::config::MailConfig;
use crate::workbook::XLSX_CONTENT_TYPE;

/// A report email with exactly one spreadsheet attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub attachment: PathBuf,
}

impl OutgoingEmail {
    pub fn department(department: &str, to: &str, month: &str, attachment: PathBuf) -> Self {
        Self {
            to: to.to_string(),
            subject: format!("Monthly Latecomers Report - {department} ({month})"),
            body: "Attached is the list of students who were late on 5 or more unique days last month."
                .to_string(),
            attachment,
        }
    }

    pub fn consolidated(to: &str, month: &str, attachment: PathBuf) -> Self {
        Self {
            to: to.to_string(),
            subject: format!("Monthly Latecomers Consolidated Report ({month})"),
            body: "Attached is the consolidated latecomers' report for all departments last month."
                .to_string(),
            attachment,
        }
    }
}

#[async_trait]
pub trait Mailer {
    async fn send(&self, email: &OutgoingEmail) -> anyhow::Result<()>;
}

/// Submits mail through one relay, upgrading with STARTTLS before login.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    sender: Mailbox,
}

impl SmtpMailer {
    pub fn new(config: &MailConfig) -> anyhow::Result<Self> {
        let sender: Mailbox = config
            .sender_email
            .parse()
            .with_context(|| format!("SENDER_EMAIL '{}' is not a valid address", config.sender_email))?;

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.server)
            .with_context(|| format!("failed to configure SMTP relay {}", config.server))?
            .port(config.port)
            .credentials(Credentials::new(
                config.sender_email.clone(),
                config.sender_password.clone(),
            ))
            .build();

        Ok(Self { transport, sender })
    }
}

pub fn build_message(sender: &Mailbox, email: &OutgoingEmail) -> anyhow::Result<Message> {
    let recipient: Mailbox = email
        .to
        .parse()
        .with_context(|| format!("'{}' is not a valid recipient address", email.to))?;
    let content = std::fs::read(&email.attachment)
        .with_context(|| format!("failed to read attachment {}", email.attachment.display()))?;
    let file_name = email
        .attachment
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "report.xlsx".to_string());
    let content_type = ContentType::parse(XLSX_CONTENT_TYPE)?;

    let message = Message::builder()
        .from(sender.clone())
        .to(recipient)
        .subject(email.subject.clone())
        .multipart(
            MultiPart::mixed()
                .singlepart(SinglePart::plain(email.body.clone()))
                .singlepart(Attachment::new(file_name).body(content, content_type)),
        )?;

    Ok(message)
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: &OutgoingEmail) -> anyhow::Result<()> {
        let message = build_message(&self.sender, email)?;
        self.transport
            .send(message)
            .await
            .with_context(|| format!("failed to send report to {}", email.to))?;
        tracing::info!(to = %email.to, attachment = %email.attachment.display(), "email sent");
        Ok(())
    }
}
