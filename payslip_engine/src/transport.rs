//! Outbound collaborators: the mail transport and the document
//! rasterizer.
//!
//! The dispatcher only sees the [`MailTransport`] trait so that
//! batches can be driven against a scripted transport in tests.  The
//! production implementation relays through SMTP with `lettre`; the
//! blocking client runs on tokio's blocking pool.

use std::future::Future;
use std::io::Write;
use std::process::{Command, Stdio};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{Message, SmtpTransport, Transport};
use serde::{Deserialize, Serialize};

use crate::error::{PayslipError, Result};
use crate::models::SmtpConfig;

/// A file attached to an outgoing message.  `content` is encoded as
/// named by `encoding`; only `"base64"` is produced by this crate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailAttachment {
    pub filename: String,
    pub content: String,
    #[serde(default = "default_encoding")]
    pub encoding: String,
}

fn default_encoding() -> String {
    "base64".to_string()
}

impl MailAttachment {
    pub fn from_bytes(filename: impl Into<String>, bytes: &[u8]) -> Self {
        MailAttachment {
            filename: filename.into(),
            content: STANDARD.encode(bytes),
            encoding: default_encoding(),
        }
    }

    fn decode(&self) -> Result<Vec<u8>> {
        if self.encoding.eq_ignore_ascii_case("base64") {
            Ok(STANDARD.decode(self.content.as_bytes())?)
        } else {
            Ok(self.content.clone().into_bytes())
        }
    }

    fn content_type(&self) -> &'static str {
        if self.filename.to_lowercase().ends_with(".pdf") {
            "application/pdf"
        } else {
            "application/octet-stream"
        }
    }
}

/// One message as handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMail {
    #[serde(rename = "email")]
    pub to: String,
    pub subject: String,
    pub html: String,
    #[serde(default)]
    pub attachments: Vec<MailAttachment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendReceipt {
    pub message_id: Option<String>,
}

/// Anything that can deliver an [`OutgoingMail`].
pub trait MailTransport: Send + Sync {
    fn send(&self, mail: OutgoingMail) -> impl Future<Output = Result<SendReceipt>> + Send;

    /// Check that the relay accepts connections and credentials.
    fn verify(&self) -> impl Future<Output = Result<()>> + Send;
}

/// SMTP relay configured from an [`SmtpConfig`].
///
/// `secure` selects implicit TLS; otherwise the connection is plain
/// and upgraded with STARTTLS when the server offers it.
#[derive(Clone)]
pub struct SmtpMailer {
    host: String,
    from: Mailbox,
    transport: SmtpTransport,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> Result<Self> {
        let mut builder = if config.secure {
            SmtpTransport::relay(&config.host)?.port(config.port)
        } else {
            SmtpTransport::builder_dangerous(&config.host)
                .port(config.port)
                .tls(Tls::Opportunistic(TlsParameters::new(config.host.clone())?))
        };
        if !config.user.trim().is_empty() {
            builder = builder.credentials(Credentials::new(
                config.user.clone(),
                config.password.clone(),
            ));
        }
        Ok(SmtpMailer {
            host: config.host.clone(),
            from: parse_mailbox(&config.user)?,
            transport: builder.build(),
        })
    }

    fn build_message(&self, mail: &OutgoingMail) -> Result<Message> {
        let builder = Message::builder()
            .from(self.from.clone())
            .to(parse_mailbox(&mail.to)?)
            .subject(mail.subject.as_str())
            .message_id(None);

        let message = if mail.attachments.is_empty() {
            builder.singlepart(SinglePart::html(mail.html.clone()))?
        } else {
            let mut parts = MultiPart::mixed().singlepart(SinglePart::html(mail.html.clone()));
            for attachment in &mail.attachments {
                parts = parts.singlepart(
                    Attachment::new(attachment.filename.clone())
                        .body(attachment.decode()?, ContentType::parse(attachment.content_type())?),
                );
            }
            builder.multipart(parts)?
        };
        Ok(message)
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox> {
    address
        .trim()
        .parse()
        .map_err(|source| PayslipError::Address {
            address: address.to_string(),
            source,
        })
}

impl MailTransport for SmtpMailer {
    async fn send(&self, mail: OutgoingMail) -> Result<SendReceipt> {
        log::info!("[EMAIL] Attempting to send email to: {}", mail.to);
        log::debug!("[EMAIL] Subject: {}", mail.subject);
        let message = self.build_message(&mail)?;
        let message_id = message
            .headers()
            .get_raw("Message-ID")
            .map(str::to_string);

        let transport = self.transport.clone();
        let sent = tokio::task::spawn_blocking(move || transport.send(&message)).await?;
        match sent {
            Ok(_) => {
                log::info!(
                    "[EMAIL] Successfully sent to {}, messageId: {}",
                    mail.to,
                    message_id.as_deref().unwrap_or("-")
                );
                Ok(SendReceipt { message_id })
            }
            Err(err) => {
                log::error!("[EMAIL] Failed to send to {}: {err}", mail.to);
                Err(err.into())
            }
        }
    }

    async fn verify(&self) -> Result<()> {
        let transport = self.transport.clone();
        let reachable = tokio::task::spawn_blocking(move || transport.test_connection()).await??;
        if reachable {
            Ok(())
        } else {
            Err(PayslipError::RelayUnavailable {
                host: self.host.clone(),
            })
        }
    }
}

/// Turns a markup fragment of a given pixel width into a document.
pub trait DocumentRasterizer: Send + Sync {
    fn rasterize(&self, markup: &str, width_px: u32) -> Result<Vec<u8>>;
}

/// Rasterizer backed by an external converter that reads markup on
/// stdin and writes the document to stdout, e.g.
/// `wkhtmltopdf --page-width {width}px - -`.  `{width}` in an argument
/// is replaced by the fragment width.
#[derive(Debug, Clone)]
pub struct CommandRasterizer {
    program: String,
    args: Vec<String>,
}

impl CommandRasterizer {
    /// Build from a whitespace-separated command line.  Returns `None`
    /// for a blank command.
    pub fn from_command_line(line: &str) -> Option<Self> {
        let mut words = line.split_whitespace().map(str::to_string);
        let program = words.next()?;
        Some(CommandRasterizer {
            program,
            args: words.collect(),
        })
    }
}

impl DocumentRasterizer for CommandRasterizer {
    fn rasterize(&self, markup: &str, width_px: u32) -> Result<Vec<u8>> {
        let width = width_px.to_string();
        let mut child = Command::new(&self.program)
            .args(self.args.iter().map(|a| a.replace("{width}", &width)))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        let stdin = child.stdin.take();
        // stdin is fed while stdout drains
        let (output, written) = std::thread::scope(|scope| {
            let writer = scope.spawn(move || match stdin {
                Some(mut stdin) => stdin.write_all(markup.as_bytes()),
                None => Ok(()),
            });
            (child.wait_with_output(), writer.join())
        });
        let output = output?;
        if !output.status.success() {
            return Err(PayslipError::Render(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        match written {
            Ok(result) => result?,
            Err(_) => {
                return Err(PayslipError::Render(format!(
                    "{} input could not be written",
                    self.program
                )))
            }
        }
        if output.stdout.is_empty() {
            return Err(PayslipError::Render(format!("{} produced no output", self.program)));
        }
        Ok(output.stdout)
    }
}
