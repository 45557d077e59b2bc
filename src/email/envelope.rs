use std::path::Path;

use lettre::message::{header::ContentType, Attachment, Mailbox, MultiPart};
use lettre::{Address, Message};

use crate::email::{NormalizedMessage, RenderedEmail};
use crate::error::MailError;
use crate::utils::{attachment_filename, error_chain};

#[derive(Debug, Clone)]
pub struct AttachmentFile {
    pub filename: String,
    pub content: Vec<u8>,
}

impl AttachmentFile {
    pub async fn read(path: &Path) -> Result<Self, MailError> {
        let content = tokio::fs::read(path)
            .await
            .map_err(|e| MailError::AttachmentFailed {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            filename: attachment_filename(path),
            content,
        })
    }
}

/// Reads the message's attachments from disk and builds the envelope.
pub async fn compose(
    message: &NormalizedMessage,
    rendered: &RenderedEmail,
) -> Result<Message, MailError> {
    let mut attachments = Vec::with_capacity(message.attachments.len());
    for path in &message.attachments {
        attachments.push(AttachmentFile::read(path).await?);
    }

    build_envelope(message, rendered, attachments)
}

/// Plain text first, HTML as the alternative; attachments wrap both in
/// `multipart/mixed`.
pub fn build_envelope(
    message: &NormalizedMessage,
    rendered: &RenderedEmail,
    attachments: Vec<AttachmentFile>,
) -> Result<Message, MailError> {
    let address: Address = message.from.parse()
        .map_err(|_| MailError::InvalidAddress(message.from.clone()))?;

    let name = Some(message.from_name.clone()).filter(|name| !name.is_empty());
    let from = Mailbox::new(name, address);

    let to: Mailbox = message.to.parse()
        .map_err(|_| MailError::InvalidAddress(message.to.clone()))?;

    let body = MultiPart::alternative_plain_html(rendered.plain.clone(), rendered.html.clone());

    let content = if attachments.is_empty() {
        body
    } else {
        let octet_stream = ContentType::parse("application/octet-stream")
            .map_err(|e| MailError::ComposeFailed(error_chain(&e)))?;

        let mut mixed = MultiPart::mixed().multipart(body);
        for file in attachments {
            mixed = mixed.singlepart(
                Attachment::new(file.filename).body(file.content, octet_stream.clone()),
            );
        }
        mixed
    };

    Message::builder()
        .from(from)
        .to(to)
        .subject(message.subject.as_str())
        .multipart(content)
        .map_err(|e| MailError::ComposeFailed(error_chain(&e)))
}
