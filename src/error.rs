use thiserror::Error;
use uuid::Uuid;

/// Everything that can go wrong while taking one message to the relay.
///
/// Third-party errors are flattened into their full source chain so a report
/// can cross task boundaries and still name the root cause.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MailError {
    #[error("Template not found: {0}")]
    TemplateNotFound(String),
    #[error("Template {name} is invalid: {reason}")]
    TemplateInvalid { name: String, reason: String },
    #[error("Failed to render template {name}: {reason}")]
    TemplateExecutionFailed { name: String, reason: String },
    #[error("Failed to inline CSS: {0}")]
    CssTransformFailed(String),
    #[error("Failed to connect to mail relay: {0}")]
    ConnectFailed(String),
    #[error("Failed to deliver message: {0}")]
    DeliveryFailed(String),
    #[error("Invalid email address: {0}")]
    InvalidAddress(String),
    #[error("Failed to attach {path}: {reason}")]
    AttachmentFailed { path: String, reason: String },
    #[error("Failed to compose message: {0}")]
    ComposeFailed(String),
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueError {
    #[error("Mail queue is full")]
    QueueFull,
    #[error("Mail dispatcher has stopped")]
    Stopped,
}

/// One entry of the error stream.
#[derive(Debug, Clone)]
pub struct SendFailure {
    pub attempt: Uuid,
    pub to: String,
    pub template: String,
    pub error: MailError,
}

impl std::fmt::Display for SendFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "attempt {} to {} (template {}): {}",
            self.attempt, self.to, self.template, self.error
        )
    }
}
