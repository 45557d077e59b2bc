use std::sync::Arc;

use crate::config::Config;
use crate::email::{compose, CssInliner, Message, NormalizedMessage, RenderedEmail, Transport};
use crate::error::MailError;
use crate::templates::{EmailTemplates, Format};

/// Takes one message from request to relay: defaults, render, inline,
/// compose, deliver. Cheap to clone; every spawned send gets its own copy.
#[derive(Clone)]
pub struct MailSender {
    config: Arc<Config>,
    templates: EmailTemplates,
    inliner: CssInliner,
    transport: Arc<dyn Transport>,
}

impl MailSender {
    pub fn new(
        config: Arc<Config>,
        templates: EmailTemplates,
        inliner: CssInliner,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            config,
            templates,
            inliner,
            transport,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn normalize(&self, message: &Message) -> NormalizedMessage {
        message.normalize(&self.config.smtp)
    }

    /// Renders both bodies, inlining CSS into the HTML one. Stops at the first
    /// failing step.
    pub async fn render(&self, message: &NormalizedMessage) -> Result<RenderedEmail, MailError> {
        let html = self.templates
            .render(&message.template, Format::Html, &message.data_map)
            .await?;

        let html = self.inliner.inline(&html)?;

        let plain = self.templates
            .render(&message.template, Format::Plain, &message.data_map)
            .await?;

        Ok(RenderedEmail { html, plain })
    }

    pub async fn send(&self, message: &Message) -> Result<(), MailError> {
        let message = self.normalize(message);

        let rendered = self.render(&message).await?;

        let mut connection = self.transport.connect().await?;

        let email = compose(&message, &rendered).await?;

        connection.send(email).await?;

        tracing::info!("Email sent to {} using template {}", message.to, message.template);

        Ok(())
    }
}
