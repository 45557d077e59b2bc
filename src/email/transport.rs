use std::time::Duration;

use async_trait::async_trait;
use lettre::{
    transport::smtp::authentication::{Credentials, DEFAULT_MECHANISMS},
    transport::smtp::client::{AsyncSmtpConnection, TlsParameters},
    transport::smtp::extension::ClientId,
    Message,
};

use crate::config::{SMTP, SmtpEncryption};
use crate::error::MailError;
use crate::utils::error_chain;

/// Opens sessions with a mail relay.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn connect(&self) -> Result<Box<dyn Connection>, MailError>;
}

/// One open relay session, good for a single delivery.
#[async_trait]
pub trait Connection: Send {
    async fn send(&mut self, email: Message) -> Result<(), MailError>;
}

/// SMTP relay built from the `[smtp]` config. Each send opens its own
/// session; nothing is kept alive between messages.
#[derive(Debug, Clone)]
pub struct SmtpRelay {
    smtp: SMTP,
}

impl SmtpRelay {
    pub fn new(smtp: SMTP) -> Self {
        Self { smtp }
    }

    fn tls_parameters(&self) -> Result<TlsParameters, lettre::transport::smtp::Error> {
        TlsParameters::new(self.smtp.server.clone())
    }

    fn credentials(&self) -> Option<Credentials> {
        let username = self.smtp.username.as_ref().filter(|u| !u.is_empty())?;
        let password = self.smtp.password.clone().unwrap_or_default();
        Some(Credentials::new(username.to_string(), password))
    }

    /// Greeting, EHLO, STARTTLS and AUTH on a fresh TCP session.
    async fn open(&self) -> Result<AsyncSmtpConnection, lettre::transport::smtp::Error> {
        let hello = ClientId::default();

        let wrapper = match self.smtp.encryption {
            SmtpEncryption::Tls => Some(self.tls_parameters()?),
            SmtpEncryption::StartTls | SmtpEncryption::None => None,
        };

        let mut connection = AsyncSmtpConnection::connect_tokio1(
            (self.smtp.server.as_str(), self.smtp.port),
            Some(self.smtp.connect_timeout()),
            &hello,
            wrapper,
            None,
        )
        .await?;

        if self.smtp.encryption == SmtpEncryption::StartTls && connection.can_starttls() {
            connection.starttls(self.tls_parameters()?, &hello).await?;
        }

        if let Some(credentials) = self.credentials() {
            connection.auth(DEFAULT_MECHANISMS, &credentials).await?;
        }

        Ok(connection)
    }
}

#[async_trait]
impl Transport for SmtpRelay {
    async fn connect(&self) -> Result<Box<dyn Connection>, MailError> {
        let timeout = self.smtp.connect_timeout();

        let connection = match tokio::time::timeout(timeout, self.open()).await {
            Ok(Ok(connection)) => connection,
            Ok(Err(e)) => return Err(MailError::ConnectFailed(error_chain(&e))),
            Err(_) => {
                return Err(MailError::ConnectFailed(format!(
                    "timed out after {:?} connecting to {}:{}",
                    timeout, self.smtp.server, self.smtp.port
                )));
            }
        };

        tracing::debug!("Connected to {}:{}", self.smtp.server, self.smtp.port);

        Ok(Box::new(SmtpConnection {
            connection,
            send_timeout: self.smtp.send_timeout(),
        }))
    }
}

/// The session opened by `SmtpRelay::connect`; delivery reuses it.
struct SmtpConnection {
    connection: AsyncSmtpConnection,
    send_timeout: Duration,
}

#[async_trait]
impl Connection for SmtpConnection {
    async fn send(&mut self, email: Message) -> Result<(), MailError> {
        let raw = email.formatted();
        let delivery = self.connection.send(email.envelope(), &raw);

        match tokio::time::timeout(self.send_timeout, delivery).await {
            Ok(Ok(response)) => {
                tracing::debug!("Relay accepted message: {:?}", response.code());
            }
            Ok(Err(e)) => return Err(MailError::DeliveryFailed(error_chain(&e))),
            Err(_) => {
                return Err(MailError::DeliveryFailed(format!(
                    "timed out after {:?}",
                    self.send_timeout
                )));
            }
        }

        if let Err(e) = self.connection.quit().await {
            tracing::debug!("QUIT after delivery failed: {}", e);
        }

        Ok(())
    }
}
