//! Fixtures shared by the unit tests: a sample config, a template directory
//! and in-memory transport / error log doubles.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::config::{Config, Queue, SMTP, SmtpEncryption, Templates};
use crate::dispatch::ErrorLog;
use crate::email::{Connection, CssInliner, MailSender, Transport};
use crate::error::{MailError, SendFailure};
use crate::templates::EmailTemplates;

pub fn smtp_config() -> SMTP {
    SMTP {
        server: "smtp.example.com".to_string(),
        port: 587,
        username: None,
        password: None,
        encryption: SmtpEncryption::StartTls,
        from_address: "noreply@example.com".to_string(),
        from_name: "Example".to_string(),
        connect_timeout_secs: 10,
        send_timeout_secs: 10,
    }
}

pub fn config(templates: &Path, workers: usize, capacity: usize) -> Config {
    Config {
        smtp: smtp_config(),
        templates: Templates { dir: templates.to_path_buf(), keep_style_tags: false },
        queue: Queue { workers, capacity },
    }
}

const MAIL_HTML: &str = r#"{% block body %}<html><head><style>
p { color: #333333 !important; }
.name { font-weight: bold; }
</style></head><body><p>Hello <span class="name">{{ message.name }}</span></p></body></html>{% endblock body %}"#;

const MAIL_PLAIN: &str = "{% block body %}Hello {{ message.name }}{% endblock body %}";

pub fn write_templates() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("mail.html"), MAIL_HTML).unwrap();
    std::fs::write(dir.path().join("mail.plain"), MAIL_PLAIN).unwrap();
    dir
}

pub fn sender_with(templates: &Path, transport: RecordingTransport) -> MailSender {
    MailSender::new(
        Arc::new(config(templates, 4, 16)),
        EmailTemplates::new(templates),
        CssInliner::new(),
        Arc::new(transport),
    )
}

#[derive(Debug, Clone)]
pub struct Sent {
    pub from: String,
    pub to: Vec<String>,
    pub raw: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Accept,
    RefuseConnect,
    RejectDelivery,
}

#[derive(Default)]
struct Recorded {
    connects: usize,
    sent: Vec<Sent>,
}

/// Records every delivered envelope instead of talking to a relay.
#[derive(Clone)]
pub struct RecordingTransport {
    mode: Mode,
    recorded: Arc<Mutex<Recorded>>,
    gate: Option<Arc<Semaphore>>,
    delay: Option<Duration>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self {
            mode: Mode::Accept,
            recorded: Arc::default(),
            gate: None,
            delay: None,
        }
    }

    pub fn refusing() -> Self {
        Self { mode: Mode::RefuseConnect, ..Self::new() }
    }

    pub fn rejecting() -> Self {
        Self { mode: Mode::RejectDelivery, ..Self::new() }
    }

    /// Deliveries block until `release` hands out a permit for them.
    pub fn gated() -> Self {
        Self { gate: Some(Arc::new(Semaphore::new(0))), ..Self::new() }
    }

    pub fn delayed(delay: Duration) -> Self {
        Self { delay: Some(delay), ..Self::new() }
    }

    pub fn release(&self, deliveries: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(deliveries);
        }
    }

    pub fn connects(&self) -> usize {
        self.recorded.lock().unwrap().connects
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.recorded.lock().unwrap().sent.clone()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn connect(&self) -> Result<Box<dyn Connection>, MailError> {
        self.recorded.lock().unwrap().connects += 1;

        if self.mode == Mode::RefuseConnect {
            return Err(MailError::ConnectFailed("connection refused".to_string()));
        }

        Ok(Box::new(self.clone()))
    }
}

#[async_trait]
impl Connection for RecordingTransport {
    async fn send(&mut self, email: lettre::Message) -> Result<(), MailError> {
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.mode == Mode::RejectDelivery {
            return Err(MailError::DeliveryFailed("550 mailbox unavailable".to_string()));
        }

        let envelope = email.envelope();
        let sent = Sent {
            from: envelope.from().map(|a| a.to_string()).unwrap_or_default(),
            to: envelope.to().iter().map(|a| a.to_string()).collect(),
            raw: String::from_utf8_lossy(&email.formatted()).into_owned(),
        };

        self.recorded.lock().unwrap().sent.push(sent);

        Ok(())
    }
}

/// Error log that keeps every failure for later inspection.
#[derive(Clone, Default)]
pub struct CollectingLog {
    failures: Arc<Mutex<Vec<SendFailure>>>,
}

impl CollectingLog {
    pub fn failures(&self) -> Vec<SendFailure> {
        self.failures.lock().unwrap().clone()
    }
}

impl ErrorLog for CollectingLog {
    fn log(&mut self, failure: &SendFailure) {
        self.failures.lock().unwrap().push(failure.clone());
    }
}

/// Polls `condition` until it holds or five seconds pass.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..500 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
