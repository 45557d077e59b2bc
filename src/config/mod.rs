mod generate;

use serde::{Serialize, Deserialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct ConfigBuilder {
    smtp: Option<SMTP>,
    templates: Option<Templates>,
    queue: Option<Queue>,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        ConfigBuilder::default()
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, anyhow::Error> {
        let path = path.as_ref();

        let config_content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => return Err(anyhow::anyhow!("Failed to read config file {}: {}", path.display(), e)),
        };

        Self::from_toml(&config_content)
    }

    pub fn from_toml(content: &str) -> Result<Self, anyhow::Error> {
        let config: Config = match toml::from_str(content) {
            Ok(config) => config,
            Err(e) => return Err(anyhow::anyhow!("Failed to parse config file: {}", e)),
        };

        Ok(Self {
            smtp: Some(config.smtp),
            templates: Some(config.templates),
            queue: Some(config.queue),
        })
    }

    pub fn with_templates_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        let templates = self.templates.get_or_insert(Templates::default());
        templates.dir = dir.into();
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        let queue = self.queue.get_or_insert(Queue::default());
        queue.workers = workers;
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        let queue = self.queue.get_or_insert(Queue::default());
        queue.capacity = capacity;
        self
    }

    pub fn build(self) -> Result<Config, anyhow::Error> {
        let smtp = self.smtp
            .ok_or_else(|| anyhow::anyhow!("SMTP configuration is required"))?;

        if smtp.port == 0 {
            return Err(anyhow::anyhow!("SMTP port must be non-zero"));
        }

        if smtp.from_address.parse::<lettre::Address>().is_err() {
            return Err(anyhow::anyhow!("Default from address is not a valid email address: {}", smtp.from_address));
        }

        let queue = self.queue.unwrap_or_default();

        if queue.workers == 0 || queue.capacity == 0 {
            return Err(anyhow::anyhow!("Queue workers and capacity must both be at least 1"));
        }

        Ok(Config {
            smtp,
            templates: self.templates.unwrap_or_default(),
            queue,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub smtp: SMTP,
    #[serde(default)]
    pub templates: Templates,
    #[serde(default)]
    pub queue: Queue,
}

/// Relay settings and sender defaults. Read-only once the dispatcher starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SMTP {
    pub server: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub encryption: SmtpEncryption,
    pub from_address: String,
    #[serde(default)]
    pub from_name: String,
    #[serde(default = "default_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub send_timeout_secs: u64,
}

impl SMTP {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }
}

/// How the relay connection is secured.
///
/// Parsed from the `encryption` string: `"tls"` negotiates STARTTLS on the
/// plaintext port, `"ssl"` wraps the connection in TLS from the start,
/// `"none"` disables transport security. Anything else falls back to STARTTLS.
#[derive(Default, Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(from = "String", into = "String")]
pub enum SmtpEncryption {
    None,
    #[default]
    StartTls,
    Tls,
}

impl From<&str> for SmtpEncryption {
    fn from(mode: &str) -> Self {
        match mode.trim().to_ascii_lowercase().as_str() {
            "tls" => SmtpEncryption::StartTls,
            "ssl" => SmtpEncryption::Tls,
            "none" => SmtpEncryption::None,
            _ => SmtpEncryption::StartTls,
        }
    }
}

impl From<String> for SmtpEncryption {
    fn from(mode: String) -> Self {
        SmtpEncryption::from(mode.as_str())
    }
}

impl From<SmtpEncryption> for String {
    fn from(mode: SmtpEncryption) -> Self {
        match mode {
            SmtpEncryption::None => "none".to_string(),
            SmtpEncryption::StartTls => "tls".to_string(),
            SmtpEncryption::Tls => "ssl".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Templates {
    pub dir: PathBuf,
    /// Leave `<style>` blocks in the HTML body after inlining them.
    pub keep_style_tags: bool,
}

impl Default for Templates {
    fn default() -> Self {
        Templates {
            dir: PathBuf::from("templates"),
            keep_style_tags: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Queue {
    /// Maximum number of messages being sent at the same time.
    pub workers: usize,
    /// Messages waiting for a free worker before enqueue starts rejecting.
    pub capacity: usize,
}

impl Default for Queue {
    fn default() -> Self {
        Queue {
            workers: 8,
            capacity: 256,
        }
    }
}

fn default_port() -> u16 {
    587
}

fn default_timeout_secs() -> u64 {
    10
}
