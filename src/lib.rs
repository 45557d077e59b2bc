pub mod config;
pub mod dispatch;
pub mod email;
pub mod error;
pub mod templates;
pub mod utils;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use config::Config;
use dispatch::{CountingLog, Dispatcher, Mailer, TracingLog};
use email::{CssInliner, MailSender, SmtpRelay};
use templates::EmailTemplates;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub sender: MailSender,
    pub mailer: Mailer,
    pub failures: CountingLog<TracingLog>,
}

impl AppState {
    /// Builds the send pipeline and starts the dispatcher. Must be called
    /// from inside a Tokio runtime.
    pub fn new(config: Config) -> Result<Arc<Self>, anyhow::Error> {
        let config = Arc::new(config);

        let templates = EmailTemplates::new(config.templates.dir.clone());

        if !templates.dir().is_dir() {
            tracing::warn!(
                "Template directory {} does not exist; every send will fail until it does",
                templates.dir().display()
            );
        }

        let inliner = CssInliner::new().keep_style_tags(config.templates.keep_style_tags);
        let transport = Arc::new(SmtpRelay::new(config.smtp.clone()));

        let sender = MailSender::new(config.clone(), templates, inliner, transport);
        let failures = CountingLog::new(TracingLog);
        let mailer = Dispatcher::spawn(sender.clone(), failures.clone());

        Ok(Arc::new(Self {
            config,
            sender,
            mailer,
            failures,
        }))
    }
}

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(version, about)]
pub struct Args {
    #[arg(short, long, default_value = "config.toml")]
    pub config: std::path::PathBuf,
    /// Template directory; overrides templates.dir from the config file
    #[arg(long, global = true)]
    pub templates: Option<std::path::PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Queue one email and wait for it to be delivered
    Send {
        #[arg(long)]
        to: String,
        #[arg(long)]
        subject: String,
        /// Template name, without extension
        #[arg(long, default_value = "")]
        template: String,
        /// Template data as a JSON document
        #[arg(long)]
        data: Option<String>,
        /// Sender address; defaults to smtp.from_address
        #[arg(long, default_value = "")]
        from: String,
        #[arg(long = "attach")]
        attachments: Vec<std::path::PathBuf>,
    },
    /// Render a template pair to stdout without sending anything
    Preview {
        #[arg(long, default_value = "")]
        template: String,
        #[arg(long)]
        data: Option<String>,
    },
    /// Write a sample configuration file
    GenerateConfig {
        #[arg(short, long, default_value = "config.toml")]
        output: std::path::PathBuf,
    },
}

impl Args {
    pub fn build() -> Self {
        Args::parse()
    }
}

/// Parses the `--data` argument; a missing value means no data.
pub fn parse_data(data: Option<&str>) -> Result<serde_json::Value, anyhow::Error> {
    match data {
        Some(raw) => serde_json::from_str(raw)
            .map_err(|e| anyhow::anyhow!("Invalid --data JSON: {}", e)),
        None => Ok(serde_json::Value::Null),
    }
}
