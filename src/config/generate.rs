use crate::config::Config;

use std::fs;
use std::path::Path;

impl Config {
    pub fn generate(path: impl AsRef<Path>) -> Result<(), anyhow::Error> {
        let path = path.as_ref();

        if path.exists() {
            return Err(anyhow::anyhow!("Configuration file already exists at: {}", path.display()));
        }

        Config::write_template_config(path)?;
        tracing::info!("Configuration file created at: {}", path.display());

        Ok(())
    }

    pub fn write_template_config(path: impl AsRef<Path>) -> Result<(), anyhow::Error> {
        fs::write(path, CONFIG_TEMPLATE)
            .map_err(|e| anyhow::anyhow!("Failed to write config file: {}", e))?;
        Ok(())
    }
}

const CONFIG_TEMPLATE: &str = r#"# Sample configuration file
# Copy this to config.toml and modify as needed

[smtp]
# Mail relay
server = "smtp.example.com"
port = 587
username = "smtp-username"
password = "smtp-password"
# "tls" (STARTTLS), "ssl" (implicit TLS) or "none"
encryption = "tls"
# Used when a message does not set its own sender
from_address = "noreply@example.com"
from_name = "Example"
connect_timeout_secs = 10
send_timeout_secs = 10

[templates]
# Directory holding <name>.html and <name>.plain pairs
dir = "templates"
# Keep <style> blocks in the HTML body after inlining them
keep_style_tags = false

[queue]
# Messages sent concurrently
workers = 8
# Messages waiting for a worker before enqueue is rejected
capacity = 256
"#;
