mod service;
pub use service::*;

mod inline;
pub use inline::*;

mod transport;
pub use transport::*;

mod envelope;
pub use envelope::*;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::SMTP;

pub const DEFAULT_TEMPLATE: &str = "mail";

/// A request to send one email, as handed to the queue.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Message {
    pub from: String,
    pub from_name: String,
    pub to: String,
    pub subject: String,
    pub attachments: Vec<PathBuf>,
    pub data: Value,
    pub template: String,
}

impl Message {
    pub fn new(to: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            subject: subject.into(),
            ..Default::default()
        }
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = template.into();
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    pub fn with_from(mut self, address: impl Into<String>, name: impl Into<String>) -> Self {
        self.from = address.into();
        self.from_name = name.into();
        self
    }

    pub fn attach(mut self, path: impl Into<PathBuf>) -> Self {
        self.attachments.push(path.into());
        self
    }

    /// Fills every empty field from the relay defaults and builds the render
    /// context. `self` is left untouched.
    pub fn normalize(&self, smtp: &SMTP) -> NormalizedMessage {
        let from = if self.from.is_empty() {
            smtp.from_address.clone()
        } else {
            self.from.clone()
        };

        let from_name = if self.from_name.is_empty() {
            smtp.from_name.clone()
        } else {
            self.from_name.clone()
        };

        NormalizedMessage {
            from,
            from_name,
            to: self.to.clone(),
            subject: self.subject.clone(),
            attachments: self.attachments.clone(),
            data_map: data_map(&self.data),
            template: self.template_name().to_string(),
        }
    }

    /// The template this message will be rendered with.
    pub fn template_name(&self) -> &str {
        if self.template.is_empty() {
            DEFAULT_TEMPLATE
        } else {
            &self.template
        }
    }
}

/// The render context handed to every template: `{"message": data}`.
pub fn data_map(data: &Value) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("message".to_string(), data.clone());
    map
}

#[derive(Clone, Debug, PartialEq)]
pub struct NormalizedMessage {
    pub from: String,
    pub from_name: String,
    pub to: String,
    pub subject: String,
    pub attachments: Vec<PathBuf>,
    pub data_map: Map<String, Value>,
    pub template: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderedEmail {
    pub html: String,
    pub plain: String,
}
