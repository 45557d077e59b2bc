use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tera::{Tera, Context};

use crate::error::MailError;
use crate::utils::{error_chain, template_name_valid};

/// Parent every artifact is rendered through. Only the `body` block reaches
/// the output; an artifact without one trips the `throw`.
const BODY_LAYOUT: &str = "__body__";
const BODY_LAYOUT_SOURCE: &str =
    r#"{% block body %}{{ throw(message="template does not define a body block") }}{% endblock body %}"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Html,
    Plain,
}

impl Format {
    pub fn extension(self) -> &'static str {
        match self {
            Format::Html => "html",
            Format::Plain => "plain",
        }
    }
}

/// Renders `<dir>/<name>.html` and `<dir>/<name>.plain` template pairs.
///
/// Artifacts are read from disk on every call, so edits show up without a
/// restart.
#[derive(Debug, Clone)]
pub struct EmailTemplates {
    dir: PathBuf,
}

impl EmailTemplates {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn artifact_path(&self, name: &str, format: Format) -> PathBuf {
        self.dir.join(format!("{}.{}", name, format.extension()))
    }

    pub async fn render(
        &self,
        name: &str,
        format: Format,
        data: &Map<String, Value>,
    ) -> Result<String, MailError> {
        if !template_name_valid(name) {
            return Err(MailError::TemplateNotFound(name.to_string()));
        }

        let path = self.artifact_path(name, format);

        let source = match tokio::fs::read_to_string(&path).await {
            Ok(source) => source,
            Err(e) => {
                tracing::debug!("Could not read template {}: {}", path.display(), e);
                return Err(MailError::TemplateNotFound(path.display().to_string()));
            }
        };

        let artifact = format!("{}.{}", name, format.extension());

        render_body(&artifact, &source, data)
    }
}

/// Renders the `body` block of `source` with `data` as the context.
///
/// `artifact` names the template; an `.html` suffix turns on autoescaping.
pub fn render_body(
    artifact: &str,
    source: &str,
    data: &Map<String, Value>,
) -> Result<String, MailError> {
    let child = format!("{{% extends \"{}\" %}}\n{}", BODY_LAYOUT, source);

    let mut tera = Tera::default();

    tera.add_raw_templates(vec![
        (BODY_LAYOUT, BODY_LAYOUT_SOURCE),
        (artifact, child.as_str()),
    ])
    .map_err(|e| MailError::TemplateInvalid {
        name: artifact.to_string(),
        reason: error_chain(&e),
    })?;

    let context = Context::from_serialize(data)
        .map_err(|e| MailError::TemplateExecutionFailed {
            name: artifact.to_string(),
            reason: error_chain(&e),
        })?;

    tera.render(artifact, &context)
        .map_err(|e| MailError::TemplateExecutionFailed {
            name: artifact.to_string(),
            reason: error_chain(&e),
        })
}
