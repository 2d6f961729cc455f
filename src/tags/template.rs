//! # Tag Value Templates
//!
//! Tag values may reference the owning PVC with `{{ ... }}` actions:
//!
//! | Action                           | Renders                                |
//! |----------------------------------|----------------------------------------|
//! | `{{ .Name }}`                    | PVC name                               |
//! | `{{ .Namespace }}`               | PVC namespace                          |
//! | `{{ .Labels.app }}`              | label `app`, empty when missing        |
//! | `{{ .Annotations.owner }}`       | annotation `owner`, empty when missing |
//! | `{{ index .Labels "a/b" }}`      | keys that are not identifiers          |
//! | `{{/* comment */}}`              | nothing                                |
//!
//! `{{-` and `-}}` trim whitespace on that side of the action. Output is not
//! HTML escaped.
//!
//! Rendering is fail-soft: a value with an unclosed or unsupported action is
//! kept exactly as written, so a typo never drops a tag.

use super::Tags;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::ResourceExt;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("unclosed action")]
    Unclosed,
    #[error("unsupported action: {0}")]
    Unsupported(String),
    #[error("can't evaluate field {0}")]
    UnknownField(String),
}

/// Data available to tag value templates
#[derive(Debug, Clone, Copy)]
pub struct TagTemplate<'a> {
    pub name: &'a str,
    pub namespace: &'a str,
    pub labels: &'a BTreeMap<String, String>,
    pub annotations: &'a BTreeMap<String, String>,
}

impl<'a> TagTemplate<'a> {
    #[must_use]
    pub fn from_pvc(pvc: &'a PersistentVolumeClaim) -> Self {
        Self {
            name: pvc.metadata.name.as_deref().unwrap_or_default(),
            namespace: pvc.metadata.namespace.as_deref().unwrap_or_default(),
            labels: pvc.labels(),
            annotations: pvc.annotations(),
        }
    }

    /// Render `text`, returning it unchanged if it cannot be rendered
    #[must_use]
    pub fn render(&self, text: &str) -> String {
        match self.try_render(text) {
            Ok(rendered) => rendered,
            Err(e) => {
                debug!(value = text, error = %e, "Leaving tag value unrendered");
                text.to_string()
            }
        }
    }

    /// Render `text`
    ///
    /// # Errors
    /// Returns an error for unclosed actions, unsupported actions and unknown fields
    #[allow(
        clippy::missing_errors_doc,
        reason = "Error documentation is provided in doc comments"
    )]
    pub fn try_render(&self, text: &str) -> Result<String, TemplateError> {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;

        while let Some(start) = rest.find(OPEN) {
            let mut literal = &rest[..start];
            let after_open = &rest[start + OPEN.len()..];
            let end = after_open.find(CLOSE).ok_or(TemplateError::Unclosed)?;
            let mut action = &after_open[..end];
            rest = &after_open[end + CLOSE.len()..];

            if let Some(trimmed) = trim_marker_left(action) {
                literal = literal.trim_end();
                action = trimmed;
            }
            let trim_right = if let Some(trimmed) = trim_marker_right(action) {
                action = trimmed;
                true
            } else {
                false
            };

            out.push_str(literal);
            out.push_str(&self.evaluate(action.trim())?);

            if trim_right {
                rest = rest.trim_start();
            }
        }

        out.push_str(rest);
        Ok(out)
    }

    fn evaluate(&self, action: &str) -> Result<String, TemplateError> {
        if action.starts_with("/*") && action.ends_with("*/") && action.len() >= 4 {
            return Ok(String::new());
        }

        let tokens: Vec<&str> = action.split_whitespace().collect();
        match tokens.as_slice() {
            [path] if path.starts_with('.') => self.field(path),
            ["index", map, key] => {
                let map = match *map {
                    ".Labels" => self.labels,
                    ".Annotations" => self.annotations,
                    other => return Err(TemplateError::Unsupported(format!("index {other}"))),
                };
                let key = unquote(key)
                    .ok_or_else(|| TemplateError::Unsupported(format!("index key {key}")))?;
                Ok(map.get(key).cloned().unwrap_or_default())
            }
            _ => Err(TemplateError::Unsupported(action.to_string())),
        }
    }

    fn field(&self, path: &str) -> Result<String, TemplateError> {
        let segments: Vec<&str> = path[1..].split('.').collect();
        if segments.iter().any(|segment| !is_identifier(segment)) {
            return Err(TemplateError::Unsupported(path.to_string()));
        }

        match segments.as_slice() {
            ["Name"] => Ok(self.name.to_string()),
            ["Namespace"] => Ok(self.namespace.to_string()),
            ["Labels"] => Ok(format_map(self.labels)),
            ["Annotations"] => Ok(format_map(self.annotations)),
            ["Labels", key] => Ok(self.labels.get(*key).cloned().unwrap_or_default()),
            ["Annotations", key] => Ok(self.annotations.get(*key).cloned().unwrap_or_default()),
            _ => Err(TemplateError::UnknownField(path.to_string())),
        }
    }
}

/// Render every tag value against the PVC
#[must_use]
pub fn render_tag_templates(pvc: &PersistentVolumeClaim, tags: Tags) -> Tags {
    let template = TagTemplate::from_pvc(pvc);
    tags.into_iter()
        .map(|(key, value)| {
            let rendered = template.render(&value);
            (key, rendered)
        })
        .collect()
}

fn trim_marker_left(action: &str) -> Option<&str> {
    let rest = action.strip_prefix('-')?;
    rest.starts_with(char::is_whitespace).then_some(rest)
}

fn trim_marker_right(action: &str) -> Option<&str> {
    let rest = action.strip_suffix('-')?;
    rest.ends_with(char::is_whitespace).then_some(rest)
}

fn is_identifier(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_')
}

fn unquote(literal: &str) -> Option<&str> {
    let inner = literal
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .or_else(|| literal.strip_prefix('`').and_then(|s| s.strip_suffix('`')))?;
    (!inner.contains('\\')).then_some(inner)
}

fn format_map(map: &BTreeMap<String, String>) -> String {
    let entries: Vec<String> = map.iter().map(|(k, v)| format!("{k}:{v}")).collect();
    format!("map[{}]", entries.join(" "))
}
