use std::{fmt, str::FromStr};

use serde_json::Value;

use crate::error::PipelineError;

/// Output flavour for `preview`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PreviewFormat {
    #[default]
    Ascii,
    Json,
}

impl FromStr for PreviewFormat {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ascii" => Ok(Self::Ascii),
            "json" => Ok(Self::Json),
            _ => Err(PipelineError::UnsupportedFormat(s.to_string())),
        }
    }
}

/// A stage or pipeline description.
#[derive(Debug, Clone, PartialEq)]
pub enum Preview {
    Ascii(String),
    Json(Value),
}

impl Preview {
    pub fn as_ascii(&self) -> Option<&str> {
        match self {
            Preview::Ascii(text) => Some(text),
            Preview::Json(_) => None,
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Preview::Json(value) => Some(value),
            Preview::Ascii(_) => None,
        }
    }

    /// JSON form regardless of flavour; ascii text becomes a string.
    pub fn into_json(self) -> Value {
        match self {
            Preview::Ascii(text) => Value::String(text),
            Preview::Json(value) => value,
        }
    }
}

impl fmt::Display for Preview {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Preview::Ascii(text) => f.write_str(text),
            Preview::Json(value) => write!(f, "{value:#}"),
        }
    }
}

/// Default stage preview: a `title` line followed by the stage's configuration keys.
pub(crate) fn config_preview(title: &str, type_name: &str, config: &Value, format: PreviewFormat) -> Preview {
    match format {
        PreviewFormat::Json => Preview::Json(serde_json::json!({
            "type": type_name,
            "config": config,
        })),
        PreviewFormat::Ascii => {
            let mut lines = vec![format!("{title}: {type_name}")];
            if let Some(map) = config.as_object() {
                let entries = map.iter()
                    .filter(|(_, value)| !value.is_null())
                    .collect::<Vec<_>>();
                for (i, (key, value)) in entries.iter().enumerate() {
                    let branch = if i + 1 == entries.len() { "└──" } else { "├──" };
                    let shown = match value {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    lines.push(format!("  {branch} {key}: {shown}"));
                }
            }
            Preview::Ascii(lines.join("\n"))
        }
    }
}
