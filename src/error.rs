//! Errors a caller may want to match on.
//!
//! Public operations return `anyhow::Result`; the conditions below travel inside
//! the `anyhow::Error` and can be recovered with `err.downcast_ref::<PipelineError>()`.

/// Configuration, state and data errors raised by the pipeline and its stages.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("invalid pipeline: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("pipeline already composed; re-instantiate it to compose again")]
    AlreadyComposed,

    #[error("pipeline not composed; call compose() first")]
    NotComposed,

    #[error("urban layer has already been mapped; create a new layer instance to map again")]
    AlreadyMapped,

    #[error("urban layer not built; call from_place(), from_bbox() or from_file() first")]
    LayerNotBuilt,

    #[error("{stage}: missing column(s) {}", .columns.join(", "))]
    MissingColumns { stage: String, columns: Vec<String> },

    #[error("{stage}: `{attribute}` is not set")]
    MissingAttribute { stage: String, attribute: String },

    #[error("{stage}: input data is empty")]
    EmptyInput { stage: String },

    #[error("unknown {family} type `{name}`{}; available: {}", suggestion_hint(.suggestion), .available.join(", "))]
    UnknownStageType {
        family: String,
        name: String,
        available: Vec<String>,
        suggestion: Option<String>,
    },

    #[error("{family} `{name}` is already registered")]
    DuplicateRegistration { family: String, name: String },

    #[error("pipeline has no visualiser step")]
    NoVisualiser,

    #[error("unsupported preview format `{0}`; expected `ascii` or `json`")]
    UnsupportedFormat(String),

    #[error("{factory}: {message}")]
    IncompleteFactory { factory: String, message: String },
}

fn suggestion_hint(suggestion: &Option<String>) -> String {
    match suggestion {
        Some(name) => format!(" (did you mean `{name}`?)"),
        None => String::new(),
    }
}

impl PipelineError {
    pub(crate) fn missing_columns<S: AsRef<str>>(stage: &str, columns: &[S]) -> Self {
        Self::MissingColumns {
            stage: stage.to_string(),
            columns: columns.iter().map(|c| c.as_ref().to_string()).collect(),
        }
    }

    pub(crate) fn missing_attribute(stage: &str, attribute: &str) -> Self {
        Self::MissingAttribute { stage: stage.to_string(), attribute: attribute.to_string() }
    }

    pub(crate) fn incomplete(factory: &str, message: impl Into<String>) -> Self {
        Self::IncompleteFactory { factory: factory.to_string(), message: message.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_type_lists_names_and_suggestion() {
        let err = PipelineError::UnknownStageType {
            family: "imputer".into(),
            name: "SimpleGeoImputr".into(),
            available: vec!["AddressGeoImputer".into(), "SimpleGeoImputer".into()],
            suggestion: Some("SimpleGeoImputer".into()),
        };
        let msg = err.to_string();
        assert!(msg.contains("did you mean `SimpleGeoImputer`"));
        assert!(msg.contains("AddressGeoImputer, SimpleGeoImputer"));
    }

    #[test]
    fn validation_joins_problems() {
        let err = PipelineError::Validation(vec!["a".into(), "b".into()]);
        assert_eq!(err.to_string(), "invalid pipeline: a; b");
    }
}
