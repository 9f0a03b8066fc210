//! Progress reporting for `compose()`.

use std::{
    fmt,
    sync::{Arc, Mutex, PoisonError},
};

use tracing::{debug, info, warn};

use crate::stage::StageFamily;

/// What the executor is doing.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    ComposeStarted { steps: usize },
    StageStarted { step: String, family: StageFamily },
    /// `rows` is the size of the working data after the stage.
    StageCompleted { step: String, family: StageFamily, rows: usize },
    ComposeCompleted { rows: usize },
    ComposeFailed { step: Option<String>, error: String },
}

/// Receives executor events; must not fail.
pub trait ProgressSink: Send + Sync + fmt::Debug {
    fn emit(&self, event: &PipelineEvent);
}

/// Forwards events to `tracing`. The default sink.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn emit(&self, event: &PipelineEvent) {
        match event {
            PipelineEvent::ComposeStarted { steps } => info!(steps, "composing pipeline"),
            PipelineEvent::StageStarted { step, family } => debug!(step = %step, %family, "stage started"),
            PipelineEvent::StageCompleted { step, family, rows } => {
                info!(step = %step, %family, rows, "stage completed")
            }
            PipelineEvent::ComposeCompleted { rows } => info!(rows, "pipeline composed"),
            PipelineEvent::ComposeFailed { step, error } => {
                warn!(step = step.as_deref().unwrap_or("-"), error = %error, "pipeline composition failed")
            }
        }
    }
}

/// Keeps every event; clones share the same log.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<PipelineEvent>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Names of started steps, in execution order.
    pub fn started_steps(&self) -> Vec<String> {
        self.events().into_iter()
            .filter_map(|event| match event {
                PipelineEvent::StageStarted { step, .. } => Some(step),
                _ => None,
            })
            .collect()
    }
}

impl ProgressSink for RecordingSink {
    fn emit(&self, event: &PipelineEvent) {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).push(event.clone());
    }
}
