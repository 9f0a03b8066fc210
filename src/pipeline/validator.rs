use ahash::AHashSet;

use crate::{
    error::PipelineError,
    stage::{Stage, Step},
};

use super::schema::PipelineSchema;

/// Check step names, families and per-family counts; every problem is collected.
pub(crate) fn validate(steps: &[Step], schema: &PipelineSchema) -> Result<(), PipelineError> {
    let mut problems = Vec::new();

    let mut seen = AHashSet::new();
    for step in steps {
        if !seen.insert(step.name()) {
            problems.push(format!("duplicate step name `{}`", step.name()));
        }
    }

    for step in steps {
        match step.stage() {
            Stage::Other { type_name, .. } => problems.push(format!(
                "step `{}` holds a `{type_name}`, which is not a pipeline stage; did you forget to call .build()?",
                step.name(),
            )),
            stage if schema.bounds(stage.family()).is_none() => problems.push(format!(
                "step `{}` is a {} stage, which the pipeline schema does not allow",
                step.name(),
                stage.family(),
            )),
            _ => {}
        }
    }

    for &(family, bounds) in schema.entries() {
        let count = steps.iter().filter(|step| step.stage().family() == family).count();
        if !bounds.contains(count) {
            problems.push(format!("expected {bounds} {family} step(s), found {count}"));
        }
    }

    if problems.is_empty() { Ok(()) } else { Err(PipelineError::Validation(problems)) }
}
