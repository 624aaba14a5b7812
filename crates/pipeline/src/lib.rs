mod dead_letter;
mod progress;
mod result;
mod run;

pub use self::dead_letter::DeadLetterWriter;
pub use self::progress::ProgressFn;
pub use self::result::{PipelineResult, RunState};
pub use self::run::{CosmosOptions, DocumentStream, Pipeline, PipelineOptions};

use document::{BuildError, SerializationError};
use mapping::MappingError;

/// Per-record failure: routed to the dead-letter queue in `report` mode,
/// surfaced as a run error in `strict` mode.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error(transparent)]
    Mapping(#[from] MappingError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Serialization(#[from] SerializationError),

    #[error("validation failed: {0}")]
    Validation(String),
}

impl RecordError {
    pub fn kind(&self) -> &'static str {
        match self {
            RecordError::Mapping(_) => "MappingError",
            RecordError::Build(_) => "BuildError",
            RecordError::Serialization(_) => "SerializationError",
            RecordError::Validation(_) => "ValidationError",
        }
    }
}

/// Run-level failure: aborts the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] mapping::ConfigError),

    #[error(transparent)]
    Shape(#[from] shapes::ShapeLoadError),

    #[error(transparent)]
    Adapter(#[from] sources::AdapterError),

    #[error("record failed in strict mode: {0}")]
    Record(#[from] RecordError),

    #[error(transparent)]
    Validation(#[from] validation::ValidationError),

    #[error(transparent)]
    Cosmos(#[from] cosmos::CosmosError),

    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("this pipeline already ran and its source is not restartable")]
    NotRestartable,
}

impl From<BuildError> for PipelineError {
    fn from(e: BuildError) -> PipelineError {
        PipelineError::Record(RecordError::Build(e))
    }
}
