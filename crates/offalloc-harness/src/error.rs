use thiserror::Error;

use offalloc_core::{ConfigError, HandleError, IntegrityError};

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("config: {0}")]
    Config(#[from] ConfigError),
    #[error("step {step}: trace frees unknown id {id}")]
    UnknownId { step: usize, id: u64 },
    #[error("step {step}: trace reuses live id {id}")]
    DuplicateId { step: usize, id: u64 },
    #[error("step {step}: allocator rejected free of id {id}: {source}")]
    FreeRejected {
        step: usize,
        id: u64,
        #[source]
        source: HandleError,
    },
    #[error("step {step}: integrity check failed: {source}")]
    Integrity {
        step: usize,
        #[source]
        source: IntegrityError,
    },
}
