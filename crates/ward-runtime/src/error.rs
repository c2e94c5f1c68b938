use thiserror::Error;
use ward_host::MainThreadError;
use ward_tags::TagError;

/// Errors returned while building or tearing down a `WardContext`.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    MainThread(#[from] MainThreadError),
    #[error(transparent)]
    Tags(#[from] TagError),
    #[error("runtime task failed to complete: {0}")]
    Join(String),
}
