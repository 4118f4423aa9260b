use navigation::NavigationError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("workflow is already processing a request")]
    Busy,
    #[error("backend rejected the request: {0}")]
    Gateway(String),
    #[error(transparent)]
    InvalidArgument(#[from] NavigationError),
    #[error("backend call failed: {0:#}")]
    Transport(anyhow::Error),
}
