use thiserror::Error;

/// A model load attempt failed. Cloneable so the same outcome can be handed
/// to every caller that was waiting on the attempt.
#[derive(Debug, Clone, Error)]
#[error("model failed to load: {0}")]
pub struct LoadError(pub String);

/// The model raised while handling one request. Does not say anything about
/// model health; the handle stays `Ready`.
#[derive(Debug, Error)]
#[error("inference failed: {0}")]
pub struct InferError(pub String);

/// Everything `GenerationService::generate` can return. All internal
/// failures fold into one of these kinds at the service boundary.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid request: {0}")]
    Validation(String),

    /// The model is not loaded and the load attempt failed. Recoverable: the
    /// next request retries the load.
    #[error("model is not available: {0}")]
    Unavailable(String),

    /// Admission rejected the request because the wait queue is full.
    #[error("server is at capacity, request rejected")]
    Overloaded,

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("failed to persist artifact: {0}")]
    Persistence(String),
}

impl ServiceError {
    pub fn persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

impl From<LoadError> for ServiceError {
    fn from(err: LoadError) -> Self {
        Self::Unavailable(err.0)
    }
}

impl From<InferError> for ServiceError {
    fn from(err: InferError) -> Self {
        Self::Inference(err.0)
    }
}
