#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Validation failed: unknown components {0:?}")]
    UnknownComponents(Vec<String>),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Job queue is full ({capacity} jobs pending)")]
    QueueFull { capacity: usize },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
