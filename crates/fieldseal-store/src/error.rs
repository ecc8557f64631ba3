use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Invalid persisted timestamp \"{0}\"")]
    InvalidTimestamp(String),

    #[error("Entity store \"{entity_type}\" failed: {message}")]
    Owner {
        entity_type: String,
        message: String,
    },
}
