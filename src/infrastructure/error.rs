use thiserror::Error;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("Invalid plan: {0}")]
    InvalidPlan(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Plan API error (status {status}): {message}")]
    Api { status: u16, message: String },
    #[error("Plan API rejected request (status {status}): {message}")]
    ApiRejected { status: u16, message: String },
    #[error("Unauthorized: access token rejected")]
    Unauthorized,
    #[error("Credential error: {0}")]
    Credential(String),
    #[error("Enforcement sink error: {0}")]
    Sink(String),
}
