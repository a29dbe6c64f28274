use thiserror::Error;

#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("allocation failed while building catalogue entry")]
    CatalogueFull,

    #[error("network interface error: {0}")]
    Network(String),

    #[error("service discovery error: {0}")]
    Discovery(String),

    #[error("local print service error: {0}")]
    PrintService(String),

    #[error("print service request timed out")]
    Timeout,

    #[error("IPP protocol error: {0}")]
    Ipp(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, DaemonError>;
