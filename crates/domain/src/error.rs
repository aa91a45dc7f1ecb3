/// Shared error type used across all Mew plugin crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("server status={status}: {body}")]
    Api { status: u16, body: String },

    #[error("gateway: {0}")]
    Gateway(String),

    #[error("llm: {0}")]
    Llm(String),

    #[error("config: {0}")]
    Config(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether the error is worth retrying at a transport layer.
    ///
    /// Auth, config, and not-found errors are never transient; everything
    /// that came out of the network or a 5xx is.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Http(_) | Error::Gateway(_) | Error::Llm(_) => true,
            Error::Api { status, .. } => *status == 408 || *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
