/// Shared error type used across the gateway crates.
///
/// Variants map directly onto the HTTP/SSE error taxonomy: `Model`,
/// `Tool`, and `Deadline` are adapter-local and never escape as HTTP
/// errors — they become SSE `error` events for a single model while the
/// rest of a generation continues.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("config: {0}")]
    Config(String),

    #[error("invalid request: {0}")]
    Input(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("session not found: {0}")]
    NotFound(String),

    #[error("session is busy")]
    BusySession,

    #[error("at capacity")]
    Overloaded,

    #[error("model {model_id}: {message}")]
    Model { model_id: String, message: String },

    #[error("tool {tool_name}: {message}")]
    Tool { tool_name: String, message: String },

    #[error("model {model_id}: deadline exceeded")]
    Deadline { model_id: String },

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// HTTP status code for request-level errors. Adapter-local variants
    /// (`Model`, `Tool`, `Deadline`) are never turned into HTTP responses;
    /// callers must not route them here.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Config(_) => 500,
            Error::Input(_) => 400,
            Error::Auth(_) => 401,
            Error::NotFound(_) => 404,
            Error::BusySession => 409,
            Error::Overloaded => 503,
            Error::Io(_) | Error::Json(_) | Error::Http(_) | Error::Other(_) => 500,
            Error::Model { .. } | Error::Tool { .. } | Error::Deadline { .. } => 500,
        }
    }
}
