use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConsoleError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {detail}")]
    Api { status: u16, detail: String },

    #[error("Session expired, please log in again")]
    Unauthorized,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl ConsoleError {
    /// True when the backend answered 404. Used by the session panel to
    /// tell "never saved" apart from real failures.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ConsoleError::Api { status: 404, .. })
    }
}

impl From<&str> for ConsoleError {
    fn from(error: &str) -> Self {
        ConsoleError::Stream(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ConsoleError>;
