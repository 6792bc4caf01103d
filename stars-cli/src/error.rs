use stars_link::LinkError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Link(#[from] LinkError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl From<toml::de::Error> for AppError {
    fn from(error: toml::de::Error) -> Self {
        AppError::Config(error.to_string())
    }
}

impl From<toml::ser::Error> for AppError {
    fn from(error: toml::ser::Error) -> Self {
        AppError::Config(error.to_string())
    }
}

impl AppError {
    /// Body to print in JSON mode: the client's login signal when there is one.
    pub fn to_json(&self) -> serde_json::Value {
        if let AppError::Link(e) = self
            && let Some(signal) = e.signal_body()
        {
            return signal;
        }
        serde_json::json!({
            "status": "error",
            "message": self.to_string(),
        })
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
