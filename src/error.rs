use thiserror::Error;

#[derive(Error, Debug)]
pub enum TurnstileError {
    #[error("Upstream API error: {0}")]
    Upstream(String),

    #[error("Parsing error: {0}")]
    Parsing(String),
}

impl From<reqwest::Error> for TurnstileError {
    fn from(err: reqwest::Error) -> Self {
        TurnstileError::Upstream(err.to_string())
    }
}

impl From<serde_json::Error> for TurnstileError {
    fn from(err: serde_json::Error) -> Self {
        TurnstileError::Parsing(err.to_string())
    }
}
