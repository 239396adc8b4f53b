use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigValidationError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Connection configuration error: {0}")]
    Connection(String),
}

impl ConfigValidationError {
    pub fn config(details: impl Into<String>) -> Self {
        Self::Config(details.into())
    }

    pub fn connection(details: impl Into<String>) -> Self {
        Self::Connection(details.into())
    }
}
