use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReconError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Transport error: {url} - {message}")]
    Transport {
        url: String,
        message: String,
    },

    #[error("Parse error: {context} - {message}")]
    Parse {
        context: String,
        message: String,
    },

    #[error("No data: {0}")]
    NoData(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("File error: {path:?} - {message}")]
    File {
        path: PathBuf,
        message: String,
    },

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl ReconError {
    pub fn transport(url: impl Into<String>, message: impl ToString) -> Self {
        ReconError::Transport {
            url: url.into(),
            message: message.to_string(),
        }
    }

    pub fn parse(context: impl Into<String>, message: impl ToString) -> Self {
        ReconError::Parse {
            context: context.into(),
            message: message.to_string(),
        }
    }
}

impl From<reqwest::Error> for ReconError {
    fn from(error: reqwest::Error) -> Self {
        let url = error.url().map(|u| u.to_string()).unwrap_or_default();
        ReconError::Transport {
            url,
            message: error.to_string(),
        }
    }
}

pub type ReconResult<T> = std::result::Result<T, ReconError>;
