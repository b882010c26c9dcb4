//! Errors raised while loading settings and preparing `~/.sendline`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    /// A setting holds a value the pipeline cannot run with.
    #[error("Invalid setting {key}: {reason}")]
    InvalidSetting {
        key: &'static str,
        reason: &'static str,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The relay or probe URL does not parse.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// `config.json` is not valid JSON for [`crate::Config`].
    #[error("Malformed config file: {0}")]
    ConfigFile(#[from] serde_json::Error),

    #[error("Could not determine home directory")]
    NoHomeDir,
}

pub type CoreResult<T> = Result<T, CoreError>;
