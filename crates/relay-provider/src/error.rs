use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Invalid relay URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Relay URL cannot be a base: {0}")]
    NotABase(String),
}

pub type RelayResult<T> = Result<T, RelayError>;
