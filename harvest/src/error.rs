use thiserror::Error;

use crate::wire::WireError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("malformed payload: {0}")]
    Wire(#[from] WireError),
    #[error("api error: {0}")]
    Api(#[from] crate::api::Error),
    #[error("invalid day value: {0}")]
    Day(#[from] chrono::ParseError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Error: {0}")]
    Error(&'static str),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
