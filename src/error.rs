//! Crate-level errors for the server lifecycle, configuration and tests.

use crate::config::ConfigError;
use crate::pipeline::PipelineError;
use crate::routing::RouteError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Route(#[from] RouteError),

    #[error("server pipeline task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("{0}")]
    Message(String),
}

impl Error {
    pub fn msg(message: impl Into<String>) -> Self {
        Error::Message(message.into())
    }
}
