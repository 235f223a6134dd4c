pub mod alarm;
pub mod aws;
pub mod config;
pub mod consumer;
pub mod notify;
pub mod pipeline;
pub mod retry;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("no metric filter for {namespace}/{metric_name}")]
    NoMetricFilter {
        namespace: String,
        metric_name: String,
    },
    #[error("throttled: {0}")]
    Throttled(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("malformed input: {0}")]
    MalformedInput(String),
    #[error("delivery failed: {0}")]
    Delivery(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether the originating queue message should be left for
    /// redelivery. Malformed payloads are excluded: redelivery cannot
    /// fix them, so they are acknowledged and dropped.
    pub fn is_redeliverable(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::Throttled(_))
    }
}
