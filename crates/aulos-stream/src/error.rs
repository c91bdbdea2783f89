use thiserror::Error;

pub type StreamResult<T> = Result<T, StreamError>;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("write access is not supported")]
    WriteUnsupported,

    #[error("malformed remote-track payload: {0}")]
    MalformedEnvelope(#[from] serde_json::Error),

    #[error("cache error: {0}")]
    Cache(#[from] aulos_cache::CacheError),

    #[error("network error: {0}")]
    Net(#[from] aulos_net::NetError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
