use thiserror::Error;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("link is not connected")]
    NotConnected,
    #[error("connect failed: {0}")]
    ConnectFailed(String),
    #[error("send failed: {0}")]
    SendFailed(String),
    #[error("read failed: {0}")]
    ReadFailed(String),
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
}
