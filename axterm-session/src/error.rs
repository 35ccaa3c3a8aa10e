use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    #[error("no response after {retries} tries (RTO {:.1}s)", rto.as_secs_f32())]
    RetriesExhausted { retries: u32, rto: Duration },
    #[error("remote station disconnected the link")]
    RemoteDisconnect,
    #[error("peer rejected a frame")]
    FrameReject,
}
