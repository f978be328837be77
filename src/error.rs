use std::net::Ipv4Addr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PktforgeError {
    /* CHANNEL ERROR */
    #[error("can not acquire the raw channel: {e}")]
    ChannelSetupFailure { e: String },
    #[error("send packet to {dst} failed: {e}")]
    TransportFailure { dst: Ipv4Addr, e: String },
    #[error("create datalink channel failed")]
    CreateDatalinkChannelFailed,
    #[error("can not found the interface [{i}]")]
    CanNotFoundInterface { i: String },

    /* CODEC ERROR */
    #[error("truncated {layer} header: need {need} bytes, got {got}")]
    TruncatedHeader {
        layer: &'static str,
        need: usize,
        got: usize,
    },
    #[error("malformed frame: {reason}")]
    MalformedFrame { reason: String },
    #[error("build packet error occurred at [{location}]")]
    BuildPacketError { location: String },

    /* CONFIG ERROR */
    #[error("invalid configuration: {reason}")]
    InvalidConfiguration { reason: String },
    #[error("addr parse error")]
    AddrParseError(#[from] std::net::AddrParseError),
    #[error("serde json error")]
    SerdeJsonError(#[from] serde_json::Error),

    /* CAPTURE ERROR */
    #[error("can not open capture source [{path}]: {e}")]
    SourceOpenFailure { path: String, e: String },
    #[error("capture parse error: {e}")]
    CaptureParseError { e: String },

    /* OTHER ERROR */
    #[error("std error")]
    IOError(#[from] std::io::Error),
}

impl PktforgeError {
    /// Process exit code used by the command line front end.
    pub fn exit_code(&self) -> i32 {
        match self {
            PktforgeError::ChannelSetupFailure { .. } => 2,
            PktforgeError::SourceOpenFailure { .. } => 2,
            _ => 1,
        }
    }
}
