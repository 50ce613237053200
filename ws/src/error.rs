use thiserror::Error;

/// Unified error type for the gateway session engine.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Decompress(#[from] DecompressError),
    #[error("gateway rejected discovery request (code {code}): {message}")]
    GatewayRejected { code: i64, message: String },
    #[error(transparent)]
    State(#[from] StateError),
    #[error("session file i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = GatewayError> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("dial failed: {0}")]
    Dial(String),
    #[error("read failed: {0}")]
    Read(String),
    #[error("write failed: {0}")]
    Write(String),
    #[error("{0}")]
    Other(String),
}

/// Errors from `SignalCodec::decode`. See spec §4.1.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    #[error("truncated envelope header")]
    TruncatedHeader,
    #[error("truncated sequence number")]
    TruncatedSN,
    #[error("truncated payload")]
    TruncatedPayload,
}

#[derive(Debug, Error)]
pub enum DecompressError {
    #[error("zlib: {0}")]
    Zlib(String),
    #[error("zstd: {0}")]
    Zstd(String),
    #[error("dictionary archive: {0}")]
    Dictionary(String),
    #[error("unknown dictionary: {0}")]
    UnknownDictionary(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("session is not open")]
    NotOpen,
    #[error("session is already open")]
    AlreadyOpen,
    #[error("session is closed")]
    Closed,
    #[error("invalid protocol payload: {0}")]
    InvalidPayload(String),
    #[error("unknown signal type: {0}")]
    UnknownSignal(i64),
}
