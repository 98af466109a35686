use thiserror::Error;

/// Result type for speaker bus operations
pub type Result<T> = std::result::Result<T, SpeakerBusError>;

/// Errors that can occur when talking to speakers over the bus
#[derive(Error, Debug)]
pub enum SpeakerBusError {
    /// The NATS client could not be set up
    #[error("NATS connect error: {0}")]
    Connect(#[from] async_nats::ConnectError),

    #[error("NATS publish error: {0}")]
    Publish(#[from] async_nats::PublishError),

    #[error("NATS subscribe error: {0}")]
    Subscribe(#[from] async_nats::SubscribeError),

    /// Connection was shut down or the driver task is gone
    #[error("Connection closed")]
    ConnectionClosed,

    /// The bus has not completed its handshake yet
    #[error("Transport unavailable")]
    TransportUnavailable,

    /// Bytes on the wire could not be decoded as an envelope
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// Content or subject the bus cannot carry
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Invalid client configuration
    #[error("Invalid config: {0}")]
    Config(String),
}

impl SpeakerBusError {
    pub(crate) fn malformed(detail: impl Into<String>) -> Self {
        SpeakerBusError::MalformedEnvelope(detail.into())
    }
}

impl From<flatbuffers::InvalidFlatbuffer> for SpeakerBusError {
    fn from(e: flatbuffers::InvalidFlatbuffer) -> Self {
        SpeakerBusError::malformed(e.to_string())
    }
}
