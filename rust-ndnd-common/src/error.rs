//! Error types for the ndnd forwarder.

use thiserror::Error;

/// All possible errors that can occur within the face system.
#[derive(Error, Debug)]
pub enum Error {
    /// Error related to TLV encoding/decoding.
    #[error("TLV error: {0}")]
    Tlv(String),

    /// Error related to NDN packet processing.
    #[error("NDN packet error: {0}")]
    NdnPacket(String),

    /// Error related to FaceUri parsing or canonization.
    #[error("FaceUri error: {0}")]
    FaceUri(String),

    /// Error raised while processing a configuration section.
    #[error("Config error: {0}")]
    Config(String),

    /// The requested persistency is not valid for the transport.
    #[error("Unsupported persistency: {0}")]
    UnsupportedPersistency(String),

    /// Error related to the underlying transport.
    #[error("Transport error: {0}")]
    Transport(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
