use thiserror::Error;

use freshet_ack::AckError;
use freshet_codec::CodecError;

/// Errors surfaced while routing a batch toward its consumer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("process directory requires at least one {0} process")]
    EmptyRole(&'static str),
    #[error("delivery interrupted by shutdown")]
    ShuttingDown,
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Ack(#[from] AckError),
}

/// Errors surfaced by the batch consumer loop.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExecError {
    /// Only worker and combiner processes consume batches.
    #[error("process role cannot consume batches")]
    NotAConsumer,
    /// A declared count or length disagreed with the buffer; fatal, the
    /// stream position can no longer be trusted.
    #[error(transparent)]
    Decode(#[from] CodecError),
}
