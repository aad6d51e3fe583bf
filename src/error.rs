use crate::stream::StreamState;
use crate::types::StreamId;

/// Failures that poison the shared compression state or reject a frame at
/// encode time. These are fatal for the connection.
#[derive(thiserror::Error, Debug)]
pub enum CompressionError {
    #[error("{0} byte payload exceeds the 16,383 byte frame limit")]
    PayloadTooLong(usize),
    #[error("stream ID {0} exceeds 2^31-1")]
    StreamIdTooLarge(StreamId),
    #[error("window increment {0} exceeds 2^31-1")]
    WindowIncrementTooLarge(u32),
    #[error("PING payload must be exactly 8 bytes, got {0}")]
    BadPingPayload(usize),
    #[error("priority weight {0} is outside 1..=256")]
    BadWeight(u16),
    #[error("cannot encode unknown setting 0x{0:04x}")]
    UnknownSetting(u16),
    #[error("prefixed integer exceeds 2^31-1")]
    IntegerOverflow,
    #[error("header block ended in the middle of a command")]
    TruncatedHeaderBlock,
    #[error("index {0} is outside the header table")]
    IndexOutOfRange(usize),
    #[error("table size {requested} exceeds the advertised limit {limit}")]
    TableSizeOverLimit { requested: usize, limit: usize },
    #[error("invalid huffman coding")]
    BadHuffmanCode,
    #[error("header block must be encoded before framing")]
    UnencodedHeaderBlock,
    #[error("eviction cascade did not stabilize")]
    UnstableEviction,
}

/// Structural violations found while parsing frames, plus stream lifecycle
/// violations. Scoped to a stream where one is named.
#[derive(thiserror::Error, Debug)]
pub enum ProtocolError {
    #[error("unknown frame type 0x{0:02x}")]
    UnknownFrameType(u8),
    #[error("unknown error code {0}")]
    UnknownErrorCode(u32),
    #[error("payload is shorter than its type-specific fields")]
    PayloadTooShort,
    #[error("{length} byte payload exceeds the 16,383 byte frame limit")]
    FrameTooLarge { length: usize },
    #[error("{padding} bytes of padding declared but only {remaining} bytes remain")]
    PaddingTooLarge { padding: usize, remaining: usize },
    #[error("stream {0} cannot depend on itself")]
    SelfDependency(StreamId),
    #[error("header block reached the stream before being decoded")]
    UndecodedHeaderBlock,
    #[error("frame type 0x{code:02x} is not allowed on stream {id} in state {state:?}")]
    InvalidTransition {
        id: StreamId,
        state: StreamState,
        code: u8,
    },
    #[error("frame received on closed stream {0}")]
    StreamClosed(StreamId),
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Compression(#[from] CompressionError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
