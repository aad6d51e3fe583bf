#![warn(future_incompatible, nonstandard_style, rust_2018_idioms, unused)]
#![warn(clippy::pedantic)]
#![allow(
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::wildcard_imports,
    clippy::similar_names,
    clippy::cast_possible_truncation, // TODO
    clippy::too_many_lines, // TODO
)]

mod error;
mod flags;
mod frame;
pub mod hpack;
pub mod huffman;
mod stream;
mod types;

pub use bytes::Bytes;
pub use error::{CompressionError, Error, ProtocolError};
pub use flags::{
    ContinuationFlags, DataFlags, Flags, HeadersFlags, PingFlags, PriorityFlags, PushPromiseFlags,
    SettingsFlags,
};
pub use frame::{Frame, HeaderBlock, HEADER_LEN};
pub use hpack::{Decoder, Encoder, Header};
pub use stream::{
    exclusive_insertion, CloseReason, Produced, Producer, QueueEntry, Stream, StreamEvent,
    StreamState,
};
pub use types::{
    default_settings, ErrorType, FrameType, SettingsParameter, StreamId, DEFAULT_WEIGHT,
    DEFAULT_WINDOW_SIZE, EXPERIMENTAL_TYPE_BASE, EXTENSIBLE_TYPE_BASE, MAX_FRAME_SIZE, U31_MAX,
};
