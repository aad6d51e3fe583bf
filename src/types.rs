use enum_map::{enum_map, EnumMap};
use num_derive::{FromPrimitive, ToPrimitive};

/// Largest value a 31-bit wire field can carry (stream IDs, window increments).
pub const U31_MAX: u32 = u32::MAX >> 1;

/// Largest frame payload the framing layer accepts.
pub const MAX_FRAME_SIZE: usize = 16_383;

/// Initial per-stream flow-control window.
pub const DEFAULT_WINDOW_SIZE: i64 = 65_535;

/// Default priority weight of a stream.
pub const DEFAULT_WEIGHT: u16 = 16;

pub type StreamId = u32;

/// https://tools.ietf.org/html/draft-ietf-httpbis-http2-06#section-6
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, FromPrimitive, ToPrimitive)]
#[repr(u8)]
pub enum FrameType {
    Data = 0x0,
    Headers = 0x1,
    Priority = 0x2,
    ResetStream = 0x3,
    Settings = 0x4,
    PushPromise = 0x5,
    Ping = 0x6,
    GoAway = 0x7,
    WindowUpdate = 0x8,
    Continuation = 0x9,
}

/// First type code of the extensible range. Codes from here up are carried
/// verbatim in `Frame::Extension` instead of being mapped to `FrameType`.
pub const EXTENSIBLE_TYPE_BASE: u8 = 0x10;

/// First type code of the experimental range.
pub const EXPERIMENTAL_TYPE_BASE: u8 = 0xf0;

/// https://tools.ietf.org/html/draft-ietf-httpbis-http2-06#section-7
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, FromPrimitive, ToPrimitive)]
#[repr(u32)]
#[non_exhaustive]
pub enum ErrorType {
    /// The associated condition is not a result of an error. For example, a GOAWAY might include this code to indicate graceful shutdown of a connection.
    NoError = 0x0,
    /// The endpoint detected an unspecific protocol error. This error is for use when a more specific error code is not available.
    ProtocolError = 0x1,
    /// The endpoint encountered an unexpected internal error.
    InternalError = 0x2,
    /// The endpoint detected that its peer violated the flow-control protocol.
    FlowControlError = 0x3,
    /// The endpoint sent a SETTINGS frame but did not receive a response in a timely manner.
    SettingsTimeout = 0x4,
    /// The endpoint received a frame after a stream was half-closed.
    StreamClosed = 0x5,
    /// The endpoint received a frame with an invalid size.
    FrameSizeError = 0x6,
    /// The endpoint refused the stream prior to performing any application processing.
    RefusedStream = 0x7,
    /// Used by the endpoint to indicate that the stream is no longer needed.
    Cancel = 0x8,
    /// The endpoint is unable to maintain the header compression context for the connection.
    CompressionError = 0x9,
    /// The connection established in response to a CONNECT request was reset or abnormally closed.
    ConnectError = 0xa,
    /// The endpoint detected that its peer is exhibiting a behavior that might be generating excessive load.
    EnhanceYourCalm = 0xb,
    /// The underlying transport has properties that do not meet minimum security requirements.
    InadequateSecurity = 0xc,
}

/// https://tools.ietf.org/html/draft-ietf-httpbis-http2-06#section-6.5.2
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    FromPrimitive,
    ToPrimitive,
    enum_map::Enum,
)]
#[repr(u16)]
#[non_exhaustive]
pub enum SettingsParameter {
    /// Informs the remote endpoint of the maximum size of the header compression table used to decode header blocks, in octets. The initial value is 4,096 octets.
    HeaderTableSize = 0x1,
    /// Disables server push when set to 0. The initial value is 1, which indicates that server push is permitted.
    EnablePush = 0x2,
    /// Indicates the maximum number of concurrent streams that the sender will allow.
    MaxConcurrentStreams = 0x3,
    /// Indicates the sender's initial window size (in octets) for stream-level flow control. The initial value is 2^16-1 (65,535) octets.
    InitialWindowSize = 0x4,
}

/// Protocol-defined values every connection starts from, before the first
/// SETTINGS exchange.
#[must_use]
pub fn default_settings() -> EnumMap<SettingsParameter, u32> {
    enum_map! {
        SettingsParameter::HeaderTableSize => 4096,
        SettingsParameter::EnablePush => 1,
        SettingsParameter::MaxConcurrentStreams => U31_MAX,
        SettingsParameter::InitialWindowSize => 65_535,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_traits::{FromPrimitive, ToPrimitive};

    #[test]
    fn frame_type_codes() {
        assert_eq!(FrameType::from_u8(0x0), Some(FrameType::Data));
        assert_eq!(FrameType::from_u8(0x9), Some(FrameType::Continuation));
        assert_eq!(FrameType::from_u8(0xa), None);
        assert_eq!(FrameType::GoAway.to_u8(), Some(0x7));
    }

    #[test]
    fn error_type_codes() {
        assert_eq!(ErrorType::from_u32(0xc), Some(ErrorType::InadequateSecurity));
        assert_eq!(ErrorType::from_u32(0xd), None);
        assert_eq!(ErrorType::CompressionError.to_u32(), Some(0x9));
    }

    #[test]
    fn settings_defaults() {
        let defaults = default_settings();
        assert_eq!(defaults[SettingsParameter::HeaderTableSize], 4096);
        assert_eq!(defaults[SettingsParameter::EnablePush], 1);
        assert_eq!(defaults[SettingsParameter::InitialWindowSize], 65_535);
    }
}
