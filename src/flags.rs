use bitflags::bitflags;

bitflags! {
    /// https://tools.ietf.org/html/draft-ietf-httpbis-http2-06#section-6.1
    #[repr(transparent)]
    pub struct DataFlags: u8 {
        /// When set, bit 0 indicates that this frame is the last that the endpoint will send for the identified stream. Setting this flag causes the stream to enter one of the "half-closed" states or the "closed" state.
        const END_STREAM = 0x01;
        /// When set, bit 1 indicates that this frame is the last for the current segment.
        const END_SEGMENT = 0x02;
        /// When set, bit 4 indicates that the Pad Length field and any padding that it describes are present.
        const PADDED = 0x10;
    }

    /// https://tools.ietf.org/html/draft-ietf-httpbis-http2-06#section-6.2
    #[repr(transparent)]
    pub struct HeadersFlags: u8 {
        /// When set, bit 0 indicates that the header block is the last that the endpoint will send for the identified stream.
        const END_STREAM = 0x01;
        /// When set, bit 1 indicates that this frame is the last for the current segment.
        const END_SEGMENT = 0x02;
        /// When set, bit 2 indicates that this frame contains an entire header block and is not followed by any CONTINUATION frames.
        const END_HEADERS = 0x04;
        /// When set, bit 4 indicates that the Pad Length field and any padding that it describes are present.
        const PADDED = 0x10;
        /// When set, bit 5 indicates that the Exclusive Flag (E), Stream Dependency, and Weight fields are present.
        const PRIORITY = 0x20;
    }

    /// https://tools.ietf.org/html/draft-ietf-httpbis-http2-06#section-6.3
    #[repr(transparent)]
    pub struct PriorityFlags: u8 {
        /// When set, bit 5 indicates that the frame carries a priority group.
        const PRIORITY_GROUP = 0x20;
        /// When set, bit 6 indicates that the frame carries a stream dependency.
        const PRIORITY_DEPENDENCY = 0x40;
    }

    /// https://tools.ietf.org/html/draft-ietf-httpbis-http2-06#section-6.5
    #[repr(transparent)]
    pub struct SettingsFlags: u8 {
        /// When set, bit 0 indicates that this frame acknowledges receipt and application of the peer's SETTINGS frame. When this bit is set, the payload of the SETTINGS frame MUST be empty.
        const ACK = 0x01;
    }

    /// https://tools.ietf.org/html/draft-ietf-httpbis-http2-06#section-6.6
    #[repr(transparent)]
    pub struct PushPromiseFlags: u8 {
        /// When set, bit 2 indicates that this frame contains an entire header block and is not followed by any CONTINUATION frames.
        const END_HEADERS = 0x04;
        /// When set, bit 4 indicates that the Pad Length field and any padding that it describes are present.
        const PADDED = 0x10;
    }

    /// https://tools.ietf.org/html/draft-ietf-httpbis-http2-06#section-6.7
    #[repr(transparent)]
    pub struct PingFlags: u8 {
        /// When set, bit 0 indicates that this PING frame is a PING response. An endpoint MUST set this flag in PING responses. An endpoint MUST NOT respond to PING frames containing this flag.
        const ACK = 0x01;
    }

    /// https://tools.ietf.org/html/draft-ietf-httpbis-http2-06#section-6.10
    #[repr(transparent)]
    pub struct ContinuationFlags: u8 {
        /// When set, bit 2 indicates that this frame ends a header block.
        const END_HEADERS = 0x04;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::From, derive_more::TryInto)]
pub enum Flags {
    Data(DataFlags),
    Headers(HeadersFlags),
    Priority(PriorityFlags),
    Settings(SettingsFlags),
    PushPromise(PushPromiseFlags),
    Ping(PingFlags),
    Continuation(ContinuationFlags),
    None,
}

impl Flags {
    /// Raw bit pattern as it appears in the frame header.
    #[must_use]
    pub fn bits(self) -> u8 {
        match self {
            Self::Data(flags) => flags.bits(),
            Self::Headers(flags) => flags.bits(),
            Self::Priority(flags) => flags.bits(),
            Self::Settings(flags) => flags.bits(),
            Self::PushPromise(flags) => flags.bits(),
            Self::Ping(flags) => flags.bits(),
            Self::Continuation(flags) => flags.bits(),
            Self::None => 0,
        }
    }

    /// Whether the frame these flags belong to ends its stream direction.
    #[must_use]
    pub fn end_stream(self) -> bool {
        match self {
            Self::Data(flags) => flags.contains(DataFlags::END_STREAM),
            Self::Headers(flags) => flags.contains(HeadersFlags::END_STREAM),
            _ => false,
        }
    }

    /// Whether the frame these flags belong to terminates a header block.
    #[must_use]
    pub fn end_headers(self) -> bool {
        match self {
            Self::Headers(flags) => flags.contains(HeadersFlags::END_HEADERS),
            Self::PushPromise(flags) => flags.contains(PushPromiseFlags::END_HEADERS),
            Self::Continuation(flags) => flags.contains(ContinuationFlags::END_HEADERS),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_positions() {
        assert_eq!(DataFlags::PADDED.bits(), 0x10);
        assert_eq!(HeadersFlags::PRIORITY.bits(), 0x20);
        assert_eq!(PriorityFlags::PRIORITY_DEPENDENCY.bits(), 0x40);
        assert_eq!(ContinuationFlags::END_HEADERS.bits(), 0x04);
    }

    #[test]
    fn union_round_trip() {
        let flags: Flags = (HeadersFlags::END_STREAM | HeadersFlags::END_HEADERS).into();
        assert_eq!(flags.bits(), 0x05);
        assert!(flags.end_stream());
        assert!(flags.end_headers());
        let back: HeadersFlags = flags.try_into().expect("headers flags");
        assert!(back.contains(HeadersFlags::END_HEADERS));
    }
}
