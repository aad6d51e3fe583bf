use crate::error::{CompressionError, ProtocolError};
use crate::flags::*;
use crate::hpack::Header;
use crate::types::*;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use num_traits::{FromPrimitive, ToPrimitive};

/// Length of the common frame header.
pub const HEADER_LEN: usize = 8;

/// Payload of a HEADERS or PUSH_PROMISE frame. Frames come off the wire as
/// an opaque fragment; the connection layer runs the header decoder and
/// replaces the payload before handing the frame to a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderBlock {
    Fragment(Bytes),
    Decoded(Vec<Header>),
}

impl HeaderBlock {
    fn fragment(&self) -> Result<&Bytes, CompressionError> {
        match self {
            Self::Fragment(fragment) => Ok(fragment),
            Self::Decoded(_) => Err(CompressionError::UnencodedHeaderBlock),
        }
    }
}

/// https://tools.ietf.org/html/draft-ietf-httpbis-http2-06#section-6
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Data {
        stream: StreamId,
        flags: DataFlags,
        data: Bytes,
    },
    Headers {
        stream: StreamId,
        flags: HeadersFlags,
        exclusive_dependency: bool,
        dependency: StreamId,
        weight: u16,
        block: HeaderBlock,
    },
    Priority {
        stream: StreamId,
        flags: PriorityFlags,
        exclusive_dependency: bool,
        dependency: StreamId,
        weight: u16,
    },
    ResetStream {
        stream: StreamId,
        error: ErrorType,
    },
    Settings {
        flags: SettingsFlags,
        params: Vec<(SettingsParameter, u32)>,
        /// Settings with identifiers this implementation has no symbol for,
        /// preserved as raw (id, value) pairs.
        extensible: Vec<(u16, u32)>,
    },
    PushPromise {
        stream: StreamId,
        flags: PushPromiseFlags,
        promised: StreamId,
        block: HeaderBlock,
    },
    Ping {
        flags: PingFlags,
        data: Bytes,
    },
    GoAway {
        last_stream: StreamId,
        error: ErrorType,
        debug: Bytes,
    },
    WindowUpdate {
        stream: StreamId,
        increment: u32,
    },
    Continuation {
        stream: StreamId,
        flags: ContinuationFlags,
        fragment: Bytes,
    },
    /// Frame in the extensible (0x10..=0xef) or experimental (0xf0..=0xff)
    /// type range. The type code round-trips verbatim.
    Extension {
        code: u8,
        flags: u8,
        stream: StreamId,
        payload: Bytes,
    },
}

impl Frame {
    /// Stream the frame belongs to; 0 for connection-scoped frames.
    #[must_use]
    pub fn stream_id(&self) -> StreamId {
        match *self {
            Self::Data { stream, .. }
            | Self::Headers { stream, .. }
            | Self::Priority { stream, .. }
            | Self::ResetStream { stream, .. }
            | Self::PushPromise { stream, .. }
            | Self::WindowUpdate { stream, .. }
            | Self::Continuation { stream, .. }
            | Self::Extension { stream, .. } => stream,
            Self::Settings { .. } | Self::Ping { .. } | Self::GoAway { .. } => 0,
        }
    }

    /// Frame type, for the nine defined types. Extension frames have no
    /// `FrameType`; their code is available through [`Frame::type_code`].
    #[must_use]
    pub fn frame_type(&self) -> Option<FrameType> {
        match self {
            Self::Data { .. } => Some(FrameType::Data),
            Self::Headers { .. } => Some(FrameType::Headers),
            Self::Priority { .. } => Some(FrameType::Priority),
            Self::ResetStream { .. } => Some(FrameType::ResetStream),
            Self::Settings { .. } => Some(FrameType::Settings),
            Self::PushPromise { .. } => Some(FrameType::PushPromise),
            Self::Ping { .. } => Some(FrameType::Ping),
            Self::GoAway { .. } => Some(FrameType::GoAway),
            Self::WindowUpdate { .. } => Some(FrameType::WindowUpdate),
            Self::Continuation { .. } => Some(FrameType::Continuation),
            Self::Extension { .. } => None,
        }
    }

    /// Numeric type code as it appears on the wire.
    #[must_use]
    pub fn type_code(&self) -> u8 {
        match self {
            Self::Extension { code, .. } => *code,
            // unwrap: every non-extension variant maps to a FrameType, which is repr(u8)
            _ => self.frame_type().and_then(|ty| ty.to_u8()).unwrap(),
        }
    }

    #[must_use]
    pub fn flags(&self) -> Flags {
        match *self {
            Self::Data { flags, .. } => flags.into(),
            Self::Headers { flags, .. } => flags.into(),
            Self::Priority { flags, .. } => flags.into(),
            Self::Settings { flags, .. } => flags.into(),
            Self::PushPromise { flags, .. } => flags.into(),
            Self::Ping { flags, .. } => flags.into(),
            Self::Continuation { flags, .. } => flags.into(),
            Self::ResetStream { .. }
            | Self::GoAway { .. }
            | Self::WindowUpdate { .. }
            | Self::Extension { .. } => Flags::None,
        }
    }

    /// Parse one frame out of `buf`. Returns `Ok(None)` without consuming
    /// anything until a complete frame (header plus payload) is buffered;
    /// otherwise consumes the header and exactly `length` payload bytes.
    pub fn parse(buf: &mut BytesMut) -> Result<Option<Self>, ProtocolError> {
        if buf.len() < HEADER_LEN {
            return Ok(None);
        }
        let length = usize::from(u16::from_be_bytes([buf[0], buf[1]]));
        if buf.len() < HEADER_LEN + length {
            return Ok(None);
        }
        if length > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge { length });
        }

        let mut header = buf.split_to(HEADER_LEN);
        header.advance(2);
        let code = header.get_u8();
        let flag_bits = header.get_u8();
        let stream = header.get_u32() & U31_MAX;
        let mut payload = buf.split_to(length).freeze();

        let frame = match FrameType::from_u8(code) {
            Some(FrameType::Data) => {
                let flags = DataFlags::from_bits_truncate(flag_bits);
                let data = if flags.contains(DataFlags::PADDED) {
                    strip_padding(&mut payload)?
                } else {
                    payload
                };
                Self::Data {
                    stream,
                    flags,
                    data,
                }
            }
            Some(FrameType::Headers) => {
                let flags = HeadersFlags::from_bits_truncate(flag_bits);
                let mut fragment = if flags.contains(HeadersFlags::PADDED) {
                    strip_padding(&mut payload)?
                } else {
                    payload
                };
                let (exclusive_dependency, dependency, weight) =
                    if flags.contains(HeadersFlags::PRIORITY) {
                        parse_priority(&mut fragment, stream)?
                    } else {
                        (false, 0, DEFAULT_WEIGHT)
                    };
                Self::Headers {
                    stream,
                    flags,
                    exclusive_dependency,
                    dependency,
                    weight,
                    block: HeaderBlock::Fragment(fragment),
                }
            }
            Some(FrameType::Priority) => {
                let (exclusive_dependency, dependency, weight) =
                    parse_priority(&mut payload, stream)?;
                Self::Priority {
                    stream,
                    flags: PriorityFlags::from_bits_truncate(flag_bits),
                    exclusive_dependency,
                    dependency,
                    weight,
                }
            }
            Some(FrameType::ResetStream) => {
                if payload.remaining() < 4 {
                    return Err(ProtocolError::PayloadTooShort);
                }
                let code = payload.get_u32();
                Self::ResetStream {
                    stream,
                    error: ErrorType::from_u32(code)
                        .ok_or(ProtocolError::UnknownErrorCode(code))?,
                }
            }
            Some(FrameType::Settings) => {
                let mut params = Vec::with_capacity(payload.remaining() / 6);
                let mut extensible = Vec::new();
                while payload.remaining() >= 6 {
                    let id = payload.get_u16();
                    let value = payload.get_u32();
                    match SettingsParameter::from_u16(id) {
                        Some(param) => params.push((param, value)),
                        None => extensible.push((id, value)),
                    }
                }
                Self::Settings {
                    flags: SettingsFlags::from_bits_truncate(flag_bits),
                    params,
                    extensible,
                }
            }
            Some(FrameType::PushPromise) => {
                let flags = PushPromiseFlags::from_bits_truncate(flag_bits);
                let mut fragment = if flags.contains(PushPromiseFlags::PADDED) {
                    strip_padding(&mut payload)?
                } else {
                    payload
                };
                if fragment.remaining() < 4 {
                    return Err(ProtocolError::PayloadTooShort);
                }
                let promised = fragment.get_u32() & U31_MAX;
                Self::PushPromise {
                    stream,
                    flags,
                    promised,
                    block: HeaderBlock::Fragment(fragment),
                }
            }
            Some(FrameType::Ping) => Self::Ping {
                flags: PingFlags::from_bits_truncate(flag_bits),
                data: payload,
            },
            Some(FrameType::GoAway) => {
                if payload.remaining() < 8 {
                    return Err(ProtocolError::PayloadTooShort);
                }
                let last_stream = payload.get_u32() & U31_MAX;
                let code = payload.get_u32();
                Self::GoAway {
                    last_stream,
                    error: ErrorType::from_u32(code)
                        .ok_or(ProtocolError::UnknownErrorCode(code))?,
                    debug: payload,
                }
            }
            Some(FrameType::WindowUpdate) => {
                if payload.remaining() < 4 {
                    return Err(ProtocolError::PayloadTooShort);
                }
                Self::WindowUpdate {
                    stream,
                    increment: payload.get_u32() & U31_MAX,
                }
            }
            Some(FrameType::Continuation) => Self::Continuation {
                stream,
                flags: ContinuationFlags::from_bits_truncate(flag_bits),
                fragment: payload,
            },
            None if code >= EXTENSIBLE_TYPE_BASE => Self::Extension {
                code,
                flags: flag_bits,
                stream,
                payload,
            },
            None => return Err(ProtocolError::UnknownFrameType(code)),
        };
        Ok(Some(frame))
    }

    /// Serialize the frame into `out`. The encoder validates field ranges
    /// but never adds padding; padded payloads pass through verbatim.
    pub fn encode(&self, out: &mut BytesMut) -> Result<(), CompressionError> {
        let stream = self.stream_id();
        if stream > U31_MAX {
            return Err(CompressionError::StreamIdTooLarge(stream));
        }

        let mut payload = BytesMut::new();
        let mut flag_bits = match self {
            Self::Extension { flags, .. } => *flags,
            _ => self.flags().bits(),
        };
        match self {
            Self::Data { data, .. } => payload.extend_from_slice(data),
            Self::Headers {
                exclusive_dependency,
                dependency,
                weight,
                block,
                ..
            } => {
                if *exclusive_dependency || *dependency != 0 || *weight != DEFAULT_WEIGHT {
                    flag_bits |= HeadersFlags::PRIORITY.bits();
                    encode_priority(&mut payload, *exclusive_dependency, *dependency, *weight)?;
                }
                payload.extend_from_slice(block.fragment()?);
            }
            Self::Priority {
                exclusive_dependency,
                dependency,
                weight,
                ..
            } => encode_priority(&mut payload, *exclusive_dependency, *dependency, *weight)?,
            Self::ResetStream { error, .. } => {
                // unwrap: ErrorType is repr(u32)
                payload.put_u32(error.to_u32().unwrap());
            }
            Self::Settings {
                params, extensible, ..
            } => {
                if let Some((id, _)) = extensible.first() {
                    return Err(CompressionError::UnknownSetting(*id));
                }
                for (param, value) in params {
                    payload.put_u16(*param as u16);
                    payload.put_u32(*value);
                }
            }
            Self::PushPromise {
                promised, block, ..
            } => {
                if *promised > U31_MAX {
                    return Err(CompressionError::StreamIdTooLarge(*promised));
                }
                payload.put_u32(*promised);
                payload.extend_from_slice(block.fragment()?);
            }
            Self::Ping { data, .. } => {
                if data.len() != 8 {
                    return Err(CompressionError::BadPingPayload(data.len()));
                }
                payload.extend_from_slice(data);
            }
            Self::GoAway {
                last_stream,
                error,
                debug,
            } => {
                if *last_stream > U31_MAX {
                    return Err(CompressionError::StreamIdTooLarge(*last_stream));
                }
                payload.put_u32(*last_stream);
                // unwrap: ErrorType is repr(u32)
                payload.put_u32(error.to_u32().unwrap());
                payload.extend_from_slice(debug);
            }
            Self::WindowUpdate { increment, .. } => {
                if *increment > U31_MAX {
                    return Err(CompressionError::WindowIncrementTooLarge(*increment));
                }
                payload.put_u32(*increment);
            }
            Self::Continuation { fragment, .. } => payload.extend_from_slice(fragment),
            Self::Extension { payload: body, .. } => payload.extend_from_slice(body),
        }

        if payload.len() > MAX_FRAME_SIZE {
            return Err(CompressionError::PayloadTooLong(payload.len()));
        }
        out.put_u16(payload.len() as u16);
        out.put_u8(self.type_code());
        out.put_u8(flag_bits);
        out.put_u32(stream);
        out.extend_from_slice(&payload);
        Ok(())
    }
}

/// Drops the pad-length octet and the trailing padding it declares.
fn strip_padding(payload: &mut Bytes) -> Result<Bytes, ProtocolError> {
    if payload.remaining() < 1 {
        return Err(ProtocolError::PayloadTooShort);
    }
    let padding = usize::from(payload.get_u8());
    let remaining = payload.remaining();
    if padding > remaining {
        return Err(ProtocolError::PaddingTooLarge { padding, remaining });
    }
    Ok(payload.split_to(remaining - padding))
}

fn parse_priority(
    payload: &mut Bytes,
    stream: StreamId,
) -> Result<(bool, StreamId, u16), ProtocolError> {
    if payload.remaining() < 5 {
        return Err(ProtocolError::PayloadTooShort);
    }
    let raw = payload.get_u32();
    let dependency = raw & U31_MAX;
    if dependency == stream {
        return Err(ProtocolError::SelfDependency(stream));
    }
    let weight = u16::from(payload.get_u8()) + 1;
    Ok((raw > U31_MAX, dependency, weight))
}

fn encode_priority(
    payload: &mut BytesMut,
    exclusive: bool,
    dependency: StreamId,
    weight: u16,
) -> Result<(), CompressionError> {
    if dependency > U31_MAX {
        return Err(CompressionError::StreamIdTooLarge(dependency));
    }
    if weight == 0 || weight > 256 {
        return Err(CompressionError::BadWeight(weight));
    }
    payload.put_u32(dependency | if exclusive { !U31_MAX } else { 0 });
    payload.put_u8((weight - 1) as u8);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(frame: &Frame) -> Frame {
        let mut wire = BytesMut::new();
        frame.encode(&mut wire).expect("encode");
        Frame::parse(&mut wire)
            .expect("parse")
            .expect("complete frame")
    }

    #[test]
    fn headers_common_header_layout() {
        let frame = Frame::Headers {
            stream: 1,
            flags: HeadersFlags::END_STREAM | HeadersFlags::END_HEADERS,
            exclusive_dependency: false,
            dependency: 0,
            weight: DEFAULT_WEIGHT,
            block: HeaderBlock::Fragment(Bytes::from_static(b"twelve bytes")),
        };
        let mut wire = BytesMut::new();
        frame.encode(&mut wire).unwrap();
        assert_eq!(
            &wire[..HEADER_LEN],
            &[0x00, 0x0c, 0x01, 0x05, 0x00, 0x00, 0x00, 0x01]
        );
        match Frame::parse(&mut wire).unwrap().unwrap() {
            Frame::Headers { block, weight, .. } => {
                assert_eq!(block, HeaderBlock::Fragment(Bytes::from_static(b"twelve bytes")));
                assert_eq!(weight, DEFAULT_WEIGHT);
            }
            other => panic!("wrong frame: {other:?}"),
        }
        assert!(wire.is_empty());
    }

    #[test]
    fn truncated_buffer_consumes_nothing() {
        let mut wire = BytesMut::new();
        Frame::Ping {
            flags: PingFlags::empty(),
            data: Bytes::from_static(&[0; 8]),
        }
        .encode(&mut wire)
        .unwrap();
        let mut partial = BytesMut::from(&wire[..wire.len() - 1]);
        let before = partial.len();
        assert!(Frame::parse(&mut partial).unwrap().is_none());
        assert_eq!(partial.len(), before);

        let mut short = BytesMut::from(&wire[..5]);
        assert!(Frame::parse(&mut short).unwrap().is_none());
        assert_eq!(short.len(), 5);
    }

    #[test]
    fn over_declared_padding_is_a_protocol_error() {
        // 4 byte payload: pad length claims 5
        let mut wire = BytesMut::new();
        wire.put_u16(4);
        wire.put_u8(0x00);
        wire.put_u8(DataFlags::PADDED.bits());
        wire.put_u32(1);
        wire.put_u8(5);
        wire.extend_from_slice(&[0, 0, 0]);
        assert!(matches!(
            Frame::parse(&mut wire),
            Err(ProtocolError::PaddingTooLarge {
                padding: 5,
                remaining: 3
            })
        ));
    }

    #[test]
    fn padding_is_stripped() {
        let mut wire = BytesMut::new();
        wire.put_u16(8);
        wire.put_u8(0x00);
        wire.put_u8(DataFlags::PADDED.bits());
        wire.put_u32(3);
        wire.put_u8(4);
        wire.extend_from_slice(b"abc");
        wire.extend_from_slice(&[0; 4]);
        match Frame::parse(&mut wire).unwrap().unwrap() {
            Frame::Data { data, .. } => assert_eq!(data, Bytes::from_static(b"abc")),
            other => panic!("wrong frame: {other:?}"),
        }
    }

    #[test]
    fn headers_synthesize_priority_prefix() {
        let frame = Frame::Headers {
            stream: 5,
            flags: HeadersFlags::END_HEADERS,
            exclusive_dependency: true,
            dependency: 3,
            weight: 32,
            block: HeaderBlock::Fragment(Bytes::from_static(b"x")),
        };
        let mut wire = BytesMut::new();
        frame.encode(&mut wire).unwrap();
        // flags gained PRIORITY, payload gained the 5-byte prefix
        assert_eq!(wire[3], (HeadersFlags::END_HEADERS | HeadersFlags::PRIORITY).bits());
        assert_eq!(u16::from_be_bytes([wire[0], wire[1]]), 6);
        match Frame::parse(&mut wire).unwrap().unwrap() {
            Frame::Headers {
                flags,
                exclusive_dependency,
                dependency,
                weight,
                block,
                ..
            } => {
                assert!(flags.contains(HeadersFlags::PRIORITY));
                assert!(exclusive_dependency);
                assert_eq!(dependency, 3);
                assert_eq!(weight, 32);
                assert_eq!(block, HeaderBlock::Fragment(Bytes::from_static(b"x")));
            }
            other => panic!("wrong frame: {other:?}"),
        }
    }

    #[test]
    fn self_dependency_is_a_protocol_error() {
        let mut wire = BytesMut::new();
        wire.put_u16(5);
        wire.put_u8(0x02);
        wire.put_u8(0);
        wire.put_u32(7);
        wire.put_u32(7);
        wire.put_u8(15);
        assert!(matches!(
            Frame::parse(&mut wire),
            Err(ProtocolError::SelfDependency(7))
        ));
    }

    #[test]
    fn settings_keep_unknown_ids_in_the_extensible_bucket() {
        let mut wire = BytesMut::new();
        wire.put_u16(12);
        wire.put_u8(0x04);
        wire.put_u8(0);
        wire.put_u32(0);
        wire.put_u16(0x1);
        wire.put_u32(2048);
        wire.put_u16(0x9);
        wire.put_u32(77);
        match Frame::parse(&mut wire).unwrap().unwrap() {
            Frame::Settings {
                params, extensible, ..
            } => {
                assert_eq!(params, vec![(SettingsParameter::HeaderTableSize, 2048)]);
                assert_eq!(extensible, vec![(0x9, 77)]);
            }
            other => panic!("wrong frame: {other:?}"),
        }
    }

    #[test]
    fn extensible_settings_fail_encoding() {
        let frame = Frame::Settings {
            flags: SettingsFlags::empty(),
            params: Vec::new(),
            extensible: vec![(0x9, 77)],
        };
        assert!(matches!(
            frame.encode(&mut BytesMut::new()),
            Err(CompressionError::UnknownSetting(0x9))
        ));
    }

    #[test]
    fn ping_payload_must_be_eight_bytes() {
        let frame = Frame::Ping {
            flags: PingFlags::ACK,
            data: Bytes::from_static(b"short"),
        };
        assert!(matches!(
            frame.encode(&mut BytesMut::new()),
            Err(CompressionError::BadPingPayload(5))
        ));
    }

    #[test]
    fn window_update_bounds() {
        let frame = Frame::WindowUpdate {
            stream: 1,
            increment: U31_MAX + 1,
        };
        assert!(matches!(
            frame.encode(&mut BytesMut::new()),
            Err(CompressionError::WindowIncrementTooLarge(_))
        ));
    }

    #[test]
    fn stream_id_bounds() {
        let frame = Frame::Data {
            stream: U31_MAX + 1,
            flags: DataFlags::empty(),
            data: Bytes::new(),
        };
        assert!(matches!(
            frame.encode(&mut BytesMut::new()),
            Err(CompressionError::StreamIdTooLarge(_))
        ));
    }

    #[test]
    fn unknown_type_codes() {
        let mut wire = BytesMut::new();
        wire.put_u16(0);
        wire.put_u8(0x0a);
        wire.put_u8(0);
        wire.put_u32(0);
        assert!(matches!(
            Frame::parse(&mut wire),
            Err(ProtocolError::UnknownFrameType(0x0a))
        ));

        let frame = Frame::Extension {
            code: EXPERIMENTAL_TYPE_BASE + 2,
            flags: 0x40,
            stream: 9,
            payload: Bytes::from_static(b"vendor"),
        };
        assert_eq!(round_trip(&frame), frame);
    }

    #[test]
    fn descriptor_round_trips() {
        let frames = vec![
            Frame::Data {
                stream: 1,
                flags: DataFlags::END_STREAM,
                data: Bytes::from_static(b"hello"),
            },
            Frame::Priority {
                stream: 9,
                flags: PriorityFlags::empty(),
                exclusive_dependency: false,
                dependency: 7,
                weight: 64,
            },
            Frame::ResetStream {
                stream: 3,
                error: ErrorType::Cancel,
            },
            Frame::Settings {
                flags: SettingsFlags::ACK,
                params: vec![(SettingsParameter::InitialWindowSize, 1 << 20)],
                extensible: Vec::new(),
            },
            Frame::PushPromise {
                stream: 1,
                flags: PushPromiseFlags::END_HEADERS,
                promised: 2,
                block: HeaderBlock::Fragment(Bytes::from_static(b"frag")),
            },
            Frame::Ping {
                flags: PingFlags::empty(),
                data: Bytes::from_static(&[1, 2, 3, 4, 5, 6, 7, 8]),
            },
            Frame::GoAway {
                last_stream: 5,
                error: ErrorType::EnhanceYourCalm,
                debug: Bytes::from_static(b"calm down"),
            },
            Frame::WindowUpdate {
                stream: 0,
                increment: 0x1234,
            },
            Frame::Continuation {
                stream: 1,
                flags: ContinuationFlags::END_HEADERS,
                fragment: Bytes::from_static(b"rest"),
            },
        ];
        for frame in frames {
            assert_eq!(round_trip(&frame), frame);
        }
    }
}
