use bytes::{Bytes, BytesMut};
use http2_core::{
    default_settings, exclusive_insertion, CloseReason, DataFlags, Decoder, Encoder, Frame,
    HeaderBlock, HeadersFlags, SettingsParameter, Stream, StreamEvent, StreamState,
    DEFAULT_WEIGHT, DEFAULT_WINDOW_SIZE,
};
use maplit::hashmap;
use std::collections::HashMap;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn to_wire(frames: Vec<Frame>) -> BytesMut {
    let mut wire = BytesMut::new();
    for frame in frames {
        frame.encode(&mut wire).expect("encode frame");
    }
    wire
}

fn parse_all(wire: &mut BytesMut) -> Vec<Frame> {
    let mut frames = Vec::new();
    while let Some(frame) = Frame::parse(wire).expect("parse frame") {
        frames.push(frame);
    }
    assert!(wire.is_empty(), "leftover bytes on the wire");
    frames
}

/// The connection layer's job: run header fragments through the decoder
/// before frames reach a stream.
fn decode_blocks(frames: Vec<Frame>, decoder: &mut Decoder) -> Vec<Frame> {
    frames
        .into_iter()
        .map(|frame| match frame {
            Frame::Headers {
                stream,
                flags,
                exclusive_dependency,
                dependency,
                weight,
                block: HeaderBlock::Fragment(fragment),
            } => Frame::Headers {
                stream,
                flags,
                exclusive_dependency,
                dependency,
                weight,
                block: HeaderBlock::Decoded(decoder.decode(fragment).expect("decode block")),
            },
            Frame::PushPromise {
                stream,
                flags,
                promised,
                block: HeaderBlock::Fragment(fragment),
            } => Frame::PushPromise {
                stream,
                flags,
                promised,
                block: HeaderBlock::Decoded(decoder.decode(fragment).expect("decode block")),
            },
            other => other,
        })
        .collect()
}

fn headers_frame(stream: u32, flags: HeadersFlags, fragment: Bytes) -> Frame {
    Frame::Headers {
        stream,
        flags,
        exclusive_dependency: false,
        dependency: 0,
        weight: DEFAULT_WEIGHT,
        block: HeaderBlock::Fragment(fragment),
    }
}

#[test]
fn request_response_exchange() {
    init_logging();

    let mut client_encoder = Encoder::default();
    let mut server_decoder = Decoder::default();
    let mut server_encoder = Encoder::default();
    let mut client_decoder = Decoder::default();
    let mut client = Stream::with_window(1, DEFAULT_WINDOW_SIZE);
    let mut server = Stream::with_window(1, DEFAULT_WINDOW_SIZE);

    // client: GET with no body
    let request = vec![
        (":method", "GET"),
        (":scheme", "http"),
        (":path", "/"),
        (":authority", "www.example.com"),
    ];
    let fragment = client_encoder.encode(request).expect("encode request");
    client
        .send(headers_frame(
            1,
            HeadersFlags::END_STREAM | HeadersFlags::END_HEADERS,
            fragment,
        ))
        .expect("send request");
    assert_eq!(client.state(), StreamState::HalfClosedLocal);
    assert_eq!(
        client.take_events(),
        vec![
            StreamEvent::Active,
            StreamEvent::HalfClose(CloseReason::LocalClosed)
        ]
    );

    // over the wire to the server
    let mut wire = to_wire(client.take_frames());
    let inbound = decode_blocks(parse_all(&mut wire), &mut server_decoder);
    for frame in inbound {
        server.recv(frame).expect("server recv");
    }
    assert_eq!(server.state(), StreamState::HalfClosedRemote);
    let events = server.take_events();
    assert_eq!(events[0], StreamEvent::Active);
    let StreamEvent::Headers(request_headers) = &events[1] else {
        panic!("expected headers event, got {events:?}");
    };
    assert_eq!(
        request_headers[0],
        (Bytes::from_static(b":method"), Bytes::from_static(b"GET"))
    );
    assert_eq!(
        server_decoder.context().entries(),
        client_encoder.context().entries()
    );

    // server: 200 with a body
    let response = vec![(":status", "200"), ("content-type", "text/plain")];
    let fragment = server_encoder.encode(response).expect("encode response");
    server
        .send(headers_frame(1, HeadersFlags::END_HEADERS, fragment))
        .expect("send response headers");
    server
        .send(Frame::Data {
            stream: 1,
            flags: DataFlags::END_STREAM,
            data: Bytes::from_static(b"hello over http2"),
        })
        .expect("send response body");
    assert_eq!(server.state(), StreamState::Closed);
    assert_eq!(server.close_reason(), Some(CloseReason::LocalClosed));

    // back over the wire to the client
    let mut wire = to_wire(server.take_frames());
    let inbound = decode_blocks(parse_all(&mut wire), &mut client_decoder);
    for frame in inbound {
        client.recv(frame).expect("client recv");
    }
    assert_eq!(client.state(), StreamState::Closed);
    assert_eq!(client.close_reason(), Some(CloseReason::RemoteClosed));

    let events = client.take_events();
    let StreamEvent::Headers(response_headers) = &events[0] else {
        panic!("expected headers event, got {events:?}");
    };
    let got: HashMap<Bytes, Bytes> = response_headers.iter().cloned().collect();
    assert_eq!(
        got,
        hashmap! {
            Bytes::from_static(b":status") => Bytes::from_static(b"200"),
            Bytes::from_static(b"content-type") => Bytes::from_static(b"text/plain"),
        }
    );
    let StreamEvent::Data(Frame::Data { data, .. }) = &events[1] else {
        panic!("expected data event, got {events:?}");
    };
    assert_eq!(data, &Bytes::from_static(b"hello over http2"));
    assert_eq!(events[2], StreamEvent::Close(None));
    assert_eq!(
        client_decoder.context().entries(),
        server_encoder.context().entries()
    );
}

#[test]
fn window_update_releases_buffered_body() {
    init_logging();

    let mut server_encoder = Encoder::default();
    let mut client_decoder = Decoder::default();
    // the peer only granted 8 bytes of window
    let mut server = Stream::with_window(1, 8);
    let mut client = Stream::with_window(1, DEFAULT_WINDOW_SIZE);

    client
        .send(headers_frame(
            1,
            HeadersFlags::END_STREAM | HeadersFlags::END_HEADERS,
            Bytes::new(),
        ))
        .expect("open stream");
    client.take_frames();
    server
        .recv(Frame::Headers {
            stream: 1,
            flags: HeadersFlags::END_STREAM | HeadersFlags::END_HEADERS,
            exclusive_dependency: false,
            dependency: 0,
            weight: DEFAULT_WEIGHT,
            block: HeaderBlock::Decoded(Vec::new()),
        })
        .expect("server recv");
    server.take_events();

    let fragment = server_encoder
        .encode(vec![(":status", "200")])
        .expect("encode response");
    server
        .send(headers_frame(1, HeadersFlags::END_HEADERS, fragment))
        .expect("send headers");
    server
        .send(Frame::Data {
            stream: 1,
            flags: DataFlags::END_STREAM,
            data: Bytes::from_static(b"twenty bytes of body"),
        })
        .expect("send body");

    let mut wire = to_wire(server.take_frames());
    let first = decode_blocks(parse_all(&mut wire), &mut client_decoder);
    // only the first 8 bytes of the body made it out
    let Frame::Data { data, flags, .. } = &first[1] else {
        panic!("expected data frame, got {first:?}");
    };
    assert_eq!(data, &Bytes::from_static(b"twenty b"));
    assert!(!flags.contains(DataFlags::END_STREAM));
    assert_eq!(server.window(), 0);

    for frame in first {
        client.recv(frame).expect("client recv");
    }

    // the client grants more window; the rest of the body drains
    server
        .recv(Frame::WindowUpdate {
            stream: 1,
            increment: 64,
        })
        .expect("window update");
    let mut wire = to_wire(server.take_frames());
    let rest = parse_all(&mut wire);
    let Frame::Data { data, flags, .. } = &rest[0] else {
        panic!("expected data frame, got {rest:?}");
    };
    assert_eq!(data, &Bytes::from_static(b"ytes of body"));
    assert!(flags.contains(DataFlags::END_STREAM));

    for frame in rest {
        client.recv(frame).expect("client recv");
    }
    assert_eq!(client.state(), StreamState::Closed);
}

#[test]
fn priority_reparenting_across_streams() {
    init_logging();

    let mut streams: Vec<Stream> = (0u32..3).map(|n| Stream::new(2 * n + 3)).collect();
    for stream in &mut streams {
        let id = stream.id;
        stream
            .recv(Frame::Headers {
                stream: id,
                flags: HeadersFlags::END_HEADERS,
                exclusive_dependency: false,
                dependency: 1,
                weight: DEFAULT_WEIGHT,
                block: HeaderBlock::Decoded(Vec::new()),
            })
            .expect("open");
    }
    // the frame above carried no PRIORITY flag, so nothing depends on 1 yet
    assert!(streams.iter().all(|stream| stream.dependency().is_none()));

    for stream in &mut streams {
        let id = stream.id;
        stream
            .recv(Frame::Priority {
                stream: id,
                flags: http2_core::PriorityFlags::empty(),
                exclusive_dependency: false,
                dependency: 1,
                weight: 32,
            })
            .expect("priority");
    }
    // stream 5 declares an exclusive dependency on 1: its siblings re-point
    exclusive_insertion(streams.iter_mut(), 5, 1);
    for stream in &streams {
        let expected = if stream.id == 5 { Some(1) } else { Some(5) };
        assert_eq!(stream.dependency(), expected);
    }
}

#[test]
fn protocol_defaults_line_up() {
    assert_eq!(
        i64::from(default_settings()[SettingsParameter::InitialWindowSize]),
        DEFAULT_WINDOW_SIZE
    );
}
