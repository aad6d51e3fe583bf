use crate::error::{Error, ProtocolError};
use crate::flags::*;
use crate::frame::{Frame, HeaderBlock};
use crate::hpack::Header;
use crate::types::*;
use derivative::Derivative;
use log::{trace, warn};
use num_traits::ToPrimitive;
use std::collections::VecDeque;

/// https://tools.ietf.org/html/draft-ietf-httpbis-http2-06#section-5.1
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StreamState {
    Idle,
    ReservedLocal,
    ReservedRemote,
    Open,
    HalfClosedLocal,
    HalfClosedRemote,
    /// Transient: an END_STREAM went through; resolves to the half-closed
    /// state the close reason selects before the call returns.
    HalfClosing,
    /// Transient: resolves to `Closed` before the call returns.
    Closing,
    Closed,
}

/// Which side ended the stream, and whether it was reset or ran to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseReason {
    LocalClosed,
    RemoteClosed,
    LocalRst,
    RemoteRst,
}

/// Lifecycle and payload notifications, drained by the connection layer via
/// [`Stream::take_events`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Active,
    Reserved,
    HalfClose(CloseReason),
    Close(Option<ErrorType>),
    Data(Frame),
    Headers(Vec<Header>),
    PushPromise {
        promised: StreamId,
        headers: Vec<Header>,
    },
    Priority {
        weight: u16,
        dependency: StreamId,
        exclusive: bool,
    },
    WindowUpdate(u32),
}

/// What a deferred producer yields: frames to send now (the rest return to
/// the front of the queue) and whether to invoke the producer again.
pub type Produced = (Option<Vec<Frame>>, bool);

pub type Producer = Box<dyn FnMut() -> Produced>;

#[derive(Derivative)]
#[derivative(Debug)]
pub enum QueueEntry {
    Frame(Frame),
    Deferred(#[derivative(Debug = "ignore")] Producer),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Process,
    Ignore,
}

/// One HTTP/2 stream: lifecycle state, priority bookkeeping, flow-control
/// window, send buffer and queue. Frames going out land in the outbox, in
/// wire order; lifecycle and payload events land in the event queue. The
/// connection layer owns when both are drained.
#[derive(Debug)]
pub struct Stream {
    pub id: StreamId,
    state: StreamState,
    closed: Option<CloseReason>,
    error: Option<ErrorType>,
    activated: bool,
    connect: bool,
    tunnel: bool,
    weight: u16,
    dependency: Option<StreamId>,
    window: i64,
    send_buffer: VecDeque<Frame>,
    queue: VecDeque<QueueEntry>,
    outbox: VecDeque<Frame>,
    events: VecDeque<StreamEvent>,
}

impl Stream {
    #[must_use]
    pub fn new(id: StreamId) -> Self {
        Self::with_window(
            id,
            i64::from(default_settings()[SettingsParameter::InitialWindowSize]),
        )
    }

    #[must_use]
    pub fn with_window(id: StreamId, window: i64) -> Self {
        Self {
            id,
            state: StreamState::Idle,
            closed: None,
            error: None,
            activated: false,
            connect: false,
            tunnel: false,
            weight: DEFAULT_WEIGHT,
            dependency: None,
            window,
            send_buffer: VecDeque::new(),
            queue: VecDeque::new(),
            outbox: VecDeque::new(),
            events: VecDeque::new(),
        }
    }

    /// A stream carrying a CONNECT request. Once the 2xx response arrives it
    /// becomes a tunnel and only DATA, RST_STREAM, WINDOW_UPDATE and
    /// PRIORITY may flow in either direction.
    #[must_use]
    pub fn connect(id: StreamId) -> Self {
        let mut stream = Self::new(id);
        stream.connect = true;
        stream
    }

    #[must_use]
    pub fn state(&self) -> StreamState {
        self.state
    }

    #[must_use]
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.closed
    }

    #[must_use]
    pub fn error(&self) -> Option<ErrorType> {
        self.error
    }

    #[must_use]
    pub fn weight(&self) -> u16 {
        self.weight
    }

    #[must_use]
    pub fn dependency(&self) -> Option<StreamId> {
        self.dependency
    }

    #[must_use]
    pub fn window(&self) -> i64 {
        self.window
    }

    /// Frames ready for the wire, in order.
    pub fn take_frames(&mut self) -> Vec<Frame> {
        self.outbox.drain(..).collect()
    }

    pub fn take_events(&mut self) -> Vec<StreamEvent> {
        self.events.drain(..).collect()
    }

    /// Feed a frame received from the peer. HEADERS and PUSH_PROMISE must
    /// arrive with their block already decoded.
    pub fn recv(&mut self, frame: Frame) -> Result<(), Error> {
        if matches!(
            &frame,
            Frame::Headers {
                block: HeaderBlock::Fragment(_),
                ..
            } | Frame::PushPromise {
                block: HeaderBlock::Fragment(_),
                ..
            }
        ) {
            return Err(ProtocolError::UndecodedHeaderBlock.into());
        }
        let Some(ty) = frame.frame_type() else {
            return Err(self.raise(None, frame.type_code()));
        };
        if self.tunnel && !tunnel_allowed(ty) {
            return Err(self.raise(None, frame.type_code()));
        }
        if let Frame::ResetStream { error, .. } = &frame {
            warn!("stream {} reset by peer: {:?}", self.id, error);
            self.error = Some(*error);
        }

        if self.transition(false, ty, frame.flags())? == Disposition::Ignore {
            trace!("stream {} ignoring {:?}", self.id, ty);
            if let Frame::WindowUpdate { increment, .. } = &frame {
                // no event and no transition, but buffered data may still be
                // waiting on the window
                self.window += i64::from(*increment);
                self.drain_send_buffer();
            }
            return Ok(());
        }

        match frame {
            Frame::Data { .. } => self.events.push_back(StreamEvent::Data(frame)),
            Frame::Headers {
                flags,
                exclusive_dependency,
                dependency,
                weight,
                block,
                ..
            } => {
                if flags.contains(HeadersFlags::PRIORITY) {
                    self.weight = weight;
                    self.dependency = Some(dependency);
                    self.events.push_back(StreamEvent::Priority {
                        weight,
                        dependency,
                        exclusive: exclusive_dependency,
                    });
                }
                let HeaderBlock::Decoded(headers) = block else {
                    unreachable!("fragments are rejected on entry");
                };
                if self.connect && !self.tunnel && is_success(&headers) {
                    trace!("stream {} entering tunnel mode", self.id);
                    self.tunnel = true;
                }
                self.events.push_back(StreamEvent::Headers(headers));
            }
            Frame::PushPromise {
                promised, block, ..
            } => {
                let HeaderBlock::Decoded(headers) = block else {
                    unreachable!("fragments are rejected on entry");
                };
                self.events
                    .push_back(StreamEvent::PushPromise { promised, headers });
            }
            Frame::Priority {
                exclusive_dependency,
                dependency,
                weight,
                ..
            } => {
                self.weight = weight;
                self.dependency = Some(dependency);
                self.events.push_back(StreamEvent::Priority {
                    weight,
                    dependency,
                    exclusive: exclusive_dependency,
                });
            }
            Frame::ResetStream { .. } | Frame::Continuation { .. } => {}
            Frame::WindowUpdate { increment, .. } => {
                self.window += i64::from(increment);
                self.events.push_back(StreamEvent::WindowUpdate(increment));
                self.drain_send_buffer();
            }
            Frame::Settings { .. } | Frame::Ping { .. } | Frame::GoAway { .. } => {
                unreachable!("connection-scoped frames can't be driven at a stream");
            }
            Frame::Extension { .. } => unreachable!("rejected on entry"),
        }
        self.complete();
        Ok(())
    }

    /// Accept a frame from the application for sending. DATA is subject to
    /// flow control and splitting; everything else goes straight to the
    /// outbox once the transition is allowed.
    pub fn send(&mut self, frame: Frame) -> Result<(), Error> {
        let Some(ty) = frame.frame_type() else {
            return Err(self.raise(None, frame.type_code()));
        };
        if self.tunnel && !tunnel_allowed(ty) {
            return Err(self.raise(None, frame.type_code()));
        }
        if let Frame::ResetStream { error, .. } = &frame {
            self.error = Some(*error);
        }

        self.transition(true, ty, frame.flags())?;

        match frame {
            frame @ Frame::Data { .. } => {
                if self.send_buffer.is_empty() {
                    self.send_data(frame, false);
                } else {
                    // older stalled data keeps its place in line
                    self.send_buffer.push_back(frame);
                }
            }
            frame => {
                if let Frame::Priority { weight, .. } = &frame {
                    self.weight = *weight;
                }
                self.outbox.push_back(frame);
            }
        }
        self.complete();
        Ok(())
    }

    /// Process up to `n` queue entries. Deferred producers run here, on the
    /// connection scheduler's clock.
    pub fn pump_queue(&mut self, n: usize) -> Result<(), Error> {
        for _ in 0..n {
            let Some(entry) = self.queue.pop_front() else {
                break;
            };
            match entry {
                QueueEntry::Frame(frame) => self.pump_send(frame)?,
                QueueEntry::Deferred(mut producer) => {
                    let (frames, again) = producer();
                    if again {
                        self.queue.push_front(QueueEntry::Deferred(producer));
                    }
                    if let Some(mut frames) = frames {
                        if !frames.is_empty() {
                            let first = frames.remove(0);
                            for frame in frames.into_iter().rev() {
                                self.queue.push_front(QueueEntry::Frame(frame));
                            }
                            self.pump_send(first)?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    pub fn enqueue_frame(&mut self, frame: Frame) {
        self.queue.push_back(QueueEntry::Frame(frame));
    }

    pub fn enqueue_deferred(&mut self, producer: impl FnMut() -> Produced + 'static) {
        self.queue.push_back(QueueEntry::Deferred(Box::new(producer)));
    }

    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    fn pump_send(&mut self, frame: Frame) -> Result<(), Error> {
        let nudge = frame.flags().end_stream();
        self.send(frame)?;
        if nudge && self.queue.is_empty() && self.state != StreamState::Closed {
            // keeps the peer's flow-control accounting ticking over after
            // our last payload frame
            self.outbox.push_back(Frame::WindowUpdate {
                stream: self.id,
                increment: 1,
            });
        }
        Ok(())
    }

    /// Emit as much of a DATA frame as the window allows, splitting at the
    /// frame size limit. The unsendable remainder is retained with its
    /// END_STREAM flag intact.
    fn send_data(&mut self, frame: Frame, requeue_front: bool) -> bool {
        let Frame::Data {
            stream,
            flags,
            mut data,
        } = frame
        else {
            unreachable!("only DATA is flow controlled");
        };
        loop {
            let budget = self.window.max(0).min(MAX_FRAME_SIZE as i64) as usize;
            if data.len() <= budget {
                self.window -= data.len() as i64;
                self.outbox.push_back(Frame::Data {
                    stream,
                    flags,
                    data,
                });
                return true;
            }
            if budget == 0 {
                trace!(
                    "stream {} window exhausted, buffering {} bytes",
                    self.id,
                    data.len()
                );
                let rest = Frame::Data {
                    stream,
                    flags,
                    data,
                };
                if requeue_front {
                    self.send_buffer.push_front(rest);
                } else {
                    self.send_buffer.push_back(rest);
                }
                return false;
            }
            let chunk = data.split_to(budget);
            self.window -= budget as i64;
            self.outbox.push_back(Frame::Data {
                stream,
                flags: flags - DataFlags::END_STREAM,
                data: chunk,
            });
        }
    }

    fn drain_send_buffer(&mut self) {
        while self.window > 0 {
            let Some(frame) = self.send_buffer.pop_front() else {
                break;
            };
            if !self.send_data(frame, true) {
                break;
            }
        }
    }

    /// https://tools.ietf.org/html/draft-ietf-httpbis-http2-06#section-5.1
    fn transition(
        &mut self,
        sending: bool,
        ty: FrameType,
        flags: Flags,
    ) -> Result<Disposition, Error> {
        use FrameType::*;
        let es = flags.end_stream();
        let original = self.state;

        match self.state {
            StreamState::Idle => match (ty, sending) {
                (Headers, true) => {
                    self.open();
                    if es {
                        self.half_close(CloseReason::LocalClosed);
                    }
                }
                (Headers, false) => {
                    self.open();
                    if es {
                        self.half_close(CloseReason::RemoteClosed);
                    }
                }
                (PushPromise, true) => self.reserve(StreamState::ReservedLocal),
                (PushPromise, false) => self.reserve(StreamState::ReservedRemote),
                (ResetStream, true) => self.close(CloseReason::LocalRst),
                _ => return Err(self.raise_for(ty)),
            },
            StreamState::ReservedLocal => match (ty, sending) {
                (Headers, true) => self.half_close(CloseReason::RemoteClosed),
                (ResetStream, true) => self.close(CloseReason::LocalRst),
                (ResetStream, false) => self.close(CloseReason::RemoteRst),
                (Priority, false) => {}
                _ => return Err(self.raise_for(ty)),
            },
            StreamState::ReservedRemote => match (ty, sending) {
                (ResetStream, true) => self.close(CloseReason::LocalRst),
                (Priority, true) => {}
                (Headers, false) => self.half_close(CloseReason::LocalClosed),
                (ResetStream, false) => self.close(CloseReason::RemoteRst),
                _ => return Err(self.raise_for(ty)),
            },
            StreamState::Open => match ty {
                ResetStream => self.close(if sending {
                    CloseReason::LocalRst
                } else {
                    CloseReason::RemoteRst
                }),
                Data | Headers if es => self.half_close(if sending {
                    CloseReason::LocalClosed
                } else {
                    CloseReason::RemoteClosed
                }),
                _ => {}
            },
            StreamState::HalfClosedLocal => {
                if sending {
                    match ty {
                        ResetStream => self.close(CloseReason::LocalRst),
                        WindowUpdate => {}
                        _ => return Err(self.raise_for(ty)),
                    }
                } else {
                    match ty {
                        Data | Headers if es => self.close(CloseReason::RemoteClosed),
                        // CONTINUATION rides with the header block that
                        // opened it
                        Data | Headers | Continuation => {}
                        ResetStream => self.close(CloseReason::RemoteRst),
                        WindowUpdate | Priority => return Ok(Disposition::Ignore),
                        _ => return Err(self.raise_for(ty)),
                    }
                }
            }
            StreamState::HalfClosedRemote => {
                if sending {
                    match ty {
                        Data | Headers if es => self.close(CloseReason::LocalClosed),
                        ResetStream => self.close(CloseReason::LocalRst),
                        _ => {}
                    }
                } else {
                    match ty {
                        ResetStream => self.close(CloseReason::RemoteRst),
                        WindowUpdate => return Ok(Disposition::Ignore),
                        Priority => {}
                        _ => {
                            let code = frame_code(ty);
                            return Err(self.raise(Some(ErrorType::StreamClosed), code));
                        }
                    }
                }
            }
            StreamState::HalfClosing | StreamState::Closing => {
                unreachable!("transient states resolve before the call returns");
            }
            StreamState::Closed => {
                if sending {
                    match ty {
                        ResetStream | Priority => {}
                        _ => {
                            let code = frame_code(ty);
                            return Err(self.raise(Some(ErrorType::StreamClosed), code));
                        }
                    }
                } else {
                    match self.closed {
                        Some(CloseReason::RemoteRst | CloseReason::RemoteClosed) => match ty {
                            ResetStream | Priority => {}
                            _ => {
                                let code = frame_code(ty);
                                return Err(self.raise(Some(ErrorType::StreamClosed), code));
                            }
                        },
                        // we closed it ourselves; late frames are expected
                        _ => return Ok(Disposition::Ignore),
                    }
                }
            }
        }

        if self.state != original {
            trace!("stream {} {:?} -> {:?}", self.id, original, self.state);
        }
        Ok(Disposition::Process)
    }

    fn open(&mut self) {
        self.state = StreamState::Open;
        self.activate();
    }

    fn activate(&mut self) {
        if !self.activated {
            self.activated = true;
            self.events.push_back(StreamEvent::Active);
        }
    }

    fn reserve(&mut self, state: StreamState) {
        self.state = state;
        self.events.push_back(StreamEvent::Reserved);
    }

    fn half_close(&mut self, reason: CloseReason) {
        self.closed = Some(reason);
        self.state = StreamState::HalfClosing;
    }

    fn close(&mut self, reason: CloseReason) {
        self.closed = Some(reason);
        self.state = StreamState::Closing;
    }

    /// Resolve a transient state left by the per-frame transition, emitting
    /// the lifecycle event after any payload events.
    fn complete(&mut self) {
        match self.state {
            StreamState::HalfClosing => {
                // unwrap: half_close always records the reason first
                let reason = self.closed.unwrap();
                self.state = match reason {
                    CloseReason::LocalClosed => StreamState::HalfClosedLocal,
                    CloseReason::RemoteClosed => StreamState::HalfClosedRemote,
                    CloseReason::LocalRst | CloseReason::RemoteRst => {
                        unreachable!("resets close the stream fully")
                    }
                };
                self.activate();
                self.events.push_back(StreamEvent::HalfClose(reason));
                trace!("stream {} half-closed: {:?}", self.id, reason);
            }
            StreamState::Closing => {
                self.state = StreamState::Closed;
                self.events.push_back(StreamEvent::Close(self.error));
                trace!("stream {} closed: {:?}", self.id, self.closed);
            }
            _ => {}
        }
    }

    /// Record a stream error, reset the stream if it still can be, and build
    /// the error that surfaces to the caller. A `None` kind is the generic
    /// stream error and maps to `protocol-error` on the wire.
    fn raise(&mut self, kind: Option<ErrorType>, code: u8) -> Error {
        let state = self.state;
        let wire = kind.unwrap_or(ErrorType::ProtocolError);
        self.error = Some(wire);
        if self.state != StreamState::Closed {
            // the RST_STREAM goes out before the error surfaces; sending a
            // reset is legal from every non-closed state
            let _ = self.transition(true, FrameType::ResetStream, Flags::None);
            self.complete();
            self.outbox.push_back(Frame::ResetStream {
                stream: self.id,
                error: wire,
            });
        }
        match kind {
            Some(ErrorType::StreamClosed) => ProtocolError::StreamClosed(self.id).into(),
            _ => ProtocolError::InvalidTransition {
                id: self.id,
                state,
                code,
            }
            .into(),
        }
    }

    fn raise_for(&mut self, ty: FrameType) -> Error {
        self.raise(None, frame_code(ty))
    }
}

fn frame_code(ty: FrameType) -> u8 {
    // unwrap: FrameType is repr(u8)
    ty.to_u8().unwrap()
}

fn tunnel_allowed(ty: FrameType) -> bool {
    matches!(
        ty,
        FrameType::Data | FrameType::ResetStream | FrameType::WindowUpdate | FrameType::Priority
    )
}

fn is_success(headers: &[Header]) -> bool {
    headers.iter().any(|(name, value)| {
        name.as_ref() == b":status" && value.len() == 3 && value.first() == Some(&b'2')
    })
}

/// Exclusive insertion: every stream depending on `parent` is re-pointed at
/// `target`. The connection calls this when a stream declares an exclusive
/// dependency; it owns the stream table and the existence check.
pub fn exclusive_insertion<'a>(
    streams: impl IntoIterator<Item = &'a mut Stream>,
    target: StreamId,
    parent: StreamId,
) {
    for stream in streams {
        if stream.id != target && stream.dependency == Some(parent) {
            trace!(
                "stream {} re-pointed from {} to {}",
                stream.id,
                parent,
                target
            );
            stream.dependency = Some(target);
        }
    }
}
