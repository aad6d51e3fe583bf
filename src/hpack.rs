use crate::error::CompressionError;
use crate::huffman;
use crate::types::U31_MAX;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use log::debug;
use std::collections::VecDeque;

/// An ordered (name, value) pair. Names are ASCII lowercase on the wire;
/// values are byte-exact and UTF-8 whenever the peer sent UTF-8.
pub type Header = (Bytes, Bytes);

/// Book-keeping overhead charged per table entry.
const ENTRY_OVERHEAD: usize = 32;

/// Passes the encoder gives an eviction cascade before declaring it unstable.
const CASCADE_LIMIT: usize = 10;

#[derive(Debug, Clone)]
struct TableEntry {
    pub size: usize,
    pub name: Bytes,
    pub value: Bytes,
}

impl TableEntry {
    pub fn new(name: Bytes, value: Bytes) -> Self {
        Self {
            size: name.len() + value.len() + ENTRY_OVERHEAD,
            name,
            value,
        }
    }
}

macro_rules! static_table {
    ( $( $name:expr => $value:expr ),+ ) => {
        [
            $(
                TableEntry {
                    size: $name.len() + $value.len() + ENTRY_OVERHEAD,
                    name: Bytes::from_static($name),
                    value: Bytes::from_static($value),
                }
            ),+
        ]
    };
}

/// The 61 fixed entries addressed after the dynamic table in the combined
/// index space.
static STATIC_TABLE: [TableEntry; 61] = static_table![
    b":authority" => b"",
    b":method" => b"GET",
    b":method" => b"POST",
    b":path" => b"/",
    b":path" => b"/index.html",
    b":scheme" => b"http",
    b":scheme" => b"https",
    b":status" => b"200",
    b":status" => b"204",
    b":status" => b"206",
    b":status" => b"304",
    b":status" => b"400",
    b":status" => b"404",
    b":status" => b"500",
    b"accept-charset" => b"",
    b"accept-encoding" => b"gzip, deflate",
    b"accept-language" => b"",
    b"accept-ranges" => b"",
    b"accept" => b"",
    b"access-control-allow-origin" => b"",
    b"age" => b"",
    b"allow" => b"",
    b"authorization" => b"",
    b"cache-control" => b"",
    b"content-disposition" => b"",
    b"content-encoding" => b"",
    b"content-language" => b"",
    b"content-length" => b"",
    b"content-location" => b"",
    b"content-range" => b"",
    b"content-type" => b"",
    b"cookie" => b"",
    b"date" => b"",
    b"etag" => b"",
    b"expect" => b"",
    b"expires" => b"",
    b"from" => b"",
    b"host" => b"",
    b"if-match" => b"",
    b"if-modified-since" => b"",
    b"if-none-match" => b"",
    b"if-range" => b"",
    b"if-unmodified-since" => b"",
    b"last-modified" => b"",
    b"link" => b"",
    b"location" => b"",
    b"max-forwards" => b"",
    b"proxy-authenticate" => b"",
    b"proxy-authorization" => b"",
    b"range" => b"",
    b"referer" => b"",
    b"refresh" => b"",
    b"retry-after" => b"",
    b"server" => b"",
    b"set-cookie" => b"",
    b"strict-transport-security" => b"",
    b"transfer-encoding" => b"",
    b"user-agent" => b"",
    b"vary" => b"",
    b"via" => b"",
    b"www-authenticate" => b""
];

/// Prefixed integer, https://tools.ietf.org/html/draft-ietf-httpbis-header-compression-03
fn encode_integer(out: &mut BytesMut, value: usize, prefix: u8, pattern: u8) {
    let cap = (1usize << prefix) - 1;
    if value < cap {
        out.put_u8(pattern | value as u8);
    } else {
        out.put_u8(pattern | cap as u8);
        let mut value = value - cap;
        while value >= 128 {
            out.put_u8((value % 128) as u8 | 0x80);
            value /= 128;
        }
        out.put_u8(value as u8);
    }
}

fn decode_integer(cur: &mut Bytes, prefix: u8) -> Result<usize, CompressionError> {
    if !cur.has_remaining() {
        return Err(CompressionError::TruncatedHeaderBlock);
    }
    let cap = (1usize << prefix) - 1;
    let mut value = usize::from(cur.get_u8()) & cap;
    if value == cap {
        let mut shift = 0u32;
        loop {
            if !cur.has_remaining() {
                return Err(CompressionError::TruncatedHeaderBlock);
            }
            let byte = cur.get_u8();
            value += usize::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
            if shift > 28 {
                return Err(CompressionError::IntegerOverflow);
            }
        }
    }
    if value > U31_MAX as usize {
        return Err(CompressionError::IntegerOverflow);
    }
    Ok(value)
}

/// 7-bit-prefix length followed by the raw body. The high bit of the first
/// byte would mark a Huffman-coded body; this encoder always emits plain.
fn encode_string(out: &mut BytesMut, data: &[u8]) {
    encode_integer(out, data.len(), 7, 0x00);
    out.extend_from_slice(data);
}

fn decode_string(cur: &mut Bytes) -> Result<Bytes, CompressionError> {
    if !cur.has_remaining() {
        return Err(CompressionError::TruncatedHeaderBlock);
    }
    let coded = cur[0] & 0x80 != 0;
    let length = decode_integer(cur, 7)?;
    if cur.remaining() < length {
        return Err(CompressionError::TruncatedHeaderBlock);
    }
    let body = cur.split_to(length);
    Ok(if coded {
        Bytes::from(huffman::decode(&body)?)
    } else {
        body
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Indexing {
    Incremental,
    None,
    Never,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Name {
    Index(usize),
    Literal(Bytes),
}

/// One header field representation on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `1xxxxxxx` — toggle the entry at a combined index.
    Indexed(usize),
    /// `01xxxxxx` / `0000xxxx` / `0001xxxx` — literal header, with the
    /// indexing strategy selecting the pattern.
    Literal {
        indexing: Indexing,
        name: Name,
        value: Bytes,
    },
    /// `00110000` — empty the reference set.
    Reset,
    /// `00100000` followed by a 7-bit-prefix integer.
    NewMaxSize(usize),
}

impl Command {
    pub fn encode(&self, out: &mut BytesMut) {
        match self {
            Self::Indexed(index) => encode_integer(out, *index, 7, 0x80),
            Self::Literal {
                indexing,
                name,
                value,
            } => {
                let (prefix, pattern) = match indexing {
                    Indexing::Incremental => (6, 0x40),
                    Indexing::None => (4, 0x00),
                    Indexing::Never => (4, 0x10),
                };
                match name {
                    Name::Index(index) => encode_integer(out, *index, prefix, pattern),
                    Name::Literal(name) => {
                        out.put_u8(pattern);
                        encode_string(out, name);
                    }
                }
                encode_string(out, value);
            }
            Self::Reset => out.put_u8(0x30),
            Self::NewMaxSize(limit) => {
                out.put_u8(0x20);
                encode_integer(out, *limit, 7, 0x00);
            }
        }
    }

    pub fn decode(cur: &mut Bytes) -> Result<Self, CompressionError> {
        if !cur.has_remaining() {
            return Err(CompressionError::TruncatedHeaderBlock);
        }
        let first = cur[0];
        if first & 0x80 != 0 {
            return Ok(Self::Indexed(decode_integer(cur, 7)?));
        }
        if first & 0x40 != 0 {
            return Self::decode_literal(cur, Indexing::Incremental, 6);
        }
        if first & 0x20 != 0 {
            cur.advance(1);
            return if first & 0x10 != 0 {
                Ok(Self::Reset)
            } else {
                Ok(Self::NewMaxSize(decode_integer(cur, 7)?))
            };
        }
        if first & 0x10 != 0 {
            Self::decode_literal(cur, Indexing::Never, 4)
        } else {
            Self::decode_literal(cur, Indexing::None, 4)
        }
    }

    fn decode_literal(
        cur: &mut Bytes,
        indexing: Indexing,
        prefix: u8,
    ) -> Result<Self, CompressionError> {
        let index = decode_integer(cur, prefix)?;
        let name = if index == 0 {
            Name::Literal(decode_string(cur)?)
        } else {
            Name::Index(index)
        };
        Ok(Self::Literal {
            indexing,
            name,
            value: decode_string(cur)?,
        })
    }
}

/// What one processed command did to the context.
#[derive(Debug, Default)]
pub struct Processed {
    pub emitted: Option<Header>,
    pub evicted: Vec<Header>,
}

/// Per-direction compression state: the dynamic table (newest at combined
/// index 1, static entries after it), the reference set, and the size limits.
#[derive(Debug, Clone)]
pub struct EncodingContext {
    table: VecDeque<TableEntry>,
    current_size: usize,
    limit: usize,
    settings_limit: usize,
    refset: Vec<(usize, Header)>,
}

impl EncodingContext {
    #[must_use]
    pub fn with_size(limit: usize) -> Self {
        Self {
            table: VecDeque::new(),
            current_size: 0,
            limit,
            settings_limit: limit,
            refset: Vec::new(),
        }
    }

    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit
    }

    #[must_use]
    pub fn current_size(&self) -> usize {
        self.current_size
    }

    /// Snapshot of the dynamic table, newest first.
    #[must_use]
    pub fn entries(&self) -> Vec<Header> {
        self.table
            .iter()
            .map(|entry| (entry.name.clone(), entry.value.clone()))
            .collect()
    }

    #[must_use]
    pub fn refset(&self) -> &[(usize, Header)] {
        &self.refset
    }

    /// Applies a new SETTINGS_HEADER_TABLE_SIZE cap. The active limit can
    /// never exceed it.
    pub fn set_settings_limit(&mut self, limit: usize) {
        self.settings_limit = limit;
        if self.limit > limit {
            self.limit = limit;
            let mut evicted = Vec::new();
            while self.current_size > self.limit {
                self.evict(&mut evicted);
            }
        }
    }

    /// Resolve a combined index.
    pub fn get(&self, index: usize) -> Result<Header, CompressionError> {
        if index == 0 {
            return Err(CompressionError::IndexOutOfRange(index));
        }
        self.table
            .get(index - 1)
            .or_else(|| STATIC_TABLE.get(index - self.table.len() - 1))
            .map(|entry| (entry.name.clone(), entry.value.clone()))
            .ok_or(CompressionError::IndexOutOfRange(index))
    }

    /// Combined index of an exact match, dynamic table first.
    #[must_use]
    pub fn find(&self, header: &Header) -> Option<usize> {
        self.table
            .iter()
            .position(|entry| entry.name == header.0 && entry.value == header.1)
            .map(|position| position + 1)
            .or_else(|| {
                STATIC_TABLE
                    .iter()
                    .position(|entry| entry.name == header.0 && entry.value == header.1)
                    .map(|position| self.table.len() + position + 1)
            })
    }

    /// Combined index of a name-only match, dynamic table first.
    #[must_use]
    pub fn find_name(&self, name: &Bytes) -> Option<usize> {
        self.table
            .iter()
            .position(|entry| entry.name == *name)
            .map(|position| position + 1)
            .or_else(|| {
                STATIC_TABLE
                    .iter()
                    .position(|entry| entry.name == *name)
                    .map(|position| self.table.len() + position + 1)
            })
    }

    /// Apply one command. Both sides of a connection run the identical
    /// sequence so their tables stay mirrored.
    pub fn process(&mut self, cmd: &Command) -> Result<Processed, CompressionError> {
        let mut processed = Processed::default();
        match cmd {
            Command::Reset => {
                for (_, header) in self.refset.drain(..) {
                    processed.evicted.push(header);
                }
            }
            Command::NewMaxSize(limit) => {
                if *limit > self.settings_limit {
                    return Err(CompressionError::TableSizeOverLimit {
                        requested: *limit,
                        limit: self.settings_limit,
                    });
                }
                self.limit = *limit;
                while self.current_size > self.limit {
                    self.evict(&mut processed.evicted);
                }
            }
            Command::Indexed(0) => self.refset.clear(),
            Command::Indexed(index) => {
                if let Some(active) = self.refset.iter().position(|(pos, _)| pos == index) {
                    // the header was already present; the toggle turns it off
                    self.refset.remove(active);
                } else {
                    let header = self.get(*index)?;
                    self.refset.push((*index, header.clone()));
                    processed.emitted = Some(header);
                }
            }
            Command::Literal {
                indexing,
                name,
                value,
            } => {
                let name = match name {
                    Name::Index(index) => self.get(*index)?.0,
                    Name::Literal(name) => name.clone(),
                };
                let header = (name, value.clone());
                if *indexing == Indexing::Incremental {
                    self.insert(&header, &mut processed.evicted);
                }
                processed.emitted = Some(header);
            }
        }
        Ok(processed)
    }

    /// Insert at the front, evicting from the oldest end until the entry
    /// fits. An entry larger than the whole budget clears the table instead.
    fn insert(&mut self, header: &Header, evicted: &mut Vec<Header>) {
        let entry = TableEntry::new(header.0.clone(), header.1.clone());
        if entry.size > self.limit {
            debug!(
                "entry of {} bytes exceeds the {} byte table, clearing",
                entry.size, self.limit
            );
            for dropped in self.table.drain(..) {
                evicted.push((dropped.name, dropped.value));
            }
            self.current_size = 0;
            self.refset.clear();
            return;
        }
        while self.current_size + entry.size > self.limit {
            self.evict(evicted);
        }
        self.current_size += entry.size;
        self.table.push_front(entry);
        for (position, _) in &mut self.refset {
            *position += 1;
        }
        self.refset.push((1, header.clone()));
    }

    fn evict(&mut self, evicted: &mut Vec<Header>) {
        if let Some(entry) = self.table.pop_back() {
            let position = self.table.len() + 1;
            self.current_size -= entry.size;
            debug!("evicting ({:?}, {:?})", entry.name, entry.value);
            self.refset.retain(|(pos, _)| *pos != position);
            for (pos, _) in &mut self.refset {
                if *pos > position {
                    *pos -= 1;
                }
            }
            evicted.push((entry.name, entry.value));
        }
    }
}

/// Differential header encoder. Owns the local half of the mirrored context.
#[derive(Debug, Clone)]
pub struct Encoder {
    context: EncodingContext,
}

impl Encoder {
    #[must_use]
    pub fn with_size(dynamic_table_size: usize) -> Self {
        Self {
            context: EncodingContext::with_size(dynamic_table_size),
        }
    }

    #[must_use]
    pub fn context(&self) -> &EncodingContext {
        &self.context
    }

    pub fn set_settings_limit(&mut self, limit: usize) {
        self.context.set_settings_limit(limit);
    }

    /// Encode a header list against the current reference set. Every command
    /// is processed locally as it is chosen, so the table evolves exactly as
    /// the peer's decoder will evolve it.
    pub fn encode<K, V>(
        &mut self,
        headers: impl IntoIterator<Item = (K, V)>,
    ) -> Result<Bytes, CompressionError>
    where
        K: Into<Bytes>,
        V: Into<Bytes>,
    {
        let want = preprocess(
            headers
                .into_iter()
                .map(|(name, value)| (name.into(), value.into())),
        );
        let mut commands = Vec::new();

        // headers the new block no longer carries get toggled off
        for (position, header) in self.context.refset.clone() {
            if !want.contains(&header) {
                let cmd = Command::Indexed(position);
                self.context.process(&cmd)?;
                commands.push(cmd);
            }
        }

        // headers not yet active get the best command available; oversized
        // entries are emitted without indexing and tracked separately
        let mut unindexed: Vec<Header> = Vec::new();
        for header in &want {
            if self.is_active(header) {
                continue;
            }
            let cmd = self.best_command(header);
            if matches!(
                cmd,
                Command::Literal {
                    indexing: Indexing::None,
                    ..
                }
            ) {
                unindexed.push(header.clone());
            }
            self.context.process(&cmd)?;
            commands.push(cmd);
        }

        // insertions may have evicted headers this block still needs
        let mut passes = 0;
        loop {
            let missing: Vec<Header> = want
                .iter()
                .filter(|header| !self.is_active(header) && !unindexed.contains(header))
                .cloned()
                .collect();
            if missing.is_empty() {
                break;
            }
            passes += 1;
            if passes > CASCADE_LIMIT {
                return Err(CompressionError::UnstableEviction);
            }
            for header in missing {
                let cmd = self.best_command(&header);
                if matches!(
                    cmd,
                    Command::Literal {
                        indexing: Indexing::None,
                        ..
                    }
                ) {
                    unindexed.push(header.clone());
                }
                self.context.process(&cmd)?;
                commands.push(cmd);
            }
        }

        let mut out = BytesMut::new();
        for cmd in &commands {
            cmd.encode(&mut out);
        }
        Ok(out.freeze())
    }

    fn is_active(&self, header: &Header) -> bool {
        self.context
            .refset
            .iter()
            .any(|(_, active)| active == header)
    }

    fn best_command(&self, header: &Header) -> Command {
        if let Some(index) = self.context.find(header) {
            return Command::Indexed(index);
        }
        let size = header.0.len() + header.1.len() + ENTRY_OVERHEAD;
        let indexing = if size > self.context.limit {
            Indexing::None
        } else {
            Indexing::Incremental
        };
        let name = match self.context.find_name(&header.0) {
            Some(index) => Name::Index(index),
            None => Name::Literal(header.0.clone()),
        };
        Command::Literal {
            indexing,
            name,
            value: header.1.clone(),
        }
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::with_size(4096)
    }
}

/// Header decoder. Owns the remote half of the mirrored context.
#[derive(Debug, Clone)]
pub struct Decoder {
    context: EncodingContext,
}

impl Decoder {
    #[must_use]
    pub fn with_size(dynamic_table_size: usize) -> Self {
        Self {
            context: EncodingContext::with_size(dynamic_table_size),
        }
    }

    #[must_use]
    pub fn context(&self) -> &EncodingContext {
        &self.context
    }

    pub fn set_settings_limit(&mut self, limit: usize) {
        self.context.set_settings_limit(limit);
    }

    /// Decode one header block. Reference-set entries the block did not
    /// mention are still part of it and are appended after the explicit
    /// emissions.
    pub fn decode(&mut self, data: impl Into<Bytes>) -> Result<Vec<Header>, CompressionError> {
        let mut cur: Bytes = data.into();
        let mut emitted: Vec<Header> = Vec::new();
        while cur.has_remaining() {
            let cmd = Command::decode(&mut cur)?;
            if let Some(header) = self.context.process(&cmd)?.emitted {
                emitted.push(header);
            }
        }
        for (_, header) in &self.context.refset {
            if !emitted.contains(header) {
                emitted.push(header.clone());
            }
        }
        Ok(postprocess(emitted))
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::with_size(4096)
    }
}

/// Same-name headers join with NUL (except `set-cookie`), then `cookie`
/// values split into one header per crumb.
fn preprocess(headers: impl Iterator<Item = Header>) -> Vec<Header> {
    let mut combined: Vec<Header> = Vec::new();
    for (name, value) in headers {
        let joinable = name.as_ref() != b"set-cookie";
        match combined
            .iter_mut()
            .find(|(existing, _)| joinable && *existing == name)
        {
            Some((_, existing)) => {
                let mut joined = BytesMut::with_capacity(existing.len() + 1 + value.len());
                joined.extend_from_slice(existing);
                joined.put_u8(0);
                joined.extend_from_slice(&value);
                *existing = joined.freeze();
            }
            None => combined.push((name, value)),
        }
    }

    let mut out = Vec::with_capacity(combined.len());
    for (name, value) in combined {
        if name.as_ref() == b"cookie" {
            for crumb in value
                .split(|&byte| byte == b';' || byte == b' ' || byte == 0)
                .filter(|crumb| !crumb.is_empty())
            {
                out.push((name.clone(), value.slice_ref(crumb)));
            }
        } else {
            out.push((name, value));
        }
    }
    out
}

/// Crumbs come back as separate `cookie` headers; rejoin them.
fn postprocess(headers: Vec<Header>) -> Vec<Header> {
    let mut out: Vec<Header> = Vec::new();
    for (name, value) in headers {
        if name.as_ref() == b"cookie" {
            if let Some((_, existing)) = out.iter_mut().find(|(n, _)| n.as_ref() == b"cookie") {
                let mut joined = BytesMut::with_capacity(existing.len() + 2 + value.len());
                joined.extend_from_slice(existing);
                joined.extend_from_slice(b"; ");
                joined.extend_from_slice(&value);
                *existing = joined.freeze();
                continue;
            }
        }
        out.push((name, value));
    }
    out
}
