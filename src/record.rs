//! Record encoding and decoding.
//!
//! A record is a template plus an ordered list of typed arguments packed into
//! the byte area of one channel slot. The producer packs; the consumer later
//! walks the same bytes and feeds the values to the template engine.
//!
//! # Byte layout
//!
//! ```text
//! [layout: u8][arg count: u8][arg 0][arg 1]...
//!
//! fixed-width arg: [kind tag: u8][value bytes, native endian, native width]
//! text arg:        [kind tag: u8][utf-8 bytes...][0]
//! ```
//!
//! The kind tag in front of every argument is what lets the consumer decode a
//! slot without knowing the call site's argument types. The layout byte says
//! whether the arguments are still to be substituted into the template or the
//! record holds one pre-rendered string.
//!
//! Encoding never overflows the buffer it is given. Each argument is
//! guaranteed its minimum footprint (its native size plus tag, or tag plus
//! terminator for text); text is truncated to whatever budget is left after
//! reserving those minimums for the arguments still to come.

use std::fmt;
use std::time::Duration;

use crate::error::RenderError;
use crate::template;

/// Bytes taken by the layout and argument-count header.
pub const RECORD_HEADER_BYTES: usize = 2;

/// Most arguments a record can carry.
pub const MAX_ARGS: usize = u8::MAX as usize;

/// Template used by records whose text was rendered on the calling thread.
pub const PRE_RENDERED_TEMPLATE: &str = "%s";

const TRUNCATED_ARGS_FLAG: u8 = 0x80;

/// How the arguments of a record are meant to be rendered.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// Arguments are substituted into the record's template.
    Typed = 1,
    /// A single text argument rendered on the producer thread.
    PreRendered = 2,
}

impl Layout {
    const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Layout::Typed),
            2 => Some(Layout::PreRendered),
            _ => None,
        }
    }
}

/// Dispatch tag for one encoded argument.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    I8 = 1,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    Bool,
    Char,
    Duration,
    Text,
}

impl ArgKind {
    pub const fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            1 => ArgKind::I8,
            2 => ArgKind::I16,
            3 => ArgKind::I32,
            4 => ArgKind::I64,
            5 => ArgKind::U8,
            6 => ArgKind::U16,
            7 => ArgKind::U32,
            8 => ArgKind::U64,
            9 => ArgKind::F32,
            10 => ArgKind::F64,
            11 => ArgKind::Bool,
            12 => ArgKind::Char,
            13 => ArgKind::Duration,
            14 => ArgKind::Text,
            _ => return None,
        })
    }

    /// Encoded value width, `None` for variable-length text.
    pub const fn width(self) -> Option<usize> {
        Some(match self {
            ArgKind::I8 | ArgKind::U8 | ArgKind::Bool => 1,
            ArgKind::I16 | ArgKind::U16 => 2,
            ArgKind::I32 | ArgKind::U32 | ArgKind::F32 | ArgKind::Char => 4,
            ArgKind::I64 | ArgKind::U64 | ArgKind::F64 => 8,
            ArgKind::Duration => 12,
            ArgKind::Text => return None,
        })
    }

    /// Smallest number of bytes this argument occupies once encoded.
    pub const fn min_footprint(self) -> usize {
        match self.width() {
            Some(width) => 1 + width,
            // tag plus terminator of an empty string
            None => 2,
        }
    }
}

/// A decoded argument, widened for the template engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ArgValue<'a> {
    Int(i64),
    UInt(u64),
    Float(f64),
    Bool(bool),
    Char(char),
    Text(&'a str),
    Duration(Duration),
}

impl ArgValue<'_> {
    pub fn kind_name(&self) -> &'static str {
        match self {
            ArgValue::Int(_) => "signed integer",
            ArgValue::UInt(_) => "unsigned integer",
            ArgValue::Float(_) => "floating point",
            ArgValue::Bool(_) => "bool",
            ArgValue::Char(_) => "char",
            ArgValue::Text(_) => "text",
            ArgValue::Duration(_) => "duration",
        }
    }
}

impl fmt::Display for ArgValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgValue::Int(v) => write!(f, "{}", v),
            ArgValue::UInt(v) => write!(f, "{}", v),
            ArgValue::Float(v) => write!(f, "{}", v),
            ArgValue::Bool(v) => write!(f, "{}", v),
            ArgValue::Char(v) => write!(f, "{}", v),
            ArgValue::Text(v) => f.write_str(v),
            ArgValue::Duration(v) => write!(f, "{:?}", v),
        }
    }
}

/// A value that can be captured into a record.
pub trait LogArg {
    fn kind(&self) -> ArgKind;
    fn value(&self) -> ArgValue<'_>;
}

macro_rules! impl_log_arg {
    ($($ty:ty => $kind:ident, $variant:ident as $wide:ty);* $(;)?) => {
        $(
            impl LogArg for $ty {
                #[inline]
                fn kind(&self) -> ArgKind {
                    ArgKind::$kind
                }
                #[inline]
                fn value(&self) -> ArgValue<'_> {
                    ArgValue::$variant(*self as $wide)
                }
            }
        )*
    };
}

impl_log_arg! {
    i8 => I8, Int as i64;
    i16 => I16, Int as i64;
    i32 => I32, Int as i64;
    i64 => I64, Int as i64;
    isize => I64, Int as i64;
    u8 => U8, UInt as u64;
    u16 => U16, UInt as u64;
    u32 => U32, UInt as u64;
    u64 => U64, UInt as u64;
    usize => U64, UInt as u64;
    f32 => F32, Float as f64;
    f64 => F64, Float as f64;
}

impl LogArg for bool {
    fn kind(&self) -> ArgKind {
        ArgKind::Bool
    }
    fn value(&self) -> ArgValue<'_> {
        ArgValue::Bool(*self)
    }
}

impl LogArg for char {
    fn kind(&self) -> ArgKind {
        ArgKind::Char
    }
    fn value(&self) -> ArgValue<'_> {
        ArgValue::Char(*self)
    }
}

impl LogArg for Duration {
    fn kind(&self) -> ArgKind {
        ArgKind::Duration
    }
    fn value(&self) -> ArgValue<'_> {
        ArgValue::Duration(*self)
    }
}

impl LogArg for str {
    fn kind(&self) -> ArgKind {
        ArgKind::Text
    }
    fn value(&self) -> ArgValue<'_> {
        ArgValue::Text(self)
    }
}

impl LogArg for String {
    fn kind(&self) -> ArgKind {
        ArgKind::Text
    }
    fn value(&self) -> ArgValue<'_> {
        ArgValue::Text(self.as_str())
    }
}

impl<T: LogArg + ?Sized> LogArg for &T {
    fn kind(&self) -> ArgKind {
        (**self).kind()
    }
    fn value(&self) -> ArgValue<'_> {
        (**self).value()
    }
}

/// An ordered, heterogeneous argument list.
///
/// Implemented for tuples of up to twelve [`LogArg`]s and for slices and
/// arrays of `&dyn LogArg`.
pub trait ArgList {
    fn len(&self) -> usize;

    fn arg(&self, index: usize) -> Option<&dyn LogArg>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ArgList for () {
    fn len(&self) -> usize {
        0
    }
    fn arg(&self, _index: usize) -> Option<&dyn LogArg> {
        None
    }
}

macro_rules! impl_arg_list_tuple {
    ($len:expr; $($name:ident . $idx:tt),+) => {
        impl<$($name: LogArg),+> ArgList for ($($name,)+) {
            #[inline]
            fn len(&self) -> usize {
                $len
            }
            #[inline]
            fn arg(&self, index: usize) -> Option<&dyn LogArg> {
                match index {
                    $($idx => Some(&self.$idx),)+
                    _ => None,
                }
            }
        }
    };
}

impl_arg_list_tuple!(1; A.0);
impl_arg_list_tuple!(2; A.0, B.1);
impl_arg_list_tuple!(3; A.0, B.1, C.2);
impl_arg_list_tuple!(4; A.0, B.1, C.2, D.3);
impl_arg_list_tuple!(5; A.0, B.1, C.2, D.3, E.4);
impl_arg_list_tuple!(6; A.0, B.1, C.2, D.3, E.4, F.5);
impl_arg_list_tuple!(7; A.0, B.1, C.2, D.3, E.4, F.5, G.6);
impl_arg_list_tuple!(8; A.0, B.1, C.2, D.3, E.4, F.5, G.6, H.7);
impl_arg_list_tuple!(9; A.0, B.1, C.2, D.3, E.4, F.5, G.6, H.7, I.8);
impl_arg_list_tuple!(10; A.0, B.1, C.2, D.3, E.4, F.5, G.6, H.7, I.8, J.9);
impl_arg_list_tuple!(11; A.0, B.1, C.2, D.3, E.4, F.5, G.6, H.7, I.8, J.9, K.10);
impl_arg_list_tuple!(12; A.0, B.1, C.2, D.3, E.4, F.5, G.6, H.7, I.8, J.9, K.10, L.11);

impl<'a> ArgList for [&'a dyn LogArg] {
    fn len(&self) -> usize {
        <[&dyn LogArg]>::len(self)
    }
    fn arg(&self, index: usize) -> Option<&dyn LogArg> {
        self.get(index).copied()
    }
}

impl<'a, const N: usize> ArgList for [&'a dyn LogArg; N] {
    fn len(&self) -> usize {
        N
    }
    fn arg(&self, index: usize) -> Option<&dyn LogArg> {
        self.get(index).copied()
    }
}

impl<L: ArgList + ?Sized> ArgList for &L {
    fn len(&self) -> usize {
        (**self).len()
    }
    fn arg(&self, index: usize) -> Option<&dyn LogArg> {
        (**self).arg(index)
    }
}

/// What an encode call produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Encoded {
    /// Bytes written, header included.
    pub len: usize,
    /// Arguments that made it into the buffer.
    pub args: usize,
    /// Set when trailing arguments had no room at all.
    pub args_truncated: bool,
}

/// Encodes `args` into `buf` as a typed record.
///
/// `buf` must be at least [`RECORD_HEADER_BYTES`] long. Text arguments are
/// truncated as needed; arguments whose minimum footprint no longer fits are
/// dropped and the record is flagged so rendering reports them missing.
pub fn encode<L: ArgList + ?Sized>(buf: &mut [u8], args: &L) -> Encoded {
    debug_assert!(buf.len() >= RECORD_HEADER_BYTES);
    let budget = buf.len().saturating_sub(RECORD_HEADER_BYTES);
    let supplied = args.len();

    // Longest prefix of arguments whose minimum footprints fit.
    let mut count = 0usize;
    let mut reserved = 0usize;
    while count < supplied.min(MAX_ARGS) {
        let Some(arg) = args.arg(count) else { break };
        let floor = arg.kind().min_footprint();
        if reserved + floor > budget {
            break;
        }
        reserved += floor;
        count += 1;
    }

    let args_truncated = count < supplied;
    buf[0] = Layout::Typed as u8 | if args_truncated { TRUNCATED_ARGS_FLAG } else { 0 };
    buf[1] = count as u8;

    let mut pos = RECORD_HEADER_BYTES;
    for index in 0..count {
        let Some(arg) = args.arg(index) else { break };
        let kind = arg.kind();
        reserved -= kind.min_footprint();
        let end = buf.len() - reserved;
        pos += write_arg(&mut buf[pos..end], kind, arg.value());
    }

    Encoded { len: pos, args: count, args_truncated }
}

/// Encodes pre-rendered text as a single-argument record.
///
/// The text is streamed straight from `message` into `buf`, so nothing is
/// allocated. Output beyond the buffer is dropped at a char boundary.
pub fn encode_fmt(buf: &mut [u8], message: fmt::Arguments<'_>) -> Encoded {
    debug_assert!(buf.len() >= RECORD_HEADER_BYTES + ArgKind::Text.min_footprint());
    let end = buf.len();
    buf[0] = Layout::PreRendered as u8;
    buf[1] = 1;
    buf[RECORD_HEADER_BYTES] = ArgKind::Text as u8;

    let start = RECORD_HEADER_BYTES + 1;
    // last byte is kept for the terminator
    let mut writer = TruncatingWriter { buf: &mut buf[start..end - 1], pos: 0, closed: false };
    let _ = fmt::write(&mut writer, message);
    let written = writer.pos;

    buf[start + written] = 0;
    Encoded { len: start + written + 1, args: 1, args_truncated: false }
}

fn write_arg(out: &mut [u8], kind: ArgKind, value: ArgValue<'_>) -> usize {
    out[0] = kind as u8;
    let body = &mut out[1..];
    match (kind, value) {
        (ArgKind::Text, ArgValue::Text(text)) => {
            let text = text.split('\0').next().unwrap_or("");
            let max = body.len() - 1;
            let mut cut = text.len().min(max);
            while !text.is_char_boundary(cut) {
                cut -= 1;
            }
            body[..cut].copy_from_slice(&text.as_bytes()[..cut]);
            body[cut] = 0;
            1 + cut + 1
        }
        (ArgKind::Text, _) => {
            body[0] = 0;
            2
        }
        (kind, value) => 1 + write_fixed(body, kind, value),
    }
}

fn write_fixed(out: &mut [u8], kind: ArgKind, value: ArgValue<'_>) -> usize {
    fn put<const N: usize>(out: &mut [u8], bytes: [u8; N]) -> usize {
        out[..N].copy_from_slice(&bytes);
        N
    }

    match (kind, value) {
        (ArgKind::I8, ArgValue::Int(v)) => put(out, (v as i8).to_ne_bytes()),
        (ArgKind::I16, ArgValue::Int(v)) => put(out, (v as i16).to_ne_bytes()),
        (ArgKind::I32, ArgValue::Int(v)) => put(out, (v as i32).to_ne_bytes()),
        (ArgKind::I64, ArgValue::Int(v)) => put(out, v.to_ne_bytes()),
        (ArgKind::U8, ArgValue::UInt(v)) => put(out, (v as u8).to_ne_bytes()),
        (ArgKind::U16, ArgValue::UInt(v)) => put(out, (v as u16).to_ne_bytes()),
        (ArgKind::U32, ArgValue::UInt(v)) => put(out, (v as u32).to_ne_bytes()),
        (ArgKind::U64, ArgValue::UInt(v)) => put(out, v.to_ne_bytes()),
        (ArgKind::F32, ArgValue::Float(v)) => put(out, (v as f32).to_ne_bytes()),
        (ArgKind::F64, ArgValue::Float(v)) => put(out, v.to_ne_bytes()),
        (ArgKind::Bool, ArgValue::Bool(v)) => put(out, [v as u8]),
        (ArgKind::Char, ArgValue::Char(v)) => put(out, (v as u32).to_ne_bytes()),
        (ArgKind::Duration, ArgValue::Duration(v)) => {
            put(out, v.as_secs().to_ne_bytes());
            8 + put(&mut out[8..], v.subsec_nanos().to_ne_bytes())
        }
        // A LogArg whose kind disagrees with its value: keep the slot
        // well-formed by writing zeroes of the declared width.
        (kind, _) => {
            let width = kind.width().unwrap_or(0);
            out[..width].fill(0);
            width
        }
    }
}

struct TruncatingWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
    closed: bool,
}

impl fmt::Write for TruncatingWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        if self.closed {
            return Ok(());
        }
        let (s, hit_nul) = match s.find('\0') {
            Some(nul) => (&s[..nul], true),
            None => (s, false),
        };
        let room = self.buf.len() - self.pos;
        let mut cut = s.len().min(room);
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        self.buf[self.pos..self.pos + cut].copy_from_slice(&s.as_bytes()[..cut]);
        self.pos += cut;
        if hit_nul || cut < s.len() {
            self.closed = true;
        }
        Ok(())
    }
}

/// Walks the arguments of an encoded record.
#[derive(Debug, Clone)]
pub struct Decoder<'a> {
    bytes: &'a [u8],
    pos: usize,
    remaining: usize,
}

/// Header information of an encoded record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordInfo {
    pub layout: Layout,
    pub args: usize,
    pub args_truncated: bool,
}

/// Reads the record header and returns a decoder over its arguments.
pub fn decode(bytes: &[u8]) -> Result<(RecordInfo, Decoder<'_>), RenderError> {
    if bytes.len() < RECORD_HEADER_BYTES {
        return Err(RenderError::UnexpectedEnd { offset: bytes.len() });
    }
    let tag = bytes[0];
    let layout = Layout::from_tag(tag & !TRUNCATED_ARGS_FLAG).ok_or(RenderError::UnknownLayout(tag))?;
    let info = RecordInfo {
        layout,
        args: bytes[1] as usize,
        args_truncated: tag & TRUNCATED_ARGS_FLAG != 0,
    };
    let decoder = Decoder { bytes, pos: RECORD_HEADER_BYTES, remaining: info.args };
    Ok((info, decoder))
}

impl<'a> Decoder<'a> {
    fn next_value(&mut self) -> Result<ArgValue<'a>, RenderError> {
        let bytes = self.bytes;
        let offset = self.pos;
        let tag = *bytes.get(offset).ok_or(RenderError::UnexpectedEnd { offset })?;
        let kind = ArgKind::from_tag(tag).ok_or(RenderError::UnknownTag { tag, offset })?;
        let start = offset + 1;

        let Some(width) = kind.width() else {
            let rest = &bytes[start..];
            let len = rest.iter().position(|&b| b == 0).ok_or(RenderError::UnexpectedEnd { offset: bytes.len() })?;
            let text = std::str::from_utf8(&rest[..len]).map_err(|_| RenderError::InvalidUtf8 { offset: start })?;
            self.pos = start + len + 1;
            return Ok(ArgValue::Text(text));
        };

        let raw = bytes
            .get(start..start + width)
            .ok_or(RenderError::UnexpectedEnd { offset: bytes.len() })?;
        self.pos = start + width;

        let value = match kind {
            ArgKind::I8 => ArgValue::Int(i8::from_ne_bytes(array(raw)) as i64),
            ArgKind::I16 => ArgValue::Int(i16::from_ne_bytes(array(raw)) as i64),
            ArgKind::I32 => ArgValue::Int(i32::from_ne_bytes(array(raw)) as i64),
            ArgKind::I64 => ArgValue::Int(i64::from_ne_bytes(array(raw))),
            ArgKind::U8 => ArgValue::UInt(raw[0] as u64),
            ArgKind::U16 => ArgValue::UInt(u16::from_ne_bytes(array(raw)) as u64),
            ArgKind::U32 => ArgValue::UInt(u32::from_ne_bytes(array(raw)) as u64),
            ArgKind::U64 => ArgValue::UInt(u64::from_ne_bytes(array(raw))),
            ArgKind::F32 => ArgValue::Float(f32::from_ne_bytes(array(raw)) as f64),
            ArgKind::F64 => ArgValue::Float(f64::from_ne_bytes(array(raw))),
            ArgKind::Bool => ArgValue::Bool(raw[0] != 0),
            ArgKind::Char => char::from_u32(u32::from_ne_bytes(array(raw)))
                .map(ArgValue::Char)
                .ok_or(RenderError::InvalidValue { kind: "char", offset: start })?,
            ArgKind::Duration => {
                let secs = u64::from_ne_bytes(array(&raw[..8]));
                let nanos = u32::from_ne_bytes(array(&raw[8..]));
                if nanos >= 1_000_000_000 {
                    return Err(RenderError::InvalidValue { kind: "duration", offset: start });
                }
                ArgValue::Duration(Duration::new(secs, nanos))
            }
            ArgKind::Text => unreachable!("text handled above"),
        };
        Ok(value)
    }
}

impl<'a> Iterator for Decoder<'a> {
    type Item = Result<ArgValue<'a>, RenderError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let value = self.next_value();
        if value.is_err() {
            self.remaining = 0;
        }
        Some(value)
    }
}

fn array<const N: usize>(raw: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&raw[..N]);
    out
}

/// Renders an encoded record, appending the text to `out`.
pub fn render(template: &str, bytes: &[u8], out: &mut String) -> Result<(), RenderError> {
    let (info, args) = decode(bytes)?;
    let template = match info.layout {
        Layout::Typed => template,
        Layout::PreRendered => PRE_RENDERED_TEMPLATE,
    };
    template::render_into(template, args, out)
}

/// Renders `args` straight from the call site, without encoding them.
pub fn render_direct<L: ArgList + ?Sized>(template: &str, args: &L, out: &mut String) -> Result<(), RenderError> {
    let values = (0..args.len()).map(|index| {
        args.arg(index)
            .map(|arg| arg.value())
            .ok_or(RenderError::MissingArgument { index })
    });
    template::render_into(template, values, out)
}
