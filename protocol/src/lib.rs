use tokio_util::codec::{Decoder, Encoder};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::str;

use thiserror::Error;

// encode and decode bypasses traditional libraries
// like serde or message pack

// every field is a big endian u32 length followed by utf8 bytes
const LEN_PREFIX: usize = 4;
const FIELD_COUNT: usize = 4;

pub const DEFAULT_MAX_FIELD_LEN: usize = 64 * 1024;

pub const JOINED_TEXT: &str = "joined";
pub const LEFT_TEXT: &str = "left";

const FIELD_NAMES: [&str; FIELD_COUNT] = ["sender_id", "display_name", "text", "photo_reference"];

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("field {field} declares {len} bytes, max is {max}")]
    FieldTooLarge { field: &'static str, len: usize, max: usize },
    #[error("field {field} is not valid utf8")]
    InvalidUtf8 { field: &'static str },
    #[error("field {field} is {len} bytes, too long to encode")]
    Unencodable { field: &'static str, len: usize },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    // anything but a transport error means the peer sent garbage
    pub fn is_malformed(&self) -> bool {
        !matches!(self, ProtocolError::Io(_))
    }
}

/// One chat message as carried on the wire.
///
/// Fields are private so a message can't change after it is built; the
/// only way to get one off the wire is a complete, validated frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    sender_id: String,
    display_name: String,
    text: String,
    photo_reference: Option<String>,
}

impl ChatMessage {
    pub fn new(sender_id: impl Into<String>, display_name: impl Into<String>,
               text: impl Into<String>, photo_reference: Option<String>) -> Self {
        Self {
            sender_id: sender_id.into(),
            display_name: display_name.into(),
            text: text.into(),
            // an empty reference is indistinguishable from none on the wire
            photo_reference: photo_reference.filter(|p| !p.is_empty()),
        }
    }

    // presence events are ordinary messages with a well known text
    pub fn joined(sender_id: impl Into<String>, display_name: impl Into<String>,
                  photo_reference: Option<String>) -> Self {
        Self::new(sender_id, display_name, JOINED_TEXT, photo_reference)
    }

    pub fn left(sender_id: impl Into<String>, display_name: impl Into<String>,
                photo_reference: Option<String>) -> Self {
        Self::new(sender_id, display_name, LEFT_TEXT, photo_reference)
    }

    pub fn sender_id(&self) -> &str {
        &self.sender_id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn photo_reference(&self) -> Option<&str> {
        self.photo_reference.as_deref()
    }

    pub fn is_presence(&self) -> bool {
        self.text == JOINED_TEXT || self.text == LEFT_TEXT
    }

    fn fields(&self) -> [&[u8]; FIELD_COUNT] {
        [
            self.sender_id.as_bytes(),
            self.display_name.as_bytes(),
            self.text.as_bytes(),
            self.photo_reference.as_deref().unwrap_or_default().as_bytes(),
        ]
    }

    /// Number of bytes `encode` produces for this message.
    pub fn encoded_len(&self) -> usize {
        self.fields().iter().map(|f| LEN_PREFIX + f.len()).sum()
    }
}

/// Outcome of looking at a buffer that may or may not hold a whole frame.
#[derive(Debug, PartialEq, Eq)]
pub enum Decoded {
    Frame(ChatMessage, usize), // message and bytes consumed
    NeedMoreData,
}

/// Encode a message into a standalone frame, e.g. to share one buffer
/// across many recipients.
pub fn encode(msg: &ChatMessage) -> Result<Bytes, ProtocolError> {
    let mut dst = BytesMut::with_capacity(msg.encoded_len());
    encode_into(msg, &mut dst)?;
    Ok(dst.freeze())
}

fn encode_into(msg: &ChatMessage, dst: &mut BytesMut) -> Result<(), ProtocolError> {
    let fields = msg.fields();

    // validate first so a failed encode never leaves half a frame in dst
    for (&field, bytes) in FIELD_NAMES.iter().zip(fields.iter()) {
        if u32::try_from(bytes.len()).is_err() {
            return Err(ProtocolError::Unencodable { field, len: bytes.len() });
        }
    }

    dst.reserve(msg.encoded_len());
    for bytes in fields {
        encode_vec(bytes, dst);
    }
    Ok(())
}

/// Try to decode one frame from the front of `src`.
///
/// Pure function of the buffered bytes: it never blocks and never consumes
/// anything; on `Decoded::Frame` the caller advances by the returned count.
/// Field contents are only looked at once the whole frame is buffered, so a
/// frame arriving in small pieces costs a walk over four length prefixes per
/// attempt.
pub fn decode_frame(src: &[u8], max_field_len: usize) -> Result<Decoded, ProtocolError> {
    let Some(total) = frame_len(src, max_field_len)? else {
        return Ok(Decoded::NeedMoreData)
    };

    let mut cursor = &src[..total];
    let sender_id = decode_vec(&mut cursor, FIELD_NAMES[0])?;
    let display_name = decode_vec(&mut cursor, FIELD_NAMES[1])?;
    let text = decode_vec(&mut cursor, FIELD_NAMES[2])?;
    let photo = decode_vec(&mut cursor, FIELD_NAMES[3])?;

    let photo_reference = if photo.is_empty() { None } else { Some(photo) };
    let msg = ChatMessage::new(sender_id, display_name, text, photo_reference);
    Ok(Decoded::Frame(msg, total))
}

// walk the length prefixes only, None until every byte of the frame is here
fn frame_len(src: &[u8], max: usize) -> Result<Option<usize>, ProtocolError> {
    let mut offset = 0;

    for field in FIELD_NAMES {
        let Some(prefix) = src.get(offset..offset + LEN_PREFIX) else {
            return Ok(None)
        };
        let len = u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
        if len > max {
            return Err(ProtocolError::FieldTooLarge { field, len, max })
        }
        offset += LEN_PREFIX + len;
    }

    Ok((src.len() >= offset).then_some(offset))
}

// read one length prefixed utf8 field, frame_len has already bounds checked it
fn decode_vec(src: &mut &[u8], field: &'static str) -> Result<String, ProtocolError> {
    let len = src.get_u32() as usize;
    let value = str::from_utf8(&src[..len])
        .map_err(|_| ProtocolError::InvalidUtf8 { field })?
        .to_owned();
    src.advance(len);
    Ok(value)
}

// write field bytes into BytesMut, caller has checked the length fits a u32
fn encode_vec(bytes: &[u8], dst: &mut BytesMut) {
    dst.put_u32(bytes.len() as u32);
    dst.extend_from_slice(bytes);
}

/// Frames `ChatMessage`s on a byte stream for `FramedRead` / `FramedWrite`.
#[derive(Debug, Clone, Copy)]
pub struct ChatCodec {
    max_field_len: usize,
}

impl ChatCodec {
    pub fn new(max_field_len: usize) -> Self {
        Self { max_field_len }
    }
}

impl Default for ChatCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FIELD_LEN)
    }
}

// convert bytes to ChatMessage
impl Decoder for ChatCodec {
    type Item = ChatMessage;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match decode_frame(src, self.max_field_len)? {
            Decoded::Frame(msg, consumed) => {
                src.advance(consumed);
                Ok(Some(msg))
            },
            Decoded::NeedMoreData => {
                // partial frame, make room for at least the next length prefix
                src.reserve(LEN_PREFIX);
                Ok(None)
            },
        }
    }
}

impl Encoder<ChatMessage> for ChatCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: ChatMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_into(&item, dst)
    }
}

impl Encoder<&ChatMessage> for ChatCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: &ChatMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_into(item, dst)
    }
}

// already encoded frames, used by fan-out to encode once per message
impl Encoder<Bytes> for ChatCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.extend_from_slice(&item);
        Ok(())
    }
}
