//! Decoder for the `application/vnd.amazon.eventstream` framing
//!
//! Each message is laid out as:
//!
//! ```text
//! total_len: u32 | headers_len: u32 | prelude_crc: u32 | headers | payload | message_crc: u32
//! ```
//!
//! Integers are big-endian. The CRC fields are skipped, not verified; TLS
//! already covers transport integrity.

use super::ProviderError;

const PRELUDE_LEN: usize = 12;
const CRC_LEN: usize = 4;
const MIN_MESSAGE_LEN: usize = PRELUDE_LEN + CRC_LEN;
const MAX_MESSAGE_LEN: usize = 16 * 1024 * 1024;

/// A typed header value
#[derive(Debug, Clone, PartialEq)]
pub enum HeaderValue {
    Bool(bool),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Bytes(Vec<u8>),
    String(String),
    Timestamp(i64),
    Uuid([u8; 16]),
}

/// One decoded frame
#[derive(Debug, Clone, PartialEq)]
pub struct EventMessage {
    pub headers: Vec<(String, HeaderValue)>,
    pub payload: Vec<u8>,
}

impl EventMessage {
    /// String header by name, e.g. `:event-type`
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.iter().find_map(|(key, value)| match value {
            HeaderValue::String(s) if key == name => Some(s.as_str()),
            _ => None,
        })
    }
}

/// Accumulates body chunks and yields complete frames
#[derive(Debug, Default)]
pub struct EventStreamDecoder {
    buffer: Vec<u8>,
}

impl EventStreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Bytes of an incomplete frame still buffered
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Pop the next complete frame, if one has fully arrived
    pub fn next_message(&mut self) -> Result<Option<EventMessage>, ProviderError> {
        if self.buffer.len() < PRELUDE_LEN {
            return Ok(None);
        }

        let total_len = read_u32(&self.buffer[0..4]) as usize;
        let headers_len = read_u32(&self.buffer[4..8]) as usize;

        if !(MIN_MESSAGE_LEN..=MAX_MESSAGE_LEN).contains(&total_len)
            || headers_len > total_len - MIN_MESSAGE_LEN
        {
            return Err(ProviderError::Stream(format!(
                "malformed event frame (total {}, headers {})",
                total_len, headers_len
            )));
        }

        if self.buffer.len() < total_len {
            return Ok(None);
        }

        let frame: Vec<u8> = self.buffer.drain(..total_len).collect();
        let headers_end = PRELUDE_LEN + headers_len;
        let headers = parse_headers(&frame[PRELUDE_LEN..headers_end])?;
        let payload = frame[headers_end..total_len - CRC_LEN].to_vec();

        Ok(Some(EventMessage { headers, payload }))
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn take<'a>(input: &mut &'a [u8], n: usize) -> Result<&'a [u8], ProviderError> {
    if input.len() < n {
        return Err(ProviderError::Stream("truncated event header".into()));
    }
    let (head, tail) = input.split_at(n);
    *input = tail;
    Ok(head)
}

fn take_array<const N: usize>(input: &mut &[u8]) -> Result<[u8; N], ProviderError> {
    let mut out = [0u8; N];
    out.copy_from_slice(take(input, N)?);
    Ok(out)
}

fn parse_headers(mut input: &[u8]) -> Result<Vec<(String, HeaderValue)>, ProviderError> {
    let mut headers = Vec::new();

    while !input.is_empty() {
        let name_len = take(&mut input, 1)?[0] as usize;
        let name = String::from_utf8_lossy(take(&mut input, name_len)?).into_owned();
        let value_type = take(&mut input, 1)?[0];

        let value = match value_type {
            0 => HeaderValue::Bool(true),
            1 => HeaderValue::Bool(false),
            2 => HeaderValue::Byte(i8::from_be_bytes(take_array(&mut input)?)),
            3 => HeaderValue::Short(i16::from_be_bytes(take_array(&mut input)?)),
            4 => HeaderValue::Int(i32::from_be_bytes(take_array(&mut input)?)),
            5 => HeaderValue::Long(i64::from_be_bytes(take_array(&mut input)?)),
            6 | 7 => {
                let len = u16::from_be_bytes(take_array(&mut input)?) as usize;
                let bytes = take(&mut input, len)?;
                if value_type == 6 {
                    HeaderValue::Bytes(bytes.to_vec())
                } else {
                    HeaderValue::String(String::from_utf8_lossy(bytes).into_owned())
                }
            }
            8 => HeaderValue::Timestamp(i64::from_be_bytes(take_array(&mut input)?)),
            9 => HeaderValue::Uuid(take_array(&mut input)?),
            other => {
                return Err(ProviderError::Stream(format!(
                    "unknown event header type {}",
                    other
                )))
            }
        };

        headers.push((name, value));
    }

    Ok(headers)
}
