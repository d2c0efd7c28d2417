//! CBOR packet codec and length-prefixed framing.
//!
//! A packet is one CBOR map `{"type": text, "payload": bytes}`. On
//! message-oriented transports (WebSocket) one message carries one packet.
//! On byte streams each packet is framed as `[4-byte big-endian length][CBOR]`.

use crate::error::{ParleyError, ParleyResult};
use crate::packet::Packet;
use crate::transport::{FrameSink, FrameSource};

/// Default upper bound for a single frame (1 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1_048_576;

/// Encode a packet into CBOR bytes.
pub fn encode(packet: &Packet) -> ParleyResult<Vec<u8>> {
    let mut out = Vec::with_capacity(packet.payload.len() + 24);
    ciborium::into_writer(packet, &mut out)?;
    Ok(out)
}

/// Decode CBOR bytes into a packet.
///
/// Truncated or schema-violating input, or bytes left over after the
/// packet, yields `MalformedPacket`.
pub fn decode(data: &[u8]) -> ParleyResult<Packet> {
    decode_exact(data)
}

/// Decode a typed CBOR payload (e.g. [`crate::DirectMessage`]).
pub fn decode_payload<T: serde::de::DeserializeOwned>(data: &[u8]) -> ParleyResult<T> {
    decode_exact(data)
}

/// One CBOR value that must span the whole input.
fn decode_exact<T: serde::de::DeserializeOwned>(data: &[u8]) -> ParleyResult<T> {
    let mut rest = data;
    let value: T = ciborium::from_reader(&mut rest)?;
    if !rest.is_empty() {
        return Err(ParleyError::MalformedPacket(format!(
            "{} trailing bytes after value",
            rest.len()
        )));
    }
    Ok(value)
}

/// Encode a typed payload into CBOR bytes.
pub fn encode_payload<T: serde::Serialize>(value: &T) -> ParleyResult<Vec<u8>> {
    let mut out = Vec::new();
    ciborium::into_writer(value, &mut out)?;
    Ok(out)
}

/// Read one frame and decode it.
///
/// A closed transport surfaces as [`ParleyError::Disconnected`].
pub async fn read_packet<S: FrameSource + ?Sized>(source: &mut S) -> ParleyResult<Packet> {
    match source.read_frame().await? {
        Some(frame) => decode(&frame),
        None => Err(ParleyError::Disconnected),
    }
}

/// Encode a packet and write it as one frame.
pub async fn write_packet<S: FrameSink + ?Sized>(sink: &mut S, packet: &Packet) -> ParleyResult<()> {
    let frame = encode(packet)?;
    sink.write_frame(&frame).await
}

/// Prefix a payload with its 4-byte big-endian length.
pub fn length_prefix(payload: &[u8]) -> ParleyResult<Vec<u8>> {
    let len = u32::try_from(payload.len())
        .map_err(|_| ParleyError::Transport(format!("frame too large: {} bytes", payload.len())))?;
    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Streaming frame decoder: accumulates bytes and yields complete frames.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    max_frame_size: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl FrameDecoder {
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_frame_size,
        }
    }

    /// Feed raw bytes and return every complete frame body (length prefix stripped).
    ///
    /// A declared length above the limit is an error; the stream cannot be
    /// resynchronised after that.
    pub fn feed(&mut self, data: &[u8]) -> ParleyResult<Vec<Vec<u8>>> {
        self.buffer.extend_from_slice(data);
        let mut frames = Vec::new();

        loop {
            if self.buffer.len() < 4 {
                break;
            }
            let len =
                u32::from_be_bytes([self.buffer[0], self.buffer[1], self.buffer[2], self.buffer[3]])
                    as usize;

            if len > self.max_frame_size {
                return Err(ParleyError::Transport(format!(
                    "frame too large: {len} bytes (max {})",
                    self.max_frame_size
                )));
            }
            if self.buffer.len() < 4 + len {
                break;
            }

            frames.push(self.buffer[4..4 + len].to_vec());
            self.buffer.drain(..4 + len);
        }

        Ok(frames)
    }

    /// Reset internal buffer.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Number of bytes remaining in the internal buffer.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}
