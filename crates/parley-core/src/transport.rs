//! Transport-agnostic frame traits.
//!
//! The session layer only ever sees a [`FrameSource`] (inbound) and a
//! [`FrameSink`] (outbound). WebSocket adapters live next to the servers and
//! clients that own the socket type; the length-prefixed byte-stream adapter
//! lives here.

use crate::codec::{length_prefix, FrameDecoder};
use crate::error::{ParleyError, ParleyResult};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Inbound half of a connection.
pub trait FrameSource: Send {
    /// Next complete frame. `Ok(None)` once the remote has closed.
    fn read_frame(&mut self) -> BoxFuture<'_, ParleyResult<Option<Vec<u8>>>>;
}

/// Outbound half of a connection.
pub trait FrameSink: Send {
    /// Write one frame.
    fn write_frame<'a>(&'a mut self, frame: &'a [u8]) -> BoxFuture<'a, ParleyResult<()>>;

    /// Close the outbound side. Closing twice is not an error.
    fn close(&mut self) -> BoxFuture<'_, ParleyResult<()>>;
}

const READ_CHUNK: usize = 8 * 1024;

/// Length-prefixed frames over a byte stream (read side).
pub struct StreamFrameReader<R> {
    inner: R,
    decoder: FrameDecoder,
    ready: VecDeque<Vec<u8>>,
    buf: Vec<u8>,
}

impl<R> StreamFrameReader<R> {
    pub fn new(inner: R, max_frame_size: usize) -> Self {
        Self {
            inner,
            decoder: FrameDecoder::new(max_frame_size),
            ready: VecDeque::new(),
            buf: vec![0u8; READ_CHUNK],
        }
    }
}

impl<R: AsyncRead + Unpin + Send> FrameSource for StreamFrameReader<R> {
    fn read_frame(&mut self) -> BoxFuture<'_, ParleyResult<Option<Vec<u8>>>> {
        Box::pin(async move {
            loop {
                if let Some(frame) = self.ready.pop_front() {
                    return Ok(Some(frame));
                }

                let n = match self.inner.read(&mut self.buf).await {
                    Ok(n) => n,
                    Err(e) => {
                        let err = ParleyError::from(e);
                        if err.is_disconnect() {
                            return Ok(None);
                        }
                        return Err(err);
                    }
                };
                if n == 0 {
                    // A partial frame at EOF is dropped with the connection.
                    return Ok(None);
                }

                let frames = self.decoder.feed(&self.buf[..n])?;
                self.ready.extend(frames);
            }
        })
    }
}

/// Length-prefixed frames over a byte stream (write side).
pub struct StreamFrameWriter<W> {
    inner: W,
    max_frame_size: usize,
    closed: bool,
}

impl<W> StreamFrameWriter<W> {
    pub fn new(inner: W, max_frame_size: usize) -> Self {
        Self {
            inner,
            max_frame_size,
            closed: false,
        }
    }
}

impl<W: AsyncWrite + Unpin + Send> FrameSink for StreamFrameWriter<W> {
    fn write_frame<'a>(&'a mut self, frame: &'a [u8]) -> BoxFuture<'a, ParleyResult<()>> {
        Box::pin(async move {
            if self.closed {
                return Err(ParleyError::Disconnected);
            }
            if frame.len() > self.max_frame_size {
                return Err(ParleyError::Transport(format!(
                    "frame too large: {} bytes (max {})",
                    frame.len(),
                    self.max_frame_size
                )));
            }
            let bytes = length_prefix(frame)?;
            self.inner.write_all(&bytes).await?;
            self.inner.flush().await?;
            Ok(())
        })
    }

    fn close(&mut self) -> BoxFuture<'_, ParleyResult<()>> {
        Box::pin(async move {
            if !self.closed {
                self.closed = true;
                self.inner.shutdown().await?;
            }
            Ok(())
        })
    }
}

/// Split a byte stream into length-prefixed frame halves.
pub fn split_stream<S>(
    io: S,
    max_frame_size: usize,
) -> (StreamFrameReader<ReadHalf<S>>, StreamFrameWriter<WriteHalf<S>>)
where
    S: AsyncRead + AsyncWrite,
{
    let (read, write) = tokio::io::split(io);
    (
        StreamFrameReader::new(read, max_frame_size),
        StreamFrameWriter::new(write, max_frame_size),
    )
}
