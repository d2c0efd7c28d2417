//! WebSocket frame transport over axum's upgraded socket.
//!
//! One binary WebSocket message carries one encoded packet. Text messages
//! are ignored; ping/pong is answered by the protocol layer.

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parley_core::transport::BoxFuture;
use parley_core::{is_connection_closed, FrameSink, FrameSource, ParleyError, ParleyResult};
use std::error::Error as StdError;
use tokio_tungstenite::tungstenite::error::{Error as WsError, ProtocolError};
use tracing::debug;

/// Inbound half of an upgraded WebSocket.
pub struct WsFrameSource {
    inner: SplitStream<WebSocket>,
    max_frame_size: usize,
}

/// Outbound half of an upgraded WebSocket.
pub struct WsFrameSink {
    inner: SplitSink<WebSocket, Message>,
    closed: bool,
}

/// Split an upgraded socket into frame halves.
pub fn split_socket(socket: WebSocket, max_frame_size: usize) -> (WsFrameSource, WsFrameSink) {
    let (sink, stream) = socket.split();
    (
        WsFrameSource {
            inner: stream,
            max_frame_size,
        },
        WsFrameSink {
            inner: sink,
            closed: false,
        },
    )
}

/// Whether `err` means the socket is gone: the I/O kinds covered by
/// [`is_connection_closed`], plus the WebSocket layer's own closed states
/// (peer vanished without a close handshake, or the socket already closed).
pub fn is_socket_closed(err: &(dyn StdError + 'static)) -> bool {
    let mut cause: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(e) = cause {
        if let Some(ws) = e.downcast_ref::<WsError>() {
            if matches!(
                ws,
                WsError::ConnectionClosed
                    | WsError::AlreadyClosed
                    | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake)
            ) {
                return true;
            }
        }
        cause = e.source();
    }
    is_connection_closed(err)
}

impl FrameSource for WsFrameSource {
    fn read_frame(&mut self) -> BoxFuture<'_, ParleyResult<Option<Vec<u8>>>> {
        Box::pin(async move {
            loop {
                match self.inner.next().await {
                    Some(Ok(Message::Binary(data))) => {
                        if data.len() > self.max_frame_size {
                            return Err(ParleyError::Transport(format!(
                                "frame too large: {} bytes (max {})",
                                data.len(),
                                self.max_frame_size
                            )));
                        }
                        return Ok(Some(data.to_vec()));
                    }
                    Some(Ok(Message::Close(_))) | None => return Ok(None),
                    Some(Ok(Message::Text(_))) => {
                        debug!("ignoring text message");
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        if is_socket_closed(&e) {
                            debug!(error = %e, "socket closed without close frame");
                            return Ok(None);
                        }
                        return Err(ParleyError::Transport(format!("recv failed: {e}")));
                    }
                }
            }
        })
    }
}

impl FrameSink for WsFrameSink {
    fn write_frame<'a>(&'a mut self, frame: &'a [u8]) -> BoxFuture<'a, ParleyResult<()>> {
        Box::pin(async move {
            if self.closed {
                return Err(ParleyError::Disconnected);
            }
            self.inner
                .send(Message::Binary(frame.to_vec().into()))
                .await
                .map_err(|e| {
                    if is_socket_closed(&e) {
                        ParleyError::Disconnected
                    } else {
                        ParleyError::Transport(format!("send failed: {e}"))
                    }
                })
        })
    }

    fn close(&mut self) -> BoxFuture<'_, ParleyResult<()>> {
        Box::pin(async move {
            if self.closed {
                return Ok(());
            }
            self.closed = true;
            // The peer may already be gone; a failed close frame is not an error.
            if let Err(e) = self.inner.close().await {
                debug!(error = %e, "close frame not sent");
            }
            Ok(())
        })
    }
}
