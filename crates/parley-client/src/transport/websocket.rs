//! WebSocket transport for parley clients (tokio-tungstenite).
//!
//! One binary message per packet. The stream is split so a reader task and
//! a writer can run independently.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parley_core::transport::BoxFuture;
use parley_core::{is_connection_closed, FrameSink, FrameSource, ParleyError, ParleyResult};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Inbound half of a client connection.
pub struct WsReader {
    inner: SplitStream<Socket>,
}

/// Outbound half of a client connection.
pub struct WsWriter {
    inner: SplitSink<Socket, Message>,
    closed: bool,
}

/// Open a WebSocket to `url` and split it.
///
/// A `401`/`403` upgrade response maps to [`ParleyError::Unauthorized`] /
/// [`ParleyError::PermissionDenied`].
pub async fn connect(url: &str) -> ParleyResult<(WsReader, WsWriter)> {
    let (socket, _response) = connect_async(url).await.map_err(|e| match e {
        WsError::Http(response) if response.status() == StatusCode::UNAUTHORIZED => {
            ParleyError::Unauthorized("upgrade rejected".into())
        }
        WsError::Http(response) if response.status() == StatusCode::FORBIDDEN => {
            ParleyError::PermissionDenied("origin not allowed".into())
        }
        other => ParleyError::Transport(format!("connect failed: {other}")),
    })?;

    tracing::debug!("WebSocket connected");
    let (sink, stream) = socket.split();
    Ok((
        WsReader { inner: stream },
        WsWriter {
            inner: sink,
            closed: false,
        },
    ))
}

fn map_error(e: WsError, op: &str) -> ParleyError {
    match e {
        WsError::ConnectionClosed
        | WsError::AlreadyClosed
        | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => ParleyError::Disconnected,
        ref other if is_connection_closed(other) => ParleyError::Disconnected,
        other => ParleyError::Transport(format!("{op} failed: {other}")),
    }
}

impl FrameSource for WsReader {
    fn read_frame(&mut self) -> BoxFuture<'_, ParleyResult<Option<Vec<u8>>>> {
        Box::pin(async move {
            loop {
                match self.inner.next().await {
                    Some(Ok(Message::Binary(data))) => return Ok(Some(data.to_vec())),
                    Some(Ok(Message::Close(_))) | None => return Ok(None),
                    // Pings are answered by tungstenite itself.
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        return match map_error(e, "recv") {
                            ParleyError::Disconnected => Ok(None),
                            other => Err(other),
                        };
                    }
                }
            }
        })
    }
}

impl FrameSink for WsWriter {
    fn write_frame<'a>(&'a mut self, frame: &'a [u8]) -> BoxFuture<'a, ParleyResult<()>> {
        Box::pin(async move {
            if self.closed {
                return Err(ParleyError::Disconnected);
            }
            self.inner
                .send(Message::Binary(frame.to_vec().into()))
                .await
                .map_err(|e| map_error(e, "send"))
        })
    }

    fn close(&mut self) -> BoxFuture<'_, ParleyResult<()>> {
        Box::pin(async move {
            if self.closed {
                return Ok(());
            }
            self.closed = true;
            match self.inner.close().await {
                Ok(()) => Ok(()),
                Err(e) => match map_error(e, "close") {
                    ParleyError::Disconnected => Ok(()),
                    other => Err(other),
                },
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn closed_variants_map_to_disconnected() {
        assert!(matches!(map_error(WsError::ConnectionClosed, "recv"), ParleyError::Disconnected));
        assert!(matches!(map_error(WsError::AlreadyClosed, "send"), ParleyError::Disconnected));
        assert!(matches!(
            map_error(WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake), "recv"),
            ParleyError::Disconnected
        ));
        assert!(matches!(
            map_error(WsError::Io(io::Error::from(io::ErrorKind::ConnectionReset)), "recv"),
            ParleyError::Disconnected
        ));
    }

    #[test]
    fn other_errors_stay_transport_errors() {
        let err = map_error(WsError::Io(io::Error::from(io::ErrorKind::PermissionDenied)), "send");
        assert!(matches!(err, ParleyError::Transport(_)));
    }
}
