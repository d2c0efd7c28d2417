//! Session handler: registration, receive loop, dispatch.

use super::SessionState;
use crate::auth::Principal;
use crate::relay::{Peer, PeerRegistry};
use parley_core::codec::{decode_payload, encode_payload};
use parley_core::{
    is_connection_closed, read_packet, DirectMessage, FrameSink, FrameSource, Packet, PacketKind,
    ParleyError, ParleyResult,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Why a receive loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The remote closed or the transport reported a closed connection.
    Disconnected,
    /// No packet arrived within the read deadline.
    Idle,
    /// Any other transport failure.
    TransportError,
    /// The peer was removed from the registry while the session was running.
    Evicted,
}

/// One registered realtime connection.
pub struct Session {
    registry: Arc<PeerRegistry>,
    peer: Arc<Peer>,
    read_timeout: Option<Duration>,
    state: SessionState,
}

impl Session {
    /// Build the peer, add it to the registry and greet it with `ready`.
    pub async fn register(
        registry: Arc<PeerRegistry>,
        principal: Principal,
        addr: SocketAddr,
        sink: Box<dyn FrameSink>,
        read_timeout: Option<Duration>,
    ) -> ParleyResult<Self> {
        let peer = Arc::new(Peer::new(registry.next_id(), principal, addr, sink));
        registry.add(peer.clone()).await?;

        let ready = Packet::text(PacketKind::Ready, peer.name());
        if let Err(e) = peer.send(&ready, registry.write_timeout()).await {
            registry.remove(peer.id()).await;
            return Err(e);
        }

        Ok(Self {
            registry,
            peer,
            read_timeout,
            state: SessionState::Registered,
        })
    }

    pub fn peer(&self) -> &Arc<Peer> {
        &self.peer
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Run the receive loop to completion, then unregister.
    ///
    /// The loop also ends when the peer is removed from the registry by
    /// someone else (heartbeat eviction); nothing is dispatched after that.
    pub async fn run<S: FrameSource>(mut self, mut source: S) -> SessionEnd {
        info!(peer = %self.peer.name(), guest = self.peer.is_guest(), "session started");

        let read_timeout = self.read_timeout;
        let end = loop {
            let read = async {
                match read_timeout {
                    Some(limit) => tokio::time::timeout(limit, read_packet(&mut source)).await.ok(),
                    None => Some(read_packet(&mut source).await),
                }
            };
            let next = tokio::select! {
                biased;
                _ = self.peer.removed() => {
                    info!(peer = %self.peer.name(), "peer evicted");
                    break SessionEnd::Evicted;
                }
                next = read => next,
            };
            let Some(next) = next else {
                info!(peer = %self.peer.name(), "idle deadline reached");
                break SessionEnd::Idle;
            };

            match next {
                Ok(packet) => self.dispatch(packet).await,
                Err(ParleyError::MalformedPacket(reason)) => {
                    warn!(peer = %self.peer.name(), %reason, "dropping malformed packet");
                }
                Err(e) if e.is_disconnect() || is_connection_closed(&e) => {
                    break SessionEnd::Disconnected;
                }
                Err(e) => {
                    warn!(peer = %self.peer.name(), error = %e, "transport error");
                    break SessionEnd::TransportError;
                }
            }
        };

        self.registry.remove(self.peer.id()).await;
        self.state = SessionState::Closed;
        info!(
            peer = %self.peer.name(),
            reason = ?end,
            duration_secs = self.peer.connected_for().as_secs(),
            "session closed"
        );
        end
    }

    async fn dispatch(&self, packet: Packet) {
        debug!(peer = %self.peer.name(), %packet, "received");
        let result = match &packet.kind {
            PacketKind::Broadcast => self.on_broadcast(&packet).await,
            PacketKind::Message => self.on_direct_message(&packet).await,
            PacketKind::HeartbeatAck => {
                debug!(peer = %self.peer.name(), "heartbeat acknowledged");
                Ok(())
            }
            other => {
                debug!(peer = %self.peer.name(), kind = %other, "ignoring packet");
                Ok(())
            }
        };

        match result {
            Ok(()) => {}
            Err(ParleyError::MalformedPacket(reason)) => {
                warn!(peer = %self.peer.name(), kind = %packet.kind, %reason, "dropping malformed payload");
            }
            Err(e) => {
                warn!(peer = %self.peer.name(), kind = %packet.kind, error = %e, "dispatch failed");
            }
        }
    }

    async fn on_broadcast(&self, packet: &Packet) -> ParleyResult<()> {
        if !self.peer.capabilities().can_broadcast {
            return self.reply(&Packet::error("broadcast not permitted")).await;
        }
        let text = packet
            .payload_text()
            .ok_or_else(|| ParleyError::MalformedPacket("broadcast payload is not UTF-8".into()))?;

        let relayed = Packet::text(PacketKind::Broadcast, &format!("{}: {}", self.peer.name(), text));
        self.registry.broadcast_from(self.peer.id(), &relayed).await?;
        self.reply(&Packet::ack()).await
    }

    async fn on_direct_message(&self, packet: &Packet) -> ParleyResult<()> {
        if !self.peer.capabilities().can_direct_message {
            return self.reply(&Packet::error("direct messages not permitted")).await;
        }
        let mut message: DirectMessage = decode_payload(&packet.payload)?;
        message.from = Some(self.peer.name().to_string());

        let outgoing = Packet::new(PacketKind::Message, encode_payload(&message)?);
        let report = self.registry.send_to_user(&message.to, &outgoing).await?;
        if report.delivered == 0 {
            return self
                .reply(&Packet::error(&format!("user {} is not connected", message.to)))
                .await;
        }
        self.reply(&Packet::ack()).await
    }

    async fn reply(&self, packet: &Packet) -> ParleyResult<()> {
        self.peer.send(packet, self.registry.write_timeout()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::registry::tests::addr;
    use crate::relay::PeerId;
    use parley_core::transport::{split_stream, StreamFrameReader, StreamFrameWriter};
    use parley_core::{write_packet, DEFAULT_MAX_FRAME_SIZE};
    use tokio::io::{DuplexStream, ReadHalf, WriteHalf};
    use tokio::task::JoinHandle;

    type ClientRx = StreamFrameReader<ReadHalf<DuplexStream>>;
    type ClientTx = StreamFrameWriter<WriteHalf<DuplexStream>>;

    struct TestClient {
        id: PeerId,
        rx: ClientRx,
        tx: ClientTx,
        name: String,
        task: JoinHandle<SessionEnd>,
    }

    async fn connect(
        registry: &Arc<PeerRegistry>,
        principal: Principal,
        port: u16,
        read_timeout: Option<Duration>,
    ) -> TestClient {
        let (server_io, client_io) = tokio::io::duplex(64 * 1024);
        let (server_rx, server_tx) = split_stream(server_io, DEFAULT_MAX_FRAME_SIZE);
        let (mut rx, tx) = split_stream(client_io, DEFAULT_MAX_FRAME_SIZE);

        let session = Session::register(
            registry.clone(),
            principal,
            addr(port),
            Box::new(server_tx),
            read_timeout,
        )
        .await
        .unwrap();
        assert_eq!(session.state(), SessionState::Registered);
        let id = session.peer().id();
        let task = tokio::spawn(session.run(server_rx));

        let ready = read_packet(&mut rx).await.unwrap();
        assert_eq!(ready.kind, PacketKind::Ready);
        let name = ready.payload_text().unwrap().to_string();
        TestClient {
            id,
            rx,
            tx,
            name,
            task,
        }
    }

    async fn nothing_arrives(rx: &mut ClientRx) -> bool {
        tokio::time::timeout(Duration::from_millis(100), read_packet(rx))
            .await
            .is_err()
    }

    fn registry() -> Arc<PeerRegistry> {
        Arc::new(PeerRegistry::new(Duration::from_secs(1)))
    }

    #[tokio::test]
    async fn broadcast_is_relayed_with_sender_name() {
        let registry = registry();
        let mut alice = connect(&registry, Principal::user("alice"), 1, None).await;
        let mut bob = connect(&registry, Principal::user("bob"), 2, None).await;
        assert_eq!(alice.name, "alice@127.0.0.1:1");

        write_packet(&mut alice.tx, &Packet::text(PacketKind::Broadcast, "hello"))
            .await
            .unwrap();

        let relayed = read_packet(&mut bob.rx).await.unwrap();
        assert_eq!(relayed.kind, PacketKind::Broadcast);
        assert_eq!(relayed.payload_text(), Some("alice@127.0.0.1:1: hello"));

        assert_eq!(read_packet(&mut alice.rx).await.unwrap(), Packet::ack());
        assert!(nothing_arrives(&mut alice.rx).await);
    }

    #[tokio::test]
    async fn unknown_kind_is_ignored() {
        let registry = registry();
        let mut alice = connect(&registry, Principal::user("alice"), 1, None).await;
        let mut bob = connect(&registry, Principal::user("bob"), 2, None).await;

        write_packet(&mut alice.tx, &Packet::text("shout", "???")).await.unwrap();
        assert!(nothing_arrives(&mut bob.rx).await);
        assert!(nothing_arrives(&mut alice.rx).await);

        write_packet(&mut alice.tx, &Packet::text(PacketKind::Broadcast, "still here"))
            .await
            .unwrap();
        let relayed = read_packet(&mut bob.rx).await.unwrap();
        assert_eq!(relayed.payload_text(), Some("alice@127.0.0.1:1: still here"));
        assert_eq!(registry.count().await, 2);
    }

    #[tokio::test]
    async fn malformed_frame_does_not_end_session() {
        let registry = registry();
        let mut alice = connect(&registry, Principal::user("alice"), 1, None).await;
        let mut bob = connect(&registry, Principal::user("bob"), 2, None).await;

        alice.tx.write_frame(&[0xff, 0x00, 0x13]).await.unwrap();
        write_packet(&mut alice.tx, &Packet::new(PacketKind::Broadcast, vec![0xc3, 0x28]))
            .await
            .unwrap();
        assert!(nothing_arrives(&mut bob.rx).await);

        write_packet(&mut alice.tx, &Packet::text(PacketKind::Broadcast, "ok"))
            .await
            .unwrap();
        assert_eq!(
            read_packet(&mut bob.rx).await.unwrap().payload_text(),
            Some("alice@127.0.0.1:1: ok")
        );
    }

    #[tokio::test]
    async fn closing_one_peer_leaves_the_other() {
        let registry = registry();
        let alice = connect(&registry, Principal::user("alice"), 1, None).await;
        let mut bob = connect(&registry, Principal::user("bob"), 2, None).await;
        assert_eq!(registry.count().await, 2);

        let TestClient { rx, tx, task, .. } = alice;
        drop(rx);
        drop(tx);
        assert_eq!(task.await.unwrap(), SessionEnd::Disconnected);
        assert_eq!(registry.count().await, 1);

        let report = registry.broadcast(&Packet::heartbeat()).await.unwrap();
        assert_eq!(report.delivered, 1);
        assert!(report.failed.is_empty());
        assert_eq!(read_packet(&mut bob.rx).await.unwrap(), Packet::heartbeat());
    }

    #[tokio::test]
    async fn evicted_session_stops_relaying() {
        let registry = registry();
        let mut alice = connect(&registry, Principal::user("alice"), 1, None).await;
        let mut bob = connect(&registry, Principal::user("bob"), 2, None).await;

        assert!(registry.remove(alice.id).await);
        let end = tokio::time::timeout(Duration::from_secs(2), &mut alice.task)
            .await
            .expect("evicted session kept running")
            .unwrap();
        assert_eq!(end, SessionEnd::Evicted);

        // The server side is gone; whatever the client still sends is not relayed.
        let _ = write_packet(&mut alice.tx, &Packet::text(PacketKind::Broadcast, "ghost")).await;
        assert!(nothing_arrives(&mut bob.rx).await);
        assert_eq!(registry.count().await, 1);
    }

    #[tokio::test]
    async fn direct_message_reaches_recipient() {
        let registry = registry();
        let mut alice = connect(&registry, Principal::user("alice"), 1, None).await;
        let mut bob = connect(&registry, Principal::user("bob"), 2, None).await;

        let dm = DirectMessage {
            from: None,
            to: "bob".into(),
            body: "psst".into(),
        };
        let packet = Packet::new(PacketKind::Message, encode_payload(&dm).unwrap());
        write_packet(&mut alice.tx, &packet).await.unwrap();

        let received = read_packet(&mut bob.rx).await.unwrap();
        assert_eq!(received.kind, PacketKind::Message);
        let received: DirectMessage = decode_payload(&received.payload).unwrap();
        assert_eq!(received.from.as_deref(), Some("alice@127.0.0.1:1"));
        assert_eq!(received.body, "psst");
        assert_eq!(read_packet(&mut alice.rx).await.unwrap(), Packet::ack());
    }

    #[tokio::test]
    async fn direct_message_to_absent_user_is_an_error() {
        let registry = registry();
        let mut alice = connect(&registry, Principal::user("alice"), 1, None).await;

        let dm = DirectMessage {
            from: None,
            to: "nobody".into(),
            body: "hello?".into(),
        };
        let packet = Packet::new(PacketKind::Message, encode_payload(&dm).unwrap());
        write_packet(&mut alice.tx, &packet).await.unwrap();

        let reply = read_packet(&mut alice.rx).await.unwrap();
        assert_eq!(reply.kind, PacketKind::Error);
        assert_eq!(reply.payload_text(), Some("user nobody is not connected"));
    }

    #[tokio::test]
    async fn guest_cannot_direct_message() {
        let registry = registry();
        let mut guest = connect(&registry, Principal::guest(), 1, None).await;
        let mut bob = connect(&registry, Principal::user("bob"), 2, None).await;

        let dm = DirectMessage {
            from: None,
            to: "bob".into(),
            body: "hi".into(),
        };
        let packet = Packet::new(PacketKind::Message, encode_payload(&dm).unwrap());
        write_packet(&mut guest.tx, &packet).await.unwrap();

        let reply = read_packet(&mut guest.rx).await.unwrap();
        assert_eq!(reply, Packet::error("direct messages not permitted"));
        assert!(nothing_arrives(&mut bob.rx).await);

        write_packet(&mut guest.tx, &Packet::text(PacketKind::Broadcast, "hi all"))
            .await
            .unwrap();
        let relayed = read_packet(&mut bob.rx).await.unwrap();
        assert!(relayed.payload_text().unwrap().ends_with(": hi all"));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_session_is_closed() {
        let registry = registry();
        let client = connect(&registry, Principal::user("alice"), 1, Some(Duration::from_secs(30))).await;
        assert_eq!(registry.count().await, 1);

        assert_eq!(client.task.await.unwrap(), SessionEnd::Idle);
        assert_eq!(registry.count().await, 0);
    }
}
