//! Registry of live realtime peers.
//!
//! Peers are indexed by a server-assigned [`PeerId`]. Membership changes take
//! the write lock; fan-out holds the read lock for the whole delivery so a
//! broadcast sees one consistent membership snapshot.

use crate::auth::{Capabilities, Principal};
use futures_util::future::join_all;
use parley_core::{encode, FrameSink, Packet, ParleyError, ParleyResult};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify, RwLock};
use tracing::{debug, info, warn};

/// Opaque peer identifier, unique for the lifetime of the registry.
pub type PeerId = u64;

/// One registered connection. The session task owns the inbound half; the
/// registry shares the outbound half for fan-out.
pub struct Peer {
    id: PeerId,
    principal: Principal,
    name: String,
    capabilities: Capabilities,
    connected_at: Instant,
    sink: Mutex<Box<dyn FrameSink>>,
    removed: Notify,
}

impl Peer {
    pub fn new(id: PeerId, principal: Principal, addr: SocketAddr, sink: Box<dyn FrameSink>) -> Self {
        let name = format!("{}@{}", principal.username, addr);
        let capabilities = principal.capabilities();
        Self {
            id,
            principal,
            name,
            capabilities,
            connected_at: Instant::now(),
            sink: Mutex::new(sink),
            removed: Notify::new(),
        }
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    /// Display name, `user@addr`.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn username(&self) -> &str {
        &self.principal.username
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn is_guest(&self) -> bool {
        self.principal.guest
    }

    pub fn connected_for(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Write one pre-encoded frame, bounded by `timeout`.
    pub async fn send_frame(&self, frame: &[u8], timeout: Duration) -> ParleyResult<()> {
        let mut sink = self.sink.lock().await;
        match tokio::time::timeout(timeout, sink.write_frame(frame)).await {
            Ok(result) => result,
            Err(_) => Err(ParleyError::Timeout),
        }
    }

    pub async fn send(&self, packet: &Packet, timeout: Duration) -> ParleyResult<()> {
        let frame = encode(packet)?;
        self.send_frame(&frame, timeout).await
    }

    /// Resolves once the peer has been removed from the registry, whoever
    /// removed it. A removal that happens before the first wait is not lost.
    pub async fn removed(&self) {
        self.removed.notified().await
    }

    async fn close(&self, timeout: Duration) {
        let mut sink = self.sink.lock().await;
        match tokio::time::timeout(timeout, sink.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(peer = %self.name, error = %e, "close failed"),
            Err(_) => debug!(peer = %self.name, "close timed out"),
        }
    }
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

/// Outcome of one fan-out.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: Vec<PeerId>,
}

/// Registry of live peers.
pub struct PeerRegistry {
    peers: RwLock<HashMap<PeerId, Arc<Peer>>>,
    next_id: AtomicU64,
    write_timeout: Duration,
}

impl PeerRegistry {
    pub fn new(write_timeout: Duration) -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            write_timeout,
        }
    }

    /// Allocate a fresh peer id.
    pub fn next_id(&self) -> PeerId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn write_timeout(&self) -> Duration {
        self.write_timeout
    }

    /// Register a peer. A second `add` with the same id is rejected and
    /// leaves the existing entry untouched.
    pub async fn add(&self, peer: Arc<Peer>) -> ParleyResult<()> {
        let mut peers = self.peers.write().await;
        if peers.contains_key(&peer.id) {
            return Err(ParleyError::Internal(format!(
                "peer {} already registered",
                peer.id
            )));
        }
        info!(peer = %peer.name, id = peer.id, count = peers.len() + 1, "peer registered");
        peers.insert(peer.id, peer);
        Ok(())
    }

    /// Unregister a peer, signal its session and close its transport.
    /// Returns whether it was present; removing an absent peer is a no-op.
    ///
    /// The sink is closed after the write lock is released, so a stalled
    /// peer never holds up fan-out to the others.
    pub async fn remove(&self, id: PeerId) -> bool {
        let (peer, count) = {
            let mut peers = self.peers.write().await;
            let Some(peer) = peers.remove(&id) else {
                return false;
            };
            (peer, peers.len())
        };
        info!(peer = %peer.name, id, count, "peer unregistered");
        peer.removed.notify_one();
        peer.close(self.write_timeout).await;
        true
    }

    /// Deliver `packet` to every registered peer.
    pub async fn broadcast(&self, packet: &Packet) -> ParleyResult<BroadcastReport> {
        self.fan_out(packet, |_| true).await
    }

    /// Deliver `packet` to every peer except `sender`.
    pub async fn broadcast_from(&self, sender: PeerId, packet: &Packet) -> ParleyResult<BroadcastReport> {
        self.fan_out(packet, |p| p.id != sender).await
    }

    /// Deliver `packet` to every connection of `username`.
    pub async fn send_to_user(&self, username: &str, packet: &Packet) -> ParleyResult<BroadcastReport> {
        self.fan_out(packet, |p| p.username() == username).await
    }

    pub async fn is_online(&self, username: &str) -> bool {
        self.peers
            .read()
            .await
            .values()
            .any(|p| p.username() == username)
    }

    /// Number of registered peers.
    pub async fn count(&self) -> usize {
        self.peers.read().await.len()
    }

    async fn fan_out<F>(&self, packet: &Packet, include: F) -> ParleyResult<BroadcastReport>
    where
        F: Fn(&Peer) -> bool,
    {
        let frame = encode(packet)?;
        let timeout = self.write_timeout;

        let peers = self.peers.read().await;
        let writes = peers.values().filter(|p| include(p)).map(|peer| {
            let frame = &frame;
            async move { (peer, peer.send_frame(frame, timeout).await) }
        });
        let results = join_all(writes).await;

        let mut report = BroadcastReport::default();
        for (peer, result) in results {
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(peer = %peer.name, kind = %packet.kind, error = %e, "peer write failed");
                    report.failed.push(peer.id);
                }
            }
        }
        debug!(kind = %packet.kind, delivered = report.delivered, failed = report.failed.len(), "fan-out");
        Ok(report)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use parley_core::transport::{split_stream, BoxFuture};
    use parley_core::{read_packet, FrameSource, DEFAULT_MAX_FRAME_SIZE};
    use std::net::{IpAddr, Ipv4Addr};

    pub(crate) fn addr(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
    }

    /// A registered-ready peer plus the remote end that reads what it is sent.
    pub(crate) fn pipe_peer(
        registry: &PeerRegistry,
        principal: Principal,
        port: u16,
    ) -> (Arc<Peer>, impl FrameSource) {
        let (local, remote) = tokio::io::duplex(64 * 1024);
        let (_local_rx, local_tx) = split_stream(local, DEFAULT_MAX_FRAME_SIZE);
        let (remote_rx, _remote_tx) = split_stream(remote, DEFAULT_MAX_FRAME_SIZE);
        let peer = Peer::new(registry.next_id(), principal, addr(port), Box::new(local_tx));
        (Arc::new(peer), remote_rx)
    }

    struct BrokenSink;

    impl FrameSink for BrokenSink {
        fn write_frame<'a>(&'a mut self, _frame: &'a [u8]) -> BoxFuture<'a, ParleyResult<()>> {
            Box::pin(async { Err(ParleyError::Disconnected) })
        }

        fn close(&mut self) -> BoxFuture<'_, ParleyResult<()>> {
            Box::pin(async { Ok(()) })
        }
    }

    struct StalledSink;

    impl FrameSink for StalledSink {
        fn write_frame<'a>(&'a mut self, _frame: &'a [u8]) -> BoxFuture<'a, ParleyResult<()>> {
            Box::pin(std::future::pending())
        }

        fn close(&mut self) -> BoxFuture<'_, ParleyResult<()>> {
            Box::pin(async { Ok(()) })
        }
    }

    /// Accepts writes but never finishes a close.
    struct HangingCloseSink;

    impl FrameSink for HangingCloseSink {
        fn write_frame<'a>(&'a mut self, _frame: &'a [u8]) -> BoxFuture<'a, ParleyResult<()>> {
            Box::pin(async { Ok(()) })
        }

        fn close(&mut self) -> BoxFuture<'_, ParleyResult<()>> {
            Box::pin(std::future::pending())
        }
    }

    #[tokio::test]
    async fn add_remove_count() {
        let registry = PeerRegistry::new(Duration::from_secs(1));
        let (a, _ra) = pipe_peer(&registry, Principal::user("alice"), 1);
        let (b, _rb) = pipe_peer(&registry, Principal::user("bob"), 2);

        registry.add(a.clone()).await.unwrap();
        registry.add(b.clone()).await.unwrap();
        assert_eq!(registry.count().await, 2);

        assert!(registry.add(a.clone()).await.is_err());
        assert_eq!(registry.count().await, 2);

        assert!(registry.remove(a.id()).await);
        assert!(!registry.remove(a.id()).await);
        assert_eq!(registry.count().await, 1);
        assert!(registry.is_online("bob").await);
        assert!(!registry.is_online("alice").await);
    }

    #[tokio::test]
    async fn remove_closes_transport() {
        let registry = PeerRegistry::new(Duration::from_secs(1));
        let (a, mut remote) = pipe_peer(&registry, Principal::user("alice"), 1);
        registry.add(a.clone()).await.unwrap();

        registry.remove(a.id()).await;
        assert!(matches!(
            read_packet(&mut remote).await,
            Err(ParleyError::Disconnected)
        ));
        assert!(a.send(&Packet::heartbeat(), Duration::from_secs(1)).await.is_err());
    }

    #[tokio::test]
    async fn remove_signals_the_peer() {
        let registry = PeerRegistry::new(Duration::from_secs(1));
        let (a, _ra) = pipe_peer(&registry, Principal::user("alice"), 1);
        registry.add(a.clone()).await.unwrap();

        // Removal before anyone waits must still be observed.
        registry.remove(a.id()).await;
        tokio::time::timeout(Duration::from_secs(1), a.removed())
            .await
            .expect("removal was not signalled");
    }

    #[tokio::test]
    async fn slow_close_does_not_block_fan_out() {
        let registry = Arc::new(PeerRegistry::new(Duration::from_secs(5)));
        let (a, mut ra) = pipe_peer(&registry, Principal::user("alice"), 1);
        let hanging = Arc::new(Peer::new(
            registry.next_id(),
            Principal::user("slow"),
            addr(2),
            Box::new(HangingCloseSink),
        ));
        registry.add(a).await.unwrap();
        registry.add(hanging.clone()).await.unwrap();

        let closing = {
            let registry = registry.clone();
            let id = hanging.id();
            tokio::spawn(async move { registry.remove(id).await })
        };

        let quick = Duration::from_millis(500);
        tokio::time::timeout(quick, async {
            while registry.count().await != 1 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("membership update blocked");
        let report = tokio::time::timeout(quick, registry.broadcast(&Packet::heartbeat()))
            .await
            .expect("fan-out blocked behind close")
            .unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(read_packet(&mut ra).await.unwrap(), Packet::heartbeat());
        closing.abort();
    }

    #[tokio::test]
    async fn broadcast_survives_a_failed_peer() {
        let registry = PeerRegistry::new(Duration::from_secs(1));
        let (a, mut ra) = pipe_peer(&registry, Principal::user("alice"), 1);
        let (b, mut rb) = pipe_peer(&registry, Principal::user("bob"), 2);
        let broken = Arc::new(Peer::new(
            registry.next_id(),
            Principal::user("carol"),
            addr(3),
            Box::new(BrokenSink),
        ));
        registry.add(a).await.unwrap();
        registry.add(broken.clone()).await.unwrap();
        registry.add(b).await.unwrap();

        let report = registry.broadcast(&Packet::heartbeat()).await.unwrap();
        assert_eq!(report.delivered, 2);
        assert_eq!(report.failed, vec![broken.id()]);

        assert_eq!(read_packet(&mut ra).await.unwrap(), Packet::heartbeat());
        assert_eq!(read_packet(&mut rb).await.unwrap(), Packet::heartbeat());
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_peer_is_bounded_by_write_timeout() {
        let registry = PeerRegistry::new(Duration::from_millis(200));
        let (a, mut ra) = pipe_peer(&registry, Principal::user("alice"), 1);
        let stalled = Arc::new(Peer::new(
            registry.next_id(),
            Principal::user("slow"),
            addr(2),
            Box::new(StalledSink),
        ));
        registry.add(a).await.unwrap();
        registry.add(stalled.clone()).await.unwrap();

        let report = registry.broadcast(&Packet::heartbeat()).await.unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, vec![stalled.id()]);
        assert_eq!(read_packet(&mut ra).await.unwrap(), Packet::heartbeat());
    }

    #[tokio::test]
    async fn broadcast_from_skips_sender() {
        let registry = PeerRegistry::new(Duration::from_secs(1));
        let (a, _ra) = pipe_peer(&registry, Principal::user("alice"), 1);
        let (b, mut rb) = pipe_peer(&registry, Principal::user("bob"), 2);
        registry.add(a.clone()).await.unwrap();
        registry.add(b).await.unwrap();

        let packet = Packet::text("broadcast", "hi");
        let report = registry.broadcast_from(a.id(), &packet).await.unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(read_packet(&mut rb).await.unwrap(), packet);
    }

    #[tokio::test]
    async fn send_to_user_reaches_every_connection() {
        let registry = PeerRegistry::new(Duration::from_secs(1));
        let (b1, mut rb1) = pipe_peer(&registry, Principal::user("bob"), 1);
        let (b2, mut rb2) = pipe_peer(&registry, Principal::user("bob"), 2);
        let (c, _rc) = pipe_peer(&registry, Principal::user("carol"), 3);
        for p in [b1, b2, c] {
            registry.add(p).await.unwrap();
        }

        let packet = Packet::text("message", "psst");
        let report = registry.send_to_user("bob", &packet).await.unwrap();
        assert_eq!(report.delivered, 2);
        assert_eq!(read_packet(&mut rb1).await.unwrap(), packet);
        assert_eq!(read_packet(&mut rb2).await.unwrap(), packet);

        let none = registry.send_to_user("dave", &packet).await.unwrap();
        assert_eq!(none, BroadcastReport::default());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_membership_changes_keep_count_consistent() {
        let registry = Arc::new(PeerRegistry::new(Duration::from_secs(1)));
        let mut handles = Vec::new();
        for i in 0..32u16 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                let (peer, _remote) = pipe_peer(&registry, Principal::user(format!("u{i}")), i);
                let id = peer.id();
                registry.add(peer).await.unwrap();
                registry.broadcast(&Packet::heartbeat()).await.unwrap();
                if i % 2 == 0 {
                    assert!(registry.remove(id).await);
                    assert!(!registry.remove(id).await);
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(registry.count().await, 16);
    }
}
