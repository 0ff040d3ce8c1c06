//! Registration, heartbeats and peer discovery through the coordinator
//!
//! The coordinator is only needed to find peers; once play starts, nodes talk
//! to each other directly. Losing the coordinator is never fatal after the
//! first successful registration: heartbeat failures re-register and roster
//! refreshes simply retry on the next tick.

use crate::peers::{PeerRecord, SharedPeerTable};
use crate::transport::Transport;
use log::{debug, error, info, warn};
use shared::rpc::{read_frame, write_frame};
use shared::{
    Crypto, GameConfig, MembershipError, Packet, PeerInfo, PlayerId, ServerRequest, ServerResponse,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tokio::time::timeout;

/// Request/response channel to the coordination server.
pub trait Coordinator: Send + Sync + 'static {
    fn call(&self, request: ServerRequest) -> impl Future<Output = Result<ServerResponse, MembershipError>> + Send;

    /// Drops any cached connection so the next call starts fresh.
    fn reset(&self) -> impl Future<Output = ()> + Send;
}

/// Coordinator reached over one long-lived TCP connection
pub struct TcpCoordinator {
    server_addr: String,
    call_timeout: Duration,
    stream: Mutex<Option<TcpStream>>,
}

impl TcpCoordinator {
    pub fn new(server_addr: impl Into<String>, call_timeout: Duration) -> Self {
        Self {
            server_addr: server_addr.into(),
            call_timeout,
            stream: Mutex::new(None),
        }
    }

    async fn exchange(stream: &mut TcpStream, request: &ServerRequest) -> std::io::Result<ServerResponse> {
        write_frame(stream, request).await?;
        read_frame(stream).await
    }
}

impl Coordinator for TcpCoordinator {
    async fn call(&self, request: ServerRequest) -> Result<ServerResponse, MembershipError> {
        let mut cached = self.stream.lock().await;

        let mut stream = match cached.take() {
            Some(stream) => stream,
            None => match timeout(self.call_timeout, TcpStream::connect(&self.server_addr)).await {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => return Err(MembershipError::Disconnected(e.to_string())),
                Err(_) => return Err(MembershipError::Disconnected("connect timed out".to_string())),
            },
        };

        match timeout(self.call_timeout, Self::exchange(&mut stream, &request)).await {
            Ok(Ok(response)) => {
                *cached = Some(stream);
                Ok(response)
            }
            Ok(Err(e)) => Err(MembershipError::Disconnected(e.to_string())),
            Err(_) => Err(MembershipError::Disconnected("call timed out".to_string())),
        }
    }

    async fn reset(&self) {
        self.stream.lock().await.take();
    }
}

/// Identity and settings granted at registration
#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    pub player_id: PlayerId,
    pub config: GameConfig,
}

pub struct MembershipClient<C> {
    coordinator: C,
    crypto: Arc<dyn Crypto>,
    transport: Transport,
    peers: SharedPeerTable,
    registration: Mutex<Option<Registration>>,
}

impl<C: Coordinator> MembershipClient<C> {
    pub fn new(coordinator: C, crypto: Arc<dyn Crypto>, transport: Transport, peers: SharedPeerTable) -> Self {
        Self {
            coordinator,
            crypto,
            transport,
            peers,
            registration: Mutex::new(None),
        }
    }

    pub fn coordinator(&self) -> &C {
        &self.coordinator
    }

    async fn request_registration(&self) -> Result<Registration, MembershipError> {
        let request = ServerRequest::Register {
            addr: self.transport.local_addr(),
            public_key: self.crypto.public_key(),
        };

        match self.coordinator.call(request).await? {
            ServerResponse::Registered { player_id, config } => Ok(Registration { player_id, config }),
            ServerResponse::Error(e) => Err(e.into()),
            other => Err(unexpected(&other)),
        }
    }

    /// Registers with the coordinator once; later calls return the cached result.
    pub async fn register(&self) -> Result<Registration, MembershipError> {
        let mut cached = self.registration.lock().await;
        if let Some(registration) = cached.as_ref() {
            return Ok(registration.clone());
        }

        let registration = self.request_registration().await?;
        info!(
            "Registered as player {} ({})",
            registration.player_id,
            self.crypto.encode_public_key()
        );
        *cached = Some(registration.clone());
        Ok(registration)
    }

    /// Treats the coordinator connection as stale and registers again.
    pub async fn reregister(&self) -> Result<Registration, MembershipError> {
        self.coordinator.reset().await;
        let mut cached = self.registration.lock().await;

        match self.request_registration().await {
            Ok(registration) => {
                if let Some(previous) = cached.as_ref() {
                    if previous.player_id != registration.player_id {
                        warn!(
                            "Coordinator reassigned id {} -> {}",
                            previous.player_id, registration.player_id
                        );
                    }
                }
                info!("Re-registered as player {}", registration.player_id);
                *cached = Some(registration.clone());
                Ok(registration)
            }
            // The coordinator still holds our identity
            Err(MembershipError::KeyAlreadyRegistered(key)) => match cached.as_ref() {
                Some(registration) => {
                    debug!("Registration still live on the coordinator");
                    Ok(registration.clone())
                }
                None => Err(MembershipError::KeyAlreadyRegistered(key)),
            },
            Err(e) => Err(e),
        }
    }

    pub async fn registration(&self) -> Option<Registration> {
        self.registration.lock().await.clone()
    }

    pub async fn heartbeat(&self) -> Result<(), MembershipError> {
        let request = ServerRequest::Heartbeat {
            public_key: self.crypto.public_key(),
        };

        match self.coordinator.call(request).await? {
            ServerResponse::HeartbeatAck => Ok(()),
            ServerResponse::Error(e) => Err(e.into()),
            other => Err(unexpected(&other)),
        }
    }

    async fn roster(&self) -> Result<Vec<PeerInfo>, MembershipError> {
        let request = ServerRequest::GetNodes {
            public_key: self.crypto.public_key(),
        };

        match self.coordinator.call(request).await? {
            ServerResponse::Nodes(nodes) => Ok(nodes),
            ServerResponse::Error(e) => Err(e.into()),
            other => Err(unexpected(&other)),
        }
    }

    /// Pulls the roster, reconciles the peer table and floods newly learned peers.
    pub async fn fetch_peers(&self) -> Result<Vec<PeerRecord>, MembershipError> {
        let registration = self.register().await?;

        let roster = match self.roster().await {
            Err(MembershipError::UnknownKey(key)) => {
                warn!("Coordinator forgot key {}, re-registering", key);
                self.reregister().await?;
                self.roster().await?
            }
            result => result?,
        };

        let (learned, unconnected) = {
            let mut peers = self.peers.write().await;
            let learned = peers.reconcile_roster(&registration.player_id, roster);
            let unconnected: Vec<PeerRecord> = peers.records().into_iter().filter(|p| !p.connected).collect();
            (learned, unconnected)
        };

        if !unconnected.is_empty() {
            let discovery = Packet::Discovery {
                return_addr: self.transport.local_addr(),
                player_id: registration.player_id.clone(),
                public_key: self.crypto.public_key(),
            };
            self.transport.flood_discovery(&unconnected, &discovery).await;
        }

        if !learned.is_empty() {
            info!("Learned {} new peers", learned.len());
        }
        Ok(learned)
    }

    /// Sends heartbeats forever, re-registering whenever one fails.
    pub async fn run_heartbeat(&self, period: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(period);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.heartbeat().await {
                        warn!("Heartbeat failed: {}", e);
                        self.recover().await;
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    }

    async fn recover(&self) {
        match self.reregister().await {
            Ok(_) => {
                if let Err(e) = self.fetch_peers().await {
                    warn!("Peer refresh after re-registration failed: {}", e);
                }
            }
            Err(e) if e.is_identity_error() => error!("Re-registration rejected: {}", e),
            Err(e) => warn!("Re-registration failed: {}", e),
        }
    }

    /// Refreshes the roster on a timer.
    pub async fn run_peer_refresh(&self, period: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(period);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.fetch_peers().await {
                        warn!("Peer refresh failed: {}", e);
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    }
}

fn unexpected(response: &ServerResponse) -> MembershipError {
    MembershipError::Disconnected(format!("unexpected coordinator response {:?}", response))
}
