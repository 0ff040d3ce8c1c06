//! Coordinator RPC layer handling TCP connections and node timeouts

use crate::registry::Registry;
use log::{debug, error, info, warn};
use shared::rpc::{read_frame, write_frame};
use shared::{GameConfig, ServerRequest, ServerResponse};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::RwLock;

/// Rendezvous server nodes register with before play starts
pub struct Server {
    listener: TcpListener,
    registry: Arc<RwLock<Registry>>,
    config: Arc<GameConfig>,
}

impl Server {
    pub async fn new(
        addr: &str,
        config: GameConfig,
        node_timeout: Duration,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(addr).await?;
        info!("Coordinator listening on {}", listener.local_addr()?);

        Ok(Server {
            listener,
            registry: Arc::new(RwLock::new(Registry::new(node_timeout))),
            config: Arc::new(config),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> Arc<RwLock<Registry>> {
        Arc::clone(&self.registry)
    }

    /// Spawns task that drops nodes whose heartbeats stopped
    fn spawn_timeout_checker(&self) {
        let registry = Arc::clone(&self.registry);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(250));

            loop {
                interval.tick().await;

                let timed_out = {
                    let mut registry_guard = registry.write().await;
                    registry_guard.check_timeouts()
                };

                if !timed_out.is_empty() {
                    debug!("Dropped {} silent nodes", timed_out.len());
                }
            }
        });
    }

    /// Serves one node connection until it closes
    async fn serve_connection<S>(
        mut stream: S,
        addr: SocketAddr,
        registry: Arc<RwLock<Registry>>,
        config: Arc<GameConfig>,
    ) where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        loop {
            let request: ServerRequest = match read_frame(&mut stream).await {
                Ok(request) => request,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    debug!("Connection from {} closed", addr);
                    return;
                }
                Err(e) => {
                    warn!("Dropping connection from {}: {}", addr, e);
                    return;
                }
            };

            let response = handle_request(&registry, &config, request).await;

            if let Err(e) = write_frame(&mut stream, &response).await {
                error!("Failed to answer {}: {}", addr, e);
                return;
            }
        }
    }

    /// Accepts node connections forever
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.spawn_timeout_checker();

        info!("Coordinator started successfully");

        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    let registry = Arc::clone(&self.registry);
                    let config = Arc::clone(&self.config);
                    tokio::spawn(Self::serve_connection(stream, addr, registry, config));
                }
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
    }
}

/// Applies one RPC to the registry
pub async fn handle_request(
    registry: &RwLock<Registry>,
    config: &GameConfig,
    request: ServerRequest,
) -> ServerResponse {
    match request {
        ServerRequest::Register { addr, public_key } => {
            let result = registry.write().await.register(addr, public_key);
            match result {
                Ok(player_id) => ServerResponse::Registered {
                    player_id,
                    config: config.clone(),
                },
                Err(e) => ServerResponse::Error(e),
            }
        }
        ServerRequest::GetNodes { public_key } => match registry.read().await.get_nodes(&public_key) {
            Ok(nodes) => ServerResponse::Nodes(nodes),
            Err(e) => ServerResponse::Error(e),
        },
        ServerRequest::Heartbeat { public_key } => match registry.write().await.heartbeat(&public_key) {
            Ok(()) => ServerResponse::HeartbeatAck,
            Err(e) => ServerResponse::Error(e),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::crypto::encode_public_key;
    use shared::RpcError;
    use tokio::net::TcpStream;
    use tokio_test::io::Builder;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:7000".parse().unwrap()
    }

    #[tokio::test]
    async fn test_register_returns_config() {
        let registry = RwLock::new(Registry::new(Duration::from_secs(5)));
        let config = GameConfig::default();

        let response = handle_request(
            &registry,
            &config,
            ServerRequest::Register {
                addr: test_addr(),
                public_key: vec![1; 32],
            },
        )
        .await;

        match response {
            ServerResponse::Registered { player_id, config: received } => {
                assert_eq!(player_id, "1");
                assert_eq!(received, config);
            }
            other => panic!("Unexpected response: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_heartbeat_for_unknown_key() {
        let registry = RwLock::new(Registry::new(Duration::from_secs(5)));
        let response = handle_request(
            &registry,
            &GameConfig::default(),
            ServerRequest::Heartbeat {
                public_key: vec![4; 32],
            },
        )
        .await;

        assert!(matches!(response, ServerResponse::Error(RpcError::UnknownKey(_))));
    }

    #[tokio::test]
    async fn test_rpc_over_tcp() {
        let server = Server::new("127.0.0.1:0", GameConfig::default(), Duration::from_secs(5))
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.run());

        let mut stream = TcpStream::connect(addr).await.unwrap();
        write_frame(
            &mut stream,
            &ServerRequest::Register {
                addr: test_addr(),
                public_key: vec![1; 32],
            },
        )
        .await
        .unwrap();
        let response: ServerResponse = read_frame(&mut stream).await.unwrap();
        assert!(matches!(response, ServerResponse::Registered { .. }));

        write_frame(
            &mut stream,
            &ServerRequest::GetNodes {
                public_key: vec![1; 32],
            },
        )
        .await
        .unwrap();
        let response: ServerResponse = read_frame(&mut stream).await.unwrap();
        assert_eq!(response, ServerResponse::Nodes(Vec::new()));
    }

    #[tokio::test]
    async fn test_serve_connection_answers_each_frame() {
        let registry = Arc::new(RwLock::new(Registry::new(Duration::from_secs(5))));
        let config = Arc::new(GameConfig::default());

        let request = ServerRequest::Heartbeat {
            public_key: vec![4; 32],
        };
        let response = ServerResponse::Error(RpcError::UnknownKey(encode_public_key(&[4; 32])));

        let mut request_frame = Vec::new();
        write_frame(&mut request_frame, &request).await.unwrap();
        let mut response_frame = Vec::new();
        write_frame(&mut response_frame, &response).await.unwrap();

        let mock = Builder::new().read(&request_frame).write(&response_frame).build();

        // Returns once the mock reports end of stream
        Server::serve_connection(mock, test_addr(), registry, config).await;
    }
}
