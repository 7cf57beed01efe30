//! Operator-side control of the server: listening, port changes, shutdown.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use crate::command::{DEFAULT_PORT, SHUTDOWN_SENTINEL, parse_port};
use crate::error::{ChatError, Result};
use crate::registry::Registry;
use crate::transport::{ConnectionHandle, serve_connection};

pub const STOPPED_ADVISORY: &str = "WARNING - Server has stopped listening for connections.";
pub const SHUTDOWN_WARNINGS: [&str; 2] = [
    "SERVER SHUTTING DOWN! DISCONNECTING!",
    "Abnormal termination of connection.",
];
pub const SERVER_PREFIX: &str = "SERVER MSG > ";

/// How long `close` waits for connections to flush their last frames.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

struct Listening {
    addr: SocketAddr,
    cancel: CancellationToken,
    accept_task: JoinHandle<()>,
}

pub struct ChatServer {
    host: String,
    port: u16,
    registry: Arc<Registry>,
    listening: Option<Listening>,
    connections: TaskTracker,
}

impl ChatServer {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            registry: Arc::new(Registry::new()),
            listening: None,
            connections: TaskTracker::new(),
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// The bound address while listening. Differs from `port` when port 0 was requested.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listening.as_ref().map(|listening| listening.addr)
    }

    pub fn is_listening(&self) -> bool {
        self.listening.is_some()
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Changes the port for the next `start`. An unparsable port falls back to
    /// the default and is still reported as an error.
    pub fn set_port(&mut self, input: &str) -> Result<u16> {
        if self.is_listening() {
            return Err(ChatError::InvalidState("Please close server first."));
        }
        match parse_port(input) {
            Ok(port) => {
                self.port = port;
                Ok(port)
            }
            Err(e) => {
                self.port = DEFAULT_PORT;
                Err(e)
            }
        }
    }

    pub async fn start(&mut self) -> Result<SocketAddr> {
        if self.is_listening() {
            return Err(ChatError::InvalidState("Server is already listening."));
        }

        let listener = TcpListener::bind((self.host.as_str(), self.port)).await?;
        let addr = listener.local_addr()?;
        let cancel = CancellationToken::new();
        let accept_task = tokio::spawn(accept_connections(
            listener,
            Arc::clone(&self.registry),
            self.connections.clone(),
            cancel.clone(),
        ));

        info!("Server listening for connections on port {}", addr.port());
        self.listening = Some(Listening { addr, cancel, accept_task });
        Ok(addr)
    }

    /// Stops accepting new connections; existing ones stay. Returns whether
    /// the server was listening.
    pub async fn stop(&mut self) -> bool {
        if !self.stop_listening().await {
            return false;
        }
        self.registry.broadcast(STOPPED_ADVISORY);
        true
    }

    /// Stops listening, tells every client to go away and drops them all.
    /// Afterwards the server can be started again.
    pub async fn close(&mut self) {
        self.stop_listening().await;

        for warning in SHUTDOWN_WARNINGS {
            self.registry.broadcast(warning);
        }
        self.registry.broadcast(SHUTDOWN_SENTINEL);
        self.registry.close_all();

        self.connections.close();
        if tokio::time::timeout(CLOSE_TIMEOUT, self.connections.wait()).await.is_err() {
            warn!("{} connections still flushing after close", self.connections.len());
        }
        self.connections.reopen();
    }

    /// Closes the server and consumes it; the caller is expected to exit.
    pub async fn quit(mut self) {
        self.close().await;
        info!("Server terminated");
    }

    /// Broadcasts an operator-authored line and returns it as sent.
    pub fn broadcast_local(&self, text: &str) -> String {
        let line = format!("{}{}", SERVER_PREFIX, text);
        self.registry.broadcast(&line);
        line
    }

    async fn stop_listening(&mut self) -> bool {
        let Some(listening) = self.listening.take() else {
            return false;
        };
        listening.cancel.cancel();
        if let Err(e) = listening.accept_task.await {
            error!("Accept loop ended abnormally: {}", e);
        }
        info!("Server has stopped listening for connections.");
        true
    }
}

async fn accept_connections(
    listener: TcpListener,
    registry: Arc<Registry>,
    connections: TaskTracker,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    info!("New client connected from: {}", addr);
                    let (handle, outbound_rx) = ConnectionHandle::new(addr);
                    registry.client_connected(handle.clone());
                    connections.spawn(serve_connection(Arc::clone(&registry), stream, handle, outbound_rx));
                }
                Err(e) => {
                    warn!("Error accepting connection: {}", e);
                }
            },
        }
    }
}
