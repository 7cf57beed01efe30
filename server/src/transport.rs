//! Per-connection plumbing between a TCP stream and the session registry.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{ChatError, Result};
use crate::messages::{Message, write_message};
use crate::registry::Registry;

pub type ConnectionId = Uuid;

/// Frames a connection may have queued. A recipient that falls this far
/// behind is dropped like a failed send, so one slow reader never stalls a
/// broadcast.
const OUTBOUND_CAPACITY: usize = 100;

/// Upper bound on flushing already-queued frames once a connection is closed.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// The registry's view of one live connection: where to queue outbound text
/// and how to ask the connection to close itself.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    addr: SocketAddr,
    outbound: Sender<Message>,
    closed: CancellationToken,
}

impl ConnectionHandle {
    pub fn new(addr: SocketAddr) -> (Self, Receiver<Message>) {
        let (outbound, receiver) = mpsc::channel(OUTBOUND_CAPACITY);
        let handle = Self {
            id: Uuid::new_v4(),
            addr,
            outbound,
            closed: CancellationToken::new(),
        };
        (handle, receiver)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Queues `text` without waiting. A full or closed queue is a failed send.
    pub fn send(&self, text: &str) -> Result<()> {
        if self.closed.is_cancelled() {
            return Err(ChatError::disconnected());
        }
        self.outbound
            .try_send(Message::new(text))
            .map_err(|_| ChatError::disconnected())
    }

    /// Asks the connection to flush what is queued and shut down.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }
}

/// Drives one accepted connection until either side closes it, reporting
/// lifecycle events to the registry. The caller has already registered
/// `handle`, so a close issued before this task first runs still reaches it.
pub async fn serve_connection(
    registry: Arc<Registry>,
    stream: TcpStream,
    handle: ConnectionHandle,
    outbound_rx: Receiver<Message>,
) {
    let id = handle.id();
    let addr = handle.addr();
    let closed = handle.closed_token();

    let (client_rx, client_tx) = stream.into_split();

    let outgoing_task = spawn_message_routing(client_tx, outbound_rx, closed.clone());

    let result = tokio::select! {
        result = read_messages(&registry, id, client_rx) => result,
        _ = closed.cancelled() => Ok(()),
    };

    match result {
        Ok(()) => registry.client_disconnected(id),
        Err(e) => registry.client_exception(id, &e),
    }

    closed.cancel();
    if let Err(e) = outgoing_task.await {
        warn!("Outgoing task for {} ended abnormally: {}", addr, e);
    }
    info!("Connection {} from {} finished", id, addr);
}

async fn read_messages(registry: &Registry, id: ConnectionId, client_rx: OwnedReadHalf) -> Result<()> {
    let mut lines = BufReader::new(client_rx).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let message = Message::decode(&line)?;
        if let Err(e) = registry.message_received(id, &message.content) {
            debug!("Message from {} not relayed: {}", id, e);
        }
    }

    Ok(())
}

fn spawn_message_routing(
    mut client_tx: OwnedWriteHalf,
    mut outbound_rx: Receiver<Message>,
    closed: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                message = outbound_rx.recv() => match message {
                    Some(message) => {
                        if let Err(e) = write_message(&mut client_tx, &message).await {
                            debug!("Dropping connection writer: {}", e);
                            closed.cancel();
                            return;
                        }
                    }
                    None => break,
                },
                _ = closed.cancelled() => break,
            }
        }

        // Whatever was queued before the close still goes out, within bounds.
        outbound_rx.close();
        let drain = async {
            while let Some(message) = outbound_rx.recv().await {
                write_message(&mut client_tx, &message).await?;
            }
            client_tx.shutdown().await?;
            Ok::<_, ChatError>(())
        };
        match tokio::time::timeout(CLOSE_GRACE, drain).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("Error while flushing closed connection: {}", e),
            Err(_) => debug!("Gave up flushing closed connection"),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:4000".parse().unwrap()
    }

    #[test]
    fn test_send_queues_message() {
        let (handle, mut rx) = ConnectionHandle::new(addr());

        handle.send("hello").unwrap();

        assert_eq!(rx.try_recv().unwrap().content, "hello");
    }

    #[test]
    fn test_send_after_close_fails() {
        let (handle, _rx) = ConnectionHandle::new(addr());

        handle.close();

        assert!(handle.is_closed());
        assert!(handle.send("late").is_err());
    }

    #[test]
    fn test_send_to_dropped_receiver_fails() {
        let (handle, rx) = ConnectionHandle::new(addr());
        drop(rx);

        assert!(matches!(handle.send("nobody"), Err(ChatError::Transport(_))));
    }

    #[test]
    fn test_full_queue_is_a_failed_send() {
        let (handle, _rx) = ConnectionHandle::new(addr());
        for _ in 0..OUTBOUND_CAPACITY {
            handle.send("fill").unwrap();
        }

        assert!(handle.send("overflow").is_err());
    }

    #[test]
    fn test_handles_have_distinct_ids() {
        let (a, _) = ConnectionHandle::new(addr());
        let (b, _) = ConnectionHandle::new(addr());

        assert_ne!(a.id(), b.id());
        assert_eq!(a.clone().id(), a.id());
    }
}
