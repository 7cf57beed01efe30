use server::error::{ChatError, Result};
use server::messages::{Message, write_message};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

pub type LinkId = Uuid;
pub type EventSender = mpsc::Sender<ClientEvent>;
pub type EventReceiver = mpsc::Receiver<ClientEvent>;

/// Lines a link may have queued for the server before sends start failing.
const OUTGOING_CAPACITY: usize = 100;

/// Something that happened on a link, tagged with the link it came from so a
/// session can ignore stragglers from a connection it already dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientEvent {
    pub link: LinkId,
    pub kind: LinkEvent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Message(String),
    /// The server closed the connection in an orderly way.
    Closed,
    /// Reading or writing failed.
    Error(String),
}

/// One open connection to the server.
#[derive(Debug)]
pub struct Link {
    id: LinkId,
    outgoing: mpsc::Sender<String>,
    closed: CancellationToken,
}

impl Link {
    pub async fn open(host: &str, port: u16, events: EventSender) -> Result<Self> {
        let stream = TcpStream::connect((host, port)).await?;
        let (read_stream, write_stream) = stream.into_split();

        let id = Uuid::new_v4();
        let (outgoing_tx, outgoing_rx) = mpsc::channel::<String>(OUTGOING_CAPACITY);
        let closed = CancellationToken::new();

        tokio::spawn(Self::run_connection(
            id,
            read_stream,
            write_stream,
            outgoing_rx,
            events,
            closed.clone(),
        ));

        debug!("Link {} open to {}:{}", id, host, port);
        Ok(Self { id, outgoing: outgoing_tx, closed })
    }

    pub fn id(&self) -> LinkId {
        self.id
    }

    /// Queues `message` without waiting. A full or closed queue is a failed send.
    pub fn send(&self, message: &str) -> Result<()> {
        if self.closed.is_cancelled() {
            return Err(ChatError::disconnected());
        }
        self.outgoing
            .try_send(message.to_string())
            .map_err(|_| ChatError::disconnected())
    }

    /// Closes the connection without reporting an event for it.
    pub fn close(self) {
        drop(self);
    }

    async fn run_connection(
        id: LinkId,
        read_stream: OwnedReadHalf,
        write_stream: OwnedWriteHalf,
        outgoing_rx: mpsc::Receiver<String>,
        events: EventSender,
        closed: CancellationToken,
    ) {
        let outcome = tokio::select! {
            biased;
            _ = closed.cancelled() => return,
            result = Self::handle_incoming(id, read_stream, &events) => result.map(|()| LinkEvent::Closed),
            result = Self::handle_outgoing(write_stream, outgoing_rx) => result.map(|()| LinkEvent::Closed),
        };

        closed.cancel();
        let kind = outcome.unwrap_or_else(|e| LinkEvent::Error(e.to_string()));
        debug!("Link {} ended: {:?}", id, kind);
        let _ = events.send(ClientEvent { link: id, kind }).await;
    }

    async fn handle_incoming(id: LinkId, read_stream: OwnedReadHalf, events: &EventSender) -> Result<()> {
        let mut lines = BufReader::new(read_stream).lines();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let message = Message::decode(&line)?;
            let event = ClientEvent { link: id, kind: LinkEvent::Message(message.content) };
            if events.send(event).await.is_err() {
                break;
            }
        }

        Ok(())
    }

    async fn handle_outgoing(mut write_stream: OwnedWriteHalf, mut outgoing_rx: mpsc::Receiver<String>) -> Result<()> {
        while let Some(message) = outgoing_rx.recv().await {
            write_message(&mut write_stream, &Message::new(message)).await?;
        }
        Ok(())
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idle_link() -> (Link, mpsc::Receiver<String>) {
        let (outgoing, outgoing_rx) = mpsc::channel(OUTGOING_CAPACITY);
        let link = Link { id: Uuid::new_v4(), outgoing, closed: CancellationToken::new() };
        (link, outgoing_rx)
    }

    #[test]
    fn test_send_queues_line() {
        let (link, mut outgoing_rx) = idle_link();

        link.send("hello").unwrap();

        assert_eq!(outgoing_rx.try_recv().unwrap(), "hello");
    }

    #[test]
    fn test_full_queue_fails_instead_of_waiting() {
        let (link, _outgoing_rx) = idle_link();
        for _ in 0..OUTGOING_CAPACITY {
            link.send("fill").unwrap();
        }

        assert!(matches!(link.send("overflow"), Err(ChatError::Transport(_))));
    }

    #[test]
    fn test_send_after_link_ended_fails() {
        let (link, outgoing_rx) = idle_link();
        drop(outgoing_rx);

        assert!(link.send("late").is_err());

        let (link, _outgoing_rx) = idle_link();
        link.closed.cancel();

        assert!(link.send("late").is_err());
    }
}
