//! Client connection state: where to connect, who we are, and what to do
//! with traffic and link failures.

use std::ops::ControlFlow;
use server::command::{DEFAULT_HOST, DEFAULT_PORT, SHUTDOWN_SENTINEL, login_directive, parse_port};
use server::error::{ChatError, Result};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::link::{ClientEvent, EventReceiver, EventSender, Link, LinkEvent, LinkId};

pub const CONNECTION_CLOSED: &str = "Connection closed.";
pub const SERVER_SHUT_DOWN: &str = "Server has shut down.";
pub const FORCED_DISCONNECT: &str = "Server requested disconnect.";

const EVENT_CAPACITY: usize = 100;

/// How a successful `connect` got there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Connected {
    Configured,
    /// The configured endpoint failed; host and port were reset to the
    /// fallback and that attempt succeeded.
    Fallback { failed: String },
}

/// What the console should do after a link event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionUpdate {
    /// Show a line of server traffic verbatim.
    Display(String),
    /// The session is now disconnected; show the notice. The user may reconnect.
    Disconnected(&'static str),
    /// The session is gone for good; show the notice and exit.
    Terminated(&'static str),
}

pub struct ClientSession {
    host: String,
    port: u16,
    login_id: String,
    fallback: (String, u16),
    link: Option<Link>,
    events: EventSender,
}

impl ClientSession {
    /// Creates a disconnected session and the receiver its link events arrive on.
    pub fn new(login_id: impl Into<String>, host: impl Into<String>, port: u16) -> (Self, EventReceiver) {
        let (events, receiver) = mpsc::channel(EVENT_CAPACITY);
        let session = Self {
            host: host.into(),
            port,
            login_id: login_id.into(),
            fallback: (DEFAULT_HOST.to_string(), DEFAULT_PORT),
            link: None,
            events,
        };
        (session, receiver)
    }

    /// Overrides the endpoint `connect` falls back to when the configured one fails.
    pub fn with_fallback(mut self, host: impl Into<String>, port: u16) -> Self {
        self.fallback = (host.into(), port);
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn login_id(&self) -> &str {
        &self.login_id
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    pub fn set_host(&mut self, host: &str) -> Result<()> {
        if self.is_connected() {
            return Err(ChatError::InvalidState("Please log off first."));
        }
        self.host = host.trim().to_string();
        Ok(())
    }

    /// An unparsable port falls back to the default and is still reported.
    pub fn set_port(&mut self, input: &str) -> Result<u16> {
        if self.is_connected() {
            return Err(ChatError::InvalidState("Please log off first."));
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

    /// Opens a link and logs in. If the configured endpoint fails, host and
    /// port are reset to the fallback and one more attempt is made.
    pub async fn connect(&mut self) -> Result<Connected> {
        if self.is_connected() {
            return Err(ChatError::InvalidState("Client already connected."));
        }

        let outcome = match self.open().await {
            Ok(()) => Connected::Configured,
            Err(e) => {
                let failed = format!("{}:{}", self.host, self.port);
                warn!("Unable to connect to {}: {}", failed, e);
                (self.host, self.port) = self.fallback.clone();
                self.open().await?;
                Connected::Fallback { failed }
            }
        };

        info!("Connected to {}:{} as {}", self.host, self.port, self.login_id);
        Ok(outcome)
    }

    async fn open(&mut self) -> Result<()> {
        let link = Link::open(&self.host, self.port, self.events.clone()).await?;
        link.send(&login_directive(&self.login_id))?;
        self.link = Some(link);
        Ok(())
    }

    /// Closes the link if there is one.
    pub fn disconnect(&mut self) {
        if let Some(link) = self.link.take() {
            info!("Logging off from {}:{}", self.host, self.port);
            link.close();
        }
    }

    /// Disconnects and tells the caller to shut the process down.
    pub fn terminate(&mut self) -> ControlFlow<()> {
        self.disconnect();
        ControlFlow::Break(())
    }

    /// Sends a chat line. A failed send terminates the session; the error
    /// tells the caller so.
    pub async fn send_payload(&mut self, text: &str) -> Result<()> {
        let Some(link) = &self.link else {
            return Err(ChatError::InvalidState("Not connected. Type #login to connect."));
        };
        if let Err(e) = link.send(text) {
            warn!("Could not send message to server: {}", e);
            let _ = self.terminate();
            return Err(e);
        }
        Ok(())
    }

    /// Routes one link event. Events from a link this session no longer
    /// holds are dropped.
    pub fn handle_event(&mut self, event: ClientEvent) -> Option<SessionUpdate> {
        if !self.is_current(event.link) {
            return None;
        }
        let update = match event.kind {
            LinkEvent::Message(text) => self.on_server_message(text),
            LinkEvent::Closed => self.on_connection_closed(),
            LinkEvent::Error(reason) => {
                warn!("Connection error: {}", reason);
                self.on_connection_error()
            }
        };
        Some(update)
    }

    pub fn is_current(&self, link: LinkId) -> bool {
        self.link.as_ref().is_some_and(|current| current.id() == link)
    }

    pub fn on_server_message(&mut self, text: String) -> SessionUpdate {
        if text == SHUTDOWN_SENTINEL {
            self.disconnect();
            return SessionUpdate::Disconnected(FORCED_DISCONNECT);
        }
        SessionUpdate::Display(text)
    }

    pub fn on_connection_closed(&mut self) -> SessionUpdate {
        self.link = None;
        SessionUpdate::Disconnected(CONNECTION_CLOSED)
    }

    pub fn on_connection_error(&mut self) -> SessionUpdate {
        let _ = self.terminate();
        SessionUpdate::Terminated(SERVER_SHUT_DOWN)
    }
}
