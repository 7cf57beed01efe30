use std::io::Write;
use std::ops::ControlFlow;
use client_lib::{ClientSession, Connected, EventReceiver, SessionUpdate};
use server::command::{Command, DEFAULT_HOST, DEFAULT_PORT, Input};
use server::error::ChatError;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::error;

pub const UNRECOGNIZED: &str = "Unrecognized command. For help type #help.";
pub const READ_FAILURE: &str = "Unexpected error while reading from console!";
pub const CANNOT_CONNECT: &str = "Cannot open connection. Awaiting command.";

const HELP: [&str; 8] = [
    "#quit: Client terminates.",
    "#logoff: Connection to server terminates.",
    "#sethost <host>: Set a new host name.",
    "#setport <port>: Set a new port address.",
    "#login: Connect to server.",
    "#gethost: Returns host name.",
    "#getport: Returns port address.",
    "#help: Lists these commands.",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientDirective<'a> {
    Quit,
    Logoff,
    SetHost(&'a str),
    SetPort(&'a str),
    Login,
    GetHost,
    GetPort,
    Help,
}

impl<'a> ClientDirective<'a> {
    pub fn from_command(command: &Command<'a>) -> Option<Self> {
        let directive = match (command.name, command.argument) {
            ("quit", None) => ClientDirective::Quit,
            ("logoff", None) => ClientDirective::Logoff,
            ("sethost", Some(host)) if !host.trim().is_empty() => ClientDirective::SetHost(host),
            ("setport", port) => ClientDirective::SetPort(port.unwrap_or_default()),
            ("login", None) => ClientDirective::Login,
            ("gethost", None) => ClientDirective::GetHost,
            ("getport", None) => ClientDirective::GetPort,
            ("help", None) => ClientDirective::Help,
            _ => return None,
        };
        Some(directive)
    }
}

pub struct ClientConsole<W> {
    session: ClientSession,
    out: W,
}

impl<W: Write> ClientConsole<W> {
    pub fn new(session: ClientSession, out: W) -> Self {
        Self { session, out }
    }

    /// Reads console lines and link events until the session terminates or
    /// input ends.
    pub async fn run<R>(mut self, input: R, mut events: EventReceiver)
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = input.lines();
        loop {
            tokio::select! {
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        if self.execute(&line).await.is_break() {
                            return;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        error!("Console read failed: {}", e);
                        break;
                    }
                },
                Some(event) = events.recv() => {
                    if let Some(update) = self.session.handle_event(event) {
                        if self.show(update).is_break() {
                            return;
                        }
                    }
                }
            }
        }

        self.say(READ_FAILURE);
        let _ = self.session.terminate();
    }

    /// Runs one console line. `Break` means the client should exit.
    pub async fn execute(&mut self, line: &str) -> ControlFlow<()> {
        let command = match Input::parse(line) {
            Input::Payload(text) => {
                return match self.session.send_payload(text).await {
                    Ok(()) => ControlFlow::Continue(()),
                    Err(e @ ChatError::InvalidState(_)) => {
                        self.say(&e.to_string());
                        ControlFlow::Continue(())
                    }
                    Err(_) => {
                        self.say("Could not send message to server.");
                        ControlFlow::Break(())
                    }
                };
            }
            Input::Directive(command) => command,
        };

        let Some(directive) = ClientDirective::from_command(&command) else {
            self.say(UNRECOGNIZED);
            return ControlFlow::Continue(());
        };

        match directive {
            ClientDirective::Quit => return self.session.terminate(),
            ClientDirective::Logoff => self.session.disconnect(),
            ClientDirective::SetHost(host) => {
                if let Err(e) = self.session.set_host(host) {
                    self.say(&e.to_string());
                }
            }
            ClientDirective::SetPort(port) => match self.session.set_port(port) {
                Ok(port) => self.say(&format!("The current port is: {}", port)),
                Err(ChatError::InvalidArgument(_)) => self.say("Invalid input. Using default port"),
                Err(e) => self.say(&e.to_string()),
            },
            ClientDirective::Login => self.login().await,
            ClientDirective::GetHost => {
                let line = format!("The current host name is: {}", self.session.host());
                self.say(&line);
            }
            ClientDirective::GetPort => {
                let line = format!("The current port is: {}", self.session.port());
                self.say(&line);
            }
            ClientDirective::Help => {
                for line in HELP {
                    self.say(line);
                }
            }
        }

        ControlFlow::Continue(())
    }

    pub async fn login(&mut self) {
        match self.session.connect().await {
            Ok(Connected::Configured) => {}
            Ok(Connected::Fallback { failed }) => self.say(&format!(
                "Unable to connect to {}. Connecting to default host {} and default port {}.",
                failed, DEFAULT_HOST, DEFAULT_PORT
            )),
            Err(e @ ChatError::InvalidState(_)) => self.say(&e.to_string()),
            Err(e) => {
                error!("Connect failed: {}", e);
                self.say(CANNOT_CONNECT);
            }
        }
    }

    fn show(&mut self, update: SessionUpdate) -> ControlFlow<()> {
        match update {
            SessionUpdate::Display(text) => self.say(&text),
            SessionUpdate::Disconnected(notice) => self.say(notice),
            SessionUpdate::Terminated(notice) => {
                self.say(notice);
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    fn say(&mut self, line: &str) {
        if let Err(e) = writeln!(self.out, "{}", line) {
            error!("Failed to write to console: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn console() -> ClientConsole<Vec<u8>> {
        let (session, _events) = ClientSession::new("alice", "localhost", 6000);
        ClientConsole::new(session, Vec::new())
    }

    fn output(console: &ClientConsole<Vec<u8>>) -> Vec<String> {
        String::from_utf8_lossy(&console.out).lines().map(str::to_string).collect()
    }

    #[test]
    fn test_directive_table() {
        let parse = |line: &'static str| match Input::parse(line) {
            Input::Directive(command) => ClientDirective::from_command(&command),
            Input::Payload(_) => None,
        };

        assert_eq!(parse("#logoff"), Some(ClientDirective::Logoff));
        assert_eq!(parse("#sethost example.org"), Some(ClientDirective::SetHost("example.org")));
        assert_eq!(parse("#sethost"), None);
        assert_eq!(parse("#setport 7000"), Some(ClientDirective::SetPort("7000")));
        assert_eq!(parse("#login"), Some(ClientDirective::Login));
        assert_eq!(parse("#login bob"), None);
        assert_eq!(parse("#whoami"), None);
    }

    #[tokio::test]
    async fn test_unrecognized_directive() {
        let mut console = console();

        assert!(console.execute("#dance").await.is_continue());
        assert_eq!(output(&console), vec![UNRECOGNIZED]);
    }

    #[tokio::test]
    async fn test_host_and_port_directives() {
        let mut console = console();

        console.execute("#sethost example.org").await;
        console.execute("#gethost").await;
        console.execute("#setport 7000").await;
        console.execute("#setport seven").await;
        console.execute("#getport").await;

        assert_eq!(
            output(&console),
            vec![
                "The current host name is: example.org".to_string(),
                "The current port is: 7000".to_string(),
                "Invalid input. Using default port".to_string(),
                format!("The current port is: {}", DEFAULT_PORT),
            ]
        );
    }

    #[tokio::test]
    async fn test_payload_while_disconnected_is_refused() {
        let mut console = console();

        assert!(console.execute("hello?").await.is_continue());
        assert_eq!(output(&console), vec!["Not connected. Type #login to connect."]);
    }

    #[tokio::test]
    async fn test_logoff_when_disconnected_is_quiet() {
        let mut console = console();

        assert!(console.execute("#logoff").await.is_continue());
        assert!(output(&console).is_empty());
    }

    #[tokio::test]
    async fn test_payload_over_dead_link_exits() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (mut session, mut events) = ClientSession::new("alice", "127.0.0.1", port);
        session.connect().await.unwrap();

        let (stream, _) = listener.accept().await.unwrap();
        let mut lines = tokio::io::BufReader::new(stream).lines();
        lines.next_line().await.unwrap().unwrap();
        drop(lines);
        tokio::time::timeout(std::time::Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();

        let mut console = ClientConsole::new(session, Vec::new());

        assert!(console.execute("hello").await.is_break());
        assert_eq!(output(&console), vec!["Could not send message to server."]);
    }

    #[tokio::test]
    async fn test_quit_breaks() {
        let mut console = console();

        assert!(console.execute("#quit").await.is_break());
    }

    #[test]
    fn test_terminated_update_breaks() {
        let mut console = console();

        assert!(console.show(SessionUpdate::Display("bob > hi".into())).is_continue());
        assert!(console.show(SessionUpdate::Terminated("Server has shut down.")).is_break());
        assert_eq!(output(&console), vec!["bob > hi", "Server has shut down."]);
    }

    #[tokio::test]
    async fn test_run_reports_end_of_input() {
        let (session, events) = ClientSession::new("alice", "localhost", 6000);
        let mut out = Vec::new();

        ClientConsole::new(session, &mut out).run(&b"#getport\n"[..], events).await;

        let out = String::from_utf8(out).unwrap();
        assert_eq!(out, format!("The current port is: 6000\n{}\n", READ_FAILURE));
    }
}
