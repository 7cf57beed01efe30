//! The server operator's console: directives control the server, anything
//! else is broadcast to every client.

use std::io::Write;
use std::ops::ControlFlow;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::error;

use crate::command::{Command, Input};
use crate::control::ChatServer;
use crate::error::ChatError;

pub const UNRECOGNIZED: &str = "Unrecognized command. For help type #help.";
pub const READ_FAILURE: &str = "Unexpected error while reading from console!";

const HELP: [&str; 6] = [
    "#quit: Server terminates.",
    "#stop: Server no longer listens for new connections.",
    "#start: Server will listen for connections.",
    "#close: Server stops listening and terminates all clients.",
    "#setport <port>: Set a new port address.",
    "#getport: Returns port address.",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerDirective<'a> {
    Quit,
    Stop,
    Start,
    Close,
    SetPort(&'a str),
    GetPort,
    Help,
}

impl<'a> ServerDirective<'a> {
    pub fn from_command(command: &Command<'a>) -> Option<Self> {
        let directive = match (command.name, command.argument) {
            ("quit", None) => ServerDirective::Quit,
            ("stop", None) => ServerDirective::Stop,
            ("start", None) => ServerDirective::Start,
            ("close", None) => ServerDirective::Close,
            ("setport", port) => ServerDirective::SetPort(port.unwrap_or_default()),
            ("getport", None) => ServerDirective::GetPort,
            ("help", None) => ServerDirective::Help,
            _ => return None,
        };
        Some(directive)
    }
}

/// Why the console stopped reading.
pub enum ConsoleExit {
    /// The operator asked the server to quit. It has been closed.
    Quit,
    /// Standard input ended or failed. The server is handed back still running.
    InputClosed(ChatServer),
}

pub struct ServerConsole<W> {
    server: ChatServer,
    out: W,
}

impl<W: Write> ServerConsole<W> {
    pub fn new(server: ChatServer, out: W) -> Self {
        Self { server, out }
    }

    pub fn server(&self) -> &ChatServer {
        &self.server
    }

    pub async fn run<R>(mut self, input: R) -> ConsoleExit
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = input.lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if self.execute(&line).await.is_break() {
                        self.server.quit().await;
                        return ConsoleExit::Quit;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    error!("Console read failed: {}", e);
                    break;
                }
            }
        }

        self.say(READ_FAILURE);
        ConsoleExit::InputClosed(self.server)
    }

    /// Runs one console line. `Break` means the operator asked to quit.
    pub async fn execute(&mut self, line: &str) -> ControlFlow<()> {
        let command = match Input::parse(line) {
            Input::Payload(text) => {
                let sent = self.server.broadcast_local(text);
                self.say(&sent);
                return ControlFlow::Continue(());
            }
            Input::Directive(command) => command,
        };

        let Some(directive) = ServerDirective::from_command(&command) else {
            self.say(UNRECOGNIZED);
            return ControlFlow::Continue(());
        };

        match directive {
            ServerDirective::Quit => return ControlFlow::Break(()),
            ServerDirective::Stop => {
                if self.server.stop().await {
                    self.say("Server has stopped listening for connections.");
                } else {
                    self.say("Server is not listening.");
                }
            }
            ServerDirective::Start => match self.server.start().await {
                Ok(addr) => self.say(&format!("Server listening for connections on port {}", addr.port())),
                Err(e @ ChatError::InvalidState(_)) => self.say(&e.to_string()),
                Err(e) => self.say(&format!("ERROR - Could not listen for clients! {}", e)),
            },
            ServerDirective::Close => {
                self.server.close().await;
                self.say("Server closed. All clients disconnected.");
            }
            ServerDirective::SetPort(port) => match self.server.set_port(port) {
                Ok(port) => self.say(&format!("port set to: {}", port)),
                Err(ChatError::InvalidArgument(_)) => {
                    self.say("Invalid input. Using default port.");
                    self.say(&format!("port set to: {}", self.server.port()));
                }
                Err(e) => self.say(&e.to_string()),
            },
            ServerDirective::GetPort => self.say(&self.server.port().to_string()),
            ServerDirective::Help => {
                for line in HELP {
                    self.say(line);
                }
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
    use crate::command::DEFAULT_PORT;

    fn console() -> ServerConsole<Vec<u8>> {
        ServerConsole::new(ChatServer::new("127.0.0.1", 0), Vec::new())
    }

    fn output(console: &ServerConsole<Vec<u8>>) -> Vec<String> {
        String::from_utf8_lossy(&console.out).lines().map(str::to_string).collect()
    }

    #[test]
    fn test_directive_table() {
        let parse = |line: &'static str| match Input::parse(line) {
            Input::Directive(command) => ServerDirective::from_command(&command),
            Input::Payload(_) => None,
        };

        assert_eq!(parse("#quit"), Some(ServerDirective::Quit));
        assert_eq!(parse("#setport 7000"), Some(ServerDirective::SetPort("7000")));
        assert_eq!(parse("#setport"), Some(ServerDirective::SetPort("")));
        assert_eq!(parse("#getport"), Some(ServerDirective::GetPort));
        assert_eq!(parse("#stop now"), None);
        assert_eq!(parse("#launch"), None);
    }

    #[tokio::test]
    async fn test_unrecognized_directive() {
        let mut console = console();

        assert!(console.execute("#frobnicate").await.is_continue());
        assert_eq!(output(&console), vec![UNRECOGNIZED]);
    }

    #[tokio::test]
    async fn test_setport_and_getport() {
        let mut console = console();

        console.execute("#setport 7000").await;
        console.execute("#getport").await;
        console.execute("#setport abc").await;

        assert_eq!(
            output(&console),
            vec![
                "port set to: 7000".to_string(),
                "7000".to_string(),
                "Invalid input. Using default port.".to_string(),
                format!("port set to: {}", DEFAULT_PORT),
            ]
        );
    }

    #[tokio::test]
    async fn test_setport_while_listening() {
        let mut console = console();
        console.execute("#start").await;

        console.execute("#setport 7000").await;
        console.execute("#start").await;

        let lines = output(&console);
        assert_eq!(lines[1], "Please close server first.");
        assert_eq!(lines[2], "Server is already listening.");
        assert_eq!(console.server().port(), 0);
        console.execute("#close").await;
    }

    #[tokio::test]
    async fn test_plain_line_is_echoed_with_prefix() {
        let mut console = console();

        console.execute("hello all").await;

        assert_eq!(output(&console), vec!["SERVER MSG > hello all"]);
    }

    #[tokio::test]
    async fn test_quit_breaks_loop() {
        let mut console = console();

        assert!(console.execute("#quit").await.is_break());
    }

    #[tokio::test]
    async fn test_run_quits_on_directive() {
        let console = console();

        let exit = console.run(&b"#start\n#quit\n#start\n"[..]).await;

        assert!(matches!(exit, ConsoleExit::Quit));
    }

    #[tokio::test]
    async fn test_run_hands_back_server_on_eof() {
        let console = console();

        let exit = console.run(&b"#start\n"[..]).await;

        let ConsoleExit::InputClosed(mut server) = exit else {
            panic!("console quit on end of input");
        };
        assert!(server.is_listening());
        server.close().await;
    }
}
