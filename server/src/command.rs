//! Line grammar shared by both consoles and the login handshake.
//!
//! A line starting with `#` is a directive: the name runs up to the first
//! space and everything after that space is the argument. Any other line is a
//! chat payload. Parsing never fails; unknown names are the caller's problem.

use crate::error::{ChatError, Result};

pub const DIRECTIVE_MARKER: char = '#';

/// Sent by the server to tell every client to disconnect.
pub const SHUTDOWN_SENTINEL: &str = "#quit";

pub const LOGIN_DIRECTIVE: &str = "login";

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 5555;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input<'a> {
    Payload(&'a str),
    Directive(Command<'a>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command<'a> {
    pub name: &'a str,
    pub argument: Option<&'a str>,
}

impl<'a> Input<'a> {
    pub fn parse(line: &'a str) -> Self {
        let Some(directive) = line.strip_prefix(DIRECTIVE_MARKER) else {
            return Input::Payload(line);
        };

        let (name, argument) = match directive.split_once(' ') {
            Some((name, rest)) => (name, Some(rest)),
            None => (directive, None),
        };

        Input::Directive(Command { name, argument })
    }
}

impl Command<'_> {
    /// The identifier carried by a `#login <id>` directive, if this is one and
    /// the identifier is non-empty.
    pub fn login_id(&self) -> Option<&str> {
        if self.name != LOGIN_DIRECTIVE {
            return None;
        }
        self.argument.map(str::trim).filter(|id| !id.is_empty())
    }
}

/// The first payload a client sends on a fresh connection.
pub fn login_directive(login_id: &str) -> String {
    format!("{DIRECTIVE_MARKER}{LOGIN_DIRECTIVE} {login_id}")
}

/// Parses a port argument. The error carries the rejected input; callers fall
/// back to [`DEFAULT_PORT`].
pub fn parse_port(input: &str) -> Result<u16> {
    input
        .trim()
        .parse::<u16>()
        .map_err(|_| ChatError::InvalidArgument(input.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_line_is_payload() {
        assert_eq!(Input::parse("hello there"), Input::Payload("hello there"));
        assert_eq!(Input::parse(""), Input::Payload(""));
        assert_eq!(Input::parse(" #quit"), Input::Payload(" #quit"));
    }

    #[test]
    fn test_directive_without_argument() {
        assert_eq!(
            Input::parse("#quit"),
            Input::Directive(Command { name: "quit", argument: None })
        );
    }

    #[test]
    fn test_directive_argument_is_everything_after_first_space() {
        assert_eq!(
            Input::parse("#sethost my host  name"),
            Input::Directive(Command { name: "sethost", argument: Some("my host  name") })
        );
        assert_eq!(
            Input::parse("#setport "),
            Input::Directive(Command { name: "setport", argument: Some("") })
        );
    }

    #[test]
    fn test_bare_marker_is_empty_directive() {
        assert_eq!(
            Input::parse("#"),
            Input::Directive(Command { name: "", argument: None })
        );
    }

    #[test]
    fn test_login_id_extraction() {
        let login = login_directive("alice");
        assert_eq!(login, "#login alice");

        let Input::Directive(command) = Input::parse(&login) else {
            panic!("login directive parsed as payload");
        };
        assert_eq!(command.login_id(), Some("alice"));
    }

    #[test]
    fn test_login_id_rejects_empty_and_other_names() {
        for line in ["#login", "#login ", "#login    ", "#logins bob", "#quit bob"] {
            let Input::Directive(command) = Input::parse(line) else {
                panic!("{line} parsed as payload");
            };
            assert_eq!(command.login_id(), None, "{line}");
        }
    }

    #[test]
    fn test_parse_port() {
        assert_eq!(parse_port("7000").unwrap(), 7000);
        assert_eq!(parse_port(" 0 ").unwrap(), 0);
        assert_eq!(parse_port("65535").unwrap(), 65535);

        for bad in ["abc", "", "-1", "65536", "12.5"] {
            assert!(matches!(parse_port(bad), Err(ChatError::InvalidArgument(_))), "{bad}");
        }
    }
}
