//! Control commands: `SWIFTCMD-<type>|<message>`.

use std::fmt;

/// Prefix that distinguishes a control command from a transfer token.
pub const COMMAND_PREFIX: &str = "SWIFTCMD-";

/// Control command types and their wire codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandType {
    /// Server → client after accept; message is the assigned client ID.
    Connected,
    KeepAlive,
    /// Server → client before closing; message is the reason.
    Kick,
    Disconnect,
    Success,
    Failure,
}

impl CommandType {
    pub fn code(self) -> u16 {
        match self {
            Self::Connected => 0,
            Self::KeepAlive => 1,
            Self::Kick => 200,
            Self::Disconnect => 201,
            Self::Success => 400,
            Self::Failure => 401,
        }
    }

    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            0 => Some(Self::Connected),
            1 => Some(Self::KeepAlive),
            200 => Some(Self::Kick),
            201 => Some(Self::Disconnect),
            400 => Some(Self::Success),
            401 => Some(Self::Failure),
            _ => None,
        }
    }
}

/// A control command with its (possibly empty) message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub kind: CommandType,
    pub message: String,
}

impl Command {
    pub fn new(kind: CommandType, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Parses `SWIFTCMD-<code>|<message>`.
    ///
    /// The message is everything after the first `|`. A missing `|` means an
    /// empty message. Unknown codes do not parse.
    pub fn parse(text: &str) -> Option<Self> {
        let rest = text.strip_prefix(COMMAND_PREFIX)?;
        let (code, message) = rest.split_once('|').unwrap_or((rest, ""));
        let kind = CommandType::from_code(code.trim().parse().ok()?)?;
        Some(Self::new(kind, message))
    }

    /// Returns true if `text` looks like a control command, known or not.
    pub fn is_command(text: &str) -> bool {
        text.starts_with(COMMAND_PREFIX)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{COMMAND_PREFIX}{}|{}", self.kind.code(), self.message)
    }
}
