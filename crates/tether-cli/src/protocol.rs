//! File-transfer application protocol.
//!
//! Runs on top of a [`SecureChannel`](tether_core::SecureChannel). Each
//! request and each response is exactly one channel message holding a
//! UTF-8 line:
//!
//! ```text
//! LIST                 ->  OK <size>   + listing body
//! RETR <name>          ->  OK <size>   + file body
//! STOR <name> <size>   ->  OK          + client sends body  ->  OK <size>
//! DELE <name>          ->  OK
//! ```
//!
//! Any request may instead be answered with `ERR <reason>`. Bodies are
//! exactly `size` bytes streamed in messages of at most
//! [`MAX_PAYLOAD_SIZE`](tether_core::MAX_PAYLOAD_SIZE) bytes.

use std::fmt;
use thiserror::Error;

/// Application protocol errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// Message was not valid UTF-8
    #[error("message is not valid UTF-8")]
    NotUtf8,

    /// Empty request line
    #[error("empty request")]
    Empty,

    /// Unrecognised command word
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// Command is missing an argument
    #[error("{command} requires {argument}")]
    MissingArgument {
        /// Command word
        command: &'static str,
        /// Name of the missing argument
        argument: &'static str,
    },

    /// Trailing arguments after a complete command
    #[error("unexpected argument: {0}")]
    UnexpectedArgument(String),

    /// Size field is not a decimal number
    #[error("invalid size: {0}")]
    InvalidSize(String),

    /// File name would escape the storage directory or is otherwise unusable
    #[error("invalid file name: {0:?}")]
    InvalidFileName(String),

    /// Response line does not start with `OK` or `ERR`
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

/// Client request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// List stored files
    List,
    /// Download a file
    Retr {
        /// File name
        name: String,
    },
    /// Upload a file of `size` bytes
    Stor {
        /// File name
        name: String,
        /// Body length in bytes
        size: u64,
    },
    /// Delete a file
    Dele {
        /// File name
        name: String,
    },
}

impl Request {
    /// Parse a request message.
    ///
    /// Command words are case-insensitive. File names are validated with
    /// [`validate_file_name`].
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] describing the first problem found.
    pub fn parse(message: &[u8]) -> Result<Self, ProtocolError> {
        let line = std::str::from_utf8(message).map_err(|_| ProtocolError::NotUtf8)?;
        let mut words = line.split_whitespace();
        let command = words.next().ok_or(ProtocolError::Empty)?;

        let request = match command.to_ascii_uppercase().as_str() {
            "LIST" => Self::List,
            "RETR" => Self::Retr {
                name: file_name_arg(words.next(), "RETR")?,
            },
            "STOR" => {
                let name = file_name_arg(words.next(), "STOR")?;
                let size = words.next().ok_or(ProtocolError::MissingArgument {
                    command: "STOR",
                    argument: "a size",
                })?;
                let size = size
                    .parse()
                    .map_err(|_| ProtocolError::InvalidSize(size.to_string()))?;
                Self::Stor { name, size }
            }
            "DELE" => Self::Dele {
                name: file_name_arg(words.next(), "DELE")?,
            },
            _ => return Err(ProtocolError::UnknownCommand(command.to_string())),
        };

        if let Some(extra) = words.next() {
            return Err(ProtocolError::UnexpectedArgument(extra.to_string()));
        }
        Ok(request)
    }

    /// Wire form of the request
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::List => f.write_str("LIST"),
            Self::Retr { name } => write!(f, "RETR {name}"),
            Self::Stor { name, size } => write!(f, "STOR {name} {size}"),
            Self::Dele { name } => write!(f, "DELE {name}"),
        }
    }
}

fn file_name_arg(word: Option<&str>, command: &'static str) -> Result<String, ProtocolError> {
    let name = word.ok_or(ProtocolError::MissingArgument {
        command,
        argument: "a file name",
    })?;
    validate_file_name(name)?;
    Ok(name.to_string())
}

/// Server response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Success, with a body or file size where one applies
    Ok(Option<u64>),
    /// Refusal with a human-readable reason
    Err(String),
}

impl Response {
    /// Parse a response message.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedResponse`] for anything other than
    /// `OK`, `OK <size>` or `ERR <reason>`.
    pub fn parse(message: &[u8]) -> Result<Self, ProtocolError> {
        let line = std::str::from_utf8(message).map_err(|_| ProtocolError::NotUtf8)?;
        let malformed = || ProtocolError::MalformedResponse(line.to_string());

        if let Some(reason) = line.strip_prefix("ERR") {
            return Ok(Self::Err(reason.trim().to_string()));
        }
        let rest = line.strip_prefix("OK").ok_or_else(malformed)?;
        match rest.trim() {
            "" => Ok(Self::Ok(None)),
            size => size.parse().map(|n| Self::Ok(Some(n))).map_err(|_| malformed()),
        }
    }

    /// Wire form of the response
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Ok(None) => b"OK".to_vec(),
            Self::Ok(Some(size)) => format!("OK {size}").into_bytes(),
            Self::Err(reason) => format!("ERR {reason}").into_bytes(),
        }
    }
}

/// Check that `name` refers to a single entry inside a storage directory.
///
/// # Errors
///
/// Returns [`ProtocolError::InvalidFileName`] if the name is empty, starts
/// with `.` (covers `..` and partial uploads), or contains a path
/// separator, NUL or whitespace.
pub fn validate_file_name(name: &str) -> Result<(), ProtocolError> {
    let invalid = name.is_empty()
        || name.starts_with('.')
        || name.contains(['/', '\\', '\0'])
        || name.chars().any(char::is_whitespace);
    if invalid {
        return Err(ProtocolError::InvalidFileName(name.to_string()));
    }
    Ok(())
}
