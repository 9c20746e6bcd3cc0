//! Protocol message definitions
//!
//! Defines the domain values that travel over the serial link: baud rates
//! and chat entries.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use super::CodecError;

/// Timestamp layout used when rendering chat entries
pub const TIMESTAMP_FORMAT: &str = "%a %b %-d %H:%M:%S %Y";

/// Supported serial baud rates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
#[repr(u32)]
pub enum BaudRate {
    #[default]
    B9600 = 9600,
    B19200 = 19200,
    B38400 = 38400,
    B57600 = 57600,
    B115200 = 115200,
}

impl BaudRate {
    /// Every accepted rate, in ascending order
    pub const ALL: [BaudRate; 5] = [
        BaudRate::B9600,
        BaudRate::B19200,
        BaudRate::B38400,
        BaudRate::B57600,
        BaudRate::B115200,
    ];

    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

impl TryFrom<u32> for BaudRate {
    type Error = CodecError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        BaudRate::ALL
            .iter()
            .copied()
            .find(|b| b.as_u32() == value)
            .ok_or(CodecError::UnsupportedBaud(value))
    }
}

impl From<BaudRate> for u32 {
    fn from(baud: BaudRate) -> Self {
        baud.as_u32()
    }
}

impl FromStr for BaudRate {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: u32 = s
            .trim()
            .parse()
            .map_err(|_| CodecError::InvalidBaud(s.to_string()))?;
        BaudRate::try_from(value)
    }
}

impl fmt::Display for BaudRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u32())
    }
}

/// Which side of the link produced a chat entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Typed locally and echoed before the peer sees it
    Outgoing,
    /// Received from the peer
    Incoming,
}

/// A single line in the chat log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatEntry {
    /// Local time the entry was created
    pub timestamp: DateTime<Local>,
    /// Sender name, when one could be determined
    pub sender: Option<String>,
    /// Message body
    pub message: String,
    pub direction: Direction,
}

impl ChatEntry {
    pub fn outgoing(sender: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now(),
            sender: Some(sender.into()),
            message: message.into(),
            direction: Direction::Outgoing,
        }
    }

    pub fn incoming(sender: Option<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now(),
            sender,
            message: message.into(),
            direction: Direction::Incoming,
        }
    }

    /// The `name> message` body without the timestamp
    pub fn body(&self) -> String {
        match &self.sender {
            Some(sender) => format!("{}> {}", sender, self.message),
            None => self.message.clone(),
        }
    }

    pub fn formatted_timestamp(&self) -> String {
        self.timestamp.format(TIMESTAMP_FORMAT).to_string()
    }
}

impl fmt::Display for ChatEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\n{}", self.formatted_timestamp(), self.body())
    }
}
