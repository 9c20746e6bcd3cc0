//! Protocol module - Defines the line protocol spoken over the serial link
//!
//! Everything on the wire is newline-terminated ASCII/UTF-8:
//! - chat: `<name>> <message>\n`
//! - image: optional `I <width> <height>\n`, then per row `L\n` followed by
//!   one `<0-255>\n` per pixel

mod codec;
mod frame;
mod message;

pub use codec::*;
pub use frame::*;
pub use message::*;

/// Terminator for every token on the wire
pub const LINE_TERMINATOR: u8 = b'\n';

/// Separates the sender name from the message body in a chat line
pub const SENDER_SEPARATOR: &str = "> ";

/// Announces the start of an image row
pub const ROW_MARKER: &[u8] = b"L\n";

/// Leading tag of the optional image geometry header
pub const FRAME_HEADER_TAG: &str = "I";
