//! Device protocol implementation module
//!
//! Byte-level framing of request and response packets, token resolution and
//! the textual mode-list format. Outbound headers and inbound headers use
//! different layouts; both are big-endian.

pub mod command;
pub mod frame;
pub mod header;
pub mod modelist;
pub mod token;

// Re-export commonly used types
pub use command::{ClientId, Command, PacketKind, PayloadValue};
pub use header::{InboundHeader, HEADER_SIZE, MODE_FRAGMENTED, MODE_SINGLE};
pub use modelist::parse_mode_list;
pub use token::{TokenTable, TOKEN_NAMES, UNKNOWN_TOKEN};
