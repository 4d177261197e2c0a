//! Outbound commands and their wire encoding
//!
//! The device accepts three request packets: token requests, read-data
//! requests and typed commands. All outbound header fields are big-endian.

use bytes::BufMut;
use rand::RngCore;

use crate::protocol::token::TokenTable;

/// Wire id of a token request packet
pub const PACKET_READ_TOKEN: u16 = 0x0003;

/// Wire id of a read-data request packet
pub const PACKET_READ_DATA: u16 = 0x0010;

/// Wire id of a typed command packet
pub const PACKET_COMMAND: u16 = 0x0011;

/// Random per-connection client identifier (6 bytes)
///
/// Sent with token and read-data requests. The device does not validate the
/// format, so any process-local entropy source is sufficient.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientId([u8; 6]);

impl ClientId {
    /// Generate a fresh random client id
    pub fn random() -> Self {
        let mut bytes = [0u8; 6];
        rand::thread_rng().fill_bytes(&mut bytes);
        ClientId(bytes)
    }

    /// Raw bytes as sent on the wire
    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }
}

impl From<[u8; 6]> for ClientId {
    fn from(bytes: [u8; 6]) -> Self {
        ClientId(bytes)
    }
}

/// Outbound packet kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    /// Request the session token bound to a command name
    ReadToken,
    /// Request data identified by a previously resolved token
    ReadData,
    /// Send a typed command value
    Command,
}

impl PacketKind {
    /// Wire id carried in the first two header bytes
    pub fn wire_id(self) -> u16 {
        match self {
            PacketKind::ReadToken => PACKET_READ_TOKEN,
            PacketKind::ReadData => PACKET_READ_DATA,
            PacketKind::Command => PACKET_COMMAND,
        }
    }
}

/// Typed payload of a command packet
#[derive(Debug, Clone, PartialEq)]
pub enum PayloadValue {
    /// No payload
    None,
    /// 32-bit unsigned scalar, big-endian on the wire
    U32(u32),
    /// 16-bit unsigned scalar, big-endian on the wire
    U16(u16),
    /// UTF-8 text, NUL-terminated on the wire
    Text(String),
    /// Raw bytes, sent as supplied
    Blob(Vec<u8>),
}

impl PayloadValue {
    /// Payload type id carried in the command header
    pub fn type_id(&self) -> u16 {
        match self {
            PayloadValue::None => 0x0000,
            PayloadValue::U32(_) => 0x0002,
            PayloadValue::Text(_) => 0x0007,
            PayloadValue::Blob(_) => 0x0008,
            PayloadValue::U16(_) => 0x000B,
        }
    }

    /// Encode the payload body
    fn encode(&self) -> Vec<u8> {
        match self {
            PayloadValue::None => Vec::new(),
            PayloadValue::U32(v) => v.to_be_bytes().to_vec(),
            PayloadValue::U16(v) => v.to_be_bytes().to_vec(),
            PayloadValue::Text(s) => {
                let mut bytes = s.as_bytes().to_vec();
                bytes.push(0);
                bytes
            }
            PayloadValue::Blob(bytes) => bytes.clone(),
        }
    }
}

/// A pending command or read request
///
/// Commands compare equal when all fields match, which the queue uses to
/// suppress duplicates.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    /// Command name as known to the device
    pub name: String,
    /// Packet kind used when encoding
    pub kind: PacketKind,
    /// Payload for [`PacketKind::Command`] packets
    pub value: PayloadValue,
}

impl Command {
    /// Token request for `name`
    pub fn read_token(name: impl Into<String>) -> Self {
        Command {
            name: name.into(),
            kind: PacketKind::ReadToken,
            value: PayloadValue::None,
        }
    }

    /// Read-data request for `name`
    pub fn read_data(name: impl Into<String>) -> Self {
        Command {
            name: name.into(),
            kind: PacketKind::ReadData,
            value: PayloadValue::None,
        }
    }

    /// Typed command carrying `value`
    pub fn command(name: impl Into<String>, value: PayloadValue) -> Self {
        Command {
            name: name.into(),
            kind: PacketKind::Command,
            value,
        }
    }
}

/// Encode a typed command packet
///
/// Layout (big-endian): `[cmd:u16=0x0011] [flags:u16=0] [token:u32]
/// [length:u32] [type:u16]` followed by the encoded payload. An unresolved
/// name encodes the token sentinel.
pub fn encode_command(command: &Command, tokens: &TokenTable) -> Vec<u8> {
    let payload = command.value.encode();

    let mut packet = Vec::with_capacity(14 + payload.len());
    packet.put_u16(PACKET_COMMAND);
    packet.put_u16(0);
    packet.put_u32(tokens.get(&command.name));
    packet.put_u32(payload.len() as u32);
    packet.put_u16(command.value.type_id());
    packet.extend_from_slice(&payload);

    packet
}

/// Encode a token request packet
///
/// Layout (big-endian): `[cmd:u16=0x0003] [reserved:u16=0]
/// [length:u16=len(name)+1] [reserved:u16=0]` followed by the 6-byte client
/// id and the NUL-terminated name.
pub fn encode_read_token(name: &str, client_id: &ClientId) -> Vec<u8> {
    let mut packet = Vec::with_capacity(8 + 6 + name.len() + 1);
    packet.put_u16(PACKET_READ_TOKEN);
    packet.put_u16(0);
    packet.put_u16(name.len() as u16 + 1);
    packet.put_u16(0);
    packet.extend_from_slice(client_id.as_bytes());
    packet.extend_from_slice(name.as_bytes());
    packet.push(0);

    packet
}

/// Encode a read-data request packet
///
/// Layout (big-endian): `[cmd:u16=0x0010] [reserved:u16=0] [token:u32]`
/// followed by the 6-byte client id. No payload.
pub fn encode_read_data(command: &Command, tokens: &TokenTable, client_id: &ClientId) -> Vec<u8> {
    let mut packet = Vec::with_capacity(8 + 6);
    packet.put_u16(PACKET_READ_DATA);
    packet.put_u16(0);
    packet.put_u32(tokens.get(&command.name));
    packet.extend_from_slice(client_id.as_bytes());

    packet
}
