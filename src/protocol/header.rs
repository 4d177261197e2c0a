//! Inbound packet header implementation
//!
//! Every response from the device starts with a fixed 14-byte header and ends
//! with a 14-byte footer of the same layout.

use bytes::Buf;

/// Size of the inbound packet header in bytes
pub const HEADER_SIZE: usize = 14;

/// Header mode value for a single-packet response
pub const MODE_SINGLE: u16 = 0x0007;

/// Header mode value for a block-fragmented response
pub const MODE_FRAGMENTED: u16 = 0x0008;

/// Inbound packet header (14 bytes fixed size)
///
/// # Header structure (all multi-byte fields in big-endian)
/// - Flags: u8 (0x01 = more fragments follow, 0x00 = last fragment / footer)
/// - Packet type: u8 (0x11 = data payload, 0x00 = footer / control)
/// - Block: u16 (fragment sequence counter, starts at 0)
/// - Token: u32 (session identifier of the command this responds to)
/// - Size: u32 (declared payload size in bytes)
/// - Mode: u16 (0x0007 = single packet, 0x0008 = fragmented stream)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InboundHeader {
    /// Fragment flags
    pub flags: u8,
    /// Packet type discriminator
    pub packet_type: u8,
    /// Fragment sequence counter
    pub block: u16,
    /// Session token this response correlates to
    pub token: u32,
    /// Declared payload size in bytes
    pub size: u32,
    /// Transfer mode
    pub mode: u16,
}

impl InboundHeader {
    /// Decode a header from the start of a byte slice
    ///
    /// Returns `None` when fewer than [`HEADER_SIZE`] bytes are available,
    /// signalling that more data must be read from the transport.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }

        let mut cursor = std::io::Cursor::new(buf);

        let flags = cursor.get_u8();
        let packet_type = cursor.get_u8();
        let block = cursor.get_u16();
        let token = cursor.get_u32();
        let size = cursor.get_u32();
        let mode = cursor.get_u16();

        Some(InboundHeader {
            flags,
            packet_type,
            block,
            token,
            size,
            mode,
        })
    }

    /// Check whether this header is a valid trailing footer for `leading`
    ///
    /// A footer has zeroed flags, packet type and block counter, and echoes
    /// the token of the leading header. The size field is not checked.
    pub fn is_footer_for(&self, leading: &InboundHeader) -> bool {
        self.flags == 0 && self.packet_type == 0 && self.block == 0 && self.token == leading.token
    }
}
