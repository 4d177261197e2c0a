//! Logical response reassembly
//!
//! A complete response is a leading header, the payload body and a trailing
//! footer header. In fragmented mode the device injects an extra 14-byte
//! header every 65,536 bytes of wire data; those intermediate headers are
//! stripped here without validation.

use tracing::warn;

use crate::protocol::header::{InboundHeader, HEADER_SIZE, MODE_FRAGMENTED};

/// Maximum payload bytes between intermediate headers in fragmented mode
///
/// A block is 64 KiB of wire data of which the first 14 bytes are a header.
pub const MAX_BLOCK_PAYLOAD: usize = 0x10000 - HEADER_SIZE;

/// Extract the payload of a complete logical response
///
/// `buf` must start with the bytes that produced `header`. Returns `None`
/// while the response is incomplete: either fewer bytes than the declared
/// payload plus footer are buffered, or the trailing 14 bytes do not parse
/// as a valid footer yet. Both cases mean "wait for more data".
///
/// Declared-size mismatches are logged and the extracted payload is used
/// anyway; the device is known to under- and over-declare occasionally.
pub fn extract_payload(buf: &[u8], header: &InboundHeader) -> Option<Vec<u8>> {
    let needed = HEADER_SIZE + header.size as usize + HEADER_SIZE;
    if buf.len() < needed {
        return None;
    }

    let footer = InboundHeader::decode(&buf[buf.len() - HEADER_SIZE..])?;
    if !footer.is_footer_for(header) {
        return None;
    }

    let payload = if header.mode == MODE_FRAGMENTED {
        reassemble_fragments(buf, header)
    } else {
        let body = &buf[HEADER_SIZE..buf.len() - HEADER_SIZE];
        if body.len() != header.size as usize {
            warn!(
                declared = header.size,
                actual = body.len(),
                "single packet size mismatch"
            );
        }
        body.to_vec()
    };

    Some(payload)
}

/// Strip intermediate block headers from a fragmented response body
fn reassemble_fragments(buf: &[u8], header: &InboundHeader) -> Vec<u8> {
    let mut payload = Vec::with_capacity(header.size as usize);

    let end_of_data = buf.len() - HEADER_SIZE; // stop before the footer
    let mut offset = HEADER_SIZE;

    while offset < end_of_data {
        let remaining = end_of_data - offset;
        let chunk = remaining.min(MAX_BLOCK_PAYLOAD);
        payload.extend_from_slice(&buf[offset..offset + chunk]);
        offset += chunk;

        // A full block is followed by an injected header; skip it unchecked.
        if chunk == MAX_BLOCK_PAYLOAD && offset < end_of_data {
            offset += HEADER_SIZE;
        }
    }

    if payload.len() != header.size as usize {
        warn!(
            declared = header.size,
            actual = payload.len(),
            "fragmented payload size mismatch"
        );
    }

    payload
}
