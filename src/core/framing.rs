//! Wire framing for the terminal protocol
//!
//! Every message travels as `STX | payload | ETX | LRC`, where the LRC is the
//! XOR fold of every byte from STX through ETX inclusive. The single-byte ACK
//! (0x06) carries no envelope.
//!
//! Inbound checksums are deliberately never verified here: the terminal is
//! the framing authority, and a frame the hardware accepted must not be
//! rejected locally.

use bytes::Bytes;

/// Start-of-text framing byte.
pub const STX: u8 = 0x02;
/// End-of-text framing byte.
pub const ETX: u8 = 0x03;
/// Single-byte acknowledgment, sent and received without an envelope.
pub const ACK: u8 = 0x06;

/// XOR-fold a byte run into the single LRC byte.
pub fn lrc(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &b| acc ^ b)
}

/// Wrap a payload in the wire envelope: `STX | payload | ETX | LRC`.
pub fn encode(payload: &str) -> Bytes {
    let mut frame = Vec::with_capacity(payload.len() + 3);
    frame.push(STX);
    frame.extend_from_slice(payload.as_bytes());
    frame.push(ETX);
    frame.push(lrc(&frame));
    Bytes::from(frame)
}

/// Strip the envelope from an inbound frame, returning the inner text.
///
/// Drops the leading STX and the trailing ETX+LRC pair. The LRC is not
/// recomputed or checked. Frames too short to carry an envelope decode to an
/// empty string rather than failing.
pub fn decode(frame: &[u8]) -> String {
    if frame.len() < 3 {
        return String::new();
    }
    String::from_utf8_lossy(&frame[1..frame.len() - 2]).into_owned()
}

/// Whether an inbound frame is exactly the bare ACK byte.
pub fn is_ack(frame: &[u8]) -> bool {
    frame == [ACK]
}

/// Render a frame for the debug log: printable ASCII as-is, everything else
/// (and always the trailing LRC) as `{0xNN}`.
pub fn printable(frame: &[u8]) -> String {
    let lrc_index = frame.len().saturating_sub(1);
    let mut out = String::with_capacity(frame.len() * 2);
    for (index, &byte) in frame.iter().enumerate() {
        if index != lrc_index && (32..126).contains(&byte) {
            out.push(byte as char);
        } else {
            out.push_str(&format!("{{0x{byte:02x}}}"));
        }
    }
    out
}
