//! Minecraft handshake peek
//!
//! The proxy is protocol-aware only to the extent of reading the first
//! frame of a connection to extract the requested hostname and intent. The
//! raw frame bytes are kept so they can be replayed to the backend.

use tokio::io::{AsyncRead, AsyncReadExt};

/// Upper bound on a sane handshake frame
const MAX_HANDSHAKE_LEN: usize = 1024;

/// Longest legal server address string in a handshake
const MAX_ADDRESS_LEN: usize = 255;

/// Login state in the handshake's next-state field
pub const NEXT_STATE_LOGIN: i32 = 2;

#[derive(Debug, Clone)]
pub struct Handshake {
    pub protocol_version: i32,
    pub server_address: String,
    pub server_port: u16,
    pub next_state: i32,
    /// The full frame as read off the wire, for replay to the backend
    pub raw: Vec<u8>,
}

impl Handshake {
    /// The hostname the client asked for, normalized for route lookup.
    ///
    /// Strips the Forge marker (`\0FML…`) and a trailing dot, lowercases.
    pub fn hostname(&self) -> String {
        let address = match self.server_address.split('\0').next() {
            Some(host) => host,
            None => self.server_address.as_str(),
        };
        address.trim_end_matches('.').to_ascii_lowercase()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed handshake: {0}")]
    Malformed(&'static str),
}

/// Read one VarInt, also appending its raw bytes to `raw`.
async fn read_varint<R: AsyncRead + Unpin>(
    reader: &mut R,
    raw: &mut Vec<u8>,
) -> Result<i32, HandshakeError> {
    let mut value: i32 = 0;
    for i in 0..5 {
        let byte = reader.read_u8().await?;
        raw.push(byte);
        value |= ((byte & 0x7f) as i32) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(HandshakeError::Malformed("varint too long"))
}

fn read_varint_slice(buf: &[u8], pos: &mut usize) -> Result<i32, HandshakeError> {
    let mut value: i32 = 0;
    for i in 0..5 {
        let byte = *buf
            .get(*pos)
            .ok_or(HandshakeError::Malformed("truncated varint"))?;
        *pos += 1;
        value |= ((byte & 0x7f) as i32) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(HandshakeError::Malformed("varint too long"))
}

/// Read and parse the first frame of a player connection.
pub async fn read_handshake<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<Handshake, HandshakeError> {
    let mut raw = Vec::with_capacity(64);

    let frame_len = read_varint(reader, &mut raw).await?;
    if frame_len <= 0 || frame_len as usize > MAX_HANDSHAKE_LEN {
        return Err(HandshakeError::Malformed("bad frame length"));
    }

    let mut payload = vec![0u8; frame_len as usize];
    reader.read_exact(&mut payload).await?;
    raw.extend_from_slice(&payload);

    let mut pos = 0;
    let packet_id = read_varint_slice(&payload, &mut pos)?;
    if packet_id != 0 {
        return Err(HandshakeError::Malformed("not a handshake packet"));
    }

    let protocol_version = read_varint_slice(&payload, &mut pos)?;

    let address_len = read_varint_slice(&payload, &mut pos)?;
    if address_len < 0 || address_len as usize > MAX_ADDRESS_LEN {
        return Err(HandshakeError::Malformed("bad address length"));
    }
    let end = pos
        .checked_add(address_len as usize)
        .filter(|end| *end <= payload.len())
        .ok_or(HandshakeError::Malformed("truncated address"))?;
    let server_address = String::from_utf8_lossy(&payload[pos..end]).to_string();
    pos = end;

    if pos + 2 > payload.len() {
        return Err(HandshakeError::Malformed("truncated port"));
    }
    let server_port = u16::from_be_bytes([payload[pos], payload[pos + 1]]);
    pos += 2;

    let next_state = read_varint_slice(&payload, &mut pos)?;

    Ok(Handshake {
        protocol_version,
        server_address,
        server_port,
        next_state,
        raw,
    })
}

fn write_varint(buf: &mut Vec<u8>, mut value: u32) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            return;
        }
    }
}

/// Build a login Disconnect frame carrying a chat-JSON message.
pub fn login_disconnect_frame(message: &str) -> Vec<u8> {
    let chat = serde_json::json!({ "text": message }).to_string();
    let chat = chat.as_bytes();

    let mut payload = Vec::with_capacity(chat.len() + 8);
    write_varint(&mut payload, 0x00); // login disconnect packet id
    write_varint(&mut payload, chat.len() as u32);
    payload.extend_from_slice(chat);

    let mut frame = Vec::with_capacity(payload.len() + 4);
    write_varint(&mut frame, payload.len() as u32);
    frame.extend_from_slice(&payload);
    frame
}

#[cfg(test)]
pub(crate) fn encode_handshake(
    protocol_version: i32,
    address: &str,
    port: u16,
    next_state: i32,
) -> Vec<u8> {
    let mut payload = Vec::new();
    write_varint(&mut payload, 0x00);
    write_varint(&mut payload, protocol_version as u32);
    write_varint(&mut payload, address.len() as u32);
    payload.extend_from_slice(address.as_bytes());
    payload.extend_from_slice(&port.to_be_bytes());
    write_varint(&mut payload, next_state as u32);

    let mut frame = Vec::new();
    write_varint(&mut frame, payload.len() as u32);
    frame.extend_from_slice(&payload);
    frame
}
