//! Wire encoding for peer and client traffic.
//!
//! Every peer message travels as a JSON `WireMessage` with binary payloads as base64. The
//! client port uses the same encoding for `ClientRequest` and `ClientReply`.

use crate::error::{Result, VaultError};
use crate::messages::{ClientReply, ClientRequest, Message, PeerInfo};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub const PROTOCOL_VERSION: u16 = 1;

/// Upper bound for an encoded message, large enough for a full immutable chunk.
pub const MAX_MESSAGE_SIZE: usize = 2 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    pub protocol_version: u16,
    pub sender: PeerInfo,
    pub message: Message,
}

pub fn encode_wire(sender: &PeerInfo, message: &Message) -> Result<Bytes> {
    encode(&WireMessage {
        protocol_version: PROTOCOL_VERSION,
        sender: sender.clone(),
        message: message.clone(),
    })
}

pub fn decode_wire(bytes: &[u8]) -> Result<WireMessage> {
    let wire: WireMessage = decode(bytes)?;
    if wire.protocol_version != PROTOCOL_VERSION {
        return Err(VaultError::Codec(format!(
            "unsupported protocol version {} (expected {})",
            wire.protocol_version, PROTOCOL_VERSION
        )));
    }
    Ok(wire)
}

pub fn encode_client_request(request: &ClientRequest) -> Result<Bytes> {
    encode(request)
}

pub fn decode_client_request(bytes: &[u8]) -> Result<ClientRequest> {
    decode(bytes)
}

pub fn encode_client_reply(reply: &ClientReply) -> Result<Bytes> {
    encode(reply)
}

pub fn decode_client_reply(bytes: &[u8]) -> Result<ClientReply> {
    decode(bytes)
}

fn encode<T: Serialize>(value: &T) -> Result<Bytes> {
    let bytes = serde_json::to_vec(value)?;
    if bytes.len() > MAX_MESSAGE_SIZE {
        return Err(VaultError::Codec(format!(
            "encoded message is {} bytes, limit is {}",
            bytes.len(),
            MAX_MESSAGE_SIZE
        )));
    }
    Ok(Bytes::from(bytes))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    if bytes.len() > MAX_MESSAGE_SIZE {
        return Err(VaultError::Codec(format!(
            "message is {} bytes, limit is {}",
            bytes.len(),
            MAX_MESSAGE_SIZE
        )));
    }
    serde_json::from_slice(bytes)
        .map_err(|error| VaultError::Codec(format!("malformed message: {}", error)))
}

/// Serde adapter storing `Bytes` as a base64 string.
pub mod base64_bytes {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded)
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}
