//! Wire format of UDP echo messages.
//!
//! Messages are bincode-encoded [`EchoMessage`] values. The token and
//! sequence number lead the encoding, so a receiver can route a datagram
//! with [`peek_header`] before decoding the rest of it.

use serde::{Deserialize, Serialize};

/// Largest datagram read by the UDP handle and the responder.
pub const MAX_DATAGRAM_SIZE: usize = 1500;

/// Default padding carried by echo requests.
pub const DEFAULT_PAYLOAD_SIZE: usize = 32;

/// Type of an echo message.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    EchoRequest,
    EchoReply,
}

/// One echo request or reply.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct EchoMessage {
    /// Identity of the engine that sent the request.
    pub token: u32,
    pub sequence: u64,
    pub kind: MessageKind,
    pub payload: Vec<u8>,
}

#[derive(Deserialize)]
struct Header {
    token: u32,
    sequence: u64,
}

impl EchoMessage {
    pub fn request(token: u32, sequence: u64, payload_size: usize) -> Self {
        Self {
            token,
            sequence,
            kind: MessageKind::EchoRequest,
            payload: vec![0u8; payload_size],
        }
    }

    /// Build the reply to this message, echoing its identity and payload.
    pub fn reply(&self) -> Self {
        Self {
            token: self.token,
            sequence: self.sequence,
            kind: MessageKind::EchoReply,
            payload: self.payload.clone(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }
}

/// Read the token and sequence number of an encoded message.
pub fn peek_header(bytes: &[u8]) -> Option<(u32, u64)> {
    bincode::deserialize::<Header>(bytes)
        .ok()
        .map(|h| (h.token, h.sequence))
}
