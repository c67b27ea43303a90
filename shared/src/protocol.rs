//! Message framing for the arena's TCP protocol.
//!
//! Every frame is an 8 byte header, a big-endian `u32` message type followed by
//! a big-endian `u32` payload length, and then exactly that many payload bytes.
//!
//! | type | direction        | payload                                   |
//! |------|------------------|-------------------------------------------|
//! | 11   | server → client  | bincode encoded [`WorldSnapshot`]         |
//! | 12   | server → client  | UTF-8 identity                            |
//! | 13   | server → client  | empty, the receiver's agent died          |
//! | 21   | client → server  | heading then speed, big-endian `f32` each |
//! | 22   | client → server  | UTF-8 passkey                             |
//!
//! The input payload is big-endian like the header, whatever the host byte
//! order. Clients that pack the two floats in native order read back as
//! garbage headings on little-endian machines, so they must be updated
//! together with the bincode snapshot format.

use crate::snapshot::WorldSnapshot;
use thiserror::Error;

pub const HEADER_LEN: usize = 8;
/// Largest payload accepted from the wire.
pub const MAX_PAYLOAD_LEN: u32 = 16 * 1024 * 1024;

pub const MSG_WORLD_SNAPSHOT: u32 = 11;
pub const MSG_IDENTITY: u32 = 12;
pub const MSG_DEATH_NOTICE: u32 = 13;
pub const MSG_INPUT: u32 = 21;
pub const MSG_PASSKEY: u32 = 22;

const INPUT_PAYLOAD_LEN: usize = 8;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unknown message type {0}")]
    UnknownType(u32),
    #[error("message type {msg_type} expects {expected} payload bytes, got {actual}")]
    BadLength {
        msg_type: u32,
        expected: usize,
        actual: usize,
    },
    #[error("payload of {0} bytes exceeds the frame limit")]
    TooLarge(u32),
    #[error("payload is not valid UTF-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
    #[error("snapshot encoding failed: {0}")]
    Snapshot(#[from] bincode::Error),
}

impl ProtocolError {
    /// Faults that leave the stream aligned on a frame boundary, so the
    /// connection can carry on after logging them.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, ProtocolError::TooLarge(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub msg_type: u32,
    pub len: u32,
}

impl FrameHeader {
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut bytes = [0u8; HEADER_LEN];
        bytes[..4].copy_from_slice(&self.msg_type.to_be_bytes());
        bytes[4..].copy_from_slice(&self.len.to_be_bytes());
        bytes
    }

    pub fn decode(bytes: &[u8; HEADER_LEN]) -> Result<Self, ProtocolError> {
        let msg_type = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let len = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        if len > MAX_PAYLOAD_LEN {
            return Err(ProtocolError::TooLarge(len));
        }
        Ok(Self { msg_type, len })
    }
}

/// Prepends a header to `payload`.
pub fn encode_frame(msg_type: u32, payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|len| *len <= MAX_PAYLOAD_LEN)
        .ok_or_else(|| ProtocolError::TooLarge(payload.len().min(u32::MAX as usize) as u32))?;
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(&FrameHeader { msg_type, len }.encode());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Encodes a snapshot frame without taking ownership of the snapshot.
pub fn snapshot_frame(snapshot: &WorldSnapshot) -> Result<Vec<u8>, ProtocolError> {
    let payload = bincode::serialize(snapshot)?;
    encode_frame(MSG_WORLD_SNAPSHOT, &payload)
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    WorldSnapshot(WorldSnapshot),
    Identity(String),
    DeathNotice,
    Passkey(String),
    Input { heading: f32, speed: f32 },
}

impl Message {
    pub fn msg_type(&self) -> u32 {
        match self {
            Message::WorldSnapshot(_) => MSG_WORLD_SNAPSHOT,
            Message::Identity(_) => MSG_IDENTITY,
            Message::DeathNotice => MSG_DEATH_NOTICE,
            Message::Input { .. } => MSG_INPUT,
            Message::Passkey(_) => MSG_PASSKEY,
        }
    }

    pub fn encode_payload(&self) -> Result<Vec<u8>, ProtocolError> {
        let payload = match self {
            Message::WorldSnapshot(snapshot) => bincode::serialize(snapshot)?,
            Message::Identity(text) | Message::Passkey(text) => text.as_bytes().to_vec(),
            Message::DeathNotice => Vec::new(),
            Message::Input { heading, speed } => {
                let mut bytes = Vec::with_capacity(INPUT_PAYLOAD_LEN);
                bytes.extend_from_slice(&heading.to_be_bytes());
                bytes.extend_from_slice(&speed.to_be_bytes());
                bytes
            }
        };
        Ok(payload)
    }

    /// Header and payload, ready to write to the stream.
    pub fn to_frame(&self) -> Result<Vec<u8>, ProtocolError> {
        encode_frame(self.msg_type(), &self.encode_payload()?)
    }

    pub fn decode(msg_type: u32, payload: &[u8]) -> Result<Message, ProtocolError> {
        match msg_type {
            MSG_WORLD_SNAPSHOT => Ok(Message::WorldSnapshot(bincode::deserialize(payload)?)),
            MSG_IDENTITY => Ok(Message::Identity(String::from_utf8(payload.to_vec())?)),
            MSG_DEATH_NOTICE => Ok(Message::DeathNotice),
            MSG_PASSKEY => Ok(Message::Passkey(String::from_utf8(payload.to_vec())?)),
            MSG_INPUT => {
                if payload.len() != INPUT_PAYLOAD_LEN {
                    return Err(ProtocolError::BadLength {
                        msg_type,
                        expected: INPUT_PAYLOAD_LEN,
                        actual: payload.len(),
                    });
                }
                let heading = f32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
                let speed = f32::from_be_bytes([payload[4], payload[5], payload[6], payload[7]]);
                Ok(Message::Input { heading, speed })
            }
            other => Err(ProtocolError::UnknownType(other)),
        }
    }
}
