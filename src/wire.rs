//! Protobuf codec for the presence relay websocket.
//!
//! DESIGN
//! ======
//! One socket carries one topic, so messages need no topic field. The relay
//! sends `Subscribed`, `Sync`, `Join`, `Leave` and `Closed`; the client only
//! ever sends `Track`. Participant keys travel as UUID strings.

use prost::Message;
use uuid::Uuid;

use crate::record::PresenceRecord;
use crate::topic::TopicSnapshot;
use crate::transport::TransportEvent;

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// The raw bytes could not be decoded as a protobuf `WireMessage`.
    #[error("failed to decode presence message: {0}")]
    Decode(#[from] prost::DecodeError),
    /// The `kind` integer on the wire does not map to a known message kind.
    #[error("invalid message kind: {0}")]
    InvalidKind(i32),
    /// The message kind is valid but not expected in this direction.
    #[error("unexpected message kind: {0}")]
    UnexpectedKind(&'static str),
    /// A join/leave arrived without a participant key.
    #[error("{0} message missing participant key")]
    MissingKey(&'static str),
    /// A participant key is not a UUID.
    #[error("invalid participant key: {0}")]
    InvalidKey(String),
    /// A track or join arrived without a record.
    #[error("{0} message carries no record")]
    MissingRecord(&'static str),
}

// =============================================================================
// ENCODE
// =============================================================================

/// Encode a relay → client event.
#[must_use]
pub fn encode_event(event: &TransportEvent) -> Vec<u8> {
    let wire = match event {
        TransportEvent::Subscribed => WireMessage::bare(WireKind::Subscribed),
        TransportEvent::Sync(snapshot) => WireMessage {
            entries: snapshot
                .iter()
                .map(|(key, records)| WireEntry { key: key.to_string(), records: to_wire_records(records) })
                .collect(),
            ..WireMessage::bare(WireKind::Sync)
        },
        TransportEvent::Join { key, records } => WireMessage {
            key: Some(key.to_string()),
            entries: vec![WireEntry { key: key.to_string(), records: to_wire_records(records) }],
            ..WireMessage::bare(WireKind::Join)
        },
        TransportEvent::Leave { key } => {
            WireMessage { key: Some(key.to_string()), ..WireMessage::bare(WireKind::Leave) }
        }
        TransportEvent::Closed { reason } => {
            WireMessage { reason: Some(reason.clone()), ..WireMessage::bare(WireKind::Closed) }
        }
    };
    encode(&wire)
}

/// Encode a client → relay track.
#[must_use]
pub fn encode_track(record: PresenceRecord) -> Vec<u8> {
    let wire = WireMessage {
        entries: vec![WireEntry { key: String::new(), records: to_wire_records(&[record]) }],
        ..WireMessage::bare(WireKind::Track)
    };
    encode(&wire)
}

fn encode(wire: &WireMessage) -> Vec<u8> {
    let mut out = Vec::with_capacity(wire.encoded_len());
    // Encoding into a growable Vec cannot run out of buffer.
    wire.encode(&mut out).unwrap_or_default();
    out
}

// =============================================================================
// DECODE
// =============================================================================

/// Decode a relay → client event.
///
/// # Errors
///
/// Returns a [`WireError`] for malformed bytes, unknown kinds, a `Track`
/// message, or join/leave messages with a missing or invalid key.
pub fn decode_event(bytes: &[u8]) -> Result<TransportEvent, WireError> {
    let wire = WireMessage::decode(bytes)?;
    match WireKind::try_from(wire.kind).map_err(|_| WireError::InvalidKind(wire.kind))? {
        WireKind::Subscribed => Ok(TransportEvent::Subscribed),
        WireKind::Sync => {
            let mut snapshot = TopicSnapshot::new();
            for entry in wire.entries {
                let key = parse_key(&entry.key)?;
                let records = from_wire_records(&entry.records);
                if !records.is_empty() {
                    snapshot.entry(key).or_default().extend(records);
                }
            }
            Ok(TransportEvent::Sync(snapshot))
        }
        WireKind::Join => {
            let key = parse_key(wire.key.as_deref().ok_or(WireError::MissingKey("join"))?)?;
            let records = wire
                .entries
                .iter()
                .flat_map(|entry| from_wire_records(&entry.records))
                .collect::<Vec<_>>();
            if records.is_empty() {
                return Err(WireError::MissingRecord("join"));
            }
            Ok(TransportEvent::Join { key, records })
        }
        WireKind::Leave => {
            let key = parse_key(wire.key.as_deref().ok_or(WireError::MissingKey("leave"))?)?;
            Ok(TransportEvent::Leave { key })
        }
        WireKind::Closed => Ok(TransportEvent::Closed { reason: wire.reason.unwrap_or_default() }),
        WireKind::Track => Err(WireError::UnexpectedKind(WireKind::Track.label())),
    }
}

/// Decode a client → relay track.
///
/// # Errors
///
/// Returns a [`WireError`] for malformed bytes, any kind other than `Track`,
/// or a track without a record.
pub fn decode_track(bytes: &[u8]) -> Result<PresenceRecord, WireError> {
    let wire = WireMessage::decode(bytes)?;
    match WireKind::try_from(wire.kind).map_err(|_| WireError::InvalidKind(wire.kind))? {
        WireKind::Track => wire
            .entries
            .first()
            .and_then(|entry| entry.records.first())
            .map(|r| PresenceRecord { online: r.online, last_seen: r.last_seen })
            .ok_or(WireError::MissingRecord("track")),
        other => Err(WireError::UnexpectedKind(other.label())),
    }
}

fn parse_key(raw: &str) -> Result<Uuid, WireError> {
    Uuid::parse_str(raw).map_err(|_| WireError::InvalidKey(raw.to_string()))
}

fn to_wire_records(records: &[PresenceRecord]) -> Vec<WireRecord> {
    records
        .iter()
        .map(|r| WireRecord { online: r.online, last_seen: r.last_seen })
        .collect()
}

fn from_wire_records(records: &[WireRecord]) -> Vec<PresenceRecord> {
    records
        .iter()
        .map(|r| PresenceRecord { online: r.online, last_seen: r.last_seen })
        .collect()
}

// =============================================================================
// WIRE TYPES
// =============================================================================

#[derive(Clone, PartialEq, Message)]
struct WireRecord {
    #[prost(bool, tag = "1")]
    online: bool,
    #[prost(int64, tag = "2")]
    last_seen: i64,
}

#[derive(Clone, PartialEq, Message)]
struct WireEntry {
    #[prost(string, tag = "1")]
    key: String,
    #[prost(message, repeated, tag = "2")]
    records: Vec<WireRecord>,
}

#[derive(Clone, PartialEq, Message)]
struct WireMessage {
    #[prost(enumeration = "WireKind", tag = "1")]
    kind: i32,
    #[prost(string, optional, tag = "2")]
    key: Option<String>,
    #[prost(message, repeated, tag = "3")]
    entries: Vec<WireEntry>,
    #[prost(string, optional, tag = "4")]
    reason: Option<String>,
}

impl WireMessage {
    fn bare(kind: WireKind) -> Self {
        Self { kind: kind as i32, key: None, entries: Vec::new(), reason: None }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, prost::Enumeration)]
#[repr(i32)]
enum WireKind {
    Subscribed = 0,
    Sync = 1,
    Join = 2,
    Leave = 3,
    Track = 4,
    Closed = 5,
}

impl WireKind {
    fn label(self) -> &'static str {
        match self {
            Self::Subscribed => "subscribed",
            Self::Sync => "sync",
            Self::Join => "join",
            Self::Leave => "leave",
            Self::Track => "track",
            Self::Closed => "closed",
        }
    }
}

#[cfg(test)]
#[path = "wire_test.rs"]
mod tests;
