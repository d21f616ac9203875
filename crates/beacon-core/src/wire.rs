//! Beacon wire format — the announcement datagram.
//!
//! One announcement is one UDP datagram sent to the discovery multicast
//! group:
//!
//!   <service-name> TAB <service-uri>
//!
//! Both fields are UTF-8 text. There is no framing, no version byte and no
//! fragmentation: a record either fits in `MAX_ANNOUNCEMENT_LEN` bytes or it
//! is not an announcement.

use std::net::Ipv4Addr;

use bytes::{BufMut, Bytes, BytesMut};

// ── Protocol constants ───────────────────────────────────────────────────────

/// Separates the service name from the service URI.
/// Neither field may contain it.
pub const DELIMITER: u8 = b'\t';

/// Largest payload a listener accepts. Anything longer is treated as
/// truncated by the transport and dropped.
pub const MAX_ANNOUNCEMENT_LEN: usize = 1024;

/// Multicast group agreed out-of-band by all participants.
pub const DEFAULT_GROUP: Ipv4Addr = Ipv4Addr::new(226, 226, 226, 226);

/// UDP port on which announcements are sent and received.
pub const DEFAULT_PORT: u16 = 2266;

/// Interval between two announcements from the same node.
pub const ANNOUNCE_PERIOD_MS: u64 = 5000;

// ── Announcement ─────────────────────────────────────────────────────────────

/// One broadcast record pairing a service name with a contact URI.
///
/// The URI is carried as raw text here. Turning it into an [`Endpoint`]
/// is the receiver's job.
///
/// [`Endpoint`]: crate::Endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    pub service_name: String,
    pub service_uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("announcement is {0} bytes, limit is {max}", max = MAX_ANNOUNCEMENT_LEN)]
    Oversized(usize),
    #[error("announcement is not valid UTF-8")]
    NotUtf8,
    #[error("expected 2 fields, found {0}")]
    FieldCount(usize),
    #[error("announcement has an empty field")]
    EmptyField,
    #[error("field contains the delimiter byte")]
    ContainsDelimiter,
}

impl Announcement {
    /// Build an announcement.
    ///
    /// Precondition: neither field contains [`DELIMITER`]. This is not
    /// checked here; call [`Announcement::validate`] before broadcasting.
    pub fn new(service_name: impl Into<String>, service_uri: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            service_uri: service_uri.into(),
        }
    }

    /// Check that this announcement will decode on the other side.
    pub fn validate(&self) -> Result<(), WireError> {
        let delim = DELIMITER as char;
        if self.service_name.contains(delim) || self.service_uri.contains(delim) {
            return Err(WireError::ContainsDelimiter);
        }
        if self.service_name.is_empty() || self.service_uri.is_empty() {
            return Err(WireError::EmptyField);
        }
        let len = self.encoded_len();
        if len > MAX_ANNOUNCEMENT_LEN {
            return Err(WireError::Oversized(len));
        }
        Ok(())
    }

    /// Size of the encoded datagram in bytes.
    pub fn encoded_len(&self) -> usize {
        self.service_name.len() + 1 + self.service_uri.len()
    }

    /// Serialize into a single datagram payload.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_slice(self.service_name.as_bytes());
        buf.put_u8(DELIMITER);
        buf.put_slice(self.service_uri.as_bytes());
        buf.freeze()
    }

    /// Parse a received datagram payload.
    ///
    /// Every error variant means the datagram is malformed and dropped.
    /// The caller never needs to distinguish them except for logging.
    pub fn decode(payload: &[u8]) -> Result<Self, WireError> {
        if payload.len() > MAX_ANNOUNCEMENT_LEN {
            return Err(WireError::Oversized(payload.len()));
        }

        let text = std::str::from_utf8(payload).map_err(|_| WireError::NotUtf8)?;
        let fields: Vec<&str> = text.split(DELIMITER as char).collect();
        let [name, uri] = fields.as_slice() else {
            return Err(WireError::FieldCount(fields.len()));
        };

        if name.is_empty() || uri.is_empty() {
            return Err(WireError::EmptyField);
        }

        Ok(Self::new(*name, *uri))
    }
}
