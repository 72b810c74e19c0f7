//! Identifiers shared by both sides of a connection.
//!
//! - [`ConnectionId`]: opaque identity of one client connection on the server
//! - [`CallId`]: per-batcher call identifier used for response correlation

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a single call, unique within one [`Batcher`](crate::client::Batcher).
///
/// Ids start at 1 and increase monotonically for the lifetime of the batcher.
pub type CallId = u64;

/// Opaque identity of a connection, assigned by the channel binding.
///
/// # Examples
///
/// ```
/// use chisel::ConnectionId;
///
/// let conn = ConnectionId::new(7);
/// assert_eq!(conn.value(), 7);
/// assert_eq!(conn.to_string(), "conn-7");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Wrap a raw connection number.
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Raw connection number.
    pub const fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

impl From<u64> for ConnectionId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}
