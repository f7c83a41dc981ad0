//! Boundary between the engine and whatever carries its messages.
//!
//! The engine consumes [`Peer`] handles to send and implements [`Handler`] to
//! receive. Each inbound call may arrive on its own thread.

pub mod directory;
pub mod local;

pub use directory::PeerDirectory;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TransportError;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A timestamped request for the critical section.
///
/// The derived ordering is the total order tie-break: timestamp first, then
/// requester identity.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Request {
    pub timestamp: u64,
    pub requester: NodeId,
}

impl Request {
    pub fn new(timestamp: u64, requester: impl Into<NodeId>) -> Self {
        Self {
            timestamp,
            requester: requester.into(),
        }
    }

    /// Whether `self` is served before `other`.
    pub fn precedes(&self, other: &Request) -> bool {
        self < other
    }
}

/// Immediate answer to a [`Request`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Ack {
    /// Go ahead, stamped with the granter's clock.
    Granted(u64),
    /// Queued; a [`Grant`] follows when the receiver releases.
    Deferred,
}

/// Deferred "go ahead", sent when a holder releases.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    /// Granter's clock at send time.
    pub timestamp: u64,
    pub granter: NodeId,
    /// Timestamp of the request being answered.
    pub round: u64,
}

/// Outbound handle to one peer.
pub trait Peer: Send + Sync {
    fn name(&self) -> Result<NodeId, TransportError>;
    fn request(&self, req: &Request) -> Result<Ack, TransportError>;
    fn reply(&self, grant: &Grant) -> Result<(), TransportError>;
}

/// Inbound side, implemented by the engine. An `Err` refuses the message;
/// the transport reports it to the sender as [`TransportError::Rejected`].
pub trait Handler: Send + Sync {
    fn id(&self) -> &NodeId;
    fn on_request(&self, req: Request) -> crate::Result<Ack>;
    fn on_reply(&self, grant: Grant) -> crate::Result<()>;
}
