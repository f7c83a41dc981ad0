use std::time::Duration;

use thiserror::Error;

use crate::sync::State;
use crate::transport::NodeId;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A call across the transport could not complete. Never fatal to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("peer {0} is unreachable")]
    Unreachable(NodeId),

    #[error("link {from} -> {to} is down")]
    Disconnected { from: NodeId, to: NodeId },

    /// The message arrived but the receiver refused it.
    #[error("peer {peer} rejected the message: {reason}")]
    Rejected { peer: NodeId, reason: String },
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Dequeue on an empty pending queue. Callers check `is_empty` first, so
    /// seeing this is a bug.
    #[error("dequeue on empty pending queue")]
    EmptyQueue,

    /// Advancing the clock would overflow. The clock is left unchanged.
    #[error("lamport clock at {clock} cannot advance past received timestamp {received:?}")]
    ClockOverflow { clock: u64, received: Option<u64> },

    #[error("quorum not reached: {acks}/{required} acks ({deferred} deferred, {failed} failed)")]
    QuorumNotReached {
        acks: usize,
        deferred: usize,
        failed: usize,
        required: usize,
    },

    #[error("quorum not reached after {waited:?}: {acks}/{required} acks")]
    QuorumTimeout {
        acks: usize,
        required: usize,
        waited: Duration,
    },

    #[error("cannot {op} while {state}")]
    InvalidState { op: &'static str, state: State },

    #[error("node has no peer directory yet")]
    NotConnected,

    #[error("node is already connected to its peers")]
    AlreadyConnected,

    #[error("peer {0} registered twice")]
    DuplicatePeer(NodeId),

    #[error("node {0} cannot register itself as a peer")]
    SelfRegistration(NodeId),

    #[error("reply from {granter} for round {round} does not match the current round")]
    StaleReply { round: u64, granter: NodeId },

    #[error("config io: {0}")]
    Io(#[from] std::io::Error),

    #[error("config json: {0}")]
    Json(#[from] serde_json::Error),
}
