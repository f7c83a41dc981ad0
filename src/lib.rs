//! Ricart–Agrawala distributed mutual exclusion over Lamport clocks.
//!
//! A fixed set of symmetric peers coordinate access to a shared critical
//! section by multicasting timestamped requests and deferring replies while
//! they hold, or are ahead in line for, the section.

pub mod config;
pub mod error;
pub mod order;
pub mod sync;
pub mod transport;

pub use config::NodeConfig;
pub use error::{Error, Result, TransportError};
pub use order::{lamport::LamportClock, LogicalClock, Timestamp};
pub use sync::{ricart_agrawala::Node, DistributedMutex, MutexGuard, State};
pub use transport::{Ack, Grant, Handler, NodeId, Peer, PeerDirectory, Request};
