use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::info;

use super::{NodeId, Peer};
use crate::error::{Error, Result};

/// Identity → send handle for every other node. Filled once at startup and
/// read-only afterwards.
pub struct PeerDirectory {
    own: NodeId,
    peers: BTreeMap<NodeId, Arc<dyn Peer>>,
}

impl PeerDirectory {
    pub fn new(own: impl Into<NodeId>) -> Self {
        Self {
            own: own.into(),
            peers: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, id: NodeId, handle: Arc<dyn Peer>) -> Result<()> {
        if id == self.own {
            return Err(Error::SelfRegistration(id));
        }
        if self.peers.contains_key(&id) {
            return Err(Error::DuplicatePeer(id));
        }
        info!(node = %self.own, peer = %id, "registered peer");
        self.peers.insert(id, handle);
        Ok(())
    }

    /// Ask the handle who it is, then insert it under that name.
    pub fn register(&mut self, handle: Arc<dyn Peer>) -> Result<NodeId> {
        let id = handle.name()?;
        self.insert(id.clone(), handle)?;
        Ok(id)
    }

    pub fn get(&self, id: &NodeId) -> Option<&Arc<dyn Peer>> {
        self.peers.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &Arc<dyn Peer>)> {
        self.peers.iter()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
